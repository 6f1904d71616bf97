//! contracts of the systems the engine calls out to
//!
//! - [Fetcher]: pulls a remote import onto disk
//! - [OutputReader]: reads an output of an already applied component
//! - [CommandRunner]: runs `!exec` commands
//!
//! Calls are blocking. Timeouts and retries are the collaborator's business.
use crate::error::{Error, Result};
use crate::value::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

pub trait Fetcher: Send + Sync {
    /// Makes `uri` available locally and returns the path of the file
    fn fetch(&self, uri: &str) -> Result<PathBuf, CollaboratorError>;
}

pub trait OutputReader: Send + Sync {
    fn read_output(
        &self,
        component: &str,
        stack: &str,
        key: &str,
    ) -> Result<OutputLookup, CollaboratorError>;
}

pub trait CommandRunner: Send + Sync {
    /// Runs `command` and returns its stdout
    fn run(&self, command: &str, cwd: &Path) -> Result<String, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputLookup {
    Found(Value),
    /// the producing component has not been applied yet
    NotProvisioned,
    /// the component is applied but has no such output
    KeyNotFound,
}

/// The collaborators used by one engine
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub outputs: Arc<dyn OutputReader>,
    pub runner: Arc<dyn CommandRunner>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            fetcher: Arc::new(LocalFetcher),
            outputs: Arc::new(UnprovisionedState),
            runner: Arc::new(ShellCommandRunner),
        }
    }
}

impl Collaborators {
    pub fn with_outputs(mut self, outputs: impl OutputReader + 'static) -> Self {
        self.outputs = Arc::new(outputs);
        self
    }

    pub fn with_fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    pub fn with_runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Arc::new(runner);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Supports `file://` URIs only
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFetcher;

impl Fetcher for LocalFetcher {
    fn fetch(&self, uri: &str) -> Result<PathBuf, CollaboratorError> {
        let Some(path) = uri.strip_prefix("file://") else {
            return Err(format!("no fetcher configured for '{uri}'").into());
        };

        let path = PathBuf::from(path);
        if !path.is_file() {
            return Err(format!("{} does not exist", path.display()).into());
        }
        Ok(path)
    }
}

/// Every component is reported as not provisioned
#[derive(Debug, Default, Clone, Copy)]
pub struct UnprovisionedState;

impl OutputReader for UnprovisionedState {
    fn read_output(&self, _: &str, _: &str, _: &str) -> Result<OutputLookup, CollaboratorError> {
        Ok(OutputLookup::NotProvisioned)
    }
}

/// Runs commands with `sh -c`
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellCommandRunner;

impl CommandRunner for ShellCommandRunner {
    fn run(&self, command: &str, cwd: &Path) -> Result<String, CollaboratorError> {
        tracing::debug!(command, cwd=%cwd.display(), "running command");
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .output()?;

        if !output.status.success() {
            return Err(format!(
                "command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )
            .into());
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

/// Outputs read from a yaml file shaped `<stack>: <component>: <key>: <value>`
///
/// A stack or component missing from the file is reported as not provisioned.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StaticOutputs {
    outputs: Value,
}

impl StaticOutputs {
    pub fn new(outputs: Value) -> Self {
        Self { outputs }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let load_error = |source: crate::document::LoadError| Error::Load {
            path: path.to_path_buf(),
            source,
        };

        let contents = std::fs::read_to_string(path).map_err(|e| load_error(e.into()))?;
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&contents).map_err(|e| load_error(e.into()))?;
        Ok(Self::new(Value::try_from(yaml).map_err(load_error)?))
    }
}

impl OutputReader for StaticOutputs {
    fn read_output(
        &self,
        component: &str,
        stack: &str,
        key: &str,
    ) -> Result<OutputLookup, CollaboratorError> {
        let Some(outputs) = self.outputs.get_path(&[stack, component]) else {
            return Ok(OutputLookup::NotProvisioned);
        };

        Ok(match outputs.get(key) {
            Some(value) => OutputLookup::Found(value.clone()),
            None => OutputLookup::KeyNotFound,
        })
    }
}
