//! error taxonomy
//!
//! Every variant is fatal to the (component, stack) resolution it occurs in. Messages
//! always name the document, component and stack involved so a failure can be located
//! without re-running with a higher log level.
use crate::collaborators::CollaboratorError;
use crate::document::LoadError;
use crate::resolution::ComponentKey;
use std::path::PathBuf;
use std::sync::Arc;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to load {}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: LoadError,
    },

    #[error("import cycle detected: {}", .chain.join(" → "))]
    ImportCycle { chain: Vec<String> },

    #[error("import '{import}' of {} did not match any file", .document.display())]
    ImportNotFound { import: String, document: PathBuf },

    #[error("invalid import in {}: {reason}", .document.display())]
    InvalidImport { document: PathBuf, reason: String },

    #[error("cannot merge {incoming} into {existing} at '{path}'{}", origin_suffix(.origin))]
    MergeTypeConflict {
        path: String,
        existing: &'static str,
        incoming: &'static str,
        origin: Option<String>,
    },

    #[error("circular dependency in locals of {}: {}", .document.display(), .chain.join(" → "))]
    LocalsCycle { document: PathBuf, chain: Vec<String> },

    #[error("circular component dependency: {}", join_keys(.chain))]
    CircularComponentDependency { chain: Vec<ComponentKey> },

    #[error("component inheritance cycle in stack '{stack}': {}", .chain.join(" → "))]
    RedirectionCycle { stack: String, chain: Vec<String> },

    #[error("unknown tag '!{tag}' at '{path}' in {document}")]
    UnknownTag {
        tag: String,
        path: String,
        document: String,
    },

    #[error("invalid argument for '!{tag}' at '{path}': {reason}")]
    InvalidTagArgument {
        tag: String,
        path: String,
        reason: String,
    },

    #[error("template evaluation failed at '{path}' in {} (component '{component}', stack '{stack}')", .document.display())]
    TemplateEvaluation {
        document: PathBuf,
        path: String,
        component: String,
        stack: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("{collaborator} failed for '{target}'")]
    Collaborator {
        collaborator: &'static str,
        target: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("output '{key}' of component '{}' in stack '{}' is unavailable: {reason}", .producer.component, .producer.stack)]
    OutputUnavailable {
        producer: ComponentKey,
        key: String,
        reason: Unavailable,
    },

    #[error("stack '{0}' not found")]
    StackNotFound(String),

    #[error("stack '{name}' could not be loaded from {}", .manifest.display())]
    StackUnavailable {
        name: String,
        manifest: PathBuf,
        #[source]
        source: Arc<Error>,
    },

    #[error("stack name '{name}' is produced by both {} and {}", .first.display(), .second.display())]
    DuplicateStackName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("component '{component}' not found in stack '{stack}'")]
    ComponentNotFound { component: String, stack: String },

    #[error("'{section}' in {location} must be {expected}")]
    InvalidSection {
        location: String,
        section: String,
        expected: &'static str,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Why a cross-component output could not be read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    NotProvisioned,
    KeyNotFound,
}

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unavailable::NotProvisioned => f.write_str("component is not provisioned yet"),
            Unavailable::KeyNotFound => f.write_str("key not found in outputs"),
        }
    }
}

fn origin_suffix(origin: &Option<String>) -> String {
    match origin {
        Some(origin) if !origin.is_empty() => format!(" (from {origin})"),
        _ => String::new(),
    }
}

fn join_keys(chain: &[ComponentKey]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" → ")
}

impl Error {
    pub(crate) fn invalid_section(
        location: impl Into<String>,
        section: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Error::InvalidSection {
            location: location.into(),
            section: section.into(),
            expected,
        }
    }
}
