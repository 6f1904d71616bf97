//! engine configuration (`stratum.yaml`)
//!
//! ```yaml
//! base_path: .
//! stacks:
//!   base_path: stacks
//!   included_paths: ["orgs/**/*"]
//!   excluded_paths: ["**/_defaults.yaml"]
//!   name_pattern: "{tenant}-{environment}-{stage}"
//! templates:
//!   evaluations: 1
//! settings:
//!   list_merge_strategy: replace
//!   section_merge_strategies:
//!     settings: append
//!   overrides_order: [global, component_type, component]
//!   workers: 0
//! ```
//!
//! A missing file yields the defaults. Relative paths are resolved against the directory of
//! the configuration file.
use crate::document::LoadError;
use crate::error::{Error, Result};
use crate::merge::{ListMergeStrategy, MergeOptions};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "stratum.yaml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// root of the repository, every other path is relative to it
    pub base_path: PathBuf,
    pub stacks: StacksConfig,
    pub templates: TemplatesConfig,
    pub settings: SettingsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StacksConfig {
    pub base_path: PathBuf,
    /// globs (relative to `base_path`) of top-level stack manifests
    pub included_paths: Vec<String>,
    pub excluded_paths: Vec<String>,
    /// e.g. `{tenant}-{environment}-{stage}`, tokens are replaced by stack vars
    pub name_pattern: String,
    /// template rendered against the merged stack tree
    pub name_template: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplatesConfig {
    /// number of template passes over a component
    pub evaluations: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsConfig {
    pub list_merge_strategy: ListMergeStrategy,
    pub section_merge_strategies: IndexMap<String, ListMergeStrategy>,
    pub overrides_order: Vec<OverrideLayer>,
    /// size of the batch worker pool, `0` uses one worker per cpu
    pub workers: usize,
}

/// Sources of `overrides` sections, applied in the configured order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideLayer {
    /// root `overrides`
    Global,
    /// `terraform.overrides`, `helmfile.overrides`, ...
    ComponentType,
    /// the component's own `overrides`
    Component,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            stacks: Default::default(),
            templates: Default::default(),
            settings: Default::default(),
        }
    }
}

impl Default for StacksConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("stacks"),
            included_paths: vec!["**/*".to_string()],
            excluded_paths: vec![],
            name_pattern: String::new(),
            name_template: String::new(),
        }
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self { evaluations: 1 }
    }
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            list_merge_strategy: ListMergeStrategy::Replace,
            section_merge_strategies: Default::default(),
            overrides_order: vec![
                OverrideLayer::Global,
                OverrideLayer::ComponentType,
                OverrideLayer::Component,
            ],
            workers: 0,
        }
    }
}

impl EngineConfig {
    /// Reads a configuration file, a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let directory = path.parent().unwrap_or(Path::new("."));

        let mut config = if path.is_file() {
            tracing::info!(path=%path.display(), "loading configuration");
            let contents = std::fs::read_to_string(path).map_err(|e| Error::Load {
                path: path.to_path_buf(),
                source: e.into(),
            })?;
            serde_yaml::from_str::<EngineConfig>(&contents).map_err(|e| Error::Load {
                path: path.to_path_buf(),
                source: LoadError::Yaml(e),
            })?
        } else {
            tracing::debug!(path=%path.display(), "no configuration file, using defaults");
            EngineConfig::default()
        };

        config.base_path = directory.join(&config.base_path);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.templates.evaluations == 0 {
            return Err(Error::Config(
                "templates.evaluations must be at least 1".to_string(),
            ));
        }

        let order = &self.settings.overrides_order;
        for (index, layer) in order.iter().enumerate() {
            if order[..index].contains(layer) {
                return Err(Error::Config(format!(
                    "settings.overrides_order lists {layer:?} more than once"
                )));
            }
        }

        Ok(())
    }

    /// Directory containing the stack manifests
    pub fn stacks_dir(&self) -> PathBuf {
        self.base_path.join(&self.stacks.base_path)
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            list_merge_strategy: self.settings.list_merge_strategy,
            section_strategies: self.settings.section_merge_strategies.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();

        assert_eq!(config.stacks_dir(), dir.path().join(".").join("stacks"));
        assert_eq!(config.templates.evaluations, 1);
        assert_eq!(
            config.settings.overrides_order,
            vec![
                OverrideLayer::Global,
                OverrideLayer::ComponentType,
                OverrideLayer::Component
            ]
        );
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "stacks:\n  name_pattern: '{stage}'\nsettings:\n  list_merge_strategy: append\n",
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.stacks.name_pattern, "{stage}");
        assert_eq!(config.stacks.base_path, PathBuf::from("stacks"));
        assert_eq!(
            config.merge_options().list_merge_strategy,
            ListMergeStrategy::Append
        );
    }

    #[test]
    fn invalid_strategy_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "settings:\n  list_merge_strategy: zip\n").unwrap();

        let error = EngineConfig::load(&path).unwrap_err();
        let source = std::error::Error::source(&error).unwrap().to_string();
        assert!(matches!(error, Error::Load { .. }));
        assert!(source.contains("yaml"), "{source}");
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!("merge".parse::<ListMergeStrategy>(), Ok(ListMergeStrategy::Merge));
        let error = "zip".parse::<ListMergeStrategy>().unwrap_err();
        assert!(error.contains("replace, append, merge"));
    }
}
