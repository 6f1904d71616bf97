//! fixture repositories for integration tests
#![allow(dead_code)]

use std::path::Path;
use stratum::collaborators::Collaborators;
use stratum::config::EngineConfig;
use stratum::Engine;

/// A temporary repository, `stacks/` holds the given files
pub struct Repository {
    dir: tempfile::TempDir,
}

impl Repository {
    pub fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("temporary directory");
        for (path, contents) in files {
            let path = dir.path().join("stacks").join(path);
            std::fs::create_dir_all(path.parent().expect("parent directory")).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn stack_file(&self, path: &str) -> String {
        self.dir
            .path()
            .join("stacks")
            .join(path)
            .canonicalize()
            .unwrap()
            .display()
            .to_string()
    }

    /// Top level `*.yaml` files are stacks, subdirectories hold catalogs and mixins
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            base_path: self.dir.path().to_path_buf(),
            ..Default::default()
        };
        config.stacks.included_paths = vec!["*.yaml".to_string()];
        config
    }

    pub fn engine(&self) -> Engine {
        Engine::new(self.config(), Collaborators::default())
    }

    pub fn engine_with(&self, config: EngineConfig, collaborators: Collaborators) -> Engine {
        Engine::new(config, collaborators)
    }
}
