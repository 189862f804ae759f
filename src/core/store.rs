//! Store abstraction for missionctl's engine state.
//!
//! A project keeps all engine state under `<project>/.missionctl/`:
//! the SQLite database and broker audit log live in `data/`, the engine
//! configuration in `config.toml`.

use std::path::{Path, PathBuf};

pub const PROJECT_DIR_NAME: &str = ".missionctl";
pub const DATA_DIR_NAME: &str = "data";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Store handle representing a missionctl state workspace.
///
/// All engine state (missions, hops, assets, the transaction ledger) is
/// scoped to a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    /// Absolute path to the store data directory (`<project>/.missionctl/data`)
    pub root: PathBuf,
}

impl Store {
    /// Store for a project root (the directory containing `.missionctl/`).
    pub fn for_project(project_root: &Path) -> Self {
        Self {
            root: project_root.join(PROJECT_DIR_NAME).join(DATA_DIR_NAME),
        }
    }

    /// Store rooted directly at a data directory. Used by tests and embedders
    /// that manage their own layout.
    pub fn at(data_root: &Path) -> Self {
        Self {
            root: data_root.to_path_buf(),
        }
    }
}

/// Path of the engine config for a project root.
pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(PROJECT_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Walk up from `start_dir` to the first directory containing `.missionctl/`.
pub fn find_project_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = Some(start_dir);
    while let Some(dir) = current {
        if dir.join(PROJECT_DIR_NAME).is_dir() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}
