//! Engine configuration loaded from `.missionctl/config.toml`.
//!
//! Every field has a default, so a missing file is a valid configuration.
//! A file that exists but does not parse is a hard `Config` error.

use crate::core::error::MissionError;
use crate::core::store;
use crate::engine::tool_chain::{ToolCatalog, ToolDefinition};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub logging: LoggingConfig,
    pub validation: ValidationConfig,
    pub promotion: PromotionConfig,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Fallback level when neither `MISSIONCTL_LOG` nor `RUST_LOG` is set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// What the validator does when two steps write the same asset key.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateTargetPolicy {
    #[default]
    Reject,
    LastWriteWins,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    pub duplicate_result_targets: DuplicateTargetPolicy,
    /// Intermediate assets must be written by an earlier step before a step reads them.
    pub require_write_before_read: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PromotionConfig {
    pub promote_unready_outputs: bool,
}

impl EngineConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.store.busy_timeout_ms)
    }

    pub fn tool_catalog(&self) -> ToolCatalog {
        ToolCatalog::new(self.tools.clone())
    }
}

pub const DEFAULT_CONFIG_TOML: &str = r#"# missionctl engine configuration

[store]
busy_timeout_ms = 5000

[logging]
# Overridden by MISSIONCTL_LOG or RUST_LOG.
level = "warn"

[validation]
# "reject" or "last_write_wins"
duplicate_result_targets = "reject"
require_write_before_read = false

[promotion]
promote_unready_outputs = false

# Tool catalog used by the tool-chain validator. Example:
#
# [[tools]]
# id = "web_search"
# description = "Search the web"
# parameters = [{ name = "query", type = "string", required = true }]
# outputs = [{ name = "results", type = "array" }]
"#;

pub fn parse_config(content: &str) -> Result<EngineConfig, MissionError> {
    toml::from_str(content).map_err(|e| MissionError::Config(e.to_string()))
}

/// Load the config for a project root. Missing file = defaults (not an error).
pub fn load_config(project_root: &Path) -> Result<EngineConfig, MissionError> {
    let path = store::config_path(project_root);
    if !path.exists() {
        return Ok(EngineConfig::default());
    }
    let content = fs::read_to_string(&path).map_err(MissionError::IoError)?;
    parse_config(&content)
        .map_err(|e| MissionError::Config(format!("{}: {}", path.display(), e)))
}

/// Write the default config unless one already exists. Returns true if written.
pub fn write_default_config(project_root: &Path) -> Result<bool, MissionError> {
    let path = store::config_path(project_root);
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(MissionError::IoError)?;
    }
    fs::write(&path, DEFAULT_CONFIG_TOML).map_err(MissionError::IoError)?;
    Ok(true)
}
