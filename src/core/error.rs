use crate::engine::tool_chain::ToolChainIssue;
use rusqlite;
use std::fmt::Write as _;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MissionError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Illegal state transition: {entity} '{id}' is {actual}, expected {expected}")]
    IllegalStateTransition {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("{}", render_issues(.0))]
    ValidationError(Vec<ToolChainIssue>),
    #[error("Mapping error: {0}")]
    MappingError(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl MissionError {
    /// Stable machine-readable code used in CLI envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            MissionError::RusqliteError(_) => "STORAGE_ERROR",
            MissionError::IoError(_) => "IO_ERROR",
            MissionError::JsonError(_) => "JSON_ERROR",
            MissionError::IllegalStateTransition { .. } => "ILLEGAL_STATE_TRANSITION",
            MissionError::NotFound(_) => "NOT_FOUND",
            MissionError::ValidationError(_) => "VALIDATION_ERROR",
            MissionError::MappingError(_) => "MAPPING_ERROR",
            MissionError::InvalidPayload(_) => "INVALID_PAYLOAD",
            MissionError::Config(_) => "CONFIG_ERROR",
            MissionError::Corrupt(_) => "CORRUPT_RECORD",
        }
    }

    pub(crate) fn illegal(
        entity: &'static str,
        id: &str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        MissionError::IllegalStateTransition {
            entity,
            id: id.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

fn render_issues(issues: &[ToolChainIssue]) -> String {
    let mut out = format!("Validation failed with {} issue(s):", issues.len());
    for issue in issues {
        let _ = write!(out, "\n  - {}", issue);
    }
    out
}
