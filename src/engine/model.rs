//! Engine data model: missions, hops, assets and tool steps.
//!
//! Every status is a closed enum. The string form used in storage and on the
//! wire is SCREAMING_SNAKE_CASE for statuses and snake_case for roles and
//! scope kinds; an unknown string read back from storage is a `Corrupt`
//! error rather than a fallback value.

use crate::core::error::MissionError;
use regex::Regex;
use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

macro_rules! string_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(raw: &str) -> Result<Self, MissionError> {
                match raw {
                    $($text => Ok($name::$variant),)+
                    other => Err(MissionError::Corrupt(format!(
                        "unknown {} '{}'",
                        $label, other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                $name::parse(value.as_str()?).map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionStatus {
    AwaitingApproval,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

string_enum!(MissionStatus, "mission status", {
    AwaitingApproval => "AWAITING_APPROVAL",
    InProgress => "IN_PROGRESS",
    Completed => "COMPLETED",
    Failed => "FAILED",
    Cancelled => "CANCELLED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HopStatus {
    HopPlanStarted,
    HopPlanProposed,
    HopPlanReady,
    HopImplStarted,
    HopImplProposed,
    HopImplReady,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

string_enum!(HopStatus, "hop status", {
    HopPlanStarted => "HOP_PLAN_STARTED",
    HopPlanProposed => "HOP_PLAN_PROPOSED",
    HopPlanReady => "HOP_PLAN_READY",
    HopImplStarted => "HOP_IMPL_STARTED",
    HopImplProposed => "HOP_IMPL_PROPOSED",
    HopImplReady => "HOP_IMPL_READY",
    Executing => "EXECUTING",
    Completed => "COMPLETED",
    Failed => "FAILED",
    Cancelled => "CANCELLED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetStatus {
    Proposed,
    Pending,
    InProgress,
    Ready,
    Error,
    Expired,
}

string_enum!(AssetStatus, "asset status", {
    Proposed => "PROPOSED",
    Pending => "PENDING",
    InProgress => "IN_PROGRESS",
    Ready => "READY",
    Error => "ERROR",
    Expired => "EXPIRED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    Input,
    Output,
    Intermediate,
}

string_enum!(AssetRole, "asset role", {
    Input => "input",
    Output => "output",
    Intermediate => "intermediate",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Mission,
    Hop,
}

string_enum!(ScopeKind, "scope kind", {
    Mission => "mission",
    Hop => "hop",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolStepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

string_enum!(ToolStepStatus, "tool step status", {
    Pending => "PENDING",
    Executing => "EXECUTING",
    Completed => "COMPLETED",
    Failed => "FAILED",
    Cancelled => "CANCELLED",
});

/// Owning context of an asset: (mission|hop, id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetScope {
    pub kind: ScopeKind,
    pub id: String,
}

impl AssetScope {
    pub fn mission(id: &str) -> Self {
        Self {
            kind: ScopeKind::Mission,
            id: id.to_string(),
        }
    }

    pub fn hop(id: &str) -> Self {
        Self {
            kind: ScopeKind::Hop,
            id: id.to_string(),
        }
    }
}

impl fmt::Display for AssetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Declared type plus a free-form structural description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSchema {
    #[serde(rename = "type", default = "default_schema_type")]
    pub schema_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_array: bool,
}

fn default_schema_type() -> String {
    "any".to_string()
}

impl Default for AssetSchema {
    fn default() -> Self {
        Self {
            schema_type: default_schema_type(),
            description: String::new(),
            is_array: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: String,
    pub schema: AssetSchema,
    pub status: AssetStatus,
    pub role: AssetRole,
    pub scope: AssetScope,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Asset {
    pub fn is_ready(&self) -> bool {
        self.status == AssetStatus::Ready
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub success_criteria: Vec<String>,
    pub status: MissionStatus,
    pub current_hop_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    pub id: String,
    pub mission_id: String,
    pub sequence_order: u32,
    pub name: String,
    pub description: String,
    pub status: HopStatus,
    pub is_final: bool,
    pub is_resolved: bool,
    /// local key -> mission asset id
    pub input_mapping: BTreeMap<String, String>,
    /// local key -> mission asset id
    pub output_mapping: BTreeMap<String, String>,
    pub version: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// Where a tool parameter gets its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterMapping {
    Literal {
        value: Value,
    },
    AssetField {
        state_asset: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

impl ParameterMapping {
    pub fn state_asset(&self) -> Option<&str> {
        match self {
            ParameterMapping::AssetField { state_asset, .. } => Some(state_asset),
            ParameterMapping::Literal { .. } => None,
        }
    }
}

/// Where a tool output goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultMapping {
    AssetField { state_asset: String },
    Discard,
}

impl ResultMapping {
    pub fn state_asset(&self) -> Option<&str> {
        match self {
            ResultMapping::AssetField { state_asset } => Some(state_asset),
            ResultMapping::Discard => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStep {
    pub id: String,
    pub hop_id: String,
    pub tool_id: String,
    pub index: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameter_mapping: BTreeMap<String, ParameterMapping>,
    #[serde(default)]
    pub result_mapping: BTreeMap<String, ResultMapping>,
    pub status: ToolStepStatus,
}

/// Immutable view of a hop used for validation: the hop row, its ordered
/// tool steps and its local asset set keyed by asset id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopSnapshot {
    pub hop: Hop,
    pub tool_steps: Vec<ToolStep>,
    pub assets: BTreeMap<String, Asset>,
}

/// A mission together with its current hop and ordered hop history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionState {
    pub mission: Mission,
    pub current_hop: Option<Hop>,
    pub hop_history: Vec<Hop>,
}

static ASSET_KEY_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:-]{1,128}$").ok());

/// Asset ids and local keys: `[A-Za-z0-9_.:-]`, 1 to 128 characters.
pub fn is_valid_asset_key(key: &str) -> bool {
    ASSET_KEY_RE.as_ref().is_some_and(|re| re.is_match(key))
}
