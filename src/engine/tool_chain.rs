//! Tool chain validator.
//!
//! Checks a candidate ordered list of tool steps against a hop snapshot and
//! materializes a PENDING intermediate placeholder for every referenced key
//! the hop does not hold yet. The snapshot is never touched: placeholders
//! live on a `WorkingHop` overlay that the caller may commit.

use crate::core::config::{DuplicateTargetPolicy, ValidationConfig};
use crate::core::error::MissionError;
use crate::engine::model::{
    Asset, AssetRole, AssetSchema, AssetScope, AssetStatus, HopSnapshot, ParameterMapping,
    ResultMapping, ToolStep, is_valid_asset_key,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Metadata key recording which step first referenced a placeholder.
pub const META_MATERIALIZED_BY: &str = "materialized_by";

fn default_type() -> String {
    "any".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolOutput {
    pub name: String,
    #[serde(rename = "type", default = "default_type")]
    pub output_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    #[serde(default)]
    pub outputs: Vec<ToolOutput>,
}

impl ToolDefinition {
    pub fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o.name == name)
    }
}

/// Known tools by id. Empty catalog = catalog checks off.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: FxHashMap<String, ToolDefinition>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolDefinition>) -> Self {
        let mut map = FxHashMap::default();
        for tool in tools {
            map.insert(tool.id.clone(), tool);
        }
        Self { tools: map }
    }

    pub fn get(&self, id: &str) -> Option<&ToolDefinition> {
        self.tools.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

/// One structural problem in a tool chain. `step` is the 0-based position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ToolChainIssue {
    EmptyChain,
    UnknownTool {
        step: usize,
        tool_id: String,
    },
    UnknownParameter {
        step: usize,
        tool_id: String,
        parameter: String,
    },
    MissingRequiredParameter {
        step: usize,
        tool_id: String,
        parameter: String,
    },
    LiteralTypeMismatch {
        step: usize,
        parameter: String,
        expected: String,
        found: String,
    },
    InvalidAssetKey {
        step: usize,
        key: String,
    },
    NoResultTarget {
        step: usize,
    },
    UnknownResult {
        step: usize,
        tool_id: String,
        output: String,
    },
    DuplicateResultTarget {
        step: usize,
        key: String,
        first_step: usize,
    },
    ReadBeforeWrite {
        step: usize,
        parameter: String,
        key: String,
    },
}

impl fmt::Display for ToolChainIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolChainIssue::EmptyChain => write!(f, "tool chain has no steps"),
            ToolChainIssue::UnknownTool { step, tool_id } => {
                write!(f, "step {}: unknown tool '{}'", step, tool_id)
            }
            ToolChainIssue::UnknownParameter {
                step,
                tool_id,
                parameter,
            } => write!(
                f,
                "step {}: tool '{}' has no parameter '{}'",
                step, tool_id, parameter
            ),
            ToolChainIssue::MissingRequiredParameter {
                step,
                tool_id,
                parameter,
            } => write!(
                f,
                "step {}: required parameter '{}' of tool '{}' is not mapped",
                step, parameter, tool_id
            ),
            ToolChainIssue::LiteralTypeMismatch {
                step,
                parameter,
                expected,
                found,
            } => write!(
                f,
                "step {}: literal for '{}' is {}, expected {}",
                step, parameter, found, expected
            ),
            ToolChainIssue::InvalidAssetKey { step, key } => {
                write!(f, "step {}: '{}' is not a valid asset key", step, key)
            }
            ToolChainIssue::NoResultTarget { step } => {
                write!(f, "step {}: result mapping has no asset target", step)
            }
            ToolChainIssue::UnknownResult {
                step,
                tool_id,
                output,
            } => write!(
                f,
                "step {}: tool '{}' has no output '{}'",
                step, tool_id, output
            ),
            ToolChainIssue::DuplicateResultTarget {
                step,
                key,
                first_step,
            } => write!(
                f,
                "step {}: asset '{}' is already written by step {}",
                step, key, first_step
            ),
            ToolChainIssue::ReadBeforeWrite {
                step,
                parameter,
                key,
            } => write!(
                f,
                "step {}: parameter '{}' reads '{}' before any earlier step writes it",
                step, parameter, key
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationOptions {
    pub duplicate_targets: DuplicateTargetPolicy,
    pub require_write_before_read: bool,
}

impl From<&ValidationConfig> for ValidationOptions {
    fn from(cfg: &ValidationConfig) -> Self {
        Self {
            duplicate_targets: cfg.duplicate_result_targets,
            require_write_before_read: cfg.require_write_before_read,
        }
    }
}

/// Snapshot assets plus validator placeholders.
#[derive(Debug, Clone)]
pub struct WorkingHop<'a> {
    base: &'a HopSnapshot,
    placeholders: Vec<Asset>,
}

impl<'a> WorkingHop<'a> {
    pub fn asset(&self, key: &str) -> Option<&Asset> {
        self.base
            .assets
            .get(key)
            .or_else(|| self.placeholders.iter().find(|a| a.id == key))
    }

    pub fn placeholders(&self) -> &[Asset] {
        &self.placeholders
    }

    pub fn into_placeholders(self) -> Vec<Asset> {
        self.placeholders
    }

    /// All assets keyed by id, as the hop would hold them after commit.
    pub fn assets(&self) -> BTreeMap<String, Asset> {
        let mut all = self.base.assets.clone();
        for placeholder in &self.placeholders {
            all.insert(placeholder.id.clone(), placeholder.clone());
        }
        all
    }
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome<'a> {
    pub working: WorkingHop<'a>,
    pub issues: Vec<ToolChainIssue>,
}

impl ValidationOutcome<'_> {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Unknown declared types accept anything.
fn literal_matches(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn placeholder(hop_id: &str, key: &str, step_id: &str) -> Asset {
    let mut metadata = Map::new();
    metadata.insert(META_MATERIALIZED_BY.to_string(), json!(step_id));
    Asset {
        id: key.to_string(),
        name: key.to_string(),
        schema: AssetSchema::default(),
        status: AssetStatus::Pending,
        role: AssetRole::Intermediate,
        scope: AssetScope::hop(hop_id),
        value: Value::Null,
        metadata,
    }
}

/// Validate `steps` against the hop in `snapshot`.
///
/// Referential checks always run. Tool, parameter, output and literal type
/// checks run only when `catalog` is non-empty.
pub fn validate_tool_chain<'a>(
    snapshot: &'a HopSnapshot,
    steps: &[ToolStep],
    catalog: &ToolCatalog,
    options: ValidationOptions,
) -> ValidationOutcome<'a> {
    let mut issues = Vec::new();
    if steps.is_empty() {
        issues.push(ToolChainIssue::EmptyChain);
    }

    // Referenced keys, first referencing step for each.
    let mut referenced: BTreeMap<&str, &str> = BTreeMap::new();
    for step in steps {
        let reads = step.parameter_mapping.values().filter_map(|m| m.state_asset());
        let writes = step.result_mapping.values().filter_map(|m| m.state_asset());
        for key in reads.chain(writes) {
            if is_valid_asset_key(key) {
                referenced.entry(key).or_insert(step.id.as_str());
            }
        }
    }

    let placeholders: Vec<Asset> = referenced
        .iter()
        .filter(|(key, _)| !snapshot.assets.contains_key(**key))
        .map(|(key, step_id)| placeholder(&snapshot.hop.id, key, step_id))
        .collect();
    let intermediate: BTreeSet<&str> = placeholders.iter().map(|a| a.id.as_str()).collect();

    let check_catalog = !catalog.is_empty();
    let mut writers: FxHashMap<&str, usize> = FxHashMap::default();

    for (i, step) in steps.iter().enumerate() {
        let tool = if check_catalog {
            let found = catalog.get(&step.tool_id);
            if found.is_none() {
                issues.push(ToolChainIssue::UnknownTool {
                    step: i,
                    tool_id: step.tool_id.clone(),
                });
            }
            found
        } else {
            None
        };

        for (name, mapping) in &step.parameter_mapping {
            let declared = tool.and_then(|t| t.parameter(name));
            if let Some(tool) = tool
                && declared.is_none()
            {
                issues.push(ToolChainIssue::UnknownParameter {
                    step: i,
                    tool_id: tool.id.clone(),
                    parameter: name.clone(),
                });
            }

            match mapping {
                ParameterMapping::Literal { value } => {
                    if let Some(param) = declared
                        && !literal_matches(&param.param_type, value)
                    {
                        issues.push(ToolChainIssue::LiteralTypeMismatch {
                            step: i,
                            parameter: name.clone(),
                            expected: param.param_type.clone(),
                            found: json_type_name(value).to_string(),
                        });
                    }
                }
                ParameterMapping::AssetField { state_asset, .. } => {
                    if !is_valid_asset_key(state_asset) {
                        issues.push(ToolChainIssue::InvalidAssetKey {
                            step: i,
                            key: state_asset.clone(),
                        });
                    } else if options.require_write_before_read
                        && intermediate.contains(state_asset.as_str())
                        && !writers.contains_key(state_asset.as_str())
                    {
                        issues.push(ToolChainIssue::ReadBeforeWrite {
                            step: i,
                            parameter: name.clone(),
                            key: state_asset.clone(),
                        });
                    }
                }
            }
        }

        if let Some(tool) = tool {
            for param in tool.parameters.iter().filter(|p| p.required) {
                if !step.parameter_mapping.contains_key(&param.name) {
                    issues.push(ToolChainIssue::MissingRequiredParameter {
                        step: i,
                        tool_id: tool.id.clone(),
                        parameter: param.name.clone(),
                    });
                }
            }
        }

        let mut has_target = false;
        for (output, mapping) in &step.result_mapping {
            if let Some(tool) = tool
                && !tool.has_output(output)
            {
                issues.push(ToolChainIssue::UnknownResult {
                    step: i,
                    tool_id: tool.id.clone(),
                    output: output.clone(),
                });
            }
            let ResultMapping::AssetField { state_asset } = mapping else {
                continue;
            };
            if !is_valid_asset_key(state_asset) {
                issues.push(ToolChainIssue::InvalidAssetKey {
                    step: i,
                    key: state_asset.clone(),
                });
                continue;
            }
            has_target = true;
            let key = state_asset.as_str();
            match writers.get(key) {
                Some(&first_step) => match options.duplicate_targets {
                    DuplicateTargetPolicy::Reject => {
                        issues.push(ToolChainIssue::DuplicateResultTarget {
                            step: i,
                            key: key.to_string(),
                            first_step,
                        });
                    }
                    DuplicateTargetPolicy::LastWriteWins => {
                        tracing::warn!(
                            hop_id = %snapshot.hop.id,
                            key,
                            first_step,
                            step = i,
                            "duplicate result target, later write wins"
                        );
                        writers.insert(key, i);
                    }
                },
                None => {
                    writers.insert(key, i);
                }
            }
        }
        if !has_target {
            issues.push(ToolChainIssue::NoResultTarget { step: i });
        }
    }

    tracing::debug!(
        hop_id = %snapshot.hop.id,
        steps = steps.len(),
        placeholders = placeholders.len(),
        issues = issues.len(),
        "validated tool chain"
    );

    ValidationOutcome {
        working: WorkingHop {
            base: snapshot,
            placeholders,
        },
        issues,
    }
}

fn lookup_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Turn a step's parameter mapping into the concrete argument object a
/// tool executor is called with.
pub fn resolve_parameters(
    step: &ToolStep,
    assets: &BTreeMap<String, Asset>,
) -> Result<Map<String, Value>, MissionError> {
    let mut args = Map::new();
    for (name, mapping) in &step.parameter_mapping {
        let value = match mapping {
            ParameterMapping::Literal { value } => value.clone(),
            ParameterMapping::AssetField { state_asset, path } => {
                let asset = assets.get(state_asset).ok_or_else(|| {
                    MissionError::NotFound(format!(
                        "asset '{}' for parameter '{}' of step {}",
                        state_asset, name, step.id
                    ))
                })?;
                match path {
                    Some(path) => lookup_path(&asset.value, path).cloned().ok_or_else(|| {
                        MissionError::NotFound(format!(
                            "path '{}' in asset '{}' for parameter '{}'",
                            path, state_asset, name
                        ))
                    })?,
                    None => asset.value.clone(),
                }
            }
        };
        args.insert(name.clone(), value);
    }
    Ok(args)
}
