use missionctl::core::config::{DuplicateTargetPolicy, parse_config};
use missionctl::engine::model::{
    Asset, AssetRole, AssetSchema, AssetScope, AssetStatus, Hop, HopSnapshot, HopStatus,
    ParameterMapping, ResultMapping, ToolStep, ToolStepStatus,
};
use missionctl::engine::tool_chain::{
    ToolCatalog, ToolChainIssue, ValidationOptions, resolve_parameters, validate_tool_chain,
};
use serde_json::{Map, json};
use std::collections::BTreeMap;

fn snapshot(keys: &[&str]) -> HopSnapshot {
    HopSnapshot {
        hop: Hop {
            id: "H_1".to_string(),
            mission_id: "M_1".to_string(),
            sequence_order: 0,
            name: "research".to_string(),
            description: String::new(),
            status: HopStatus::HopImplStarted,
            is_final: false,
            is_resolved: false,
            input_mapping: BTreeMap::new(),
            output_mapping: BTreeMap::new(),
            version: 0,
            created_at: "1Z".to_string(),
            updated_at: "1Z".to_string(),
        },
        tool_steps: vec![],
        assets: keys
            .iter()
            .map(|k| {
                (
                    k.to_string(),
                    Asset {
                        id: k.to_string(),
                        name: k.to_string(),
                        schema: AssetSchema::default(),
                        status: AssetStatus::Ready,
                        role: AssetRole::Input,
                        scope: AssetScope::hop("H_1"),
                        value: json!("value of ".to_string() + k),
                        metadata: Map::new(),
                    },
                )
            })
            .collect(),
    }
}

fn step(tool: &str, params: Vec<(&str, ParameterMapping)>, results: Vec<(&str, &str)>) -> ToolStep {
    ToolStep {
        id: format!("TS_{}", tool),
        hop_id: "H_1".to_string(),
        tool_id: tool.to_string(),
        index: 0,
        description: String::new(),
        parameter_mapping: params
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        result_mapping: results
            .into_iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    ResultMapping::AssetField {
                        state_asset: v.to_string(),
                    },
                )
            })
            .collect(),
        status: ToolStepStatus::Pending,
    }
}

fn read(key: &str) -> ParameterMapping {
    ParameterMapping::AssetField {
        state_asset: key.to_string(),
        path: None,
    }
}

#[test]
fn test_scenario_b_unknown_reference_becomes_placeholder() {
    let snap = snapshot(&["query"]);
    let steps = vec![
        step("search", vec![("q", read("query")), ("seed", read("temp1"))], vec![("hits", "results")]),
    ];
    let outcome = validate_tool_chain(&snap, &steps, &ToolCatalog::default(), ValidationOptions::default());

    assert!(outcome.issues.is_empty(), "{:?}", outcome.issues);
    let placeholder_ids: Vec<&str> = outcome
        .working
        .placeholders()
        .iter()
        .map(|a| a.id.as_str())
        .collect();
    assert_eq!(placeholder_ids, vec!["results", "temp1"]);
    let temp = outcome.working.asset("temp1").unwrap();
    assert_eq!(temp.role, AssetRole::Intermediate);
    assert_eq!(temp.status, AssetStatus::Pending);
    assert_eq!(temp.scope, AssetScope::hop("H_1"));
    // The snapshot is untouched.
    assert_eq!(snap.assets.len(), 1);
    assert_eq!(outcome.working.assets().len(), 3);
}

#[test]
fn test_scenario_c_duplicate_targets_rejected_by_default() {
    let snap = snapshot(&["query"]);
    let steps = vec![
        step("search", vec![("q", read("query"))], vec![("hits", "shared")]),
        step("rank", vec![("q", read("query"))], vec![("ranked", "shared")]),
    ];
    let outcome = validate_tool_chain(&snap, &steps, &ToolCatalog::default(), ValidationOptions::default());
    assert_eq!(
        outcome.issues,
        vec![ToolChainIssue::DuplicateResultTarget {
            step: 1,
            key: "shared".to_string(),
            first_step: 0,
        }]
    );
}

#[test]
fn test_scenario_c_last_write_wins_accepts() {
    let snap = snapshot(&["query"]);
    let steps = vec![
        step("search", vec![("q", read("query"))], vec![("hits", "shared")]),
        step("rank", vec![("q", read("query"))], vec![("ranked", "shared")]),
    ];
    let options = ValidationOptions {
        duplicate_targets: DuplicateTargetPolicy::LastWriteWins,
        ..ValidationOptions::default()
    };
    let outcome = validate_tool_chain(&snap, &steps, &ToolCatalog::default(), options);
    assert!(outcome.is_valid());
    assert_eq!(outcome.working.placeholders().len(), 1);
}

#[test]
fn test_issues_render_as_itemized_error() {
    let snap = snapshot(&[]);
    let steps = vec![step("search", vec![], vec![])];
    let outcome = validate_tool_chain(&snap, &steps, &ToolCatalog::default(), ValidationOptions::default());
    let err = missionctl::core::error::MissionError::ValidationError(outcome.issues);
    let text = err.to_string();
    assert!(text.starts_with("Validation failed with 1 issue(s):"));
    assert!(text.contains("- step 0: result mapping has no asset target"));
}

#[test]
fn test_catalog_from_config_drives_type_checks() {
    let cfg = parse_config(
        r#"
        [[tools]]
        id = "fetch"
        parameters = [
            { name = "url", type = "string", required = true },
            { name = "retries", type = "integer" },
        ]
        outputs = [{ name = "body", type = "string" }]
        "#,
    )
    .unwrap();
    let catalog = cfg.tool_catalog();
    let snap = snapshot(&["link"]);

    let good = step(
        "fetch",
        vec![
            ("url", read("link")),
            ("retries", ParameterMapping::Literal { value: json!(3) }),
        ],
        vec![("body", "page")],
    );
    let outcome = validate_tool_chain(&snap, &[good], &catalog, ValidationOptions::default());
    assert!(outcome.is_valid(), "{:?}", outcome.issues);

    let bad = step(
        "fetch",
        vec![
            ("retries", ParameterMapping::Literal { value: json!(2.5) }),
            ("timeout", ParameterMapping::Literal { value: json!(10) }),
        ],
        vec![("body", "page")],
    );
    let outcome = validate_tool_chain(&snap, &[bad], &catalog, ValidationOptions::default());
    assert_eq!(outcome.issues.len(), 3, "{:?}", outcome.issues);
    assert!(outcome.issues.iter().any(|i| matches!(
        i,
        ToolChainIssue::LiteralTypeMismatch { expected, found, .. } if expected == "integer" && found == "number"
    )));
    assert!(outcome.issues.iter().any(|i| matches!(
        i,
        ToolChainIssue::UnknownParameter { parameter, .. } if parameter == "timeout"
    )));
    assert!(outcome.issues.iter().any(|i| matches!(
        i,
        ToolChainIssue::MissingRequiredParameter { parameter, .. } if parameter == "url"
    )));
}

#[test]
fn test_issues_serialize_with_tag() {
    let issue = ToolChainIssue::NoResultTarget { step: 2 };
    assert_eq!(
        serde_json::to_value(&issue).unwrap(),
        json!({ "issue": "no_result_target", "step": 2 })
    );
}

#[test]
fn test_resolve_parameters_against_working_assets() {
    let snap = snapshot(&["query"]);
    let steps = vec![step(
        "search",
        vec![
            ("q", read("query")),
            ("limit", ParameterMapping::Literal { value: json!(10) }),
        ],
        vec![("hits", "results")],
    )];
    let outcome = validate_tool_chain(&snap, &steps, &ToolCatalog::default(), ValidationOptions::default());
    let args = resolve_parameters(&steps[0], &outcome.working.assets()).unwrap();
    assert_eq!(args["q"], json!("value of query"));
    assert_eq!(args["limit"], json!(10));
}
