use missionctl::core::broker::read_audit_log;
use missionctl::core::config::{DuplicateTargetPolicy, EngineConfig};
use missionctl::core::store::Store;
use missionctl::engine::model::{AssetRole, AssetScope, AssetStatus, HopStatus, MissionStatus};
use missionctl::engine::{EngineContext, Termination, TerminationTarget, TransactionType};
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};

fn test_ctx() -> (TempDir, EngineContext) {
    let tmp = tempdir().unwrap();
    let ctx = EngineContext::open(Store::at(tmp.path()), EngineConfig::default()).unwrap();
    (tmp, ctx)
}

fn apply(ctx: &EngineContext, tx: TransactionType, payload: Value) -> String {
    ctx.dispatcher().apply_json(tx, payload).unwrap().entity_id
}

fn propose_mission(ctx: &EngineContext) -> String {
    apply(
        ctx,
        TransactionType::ProposeMission,
        json!({
            "name": "Quarterly report",
            "goal": "Summarize Q3 sales",
            "success_criteria": ["report is READY"],
            "inputs": [{ "id": "A", "name": "sales data", "schema": { "type": "string" }, "value": "alpha" }],
            "outputs": [{ "id": "report", "name": "report", "schema": { "type": "string" } }]
        }),
    )
}

fn active_mission(ctx: &EngineContext) -> String {
    let mission_id = propose_mission(ctx);
    apply(ctx, TransactionType::AcceptMission, json!({ "mission_id": mission_id }));
    mission_id
}

fn propose_plan(ctx: &EngineContext, mission_id: &str, is_final: bool) -> String {
    apply(
        ctx,
        TransactionType::ProposeHopPlan,
        json!({
            "mission_id": mission_id,
            "name": "summarize",
            "is_final": is_final,
            "input_mapping": { "x": "A" },
            "output_mapping": { "out": "report" }
        }),
    )
}

fn two_step_chain(hop_id: &str) -> Value {
    json!({
        "hop_id": hop_id,
        "tool_steps": [
            {
                "tool_id": "summarize",
                "parameter_mapping": { "text": { "type": "asset_field", "state_asset": "x" } },
                "result_mapping": { "summary": { "type": "asset_field", "state_asset": "temp1" } }
            },
            {
                "tool_id": "format",
                "parameter_mapping": { "body": { "type": "asset_field", "state_asset": "temp1" } },
                "result_mapping": { "doc": { "type": "asset_field", "state_asset": "out" } }
            }
        ]
    })
}

fn drive_to_executing(ctx: &EngineContext, mission_id: &str, is_final: bool) -> String {
    let hop_id = propose_plan(ctx, mission_id, is_final);
    apply(ctx, TransactionType::AcceptHopPlan, json!({ "hop_id": hop_id }));
    apply(ctx, TransactionType::ProposeHopImpl, two_step_chain(&hop_id));
    apply(ctx, TransactionType::AcceptHopImpl, json!({ "hop_id": hop_id }));
    apply(ctx, TransactionType::ExecuteHop, json!({ "hop_id": hop_id }));
    hop_id
}

fn assert_coordination(ctx: &EngineContext, mission_id: &str) {
    let state = ctx.mission_state(mission_id).unwrap();
    if state.mission.current_hop_id.is_some() {
        assert_eq!(state.mission.status, MissionStatus::InProgress);
    }
}

#[test]
fn test_propose_mission_declares_assets() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = propose_mission(&ctx);

    let state = ctx.mission_state(&mission_id).unwrap();
    assert_eq!(state.mission.status, MissionStatus::AwaitingApproval);
    assert!(state.mission.current_hop_id.is_none());

    let assets = ctx.assets(&AssetScope::mission(&mission_id)).unwrap();
    let input = assets.iter().find(|a| a.id == "A").unwrap();
    assert_eq!(input.status, AssetStatus::Ready);
    assert_eq!(input.role, AssetRole::Input);
    let output = assets.iter().find(|a| a.id == "report").unwrap();
    assert_eq!(output.status, AssetStatus::Pending);
}

#[test]
fn test_scenario_a_plan_copies_inputs() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = propose_plan(&ctx, &mission_id, false);

    let snapshot = ctx.hop_snapshot(&hop_id).unwrap();
    assert_eq!(snapshot.hop.status, HopStatus::HopPlanProposed);
    let x = &snapshot.assets["x"];
    assert_eq!(x.value, json!("alpha"));
    assert_eq!(x.status, AssetStatus::Ready);
    assert_eq!(x.role, AssetRole::Input);
    assert_eq!(snapshot.assets["out"].status, AssetStatus::Pending);

    let state = ctx.mission_state(&mission_id).unwrap();
    assert_eq!(state.mission.current_hop_id.as_deref(), Some(hop_id.as_str()));
}

#[test]
fn test_plan_against_unapproved_mission_persists_no_hop() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = propose_mission(&ctx);

    let err = ctx
        .dispatcher()
        .apply_json(
            TransactionType::ProposeHopPlan,
            json!({ "mission_id": mission_id, "name": "early" }),
        )
        .unwrap_err();
    assert_eq!(err.kind(), "ILLEGAL_STATE_TRANSITION");

    let state = ctx.mission_state(&mission_id).unwrap();
    assert!(state.hop_history.is_empty());
    assert!(state.mission.current_hop_id.is_none());
}

#[test]
fn test_mapping_error_rolls_back_everything() {
    let (tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);

    let err = ctx
        .dispatcher()
        .apply_json(
            TransactionType::ProposeHopPlan,
            json!({ "mission_id": mission_id, "name": "bad", "input_mapping": { "x": "ghost" } }),
        )
        .unwrap_err();
    assert_eq!(err.kind(), "MAPPING_ERROR");

    let state = ctx.mission_state(&mission_id).unwrap();
    assert!(state.hop_history.is_empty());
    assert!(state.mission.current_hop_id.is_none());
    assert_eq!(ctx.ledger(Some(&mission_id)).unwrap().len(), 2);

    let events = read_audit_log(tmp.path()).unwrap();
    assert!(events.iter().any(|e| e.op == "PROPOSE_HOP_PLAN"
        && e.status == "error"
        && e.error_kind.as_deref() == Some("MAPPING_ERROR")));
}

#[test]
fn test_hop_transactions_audit_their_mission() {
    let (tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = drive_to_executing(&ctx, &mission_id, false);
    ctx.dispatcher()
        .terminate(&TerminationTarget::Hop(hop_id), Termination::Cancelled, "replan")
        .unwrap();

    let events = read_audit_log(tmp.path()).unwrap();
    let hop_ops = [
        "ACCEPT_HOP_PLAN",
        "PROPOSE_HOP_IMPL",
        "ACCEPT_HOP_IMPL",
        "EXECUTE_HOP",
        "CANCEL_HOP",
    ];
    for op in hop_ops {
        let event = events.iter().find(|e| e.op == op).unwrap();
        assert_eq!(event.mission_ref.as_deref(), Some(mission_id.as_str()), "{}", op);
    }
    let proposed = events.iter().find(|e| e.op == "PROPOSE_MISSION").unwrap();
    assert_eq!(proposed.mission_ref.as_deref(), Some(mission_id.as_str()));
}

#[test]
fn test_second_plan_while_hop_live_is_rejected() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    propose_plan(&ctx, &mission_id, false);

    let err = ctx
        .dispatcher()
        .apply_json(
            TransactionType::ProposeHopPlan,
            json!({ "mission_id": mission_id, "name": "again" }),
        )
        .unwrap_err();
    assert_eq!(err.kind(), "ILLEGAL_STATE_TRANSITION");
}

#[test]
fn test_out_of_order_hop_transactions_fail() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = propose_plan(&ctx, &mission_id, false);

    for tx in [
        TransactionType::AcceptHopImpl,
        TransactionType::ExecuteHop,
    ] {
        let err = ctx
            .dispatcher()
            .apply_json(tx, json!({ "hop_id": hop_id }))
            .unwrap_err();
        assert_eq!(err.kind(), "ILLEGAL_STATE_TRANSITION", "{}", tx);
    }
    let err = ctx
        .dispatcher()
        .apply_json(TransactionType::ProposeHopImpl, two_step_chain(&hop_id))
        .unwrap_err();
    assert_eq!(err.kind(), "ILLEGAL_STATE_TRANSITION");
    assert_eq!(
        ctx.hop_snapshot(&hop_id).unwrap().hop.status,
        HopStatus::HopPlanProposed
    );
}

#[test]
fn test_accept_mission_twice_fails() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let err = ctx
        .dispatcher()
        .apply_json(TransactionType::AcceptMission, json!({ "mission_id": mission_id }))
        .unwrap_err();
    assert_eq!(err.kind(), "ILLEGAL_STATE_TRANSITION");
    assert!(err.to_string().contains("IN_PROGRESS"));
}

#[test]
fn test_unknown_entities_are_not_found() {
    let (_tmp, ctx) = test_ctx();
    let err = ctx
        .dispatcher()
        .apply_json(TransactionType::AcceptMission, json!({ "mission_id": "M_nope" }))
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
    let err = ctx
        .dispatcher()
        .apply_json(TransactionType::ExecuteHop, json!({ "hop_id": "H_nope" }))
        .unwrap_err();
    assert_eq!(err.kind(), "NOT_FOUND");
}

#[test]
fn test_malformed_payload_is_invalid_payload() {
    let (_tmp, ctx) = test_ctx();
    let err = ctx
        .dispatcher()
        .apply_json(TransactionType::AcceptMission, json!({ "mission": "M_1" }))
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_PAYLOAD");
}

#[test]
fn test_impl_materializes_intermediates_and_resolves() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = propose_plan(&ctx, &mission_id, false);
    apply(&ctx, TransactionType::AcceptHopPlan, json!({ "hop_id": hop_id }));
    apply(&ctx, TransactionType::ProposeHopImpl, two_step_chain(&hop_id));

    let snapshot = ctx.hop_snapshot(&hop_id).unwrap();
    assert_eq!(snapshot.hop.status, HopStatus::HopImplProposed);
    assert!(!snapshot.hop.is_resolved);
    assert_eq!(snapshot.tool_steps.len(), 2);
    assert_eq!(snapshot.tool_steps[1].index, 1);
    let temp = &snapshot.assets["temp1"];
    assert_eq!(temp.role, AssetRole::Intermediate);
    assert_eq!(temp.status, AssetStatus::Pending);

    apply(&ctx, TransactionType::AcceptHopImpl, json!({ "hop_id": hop_id }));
    let snapshot = ctx.hop_snapshot(&hop_id).unwrap();
    assert_eq!(snapshot.hop.status, HopStatus::HopImplReady);
    assert!(snapshot.hop.is_resolved);
    assert_eq!(snapshot.hop.version, 1);
    assert!(!snapshot.tool_steps.is_empty());
}

#[test]
fn test_rejected_chain_returns_hop_to_impl_started() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = propose_plan(&ctx, &mission_id, false);
    apply(&ctx, TransactionType::AcceptHopPlan, json!({ "hop_id": hop_id }));

    let duplicate = json!({
        "hop_id": hop_id,
        "tool_steps": [
            { "tool_id": "a", "parameter_mapping": { "in": { "type": "asset_field", "state_asset": "x" } },
              "result_mapping": { "r": { "type": "asset_field", "state_asset": "out" } } },
            { "tool_id": "b", "parameter_mapping": { "in": { "type": "asset_field", "state_asset": "x" } },
              "result_mapping": { "r": { "type": "asset_field", "state_asset": "out" } } }
        ]
    });
    let err = ctx
        .dispatcher()
        .apply_json(TransactionType::ProposeHopImpl, duplicate)
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION_ERROR");
    assert!(err.to_string().contains("already written by step 0"));

    let snapshot = ctx.hop_snapshot(&hop_id).unwrap();
    assert_eq!(snapshot.hop.status, HopStatus::HopImplStarted);
    assert!(snapshot.tool_steps.is_empty());
    assert!(!snapshot.assets.contains_key("temp1"));

    // Revision from HOP_IMPL_STARTED is accepted.
    apply(&ctx, TransactionType::ProposeHopImpl, two_step_chain(&hop_id));
    assert_eq!(
        ctx.hop_snapshot(&hop_id).unwrap().hop.status,
        HopStatus::HopImplProposed
    );
}

#[test]
fn test_accept_revalidates_persisted_steps() {
    let tmp = tempdir().unwrap();
    let mut lenient = EngineConfig::default();
    lenient.validation.duplicate_result_targets = DuplicateTargetPolicy::LastWriteWins;
    let loose = EngineContext::open(Store::at(tmp.path()), lenient).unwrap();

    let mission_id = active_mission(&loose);
    let hop_id = propose_plan(&loose, &mission_id, false);
    apply(&loose, TransactionType::AcceptHopPlan, json!({ "hop_id": hop_id }));
    apply(
        &loose,
        TransactionType::ProposeHopImpl,
        json!({
            "hop_id": hop_id,
            "tool_steps": [
                { "tool_id": "a", "result_mapping": { "r": { "type": "asset_field", "state_asset": "out" } } },
                { "tool_id": "b", "result_mapping": { "r": { "type": "asset_field", "state_asset": "out" } } }
            ]
        }),
    );

    let strict = EngineContext::open(Store::at(tmp.path()), EngineConfig::default()).unwrap();
    let err = strict
        .dispatcher()
        .apply_json(TransactionType::AcceptHopImpl, json!({ "hop_id": hop_id }))
        .unwrap_err();
    assert_eq!(err.kind(), "VALIDATION_ERROR");

    let hop = strict.hop_snapshot(&hop_id).unwrap().hop;
    assert_eq!(hop.status, HopStatus::HopImplStarted);
    assert!(!hop.is_resolved);
}

#[test]
fn test_impl_requires_hop_state() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = apply(
        &ctx,
        TransactionType::ProposeHopPlan,
        json!({ "mission_id": mission_id, "name": "empty" }),
    );
    apply(&ctx, TransactionType::AcceptHopPlan, json!({ "hop_id": hop_id }));

    let err = ctx
        .dispatcher()
        .apply_json(TransactionType::ProposeHopImpl, two_step_chain(&hop_id))
        .unwrap_err();
    assert_eq!(err.kind(), "ILLEGAL_STATE_TRANSITION");
    assert_eq!(
        ctx.hop_snapshot(&hop_id).unwrap().hop.status,
        HopStatus::HopPlanReady
    );
}

#[test]
fn test_impl_requires_copied_inputs_not_just_outputs() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = apply(
        &ctx,
        TransactionType::ProposeHopPlan,
        json!({ "mission_id": mission_id, "name": "outputs only", "output_mapping": { "out": "report" } }),
    );
    apply(&ctx, TransactionType::AcceptHopPlan, json!({ "hop_id": hop_id }));
    assert!(ctx.hop_snapshot(&hop_id).unwrap().assets.contains_key("out"));

    let err = ctx
        .dispatcher()
        .apply_json(TransactionType::ProposeHopImpl, two_step_chain(&hop_id))
        .unwrap_err();
    assert_eq!(err.kind(), "ILLEGAL_STATE_TRANSITION");
    let snapshot = ctx.hop_snapshot(&hop_id).unwrap();
    assert_eq!(snapshot.hop.status, HopStatus::HopPlanReady);
    assert!(snapshot.tool_steps.is_empty());
}

#[test]
fn test_duplicate_step_ids_are_invalid_payload() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = propose_plan(&ctx, &mission_id, false);
    apply(&ctx, TransactionType::AcceptHopPlan, json!({ "hop_id": hop_id }));

    let mut chain = two_step_chain(&hop_id);
    chain["tool_steps"][0]["id"] = json!("TS_same");
    chain["tool_steps"][1]["id"] = json!("TS_same");
    let err = ctx
        .dispatcher()
        .apply_json(TransactionType::ProposeHopImpl, chain)
        .unwrap_err();
    assert_eq!(err.kind(), "INVALID_PAYLOAD");
    assert!(err.to_string().contains("TS_same"));
    let snapshot = ctx.hop_snapshot(&hop_id).unwrap();
    assert_eq!(snapshot.hop.status, HopStatus::HopPlanReady);
    assert!(snapshot.tool_steps.is_empty());

    let mut chain = two_step_chain(&hop_id);
    chain["tool_steps"][0]["id"] = json!("TS_first");
    chain["tool_steps"][1]["id"] = json!("TS_second");
    apply(&ctx, TransactionType::ProposeHopImpl, chain);
    let ids: Vec<String> = ctx
        .hop_snapshot(&hop_id)
        .unwrap()
        .tool_steps
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec!["TS_first".to_string(), "TS_second".to_string()]);
}

#[test]
fn test_scenario_d_final_hop_completes_mission() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = drive_to_executing(&ctx, &mission_id, true);

    let result = ctx
        .dispatcher()
        .apply_json(
            TransactionType::CompleteHop,
            json!({ "hop_id": hop_id, "outputs": { "out": "final report", "temp1": "draft" } }),
        )
        .unwrap();
    assert_eq!(result.status, "COMPLETED");

    let state = ctx.mission_state(&mission_id).unwrap();
    assert_eq!(state.mission.status, MissionStatus::Completed);
    assert!(state.mission.current_hop_id.is_none());

    let report = ctx
        .assets(&AssetScope::mission(&mission_id))
        .unwrap()
        .into_iter()
        .find(|a| a.id == "report")
        .unwrap();
    assert_eq!(report.status, AssetStatus::Ready);
    assert_eq!(report.value, json!("final report"));
    assert_eq!(report.metadata["promoted_from_hop"], json!(hop_id));

    let snapshot = ctx.hop_snapshot(&hop_id).unwrap();
    assert!(snapshot
        .tool_steps
        .iter()
        .all(|s| s.status.as_str() == "COMPLETED"));
    // Intermediates stay hop-local.
    assert!(ctx
        .assets(&AssetScope::mission(&mission_id))
        .unwrap()
        .iter()
        .all(|a| a.id != "temp1"));
}

#[test]
fn test_scenario_e_non_final_hop_clears_and_allows_next_plan() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = drive_to_executing(&ctx, &mission_id, false);
    apply(
        &ctx,
        TransactionType::CompleteHop,
        json!({ "hop_id": hop_id, "outputs": { "out": "part one" } }),
    );

    let state = ctx.mission_state(&mission_id).unwrap();
    assert_eq!(state.mission.status, MissionStatus::InProgress);
    assert!(state.mission.current_hop_id.is_none());
    assert_coordination(&ctx, &mission_id);

    let next = propose_plan(&ctx, &mission_id, true);
    let snapshot = ctx.hop_snapshot(&next).unwrap();
    assert_eq!(snapshot.hop.sequence_order, 1);
    let history = ctx.mission_state(&mission_id).unwrap().hop_history;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, HopStatus::Completed);
}

#[test]
fn test_earlier_output_used_as_input_is_not_written_back() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let first = drive_to_executing(&ctx, &mission_id, false);
    apply(
        &ctx,
        TransactionType::CompleteHop,
        json!({ "hop_id": first, "outputs": { "out": "part one" } }),
    );

    // Local key "A" collides with the mission input of the same name.
    let second = apply(
        &ctx,
        TransactionType::ProposeHopPlan,
        json!({
            "mission_id": mission_id,
            "name": "polish",
            "is_final": true,
            "input_mapping": { "A": "report" },
            "output_mapping": { "out2": "final" }
        }),
    );
    let snapshot = ctx.hop_snapshot(&second).unwrap();
    assert_eq!(snapshot.assets["A"].role, AssetRole::Output);

    apply(&ctx, TransactionType::AcceptHopPlan, json!({ "hop_id": second }));
    apply(
        &ctx,
        TransactionType::ProposeHopImpl,
        json!({
            "hop_id": second,
            "tool_steps": [{
                "tool_id": "polish",
                "parameter_mapping": { "text": { "type": "asset_field", "state_asset": "A" } },
                "result_mapping": { "doc": { "type": "asset_field", "state_asset": "out2" } }
            }]
        }),
    );
    apply(&ctx, TransactionType::AcceptHopImpl, json!({ "hop_id": second }));
    apply(&ctx, TransactionType::ExecuteHop, json!({ "hop_id": second }));
    let result = ctx
        .dispatcher()
        .apply_json(
            TransactionType::CompleteHop,
            json!({ "hop_id": second, "outputs": { "out2": "polished" } }),
        )
        .unwrap();
    assert!(result.message.contains("1 output(s) promoted, 0 skipped"));

    let assets = ctx.assets(&AssetScope::mission(&mission_id)).unwrap();
    let input = assets.iter().find(|a| a.id == "A").unwrap();
    assert_eq!(input.value, json!("alpha"));
    assert_eq!(input.role, AssetRole::Input);
    assert!(!input.metadata.contains_key("promoted_from_hop"));
    let report = assets.iter().find(|a| a.id == "report").unwrap();
    assert_eq!(report.value, json!("part one"));
    assert_eq!(report.metadata["promoted_from_hop"], json!(first));
    let done = assets.iter().find(|a| a.id == "final").unwrap();
    assert_eq!(done.value, json!("polished"));
}

#[test]
fn test_unready_output_is_skipped_on_promotion() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = drive_to_executing(&ctx, &mission_id, false);
    let result = ctx
        .dispatcher()
        .apply_json(TransactionType::CompleteHop, json!({ "hop_id": hop_id }))
        .unwrap();
    assert!(result.message.contains("0 output(s) promoted, 1 skipped"));

    let report = ctx
        .assets(&AssetScope::mission(&mission_id))
        .unwrap()
        .into_iter()
        .find(|a| a.id == "report")
        .unwrap();
    assert_eq!(report.status, AssetStatus::Pending);
}

#[test]
fn test_complete_mission_cancels_live_hop() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = drive_to_executing(&ctx, &mission_id, false);

    apply(&ctx, TransactionType::CompleteMission, json!({ "mission_id": mission_id }));
    let state = ctx.mission_state(&mission_id).unwrap();
    assert_eq!(state.mission.status, MissionStatus::Completed);
    assert!(state.mission.current_hop_id.is_none());

    let snapshot = ctx.hop_snapshot(&hop_id).unwrap();
    assert_eq!(snapshot.hop.status, HopStatus::Cancelled);
    assert!(snapshot
        .tool_steps
        .iter()
        .all(|s| s.status.as_str() == "CANCELLED"));
}

#[test]
fn test_terminate_hop_frees_mission() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = propose_plan(&ctx, &mission_id, false);

    let result = ctx
        .dispatcher()
        .terminate(&TerminationTarget::Hop(hop_id.clone()), Termination::Failed, "tool outage")
        .unwrap();
    assert_eq!(result.tx_type, "FAIL_HOP");
    assert_eq!(result.status, "FAILED");

    let state = ctx.mission_state(&mission_id).unwrap();
    assert_eq!(state.mission.status, MissionStatus::InProgress);
    assert!(state.mission.current_hop_id.is_none());
    propose_plan(&ctx, &mission_id, false);

    let err = ctx
        .dispatcher()
        .terminate(&TerminationTarget::Hop(hop_id), Termination::Cancelled, "again")
        .unwrap_err();
    assert_eq!(err.kind(), "ILLEGAL_STATE_TRANSITION");
}

#[test]
fn test_cancel_mission_cancels_current_hop() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = propose_plan(&ctx, &mission_id, false);

    ctx.dispatcher()
        .terminate(
            &TerminationTarget::Mission(mission_id.clone()),
            Termination::Cancelled,
            "deprioritized",
        )
        .unwrap();
    let state = ctx.mission_state(&mission_id).unwrap();
    assert_eq!(state.mission.status, MissionStatus::Cancelled);
    assert!(state.mission.current_hop_id.is_none());
    assert_eq!(ctx.hop_snapshot(&hop_id).unwrap().hop.status, HopStatus::Cancelled);
    assert_coordination(&ctx, &mission_id);
}

#[test]
fn test_complete_hop_if_finished_is_noop_without_completed_hop() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    assert!(ctx
        .dispatcher()
        .complete_hop_if_finished(&mission_id)
        .unwrap()
        .is_none());
    propose_plan(&ctx, &mission_id, false);
    assert!(ctx
        .dispatcher()
        .complete_hop_if_finished(&mission_id)
        .unwrap()
        .is_none());
}

#[test]
fn test_ledger_records_every_applied_transaction() {
    let (_tmp, ctx) = test_ctx();
    let mission_id = active_mission(&ctx);
    let hop_id = drive_to_executing(&ctx, &mission_id, true);
    apply(
        &ctx,
        TransactionType::CompleteHop,
        json!({ "hop_id": hop_id, "outputs": { "out": "done" } }),
    );

    let ledger = ctx.ledger(Some(&mission_id)).unwrap();
    let types: Vec<&str> = ledger.iter().map(|e| e.tx_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "PROPOSE_MISSION",
            "ACCEPT_MISSION",
            "PROPOSE_HOP_PLAN",
            "ACCEPT_HOP_PLAN",
            "PROPOSE_HOP_IMPL",
            "ACCEPT_HOP_IMPL",
            "EXECUTE_HOP",
            "COMPLETE_HOP",
        ]
    );
    assert!(ledger.iter().all(|e| e.payload_hash.len() == 64));
    assert!(ledger.iter().all(|e| e.id.starts_with("TX_")));
}
