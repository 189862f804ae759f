//! Transition dispatcher: the single write entry point of the engine.
//!
//! Each of the nine transaction types re-reads its entity inside one
//! IMMEDIATE SQLite transaction, checks the exact pre-state, mutates, runs
//! the asset scope mapper where needed and writes a ledger row. Any error
//! rolls the whole unit back.
//!
//! The one deliberate partial commit: a tool chain that fails validation
//! still commits the hop's return to HOP_IMPL_STARTED (and its ledger row)
//! before the call reports `ValidationError`, so the proposer can revise.

use crate::core::error::MissionError;
use crate::core::time;
use crate::engine::context::EngineContext;
use crate::engine::lifecycle::{self, HopCompletionEffect};
use crate::engine::model::{
    Asset, AssetRole, AssetSchema, AssetScope, AssetStatus, Hop, HopStatus, Mission,
    MissionStatus, ParameterMapping, ResultMapping, ToolStep, ToolStepStatus,
    is_valid_asset_key,
};
use crate::engine::repo::{self, LedgerEntry};
use crate::engine::scope::{self, PromotionOptions};
use crate::engine::tool_chain::{self, ToolChainIssue, ValidationOptions};
use rusqlite::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    ProposeMission,
    AcceptMission,
    ProposeHopPlan,
    AcceptHopPlan,
    ProposeHopImpl,
    AcceptHopImpl,
    ExecuteHop,
    CompleteHop,
    CompleteMission,
}

impl TransactionType {
    pub const ALL: &'static [TransactionType] = &[
        TransactionType::ProposeMission,
        TransactionType::AcceptMission,
        TransactionType::ProposeHopPlan,
        TransactionType::AcceptHopPlan,
        TransactionType::ProposeHopImpl,
        TransactionType::AcceptHopImpl,
        TransactionType::ExecuteHop,
        TransactionType::CompleteHop,
        TransactionType::CompleteMission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::ProposeMission => "PROPOSE_MISSION",
            TransactionType::AcceptMission => "ACCEPT_MISSION",
            TransactionType::ProposeHopPlan => "PROPOSE_HOP_PLAN",
            TransactionType::AcceptHopPlan => "ACCEPT_HOP_PLAN",
            TransactionType::ProposeHopImpl => "PROPOSE_HOP_IMPL",
            TransactionType::AcceptHopImpl => "ACCEPT_HOP_IMPL",
            TransactionType::ExecuteHop => "EXECUTE_HOP",
            TransactionType::CompleteHop => "COMPLETE_HOP",
            TransactionType::CompleteMission => "COMPLETE_MISSION",
        }
    }

    /// Case-insensitive; `-` is accepted for `_`.
    pub fn parse(raw: &str) -> Result<Self, MissionError> {
        let wanted = raw.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| {
                MissionError::InvalidPayload(format!("unknown transaction type '{}'", raw))
            })
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mission-scope asset declared in a PROPOSE_MISSION payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDeclaration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub schema: AssetSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposeMission {
    pub name: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<AssetDeclaration>,
    #[serde(default)]
    pub outputs: Vec<AssetDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionRef {
    pub mission_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopRef {
    pub hop_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposeHopPlan {
    pub mission_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub input_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub output_mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStepProposal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub tool_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameter_mapping: BTreeMap<String, ParameterMapping>,
    #[serde(default)]
    pub result_mapping: BTreeMap<String, ResultMapping>,
}

impl ToolStepProposal {
    /// Materialize as a PENDING step at `index` of `hop_id`.
    pub fn into_step(self, hop_id: &str, index: usize) -> Result<ToolStep, MissionError> {
        let index = u32::try_from(index).map_err(|_| {
            MissionError::InvalidPayload(format!("tool step index {} is out of range", index))
        })?;
        Ok(ToolStep {
            id: self.id.unwrap_or_else(|| time::new_entity_id("TS")),
            hop_id: hop_id.to_string(),
            tool_id: self.tool_id,
            index,
            description: self.description,
            parameter_mapping: self.parameter_mapping,
            result_mapping: self.result_mapping,
            status: ToolStepStatus::Pending,
        })
    }
}

/// Materialize an ordered proposal list; explicit step ids must be unique.
pub fn steps_from_proposals(
    hop_id: &str,
    proposals: &[ToolStepProposal],
) -> Result<Vec<ToolStep>, MissionError> {
    let mut seen = BTreeSet::new();
    for id in proposals.iter().filter_map(|p| p.id.as_deref()) {
        if !seen.insert(id) {
            return Err(MissionError::InvalidPayload(format!(
                "tool step id '{}' appears more than once",
                id
            )));
        }
    }
    proposals
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, proposal)| proposal.into_step(hop_id, i))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposeHopImpl {
    pub hop_id: String,
    #[serde(default)]
    pub tool_steps: Vec<ToolStepProposal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteHop {
    pub hop_id: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionPayload {
    ProposeMission(ProposeMission),
    AcceptMission(MissionRef),
    ProposeHopPlan(ProposeHopPlan),
    AcceptHopPlan(HopRef),
    ProposeHopImpl(ProposeHopImpl),
    AcceptHopImpl(HopRef),
    ExecuteHop(HopRef),
    CompleteHop(CompleteHop),
    CompleteMission(MissionRef),
}

impl TransactionPayload {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            TransactionPayload::ProposeMission(_) => TransactionType::ProposeMission,
            TransactionPayload::AcceptMission(_) => TransactionType::AcceptMission,
            TransactionPayload::ProposeHopPlan(_) => TransactionType::ProposeHopPlan,
            TransactionPayload::AcceptHopPlan(_) => TransactionType::AcceptHopPlan,
            TransactionPayload::ProposeHopImpl(_) => TransactionType::ProposeHopImpl,
            TransactionPayload::AcceptHopImpl(_) => TransactionType::AcceptHopImpl,
            TransactionPayload::ExecuteHop(_) => TransactionType::ExecuteHop,
            TransactionPayload::CompleteHop(_) => TransactionType::CompleteHop,
            TransactionPayload::CompleteMission(_) => TransactionType::CompleteMission,
        }
    }

    /// Deserialize an untagged JSON object as the payload of `tx_type`.
    pub fn from_json(tx_type: TransactionType, payload: Value) -> Result<Self, MissionError> {
        fn decode<T: serde::de::DeserializeOwned>(
            tx_type: TransactionType,
            payload: Value,
        ) -> Result<T, MissionError> {
            serde_json::from_value(payload)
                .map_err(|e| MissionError::InvalidPayload(format!("{}: {}", tx_type, e)))
        }
        Ok(match tx_type {
            TransactionType::ProposeMission => {
                TransactionPayload::ProposeMission(decode(tx_type, payload)?)
            }
            TransactionType::AcceptMission => {
                TransactionPayload::AcceptMission(decode(tx_type, payload)?)
            }
            TransactionType::ProposeHopPlan => {
                TransactionPayload::ProposeHopPlan(decode(tx_type, payload)?)
            }
            TransactionType::AcceptHopPlan => {
                TransactionPayload::AcceptHopPlan(decode(tx_type, payload)?)
            }
            TransactionType::ProposeHopImpl => {
                TransactionPayload::ProposeHopImpl(decode(tx_type, payload)?)
            }
            TransactionType::AcceptHopImpl => {
                TransactionPayload::AcceptHopImpl(decode(tx_type, payload)?)
            }
            TransactionType::ExecuteHop => TransactionPayload::ExecuteHop(decode(tx_type, payload)?),
            TransactionType::CompleteHop => {
                TransactionPayload::CompleteHop(decode(tx_type, payload)?)
            }
            TransactionType::CompleteMission => {
                TransactionPayload::CompleteMission(decode(tx_type, payload)?)
            }
        })
    }

    /// Mission id named directly by the payload, if any.
    fn mission_ref(&self) -> Option<&str> {
        match self {
            TransactionPayload::AcceptMission(r) | TransactionPayload::CompleteMission(r) => {
                Some(&r.mission_id)
            }
            TransactionPayload::ProposeHopPlan(p) => Some(&p.mission_id),
            _ => None,
        }
    }
}

/// Result of a successfully applied transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub success: bool,
    pub transaction_id: String,
    pub tx_type: String,
    pub entity_id: String,
    pub status: String,
    pub message: String,
}

/// How a terminated hop or mission ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Failed,
    Cancelled,
}

impl Termination {
    fn hop_status(self) -> HopStatus {
        match self {
            Termination::Failed => HopStatus::Failed,
            Termination::Cancelled => HopStatus::Cancelled,
        }
    }

    fn mission_status(self) -> MissionStatus {
        match self {
            Termination::Failed => MissionStatus::Failed,
            Termination::Cancelled => MissionStatus::Cancelled,
        }
    }
}

/// Entity targeted by `Dispatcher::terminate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationTarget {
    Mission(String),
    Hop(String),
}

// What a handler did, before the ledger row is written.
struct Applied {
    mission_id: String,
    entity_id: String,
    status: String,
    message: String,
    rejected: Option<Vec<ToolChainIssue>>,
}

impl Applied {
    fn new(mission_id: &str, entity_id: &str, status: impl fmt::Display, message: String) -> Self {
        Self {
            mission_id: mission_id.to_string(),
            entity_id: entity_id.to_string(),
            status: status.to_string(),
            message,
            rejected: None,
        }
    }
}

fn payload_hash<T: Serialize>(payload: &T) -> Result<String, MissionError> {
    let bytes = serde_json::to_vec(payload)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn require_current(mission: &Mission, hop: &Hop) -> Result<(), MissionError> {
    if mission.current_hop_id.as_deref() != Some(hop.id.as_str()) {
        return Err(MissionError::illegal(
            "hop",
            &hop.id,
            format!("current hop of mission {}", mission.id),
            match &mission.current_hop_id {
                Some(other) => format!("not current (current is {})", other),
                None => "not current (mission has no current hop)".to_string(),
            },
        ));
    }
    Ok(())
}

/// Load a hop plus its mission and check the mission is IN_PROGRESS with
/// this hop current.
fn load_active_hop(tx: &Transaction<'_>, hop_id: &str) -> Result<(Mission, Hop), MissionError> {
    let hop = repo::load_hop(tx, hop_id)?;
    let mission = repo::load_mission(tx, &hop.mission_id)?;
    lifecycle::require_mission_status(&mission, MissionStatus::InProgress)?;
    require_current(&mission, &hop)?;
    Ok((mission, hop))
}

fn declared_asset(
    mission_id: &str,
    decl: &AssetDeclaration,
    role: AssetRole,
) -> Result<Asset, MissionError> {
    let id = decl
        .id
        .clone()
        .unwrap_or_else(|| time::new_entity_id("A"));
    if !is_valid_asset_key(&id) {
        return Err(MissionError::InvalidPayload(format!(
            "asset id '{}' is not a valid asset key",
            id
        )));
    }
    let status = match (role, &decl.value) {
        (AssetRole::Input, Some(_)) => AssetStatus::Ready,
        _ => AssetStatus::Pending,
    };
    Ok(Asset {
        id,
        name: decl.name.clone(),
        schema: decl.schema.clone(),
        status,
        role,
        scope: AssetScope::mission(mission_id),
        value: decl.value.clone().unwrap_or(Value::Null),
        metadata: serde_json::Map::new(),
    })
}

/// Applies transactions against one engine context.
pub struct Dispatcher<'a> {
    ctx: &'a EngineContext,
}

impl<'a> Dispatcher<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    fn validation_options(&self) -> ValidationOptions {
        ValidationOptions::from(&self.ctx.config.validation)
    }

    /// Apply a loosely-typed JSON payload for `tx_type`.
    pub fn apply_json(
        &self,
        tx_type: TransactionType,
        payload: Value,
    ) -> Result<TransactionResult, MissionError> {
        self.apply(TransactionPayload::from_json(tx_type, payload)?)
    }

    pub fn apply(&self, payload: TransactionPayload) -> Result<TransactionResult, MissionError> {
        let tx_type = payload.transaction_type();
        let span = tracing::info_span!("apply", tx = %tx_type);
        let _enter = span.enter();

        let hash = payload_hash(&payload)?;
        let result = self.commit(tx_type.as_str(), payload.mission_ref(), hash, |tx| {
            let applied = match &payload {
                TransactionPayload::ProposeMission(p) => self.propose_mission(tx, p)?,
                TransactionPayload::AcceptMission(r) => self.accept_mission(tx, r)?,
                TransactionPayload::ProposeHopPlan(p) => self.propose_hop_plan(tx, p)?,
                TransactionPayload::AcceptHopPlan(r) => self.accept_hop_plan(tx, r)?,
                TransactionPayload::ProposeHopImpl(p) => self.propose_hop_impl(tx, p)?,
                TransactionPayload::AcceptHopImpl(r) => self.accept_hop_impl(tx, r)?,
                TransactionPayload::ExecuteHop(r) => self.execute_hop(tx, r)?,
                TransactionPayload::CompleteHop(p) => self.complete_hop(tx, p)?,
                TransactionPayload::CompleteMission(r) => self.complete_mission(tx, r)?,
            };
            Ok(Some(applied))
        });

        match &result {
            Ok(_) => {}
            Err(MissionError::ValidationError(issues)) => {
                tracing::warn!(issues = issues.len(), "tool chain rejected");
            }
            Err(e) => tracing::info!(error_kind = e.kind(), error = %e, "transaction failed"),
        }
        result?.ok_or_else(|| MissionError::Corrupt(format!("{} produced no result", tx_type)))
    }

    /// Run `f` in one transaction and ledger what it applied. A rejected
    /// tool chain commits, then surfaces as `ValidationError`.
    fn commit<F>(
        &self,
        label: &str,
        mission_ref: Option<&str>,
        hash: String,
        f: F,
    ) -> Result<Option<TransactionResult>, MissionError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<Option<Applied>, MissionError>,
    {
        let outcome = self
            .ctx
            .broker
            .with_tx_resolved(&self.ctx.actor, mission_ref, label, |tx| {
                let Some(applied) = f(tx)? else {
                    return Ok((None, None));
                };
                let entry = LedgerEntry {
                    id: time::new_entity_id("TX"),
                    tx_type: label.to_string(),
                    mission_id: Some(applied.mission_id.clone()),
                    entity_id: applied.entity_id.clone(),
                    resulting_status: applied.status.clone(),
                    payload_hash: hash,
                    message: applied.message.clone(),
                    created_at: time::now_epoch_z(),
                };
                repo::insert_ledger_entry(tx, &entry)?;
                let mission_id = applied.mission_id.clone();
                Ok((Some((entry.id, applied)), Some(mission_id)))
            })?;

        let Some((transaction_id, applied)) = outcome else {
            return Ok(None);
        };
        if let Some(issues) = applied.rejected {
            return Err(MissionError::ValidationError(issues));
        }
        tracing::info!(
            mission_id = %applied.mission_id,
            entity_id = %applied.entity_id,
            status = %applied.status,
            "transaction applied"
        );
        Ok(Some(TransactionResult {
            success: true,
            transaction_id,
            tx_type: label.to_string(),
            entity_id: applied.entity_id,
            status: applied.status,
            message: applied.message,
        }))
    }

    fn propose_mission(
        &self,
        tx: &Transaction<'_>,
        p: &ProposeMission,
    ) -> Result<Applied, MissionError> {
        if p.name.trim().is_empty() {
            return Err(MissionError::InvalidPayload(
                "mission name must not be empty".to_string(),
            ));
        }
        let now = time::now_epoch_z();
        let mission = Mission {
            id: time::new_entity_id("M"),
            name: p.name.clone(),
            goal: p.goal.clone(),
            success_criteria: p.success_criteria.clone(),
            status: MissionStatus::AwaitingApproval,
            current_hop_id: None,
            created_at: now.clone(),
            updated_at: now,
        };
        repo::insert_mission(tx, &mission)?;

        let mut seen = BTreeSet::new();
        let declared = p
            .inputs
            .iter()
            .map(|d| (d, AssetRole::Input))
            .chain(p.outputs.iter().map(|d| (d, AssetRole::Output)));
        for (decl, role) in declared {
            let asset = declared_asset(&mission.id, decl, role)?;
            if !seen.insert(asset.id.clone()) {
                return Err(MissionError::InvalidPayload(format!(
                    "asset id '{}' is declared twice",
                    asset.id
                )));
            }
            repo::upsert_asset(tx, &asset)?;
        }

        Ok(Applied::new(
            &mission.id,
            &mission.id,
            mission.status,
            format!(
                "mission proposed with {} input(s) and {} output(s)",
                p.inputs.len(),
                p.outputs.len()
            ),
        ))
    }

    fn accept_mission(&self, tx: &Transaction<'_>, r: &MissionRef) -> Result<Applied, MissionError> {
        let mut mission = repo::load_mission(tx, &r.mission_id)?;
        lifecycle::require_mission_status(&mission, MissionStatus::AwaitingApproval)?;
        lifecycle::transition_mission(tx, &mut mission, MissionStatus::InProgress)?;
        Ok(Applied::new(
            &mission.id,
            &mission.id,
            mission.status,
            "mission accepted".to_string(),
        ))
    }

    fn propose_hop_plan(
        &self,
        tx: &Transaction<'_>,
        p: &ProposeHopPlan,
    ) -> Result<Applied, MissionError> {
        let mut mission = repo::load_mission(tx, &p.mission_id)?;
        lifecycle::require_mission_status(&mission, MissionStatus::InProgress)?;
        if let Some(current) = &mission.current_hop_id {
            let hop = repo::load_hop(tx, current)?;
            return Err(MissionError::illegal(
                "mission",
                &mission.id,
                "no current hop",
                format!("current hop {} is {}", hop.id, hop.status),
            ));
        }
        if p.name.trim().is_empty() {
            return Err(MissionError::InvalidPayload(
                "hop name must not be empty".to_string(),
            ));
        }

        let now = time::now_epoch_z();
        let mut hop = Hop {
            id: time::new_entity_id("H"),
            mission_id: mission.id.clone(),
            sequence_order: repo::next_sequence_order(tx, &mission.id)?,
            name: p.name.clone(),
            description: p.description.clone(),
            status: HopStatus::HopPlanStarted,
            is_final: p.is_final,
            is_resolved: false,
            input_mapping: p.input_mapping.clone(),
            output_mapping: p.output_mapping.clone(),
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        };
        repo::insert_hop(tx, &hop)?;
        lifecycle::transition_hop(tx, &mut hop, HopStatus::HopPlanProposed)?;

        mission.current_hop_id = Some(hop.id.clone());
        repo::update_mission(tx, &mut mission)?;

        let copied = scope::copy_to_hop(tx, &mission.id, &hop.id, &hop.input_mapping)?;
        let declared = scope::declare_hop_outputs(tx, &mission.id, &hop.id, &hop.output_mapping)?;

        Ok(Applied::new(
            &mission.id,
            &hop.id,
            hop.status,
            format!(
                "hop {} proposed: {} input(s) copied, {} output(s) declared",
                hop.sequence_order,
                copied.len(),
                declared.len()
            ),
        ))
    }

    fn accept_hop_plan(&self, tx: &Transaction<'_>, r: &HopRef) -> Result<Applied, MissionError> {
        let (mission, mut hop) = load_active_hop(tx, &r.hop_id)?;
        lifecycle::require_hop_status(&hop, &[HopStatus::HopPlanProposed])?;
        lifecycle::transition_hop(tx, &mut hop, HopStatus::HopPlanReady)?;
        Ok(Applied::new(
            &mission.id,
            &hop.id,
            hop.status,
            "hop plan accepted".to_string(),
        ))
    }

    fn propose_hop_impl(
        &self,
        tx: &Transaction<'_>,
        p: &ProposeHopImpl,
    ) -> Result<Applied, MissionError> {
        let (mission, mut hop) = load_active_hop(tx, &p.hop_id)?;
        lifecycle::require_hop_status(&hop, &[HopStatus::HopPlanReady, HopStatus::HopImplStarted])?;
        let copied_inputs = repo::list_assets(tx, &AssetScope::hop(&hop.id))?
            .iter()
            .filter(|a| a.metadata.contains_key(scope::META_COPIED_FROM_MISSION))
            .count();
        if copied_inputs == 0 {
            return Err(MissionError::illegal(
                "hop",
                &hop.id,
                "hop inputs copied from the mission",
                "no copied inputs",
            ));
        }
        let steps = steps_from_proposals(&hop.id, &p.tool_steps)?;
        if hop.status == HopStatus::HopPlanReady {
            lifecycle::transition_hop(tx, &mut hop, HopStatus::HopImplStarted)?;
        }

        let snapshot = repo::load_hop_snapshot(tx, &hop.id)?;
        let outcome = tool_chain::validate_tool_chain(
            &snapshot,
            &steps,
            &self.ctx.catalog,
            self.validation_options(),
        );
        if !outcome.is_valid() {
            let mut applied = Applied::new(
                &mission.id,
                &hop.id,
                hop.status,
                format!(
                    "implementation rejected with {} issue(s)",
                    outcome.issues.len()
                ),
            );
            applied.rejected = Some(outcome.issues);
            return Ok(applied);
        }

        repo::delete_tool_steps(tx, &hop.id)?;
        for step in &steps {
            repo::insert_tool_step(tx, step)?;
        }
        let placeholders = outcome.working.into_placeholders();
        for placeholder in &placeholders {
            repo::upsert_asset(tx, placeholder)?;
        }
        lifecycle::transition_hop(tx, &mut hop, HopStatus::HopImplProposed)?;

        Ok(Applied::new(
            &mission.id,
            &hop.id,
            hop.status,
            format!(
                "{} tool step(s) proposed, {} intermediate asset(s) materialized",
                steps.len(),
                placeholders.len()
            ),
        ))
    }

    fn accept_hop_impl(&self, tx: &Transaction<'_>, r: &HopRef) -> Result<Applied, MissionError> {
        let (mission, mut hop) = load_active_hop(tx, &r.hop_id)?;
        lifecycle::require_hop_status(&hop, &[HopStatus::HopImplProposed])?;

        let snapshot = repo::load_hop_snapshot(tx, &hop.id)?;
        let outcome = tool_chain::validate_tool_chain(
            &snapshot,
            &snapshot.tool_steps,
            &self.ctx.catalog,
            self.validation_options(),
        );
        if !outcome.is_valid() {
            lifecycle::transition_hop(tx, &mut hop, HopStatus::HopImplStarted)?;
            let mut applied = Applied::new(
                &mission.id,
                &hop.id,
                hop.status,
                format!(
                    "implementation failed re-validation with {} issue(s)",
                    outcome.issues.len()
                ),
            );
            applied.rejected = Some(outcome.issues);
            return Ok(applied);
        }

        hop.is_resolved = true;
        hop.version += 1;
        lifecycle::transition_hop(tx, &mut hop, HopStatus::HopImplReady)?;
        Ok(Applied::new(
            &mission.id,
            &hop.id,
            hop.status,
            format!(
                "implementation accepted ({} step(s), version {})",
                snapshot.tool_steps.len(),
                hop.version
            ),
        ))
    }

    fn execute_hop(&self, tx: &Transaction<'_>, r: &HopRef) -> Result<Applied, MissionError> {
        let (mission, mut hop) = load_active_hop(tx, &r.hop_id)?;
        lifecycle::require_hop_status(&hop, &[HopStatus::HopImplReady])?;
        lifecycle::transition_hop(tx, &mut hop, HopStatus::Executing)?;
        Ok(Applied::new(
            &mission.id,
            &hop.id,
            hop.status,
            "hop executing".to_string(),
        ))
    }

    fn complete_hop(&self, tx: &Transaction<'_>, p: &CompleteHop) -> Result<Applied, MissionError> {
        let (mut mission, mut hop) = load_active_hop(tx, &p.hop_id)?;
        lifecycle::require_hop_status(&hop, &[HopStatus::Executing])?;

        scope::record_outputs(tx, &hop, &p.outputs)?;
        repo::set_tool_step_status(
            tx,
            &hop.id,
            &[ToolStepStatus::Pending, ToolStepStatus::Executing],
            ToolStepStatus::Completed,
        )?;
        lifecycle::transition_hop(tx, &mut hop, HopStatus::Completed)?;

        let report = scope::promote_to_mission(
            tx,
            &mission.id,
            &hop.id,
            PromotionOptions {
                promote_unready_outputs: self.ctx.config.promotion.promote_unready_outputs,
            },
        )?;
        let effect = lifecycle::finalize_completed_hop(tx, &mut mission, &hop)?;

        Ok(Applied::new(
            &mission.id,
            &hop.id,
            hop.status,
            format!(
                "hop completed: {} output(s) promoted, {} skipped; {}",
                report.promoted.len(),
                report.skipped.len(),
                describe_effect(effect)
            ),
        ))
    }

    fn complete_mission(
        &self,
        tx: &Transaction<'_>,
        r: &MissionRef,
    ) -> Result<Applied, MissionError> {
        let mut mission = repo::load_mission(tx, &r.mission_id)?;
        lifecycle::require_mission_status(&mission, MissionStatus::InProgress)?;
        let cancelled = lifecycle::release_current_hop(tx, &mut mission)?;
        lifecycle::transition_mission(tx, &mut mission, MissionStatus::Completed)?;
        let message = match cancelled {
            Some(hop_id) => format!("mission completed; live hop {} cancelled", hop_id),
            None => "mission completed".to_string(),
        };
        Ok(Applied::new(&mission.id, &mission.id, mission.status, message))
    }

    /// Apply the mission-side effect of a COMPLETED current hop, if there is
    /// one. Returns `None` when there is nothing to do.
    pub fn complete_hop_if_finished(
        &self,
        mission_id: &str,
    ) -> Result<Option<TransactionResult>, MissionError> {
        let label = "COMPLETE_HOP_IF_FINISHED";
        let hash = payload_hash(&MissionRef {
            mission_id: mission_id.to_string(),
        })?;
        self.commit(label, Some(mission_id), hash, |tx| {
            let mut mission = repo::load_mission(tx, mission_id)?;
            let Some(hop_id) = mission.current_hop_id.clone() else {
                return Ok(None);
            };
            let hop = repo::load_hop(tx, &hop_id)?;
            if hop.status != HopStatus::Completed {
                return Ok(None);
            }
            let effect = lifecycle::finalize_completed_hop(tx, &mut mission, &hop)?;
            Ok(Some(Applied::new(
                &mission.id,
                &hop.id,
                mission.status,
                describe_effect(effect).to_string(),
            )))
        })
    }

    /// Fail or cancel a hop or mission. Not one of the nine transaction
    /// types, but ledgered the same way.
    pub fn terminate(
        &self,
        target: &TerminationTarget,
        outcome: Termination,
        reason: &str,
    ) -> Result<TransactionResult, MissionError> {
        let (label, mission_ref) = match (target, outcome) {
            (TerminationTarget::Hop(_), Termination::Failed) => ("FAIL_HOP", None),
            (TerminationTarget::Hop(_), Termination::Cancelled) => ("CANCEL_HOP", None),
            (TerminationTarget::Mission(id), Termination::Failed) => {
                ("FAIL_MISSION", Some(id.as_str()))
            }
            (TerminationTarget::Mission(id), Termination::Cancelled) => {
                ("CANCEL_MISSION", Some(id.as_str()))
            }
        };
        let span = tracing::info_span!("terminate", tx = label);
        let _enter = span.enter();

        let target_id = match target {
            TerminationTarget::Hop(id) | TerminationTarget::Mission(id) => id.as_str(),
        };
        let hash = payload_hash(&serde_json::json!({
            "target": target_id,
            "outcome": outcome,
            "reason": reason,
        }))?;

        let result = self.commit(label, mission_ref, hash, |tx| {
            let applied = match target {
                TerminationTarget::Hop(hop_id) => {
                    let mut hop = repo::load_hop(tx, hop_id)?;
                    let mut mission = repo::load_mission(tx, &hop.mission_id)?;
                    lifecycle::terminate_hop(tx, &mut mission, &mut hop, outcome.hop_status())?;
                    Applied::new(
                        &mission.id,
                        &hop.id,
                        hop.status,
                        format!("hop {}: {}", hop.status, reason),
                    )
                }
                TerminationTarget::Mission(mission_id) => {
                    let mut mission = repo::load_mission(tx, mission_id)?;
                    let cancelled =
                        lifecycle::terminate_mission(tx, &mut mission, outcome.mission_status())?;
                    let mut message = format!("mission {}: {}", mission.status, reason);
                    if let Some(hop_id) = cancelled {
                        message.push_str(&format!(" (live hop {} cancelled)", hop_id));
                    }
                    Applied::new(&mission.id, &mission.id, mission.status, message)
                }
            };
            Ok(Some(applied))
        })?;
        result.ok_or_else(|| MissionError::Corrupt(format!("{} produced no result", label)))
    }
}

fn describe_effect(effect: HopCompletionEffect) -> &'static str {
    match effect {
        HopCompletionEffect::MissionCompleted => "final hop, mission completed",
        HopCompletionEffect::HopCleared => "current hop cleared, mission continues",
    }
}
