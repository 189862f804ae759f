//! Engine context: the explicit handle every engine call goes through.
//!
//! Bundles the store location, the DB broker, the loaded configuration and
//! the tool catalog. Nothing in the engine reaches for process-wide state.

use crate::core::broker::DbBroker;
use crate::core::config::{self, EngineConfig};
use crate::core::db;
use crate::core::error::MissionError;
use crate::core::store::Store;
use crate::engine::dispatcher::{self, Dispatcher, ToolStepProposal};
use crate::engine::model::{
    Asset, AssetScope, HopSnapshot, HopStatus, Mission, MissionState, MissionStatus,
};
use crate::engine::repo::{self, LedgerEntry};
use crate::engine::router::{self, CoordinationViolation, NextAction};
use crate::engine::tool_chain::{self, ToolCatalog, ToolChainIssue, ValidationOptions};
use serde::Serialize;
use std::path::Path;

pub const DEFAULT_ACTOR: &str = "missionctl";

#[derive(Debug)]
pub struct EngineContext {
    pub store: Store,
    pub broker: DbBroker,
    pub config: EngineConfig,
    /// Recorded on every broker audit event.
    pub actor: String,
    pub(crate) catalog: ToolCatalog,
}

/// Next action for a mission plus any coordination violations seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteReport {
    pub mission_id: String,
    pub mission_status: MissionStatus,
    pub current_hop_id: Option<String>,
    pub current_hop_status: Option<HopStatus>,
    pub next_action: NextAction,
    pub violations: Vec<CoordinationViolation>,
}

/// Dry-run validation of a candidate tool chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainReport {
    pub hop_id: String,
    pub valid: bool,
    pub issues: Vec<ToolChainIssue>,
    /// Keys that would be materialized as intermediate assets.
    pub placeholders: Vec<String>,
}

impl EngineContext {
    /// Open (and initialize if needed) the engine database under `store`.
    pub fn open(store: Store, config: EngineConfig) -> Result<Self, MissionError> {
        db::initialize_engine_db(&store.root)?;
        let broker = DbBroker::new(&store.root, config.busy_timeout());
        let catalog = config.tool_catalog();
        tracing::debug!(root = %store.root.display(), tools = catalog.len(), "engine context opened");
        Ok(Self {
            store,
            broker,
            config,
            actor: DEFAULT_ACTOR.to_string(),
            catalog,
        })
    }

    /// Open the project rooted at `project_root`, loading its config.
    pub fn open_project(project_root: &Path) -> Result<Self, MissionError> {
        let config = config::load_config(project_root)?;
        Self::open(Store::for_project(project_root), config)
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher::new(self)
    }

    pub fn mission_state(&self, mission_id: &str) -> Result<MissionState, MissionError> {
        self.broker
            .with_conn(&self.actor, Some(mission_id), "mission.show", |conn| {
                repo::load_mission_state(conn, mission_id)
            })
    }

    pub fn list_missions(
        &self,
        status: Option<MissionStatus>,
    ) -> Result<Vec<Mission>, MissionError> {
        self.broker
            .with_conn(&self.actor, None, "mission.list", |conn| {
                repo::list_missions(conn, status)
            })
    }

    pub fn hop_snapshot(&self, hop_id: &str) -> Result<HopSnapshot, MissionError> {
        self.broker.with_conn(&self.actor, None, "hop.show", |conn| {
            repo::load_hop_snapshot(conn, hop_id)
        })
    }

    /// Assets of one scope. An unknown owner is `NotFound`.
    pub fn assets(&self, scope: &AssetScope) -> Result<Vec<Asset>, MissionError> {
        self.broker.with_conn(&self.actor, None, "assets.list", |conn| {
            if !repo::scope_exists(conn, scope)? {
                return Err(MissionError::NotFound(format!("scope {}", scope)));
            }
            repo::list_assets(conn, scope)
        })
    }

    pub fn ledger(&self, mission_id: Option<&str>) -> Result<Vec<LedgerEntry>, MissionError> {
        self.broker
            .with_conn(&self.actor, mission_id, "ledger.list", |conn| {
                repo::list_ledger(conn, mission_id)
            })
    }

    pub fn route(&self, mission_id: &str) -> Result<RouteReport, MissionError> {
        let state = self.mission_state(mission_id)?;
        let hop = state.current_hop.as_ref();
        let violations = router::check_coordination(&state.mission, hop);
        let next_action = router::route(&state.mission, hop);
        Ok(RouteReport {
            mission_id: state.mission.id.clone(),
            mission_status: state.mission.status,
            current_hop_id: hop.map(|h| h.id.clone()),
            current_hop_status: hop.map(|h| h.status),
            next_action,
            violations,
        })
    }

    /// Validate `proposals` against the hop's current state without
    /// persisting anything.
    pub fn validate_chain(
        &self,
        hop_id: &str,
        proposals: Vec<ToolStepProposal>,
    ) -> Result<ChainReport, MissionError> {
        let snapshot = self.hop_snapshot(hop_id)?;
        let steps = dispatcher::steps_from_proposals(hop_id, &proposals)?;
        let outcome = tool_chain::validate_tool_chain(
            &snapshot,
            &steps,
            &self.catalog,
            ValidationOptions::from(&self.config.validation),
        );
        Ok(ChainReport {
            hop_id: hop_id.to_string(),
            valid: outcome.is_valid(),
            placeholders: outcome
                .working
                .placeholders()
                .iter()
                .map(|a| a.id.clone())
                .collect(),
            issues: outcome.issues,
        })
    }
}
