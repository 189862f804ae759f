//! Hop and mission lifecycle managers.
//!
//! The legal-transition relation for each entity is a total function over
//! its closed status enum. Every status change in the engine goes through
//! `transition_hop` / `transition_mission`, which refuse anything the table
//! does not allow.

use crate::core::error::MissionError;
use crate::engine::model::{Hop, HopStatus, Mission, MissionStatus, ToolStepStatus};
use crate::engine::repo;
use rusqlite::Connection;

impl MissionStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            MissionStatus::AwaitingApproval | MissionStatus::InProgress => false,
            MissionStatus::Completed | MissionStatus::Failed | MissionStatus::Cancelled => true,
        }
    }

    pub fn can_transition_to(&self, next: MissionStatus) -> bool {
        match self {
            MissionStatus::AwaitingApproval => matches!(
                next,
                MissionStatus::InProgress | MissionStatus::Failed | MissionStatus::Cancelled
            ),
            MissionStatus::InProgress => matches!(
                next,
                MissionStatus::Completed | MissionStatus::Failed | MissionStatus::Cancelled
            ),
            MissionStatus::Completed | MissionStatus::Failed | MissionStatus::Cancelled => false,
        }
    }
}

impl HopStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HopStatus::Completed | HopStatus::Failed | HopStatus::Cancelled
        )
    }

    /// Next status on the linear happy path, if any.
    pub fn happy_path_next(&self) -> Option<HopStatus> {
        match self {
            HopStatus::HopPlanStarted => Some(HopStatus::HopPlanProposed),
            HopStatus::HopPlanProposed => Some(HopStatus::HopPlanReady),
            HopStatus::HopPlanReady => Some(HopStatus::HopImplStarted),
            HopStatus::HopImplStarted => Some(HopStatus::HopImplProposed),
            HopStatus::HopImplProposed => Some(HopStatus::HopImplReady),
            HopStatus::HopImplReady => Some(HopStatus::Executing),
            HopStatus::Executing => Some(HopStatus::Completed),
            HopStatus::Completed | HopStatus::Failed | HopStatus::Cancelled => None,
        }
    }

    pub fn can_transition_to(&self, next: HopStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, HopStatus::Failed | HopStatus::Cancelled) {
            return true;
        }
        // A rejected implementation goes back for revision.
        if *self == HopStatus::HopImplProposed && next == HopStatus::HopImplStarted {
            return true;
        }
        self.happy_path_next() == Some(next)
    }
}

/// Fail with `IllegalStateTransition` unless the mission is exactly `expected`.
pub fn require_mission_status(
    mission: &Mission,
    expected: MissionStatus,
) -> Result<(), MissionError> {
    if mission.status != expected {
        return Err(MissionError::illegal(
            "mission",
            &mission.id,
            expected.as_str(),
            mission.status.as_str(),
        ));
    }
    Ok(())
}

/// Fail with `IllegalStateTransition` unless the hop is one of `expected`.
pub fn require_hop_status(hop: &Hop, expected: &[HopStatus]) -> Result<(), MissionError> {
    if !expected.contains(&hop.status) {
        let expected = expected
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" or ");
        return Err(MissionError::illegal(
            "hop",
            &hop.id,
            expected,
            hop.status.as_str(),
        ));
    }
    Ok(())
}

pub fn transition_mission(
    conn: &Connection,
    mission: &mut Mission,
    next: MissionStatus,
) -> Result<(), MissionError> {
    if !mission.status.can_transition_to(next) {
        return Err(MissionError::illegal(
            "mission",
            &mission.id,
            format!("a status that can move to {}", next),
            mission.status.as_str(),
        ));
    }
    tracing::debug!(mission_id = %mission.id, from = %mission.status, to = %next, "mission transition");
    mission.status = next;
    repo::update_mission(conn, mission)
}

pub fn transition_hop(conn: &Connection, hop: &mut Hop, next: HopStatus) -> Result<(), MissionError> {
    if !hop.status.can_transition_to(next) {
        return Err(MissionError::illegal(
            "hop",
            &hop.id,
            format!("a status that can move to {}", next),
            hop.status.as_str(),
        ));
    }
    tracing::debug!(hop_id = %hop.id, from = %hop.status, to = %next, "hop transition");
    hop.status = next;
    repo::update_hop(conn, hop)
}

/// What finalizing a completed current hop did to its mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopCompletionEffect {
    /// Final hop: the mission moved to COMPLETED.
    MissionCompleted,
    /// Non-final hop: the current-hop slot was cleared, mission stays IN_PROGRESS.
    HopCleared,
}

/// Apply the mission-side consequence of a COMPLETED current hop.
pub fn finalize_completed_hop(
    conn: &Connection,
    mission: &mut Mission,
    hop: &Hop,
) -> Result<HopCompletionEffect, MissionError> {
    require_hop_status(hop, &[HopStatus::Completed])?;
    if mission.current_hop_id.as_deref() != Some(hop.id.as_str()) {
        return Err(MissionError::illegal(
            "mission",
            &mission.id,
            format!("current hop {}", hop.id),
            mission.current_hop_id.as_deref().unwrap_or("no current hop"),
        ));
    }
    require_mission_status(mission, MissionStatus::InProgress)?;

    mission.current_hop_id = None;
    if hop.is_final {
        transition_mission(conn, mission, MissionStatus::Completed)?;
        Ok(HopCompletionEffect::MissionCompleted)
    } else {
        repo::update_mission(conn, mission)?;
        Ok(HopCompletionEffect::HopCleared)
    }
}

/// Move a live hop to FAILED or CANCELLED, cancel its unfinished tool steps
/// and release the mission's current-hop slot if the hop occupies it.
pub fn terminate_hop(
    conn: &Connection,
    mission: &mut Mission,
    hop: &mut Hop,
    outcome: HopStatus,
) -> Result<(), MissionError> {
    if !matches!(outcome, HopStatus::Failed | HopStatus::Cancelled) {
        return Err(MissionError::InvalidPayload(format!(
            "hop termination outcome must be FAILED or CANCELLED, got {}",
            outcome
        )));
    }
    transition_hop(conn, hop, outcome)?;
    repo::set_tool_step_status(
        conn,
        &hop.id,
        &[ToolStepStatus::Pending, ToolStepStatus::Executing],
        ToolStepStatus::Cancelled,
    )?;
    if mission.current_hop_id.as_deref() == Some(hop.id.as_str()) {
        mission.current_hop_id = None;
        repo::update_mission(conn, mission)?;
    }
    Ok(())
}

/// Move a non-terminal mission to FAILED or CANCELLED, cancelling any live
/// current hop in the same unit of work.
pub fn terminate_mission(
    conn: &Connection,
    mission: &mut Mission,
    outcome: MissionStatus,
) -> Result<Option<String>, MissionError> {
    if !matches!(outcome, MissionStatus::Failed | MissionStatus::Cancelled) {
        return Err(MissionError::InvalidPayload(format!(
            "mission termination outcome must be FAILED or CANCELLED, got {}",
            outcome
        )));
    }
    let cancelled_hop = release_current_hop(conn, mission)?;
    transition_mission(conn, mission, outcome)?;
    Ok(cancelled_hop)
}

/// Clear the current-hop slot, cancelling the hop first if it is still live.
/// Returns the id of the hop that was cancelled, if any.
pub fn release_current_hop(
    conn: &Connection,
    mission: &mut Mission,
) -> Result<Option<String>, MissionError> {
    let Some(hop_id) = mission.current_hop_id.clone() else {
        return Ok(None);
    };
    let mut hop = repo::load_hop(conn, &hop_id)?;
    let cancelled = if hop.status.is_terminal() {
        mission.current_hop_id = None;
        repo::update_mission(conn, mission)?;
        None
    } else {
        terminate_hop(conn, mission, &mut hop, HopStatus::Cancelled)?;
        Some(hop_id)
    };
    Ok(cancelled)
}
