//! Supervisor router: decides the next action for a mission.
//!
//! `route` never mutates. A COMPLETED current hop is reported as
//! `CompleteHopIfFinished`; the dispatcher owns the mutation.

use crate::engine::model::{Hop, HopStatus, Mission, MissionStatus};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NextAction {
    AwaitMissionApproval,
    ProposeHopPlan,
    AwaitHopPlanApproval,
    ProposeHopImplementation,
    AwaitHopImplementationApproval,
    ExecuteHop,
    AwaitToolExecution,
    CompleteHopIfFinished { is_final: bool },
    MissionComplete,
    MissionHalted { status: MissionStatus },
    HandleError { reason: String },
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextAction::AwaitMissionApproval => f.write_str("await mission approval"),
            NextAction::ProposeHopPlan => f.write_str("propose hop plan"),
            NextAction::AwaitHopPlanApproval => f.write_str("await hop plan approval"),
            NextAction::ProposeHopImplementation => f.write_str("propose hop implementation"),
            NextAction::AwaitHopImplementationApproval => {
                f.write_str("await hop implementation approval")
            }
            NextAction::ExecuteHop => f.write_str("execute hop"),
            NextAction::AwaitToolExecution => f.write_str("await tool execution"),
            NextAction::CompleteHopIfFinished { is_final } => {
                write!(f, "complete hop if finished (final: {})", is_final)
            }
            NextAction::MissionComplete => f.write_str("mission complete"),
            NextAction::MissionHalted { status } => write!(f, "mission halted ({})", status),
            NextAction::HandleError { reason } => write!(f, "handle error: {}", reason),
        }
    }
}

/// A breach of the mission/hop coordination invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum CoordinationViolation {
    /// A current hop exists while the mission is not IN_PROGRESS.
    HopOutsideActiveMission {
        mission_id: String,
        mission_status: MissionStatus,
        hop_id: String,
    },
    /// The hop belongs to a different mission.
    ForeignHop {
        mission_id: String,
        hop_id: String,
        hop_mission_id: String,
    },
    /// `current_hop_id` and the hop handed to the router disagree.
    CurrentHopMismatch {
        mission_id: String,
        current_hop_id: Option<String>,
        hop_id: Option<String>,
    },
}

impl fmt::Display for CoordinationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinationViolation::HopOutsideActiveMission {
                mission_id,
                mission_status,
                hop_id,
            } => write!(
                f,
                "mission {} is {} but has current hop {}",
                mission_id, mission_status, hop_id
            ),
            CoordinationViolation::ForeignHop {
                mission_id,
                hop_id,
                hop_mission_id,
            } => write!(
                f,
                "hop {} belongs to mission {}, not {}",
                hop_id, hop_mission_id, mission_id
            ),
            CoordinationViolation::CurrentHopMismatch {
                mission_id,
                current_hop_id,
                hop_id,
            } => write!(
                f,
                "mission {} points at hop {} but hop {} was supplied",
                mission_id,
                current_hop_id.as_deref().unwrap_or("none"),
                hop_id.as_deref().unwrap_or("none")
            ),
        }
    }
}

/// Coordination invariant: a current hop implies an IN_PROGRESS mission,
/// and the hop is the one the mission points at.
pub fn check_coordination(mission: &Mission, hop: Option<&Hop>) -> Vec<CoordinationViolation> {
    let mut violations = Vec::new();
    let hop_id = hop.map(|h| h.id.clone());
    if mission.current_hop_id != hop_id {
        violations.push(CoordinationViolation::CurrentHopMismatch {
            mission_id: mission.id.clone(),
            current_hop_id: mission.current_hop_id.clone(),
            hop_id: hop_id.clone(),
        });
    }
    if let Some(hop) = hop {
        if hop.mission_id != mission.id {
            violations.push(CoordinationViolation::ForeignHop {
                mission_id: mission.id.clone(),
                hop_id: hop.id.clone(),
                hop_mission_id: hop.mission_id.clone(),
            });
        }
        // Terminal missions may still point at a COMPLETED hop awaiting cleanup.
        let allowed = mission.status == MissionStatus::InProgress
            || (mission.status == MissionStatus::Completed && hop.status == HopStatus::Completed);
        if !allowed {
            violations.push(CoordinationViolation::HopOutsideActiveMission {
                mission_id: mission.id.clone(),
                mission_status: mission.status,
                hop_id: hop.id.clone(),
            });
        }
    }
    violations
}

/// Pure routing table over (mission status, hop status, is_final).
pub fn next_action(mission: &Mission, hop: Option<&Hop>) -> NextAction {
    if let Some(hop) = hop
        && hop.mission_id != mission.id
    {
        return NextAction::HandleError {
            reason: format!("hop {} does not belong to mission {}", hop.id, mission.id),
        };
    }

    match (mission.status, hop.map(|h| (h.status, h.is_final))) {
        (MissionStatus::AwaitingApproval, None) => NextAction::AwaitMissionApproval,
        (MissionStatus::AwaitingApproval, Some(_)) => NextAction::HandleError {
            reason: format!("mission {} has a hop before approval", mission.id),
        },
        (MissionStatus::InProgress, None) => NextAction::ProposeHopPlan,
        (MissionStatus::InProgress, Some((status, is_final))) => match status {
            HopStatus::HopPlanStarted => NextAction::ProposeHopPlan,
            HopStatus::HopPlanProposed => NextAction::AwaitHopPlanApproval,
            HopStatus::HopPlanReady | HopStatus::HopImplStarted => {
                NextAction::ProposeHopImplementation
            }
            HopStatus::HopImplProposed => NextAction::AwaitHopImplementationApproval,
            HopStatus::HopImplReady => NextAction::ExecuteHop,
            HopStatus::Executing => NextAction::AwaitToolExecution,
            HopStatus::Completed => NextAction::CompleteHopIfFinished { is_final },
            HopStatus::Failed | HopStatus::Cancelled => NextAction::HandleError {
                reason: format!("current hop is {}", status),
            },
        },
        (MissionStatus::Completed, None)
        | (MissionStatus::Completed, Some((HopStatus::Completed, _))) => {
            NextAction::MissionComplete
        }
        (MissionStatus::Completed, Some((status, _))) => NextAction::HandleError {
            reason: format!("completed mission still has a {} hop", status),
        },
        (status @ (MissionStatus::Failed | MissionStatus::Cancelled), _) => {
            NextAction::MissionHalted { status }
        }
    }
}

/// Route a mission, logging every coordination violation at warn.
pub fn route(mission: &Mission, hop: Option<&Hop>) -> NextAction {
    for violation in check_coordination(mission, hop) {
        tracing::warn!(mission_id = %mission.id, %violation, "coordination invariant violated");
    }
    let action = next_action(mission, hop);
    tracing::debug!(mission_id = %mission.id, %action, "routed");
    action
}
