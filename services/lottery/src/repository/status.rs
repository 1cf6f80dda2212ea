//! Status serialization and deserialization
//!
//! Converts between the lottery status enums and their text column values.

use crate::domain::{ExecutionState, PlanStatus, RoundStatus};

pub fn round_status_to_str(status: RoundStatus) -> &'static str {
    match status {
        RoundStatus::Pending => "pending",
        RoundStatus::Active => "active",
        RoundStatus::Completed => "completed",
    }
}

pub fn round_status_from_str(s: &str) -> Option<RoundStatus> {
    match s {
        "pending" => Some(RoundStatus::Pending),
        "active" => Some(RoundStatus::Active),
        "completed" => Some(RoundStatus::Completed),
        _ => None,
    }
}

pub fn plan_status_to_str(status: PlanStatus) -> &'static str {
    match status {
        PlanStatus::Active => "active",
        PlanStatus::Paused => "paused",
        PlanStatus::Completed => "completed",
        PlanStatus::Cancelled => "cancelled",
    }
}

pub fn plan_status_from_str(s: &str) -> Option<PlanStatus> {
    match s {
        "active" => Some(PlanStatus::Active),
        "paused" => Some(PlanStatus::Paused),
        "completed" => Some(PlanStatus::Completed),
        "cancelled" => Some(PlanStatus::Cancelled),
        _ => None,
    }
}

pub fn execution_state_to_str(state: ExecutionState) -> &'static str {
    match state {
        ExecutionState::Locked => "locked",
        ExecutionState::Applied => "applied",
        ExecutionState::RolledBack => "rolled_back",
    }
}

pub fn execution_state_from_str(s: &str) -> Option<ExecutionState> {
    match s {
        "locked" => Some(ExecutionState::Locked),
        "applied" => Some(ExecutionState::Applied),
        "rolled_back" => Some(ExecutionState::RolledBack),
        _ => None,
    }
}
