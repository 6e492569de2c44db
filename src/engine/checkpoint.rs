//! The checkpoint gate: after review and tracing, decide whether the
//! run continues, completes, escalates, or pauses. First matching row
//! wins; a user-requested pause outranks a budget pause when both are
//! observed in the same cycle.

use crate::types::FlowSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseCause {
    UserRequested,
    Budget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDecision {
    Pause(PauseCause),
    Continue,
    Complete,
    Escalate,
}

/// Everything the gate looks at, snapshotted at checkpoint time.
#[derive(Debug, Clone, Default)]
pub struct CheckpointInput {
    pub user_pause_requested: bool,
    pub budget_wind_down: bool,
    pub flow_summary: Option<FlowSummary>,
    pub code_approved: bool,
    pub remaining_tasks: u32,
    pub failed_tasks: u32,
    pub current_cycle: u32,
    pub max_cycles: u32,
}

#[must_use]
pub fn decide(input: &CheckpointInput) -> CycleDecision {
    if input.user_pause_requested {
        return CycleDecision::Pause(PauseCause::UserRequested);
    }
    if input.budget_wind_down {
        return CycleDecision::Pause(PauseCause::Budget);
    }
    if input
        .flow_summary
        .as_ref()
        .is_some_and(FlowSummary::has_actionable)
    {
        return CycleDecision::Continue;
    }
    if !input.code_approved {
        return CycleDecision::Continue;
    }
    if input.remaining_tasks == 0 && input.failed_tasks == 0 {
        return CycleDecision::Complete;
    }
    if input.current_cycle + 1 >= input.max_cycles {
        return CycleDecision::Escalate;
    }
    if input.remaining_tasks > 0 || input.failed_tasks > 0 {
        return CycleDecision::Continue;
    }
    CycleDecision::Complete
}
