use super::identifiers::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the whole run. `paused` is re-entrant; `completed` and
/// `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Initializing,
    Questioning,
    Planning,
    Executing,
    Reviewing,
    FlowTracing,
    Checkpointing,
    Completed,
    Escalated,
    Paused,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Questioning => "questioning",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Reviewing => "reviewing",
            Self::FlowTracing => "flow_tracing",
            Self::Checkpointing => "checkpointing",
            Self::Completed => "completed",
            Self::Escalated => "escalated",
            Self::Paused => "paused",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for RunStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "initializing" => Ok(Self::Initializing),
            "questioning" => Ok(Self::Questioning),
            "planning" => Ok(Self::Planning),
            "executing" => Ok(Self::Executing),
            "reviewing" => Ok(Self::Reviewing),
            "flow_tracing" => Ok(Self::FlowTracing),
            "checkpointing" => Ok(Self::Checkpointing),
            "completed" => Ok(Self::Completed),
            "escalated" => Ok(Self::Escalated),
            "paused" => Ok(Self::Paused),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Snapshot of the external usage budget, normalized to [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub utilization: f64,
    pub resets_at: Option<DateTime<Utc>>,
    pub captured_at: DateTime<Utc>,
}

/// Counters the reviewer driver accumulates across a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerMetrics {
    pub plan_rounds_total: u32,
    pub code_rounds_total: u32,
    pub no_verdicts: u32,
    pub presumed_rate_limits: u32,
}

/// One completed plan/execute/review/checkpoint iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub index: u32,
    pub plan_version: u32,
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub plan_approved: bool,
    pub code_approved: bool,
    pub plan_rounds: u32,
    pub code_rounds: u32,
    pub duration_secs: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_summary: Option<serde_json::Value>,
}

/// The singleton durable state for a project. Every transition writes
/// through to disk; recovery after a crash is load() plus an orphan
/// sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub feature: String,
    pub branch: String,
    pub base_commit: String,
    pub current_cycle: u32,
    pub max_cycles: u32,
    pub concurrency: u32,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resume_after: Option<DateTime<Utc>>,
    pub last_usage: Option<UsageSnapshot>,
    pub reviewer_metrics: ReviewerMetrics,
    pub active_sessions: Vec<SessionId>,
    pub cycle_history: Vec<CycleRecord>,
}

impl RunState {
    #[must_use]
    pub fn new(
        feature: impl Into<String>,
        branch: impl Into<String>,
        base_commit: impl Into<String>,
        max_cycles: u32,
        concurrency: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            feature: feature.into(),
            branch: branch.into(),
            base_commit: base_commit.into(),
            current_cycle: 0,
            max_cycles,
            concurrency,
            status: RunStatus::Initializing,
            created_at: now,
            updated_at: now,
            paused_at: None,
            resume_after: None,
            last_usage: None,
            reviewer_metrics: ReviewerMetrics::default(),
            active_sessions: Vec::new(),
            cycle_history: Vec::new(),
        }
    }

    pub fn transition(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn pause(&mut self, resume_after: Option<DateTime<Utc>>) {
        let now = Utc::now();
        self.status = RunStatus::Paused;
        self.paused_at = Some(now);
        self.resume_after = resume_after.or(Some(now));
        self.updated_at = now;
    }

    pub fn clear_pause(&mut self) {
        self.paused_at = None;
        self.resume_after = None;
        self.updated_at = Utc::now();
    }

    /// `status == paused` iff `paused_at != null` iff `resume_after != null`.
    #[must_use]
    pub fn pause_invariant_holds(&self) -> bool {
        let paused = self.status == RunStatus::Paused;
        paused == self.paused_at.is_some() && paused == self.resume_after.is_some()
    }

    #[must_use]
    pub fn plan_version(&self) -> u32 {
        self.cycle_history
            .last()
            .map_or(1, |record| record.plan_version)
    }
}
