use super::identifiers::{SessionId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Working,
    Idle,
    Pausing,
    Paused,
    Done,
    Failed,
}

impl SessionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Working => "working",
            Self::Idle => "idle",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// A session in a terminal state no longer counts toward the
    /// active set used for orphan detection.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for SessionState {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "starting" => Ok(Self::Starting),
            "working" => Ok(Self::Working),
            "idle" => Ok(Self::Idle),
            "pausing" => Ok(Self::Pausing),
            "paused" => Ok(Self::Paused),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown session state: {}", s)),
        }
    }
}

/// Per-worker status record under `sessions/<id>/status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub state: SessionState,
    pub current_task: Option<TaskId>,
    pub completed_tasks: Vec<TaskId>,
    pub progress_note: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionStatus {
    #[must_use]
    pub fn starting(session_id: SessionId) -> Self {
        Self {
            session_id,
            state: SessionState::Starting,
            current_task: None,
            completed_tasks: Vec::new(),
            progress_note: None,
            updated_at: Utc::now(),
        }
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}
