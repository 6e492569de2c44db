use super::identifiers::{SessionId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    BackendApi,
    FrontendUi,
    Database,
    Security,
    Testing,
    Infrastructure,
    General,
}

impl TaskType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BackendApi => "backend_api",
            Self::FrontendUi => "frontend_ui",
            Self::Database => "database",
            Self::Security => "security",
            Self::Testing => "testing",
            Self::Infrastructure => "infrastructure",
            Self::General => "general",
        }
    }
}

impl TryFrom<&str> for TaskType {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "backend_api" => Ok(Self::BackendApi),
            "frontend_ui" => Ok(Self::FrontendUi),
            "database" => Ok(Self::Database),
            "security" => Ok(Self::Security),
            "testing" => Ok(Self::Testing),
            "infrastructure" => Ok(Self::Infrastructure),
            "general" => Ok(Self::General),
            _ => Err(format!("Unknown task type: {}", s)),
        }
    }
}

impl Default for TaskType {
    fn default() -> Self {
        Self::General
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl TryFrom<&str> for RiskLevel {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Medium
    }
}

/// Task definition as the planner emits it, before ids and dependency
/// resolution are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDef {
    pub subject: String,
    pub description: String,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub depends_on_subjects: Vec<String>,
    #[serde(default)]
    pub security_requirements: Vec<String>,
    #[serde(default)]
    pub performance_requirements: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
}

/// One unit of work on the shared board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub subject: String,
    pub description: String,
    pub status: TaskStatus,
    pub owner: Option<SessionId>,
    pub depends_on: Vec<TaskId>,
    pub blocks: Vec<TaskId>,
    pub result_summary: Option<String>,
    pub files_changed: Vec<String>,
    pub task_type: TaskType,
    pub security_requirements: Vec<String>,
    pub performance_requirements: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub risk_level: RiskLevel,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    #[must_use]
    pub fn from_def(def: &TaskDef, id: TaskId, depends_on: Vec<TaskId>) -> Self {
        Self {
            id,
            subject: def.subject.clone(),
            description: def.description.clone(),
            status: TaskStatus::Pending,
            owner: None,
            depends_on,
            blocks: Vec::new(),
            result_summary: None,
            files_changed: Vec::new(),
            task_type: def.task_type,
            security_requirements: def.security_requirements.clone(),
            performance_requirements: def.performance_requirements.clone(),
            acceptance_criteria: def.acceptance_criteria.clone(),
            risk_level: def.risk_level,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Owner iff in_progress. Violations are a store bug, never valid data.
    #[must_use]
    pub fn owner_invariant_holds(&self) -> bool {
        (self.status == TaskStatus::InProgress) == self.owner.is_some()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::InProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::{RiskLevel, Task, TaskDef, TaskId, TaskStatus, TaskType};
    use crate::types::SessionId;

    fn def(subject: &str) -> TaskDef {
        TaskDef {
            subject: subject.to_string(),
            description: "do the thing".to_string(),
            task_type: TaskType::BackendApi,
            depends_on_subjects: Vec::new(),
            security_requirements: Vec::new(),
            performance_requirements: Vec::new(),
            acceptance_criteria: vec!["it works".to_string()],
            risk_level: RiskLevel::Low,
        }
    }

    #[test]
    fn status_parsing_handles_valid_and_invalid_values() {
        assert_eq!(TaskStatus::try_from("pending"), Ok(TaskStatus::Pending));
        assert_eq!(
            TaskStatus::try_from("in_progress"),
            Ok(TaskStatus::InProgress)
        );
        assert!(TaskStatus::try_from("bogus").is_err());
        assert_eq!(TaskType::try_from("security"), Ok(TaskType::Security));
        assert!(TaskType::try_from("bogus").is_err());
        assert_eq!(RiskLevel::try_from("high"), Ok(RiskLevel::High));
    }

    #[test]
    fn new_tasks_start_pending_and_unowned() {
        let task = Task::from_def(&def("a"), TaskId::from_index(1), Vec::new());
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.owner.is_none());
        assert!(task.owner_invariant_holds());
        assert!(task.is_open());
    }

    #[test]
    fn owner_invariant_detects_both_violation_directions() {
        let mut task = Task::from_def(&def("a"), TaskId::from_index(1), Vec::new());
        task.status = TaskStatus::InProgress;
        assert!(!task.owner_invariant_holds());

        task.status = TaskStatus::Pending;
        task.owner = Some(SessionId::from_index(1));
        assert!(!task.owner_invariant_holds());
    }

    #[test]
    fn task_serde_round_trips() {
        let task = Task::from_def(&def("a"), TaskId::from_index(3), vec![TaskId::from_index(1)]);
        let json = serde_json::to_string(&task).expect("serialize");
        assert!(json.contains("\"status\":\"pending\""));
        assert!(json.contains("\"task_type\":\"backend_api\""));
        let back: Task = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, task);
    }
}
