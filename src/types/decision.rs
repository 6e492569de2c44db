use super::identifiers::{SessionId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionCategory {
    Naming,
    Auth,
    DataModel,
    ErrorHandling,
    ApiDesign,
    Testing,
    Performance,
    Other,
}

impl DecisionCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Naming => "naming",
            Self::Auth => "auth",
            Self::DataModel => "data_model",
            Self::ErrorHandling => "error_handling",
            Self::ApiDesign => "api_design",
            Self::Testing => "testing",
            Self::Performance => "performance",
            Self::Other => "other",
        }
    }
}

impl TryFrom<&str> for DecisionCategory {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "naming" => Ok(Self::Naming),
            "auth" => Ok(Self::Auth),
            "data_model" => Ok(Self::DataModel),
            "error_handling" => Ok(Self::ErrorHandling),
            "api_design" => Ok(Self::ApiDesign),
            "testing" => Ok(Self::Testing),
            "performance" => Ok(Self::Performance),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown decision category: {}", s)),
        }
    }
}

/// Recorded architectural choice, append-only, so concurrent workers
/// converge on the same conventions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitecturalDecision {
    pub id: String,
    pub task_id: Option<TaskId>,
    pub session_id: SessionId,
    pub category: DecisionCategory,
    pub decision: String,
    pub rationale: String,
    pub timestamp: DateTime<Utc>,
}

impl ArchitecturalDecision {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        category: DecisionCategory,
        decision: impl Into<String>,
        rationale: impl Into<String>,
        task_id: Option<TaskId>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id,
            session_id,
            category,
            decision: decision.into(),
            rationale: rationale.into(),
            timestamp: Utc::now(),
        }
    }
}
