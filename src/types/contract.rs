use super::identifiers::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    ApiEndpoint,
    TypeDefinition,
    EventSchema,
    DatabaseSchema,
}

impl ContractType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiEndpoint => "api_endpoint",
            Self::TypeDefinition => "type_definition",
            Self::EventSchema => "event_schema",
            Self::DatabaseSchema => "database_schema",
        }
    }
}

impl TryFrom<&str> for ContractType {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "api_endpoint" => Ok(Self::ApiEndpoint),
            "type_definition" => Ok(Self::TypeDefinition),
            "event_schema" => Ok(Self::EventSchema),
            "database_schema" => Ok(Self::DatabaseSchema),
            _ => Err(format!("Unknown contract type: {}", s)),
        }
    }
}

/// Shared interface registered by one task so others can build against
/// it. Unique by id; re-registration overwrites (last writer wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: String,
    pub contract_type: ContractType,
    pub specification: String,
    pub owning_task: Option<TaskId>,
    pub registered_at: DateTime<Utc>,
}

impl Contract {
    #[must_use]
    pub fn new(
        contract_id: impl Into<String>,
        contract_type: ContractType,
        specification: impl Into<String>,
        owning_task: Option<TaskId>,
    ) -> Self {
        Self {
            contract_id: contract_id.into(),
            contract_type,
            specification: specification.into(),
            owning_task,
            registered_at: Utc::now(),
        }
    }
}
