#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

//! Wire shapes for the coordination verbs. One request per line, one
//! envelope per line; the transport that carries the lines is not
//! specified here.

use crate::types::{ContractType, DecisionCategory, MessageType, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One verb invocation from a worker. `session_id` identifies the
/// caller on every request; there is no cross-request state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerbRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(flatten)]
    pub verb: Verb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum Verb {
    ListTasks {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<TaskStatus>,
    },
    ClaimTask {
        task_id: String,
    },
    CompleteTask {
        task_id: String,
        summary: String,
        #[serde(default)]
        files_changed: Vec<String>,
    },
    ReadUpdates {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since: Option<DateTime<Utc>>,
    },
    PostUpdate {
        message_type: MessageType,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    GetSessionStatus {
        session_id: String,
    },
    RegisterContract {
        contract_id: String,
        contract_type: ContractType,
        specification: String,
    },
    GetContracts {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contract_type: Option<ContractType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id_contains: Option<String>,
    },
    RecordDecision {
        category: DecisionCategory,
        decision: String,
        rationale: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },
    GetDecisions {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<DecisionCategory>,
    },
    RunTests {
        #[serde(default)]
        files: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },
}

impl Verb {
    /// Verbs a read-only sentinel session may invoke.
    #[must_use]
    pub fn allowed_read_only(&self) -> bool {
        matches!(
            self,
            Self::ListTasks { .. } | Self::ReadUpdates { .. } | Self::PostUpdate { .. }
        )
    }
}

/// One verb response.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerbEnvelope {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    pub t: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Box<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<Box<VerbError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerbError {
    pub code: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctx: Option<Box<Value>>,
}

impl VerbEnvelope {
    #[must_use]
    pub fn success(rid: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            rid,
            t: Utc::now().timestamp_millis(),
            d: Some(Box::new(data)),
            err: None,
            fix: None,
        }
    }

    #[must_use]
    pub fn error(rid: Option<String>, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            rid,
            t: Utc::now().timestamp_millis(),
            d: None,
            err: Some(Box::new(VerbError {
                code: code.into(),
                msg: msg.into(),
                ctx: None,
            })),
            fix: None,
        }
    }

    #[must_use]
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }

    #[must_use]
    pub fn with_ctx(mut self, ctx: Value) -> Self {
        if let Some(ref mut err) = self.err {
            err.ctx = Some(Box::new(ctx));
        }
        self
    }
}
