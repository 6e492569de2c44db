use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Status,
    Question,
    Answer,
    Broadcast,
    WindDown,
    TaskCompleted,
    Error,
    Escalation,
}

impl MessageType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Question => "question",
            Self::Answer => "answer",
            Self::Broadcast => "broadcast",
            Self::WindDown => "wind_down",
            Self::TaskCompleted => "task_completed",
            Self::Error => "error",
            Self::Escalation => "escalation",
        }
    }
}

impl TryFrom<&str> for MessageType {
    type Error = String;

    fn try_from(value: &str) -> std::result::Result<Self, String> {
        match value {
            "status" => Ok(Self::Status),
            "question" => Ok(Self::Question),
            "answer" => Ok(Self::Answer),
            "broadcast" => Ok(Self::Broadcast),
            "wind_down" => Ok(Self::WindDown),
            "task_completed" => Ok(Self::TaskCompleted),
            "error" => Ok(Self::Error),
            "escalation" => Ok(Self::Escalation),
            _ => Err(format!("Unknown message type: {}", value)),
        }
    }
}

/// Why a wind-down broadcast was issued. Carried in message metadata so
/// workers can report the cause when they exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindDownReason {
    UsageLimit,
    CycleLimit,
    UserRequested,
}

impl WindDownReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsageLimit => "usage_limit",
            Self::CycleLimit => "cycle_limit",
            Self::UserRequested => "user_requested",
        }
    }
}

impl fmt::Display for WindDownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only event from a session or the engine. `to == None` is a
/// broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub message_type: MessageType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: Option<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to,
            message_type,
            content: content.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Wind-down broadcast with its reason and optional budget reset time.
    #[must_use]
    pub fn wind_down(
        from: impl Into<String>,
        reason: WindDownReason,
        resets_at: Option<DateTime<Utc>>,
    ) -> Self {
        let metadata = match resets_at {
            Some(at) => serde_json::json!({"reason": reason.as_str(), "resets_at": at}),
            None => serde_json::json!({"reason": reason.as_str()}),
        };
        Self::new(from, None, MessageType::WindDown, "wind down and commit").with_metadata(metadata)
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    /// Visible to `session` when addressed to it or broadcast.
    #[must_use]
    pub fn visible_to(&self, session: &str) -> bool {
        self.to.as_deref().map_or(true, |to| to == session)
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, MessageType, WindDownReason};
    use chrono::Utc;

    #[test]
    fn message_type_parsing_round_trips() {
        for message_type in [
            MessageType::Status,
            MessageType::Question,
            MessageType::Answer,
            MessageType::Broadcast,
            MessageType::WindDown,
            MessageType::TaskCompleted,
            MessageType::Error,
            MessageType::Escalation,
        ] {
            assert_eq!(
                MessageType::try_from(message_type.as_str()),
                Ok(message_type)
            );
        }
        assert!(MessageType::try_from("bogus").is_err());
    }

    #[test]
    fn broadcast_visibility_includes_everyone() {
        let message = Message::new("engine", None, MessageType::Broadcast, "hello");
        assert!(message.is_broadcast());
        assert!(message.visible_to("session-001"));
        assert!(message.visible_to("session-002"));
    }

    #[test]
    fn direct_messages_are_only_visible_to_the_recipient() {
        let message = Message::new(
            "session-001",
            Some("session-002".to_string()),
            MessageType::Answer,
            "yes",
        );
        assert!(!message.is_broadcast());
        assert!(message.visible_to("session-002"));
        assert!(!message.visible_to("session-003"));
    }

    #[test]
    fn wind_down_metadata_carries_reason_and_reset_time() {
        let at = Utc::now();
        let message = Message::wind_down("engine", WindDownReason::UsageLimit, Some(at));
        let metadata = message.metadata.expect("metadata");
        assert_eq!(metadata["reason"], "usage_limit");
        assert!(metadata.get("resets_at").is_some());

        let bare = Message::wind_down("engine", WindDownReason::UserRequested, None);
        let metadata = bare.metadata.expect("metadata");
        assert_eq!(metadata["reason"], "user_requested");
        assert!(metadata.get("resets_at").is_none());
    }
}
