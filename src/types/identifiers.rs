use serde::{Deserialize, Serialize};
use std::fmt;

/// Task identifier, zero-padded so lexicographic order equals numeric
/// order (`task-001`, `task-002`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn from_index(index: u32) -> Self {
        Self(format!("task-{index:03}"))
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }

    /// Numeric index, if this id follows the `task-NNN` shape.
    #[must_use]
    pub fn index(&self) -> Option<u32> {
        self.0.strip_prefix("task-").and_then(|n| n.parse().ok())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker session identifier (`session-001`, ...). Monotone within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn from_index(index: u32) -> Self {
        Self(format!("session-{index:03}"))
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn index(&self) -> Option<u32> {
        self.0.strip_prefix("session-").and_then(|n| n.parse().ok())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Writer name used by the engine in message logs and task ownership
/// checks. Workers use their session id.
pub const ENGINE_ACTOR: &str = "engine";

#[cfg(test)]
mod tests {
    use super::{SessionId, TaskId};

    #[test]
    fn task_ids_sort_numerically_because_of_zero_padding() {
        let mut ids = vec![
            TaskId::from_index(10),
            TaskId::from_index(2),
            TaskId::from_index(1),
        ];
        ids.sort();
        assert_eq!(
            ids.iter().map(TaskId::value).collect::<Vec<_>>(),
            vec!["task-001", "task-002", "task-010"]
        );
    }

    #[test]
    fn index_round_trips_and_rejects_foreign_shapes() {
        assert_eq!(TaskId::from_index(7).index(), Some(7));
        assert_eq!(TaskId::new("custom").index(), None);
        assert_eq!(SessionId::from_index(3).value(), "session-003");
        assert_eq!(SessionId::from_index(3).index(), Some(3));
    }
}
