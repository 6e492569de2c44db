use crate::types::{SessionId, TaskId};
use std::path::{Path, PathBuf};

/// Project-scoped directory that holds every durable record.
pub const DOT_DIR: &str = ".foreman";

pub const STATE_FILE: &str = "state.json";
pub const TASKS_DIR: &str = "tasks";
pub const SESSIONS_DIR: &str = "sessions";
pub const MESSAGES_DIR: &str = "messages";
pub const CONTRACTS_DIR: &str = "contracts";
pub const DECISIONS_FILE: &str = "decisions.jsonl";
pub const CONVENTIONS_FILE: &str = "conventions.json";
pub const KNOWN_ISSUES_FILE: &str = "known-issues.json";
pub const ESCALATION_FILE: &str = "escalation.json";
pub const PAUSE_SIGNAL_FILE: &str = "pause.signal";
pub const FLOW_DIR: &str = "flow-tracing";
pub const LOGS_DIR: &str = "logs";

/// Resolved layout under `<project>/.foreman/`.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    #[must_use]
    pub fn new(project_dir: &Path) -> Self {
        Self {
            root: project_dir.join(DOT_DIR),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    #[must_use]
    pub fn plan_path(&self, version: u32) -> PathBuf {
        self.root.join(format!("plan-v{version}.md"))
    }

    #[must_use]
    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join(TASKS_DIR)
    }

    #[must_use]
    pub fn task_path(&self, id: &TaskId) -> PathBuf {
        self.tasks_dir().join(format!("{}.json", id.value()))
    }

    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    #[must_use]
    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.sessions_dir().join(id.value())
    }

    #[must_use]
    pub fn session_status_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join("status.json")
    }

    #[must_use]
    pub fn session_context_path(&self, id: &SessionId) -> PathBuf {
        self.session_dir(id).join("context.json")
    }

    #[must_use]
    pub fn messages_dir(&self) -> PathBuf {
        self.root.join(MESSAGES_DIR)
    }

    /// One append-only log per writer keeps messages totally ordered
    /// per sender without any shared lock.
    #[must_use]
    pub fn message_log_path(&self, writer: &str) -> PathBuf {
        self.messages_dir().join(format!("{writer}.jsonl"))
    }

    #[must_use]
    pub fn contracts_dir(&self) -> PathBuf {
        self.root.join(CONTRACTS_DIR)
    }

    #[must_use]
    pub fn contract_path(&self, contract_id: &str) -> PathBuf {
        self.contracts_dir()
            .join(format!("{}.json", sanitize_file_stem(contract_id)))
    }

    #[must_use]
    pub fn decisions_path(&self) -> PathBuf {
        self.root.join(DECISIONS_FILE)
    }

    #[must_use]
    pub fn conventions_path(&self) -> PathBuf {
        self.root.join(CONVENTIONS_FILE)
    }

    #[must_use]
    pub fn known_issues_path(&self) -> PathBuf {
        self.root.join(KNOWN_ISSUES_FILE)
    }

    #[must_use]
    pub fn escalation_path(&self) -> PathBuf {
        self.root.join(ESCALATION_FILE)
    }

    #[must_use]
    pub fn pause_signal_path(&self) -> PathBuf {
        self.root.join(PAUSE_SIGNAL_FILE)
    }

    #[must_use]
    pub fn flow_dir(&self) -> PathBuf {
        self.root.join(FLOW_DIR)
    }

    #[must_use]
    pub fn flow_report_path(&self, cycle: u32) -> PathBuf {
        self.flow_dir().join(format!("report-cycle-{cycle}.json"))
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    #[must_use]
    pub fn engine_log_path(&self) -> PathBuf {
        self.logs_dir().join("engine.log")
    }

    /// Sibling lock file for a record.
    #[must_use]
    pub fn lock_path(record_path: &Path) -> PathBuf {
        let mut name = record_path
            .file_name()
            .map_or_else(|| "record".to_string(), |n| n.to_string_lossy().to_string());
        name.push_str(".lock");
        record_path.with_file_name(name)
    }
}

/// Contract ids are caller-chosen strings like `POST /api/users`;
/// flatten anything path-hostile before using one as a file stem.
#[must_use]
pub fn sanitize_file_stem(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
