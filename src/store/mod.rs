//! Filesystem-backed repository for every durable entity. Records are
//! one JSON file each so concurrent writers lock at record granularity;
//! publication is always write-temp-then-rename.

mod atomic;
mod contracts;
mod decisions;
mod known_issues;
mod lock;
mod messages;
mod paths;
mod sessions;
mod tasks;

pub use lock::RecordLock;
pub use paths::{sanitize_file_stem, Layout, DOT_DIR};
pub use tasks::{ClaimOutcome, ClaimRejection};

use crate::error::{ForemanError, Result};
use crate::types::RunState;
use std::fs;
use std::path::{Path, PathBuf};

/// Handle on one project's durable state.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    project_dir: PathBuf,
    layout: Layout,
}

impl ProjectStore {
    /// Create a fresh store and RunState. Fails with `EXISTS` semantics
    /// if the project already has a run; resuming callers use `load`.
    pub fn init(project_dir: &Path, state: &RunState) -> Result<Self> {
        let layout = Layout::new(project_dir);
        if layout.state_path().exists() {
            return Err(ForemanError::Conflict(format!(
                "run already initialized at {} (use resume)",
                layout.root().display()
            )));
        }

        for dir in [
            layout.root().to_path_buf(),
            layout.tasks_dir(),
            layout.sessions_dir(),
            layout.messages_dir(),
            layout.contracts_dir(),
            layout.flow_dir(),
            layout.logs_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }

        let store = Self {
            project_dir: project_dir.to_path_buf(),
            layout,
        };
        store.save_state(state)?;
        Ok(store)
    }

    /// Open an existing store. Fails if the project was never started.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let layout = Layout::new(project_dir);
        if !layout.state_path().exists() {
            return Err(ForemanError::NotFound(format!(
                "no run found at {}",
                layout.root().display()
            )));
        }
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            layout,
        })
    }

    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn read_state(&self) -> Result<RunState> {
        atomic::read_json(&self.layout.state_path())
    }

    /// Persist RunState. Failure here is fatal by contract; callers
    /// must propagate, never swallow.
    pub fn save_state(&self, state: &RunState) -> Result<()> {
        atomic::write_json(&self.layout.state_path(), state)
    }

    /// Persist the plan text for a cycle.
    pub fn save_plan(&self, version: u32, text: &str) -> Result<()> {
        atomic::write_atomic(&self.layout.plan_path(version), text)
    }

    pub fn read_plan(&self, version: u32) -> Result<Option<String>> {
        let path = self.layout.plan_path(version);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }

    /// True iff the user dropped a pause signal.
    #[must_use]
    pub fn pause_signal_present(&self) -> bool {
        self.layout.pause_signal_path().exists()
    }

    pub fn write_pause_signal(&self) -> Result<()> {
        fs::create_dir_all(self.layout.root())?;
        fs::write(self.layout.pause_signal_path(), b"pause\n")?;
        Ok(())
    }

    /// Consume the pause signal. Removal is durable, so a crash between
    /// read and removal re-pauses at restart, which is the safe side.
    pub fn consume_pause_signal(&self) -> Result<bool> {
        let path = self.layout.pause_signal_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn write_escalation(&self, record: &serde_json::Value) -> Result<()> {
        atomic::write_json(&self.layout.escalation_path(), record)
    }

    pub fn read_escalation(&self) -> Result<Option<serde_json::Value>> {
        atomic::read_json_if_exists(&self.layout.escalation_path())
    }

    pub fn clear_escalation(&self) -> Result<()> {
        let path = self.layout.escalation_path();
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn read_conventions(&self) -> Result<Option<serde_json::Value>> {
        atomic::read_json_if_exists(&self.layout.conventions_path())
    }

    pub fn save_conventions(&self, conventions: &serde_json::Value) -> Result<()> {
        atomic::write_json(&self.layout.conventions_path(), conventions)
    }

    /// Persist a cycle's flow-tracing report.
    pub fn save_flow_report(&self, report: &crate::types::FlowReport) -> Result<()> {
        atomic::write_json(&self.layout.flow_report_path(report.cycle), report)
    }

    pub fn read_flow_report(&self, cycle: u32) -> Result<Option<crate::types::FlowReport>> {
        atomic::read_json_if_exists(&self.layout.flow_report_path(cycle))
    }

    /// Append one timestamped line to the engine log. Best-effort
    /// observability, never load-bearing.
    pub fn append_engine_log(&self, line: &str) -> Result<()> {
        use std::io::Write;
        let path = self.layout.engine_log_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{} {line}", chrono::Utc::now().to_rfc3339())?;
        Ok(())
    }

    /// Last `count` lines of the engine log.
    pub fn tail_engine_log(&self, count: usize) -> Result<Vec<String>> {
        let path = self.layout.engine_log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(path)?;
        let lines: Vec<String> = contents.lines().map(str::to_string).collect();
        let skip = lines.len().saturating_sub(count);
        Ok(lines.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::ProjectStore;
    use crate::error::ForemanError;
    use crate::types::{RunState, RunStatus};

    fn fresh_state() -> RunState {
        RunState::new("add auth", "feature/auth", "abc123", 5, 3)
    }

    #[test]
    fn init_creates_the_skeleton_and_rejects_reinit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProjectStore::init(dir.path(), &fresh_state()).expect("init");

        assert!(store.layout().tasks_dir().is_dir());
        assert!(store.layout().messages_dir().is_dir());
        assert!(store.layout().state_path().is_file());

        let again = ProjectStore::init(dir.path(), &fresh_state());
        assert!(matches!(again, Err(ForemanError::Conflict(_))));
    }

    #[test]
    fn load_requires_a_prior_init() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            ProjectStore::load(dir.path()),
            Err(ForemanError::NotFound(_))
        ));

        ProjectStore::init(dir.path(), &fresh_state()).expect("init");
        let store = ProjectStore::load(dir.path()).expect("load");
        let state = store.read_state().expect("state");
        assert_eq!(state.status, RunStatus::Initializing);
        assert_eq!(state.feature, "add auth");
    }

    #[test]
    fn state_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProjectStore::init(dir.path(), &fresh_state()).expect("init");

        let mut state = store.read_state().expect("read");
        state.transition(RunStatus::Planning);
        state.current_cycle = 2;
        store.save_state(&state).expect("save");

        let back = store.read_state().expect("reread");
        assert_eq!(back, state);
    }

    #[test]
    fn pause_signal_consumption_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProjectStore::init(dir.path(), &fresh_state()).expect("init");

        assert!(!store.pause_signal_present());
        store.write_pause_signal().expect("write");
        assert!(store.pause_signal_present());

        assert!(store.consume_pause_signal().expect("first consume"));
        assert!(!store.consume_pause_signal().expect("second consume"));
        assert!(!store.pause_signal_present());
    }

    #[test]
    fn engine_log_tail_returns_the_last_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProjectStore::init(dir.path(), &fresh_state()).expect("init");
        for n in 0..5 {
            store.append_engine_log(&format!("line {n}")).expect("append");
        }
        let tail = store.tail_engine_log(2).expect("tail");
        assert_eq!(tail.len(), 2);
        assert!(tail[0].ends_with("line 3"));
        assert!(tail[1].ends_with("line 4"));
    }

    #[test]
    fn plan_text_round_trips_per_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProjectStore::init(dir.path(), &fresh_state()).expect("init");

        store.save_plan(1, "# Plan v1\n").expect("save");
        assert_eq!(store.read_plan(1).expect("read"), Some("# Plan v1\n".to_string()));
        assert_eq!(store.read_plan(2).expect("read"), None);
    }
}
