use super::atomic::{read_json_if_exists, write_json};
use super::ProjectStore;
use crate::error::Result;
use crate::types::{SessionId, SessionState, SessionStatus};
use std::fs;

impl ProjectStore {
    /// Allocate the next session id, one past the highest existing.
    /// Only the supervisor allocates, single-threaded, so no lock.
    pub fn next_session_id(&self) -> Result<SessionId> {
        let dir = self.layout().sessions_dir();
        if !dir.is_dir() {
            return Ok(SessionId::from_index(1));
        }

        let mut highest = 0;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(index) = SessionId::new(name).index() {
                highest = highest.max(index);
            }
        }
        Ok(SessionId::from_index(highest + 1))
    }

    pub fn write_session_status(&self, status: &SessionStatus) -> Result<()> {
        let path = self.layout().session_status_path(&status.session_id);
        write_json(&path, status)
    }

    pub fn read_session_status(&self, id: &SessionId) -> Result<Option<SessionStatus>> {
        read_json_if_exists(&self.layout().session_status_path(id))
    }

    pub fn set_session_state(&self, id: &SessionId, state: SessionState) -> Result<()> {
        let mut status = self
            .read_session_status(id)?
            .unwrap_or_else(|| SessionStatus::starting(id.clone()));
        status.set_state(state);
        self.write_session_status(&status)
    }

    /// Write the shared context document into a session's directory.
    pub fn write_session_context<T: serde::Serialize>(
        &self,
        id: &SessionId,
        context: &T,
    ) -> Result<()> {
        write_json(&self.layout().session_context_path(id), context)
    }

    /// Sentinel sessions carry a marker file so the coordination
    /// service can refuse mutating verbs without any shared state.
    pub fn mark_session_read_only(&self, id: &SessionId) -> Result<()> {
        let dir = self.layout().session_dir(id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("read-only"), b"")?;
        Ok(())
    }

    #[must_use]
    pub fn session_is_read_only(&self, id: &SessionId) -> bool {
        self.layout().session_dir(id).join("read-only").exists()
    }

    pub fn list_session_statuses(&self) -> Result<Vec<SessionStatus>> {
        let dir = self.layout().sessions_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut statuses = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let id = SessionId::new(name);
            if let Some(status) = self.read_session_status(&id)? {
                statuses.push(status);
            }
        }
        statuses.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::ProjectStore;
    use crate::types::{RunState, SessionId, SessionState, SessionStatus};

    fn store() -> (tempfile::TempDir, ProjectStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = RunState::new("feature", "branch", "abc", 5, 3);
        let store = ProjectStore::init(dir.path(), &state).expect("init");
        (dir, store)
    }

    #[test]
    fn session_ids_are_monotone_across_allocations() {
        let (_dir, store) = store();
        let first = store.next_session_id().expect("first");
        assert_eq!(first.value(), "session-001");

        store
            .write_session_status(&SessionStatus::starting(first))
            .expect("write");
        let second = store.next_session_id().expect("second");
        assert_eq!(second.value(), "session-002");
    }

    #[test]
    fn status_round_trips_and_unknown_sessions_read_as_none() {
        let (_dir, store) = store();
        let id = SessionId::from_index(1);
        assert!(store.read_session_status(&id).expect("read").is_none());

        store
            .write_session_status(&SessionStatus::starting(id.clone()))
            .expect("write");
        store
            .set_session_state(&id, SessionState::Working)
            .expect("set");

        let status = store
            .read_session_status(&id)
            .expect("read")
            .expect("present");
        assert_eq!(status.state, SessionState::Working);
    }

    #[test]
    fn read_only_marker_round_trips() {
        let (_dir, store) = store();
        let id = SessionId::from_index(5);
        assert!(!store.session_is_read_only(&id));
        store.mark_session_read_only(&id).expect("mark");
        assert!(store.session_is_read_only(&id));
    }

    #[test]
    fn listing_orders_by_session_id() {
        let (_dir, store) = store();
        for index in [2, 1, 3] {
            store
                .write_session_status(&SessionStatus::starting(SessionId::from_index(index)))
                .expect("write");
        }
        let statuses = store.list_session_statuses().expect("list");
        assert_eq!(
            statuses
                .iter()
                .map(|s| s.session_id.value())
                .collect::<Vec<_>>(),
            vec!["session-001", "session-002", "session-003"]
        );
    }
}
