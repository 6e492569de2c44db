#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

//! Task records and the claim protocol. Every mutation holds the
//! task's exclusive record lock, rereads from disk inside the lock,
//! and publishes with temp-then-rename, so two processes can never
//! both observe a successful claim of the same task.

use super::atomic::{read_json, write_json};
use super::lock::RecordLock;
use super::ProjectStore;
use crate::error::{ForemanError, Result};
use crate::types::{SessionId, Task, TaskDef, TaskId, TaskStatus};
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// Why a claim was refused. Expected control flow, not an error: two
/// workers racing for the same task is the normal case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimRejection {
    TaskAbsent { task_id: TaskId },
    WrongStatus { current: TaskStatus },
    BlockedOnDependency { dependency: TaskId },
}

impl fmt::Display for ClaimRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskAbsent { task_id } => write!(f, "task {task_id} not found"),
            Self::WrongStatus { current } => write!(f, "not pending (current: {current})"),
            Self::BlockedOnDependency { dependency } => {
                write!(f, "blocked by unresolved dependency {dependency}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(Task),
    Rejected(ClaimRejection),
}

impl ProjectStore {
    /// Write a new task, then append the reverse `blocks` edge under
    /// each dependency's lock so the edge set stays consistent with
    /// concurrent claims of that dependency.
    pub fn create_task(&self, def: &TaskDef, id: TaskId, depends_on: Vec<TaskId>) -> Result<Task> {
        let task = Task::from_def(def, id.clone(), depends_on.clone());
        let path = self.layout().task_path(&id);
        if path.exists() {
            return Err(ForemanError::Conflict(format!(
                "task {id} already exists"
            )));
        }
        write_json(&path, &task)?;

        for dependency in &depends_on {
            self.update_task(dependency, |dep| {
                if !dep.blocks.contains(&id) {
                    dep.blocks.push(id.clone());
                }
            })?;
        }

        debug!(task = %id, deps = depends_on.len(), "task created");
        Ok(task)
    }

    pub fn get_task(&self, id: &TaskId) -> Result<Task> {
        let path = self.layout().task_path(id);
        if !path.exists() {
            return Err(ForemanError::NotFound(format!("task {id}")));
        }
        read_json(&path)
    }

    /// Snapshot of all tasks, deterministically ordered by id.
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let dir = self.layout().tasks_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut tasks = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match read_json::<Task>(&path) {
                    Ok(task) => {
                        if status.is_none_or(|wanted| task.status == wanted) {
                            tasks.push(task);
                        }
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping unreadable task record");
                    }
                }
            }
        }
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    /// Next free task index, one past the highest existing id.
    pub fn next_task_index(&self) -> Result<u32> {
        let highest = self
            .list_tasks(None)?
            .iter()
            .filter_map(|task| task.id.index())
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }

    /// Mutate one task under its exclusive lock: reread from disk,
    /// apply, publish atomically.
    pub fn update_task<F>(&self, id: &TaskId, mutate: F) -> Result<Task>
    where
        F: FnOnce(&mut Task),
    {
        let path = self.layout().task_path(id);
        let _lock = RecordLock::acquire(&path)?;

        if !path.exists() {
            return Err(ForemanError::NotFound(format!("task {id}")));
        }
        let mut task: Task = read_json(&path)?;
        mutate(&mut task);
        write_json(&path, &task)?;
        Ok(task)
    }

    /// Atomic claim. Under the task's lock: reread, require `pending`,
    /// require every dependency `completed` (reread on the same
    /// flight), then mark in_progress and persist before the lock is
    /// released. A rejected claim leaves the record untouched.
    pub fn claim_task(&self, id: &TaskId, session: &SessionId) -> Result<ClaimOutcome> {
        let path = self.layout().task_path(id);
        let _lock = RecordLock::acquire(&path)?;

        if !path.exists() {
            return Ok(ClaimOutcome::Rejected(ClaimRejection::TaskAbsent {
                task_id: id.clone(),
            }));
        }
        let mut task: Task = read_json(&path)?;

        if task.status != TaskStatus::Pending {
            return Ok(ClaimOutcome::Rejected(ClaimRejection::WrongStatus {
                current: task.status,
            }));
        }

        for dependency in &task.depends_on {
            let dep = match self.get_task(dependency) {
                Ok(dep) => dep,
                Err(ForemanError::NotFound(_)) => {
                    return Ok(ClaimOutcome::Rejected(ClaimRejection::BlockedOnDependency {
                        dependency: dependency.clone(),
                    }))
                }
                Err(err) => return Err(err),
            };
            if dep.status != TaskStatus::Completed {
                return Ok(ClaimOutcome::Rejected(ClaimRejection::BlockedOnDependency {
                    dependency: dependency.clone(),
                }));
            }
        }

        task.status = TaskStatus::InProgress;
        task.owner = Some(session.clone());
        task.started_at = Some(Utc::now());
        write_json(&path, &task)?;

        debug!(task = %id, session = %session, "task claimed");
        Ok(ClaimOutcome::Claimed(task))
    }

    /// Complete a task. Only the current owner may complete; anyone
    /// else gets `Unauthorized` and the record is untouched.
    pub fn complete_task(
        &self,
        id: &TaskId,
        session: &SessionId,
        summary: &str,
        files_changed: Vec<String>,
    ) -> Result<Task> {
        let path = self.layout().task_path(id);
        let _lock = RecordLock::acquire(&path)?;

        if !path.exists() {
            return Err(ForemanError::NotFound(format!("task {id}")));
        }
        let mut task: Task = read_json(&path)?;

        if task.owner.as_ref() != Some(session) {
            return Err(ForemanError::Unauthorized(format!(
                "task {id} is owned by {}, not {session}",
                task.owner
                    .as_ref()
                    .map_or("nobody", crate::types::SessionId::value),
            )));
        }

        task.status = TaskStatus::Completed;
        task.owner = None;
        task.result_summary = Some(summary.to_string());
        task.files_changed = files_changed;
        task.completed_at = Some(Utc::now());
        write_json(&path, &task)?;
        Ok(task)
    }

    /// Mark a task failed, clearing ownership.
    pub fn fail_task(&self, id: &TaskId, reason: &str) -> Result<Task> {
        self.update_task(id, |task| {
            task.status = TaskStatus::Failed;
            task.owner = None;
            task.result_summary = Some(reason.to_string());
        })
    }

    /// Reset every `in_progress` task whose owner is not in the active
    /// set back to `pending`. Returns how many were reclaimed.
    pub fn reset_orphans(&self, active_sessions: &[SessionId]) -> Result<u32> {
        let active: HashSet<&SessionId> = active_sessions.iter().collect();
        let mut reclaimed = 0;

        for task in self.list_tasks(Some(TaskStatus::InProgress))? {
            let orphaned = task
                .owner
                .as_ref()
                .is_none_or(|owner| !active.contains(owner));
            if !orphaned {
                continue;
            }

            // Recheck under the lock: the owner may have completed or a
            // live worker may have reclaimed between snapshot and here.
            let updated = self.update_task(&task.id, |candidate| {
                let still_orphaned = candidate.status == TaskStatus::InProgress
                    && candidate
                        .owner
                        .as_ref()
                        .is_none_or(|owner| !active.contains(owner));
                if still_orphaned {
                    candidate.status = TaskStatus::Pending;
                    candidate.owner = None;
                    candidate.started_at = None;
                }
            })?;
            if updated.status == TaskStatus::Pending {
                warn!(task = %task.id, "orphaned task reset to pending");
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::{ClaimOutcome, ClaimRejection};
    use crate::store::ProjectStore;
    use crate::types::{
        RiskLevel, RunState, SessionId, TaskDef, TaskId, TaskStatus, TaskType,
    };

    fn store() -> (tempfile::TempDir, ProjectStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = RunState::new("feature", "branch", "abc", 5, 3);
        let store = ProjectStore::init(dir.path(), &state).expect("init");
        (dir, store)
    }

    fn def(subject: &str) -> TaskDef {
        TaskDef {
            subject: subject.to_string(),
            description: format!("{subject} description"),
            task_type: TaskType::General,
            depends_on_subjects: Vec::new(),
            security_requirements: Vec::new(),
            performance_requirements: Vec::new(),
            acceptance_criteria: Vec::new(),
            risk_level: RiskLevel::Low,
        }
    }

    #[test]
    fn create_wires_reverse_blocks_edges() {
        let (_dir, store) = store();
        let a = store
            .create_task(&def("a"), TaskId::from_index(1), Vec::new())
            .expect("create a");
        store
            .create_task(&def("b"), TaskId::from_index(2), vec![a.id.clone()])
            .expect("create b");

        let a = store.get_task(&a.id).expect("reread a");
        assert_eq!(a.blocks, vec![TaskId::from_index(2)]);
    }

    #[test]
    fn list_is_ordered_by_id_and_filters_by_status() {
        let (_dir, store) = store();
        for index in [3, 1, 2] {
            store
                .create_task(&def(&format!("t{index}")), TaskId::from_index(index), Vec::new())
                .expect("create");
        }
        let tasks = store.list_tasks(None).expect("list");
        assert_eq!(
            tasks.iter().map(|t| t.id.value()).collect::<Vec<_>>(),
            vec!["task-001", "task-002", "task-003"]
        );

        let session = SessionId::from_index(1);
        assert!(matches!(
            store.claim_task(&TaskId::from_index(1), &session).expect("claim"),
            ClaimOutcome::Claimed(_)
        ));
        let pending = store.list_tasks(Some(TaskStatus::Pending)).expect("list");
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn claim_rejects_missing_wrong_status_and_blocked() {
        let (_dir, store) = store();
        let session = SessionId::from_index(1);

        let absent = store
            .claim_task(&TaskId::from_index(9), &session)
            .expect("claim absent");
        assert!(matches!(
            absent,
            ClaimOutcome::Rejected(ClaimRejection::TaskAbsent { .. })
        ));

        let a = store
            .create_task(&def("a"), TaskId::from_index(1), Vec::new())
            .expect("create a");
        let b = store
            .create_task(&def("b"), TaskId::from_index(2), vec![a.id.clone()])
            .expect("create b");

        let blocked = store.claim_task(&b.id, &session).expect("claim blocked");
        assert_eq!(
            blocked,
            ClaimOutcome::Rejected(ClaimRejection::BlockedOnDependency {
                dependency: a.id.clone()
            })
        );
        // A rejected claim must not mutate the task.
        let b_after = store.get_task(&b.id).expect("reread b");
        assert_eq!(b_after.status, TaskStatus::Pending);
        assert!(b_after.owner.is_none());

        assert!(matches!(
            store.claim_task(&a.id, &session).expect("claim a"),
            ClaimOutcome::Claimed(_)
        ));
        let wrong = store
            .claim_task(&a.id, &SessionId::from_index(2))
            .expect("claim again");
        assert_eq!(
            wrong,
            ClaimOutcome::Rejected(ClaimRejection::WrongStatus {
                current: TaskStatus::InProgress
            })
        );
    }

    #[test]
    fn claim_unblocks_once_dependencies_complete() {
        let (_dir, store) = store();
        let session = SessionId::from_index(1);

        let a = store
            .create_task(&def("a"), TaskId::from_index(1), Vec::new())
            .expect("create a");
        let b = store
            .create_task(&def("b"), TaskId::from_index(2), vec![a.id.clone()])
            .expect("create b");

        assert!(matches!(
            store.claim_task(&a.id, &session).expect("claim a"),
            ClaimOutcome::Claimed(_)
        ));
        store
            .complete_task(&a.id, &session, "done", vec!["src/a.rs".to_string()])
            .expect("complete a");

        let claimed = store.claim_task(&b.id, &session).expect("claim b");
        match claimed {
            ClaimOutcome::Claimed(task) => {
                assert_eq!(task.status, TaskStatus::InProgress);
                assert_eq!(task.owner, Some(session));
                assert!(task.started_at.is_some());
            }
            ClaimOutcome::Rejected(rejection) => panic!("unexpected rejection: {rejection}"),
        }
    }

    #[test]
    fn concurrent_claims_yield_exactly_one_winner() {
        let (_dir, store) = store();
        store
            .create_task(&def("contested"), TaskId::from_index(1), Vec::new())
            .expect("create");

        let mut handles = Vec::new();
        for worker in 1..=4u32 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let session = SessionId::from_index(worker);
                store
                    .claim_task(&TaskId::from_index(1), &session)
                    .expect("claim")
            }));
        }

        let outcomes: Vec<ClaimOutcome> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect();

        let winners = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, ClaimOutcome::Claimed(_)))
            .count();
        assert_eq!(winners, 1, "exactly one claim may succeed: {outcomes:?}");

        let task = store.get_task(&TaskId::from_index(1)).expect("reread");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.owner.is_some());
    }

    #[test]
    fn complete_by_non_owner_fails_without_mutation() {
        let (_dir, store) = store();
        let owner = SessionId::from_index(1);
        let thief = SessionId::from_index(2);

        let task = store
            .create_task(&def("a"), TaskId::from_index(1), Vec::new())
            .expect("create");
        assert!(matches!(
            store.claim_task(&task.id, &owner).expect("claim"),
            ClaimOutcome::Claimed(_)
        ));

        let denied = store.complete_task(&task.id, &thief, "mine now", Vec::new());
        assert!(matches!(
            denied,
            Err(crate::error::ForemanError::Unauthorized(_))
        ));

        let unchanged = store.get_task(&task.id).expect("reread");
        assert_eq!(unchanged.status, TaskStatus::InProgress);
        assert_eq!(unchanged.owner, Some(owner.clone()));

        let completed = store
            .complete_task(&task.id, &owner, "done", vec!["src/a.rs".to_string()])
            .expect("complete");
        assert_eq!(completed.status, TaskStatus::Completed);
        assert!(completed.owner.is_none());
        assert_eq!(completed.result_summary.as_deref(), Some("done"));
    }

    #[test]
    fn orphan_sweep_resets_only_dead_owners() {
        let (_dir, store) = store();
        let alive = SessionId::from_index(1);
        let dead = SessionId::from_index(2);

        for index in 1..=2 {
            store
                .create_task(&def(&format!("t{index}")), TaskId::from_index(index), Vec::new())
                .expect("create");
        }
        assert!(matches!(
            store.claim_task(&TaskId::from_index(1), &alive).expect("claim"),
            ClaimOutcome::Claimed(_)
        ));
        assert!(matches!(
            store.claim_task(&TaskId::from_index(2), &dead).expect("claim"),
            ClaimOutcome::Claimed(_)
        ));

        let reclaimed = store.reset_orphans(std::slice::from_ref(&alive)).expect("sweep");
        assert_eq!(reclaimed, 1);

        let orphaned = store.get_task(&TaskId::from_index(2)).expect("reread");
        assert_eq!(orphaned.status, TaskStatus::Pending);
        assert!(orphaned.owner.is_none());
        assert!(orphaned.started_at.is_none());

        let kept = store.get_task(&TaskId::from_index(1)).expect("reread");
        assert_eq!(kept.status, TaskStatus::InProgress);
        assert_eq!(kept.owner, Some(alive));
    }

    #[test]
    fn next_task_index_is_one_past_the_highest() {
        let (_dir, store) = store();
        assert_eq!(store.next_task_index().expect("empty"), 1);
        store
            .create_task(&def("a"), TaskId::from_index(7), Vec::new())
            .expect("create");
        assert_eq!(store.next_task_index().expect("after"), 8);
    }
}
