//! Worker supervisor: spawns the worker pool and the read-only
//! sentinel, tracks liveness, delivers the wind-down broadcast, waits
//! for drain, and reclaims orphaned tasks.

mod context;
mod worker;

pub use context::SharedContext;
pub use worker::{WorkerEvent, WorkerExit, WorkerHandle};

use crate::config::{render_command, EngineConfig};
use crate::error::Result;
use crate::store::ProjectStore;
use crate::types::{
    Message, SessionId, SessionState, SessionStatus, TaskStatus, WindDownReason, ENGINE_ACTOR,
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DRAIN_POLL: Duration = Duration::from_millis(250);

pub struct WorkerSupervisor {
    store: ProjectStore,
    config: EngineConfig,
    active: Vec<WorkerHandle>,
}

impl WorkerSupervisor {
    #[must_use]
    pub fn new(store: ProjectStore, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            active: Vec::new(),
        }
    }

    /// Spawn one worker: allocate a session id, create the session
    /// directory with initial status and context, then launch.
    pub fn spawn_worker(&mut self, shared: &SharedContext, sentinel: bool) -> Result<SessionId> {
        let session_id = self.store.next_session_id()?;
        self.store
            .write_session_status(&SessionStatus::starting(session_id.clone()))?;
        if sentinel {
            self.store.mark_session_read_only(&session_id)?;
        }
        self.store.write_session_context(&session_id, shared)?;

        let command = render_command(
            &self.config.tools.worker,
            self.store.project_dir(),
            &self.store.project_dir().display().to_string(),
            session_id.value(),
        );
        let handle = worker::launch_worker(&self.store, &command, session_id.clone(), sentinel)?;
        info!(session = %session_id, sentinel, "worker spawned");
        self.active.push(handle);
        Ok(session_id)
    }

    /// Spawn up to `count` execution workers.
    pub fn spawn_workers(&mut self, shared: &SharedContext, count: u32) -> Result<Vec<SessionId>> {
        let mut spawned = Vec::new();
        for _ in 0..count {
            spawned.push(self.spawn_worker(shared, false)?);
        }
        Ok(spawned)
    }

    /// Spawn the one read-only sentinel for this cycle.
    pub fn spawn_sentinel(&mut self, shared: &SharedContext) -> Result<SessionId> {
        self.spawn_worker(shared, true)
    }

    /// Drop finished handles from the active set.
    pub fn reap_finished(&mut self) {
        self.active.retain(|handle| {
            if handle.is_finished() {
                debug!(session = %handle.session_id, "worker finished");
                false
            } else {
                true
            }
        });
    }

    /// Sessions still live, sentinel included.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.active
            .iter()
            .map(|handle| handle.session_id.clone())
            .collect()
    }

    /// Live execution workers (the sentinel never claims tasks).
    #[must_use]
    pub fn active_worker_count(&self) -> usize {
        self.active.iter().filter(|handle| !handle.sentinel).count()
    }

    /// Broadcast the wind-down message every worker watches for.
    pub fn broadcast_wind_down(
        &self,
        reason: WindDownReason,
        resets_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        info!(%reason, "broadcasting wind-down");
        self.store
            .post_message(&Message::wind_down(ENGINE_ACTOR, reason, resets_at))
    }

    /// Wait up to `grace` for all workers to finish. Returns true on a
    /// clean drain; on timeout the stragglers are left to the next
    /// orphan sweep and their handles are dropped from the active set.
    pub async fn wait_for_drain(&mut self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            self.reap_finished();
            if self.active.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    stragglers = self.active.len(),
                    "grace window elapsed; abandoning remaining workers"
                );
                for handle in self.active.drain(..) {
                    let _ = self
                        .store
                        .set_session_state(&handle.session_id, SessionState::Failed);
                    handle.abort();
                }
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }

    /// Reset tasks whose owners are not live. Runs before spawning (to
    /// recover from a prior crash) and periodically during execution.
    pub fn sweep_orphans(&mut self) -> Result<u32> {
        self.reap_finished();
        let active = self.active_sessions();
        let reclaimed = self.store.reset_orphans(&active)?;
        if reclaimed > 0 {
            info!(reclaimed, "orphan sweep reclaimed tasks");
        }
        Ok(reclaimed)
    }

    /// Respawn policy: if pending tasks remain but no execution
    /// workers are live, spawn a fresh pool.
    pub fn respawn_if_needed(&mut self, shared: &SharedContext) -> Result<u32> {
        self.reap_finished();
        if self.active_worker_count() > 0 {
            return Ok(0);
        }
        let pending = self.store.list_tasks(Some(TaskStatus::Pending))?.len() as u32;
        if pending == 0 {
            return Ok(0);
        }
        let count = self.config.concurrency.min(pending);
        info!(pending, count, "respawning workers for remaining tasks");
        self.spawn_workers(shared, count)?;
        Ok(count)
    }
}
