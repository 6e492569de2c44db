//! One worker subprocess: launch, event-stream consumption, terminal
//! status. Workers emit JSONL events on stdout; only `result` and
//! `error` matter to the supervisor, everything else is debug noise.

use crate::error::{ForemanError, Result};
use crate::store::ProjectStore;
use crate::types::{SessionId, SessionState};
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Event line from a worker's stdout stream.
#[derive(Debug, Deserialize)]
pub struct WorkerEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// How a worker subprocess ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Done,
    Failed { error: String },
}

/// Handle on a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub session_id: SessionId,
    pub sentinel: bool,
    join: JoinHandle<WorkerExit>,
}

impl WorkerHandle {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(self) -> WorkerExit {
        self.join.await.unwrap_or(WorkerExit::Failed {
            error: "worker task panicked".to_string(),
        })
    }

    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Launch the worker command and consume its event stream in a
/// background task. The subprocess sees the project directory, the
/// coordination address, and its session id via env.
pub fn launch_worker(
    store: &ProjectStore,
    command: &str,
    session_id: SessionId,
    sentinel: bool,
) -> Result<WorkerHandle> {
    let mut child = tokio::process::Command::new("bash")
        .arg("-lc")
        .arg(command)
        .current_dir(store.project_dir())
        .env("FOREMAN_PROJECT_DIR", store.project_dir())
        .env(
            "FOREMAN_COORD_ADDR",
            store.project_dir().display().to_string(),
        )
        .env("FOREMAN_SESSION_ID", session_id.value())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ForemanError::ToolMissing(command.to_string()),
            _ => ForemanError::IoError(err),
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ForemanError::Internal("worker stdout was not piped".to_string()))?;

    let store = store.clone();
    let id = session_id.clone();
    let join = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut stream_error: Option<String> = None;

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<WorkerEvent>(&line) {
                        Ok(event) => match event.event_type.as_str() {
                            "result" => {
                                info!(session = %id, result = ?event.content, "worker result");
                            }
                            "error" => {
                                let message = event
                                    .message
                                    .or(event.content)
                                    .unwrap_or_else(|| "unspecified worker error".to_string());
                                error!(session = %id, error = %message, "worker error event");
                                stream_error = Some(message);
                            }
                            other => debug!(session = %id, event = other, "worker event"),
                        },
                        Err(_) => debug!(session = %id, line = %line, "non-event worker output"),
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    stream_error = Some(format!("event stream read failed: {err}"));
                    break;
                }
            }
        }

        let status = child.wait().await;
        let exit = match (stream_error, status) {
            (Some(error), _) => WorkerExit::Failed { error },
            (None, Ok(status)) if status.success() => WorkerExit::Done,
            (None, Ok(status)) => WorkerExit::Failed {
                error: format!("worker exited {status}"),
            },
            (None, Err(err)) => WorkerExit::Failed {
                error: format!("wait failed: {err}"),
            },
        };

        let final_state = match &exit {
            WorkerExit::Done => SessionState::Done,
            WorkerExit::Failed { error } => {
                warn!(session = %id, error = %error, "worker failed");
                SessionState::Failed
            }
        };
        if let Err(err) = store.set_session_state(&id, final_state) {
            warn!(session = %id, error = %err, "failed to record terminal session state");
        }

        exit
    });

    Ok(WorkerHandle {
        session_id,
        sentinel,
        join,
    })
}
