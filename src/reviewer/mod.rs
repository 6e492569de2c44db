//! Reviewer driver: invokes the external reviewer tool, parses its
//! structured verdict, and classifies failures. The subtle contract is
//! retry classification: two attempts per logical review, and the
//! second attempt's failure mode decides between RATE_LIMITED and
//! ERROR.

mod parse;

pub use parse::parse_review;

use crate::error::{ForemanError, Result};
use crate::types::{ReviewIssue, ReviewOutcome};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

pub type ToolFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One invocation of the reviewer tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// The tool ran and produced output (possibly garbage).
    Output(String),
    /// Timed out; killed. Partial stdout preserved for classification.
    TimedOut(String),
    /// Exited non-zero with nothing usable on stdout.
    Crashed(String),
    /// Exited zero with empty stdout.
    Empty,
}

impl Attempt {
    /// Execution failures: the tool did not deliver output to parse.
    #[must_use]
    pub fn is_execution_failure(&self) -> bool {
        match self {
            Self::Output(_) => false,
            Self::TimedOut(partial) => partial.trim().is_empty() || parse_review(partial).is_none(),
            Self::Crashed(_) | Self::Empty => true,
        }
    }

    #[must_use]
    fn output(&self) -> Option<&str> {
        match self {
            Self::Output(text) => Some(text),
            Self::TimedOut(partial) if !partial.trim().is_empty() => Some(partial),
            _ => None,
        }
    }
}

/// Port for the reviewer binary so the classification logic is
/// testable without the real tool.
pub trait ReviewerPort {
    fn invoke<'a>(&'a self, prompt: &'a str) -> ToolFuture<'a, Attempt>;
}

/// Port for the investigator run between dialogue rounds.
pub trait InvestigatorPort {
    fn respond<'a>(&'a self, issues: &'a [ReviewIssue]) -> ToolFuture<'a, String>;
}

/// Result of a multi-round review dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueResult {
    Approved {
        rounds: u32,
    },
    /// Rounds exhausted without approval; the last verdict rides along
    /// so checkpointing can gate on it.
    Unresolved {
        rounds: u32,
        last: ReviewOutcome,
    },
    RateLimited {
        rounds: u32,
    },
    Error {
        rounds: u32,
    },
    /// The same issue recurred twice; a human has to break the tie.
    EscalateRecurrence {
        issue: ReviewIssue,
        rounds: u32,
    },
}

/// Drives one reviewer binary with a hard per-call timeout.
#[derive(Debug, Clone)]
pub struct ReviewerDriver {
    program: String,
    project_dir: PathBuf,
    timeout: Duration,
    max_rounds: u32,
}

impl ReviewerDriver {
    #[must_use]
    pub fn new(program: String, project_dir: &Path, timeout: Duration, max_rounds: u32) -> Self {
        Self {
            program,
            project_dir: project_dir.to_path_buf(),
            timeout,
            max_rounds,
        }
    }

    #[must_use]
    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Invoke the tool once:
    /// `<tool> exec --full-auto --sandbox read-only -C <project> <prompt>`.
    /// Kills at the timeout, preserving partial stdout.
    async fn invoke_tool(&self, prompt: &str) -> Result<Attempt> {
        let mut child = tokio::process::Command::new(&self.program)
            .arg("exec")
            .arg("--full-auto")
            .arg("--sandbox")
            .arg("read-only")
            .arg("-C")
            .arg(&self.project_dir)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => ForemanError::ToolMissing(self.program.clone()),
                _ => ForemanError::IoError(err),
            })?;

        let mut stdout_pipe = child.stdout.take().ok_or_else(|| {
            ForemanError::Internal("reviewer stdout was not piped".to_string())
        })?;
        let mut stderr_pipe = child.stderr.take().ok_or_else(|| {
            ForemanError::Internal("reviewer stderr was not piped".to_string())
        })?;

        // Drain pipes concurrently with the child so a chatty tool
        // cannot deadlock on a full pipe.
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stdout_pipe.read_to_string(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr_pipe.read_to_string(&mut buf).await;
            buf
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.map_err(ForemanError::IoError)?,
            Err(_) => {
                warn!(timeout = ?self.timeout, "reviewer timed out; killing");
                let _ = child.kill().await;
                let partial = stdout_task.await.unwrap_or_default();
                return Ok(Attempt::TimedOut(partial));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if stdout.trim().is_empty() {
            if status.success() {
                Ok(Attempt::Empty)
            } else {
                Ok(Attempt::Crashed(stderr))
            }
        } else {
            // Non-zero exit is permitted as long as stdout is non-empty.
            Ok(Attempt::Output(stdout))
        }
    }

    /// One logical review with the two-attempt classification.
    pub async fn review(&self, prompt: &str) -> Result<ReviewOutcome> {
        let port = DriverPort { driver: self };
        review_with(&port, prompt).await
    }

    /// Multi-round dialogue until APPROVE, a terminal driver outcome,
    /// rounds exhausted, or a recurring issue forces escalation.
    pub async fn dialogue<I>(
        &self,
        label: &str,
        initial_prompt: &str,
        investigator: &I,
    ) -> Result<DialogueResult>
    where
        I: InvestigatorPort + ?Sized,
    {
        let port = DriverPort { driver: self };
        dialogue_with(&port, investigator, label, initial_prompt, self.max_rounds).await
    }
}

struct DriverPort<'d> {
    driver: &'d ReviewerDriver,
}

impl ReviewerPort for DriverPort<'_> {
    fn invoke<'a>(&'a self, prompt: &'a str) -> ToolFuture<'a, Attempt> {
        Box::pin(self.driver.invoke_tool(prompt))
    }
}

/// The retry classification, as a finite decision over two attempts:
/// - either attempt parses to a real verdict: return it immediately;
/// - second attempt fails by execution: `RateLimited`;
/// - second attempt produced output that does not parse: `Error`.
/// Tool-not-found propagates as an error and is never retried.
pub async fn review_with<P: ReviewerPort + ?Sized>(port: &P, prompt: &str) -> Result<ReviewOutcome> {
    let first = port.invoke(prompt).await?;
    if let Some(parsed) = first.output().and_then(parse_review) {
        return Ok(ReviewOutcome::Verdict(parsed));
    }
    debug!(?first, "first review attempt produced no verdict; retrying");

    let second = port.invoke(prompt).await?;
    if let Some(parsed) = second.output().and_then(parse_review) {
        return Ok(ReviewOutcome::Verdict(parsed));
    }

    if second.is_execution_failure() {
        info!("reviewer stopped responding; presuming rate limit");
        Ok(ReviewOutcome::RateLimited)
    } else {
        Ok(ReviewOutcome::Error)
    }
}

/// Dialogue loop shared by plan review and code review. Tracks issue
/// recurrence across rounds keyed on each issue's 80-char prefix and
/// escalates when the same key shows up twice.
pub async fn dialogue_with<P, I>(
    reviewer: &P,
    investigator: &I,
    label: &str,
    initial_prompt: &str,
    max_rounds: u32,
) -> Result<DialogueResult>
where
    P: ReviewerPort + ?Sized,
    I: InvestigatorPort + ?Sized,
{
    let mut prompt = initial_prompt.to_string();
    let mut recurrence: HashMap<String, u32> = HashMap::new();
    let mut last = ReviewOutcome::NoVerdict;

    for round in 1..=max_rounds {
        info!(label, round, "review round");
        let outcome = review_with(reviewer, &prompt).await?;

        let parsed = match outcome {
            ReviewOutcome::Verdict(parsed) => parsed,
            ReviewOutcome::RateLimited => return Ok(DialogueResult::RateLimited { rounds: round }),
            ReviewOutcome::Error => return Ok(DialogueResult::Error { rounds: round }),
            ReviewOutcome::NoVerdict => {
                last = ReviewOutcome::NoVerdict;
                continue;
            }
        };

        if parsed.verdict == crate::types::ReviewVerdict::Approve {
            return Ok(DialogueResult::Approved { rounds: round });
        }

        for issue in &parsed.issues {
            let count = recurrence.entry(issue.recurrence_key()).or_insert(0);
            *count += 1;
            if *count >= 2 {
                warn!(label, issue = %issue, "issue recurred; escalating");
                return Ok(DialogueResult::EscalateRecurrence {
                    issue: issue.clone(),
                    rounds: round,
                });
            }
        }

        let response = investigator.respond(&parsed.issues).await?;
        prompt = format!(
            "{initial_prompt}\n\n## Previous verdict: {}\n{}\n\n## Investigator response\n{response}",
            parsed.verdict,
            parsed
                .issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
        );
        last = ReviewOutcome::Verdict(parsed);
    }

    Ok(DialogueResult::Unresolved {
        rounds: max_rounds,
        last,
    })
}
