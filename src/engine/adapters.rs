//! Command adapters for the opaque LLM tools the engine drives:
//! investigator (between review rounds) and flow-tracing subtasks.
//! Each gets its input document on stdin and answers on stdout.

use crate::error::{ForemanError, Result};
use crate::reviewer::{InvestigatorPort, ToolFuture};
use crate::tracer::{TraceFuture, TracerPort};
use crate::types::{FlowFinding, ReviewIssue, UserFlow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

async fn run_with_stdin(command: &str, project_dir: &Path, input: &str) -> Result<String> {
    let mut child = tokio::process::Command::new("bash")
        .arg("-lc")
        .arg(command)
        .current_dir(project_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ForemanError::ToolMissing(command.to_string()),
            _ => ForemanError::IoError(err),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes()).await?;
        drop(stdin);
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(ForemanError::Internal(format!(
            "{command} exited {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Investigator: issues in, response document out.
#[derive(Debug, Clone)]
pub struct CommandInvestigator {
    command: String,
    project_dir: PathBuf,
}

impl CommandInvestigator {
    #[must_use]
    pub fn new(command: String, project_dir: &Path) -> Self {
        Self {
            command,
            project_dir: project_dir.to_path_buf(),
        }
    }
}

impl InvestigatorPort for CommandInvestigator {
    fn respond<'a>(&'a self, issues: &'a [ReviewIssue]) -> ToolFuture<'a, String> {
        Box::pin(async move {
            let input = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            run_with_stdin(&self.command, &self.project_dir, &input).await
        })
    }
}

#[derive(Debug, Deserialize)]
struct FindingsPayload {
    #[serde(default)]
    findings: Vec<FlowFinding>,
}

/// Tracing subtask: flow description plus diff in, findings JSON out.
#[derive(Debug, Clone)]
pub struct CommandTracer {
    command: String,
    project_dir: PathBuf,
}

impl CommandTracer {
    #[must_use]
    pub fn new(command: String, project_dir: &Path) -> Self {
        Self {
            command,
            project_dir: project_dir.to_path_buf(),
        }
    }
}

impl TracerPort for CommandTracer {
    fn trace<'a>(&'a self, flow: &'a UserFlow, diff: &'a str) -> TraceFuture<'a> {
        Box::pin(async move {
            let input = format!(
                "{}\n\n# Diff\n{diff}\n",
                serde_json::to_string_pretty(flow)?
            );
            let stdout = run_with_stdin(&self.command, &self.project_dir, &input).await?;
            let payload: FindingsPayload = serde_json::from_str(stdout.trim()).map_err(|err| {
                ForemanError::Internal(format!("tracer output did not parse: {err}"))
            })?;
            let flow_id = flow.id.clone();
            Ok(payload
                .findings
                .into_iter()
                .map(|mut finding| {
                    if finding.flow_id.is_empty() {
                        finding.flow_id = flow_id.clone();
                    }
                    finding
                })
                .collect())
        })
    }
}
