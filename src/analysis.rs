//! Static-analysis runner. Semgrep's CLI contract is unusual: exit 1
//! with non-empty stdout means "findings reported", which is success
//! for our purposes.

use crate::error::{ForemanError, Result};
use crate::types::{IssueSource, KnownIssue, Severity};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct SemgrepOutput {
    #[serde(default)]
    results: Vec<SemgrepResult>,
}

#[derive(Debug, Deserialize)]
struct SemgrepResult {
    check_id: String,
    path: String,
    start: SemgrepPosition,
    extra: SemgrepExtra,
}

#[derive(Debug, Deserialize)]
struct SemgrepPosition {
    line: u32,
}

#[derive(Debug, Deserialize)]
struct SemgrepExtra {
    message: String,
    severity: String,
}

/// Map semgrep's severity vocabulary onto ours.
fn severity_from_semgrep(raw: &str) -> Severity {
    match raw.to_ascii_uppercase().as_str() {
        "ERROR" => Severity::High,
        "WARNING" => Severity::Medium,
        _ => Severity::Low,
    }
}

/// Run semgrep over the project and convert results into known-issue
/// entrants. Tool-not-installed propagates as `ToolMissing` so the
/// engine can downgrade the phase to a warning.
pub async fn run_semgrep(
    project_dir: &Path,
    config: &str,
    paths: &[String],
    cycle: u32,
) -> Result<Vec<KnownIssue>> {
    let mut command = tokio::process::Command::new("semgrep");
    command
        .arg("--json")
        .arg(format!("--config={config}"))
        .current_dir(project_dir);
    for path in paths {
        command.arg(path);
    }

    let output = command.output().await.map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => ForemanError::ToolMissing("semgrep".to_string()),
        _ => ForemanError::IoError(err),
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    // Exit 1 with findings on stdout is a successful scan.
    if !output.status.success() && stdout.trim().is_empty() {
        return Err(ForemanError::Internal(format!(
            "semgrep failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let issues = parse_semgrep_output(&stdout, cycle)?;
    debug!(findings = issues.len(), "semgrep scan complete");
    Ok(issues)
}

/// Parse semgrep's `--json` payload into known-issue entrants.
pub fn parse_semgrep_output(stdout: &str, cycle: u32) -> Result<Vec<KnownIssue>> {
    let parsed: SemgrepOutput = serde_json::from_str(stdout)?;
    Ok(parsed
        .results
        .into_iter()
        .map(|result| {
            KnownIssue::new(
                format!(
                    "{} at line {}: {}",
                    result.check_id, result.start.line, result.extra.message
                ),
                severity_from_semgrep(&result.extra.severity),
                IssueSource::Semgrep,
                Some(result.path),
                cycle,
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{parse_semgrep_output, severity_from_semgrep};
    use crate::types::Severity;

    const SAMPLE: &str = r#"{
        "results": [
            {
                "check_id": "rules.sql-injection",
                "path": "src/db.rs",
                "start": {"line": 42},
                "end": {"line": 44},
                "extra": {"message": "string-built SQL", "severity": "ERROR"}
            },
            {
                "check_id": "rules.weak-hash",
                "path": "src/auth.rs",
                "start": {"line": 7},
                "end": {"line": 7},
                "extra": {"message": "md5 in use", "severity": "WARNING"}
            }
        ]
    }"#;

    #[test]
    fn results_become_known_issue_entrants() {
        let issues = parse_semgrep_output(SAMPLE, 3).expect("parse");
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].file_path.as_deref(), Some("src/db.rs"));
        assert_eq!(issues[0].severity, Severity::High);
        assert!(issues[0].description.contains("rules.sql-injection"));
        assert!(issues[0].description.contains("line 42"));
        assert_eq!(issues[0].cycle_found, 3);
        assert_eq!(issues[1].severity, Severity::Medium);
    }

    #[test]
    fn empty_results_parse_cleanly() {
        let issues = parse_semgrep_output(r#"{"results": []}"#, 1).expect("parse");
        assert!(issues.is_empty());
        assert!(parse_semgrep_output("not json", 1).is_err());
    }

    #[test]
    fn severity_mapping_covers_the_vocabulary() {
        assert_eq!(severity_from_semgrep("ERROR"), Severity::High);
        assert_eq!(severity_from_semgrep("warning"), Severity::Medium);
        assert_eq!(severity_from_semgrep("INFO"), Severity::Low);
    }
}
