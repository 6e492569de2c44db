//! Flow tracer: derive a handful of end-to-end user flows from a diff
//! and run one read-only tracing subtask per flow. Dispatch is a
//! sliding window (a new subtask starts as soon as one settles) so a
//! long trace never starves the short ones.

use crate::error::Result;
use crate::types::{FlowFinding, FlowReport, FlowSummary, Severity, UserFlow};
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

pub const MAX_FLOWS: usize = 8;
pub const TRACE_PARALLELISM: usize = 3;

pub type TraceFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<FlowFinding>>> + Send + 'a>>;

/// Port for the tracing subtask (an opaque read-only agent call).
pub trait TracerPort: Sync {
    fn trace<'a>(&'a self, flow: &'a UserFlow, diff: &'a str) -> TraceFuture<'a>;
}

/// Derive up to `max_flows` flows by grouping changed files by their
/// top-level area. The tracing subtasks do the actual reasoning; this
/// grouping only decides what to point them at.
#[must_use]
pub fn derive_flows(changed_files: &[String], max_flows: usize) -> Vec<UserFlow> {
    let mut by_area: HashMap<String, Vec<String>> = HashMap::new();
    for file in changed_files {
        let area = file
            .trim_start_matches("./")
            .split('/')
            .next()
            .unwrap_or("root")
            .to_string();
        by_area.entry(area).or_default().push(file.clone());
    }

    let mut areas: Vec<(String, Vec<String>)> = by_area.into_iter().collect();
    // Biggest areas first so the cap keeps the most-touched flows.
    areas.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(&b.0)));
    areas.truncate(max_flows);

    areas
        .into_iter()
        .map(|(area, files)| {
            let slug = slugify(&area);
            UserFlow {
                id: slug.clone(),
                name: format!("{area} changes"),
                description: format!(
                    "End-to-end behavior of the {area} area across {} changed file(s)",
                    files.len()
                ),
                entry_points: files,
                actors: vec!["user".to_string()],
                edge_cases: vec![
                    "unauthenticated access".to_string(),
                    "concurrent updates".to_string(),
                    "malformed input".to_string(),
                ],
            }
        })
        .collect()
}

fn slugify(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Deduplicate findings by `file_path + "::" + lowercased 60-char
/// title`, keeping the higher severity on collision.
#[must_use]
pub fn dedup_findings(findings: Vec<FlowFinding>) -> Vec<FlowFinding> {
    let mut kept: Vec<FlowFinding> = Vec::new();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();

    for finding in findings {
        let key = finding.dedup_key();
        match index_by_key.get(&key) {
            Some(&existing) => {
                if finding.severity.rank() > kept[existing].severity.rank() {
                    kept[existing] = finding;
                }
            }
            None => {
                index_by_key.insert(key, kept.len());
                kept.push(finding);
            }
        }
    }
    kept
}

/// Run every flow through the tracer port with bounded parallelism and
/// aggregate a per-cycle report. A failed subtask drops its flow with
/// a warning rather than failing the cycle.
pub async fn trace_flows<P: TracerPort + ?Sized>(
    port: &P,
    cycle: u32,
    diff: &str,
    changed_files: &[String],
    max_flows: usize,
    parallelism: usize,
) -> Result<FlowReport> {
    let flows = derive_flows(changed_files, max_flows);
    debug!(flows = flows.len(), "tracing flows");

    let results: Vec<Vec<FlowFinding>> = stream::iter(flows.iter())
        .map(|flow| async move {
            match port.trace(flow, diff).await {
                Ok(findings) => findings,
                Err(err) => {
                    warn!(flow = %flow.id, error = %err, "tracing subtask failed; skipping flow");
                    Vec::new()
                }
            }
        })
        .buffer_unordered(parallelism.max(1))
        .collect()
        .await;

    let findings = dedup_findings(results.into_iter().flatten().collect());
    let summary = FlowSummary::tally(&findings);

    Ok(FlowReport {
        cycle,
        flows,
        findings,
        summary,
    })
}

/// Human-readable companion to the report JSON.
#[must_use]
pub fn render_summary(report: &FlowReport) -> String {
    let mut out = format!(
        "Flow tracing, cycle {}: {} flow(s), {} finding(s)\n",
        report.cycle,
        report.flows.len(),
        report.findings.len()
    );
    out.push_str(&format!(
        "  critical: {}  high: {}  medium: {}  low: {}  cross-boundary: {}\n",
        report.summary.critical,
        report.summary.high,
        report.summary.medium,
        report.summary.low,
        report.summary.cross_boundary
    ));
    for finding in &report.findings {
        let line = finding
            .line
            .map_or_else(String::new, |line| format!(":{line}"));
        out.push_str(&format!(
            "  [{}] {} ({}{})\n",
            finding.severity, finding.title, finding.file_path, line
        ));
    }
    out
}

/// Severity order helper for consumers sorting worst-first.
#[must_use]
pub fn worst_first(mut findings: Vec<FlowFinding>) -> Vec<FlowFinding> {
    findings.sort_by(|a, b| b.severity.rank().cmp(&a.severity.rank()));
    findings
}
