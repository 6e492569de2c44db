use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a flow finding. Ordered so dedup can keep the worse of
/// two colliding findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Higher rank is more severe: critical > high > medium > low.
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }

    #[must_use]
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Severity {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// One end-to-end user flow derived from a diff. Each flow becomes a
/// read-only tracing subtask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFlow {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub entry_points: Vec<String>,
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(default)]
    pub edge_cases: Vec<String>,
}

/// Severity-tagged finding produced by tracing one flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowFinding {
    pub severity: Severity,
    pub actor: String,
    pub title: String,
    pub description: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default)]
    pub cross_boundary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_case: Option<String>,
    pub flow_id: String,
}

impl FlowFinding {
    /// Dedup key: file path plus the lowercased first 60 chars of the
    /// title.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        let prefix: String = self.title.to_lowercase().chars().take(60).collect();
        format!("{}::{}", self.file_path, prefix)
    }
}

/// Aggregated counts for a cycle's flow-tracing report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub cross_boundary: u32,
}

impl FlowSummary {
    #[must_use]
    pub fn tally(findings: &[FlowFinding]) -> Self {
        let mut summary = Self::default();
        for finding in findings {
            match finding.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
            }
            if finding.cross_boundary {
                summary.cross_boundary += 1;
            }
        }
        summary
    }

    #[must_use]
    pub fn has_actionable(&self) -> bool {
        self.critical > 0 || self.high > 0
    }
}

/// Per-cycle flow-tracing report persisted as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowReport {
    pub cycle: u32,
    pub flows: Vec<UserFlow>,
    pub findings: Vec<FlowFinding>,
    pub summary: FlowSummary,
}
