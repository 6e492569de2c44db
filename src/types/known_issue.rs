use super::finding::{FlowFinding, Severity};
use serde::{Deserialize, Serialize};

/// Where a known issue was first reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSource {
    CodexReview,
    FlowTracing,
    Semgrep,
    IncrementalReview,
    Sentinel,
}

impl IssueSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodexReview => "codex_review",
            Self::FlowTracing => "flow_tracing",
            Self::Semgrep => "semgrep",
            Self::IncrementalReview => "incremental_review",
            Self::Sentinel => "sentinel",
        }
    }
}

impl TryFrom<&str> for IssueSource {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "codex_review" => Ok(Self::CodexReview),
            "flow_tracing" => Ok(Self::FlowTracing),
            "semgrep" => Ok(Self::Semgrep),
            "incremental_review" => Ok(Self::IncrementalReview),
            "sentinel" => Ok(Self::Sentinel),
            _ => Err(format!("Unknown issue source: {}", s)),
        }
    }
}

/// Deduplicated finding carried across cycles until a later cycle
/// resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownIssue {
    pub id: String,
    pub description: String,
    pub severity: Severity,
    pub source: IssueSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub cycle_found: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addressed_in_cycle: Option<u32>,
    #[serde(default)]
    pub addressed: bool,
}

impl KnownIssue {
    #[must_use]
    pub fn new(
        description: impl Into<String>,
        severity: Severity,
        source: IssueSource,
        file_path: Option<String>,
        cycle_found: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            severity,
            source,
            file_path,
            cycle_found,
            addressed_in_cycle: None,
            addressed: false,
        }
    }

    #[must_use]
    pub fn from_flow_finding(finding: &FlowFinding, cycle: u32) -> Self {
        Self::new(
            format!("{}: {}", finding.title, finding.description),
            finding.severity,
            IssueSource::FlowTracing,
            Some(finding.file_path.clone()),
            cycle,
        )
    }

    /// Dedup key: file path plus the lowercased first 80 chars of the
    /// description.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        let prefix: String = self.description.to_lowercase().chars().take(80).collect();
        format!("{}::{}", self.file_path.as_deref().unwrap_or(""), prefix)
    }
}
