use serde::{Deserialize, Serialize};
use std::fmt;

/// The reviewer tool's verdict alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewVerdict {
    Approve,
    NeedsDiscussion,
    MajorConcerns,
    NeedsFixes,
    MajorProblems,
}

impl ReviewVerdict {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::NeedsDiscussion => "NEEDS_DISCUSSION",
            Self::MajorConcerns => "MAJOR_CONCERNS",
            Self::NeedsFixes => "NEEDS_FIXES",
            Self::MajorProblems => "MAJOR_PROBLEMS",
        }
    }
}

impl fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ReviewVerdict {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "APPROVE" => Ok(Self::Approve),
            "NEEDS_DISCUSSION" => Ok(Self::NeedsDiscussion),
            "MAJOR_CONCERNS" => Ok(Self::MajorConcerns),
            "NEEDS_FIXES" => Ok(Self::NeedsFixes),
            "MAJOR_PROBLEMS" => Ok(Self::MajorProblems),
            _ => Err(format!("Unknown verdict: {}", s)),
        }
    }
}

/// Issue severity as the reviewer reports it. Anything outside the
/// contract maps to `Unknown` rather than failing the whole parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Minor,
    Major,
    Critical,
    Unknown,
}

impl IssueSeverity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "minor" => Self::Minor,
            "major" => Self::Major,
            "critical" => Self::Critical,
            _ => Self::Unknown,
        }
    }
}

/// One issue from a review, rendered downstream as
/// `"[<severity>] <description>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub description: String,
    pub severity: IssueSeverity,
}

impl ReviewIssue {
    /// Recurrence key: the first 80 chars of the description, so the
    /// same complaint phrased with a different tail still counts.
    #[must_use]
    pub fn recurrence_key(&self) -> String {
        self.description.chars().take(80).collect()
    }
}

impl fmt::Display for ReviewIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity.as_str(), self.description)
    }
}

/// Successfully parsed reviewer output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReview {
    pub verdict: ReviewVerdict,
    pub issues: Vec<ReviewIssue>,
    pub summary: String,
}

/// Final outcome of one logical review (up to two tool attempts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// The tool ran and produced a parseable verdict.
    Verdict(ParsedReview),
    /// The tool ran but neither attempt produced parseable output on
    /// the first try; a second attempt is still owed.
    NoVerdict,
    /// Both attempts exhausted; the second failed by execution
    /// (timeout, crash, empty output). Treated as budget exhaustion.
    RateLimited,
    /// Both attempts exhausted; the second produced output that could
    /// not be parsed.
    Error,
}

impl ReviewOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verdict(parsed) => parsed.verdict.as_str(),
            Self::NoVerdict => "NO_VERDICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Error => "ERROR",
        }
    }

    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(
            self,
            Self::Verdict(ParsedReview {
                verdict: ReviewVerdict::Approve,
                ..
            })
        )
    }
}
