mod contract;
mod decision;
mod finding;
mod identifiers;
mod known_issue;
mod messaging;
mod session;
mod state;
mod task;
mod verdict;

pub use contract::{Contract, ContractType};
pub use decision::{ArchitecturalDecision, DecisionCategory};
pub use finding::{FlowFinding, FlowReport, FlowSummary, Severity, UserFlow};
pub use identifiers::{SessionId, TaskId, ENGINE_ACTOR};
pub use known_issue::{IssueSource, KnownIssue};
pub use messaging::{Message, MessageType, WindDownReason};
pub use session::{SessionState, SessionStatus};
pub use state::{CycleRecord, ReviewerMetrics, RunState, RunStatus, UsageSnapshot};
pub use task::{RiskLevel, Task, TaskDef, TaskStatus, TaskType};
pub use verdict::{IssueSeverity, ParsedReview, ReviewIssue, ReviewOutcome, ReviewVerdict};
