//! The verbs workers invoke against the shared board. Stateless: every
//! request carries its session id and all state lives in the store.

use crate::config::shell_escape;
use crate::error::{code, ForemanError, Result};
use crate::protocol::{Verb, VerbEnvelope, VerbRequest};
use crate::store::{ClaimOutcome, ClaimRejection, ProjectStore};
use crate::types::{
    ArchitecturalDecision, Contract, Message, SessionId, Task, TaskId, TaskStatus,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// How much of the combined test output survives truncation.
const TEST_OUTPUT_TAIL: usize = 5000;
const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Everything a worker needs to start on a freshly claimed task:
/// results of its dependencies, who else is working, and the shared
/// agreements made so far.
#[derive(Debug, serde::Serialize)]
pub struct ClaimContext {
    pub task: Task,
    pub dependency_context: Vec<DependencyResult>,
    pub in_progress_siblings: Vec<SiblingTask>,
    pub contracts: Vec<Contract>,
    pub decisions: Vec<ArchitecturalDecision>,
    pub warnings: Vec<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct DependencyResult {
    pub task_id: TaskId,
    pub subject: String,
    pub result_summary: Option<String>,
    pub files_changed: Vec<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct SiblingTask {
    pub task_id: TaskId,
    pub subject: String,
    pub owner: Option<SessionId>,
}

/// Stateless verb dispatcher over one project store.
#[derive(Debug, Clone)]
pub struct CoordinationService {
    store: ProjectStore,
    test_command: Option<String>,
}

impl CoordinationService {
    #[must_use]
    pub fn new(store: ProjectStore, test_command: Option<String>) -> Self {
        Self {
            store,
            test_command,
        }
    }

    /// Dispatch one request to its handler, mapping expected refusals
    /// to structured envelope errors. `read_only` marks sentinel
    /// sessions, which get `UNAUTHORIZED` for mutating verbs.
    pub async fn dispatch(&self, request: &VerbRequest, read_only: bool) -> VerbEnvelope {
        if read_only && !request.verb.allowed_read_only() {
            return VerbEnvelope::error(
                request.rid.clone(),
                code::UNAUTHORIZED,
                "read-only session may only list tasks and read/post updates",
            );
        }

        let session = SessionId::new(request.session_id.clone());
        let result = self.execute(&session, &request.verb).await;
        match result {
            Ok(data) => VerbEnvelope::success(request.rid.clone(), data),
            Err(err) => VerbEnvelope::error(request.rid.clone(), err.code(), err.to_string()),
        }
    }

    async fn execute(&self, session: &SessionId, verb: &Verb) -> Result<Value> {
        match verb {
            Verb::ListTasks { status } => self.list_tasks(*status),
            Verb::ClaimTask { task_id } => self.claim_task(session, &TaskId::new(task_id.clone())),
            Verb::CompleteTask {
                task_id,
                summary,
                files_changed,
            } => self.complete_task(
                session,
                &TaskId::new(task_id.clone()),
                summary,
                files_changed.clone(),
            ),
            Verb::ReadUpdates { since } => {
                let messages = self.store.read_messages(session.value(), *since)?;
                Ok(json!({ "messages": messages }))
            }
            Verb::PostUpdate {
                message_type,
                content,
                to,
                metadata,
            } => {
                let mut message =
                    Message::new(session.value(), to.clone(), *message_type, content.clone());
                if let Some(metadata) = metadata {
                    message = message.with_metadata(metadata.clone());
                }
                self.store.post_message(&message)?;
                Ok(serde_json::to_value(&message)?)
            }
            Verb::GetSessionStatus { session_id } => {
                let id = SessionId::new(session_id.clone());
                match self.store.read_session_status(&id)? {
                    Some(status) => Ok(serde_json::to_value(&status)?),
                    None => Ok(json!({ "session_id": session_id, "state": "unknown" })),
                }
            }
            Verb::RegisterContract {
                contract_id,
                contract_type,
                specification,
            } => {
                let owning_task = self.current_task_of(session)?;
                let contract = Contract::new(
                    contract_id.clone(),
                    *contract_type,
                    specification.clone(),
                    owning_task,
                );
                self.store.register_contract(&contract)?;
                info!(contract = %contract.contract_id, session = %session, "contract registered");
                Ok(serde_json::to_value(&contract)?)
            }
            Verb::GetContracts {
                contract_type,
                id_contains,
            } => {
                let contracts = self
                    .store
                    .get_contracts(*contract_type, id_contains.as_deref())?;
                Ok(json!({ "contracts": contracts }))
            }
            Verb::RecordDecision {
                category,
                decision,
                rationale,
                task_id,
            } => {
                let record = ArchitecturalDecision::new(
                    session.clone(),
                    *category,
                    decision.clone(),
                    rationale.clone(),
                    task_id.clone().map(TaskId::new),
                );
                self.store.record_decision(&record)?;
                Ok(serde_json::to_value(&record)?)
            }
            Verb::GetDecisions { category } => {
                let decisions = self.store.get_decisions(*category)?;
                Ok(json!({ "decisions": decisions }))
            }
            Verb::RunTests {
                files,
                timeout_secs,
            } => self.run_tests(files, *timeout_secs).await,
        }
    }

    fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Value> {
        let tasks = self.store.list_tasks(status)?;
        Ok(json!({ "tasks": tasks }))
    }

    /// The claim verb: atomic claim in the store, then a snapshot of
    /// everything the new owner needs.
    fn claim_task(&self, session: &SessionId, task_id: &TaskId) -> Result<Value> {
        match self.store.claim_task(task_id, session)? {
            ClaimOutcome::Claimed(task) => {
                let context = self.build_claim_context(task)?;
                Ok(serde_json::to_value(&context)?)
            }
            ClaimOutcome::Rejected(rejection) => Err(match rejection {
                ClaimRejection::TaskAbsent { task_id } => {
                    ForemanError::NotFound(format!("task {task_id}"))
                }
                ClaimRejection::WrongStatus { current } => {
                    ForemanError::Conflict(format!("not pending (current: {current})"))
                }
                ClaimRejection::BlockedOnDependency { dependency } => {
                    ForemanError::Conflict(format!("blocked by unresolved dependency {dependency}"))
                }
            }),
        }
    }

    fn build_claim_context(&self, task: Task) -> Result<ClaimContext> {
        let mut dependency_context = Vec::new();
        for dependency in &task.depends_on {
            let dep = self.store.get_task(dependency)?;
            dependency_context.push(DependencyResult {
                task_id: dep.id,
                subject: dep.subject,
                result_summary: dep.result_summary,
                files_changed: dep.files_changed,
            });
        }

        let in_progress_siblings = self
            .store
            .list_tasks(Some(TaskStatus::InProgress))?
            .into_iter()
            .filter(|sibling| sibling.id != task.id)
            .map(|sibling| SiblingTask {
                task_id: sibling.id,
                subject: sibling.subject,
                owner: sibling.owner,
            })
            .collect();

        let mut warnings = Vec::new();
        if !task.security_requirements.is_empty() {
            warnings.push(format!(
                "task has {} security requirement(s); review them before writing code",
                task.security_requirements.len()
            ));
        }
        if task.risk_level == crate::types::RiskLevel::High {
            warnings.push("high-risk task: record decisions for anything non-obvious".to_string());
        }

        Ok(ClaimContext {
            task,
            dependency_context,
            in_progress_siblings,
            contracts: self.store.get_contracts(None, None)?,
            decisions: self.store.get_decisions(None)?,
            warnings,
        })
    }

    fn complete_task(
        &self,
        session: &SessionId,
        task_id: &TaskId,
        summary: &str,
        files_changed: Vec<String>,
    ) -> Result<Value> {
        let task = self
            .store
            .complete_task(task_id, session, summary, files_changed)?;
        info!(task = %task.id, session = %session, "task completed");
        Ok(serde_json::to_value(&task)?)
    }

    fn current_task_of(&self, session: &SessionId) -> Result<Option<TaskId>> {
        Ok(self
            .store
            .list_tasks(Some(TaskStatus::InProgress))?
            .into_iter()
            .find(|task| task.owner.as_ref() == Some(session))
            .map(|task| task.id))
    }

    /// Run the configured test command, append any requested files as
    /// arguments, and keep only the tail of the combined output.
    async fn run_tests(&self, files: &[String], timeout_secs: Option<u64>) -> Result<Value> {
        let Some(command) = self.test_command.as_deref() else {
            return Err(ForemanError::ToolMissing(
                "no test command configured".to_string(),
            ));
        };

        let mut full = command.to_string();
        for file in files {
            full.push(' ');
            full.push_str(&shell_escape(file));
        }
        debug!(command = %full, "running tests");

        let timeout = timeout_secs.map_or(DEFAULT_TEST_TIMEOUT, Duration::from_secs);
        let output = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("bash")
                .arg("-lc")
                .arg(&full)
                .current_dir(self.store.project_dir())
                .output(),
        )
        .await
        .map_err(|_| ForemanError::Timeout(format!("test command after {}s", timeout.as_secs())))?
        .map_err(ForemanError::IoError)?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        let tail = tail_chars(&combined, TEST_OUTPUT_TAIL);

        Ok(json!({
            "passed": output.status.success(),
            "output": tail,
        }))
    }
}

fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

/// Serve the coordination verbs over stdio: one JSON request per stdin
/// line, one envelope per stdout line. Workers are launched with the
/// project directory and call back through this loop.
pub async fn run_serve_loop(service: &CoordinationService) -> Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.map_err(ForemanError::IoError)? {
        if line.trim().is_empty() {
            continue;
        }

        let envelope = match serde_json::from_str::<VerbRequest>(&line) {
            Ok(request) => {
                let read_only = service
                    .store
                    .session_is_read_only(&SessionId::new(request.session_id.clone()));
                service.dispatch(&request, read_only).await
            }
            Err(err) => {
                warn!(error = %err, "unparseable verb request");
                VerbEnvelope::error(None, code::INVALID, format!("bad request: {err}")).with_fix(
                    "Send one JSON object per line with session_id and verb fields".to_string(),
                )
            }
        };

        let text = serde_json::to_string(&envelope)?;
        stdout.write_all(text.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{tail_chars, CoordinationService};
    use crate::protocol::{Verb, VerbRequest};
    use crate::types::{
        ContractType, MessageType, RiskLevel, RunState, SessionId, TaskDef, TaskId, TaskType,
    };

    fn service() -> (tempfile::TempDir, CoordinationService) {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = RunState::new("feature", "branch", "abc", 5, 3);
        let store = crate::store::ProjectStore::init(dir.path(), &state).expect("init");
        (dir, CoordinationService::new(store, None))
    }

    fn request(session: &str, verb: Verb) -> VerbRequest {
        VerbRequest {
            session_id: session.to_string(),
            rid: Some("r1".to_string()),
            verb,
        }
    }

    fn def(subject: &str) -> TaskDef {
        TaskDef {
            subject: subject.to_string(),
            description: "desc".to_string(),
            task_type: TaskType::BackendApi,
            depends_on_subjects: Vec::new(),
            security_requirements: vec!["validate input".to_string()],
            performance_requirements: Vec::new(),
            acceptance_criteria: Vec::new(),
            risk_level: RiskLevel::High,
        }
    }

    #[tokio::test]
    async fn claim_returns_context_with_contracts_and_warnings() {
        let (_dir, service) = service();
        let store = service.store.clone();
        let session = SessionId::from_index(1);

        let dep = store
            .create_task(&def("dep"), TaskId::from_index(1), Vec::new())
            .expect("create dep");
        store
            .claim_task(&dep.id, &session)
            .expect("claim dep");
        store
            .complete_task(&dep.id, &session, "dep done", vec!["src/dep.rs".to_string()])
            .expect("complete dep");
        store
            .create_task(&def("main"), TaskId::from_index(2), vec![dep.id.clone()])
            .expect("create main");

        let envelope = service
            .dispatch(
                &request(
                    "session-001",
                    Verb::ClaimTask {
                        task_id: "task-002".to_string(),
                    },
                ),
                false,
            )
            .await;
        assert!(envelope.ok, "claim should succeed: {:?}", envelope.err);

        let data = envelope.d.expect("data");
        assert_eq!(data["task"]["id"], "task-002");
        assert_eq!(data["dependency_context"][0]["subject"], "dep");
        assert_eq!(
            data["dependency_context"][0]["files_changed"][0],
            "src/dep.rs"
        );
        assert!(!data["warnings"].as_array().expect("warnings").is_empty());
    }

    #[tokio::test]
    async fn losing_claim_reports_current_status() {
        let (_dir, service) = service();
        let store = service.store.clone();
        store
            .create_task(&def("contested"), TaskId::from_index(1), Vec::new())
            .expect("create");

        let win = service
            .dispatch(
                &request(
                    "session-001",
                    Verb::ClaimTask {
                        task_id: "task-001".to_string(),
                    },
                ),
                false,
            )
            .await;
        assert!(win.ok);

        let lose = service
            .dispatch(
                &request(
                    "session-002",
                    Verb::ClaimTask {
                        task_id: "task-001".to_string(),
                    },
                ),
                false,
            )
            .await;
        assert!(!lose.ok);
        let err = lose.err.expect("error");
        assert!(err.msg.contains("not pending (current: in_progress)"));
    }

    #[tokio::test]
    async fn complete_by_non_owner_is_unauthorized() {
        let (_dir, service) = service();
        let store = service.store.clone();
        store
            .create_task(&def("t"), TaskId::from_index(1), Vec::new())
            .expect("create");
        service
            .dispatch(
                &request(
                    "session-001",
                    Verb::ClaimTask {
                        task_id: "task-001".to_string(),
                    },
                ),
                false,
            )
            .await;

        let denied = service
            .dispatch(
                &request(
                    "session-002",
                    Verb::CompleteTask {
                        task_id: "task-001".to_string(),
                        summary: "not mine".to_string(),
                        files_changed: Vec::new(),
                    },
                ),
                false,
            )
            .await;
        assert!(!denied.ok);
        assert_eq!(denied.err.expect("error").code, "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn read_only_sessions_cannot_claim() {
        let (_dir, service) = service();
        let denied = service
            .dispatch(
                &request(
                    "session-009",
                    Verb::ClaimTask {
                        task_id: "task-001".to_string(),
                    },
                ),
                true,
            )
            .await;
        assert!(!denied.ok);
        assert_eq!(denied.err.expect("error").code, "UNAUTHORIZED");

        let allowed = service
            .dispatch(
                &request("session-009", Verb::ListTasks { status: None }),
                true,
            )
            .await;
        assert!(allowed.ok);
    }

    #[tokio::test]
    async fn post_and_read_updates_round_trip() {
        let (_dir, service) = service();
        let posted = service
            .dispatch(
                &request(
                    "session-001",
                    Verb::PostUpdate {
                        message_type: MessageType::Question,
                        content: "which auth scheme?".to_string(),
                        to: Some("session-002".to_string()),
                        metadata: None,
                    },
                ),
                false,
            )
            .await;
        assert!(posted.ok);

        let read = service
            .dispatch(
                &request("session-002", Verb::ReadUpdates { since: None }),
                false,
            )
            .await;
        assert!(read.ok);
        let data = read.d.expect("data");
        assert_eq!(data["messages"][0]["content"], "which auth scheme?");

        let other = service
            .dispatch(
                &request("session-003", Verb::ReadUpdates { since: None }),
                false,
            )
            .await;
        assert!(other
            .d
            .expect("data")["messages"]
            .as_array()
            .expect("array")
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_session_status_reads_as_unknown() {
        let (_dir, service) = service();
        let envelope = service
            .dispatch(
                &request(
                    "session-001",
                    Verb::GetSessionStatus {
                        session_id: "session-042".to_string(),
                    },
                ),
                false,
            )
            .await;
        assert!(envelope.ok);
        assert_eq!(envelope.d.expect("data")["state"], "unknown");
    }

    #[tokio::test]
    async fn contracts_register_and_filter() {
        let (_dir, service) = service();
        let registered = service
            .dispatch(
                &request(
                    "session-001",
                    Verb::RegisterContract {
                        contract_id: "POST /api/users".to_string(),
                        contract_type: ContractType::ApiEndpoint,
                        specification: "{ email } -> 201".to_string(),
                    },
                ),
                false,
            )
            .await;
        assert!(registered.ok);

        let fetched = service
            .dispatch(
                &request(
                    "session-002",
                    Verb::GetContracts {
                        contract_type: Some(ContractType::ApiEndpoint),
                        id_contains: Some("users".to_string()),
                    },
                ),
                false,
            )
            .await;
        let data = fetched.d.expect("data");
        assert_eq!(data["contracts"][0]["contract_id"], "POST /api/users");
    }

    #[tokio::test]
    async fn run_tests_without_a_command_is_a_dependency_error() {
        let (_dir, service) = service();
        let envelope = service
            .dispatch(
                &request(
                    "session-001",
                    Verb::RunTests {
                        files: Vec::new(),
                        timeout_secs: None,
                    },
                ),
                false,
            )
            .await;
        assert!(!envelope.ok);
        assert_eq!(envelope.err.expect("error").code, "DEPENDENCY");
    }

    #[tokio::test]
    async fn run_tests_truncates_to_the_output_tail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = RunState::new("feature", "branch", "abc", 5, 3);
        let store = crate::store::ProjectStore::init(dir.path(), &state).expect("init");
        let service = CoordinationService::new(
            store,
            Some("printf 'x%.0s' $(seq 1 6000); printf END".to_string()),
        );

        let envelope = service
            .dispatch(
                &request(
                    "session-001",
                    Verb::RunTests {
                        files: Vec::new(),
                        timeout_secs: Some(30),
                    },
                ),
                false,
            )
            .await;
        assert!(envelope.ok, "{:?}", envelope.err);
        let data = envelope.d.expect("data");
        assert_eq!(data["passed"], true);
        let output = data["output"].as_str().expect("output");
        assert_eq!(output.chars().count(), 5000);
        assert!(output.ends_with("END"));
    }

    #[test]
    fn tail_keeps_the_last_n_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }
}
