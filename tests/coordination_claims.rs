//! Claim-protocol contract tests at the verb level: exactly one winner
//! under contention, structured rejections, and owner-only completion.

use foreman::coordination::CoordinationService;
use foreman::protocol::{Verb, VerbRequest};
use foreman::store::ProjectStore;
use foreman::types::{RiskLevel, RunState, SessionId, TaskDef, TaskId, TaskStatus, TaskType};

fn fixture() -> (tempfile::TempDir, CoordinationService, ProjectStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = RunState::new("feature", "branch", "abc", 5, 3);
    let store = ProjectStore::init(dir.path(), &state).expect("init");
    let service = CoordinationService::new(store.clone(), None);
    (dir, service, store)
}

fn task_def(subject: &str) -> TaskDef {
    TaskDef {
        subject: subject.to_string(),
        description: "work".to_string(),
        task_type: TaskType::General,
        depends_on_subjects: Vec::new(),
        security_requirements: Vec::new(),
        performance_requirements: Vec::new(),
        acceptance_criteria: Vec::new(),
        risk_level: RiskLevel::Low,
    }
}

fn claim(session: &str, task: &str) -> VerbRequest {
    VerbRequest {
        session_id: session.to_string(),
        rid: None,
        verb: Verb::ClaimTask {
            task_id: task.to_string(),
        },
    }
}

#[tokio::test]
async fn simultaneous_claims_have_exactly_one_winner() {
    let (_dir, service, store) = fixture();
    store
        .create_task(&task_def("contested"), TaskId::from_index(1), Vec::new())
        .expect("create");

    let claim_a = claim("session-001", "task-001");
    let claim_b = claim("session-002", "task-001");
    let (a, b) = tokio::join!(
        service.dispatch(&claim_a, false),
        service.dispatch(&claim_b, false),
    );

    let winners = [&a, &b].iter().filter(|envelope| envelope.ok).count();
    assert_eq!(winners, 1, "exactly one claim may succeed");

    let loser = if a.ok { &b } else { &a };
    let err = loser.err.as_ref().expect("loser error");
    assert_eq!(err.code, "CONFLICT");
    assert!(err.msg.contains("not pending (current: in_progress)"));

    let task = store.get_task(&TaskId::from_index(1)).expect("reread");
    assert_eq!(task.status, TaskStatus::InProgress);
    let owner = task.owner.expect("owner");
    assert!(owner == SessionId::new("session-001") || owner == SessionId::new("session-002"));
}

#[tokio::test]
async fn claim_on_blocked_task_names_the_unresolved_dependency() {
    let (_dir, service, store) = fixture();
    let dep = store
        .create_task(&task_def("dep"), TaskId::from_index(1), Vec::new())
        .expect("create dep");
    store
        .create_task(&task_def("blocked"), TaskId::from_index(2), vec![dep.id])
        .expect("create blocked");

    let envelope = service
        .dispatch(&claim("session-001", "task-002"), false)
        .await;
    assert!(!envelope.ok);
    let err = envelope.err.expect("error");
    assert_eq!(err.code, "CONFLICT");
    assert!(err.msg.contains("task-001"));

    // The rejected claim must not have mutated the record.
    let blocked = store.get_task(&TaskId::from_index(2)).expect("reread");
    assert_eq!(blocked.status, TaskStatus::Pending);
    assert!(blocked.owner.is_none());
    assert!(blocked.started_at.is_none());
}

#[tokio::test]
async fn claim_on_missing_task_is_not_found() {
    let (_dir, service, _store) = fixture();
    let envelope = service
        .dispatch(&claim("session-001", "task-404"), false)
        .await;
    assert!(!envelope.ok);
    assert_eq!(envelope.err.expect("error").code, "NOTFOUND");
}

#[tokio::test]
async fn full_claim_then_complete_round_trip() {
    let (_dir, service, store) = fixture();
    store
        .create_task(&task_def("work"), TaskId::from_index(1), Vec::new())
        .expect("create");

    let claimed = service
        .dispatch(&claim("session-001", "task-001"), false)
        .await;
    assert!(claimed.ok);

    let completed = service
        .dispatch(
            &VerbRequest {
                session_id: "session-001".to_string(),
                rid: None,
                verb: Verb::CompleteTask {
                    task_id: "task-001".to_string(),
                    summary: "implemented".to_string(),
                    files_changed: vec!["src/work.rs".to_string()],
                },
            },
            false,
        )
        .await;
    assert!(completed.ok);

    let task = store.get_task(&TaskId::from_index(1)).expect("reread");
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.owner.is_none());
    assert_eq!(task.result_summary.as_deref(), Some("implemented"));
    assert_eq!(task.files_changed, vec!["src/work.rs"]);
}
