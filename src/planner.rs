//! Planning: invoke the opaque planning tool, persist the plan text,
//! and derive task records from its fenced task block. Prompt content
//! is the tool's concern; this module owns the task derivation rules.

use crate::error::{ForemanError, Result};
use crate::store::ProjectStore;
use crate::types::{KnownIssue, Task, TaskDef, TaskId};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub type PlanFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Port for the planning tool: input document in, plan text out.
pub trait PlannerPort: Sync {
    fn plan<'a>(&'a self, input: &'a str) -> PlanFuture<'a>;
}

/// What the planner gets to work from. On cycle 1 only the feature and
/// Q&A; on replans also the previous plan, task outcomes, reviewer
/// feedback, and unresolved known issues.
#[derive(Debug, Clone, Default)]
pub struct PlanInput {
    pub feature: String,
    pub qa_transcript: Option<String>,
    pub previous_plan: Option<String>,
    pub completed_tasks: Vec<Task>,
    pub failed_tasks: Vec<Task>,
    pub reviewer_feedback: Option<String>,
    pub unresolved_issues: Vec<KnownIssue>,
    pub redirect: Option<String>,
}

impl PlanInput {
    /// Assemble the planner's input document. Sections are plain
    /// markdown; the planning tool owns everything beyond structure.
    #[must_use]
    pub fn render(&self) -> String {
        let mut doc = format!("# Feature\n{}\n", self.feature);
        if let Some(qa) = &self.qa_transcript {
            doc.push_str(&format!("\n# Q&A\n{qa}\n"));
        }
        if let Some(previous) = &self.previous_plan {
            doc.push_str(&format!("\n# Previous plan\n{previous}\n"));
        }
        if !self.completed_tasks.is_empty() {
            doc.push_str("\n# Completed tasks\n");
            for task in &self.completed_tasks {
                doc.push_str(&format!(
                    "- {} ({})\n",
                    task.subject,
                    task.result_summary.as_deref().unwrap_or("no summary")
                ));
            }
        }
        if !self.failed_tasks.is_empty() {
            doc.push_str("\n# Failed tasks\n");
            for task in &self.failed_tasks {
                doc.push_str(&format!(
                    "- {} ({})\n",
                    task.subject,
                    task.result_summary.as_deref().unwrap_or("no summary")
                ));
            }
        }
        if let Some(feedback) = &self.reviewer_feedback {
            doc.push_str(&format!("\n# Reviewer feedback\n{feedback}\n"));
        }
        if !self.unresolved_issues.is_empty() {
            doc.push_str("\n# Unresolved known issues\n");
            for issue in &self.unresolved_issues {
                doc.push_str(&format!(
                    "- [{}] {} ({})\n",
                    issue.severity,
                    issue.description,
                    issue.file_path.as_deref().unwrap_or("no file")
                ));
            }
        }
        if let Some(redirect) = &self.redirect {
            doc.push_str(&format!("\n# Redirect from operator\n{redirect}\n"));
        }
        doc
    }
}

#[derive(Debug, Deserialize)]
struct TaskBlock {
    tasks: Vec<TaskDef>,
}

/// Extract the fenced task block from plan text. No block is fatal for
/// the cycle: the engine records the failure and escalates.
pub fn parse_task_block(plan_text: &str) -> Result<Vec<TaskDef>> {
    let mut rest = plan_text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        let Some(close) = body.find("```") else { break };
        let candidate = body[..close].trim();
        if let Ok(block) = serde_json::from_str::<TaskBlock>(candidate) {
            if !block.tasks.is_empty() {
                return Ok(block.tasks);
            }
        }
        rest = &body[close + 3..];
    }
    Err(ForemanError::PlanError(
        "planner produced no task block".to_string(),
    ))
}

/// Assign monotone ids in declaration order and resolve
/// `depends_on_subjects` to ids. Unresolved subjects are dropped with
/// a warning rather than failing the plan.
pub fn derive_tasks(store: &ProjectStore, defs: &[TaskDef]) -> Result<Vec<Task>> {
    let first_index = store.next_task_index()?;

    let mut id_by_subject: HashMap<&str, TaskId> = HashMap::new();
    for (offset, def) in defs.iter().enumerate() {
        id_by_subject.insert(
            def.subject.as_str(),
            TaskId::from_index(first_index + offset as u32),
        );
    }
    // Earlier cycles' tasks are valid dependency targets too.
    let existing = store.list_tasks(None)?;
    let existing_by_subject: HashMap<String, TaskId> = existing
        .iter()
        .map(|task| (task.subject.clone(), task.id.clone()))
        .collect();

    let mut tasks = Vec::new();
    for (offset, def) in defs.iter().enumerate() {
        let id = TaskId::from_index(first_index + offset as u32);
        let mut depends_on = Vec::new();
        for subject in &def.depends_on_subjects {
            let resolved = id_by_subject
                .get(subject.as_str())
                .cloned()
                .or_else(|| existing_by_subject.get(subject).cloned());
            match resolved {
                Some(dep_id) if dep_id != id => depends_on.push(dep_id),
                Some(_) => warn!(subject = %subject, "task depends on itself; dropping edge"),
                None => {
                    warn!(subject = %subject, task = %id, "unresolved dependency subject dropped");
                }
            }
        }
        tasks.push(store.create_task(def, id, depends_on)?);
    }

    debug!(created = tasks.len(), "tasks derived from plan");
    Ok(tasks)
}

/// Planner adapter that shells out to a configured command, writing
/// the input document to stdin and reading the plan from stdout.
#[derive(Debug, Clone)]
pub struct CommandPlanner {
    command: String,
    project_dir: PathBuf,
}

impl CommandPlanner {
    #[must_use]
    pub fn new(command: String, project_dir: &Path) -> Self {
        Self {
            command,
            project_dir: project_dir.to_path_buf(),
        }
    }
}

impl PlannerPort for CommandPlanner {
    fn plan<'a>(&'a self, input: &'a str) -> PlanFuture<'a> {
        Box::pin(async move {
            let mut child = tokio::process::Command::new("bash")
                .arg("-lc")
                .arg(&self.command)
                .current_dir(&self.project_dir)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|err| match err.kind() {
                    std::io::ErrorKind::NotFound => {
                        ForemanError::ToolMissing(self.command.clone())
                    }
                    _ => ForemanError::IoError(err),
                })?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
                drop(stdin);
            }

            let output = child.wait_with_output().await?;
            if !output.status.success() {
                return Err(ForemanError::PlanError(format!(
                    "planner exited {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{derive_tasks, parse_task_block, PlanInput};
    use crate::store::ProjectStore;
    use crate::types::{RunState, TaskId, TaskStatus};

    const PLAN: &str = r#"# Plan

Some prose about the approach.

```json
{
  "tasks": [
    {"subject": "schema", "description": "create tables", "task_type": "database"},
    {"subject": "api", "description": "crud endpoints", "task_type": "backend_api",
     "depends_on_subjects": ["schema"]},
    {"subject": "ui", "description": "forms", "task_type": "frontend_ui",
     "depends_on_subjects": ["api", "nonexistent"]}
  ]
}
```
"#;

    fn store() -> (tempfile::TempDir, ProjectStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = RunState::new("feature", "branch", "abc", 5, 3);
        let store = ProjectStore::init(dir.path(), &state).expect("init");
        (dir, store)
    }

    #[test]
    fn task_block_parses_from_fenced_json() {
        let defs = parse_task_block(PLAN).expect("parse");
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[0].subject, "schema");
        assert_eq!(defs[1].depends_on_subjects, vec!["schema"]);
    }

    #[test]
    fn missing_task_block_is_a_plan_error() {
        let err = parse_task_block("# Plan with no block\njust prose\n");
        assert!(matches!(
            err,
            Err(crate::error::ForemanError::PlanError(_))
        ));
        let empty = parse_task_block("```json\n{\"tasks\": []}\n```\n");
        assert!(empty.is_err());
    }

    #[test]
    fn derive_assigns_monotone_ids_and_resolves_subjects() {
        let (_dir, store) = store();
        let defs = parse_task_block(PLAN).expect("parse");
        let tasks = derive_tasks(&store, &defs).expect("derive");

        assert_eq!(
            tasks.iter().map(|t| t.id.value()).collect::<Vec<_>>(),
            vec!["task-001", "task-002", "task-003"]
        );
        assert_eq!(tasks[1].depends_on, vec![TaskId::from_index(1)]);
        // The unresolved "nonexistent" subject is dropped, leaving api.
        assert_eq!(tasks[2].depends_on, vec![TaskId::from_index(2)]);

        let schema = store.get_task(&TaskId::from_index(1)).expect("get");
        assert_eq!(schema.blocks, vec![TaskId::from_index(2)]);
    }

    #[test]
    fn derive_continues_numbering_across_cycles() {
        let (_dir, store) = store();
        let defs = parse_task_block(PLAN).expect("parse");
        derive_tasks(&store, &defs).expect("first derive");

        let fix_defs = vec![crate::types::TaskDef {
            subject: "fix finding".to_string(),
            description: "resolve".to_string(),
            task_type: crate::types::TaskType::Security,
            depends_on_subjects: vec!["api".to_string()],
            security_requirements: Vec::new(),
            performance_requirements: Vec::new(),
            acceptance_criteria: Vec::new(),
            risk_level: crate::types::RiskLevel::High,
        }];
        let fixes = derive_tasks(&store, &fix_defs).expect("second derive");
        assert_eq!(fixes[0].id.value(), "task-004");
        // Cross-cycle subject resolution.
        assert_eq!(fixes[0].depends_on, vec![TaskId::from_index(2)]);
        assert_eq!(fixes[0].status, TaskStatus::Pending);
    }

    #[test]
    fn plan_input_renders_replan_sections() {
        let (_dir, store) = store();
        let defs = parse_task_block(PLAN).expect("parse");
        let tasks = derive_tasks(&store, &defs).expect("derive");

        let input = PlanInput {
            feature: "checkout".to_string(),
            qa_transcript: Some("Q: scope? A: minimal".to_string()),
            previous_plan: Some("old plan".to_string()),
            completed_tasks: vec![tasks[0].clone()],
            failed_tasks: vec![tasks[1].clone()],
            reviewer_feedback: Some("[major] missing tests".to_string()),
            unresolved_issues: Vec::new(),
            redirect: None,
        };
        let doc = input.render();
        assert!(doc.contains("# Feature\ncheckout"));
        assert!(doc.contains("# Previous plan"));
        assert!(doc.contains("# Completed tasks"));
        assert!(doc.contains("# Failed tasks"));
        assert!(doc.contains("# Reviewer feedback"));
        assert!(!doc.contains("# Unresolved known issues"));
    }
}
