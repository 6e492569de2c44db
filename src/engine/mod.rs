//! The cycle engine: plan, execute, review and trace in parallel,
//! checkpoint, and repeat until the feature is complete, the budget is
//! gone, or a human is needed. Every transition writes RunState
//! through to disk; crash recovery is load plus an orphan sweep.

mod adapters;
mod checkpoint;
mod escalation;

pub use adapters::{CommandInvestigator, CommandTracer};
pub use checkpoint::{decide, CheckpointInput, CycleDecision, PauseCause};
pub use escalation::{
    escalate_detached, escalate_interactive, parse_choice, record_escalation, EscalationChoice,
};

use crate::budget::{BudgetMonitor, BudgetThresholds};
use crate::config::EngineConfig;
use crate::error::{ForemanError, Result};
use crate::planner::{derive_tasks, parse_task_block, PlanInput, PlannerPort};
use crate::reviewer::{DialogueResult, InvestigatorPort, ReviewerDriver};
use crate::store::ProjectStore;
use crate::supervisor::{SharedContext, WorkerSupervisor};
use crate::tracer::{render_summary, trace_flows, TracerPort};
use crate::types::{
    CycleRecord, FlowReport, KnownIssue, RiskLevel, RunState, RunStatus, Task, TaskDef,
    TaskId, TaskStatus, TaskType, WindDownReason,
};
use crate::vcs::GitRepo;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use tracing::{info, warn};

/// Rate-limited tools pause the run this long before resuming.
const RATE_LIMIT_PAUSE_HOURS: i64 = 5;
/// Respawn-check cadence, in monitor polls.
const RESPAWN_EVERY_POLLS: u64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExecOutcome {
    user_pause: bool,
    budget_pause: bool,
}

#[derive(Debug)]
enum PlanPhase {
    Ready { approved: bool, rounds: u32 },
    RateLimited,
    EscalateRecurrence(String),
}

#[derive(Debug, PartialEq, Eq)]
enum CodeReview {
    Approved { rounds: u32 },
    NotApproved { rounds: u32, feedback: Option<String> },
    RateLimited,
    EscalateRecurrence(String),
    Skipped,
}

pub struct CycleEngine {
    store: ProjectStore,
    config: EngineConfig,
    vcs: GitRepo,
    budget: BudgetMonitor,
    supervisor: WorkerSupervisor,
    planner: Box<dyn PlannerPort + Send + Sync>,
    investigator: Box<dyn InvestigatorPort + Send + Sync>,
    tracer: Box<dyn TracerPort + Send + Sync>,
    reviewer: Option<ReviewerDriver>,
    redirect: Option<String>,
    review_feedback: Option<String>,
}

impl CycleEngine {
    /// Wire the engine with command adapters from the config.
    pub fn new(store: ProjectStore, config: EngineConfig) -> Self {
        let project_dir = config.project_dir.clone();
        let planner = Box::new(crate::planner::CommandPlanner::new(
            config.tools.planner.clone(),
            &project_dir,
        ));
        let investigator = Box::new(CommandInvestigator::new(
            config.tools.investigator.clone(),
            &project_dir,
        ));
        let tracer = Box::new(CommandTracer::new(
            config.tools.tracer.clone(),
            &project_dir,
        ));
        let reviewer = (!config.skip_reviewer).then(|| {
            ReviewerDriver::new(
                config.tools.reviewer.clone(),
                &project_dir,
                config.reviewer_timeout,
                config.max_review_rounds,
            )
        });
        Self::with_ports(store, config, planner, investigator, tracer, reviewer)
    }

    /// Explicit ports, used by tests and alternative frontends.
    pub fn with_ports(
        store: ProjectStore,
        config: EngineConfig,
        planner: Box<dyn PlannerPort + Send + Sync>,
        investigator: Box<dyn InvestigatorPort + Send + Sync>,
        tracer: Box<dyn TracerPort + Send + Sync>,
        reviewer: Option<ReviewerDriver>,
    ) -> Self {
        let vcs = GitRepo::new(&config.project_dir);
        let budget = BudgetMonitor::new(
            BudgetThresholds {
                wind_down: config.wind_down_threshold,
                critical: config.critical_threshold,
                resume: config.resume_threshold,
            },
            config.usage_url.clone(),
            config.usage_token.clone(),
        );
        let supervisor = WorkerSupervisor::new(store.clone(), config.clone());
        Self {
            store,
            config,
            vcs,
            budget,
            supervisor,
            planner,
            investigator,
            tracer,
            reviewer,
            redirect: None,
            review_feedback: None,
        }
    }

    /// Drive the run to a terminal state, a pause, or an escalation.
    pub async fn run(&mut self) -> Result<()> {
        let mut state = self.store.read_state()?;
        if state.status.is_terminal() {
            return Err(ForemanError::Conflict(format!(
                "run is already {}",
                state.status
            )));
        }
        if state.status == RunStatus::Paused {
            info!("resuming paused run");
            state.clear_pause();
        }
        if state.status == RunStatus::Escalated {
            // Escalation records exist iff the run is escalated.
            self.store.clear_escalation()?;
        }

        if state.status == RunStatus::Initializing {
            state.transition(RunStatus::Questioning);
            self.store.save_state(&state)?;
        }

        let extra_rules = match &self.config.context_file {
            Some(path) => Some(tokio::fs::read_to_string(path).await.map_err(|err| {
                ForemanError::ConfigError(format!(
                    "context file {}: {err}",
                    path.display()
                ))
            })?),
            None => None,
        };
        let shared = SharedContext::gather(&self.store, &state.feature, extra_rules)?;

        self.budget
            .start(self.config.usage_poll_interval, |level, snapshot| {
                warn!(?level, utilization = snapshot.utilization, "usage threshold crossed");
            });

        // Resume semantics: open tasks mean execution picks up where it
        // stopped; planning is skipped for that first cycle.
        let mut skip_planning = self.store.list_tasks(None)?.iter().any(Task::is_open);

        loop {
            let cycle = state.current_cycle + 1;
            if cycle > state.max_cycles {
                match self.escalate_with_choice(
                    &mut state,
                    "cycle cap reached",
                    "no cycles remain",
                ).await? {
                    EscalationFlow::Stop => return Ok(()),
                    EscalationFlow::Continue => continue,
                }
            }
            let cycle_started = Utc::now();
            self.log(&format!("cycle {cycle} started"));

            let (plan_version, plan_approved, plan_rounds) = if skip_planning {
                info!(cycle, "open tasks present; skipping planning");
                (state.plan_version(), true, 0)
            } else {
                state.transition(RunStatus::Planning);
                self.store.save_state(&state)?;
                match self.plan_phase(&mut state, cycle).await {
                    Ok(PlanPhase::Ready { approved, rounds }) => (cycle, approved, rounds),
                    Ok(PlanPhase::RateLimited) => {
                        return self.pause_for_rate_limit(&mut state);
                    }
                    Ok(PlanPhase::EscalateRecurrence(issue)) => {
                        match self.escalate_with_choice(
                            &mut state,
                            "plan review disagreement",
                            &issue,
                        ).await? {
                            EscalationFlow::Stop => return Ok(()),
                            EscalationFlow::Continue => continue,
                        }
                    }
                    Err(ForemanError::PlanError(message)) => {
                        self.log(&format!("planning failed: {message}"));
                        match self.escalate_with_choice(
                            &mut state,
                            "planning failed",
                            &message,
                        ).await? {
                            EscalationFlow::Stop => return Ok(()),
                            EscalationFlow::Continue => continue,
                        }
                    }
                    Err(err) => return Err(err),
                }
            };
            skip_planning = false;

            state.transition(RunStatus::Executing);
            self.store.save_state(&state)?;
            let exec = self.execute_phase(&mut state, &shared).await?;

            state.transition(RunStatus::Reviewing);
            self.store.save_state(&state)?;
            let (code_review, flow_report) = self.review_and_trace(cycle).await?;

            match &code_review {
                CodeReview::RateLimited => {
                    state.reviewer_metrics.presumed_rate_limits += 1;
                    return self.pause_for_rate_limit(&mut state);
                }
                CodeReview::EscalateRecurrence(issue) => {
                    let issue = issue.clone();
                    match self.escalate_with_choice(
                        &mut state,
                        "code review disagreement",
                        &issue,
                    ).await? {
                        EscalationFlow::Stop => return Ok(()),
                        EscalationFlow::Continue => continue,
                    }
                }
                CodeReview::NotApproved { feedback, .. } => {
                    self.review_feedback.clone_from(feedback);
                }
                CodeReview::Approved { .. } | CodeReview::Skipped => {
                    self.review_feedback = None;
                }
            }

            state.transition(RunStatus::FlowTracing);
            self.store.save_state(&state)?;
            self.reconcile_known_issues(cycle, flow_report.as_ref())?;

            state.transition(RunStatus::Checkpointing);
            self.store.save_state(&state)?;
            if let Err(err) = self.vcs.commit_all(&format!("checkpoint: cycle {cycle}")).await {
                warn!(error = %err, "checkpoint commit failed; continuing");
            }

            let tasks = self.store.list_tasks(None)?;
            let remaining = tasks.iter().filter(|task| task.is_open()).count() as u32;
            let failed = tasks
                .iter()
                .filter(|task| task.status == TaskStatus::Failed)
                .count() as u32;
            let completed_this_cycle = tasks
                .iter()
                .filter(|task| {
                    task.completed_at
                        .is_some_and(|completed| completed >= cycle_started)
                })
                .count() as u32;

            let (code_approved, code_rounds) = match &code_review {
                CodeReview::Approved { rounds } => (true, *rounds),
                CodeReview::NotApproved { rounds, .. } => (false, *rounds),
                CodeReview::Skipped => (true, 0),
                CodeReview::RateLimited | CodeReview::EscalateRecurrence(_) => (false, 0),
            };

            let decision = decide(&CheckpointInput {
                user_pause_requested: exec.user_pause,
                budget_wind_down: exec.budget_pause,
                flow_summary: flow_report.as_ref().map(|report| report.summary.clone()),
                code_approved,
                remaining_tasks: remaining,
                failed_tasks: failed,
                current_cycle: state.current_cycle,
                max_cycles: state.max_cycles,
            });

            state.cycle_history.push(CycleRecord {
                index: cycle,
                plan_version,
                tasks_completed: completed_this_cycle,
                tasks_failed: failed,
                plan_approved,
                code_approved,
                plan_rounds,
                code_rounds,
                duration_secs: (Utc::now() - cycle_started).num_seconds(),
                started_at: cycle_started,
                ended_at: Utc::now(),
                flow_summary: flow_report
                    .as_ref()
                    .map(|report| serde_json::to_value(&report.summary))
                    .transpose()?,
            });
            state.current_cycle = cycle;
            state.reviewer_metrics.plan_rounds_total += plan_rounds;
            state.reviewer_metrics.code_rounds_total += code_rounds;
            self.store.save_state(&state)?;

            if let Some(report) = &flow_report {
                let created = self.fix_tasks_from_findings(report)?;
                if created > 0 {
                    info!(created, "fix tasks appended from flow findings");
                }
            }

            self.log(&format!(
                "cycle {cycle} checkpoint: {decision:?}, completed={completed_this_cycle}, remaining={remaining}, failed={failed}"
            ));

            match decision {
                CycleDecision::Continue => {}
                CycleDecision::Complete => {
                    state.transition(RunStatus::Completed);
                    self.store.save_state(&state)?;
                    info!(cycles = state.current_cycle, "run completed");
                    return Ok(());
                }
                CycleDecision::Pause(PauseCause::UserRequested) => {
                    return self.pause_run(&mut state, Utc::now());
                }
                CycleDecision::Pause(PauseCause::Budget) => {
                    let resume_after = self
                        .budget
                        .snapshot()
                        .and_then(|snapshot| snapshot.resets_at)
                        .unwrap_or_else(|| {
                            Utc::now() + ChronoDuration::hours(RATE_LIMIT_PAUSE_HOURS)
                        });
                    return self.pause_run(&mut state, resume_after);
                }
                CycleDecision::Escalate => {
                    match self.escalate_with_choice(
                        &mut state,
                        "cycle cap reached",
                        &format!("{remaining} task(s) remain after cycle {cycle}"),
                    ).await? {
                        EscalationFlow::Stop => return Ok(()),
                        EscalationFlow::Continue => {}
                    }
                }
            }
        }
    }

    async fn plan_phase(&mut self, state: &mut RunState, cycle: u32) -> Result<PlanPhase> {
        let previous_plan = if cycle > 1 {
            self.store.read_plan(state.plan_version())?
        } else {
            None
        };
        let input = PlanInput {
            feature: state.feature.clone(),
            qa_transcript: None,
            previous_plan,
            completed_tasks: self.store.list_tasks(Some(TaskStatus::Completed))?,
            failed_tasks: self.store.list_tasks(Some(TaskStatus::Failed))?,
            reviewer_feedback: self.review_feedback.take(),
            unresolved_issues: self.store.unresolved_known_issues()?,
            redirect: self.redirect.take(),
        };

        let plan_text = self.planner.plan(&input.render()).await?;
        self.store.save_plan(cycle, &plan_text)?;
        let defs = parse_task_block(&plan_text)?;
        let tasks = derive_tasks(&self.store, &defs)?;
        info!(cycle, tasks = tasks.len(), "plan persisted and tasks created");

        let Some(reviewer) = &self.reviewer else {
            return Ok(PlanPhase::Ready {
                approved: true,
                rounds: 0,
            });
        };

        let prompt = format!(
            "Review this implementation plan for the feature below. Respond with the \
             structured verdict JSON.\n\n# Feature\n{}\n\n# Plan\n{plan_text}",
            state.feature
        );
        match reviewer
            .dialogue("plan", &prompt, self.investigator.as_ref())
            .await
        {
            Ok(DialogueResult::Approved { rounds }) => Ok(PlanPhase::Ready {
                approved: true,
                rounds,
            }),
            Ok(DialogueResult::Unresolved { rounds, .. }) => Ok(PlanPhase::Ready {
                approved: false,
                rounds,
            }),
            Ok(DialogueResult::Error { rounds }) => {
                state.reviewer_metrics.no_verdicts += 1;
                Ok(PlanPhase::Ready {
                    approved: false,
                    rounds,
                })
            }
            Ok(DialogueResult::RateLimited { .. }) => {
                state.reviewer_metrics.presumed_rate_limits += 1;
                Ok(PlanPhase::RateLimited)
            }
            Ok(DialogueResult::EscalateRecurrence { issue, .. }) => {
                Ok(PlanPhase::EscalateRecurrence(issue.to_string()))
            }
            Err(ForemanError::ToolMissing(tool)) => {
                warn!(tool = %tool, "reviewer not installed; skipping plan review");
                Ok(PlanPhase::Ready {
                    approved: true,
                    rounds: 0,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Execute until the board drains or a wind-down condition hits.
    async fn execute_phase(
        &mut self,
        state: &mut RunState,
        shared: &SharedContext,
    ) -> Result<ExecOutcome> {
        self.supervisor.sweep_orphans()?;

        let pending = self.store.list_tasks(Some(TaskStatus::Pending))?.len() as u32;
        if pending > 0 {
            let count = self.config.concurrency.min(pending);
            self.supervisor.spawn_workers(shared, count)?;
            self.supervisor.spawn_sentinel(shared)?;
        }
        state.active_sessions = self.supervisor.active_sessions();
        self.store.save_state(state)?;

        let mut user_pause = false;
        let mut budget_pause = false;
        let mut polls: u64 = 0;

        loop {
            tokio::time::sleep(self.config.monitor_poll_interval).await;
            polls += 1;

            let open = self
                .store
                .list_tasks(None)?
                .iter()
                .filter(|task| task.is_open())
                .count();
            if open == 0 {
                info!("task board drained");
                break;
            }

            let signal = self.store.pause_signal_present();
            let over_budget = self.budget.is_critical() || self.budget.is_wind_down();
            if signal || over_budget {
                if signal {
                    self.store.consume_pause_signal()?;
                    user_pause = true;
                }
                budget_pause = over_budget;
                // User request outranks the budget for the recorded reason.
                let reason = if user_pause {
                    WindDownReason::UserRequested
                } else {
                    WindDownReason::UsageLimit
                };
                let resets_at = over_budget
                    .then(|| self.budget.snapshot().and_then(|s| s.resets_at))
                    .flatten();
                if let Err(err) = self.supervisor.broadcast_wind_down(reason, resets_at) {
                    warn!(error = %err, "wind-down broadcast failed");
                }
                self.supervisor
                    .wait_for_drain(self.config.wind_down_grace)
                    .await;
                break;
            }

            // Orphans must be reclaimable within one poll of their
            // owner dying, so the sweep runs every iteration; respawn
            // is cheap to check alongside it.
            self.supervisor.sweep_orphans()?;
            if polls % RESPAWN_EVERY_POLLS == 0 {
                self.supervisor.respawn_if_needed(shared)?;
            }
        }

        if !user_pause && !budget_pause {
            // Clean drain: tell the sentinel (and any idle workers) to
            // finish up; they terminate on the wind-down broadcast.
            if let Err(err) = self
                .supervisor
                .broadcast_wind_down(WindDownReason::CycleLimit, None)
            {
                warn!(error = %err, "wind-down broadcast failed");
            }
            self.supervisor
                .wait_for_drain(self.config.wind_down_grace)
                .await;
        }

        self.supervisor.sweep_orphans()?;
        state.last_usage = self.budget.snapshot();
        state.active_sessions.clear();
        self.store.save_state(state)?;

        Ok(ExecOutcome {
            user_pause,
            budget_pause,
        })
    }

    /// Code review and flow tracing run concurrently over the same
    /// diff; both are read-only.
    async fn review_and_trace(&self, cycle: u32) -> Result<(CodeReview, Option<FlowReport>)> {
        let base = {
            let state = self.store.read_state()?;
            state.base_commit
        };
        let (diff, changed_files) = match (
            self.vcs.diff_against(&base).await,
            self.vcs.changed_files(&base).await,
        ) {
            (Ok(diff), Ok(files)) => (diff, files),
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "diff unavailable; skipping review and tracing");
                return Ok((CodeReview::Skipped, None));
            }
        };
        if changed_files.is_empty() {
            info!("no changes since base; skipping review and tracing");
            return Ok((CodeReview::Skipped, None));
        }

        let review_future = async {
            let Some(reviewer) = &self.reviewer else {
                return CodeReview::Skipped;
            };
            let prompt = format!(
                "Review this diff for correctness, security, and contract violations. \
                 Respond with the structured verdict JSON.\n\n# Changed files\n{}\n\n# Diff\n{diff}",
                changed_files.join("\n")
            );
            match reviewer
                .dialogue("code", &prompt, self.investigator.as_ref())
                .await
            {
                Ok(DialogueResult::Approved { rounds }) => CodeReview::Approved { rounds },
                Ok(DialogueResult::Unresolved { rounds, last }) => {
                    let feedback = match last {
                        crate::types::ReviewOutcome::Verdict(parsed) => Some(
                            parsed
                                .issues
                                .iter()
                                .map(ToString::to_string)
                                .collect::<Vec<_>>()
                                .join("\n"),
                        ),
                        _ => None,
                    };
                    CodeReview::NotApproved { rounds, feedback }
                }
                Ok(DialogueResult::Error { rounds }) => CodeReview::NotApproved {
                    rounds,
                    feedback: None,
                },
                Ok(DialogueResult::RateLimited { .. }) => CodeReview::RateLimited,
                Ok(DialogueResult::EscalateRecurrence { issue, .. }) => {
                    CodeReview::EscalateRecurrence(issue.to_string())
                }
                Err(ForemanError::ToolMissing(tool)) => {
                    warn!(tool = %tool, "reviewer not installed; skipping code review");
                    CodeReview::Skipped
                }
                Err(err) => {
                    warn!(error = %err, "code review failed; treating as skipped");
                    CodeReview::Skipped
                }
            }
        };

        let trace_future = async {
            if self.config.skip_flow_review {
                return None;
            }
            match trace_flows(
                self.tracer.as_ref(),
                cycle,
                &diff,
                &changed_files,
                self.config.max_flows,
                self.config.tracer_parallelism,
            )
            .await
            {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!(error = %err, "flow tracing failed; skipping");
                    None
                }
            }
        };

        let (code_review, flow_report) = tokio::join!(review_future, trace_future);

        if let Some(report) = &flow_report {
            self.store.save_flow_report(report)?;
            self.log(&render_summary(report));
        }

        // Semgrep rides along as an extra findings source when configured.
        if let Some(config) = self.config.tools.semgrep_config.clone() {
            match crate::analysis::run_semgrep(
                self.store.project_dir(),
                &config,
                &changed_files,
                cycle,
            )
            .await
            {
                Ok(entrants) => {
                    self.store.add_known_issues(entrants)?;
                }
                Err(ForemanError::ToolMissing(tool)) => {
                    warn!(tool = %tool, "semgrep not installed; skipping static analysis");
                }
                Err(err) => warn!(error = %err, "semgrep run failed; skipping"),
            }
        }

        Ok((code_review, flow_report))
    }

    /// Feed tracer findings into the registry, and mark unresolved
    /// flow issues addressed when a later cycle stops reporting them.
    fn reconcile_known_issues(&self, cycle: u32, report: Option<&FlowReport>) -> Result<()> {
        let Some(report) = report else {
            return Ok(());
        };

        let entrants: Vec<KnownIssue> = report
            .findings
            .iter()
            .map(|finding| KnownIssue::from_flow_finding(finding, cycle))
            .collect();
        let current_keys: HashSet<String> =
            entrants.iter().map(KnownIssue::dedup_key).collect();
        self.store.add_known_issues(entrants)?;

        let resolved: Vec<String> = self
            .store
            .unresolved_known_issues()?
            .into_iter()
            .filter(|issue| {
                issue.source == crate::types::IssueSource::FlowTracing
                    && issue.cycle_found < cycle
                    && !current_keys.contains(&issue.dedup_key())
            })
            .map(|issue| issue.id)
            .collect();
        if !resolved.is_empty() {
            info!(resolved = resolved.len(), cycle, "flow issues no longer reported; marking addressed");
            self.store.mark_issues_addressed(&resolved, cycle)?;
        }
        Ok(())
    }

    /// Critical and high findings each become a pending security task.
    fn fix_tasks_from_findings(&self, report: &FlowReport) -> Result<u32> {
        let existing_subjects: HashSet<String> = self
            .store
            .list_tasks(None)?
            .into_iter()
            .map(|task| task.subject)
            .collect();

        let mut created = 0;
        for finding in report
            .findings
            .iter()
            .filter(|finding| finding.severity.is_actionable())
        {
            let subject = format!("Resolve finding: {} ({})", finding.title, finding.file_path);
            if existing_subjects.contains(&subject) {
                continue;
            }
            let location = finding
                .line
                .map_or_else(|| finding.file_path.clone(), |line| {
                    format!("{}:{line}", finding.file_path)
                });
            let def = TaskDef {
                subject,
                description: format!(
                    "Flow tracing reported a {} severity finding at {location}:\n{}\n\n{}",
                    finding.severity, finding.title, finding.description
                ),
                task_type: TaskType::Security,
                depends_on_subjects: Vec::new(),
                security_requirements: Vec::new(),
                performance_requirements: Vec::new(),
                acceptance_criteria: vec!["the finding is resolved".to_string()],
                risk_level: if finding.severity == crate::types::Severity::Critical {
                    RiskLevel::High
                } else {
                    RiskLevel::Medium
                },
            };
            let id = TaskId::from_index(self.store.next_task_index()?);
            self.store.create_task(&def, id, Vec::new())?;
            created += 1;
        }
        Ok(created)
    }

    fn pause_for_rate_limit(&mut self, state: &mut RunState) -> Result<()> {
        let resume_after = Utc::now() + ChronoDuration::hours(RATE_LIMIT_PAUSE_HOURS);
        info!(%resume_after, "external tool rate-limited; pausing run");
        self.pause_run(state, resume_after)
    }

    fn pause_run(&mut self, state: &mut RunState, resume_after: chrono::DateTime<Utc>) -> Result<()> {
        self.budget.stop();
        state.pause(Some(resume_after));
        self.store.save_state(state)?;
        self.log(&format!(
            "paused until {resume_after}; resume with `foreman resume`"
        ));
        Ok(())
    }

    /// Best-effort engine log line; never fatal.
    fn log(&self, line: &str) {
        if let Err(err) = self.store.append_engine_log(line) {
            warn!(error = %err, "engine log write failed");
        }
    }

    async fn escalate_with_choice(
        &mut self,
        state: &mut RunState,
        reason: &str,
        details: &str,
    ) -> Result<EscalationFlow> {
        state.transition(RunStatus::Escalated);
        self.store.save_state(state)?;

        if !self.config.interactive {
            return escalate_detached(&self.store, reason, details).map(|()| EscalationFlow::Stop);
        }

        match escalate_interactive(&self.store, reason, details)? {
            EscalationChoice::Continue => {
                self.store.clear_escalation()?;
                state.max_cycles = state.max_cycles.max(state.current_cycle + 2);
                state.transition(RunStatus::Planning);
                self.store.save_state(state)?;
                Ok(EscalationFlow::Continue)
            }
            EscalationChoice::Redirect(text) => {
                self.redirect = Some(text);
                self.store.clear_escalation()?;
                state.max_cycles = state.max_cycles.max(state.current_cycle + 2);
                state.transition(RunStatus::Planning);
                self.store.save_state(state)?;
                Ok(EscalationFlow::Continue)
            }
            EscalationChoice::Stop => {
                state.transition(RunStatus::Completed);
                self.store.save_state(state)?;
                if let Err(err) = self.vcs.commit_all("stop requested at escalation").await {
                    warn!(error = %err, "final commit failed");
                }
                Ok(EscalationFlow::Stop)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscalationFlow {
    Continue,
    Stop,
}
