use crate::cli::{Cli, Commands, OutputFormat};
use crate::output::emit_output;
use clap::Parser;
use foreman::config::EngineConfig;
use foreman::coordination::{run_serve_loop, CoordinationService};
use foreman::engine::CycleEngine;
use foreman::store::ProjectStore;
use foreman::types::{RunState, TaskStatus};
use foreman::vcs::GitRepo;
use foreman::{ForemanError, Result};
use serde_json::json;
use std::path::PathBuf;
use tracing::warn;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    dispatch(cli).await
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start {
            ref feature,
            concurrency,
            max_cycles,
            usage_threshold,
            skip_codex,
            skip_flow_review,
            dry_run,
            ref context_file,
            current_branch,
            interactive,
        } => {
            let feature = feature.clone();
            let context_file = context_file.clone();
            start_command(
                &cli,
                StartArgs {
                    feature,
                    concurrency,
                    max_cycles,
                    usage_threshold,
                    skip_codex,
                    skip_flow_review,
                    dry_run,
                    context_file,
                    current_branch,
                    interactive,
                },
            )
            .await
        }
        Commands::Status => status_command(&cli),
        Commands::Resume {
            concurrency,
            max_cycles,
            usage_threshold,
            skip_codex,
            skip_flow_review,
            ref context_file,
            interactive,
        } => {
            let context_file = context_file.clone();
            resume_command(
                &cli,
                concurrency,
                max_cycles,
                usage_threshold,
                skip_codex,
                skip_flow_review,
                context_file,
                interactive,
            )
            .await
        }
        Commands::Pause => pause_command(&cli),
        Commands::Log { lines } => log_command(&cli, lines),
        Commands::Serve => serve_command(&cli).await,
        Commands::Doctor => doctor_command(&cli).await,
    }
}

struct StartArgs {
    feature: String,
    concurrency: u32,
    max_cycles: u32,
    usage_threshold: Option<f64>,
    skip_codex: bool,
    skip_flow_review: bool,
    dry_run: bool,
    context_file: Option<PathBuf>,
    current_branch: bool,
    interactive: bool,
}

async fn build_config(cli: &Cli, args: &StartArgs) -> Result<EngineConfig> {
    let mut config = EngineConfig::new(cli.project.clone())
        .with_config_file()
        .await?;
    config.concurrency = args.concurrency;
    config.max_cycles = args.max_cycles;
    if let Some(threshold) = args.usage_threshold {
        config.wind_down_threshold = threshold;
    }
    config.skip_reviewer = args.skip_codex;
    config.skip_flow_review = args.skip_flow_review;
    config.context_file = args.context_file.clone();
    config.current_branch = args.current_branch;
    config.interactive = args.interactive;
    Ok(config)
}

fn branch_slug(feature: &str) -> String {
    let slug: String = feature
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .take(5)
        .collect::<Vec<_>>()
        .join("-");
    format!("foreman/{slug}")
}

async fn start_command(cli: &Cli, args: StartArgs) -> Result<()> {
    let config = build_config(cli, &args).await?;

    if args.dry_run {
        emit_output(
            &cli.output,
            "start",
            json!({
                "dry": true,
                "would_do": [
                    {"step": "create branch", "branch": branch_slug(&args.feature)},
                    {"step": "init store", "dir": cli.project.join(".foreman").display().to_string()},
                    {"step": "plan", "planner": config.tools.planner},
                    {"step": "execute", "concurrency": config.concurrency},
                ],
                "reversible": true,
            }),
        );
        return Ok(());
    }

    let vcs = GitRepo::new(&cli.project);
    if vcs.is_detached_head().await? {
        return Err(ForemanError::ConfigError(
            "repository is in detached HEAD state; check out a branch first".to_string(),
        ));
    }
    let base_commit = vcs.head_sha().await?;
    let branch = if args.current_branch {
        vcs.current_branch().await?
    } else {
        let name = branch_slug(&args.feature);
        vcs.create_branch(&name).await?;
        name
    };

    let state = RunState::new(
        &args.feature,
        &branch,
        &base_commit,
        args.max_cycles,
        args.concurrency,
    );
    let store = ProjectStore::init(&cli.project, &state)?;
    store.append_engine_log(&format!("run started on {branch} (base {base_commit})"))?;

    let mut engine = CycleEngine::new(store, config);
    engine.run().await?;
    emit_output(&cli.output, "start", json!({"message": "run finished"}));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn resume_command(
    cli: &Cli,
    concurrency: Option<u32>,
    max_cycles: Option<u32>,
    usage_threshold: Option<f64>,
    skip_codex: bool,
    skip_flow_review: bool,
    context_file: Option<PathBuf>,
    interactive: bool,
) -> Result<()> {
    let store = ProjectStore::load(&cli.project)?;
    let mut state = store.read_state()?;

    if let Some(resume_after) = state.resume_after {
        if chrono::Utc::now() < resume_after {
            warn!(%resume_after, "resuming before the recorded resume time");
        }
    }

    let mut config = EngineConfig::new(cli.project.clone())
        .with_config_file()
        .await?;
    config.concurrency = concurrency.unwrap_or(state.concurrency);
    config.max_cycles = max_cycles.unwrap_or(state.max_cycles);
    if let Some(threshold) = usage_threshold {
        config.wind_down_threshold = threshold;
    }
    config.skip_reviewer = skip_codex;
    config.skip_flow_review = skip_flow_review;
    config.context_file = context_file;
    config.interactive = interactive;

    state.concurrency = config.concurrency;
    state.max_cycles = config.max_cycles;
    store.save_state(&state)?;
    store.append_engine_log("run resumed")?;

    let mut engine = CycleEngine::new(store, config);
    engine.run().await?;
    emit_output(&cli.output, "resume", json!({"message": "run finished"}));
    Ok(())
}

fn status_command(cli: &Cli) -> Result<()> {
    let store = ProjectStore::load(&cli.project)?;
    let state = store.read_state()?;
    let tasks = store.list_tasks(None)?;

    let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
    let sessions = store.list_session_statuses()?;
    let unresolved = store.unresolved_known_issues()?.len();

    emit_output(
        &cli.output,
        "status",
        json!({
            "status": state.status.as_str(),
            "feature": state.feature,
            "branch": state.branch,
            "cycle": state.current_cycle,
            "max_cycles": state.max_cycles,
            "paused_at": state.paused_at,
            "resume_after": state.resume_after,
            "tasks": {
                "pending": count(TaskStatus::Pending),
                "in_progress": count(TaskStatus::InProgress),
                "completed": count(TaskStatus::Completed),
                "failed": count(TaskStatus::Failed),
            },
            "sessions": sessions
                .iter()
                .map(|s| json!({"id": s.session_id.value(), "state": s.state.as_str()}))
                .collect::<Vec<_>>(),
            "unresolved_known_issues": unresolved,
            "message": format!(
                "{}: cycle {}/{}, {} pending, {} in progress, {} completed, {} failed",
                state.status,
                state.current_cycle,
                state.max_cycles,
                count(TaskStatus::Pending),
                count(TaskStatus::InProgress),
                count(TaskStatus::Completed),
                count(TaskStatus::Failed),
            ),
        }),
    );
    Ok(())
}

fn pause_command(cli: &Cli) -> Result<()> {
    let store = ProjectStore::load(&cli.project)?;
    store.write_pause_signal()?;
    emit_output(
        &cli.output,
        "pause",
        json!({"message": "pause requested; the engine will wind down at the next poll"}),
    );
    Ok(())
}

fn log_command(cli: &Cli, lines: usize) -> Result<()> {
    let store = ProjectStore::load(&cli.project)?;
    let tail = store.tail_engine_log(lines)?;
    if cli.output == OutputFormat::Json {
        emit_output(&cli.output, "log", json!({"lines": tail}));
    } else {
        for line in tail {
            println!("{}", line);
        }
    }
    Ok(())
}

async fn serve_command(cli: &Cli) -> Result<()> {
    let store = ProjectStore::load(&cli.project)?;
    let config = EngineConfig::new(cli.project.clone())
        .with_config_file()
        .await?;
    let service = CoordinationService::new(store, config.tools.test.clone());
    run_serve_loop(&service).await
}

async fn doctor_command(cli: &Cli) -> Result<()> {
    async fn probe(program: &str, arg: &str) -> bool {
        tokio::process::Command::new(program)
            .arg(arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .is_ok()
    }

    let config = EngineConfig::new(cli.project.clone())
        .with_config_file()
        .await?;
    let store_present = ProjectStore::load(&cli.project).is_ok();
    let git = probe("git", "--version").await;
    let reviewer = probe(&config.tools.reviewer, "--version").await;
    let semgrep = probe("semgrep", "--version").await;

    emit_output(
        &cli.output,
        "doctor",
        json!({
            "store": store_present,
            "git": git,
            "reviewer": reviewer,
            "semgrep": semgrep,
            "message": format!(
                "store: {} git: {} reviewer({}): {} semgrep: {}",
                store_present, git, config.tools.reviewer, reviewer, semgrep
            ),
        }),
    );
    Ok(())
}
