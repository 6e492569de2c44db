use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(about = "Hierarchical agent orchestrator: plan, execute, review, checkpoint")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, default_value = ".")]
    pub project: PathBuf,

    #[arg(long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[arg(long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new run for a feature
    Start {
        feature: String,
        #[arg(long, default_value = "3")]
        concurrency: u32,
        #[arg(long, default_value = "10")]
        max_cycles: u32,
        #[arg(long)]
        usage_threshold: Option<f64>,
        #[arg(long, default_value_t = false)]
        skip_codex: bool,
        #[arg(long, default_value_t = false)]
        skip_flow_review: bool,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        #[arg(long)]
        context_file: Option<PathBuf>,
        /// Work on the current branch instead of creating one
        #[arg(long, default_value_t = false)]
        current_branch: bool,
        #[arg(long, default_value_t = false)]
        interactive: bool,
    },
    /// Show run status and task tallies
    Status,
    /// Resume a paused or escalated run
    Resume {
        #[arg(long)]
        concurrency: Option<u32>,
        #[arg(long)]
        max_cycles: Option<u32>,
        #[arg(long)]
        usage_threshold: Option<f64>,
        #[arg(long, default_value_t = false)]
        skip_codex: bool,
        #[arg(long, default_value_t = false)]
        skip_flow_review: bool,
        #[arg(long)]
        context_file: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        interactive: bool,
    },
    /// Ask a running engine to pause at the next safe point
    Pause,
    /// Tail the engine log
    Log {
        #[arg(short = 'n', default_value = "20")]
        lines: usize,
    },
    /// Serve coordination verbs over stdio for worker subprocesses
    Serve,
    /// Check external tool availability and store health
    Doctor,
}

#[derive(Clone, Debug, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}
