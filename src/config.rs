use crate::error::{ForemanError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// External commands the engine shells out to. Templates may reference
/// `{project}`, `{addr}` and `{session}` placeholders where noted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommands {
    /// Worker subprocess launcher. Placeholders: `{project}`, `{addr}`,
    /// `{session}`.
    pub worker: String,
    /// Planning tool; receives the planning input on stdin and emits
    /// the plan text (with a fenced task block) on stdout.
    pub planner: String,
    /// Reviewer CLI binary name.
    pub reviewer: String,
    /// Investigator command used between review rounds; receives the
    /// issue list on stdin.
    pub investigator: String,
    /// Flow-tracing subtask command; receives one flow description on
    /// stdin and emits findings JSON.
    pub tracer: String,
    /// Test command used by the run_tests verb.
    pub test: Option<String>,
    /// Semgrep config to pass as `--config=...`, if any.
    pub semgrep_config: Option<String>,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            worker: "foreman-worker --project {project} --addr {addr} --session {session}"
                .to_string(),
            planner: "foreman-planner".to_string(),
            reviewer: "codex".to_string(),
            investigator: "foreman-investigator".to_string(),
            tracer: "foreman-tracer".to_string(),
            test: None,
            semgrep_config: None,
        }
    }
}

/// Everything the cycle engine needs to run one project.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub project_dir: PathBuf,
    pub concurrency: u32,
    pub max_cycles: u32,
    pub wind_down_threshold: f64,
    pub critical_threshold: f64,
    pub resume_threshold: f64,
    pub usage_poll_interval: Duration,
    pub monitor_poll_interval: Duration,
    pub wind_down_grace: Duration,
    pub reviewer_timeout: Duration,
    pub max_review_rounds: u32,
    pub max_flows: usize,
    pub tracer_parallelism: usize,
    pub skip_reviewer: bool,
    pub skip_flow_review: bool,
    pub interactive: bool,
    pub current_branch: bool,
    pub context_file: Option<PathBuf>,
    pub usage_url: Option<String>,
    pub usage_token: Option<String>,
    pub tools: ToolCommands,
}

impl EngineConfig {
    #[must_use]
    pub fn new(project_dir: PathBuf) -> Self {
        Self {
            project_dir,
            concurrency: 3,
            max_cycles: 10,
            wind_down_threshold: 0.80,
            critical_threshold: 0.90,
            resume_threshold: 0.50,
            usage_poll_interval: Duration::from_secs(30),
            monitor_poll_interval: Duration::from_secs(5),
            wind_down_grace: Duration::from_secs(120),
            reviewer_timeout: Duration::from_secs(300),
            max_review_rounds: 5,
            max_flows: 8,
            tracer_parallelism: 3,
            skip_reviewer: false,
            skip_flow_review: false,
            interactive: false,
            current_branch: false,
            context_file: None,
            usage_url: std::env::var("FOREMAN_USAGE_URL").ok(),
            usage_token: std::env::var("FOREMAN_USAGE_TOKEN").ok(),
            tools: ToolCommands::default(),
        }
    }

    /// Overlay values from `<project>/.foreman/config.toml` if present.
    pub async fn with_config_file(mut self) -> Result<Self> {
        let path = self.project_dir.join(".foreman/config.toml");
        if !path.exists() {
            return Ok(self);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ForemanError::ConfigError(format!("Failed to read config: {}", e)))?;
        apply_config_content(&mut self, &content);
        Ok(self)
    }
}

pub(crate) fn apply_config_content(config: &mut EngineConfig, content: &str) {
    for line in content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
    {
        if let Some(value) = parse_key_value(line, "worker_cmd") {
            config.tools.worker = value.to_string();
        }
        if let Some(value) = parse_key_value(line, "planner_cmd") {
            config.tools.planner = value.to_string();
        }
        if let Some(value) = parse_key_value(line, "reviewer_cmd") {
            config.tools.reviewer = value.to_string();
        }
        if let Some(value) = parse_key_value(line, "investigator_cmd") {
            config.tools.investigator = value.to_string();
        }
        if let Some(value) = parse_key_value(line, "tracer_cmd") {
            config.tools.tracer = value.to_string();
        }
        if let Some(value) = parse_key_value(line, "test_cmd") {
            config.tools.test = Some(value.to_string());
        }
        if let Some(value) = parse_key_value(line, "semgrep_config") {
            config.tools.semgrep_config = Some(value.to_string());
        }
        if let Some(value) = parse_key_value(line, "usage_url") {
            config.usage_url = Some(value.to_string());
        }
        if let Some(value) = parse_key_value(line, "wind_down_threshold") {
            if let Ok(parsed) = value.parse() {
                config.wind_down_threshold = parsed;
            }
        }
        if let Some(value) = parse_key_value(line, "critical_threshold") {
            if let Ok(parsed) = value.parse() {
                config.critical_threshold = parsed;
            }
        }
    }
}

pub fn parse_key_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split_once('=')
        .and_then(|(lhs, rhs)| (lhs.trim() == key).then_some(rhs.trim().trim_matches('"')))
}

/// Render a command template, shell-escaping the substituted values.
#[must_use]
pub fn render_command(template: &str, project: &Path, addr: &str, session: &str) -> String {
    template
        .replace("{project}", &shell_escape(&project.display().to_string()))
        .replace("{addr}", &shell_escape(addr))
        .replace("{session}", &shell_escape(session))
}

pub(crate) fn shell_escape(value: &str) -> String {
    if value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '/')
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}
