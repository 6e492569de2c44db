//! Escalation: when the engine needs a human, it records the request
//! durably, then either prompts (interactive) or exits with the
//! distinguished code so the launching shell can resume later.

use crate::error::{ForemanError, Result};
use crate::store::ProjectStore;
use chrono::Utc;
use serde_json::json;
use std::io::{BufRead, Write};
use tracing::info;

/// What the human chose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationChoice {
    Continue,
    Redirect(String),
    Stop,
}

pub const ESCALATION_OPTIONS: [&str; 3] = ["continue", "redirect", "stop"];

/// Persist the escalation record.
pub fn record_escalation(store: &ProjectStore, reason: &str, details: &str) -> Result<()> {
    store.write_escalation(&json!({
        "reason": reason,
        "details": details,
        "timestamp": Utc::now(),
        "options": ESCALATION_OPTIONS,
    }))
}

/// Non-interactive escalation: record and bubble the distinguished
/// error (exit code 2).
pub fn escalate_detached(store: &ProjectStore, reason: &str, details: &str) -> Result<()> {
    record_escalation(store, reason, details)?;
    info!(reason, "escalation recorded; exiting for operator");
    Err(ForemanError::Escalated(reason.to_string()))
}

/// Interactive escalation: record, then prompt on the terminal until
/// one of the three options comes back. Redirect text becomes input to
/// the next replan.
pub fn escalate_interactive(
    store: &ProjectStore,
    reason: &str,
    details: &str,
) -> Result<EscalationChoice> {
    record_escalation(store, reason, details)?;

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    writeln!(stdout, "\nEscalation: {reason}\n{details}")?;
    loop {
        write!(stdout, "[continue/redirect <text>/stop] > ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(EscalationChoice::Stop);
        }
        match parse_choice(&line) {
            Some(choice) => return Ok(choice),
            None => writeln!(stdout, "unrecognized option")?,
        }
    }
}

#[must_use]
pub fn parse_choice(line: &str) -> Option<EscalationChoice> {
    let trimmed = line.trim();
    if trimmed.eq_ignore_ascii_case("continue") {
        return Some(EscalationChoice::Continue);
    }
    if trimmed.eq_ignore_ascii_case("stop") {
        return Some(EscalationChoice::Stop);
    }
    if let Some(rest) = trimmed.strip_prefix("redirect") {
        let text = rest.trim();
        if !text.is_empty() {
            return Some(EscalationChoice::Redirect(text.to_string()));
        }
    }
    None
}
