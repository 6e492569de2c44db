//! Verdict extraction from reviewer stdout. The tool promises a fenced
//! JSON block; in practice output drifts, so there is a fallback scan
//! for the first raw JSON object that carries `review_performed`.

use crate::types::{IssueSeverity, ParsedReview, ReviewIssue, ReviewVerdict};
use serde_json::Value;

/// Parse a reviewer response. Returns None when nothing in the output
/// is a usable verdict object.
#[must_use]
pub fn parse_review(output: &str) -> Option<ParsedReview> {
    for candidate in fenced_json_blocks(output) {
        if let Some(parsed) = review_from_json(candidate) {
            return Some(parsed);
        }
    }
    for candidate in balanced_json_objects(output) {
        if candidate.contains("review_performed") {
            if let Some(parsed) = review_from_json(candidate) {
                return Some(parsed);
            }
        }
    }
    None
}

fn review_from_json(candidate: &str) -> Option<ParsedReview> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    if value.get("review_performed").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    let verdict = ReviewVerdict::try_from(value.get("verdict")?.as_str()?).ok()?;

    let issues = value
        .get("issues")
        .and_then(Value::as_array)
        .map(|raw| {
            raw.iter()
                .filter_map(|issue| {
                    let description = issue.get("description")?.as_str()?.to_string();
                    let severity = issue
                        .get("severity")
                        .and_then(Value::as_str)
                        .map_or(IssueSeverity::Unknown, IssueSeverity::normalize);
                    Some(ReviewIssue {
                        description,
                        severity,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Some(ParsedReview {
        verdict,
        issues,
        summary,
    })
}

/// Contents of ``` fenced blocks, with an optional `json` info string.
fn fenced_json_blocks(output: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = output;
    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let info = after_fence[..body_start].trim();
        let body = &after_fence[body_start..];
        let Some(close) = body.find("```") else { break };
        if info.is_empty() || info.eq_ignore_ascii_case("json") {
            blocks.push(body[..close].trim());
        }
        rest = &body[close + 3..];
    }
    blocks
}

/// Top-level balanced `{...}` spans, brace-matched with string and
/// escape awareness so braces inside strings do not split objects.
fn balanced_json_objects(output: &str) -> Vec<&str> {
    let bytes = output.as_bytes();
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (index, &byte) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(index);
                }
                depth += 1;
            }
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(begin) = start.take() {
                        objects.push(&output[begin..=index]);
                    }
                }
            }
            _ => {}
        }
    }
    objects
}
