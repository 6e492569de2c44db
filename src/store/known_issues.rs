use super::atomic::{read_json_if_exists, write_json};
use super::ProjectStore;
use crate::error::Result;
use crate::types::KnownIssue;
use std::collections::HashSet;
use tracing::debug;

impl ProjectStore {
    pub fn read_known_issues(&self) -> Result<Vec<KnownIssue>> {
        Ok(read_json_if_exists(&self.layout().known_issues_path())?.unwrap_or_default())
    }

    fn save_known_issues(&self, issues: &[KnownIssue]) -> Result<()> {
        write_json(&self.layout().known_issues_path(), &issues)
    }

    /// Append entrants, dropping any whose dedup key is already
    /// present (including duplicates within the entrant batch).
    /// Returns how many were actually added.
    pub fn add_known_issues(&self, entrants: Vec<KnownIssue>) -> Result<u32> {
        let mut issues = self.read_known_issues()?;
        let mut seen: HashSet<String> = issues.iter().map(KnownIssue::dedup_key).collect();

        let mut added = 0;
        for entrant in entrants {
            if seen.insert(entrant.dedup_key()) {
                issues.push(entrant);
                added += 1;
            }
        }
        if added > 0 {
            self.save_known_issues(&issues)?;
            debug!(added, total = issues.len(), "known issues recorded");
        }
        Ok(added)
    }

    /// Mark the given issue ids addressed in `cycle`.
    pub fn mark_issues_addressed(&self, ids: &[String], cycle: u32) -> Result<()> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut issues = self.read_known_issues()?;
        let mut changed = false;
        for issue in &mut issues {
            if wanted.contains(issue.id.as_str()) && !issue.addressed {
                issue.addressed = true;
                issue.addressed_in_cycle = Some(cycle);
                changed = true;
            }
        }
        if changed {
            self.save_known_issues(&issues)?;
        }
        Ok(())
    }

    pub fn unresolved_known_issues(&self) -> Result<Vec<KnownIssue>> {
        Ok(self
            .read_known_issues()?
            .into_iter()
            .filter(|issue| !issue.addressed)
            .collect())
    }
}
