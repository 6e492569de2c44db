use super::atomic::{append_json_line, read_json_lines};
use super::ProjectStore;
use crate::error::Result;
use crate::types::{ArchitecturalDecision, DecisionCategory};

impl ProjectStore {
    pub fn record_decision(&self, decision: &ArchitecturalDecision) -> Result<()> {
        append_json_line(&self.layout().decisions_path(), decision)
    }

    /// Decisions matching the optional category filter, time-ordered.
    pub fn get_decisions(
        &self,
        category: Option<DecisionCategory>,
    ) -> Result<Vec<ArchitecturalDecision>> {
        let mut decisions: Vec<ArchitecturalDecision> =
            read_json_lines(&self.layout().decisions_path())?
                .into_iter()
                .filter(|decision: &ArchitecturalDecision| {
                    category.is_none_or(|wanted| decision.category == wanted)
                })
                .collect();
        decisions.sort_by_key(|decision| decision.timestamp);
        Ok(decisions)
    }
}
