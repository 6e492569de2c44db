use crate::error::Result;
use crate::store::ProjectStore;
use serde::{Deserialize, Serialize};

/// Shared context injected into every worker at spawn: the feature
/// text, the clarifying Q&A, extracted codebase conventions, project
/// rules, and the threat-model summary. Written to the worker's
/// session directory before launch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    pub feature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conventions: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_rules: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_model: Option<String>,
}

impl SharedContext {
    /// Build from the store plus optional extra context file text.
    pub fn gather(store: &ProjectStore, feature: &str, extra: Option<String>) -> Result<Self> {
        Ok(Self {
            feature: feature.to_string(),
            qa_transcript: None,
            conventions: store.read_conventions()?,
            project_rules: extra,
            threat_model: None,
        })
    }
}
