//! Debug memory request/response types.

use serde::{Deserialize, Serialize};

use graphmend_core::FixTemplate;

/// Request to match stored patterns against a bug description.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchPatternsRequest {
    pub text: String,
    #[serde(default)]
    pub error_trace: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternMatchView {
    pub digest: String,
    pub tokens: Vec<String>,
    pub similarity: f32,
    pub score: f32,
    pub occurrences: u64,
    pub success_rate: f32,
    pub fix_templates: Vec<FixTemplate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchPatternsResponse {
    pub matches: Vec<PatternMatchView>,
}
