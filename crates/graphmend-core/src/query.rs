//! Debug queries: a bug report or error trace plus optional anchors.

use serde::{Deserialize, Serialize};

use crate::id::NodeId;
use crate::signature::BugSignature;

/// A single debugging request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DebugQuery {
    /// Free-text description of the bug.
    pub text: String,
    /// Artifacts the reporter already knows are involved.
    #[serde(default)]
    pub anchors: Vec<NodeId>,
    /// Raw error output or stack trace, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_trace: Option<String>,
}

impl DebugQuery {
    pub fn new(text: impl Into<String>) -> Self {
        DebugQuery {
            text: text.into(),
            anchors: Vec::new(),
            error_trace: None,
        }
    }

    pub fn with_anchor(mut self, anchor: impl Into<NodeId>) -> Self {
        self.anchors.push(anchor.into());
        self
    }

    pub fn with_error_trace(mut self, trace: impl Into<String>) -> Self {
        self.error_trace = Some(trace.into());
        self
    }

    /// Text and trace joined, as used for embedding and signatures.
    pub fn full_text(&self) -> String {
        match &self.error_trace {
            Some(trace) if !trace.trim().is_empty() => format!("{}\n{}", self.text, trace),
            _ => self.text.clone(),
        }
    }

    pub fn signature(&self) -> Option<BugSignature> {
        BugSignature::from_text(&self.full_text())
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
            && self.anchors.is_empty()
            && self
                .error_trace
                .as_deref()
                .map_or(true, |t| t.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_text_includes_trace() {
        let q = DebugQuery::new("login fails").with_error_trace("AuthError: token expired");
        assert_eq!(q.full_text(), "login fails\nAuthError: token expired");
    }

    #[test]
    fn signature_uses_trace_tokens() {
        let q = DebugQuery::new("login fails").with_error_trace("AuthError: token expired");
        let sig = q.signature().unwrap();
        assert!(sig.tokens.contains("autherror"));
        assert!(sig.tokens.contains("login"));
    }

    #[test]
    fn empty_query_detection() {
        assert!(DebugQuery::new("  ").is_empty());
        assert!(!DebugQuery::new("  ").with_anchor("f").is_empty());
    }

    #[test]
    fn deserializes_with_defaults() {
        let q: DebugQuery = serde_json::from_str(r#"{"text":"boom"}"#).unwrap();
        assert!(q.anchors.is_empty());
        assert!(q.error_trace.is_none());
    }
}
