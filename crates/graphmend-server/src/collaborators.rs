//! Boundaries to the external fix generator and validator.
//!
//! Both collaborators are async traits so that sessions can await them
//! under a timeout. Implementations report their own failures as
//! [`CollaboratorError`]; the controller turns every failure into a failed
//! iteration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use graphmend_core::{DebugQuery, FixTemplate};
use graphmend_retrieval::ContextEntry;

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum CollaboratorError {
    #[error("collaborator timed out after {0} ms")]
    Timeout(u64),

    /// The collaborator answered with something that is not a valid result.
    #[error("malformed collaborator output: {0}")]
    Malformed(String),

    #[error("collaborator transport failure: {0}")]
    Transport(String),

    /// The validator could not execute the candidate fix at all.
    #[error("validator could not execute: {0}")]
    Execution(String),

    #[error("call abandoned: session cancelled")]
    Cancelled,
}

/// A file-level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatch {
    pub path: String,
    /// Unified diff against the current file.
    pub diff: String,
}

/// A proposed fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFix {
    /// Short summary of the approach taken, used to exclude repeats.
    pub approach: String,
    pub patches: Vec<FilePatch>,
    /// Handle to the transformation in an external store, if the generator
    /// keeps one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl CandidateFix {
    pub fn files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.patches.iter().map(|p| p.path.clone()).collect();
        files.sort();
        files.dedup();
        files
    }

    pub fn transformation_ref(&self) -> String {
        match &self.reference {
            Some(reference) => reference.clone(),
            None => format!("patches:{}", self.files().join(",")),
        }
    }

    /// Normalised approach used for exclusion comparisons.
    pub fn approach_key(&self) -> String {
        normalize_approach(&self.approach)
    }
}

pub fn normalize_approach(approach: &str) -> String {
    approach
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Everything the generator is given for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRequest {
    pub query: DebugQuery,
    pub context: Vec<ContextEntry>,
    /// Templates of similar past bugs, best first.
    pub templates: Vec<FixTemplate>,
    /// Approaches already tried and rejected in this session.
    pub excluded_approaches: Vec<String>,
    pub iteration: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub tests_pass: bool,
    pub regressions: bool,
    #[serde(default)]
    pub details: String,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.tests_pass && !self.regressions
    }
}

#[async_trait]
pub trait FixGenerator: Send + Sync {
    async fn generate(&self, request: &FixRequest) -> Result<CandidateFix, CollaboratorError>;
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, fix: &CandidateFix) -> Result<ValidationReport, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(paths: &[&str]) -> CandidateFix {
        CandidateFix {
            approach: "  Guard   the Null pointer ".to_string(),
            patches: paths
                .iter()
                .map(|p| FilePatch {
                    path: p.to_string(),
                    diff: String::new(),
                })
                .collect(),
            reference: None,
        }
    }

    #[test]
    fn approach_key_ignores_case_and_spacing() {
        assert_eq!(fix(&[]).approach_key(), "guard the null pointer");
    }

    #[test]
    fn transformation_ref_lists_files_once() {
        let fix = fix(&["src/b.rs", "src/a.rs", "src/b.rs"]);
        assert_eq!(fix.files(), vec!["src/a.rs", "src/b.rs"]);
        assert_eq!(fix.transformation_ref(), "patches:src/a.rs,src/b.rs");
    }

    #[test]
    fn candidate_fix_parses_without_reference() {
        let parsed: CandidateFix = serde_json::from_str(
            r#"{"approach":"bump timeout","patches":[{"path":"a.rs","diff":"-1\n+2"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.patches.len(), 1);
        assert!(parsed.reference.is_none());
    }
}
