//! HTTP-backed collaborators.
//!
//! [`HttpFixGenerator`] talks to any OpenAI-compatible chat completion API
//! in JSON mode. [`HttpValidator`] posts candidate fixes to a sandbox
//! endpoint. Neither applies its own deadline; the controller bounds every
//! call.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::collaborators::{
    CandidateFix, CollaboratorError, FixGenerator, FixRequest, ValidationReport, Validator,
};
use crate::config::{GeneratorConfig, ValidatorConfig};

const DEFAULT_SYSTEM_PROMPT: &str = "You repair bugs in a codebase. \
Answer with a single JSON object of the form \
{\"approach\": \"<one-line summary>\", \"patches\": [{\"path\": \"<file>\", \"diff\": \"<unified diff>\"}]}.";

fn transport(err: reqwest::Error) -> CollaboratorError {
    CollaboratorError::Transport(err.to_string())
}

pub struct HttpFixGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl HttpFixGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        HttpFixGenerator {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn prompt(request: &FixRequest) -> String {
        let mut prompt = format!("Bug report:\n{}\n", request.query.text);
        if let Some(trace) = &request.query.error_trace {
            prompt.push_str(&format!("\nError trace:\n{}\n", trace));
        }

        prompt.push_str("\nRelevant artifacts (most relevant first):\n");
        for entry in &request.context {
            prompt.push_str(&format!(
                "- {} [{}] {} (score {:.2})\n",
                entry.node_id, entry.kind, entry.content_ref, entry.score
            ));
        }

        if !request.templates.is_empty() {
            prompt.push_str("\nFixes that resolved similar bugs before:\n");
            for template in &request.templates {
                prompt.push_str(&format!(
                    "- {} (files: {})\n",
                    template.approach,
                    template.files.join(", ")
                ));
            }
        }
        if !request.excluded_approaches.is_empty() {
            prompt.push_str("\nThese approaches were already tried and failed; do not repeat them:\n");
            for approach in &request.excluded_approaches {
                prompt.push_str(&format!("- {}\n", approach));
            }
        }
        prompt
    }
}

#[async_trait]
impl FixGenerator for HttpFixGenerator {
    async fn generate(&self, request: &FixRequest) -> Result<CandidateFix, CollaboratorError> {
        let endpoint = format!(
            "{}/chat/completions",
            self.config.api_base_url.trim_end_matches('/')
        );
        let system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": Self::prompt(request) },
            ],
            "response_format": { "type": "json_object" },
        });

        let mut req = self.client.post(endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(transport)?;
        let status = response.status();
        let body_text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(CollaboratorError::Transport(format!(
                "provider request failed ({}): {}",
                status, body_text
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&body_text)
            .map_err(|err| CollaboratorError::Malformed(format!("provider response: {}", err)))?;
        let content = parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CollaboratorError::Malformed("provider response missing assistant content".into())
            })?;

        parse_candidate(content)
    }
}

/// Parses the assistant content into a fix.
fn parse_candidate(content: &str) -> Result<CandidateFix, CollaboratorError> {
    let fix: CandidateFix = serde_json::from_str(content)
        .map_err(|err| CollaboratorError::Malformed(format!("candidate fix: {}", err)))?;
    if fix.approach.trim().is_empty() {
        return Err(CollaboratorError::Malformed("candidate fix has no approach".into()));
    }
    if fix.patches.is_empty() {
        return Err(CollaboratorError::Malformed("candidate fix has no patches".into()));
    }
    Ok(fix)
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct HttpValidator {
    client: reqwest::Client,
    config: ValidatorConfig,
}

impl HttpValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        HttpValidator {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Validator for HttpValidator {
    async fn validate(&self, fix: &CandidateFix) -> Result<ValidationReport, CollaboratorError> {
        let response = self
            .client
            .post(&self.config.url)
            .json(fix)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let body_text = response.text().await.map_err(transport)?;

        // A sandbox that answers with an error status could not run the tests.
        if !status.is_success() {
            return Err(CollaboratorError::Execution(format!(
                "sandbox returned {}: {}",
                status, body_text
            )));
        }
        serde_json::from_str(&body_text)
            .map_err(|err| CollaboratorError::Malformed(format!("validation report: {}", err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmend_core::{DebugQuery, FixTemplate, NodeId, NodeKind};
    use graphmend_retrieval::ContextEntry;

    #[test]
    fn parses_candidate_json() {
        let fix = parse_candidate(
            r#"{"approach":"check bounds","patches":[{"path":"src/lib.rs","diff":"+if i < len {"}]}"#,
        )
        .unwrap();
        assert_eq!(fix.approach, "check bounds");
        assert_eq!(fix.files(), vec!["src/lib.rs"]);
    }

    #[test]
    fn rejects_candidates_without_patches() {
        let err = parse_candidate(r#"{"approach":"noop","patches":[]}"#).unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
        let err = parse_candidate("not json").unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
    }

    #[test]
    fn prompt_mentions_context_templates_and_exclusions() {
        let now = chrono::Utc::now();
        let request = FixRequest {
            query: DebugQuery::new("panic in parser").with_error_trace("index out of bounds"),
            context: vec![ContextEntry {
                node_id: NodeId::new("fn:parse"),
                kind: NodeKind::Function,
                content_ref: "src/parser.rs#L10".to_string(),
                similarity: 0.8,
                path_weight: 1.0,
                hop: 0,
                score: 0.88,
            }],
            templates: vec![FixTemplate {
                id: FixTemplate::id_for("check bounds"),
                approach: "check bounds".to_string(),
                transformation_ref: "patches:src/parser.rs".to_string(),
                files: vec!["src/parser.rs".to_string()],
                reusability: 1.0,
                uses: 2,
                last_used: now,
            }],
            excluded_approaches: vec!["clamp index".to_string()],
            iteration: 1,
        };

        let prompt = HttpFixGenerator::prompt(&request);
        assert!(prompt.contains("index out of bounds"));
        assert!(prompt.contains("fn:parse"));
        assert!(prompt.contains("check bounds"));
        assert!(prompt.contains("clamp index"));
    }
}
