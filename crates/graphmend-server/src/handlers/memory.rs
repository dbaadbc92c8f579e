//! Debug memory handlers.

use axum::extract::State;
use axum::Json;
use chrono::Utc;

use graphmend_core::DebugQuery;
use graphmend_memory::DecayReport;

use crate::error::ApiError;
use crate::schema::memory::{MatchPatternsRequest, MatchPatternsResponse, PatternMatchView};
use crate::state::AppState;

/// Runs a decay pass now. Fails with 409 while another pass is running.
///
/// `POST /memory/decay`
pub async fn run_decay(State(state): State<AppState>) -> Result<Json<DecayReport>, ApiError> {
    let memory = state.memory.clone();
    let report = tokio::task::spawn_blocking(move || memory.decay(Utc::now()))
        .await
        .map_err(|err| ApiError::InternalError(format!("decay task failed: {}", err)))??;
    Ok(Json(report))
}

/// `POST /memory/patterns/match`
pub async fn match_patterns(
    State(state): State<AppState>,
    Json(req): Json<MatchPatternsRequest>,
) -> Result<Json<MatchPatternsResponse>, ApiError> {
    let query = DebugQuery {
        text: req.text,
        anchors: Vec::new(),
        error_trace: req.error_trace,
    };
    let signature = query
        .signature()
        .ok_or_else(|| ApiError::BadRequest("cannot derive a bug signature from the query".into()))?;

    let matches = state
        .memory
        .match_patterns(&signature)?
        .into_iter()
        .map(|m| PatternMatchView {
            digest: m.pattern.signature.digest.clone(),
            tokens: m.pattern.signature.tokens.iter().cloned().collect(),
            similarity: m.similarity,
            score: m.score,
            occurrences: m.pattern.occurrences,
            success_rate: m.pattern.success_rate,
            fix_templates: m.pattern.fix_templates,
        })
        .collect();
    Ok(Json(MatchPatternsResponse { matches }))
}
