//! Debug session handlers (submit, status, result, cancel).

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use graphmend_core::DebugQuery;

use crate::error::ApiError;
use crate::schema::sessions::{
    SessionListResponse, SessionStatusResponse, SessionSummaryView, SubmitSessionRequest,
    SubmitSessionResponse,
};
use crate::service::{SessionId, SessionResult};
use crate::state::AppState;

fn not_found(id: &SessionId) -> ApiError {
    ApiError::NotFound(format!("session {}", id))
}

/// Starts a debugging session.
///
/// `POST /sessions`
pub async fn submit_session(
    State(state): State<AppState>,
    Json(req): Json<SubmitSessionRequest>,
) -> Result<Json<SubmitSessionResponse>, ApiError> {
    let query = DebugQuery {
        text: req.text,
        anchors: req.anchors,
        error_trace: req.error_trace,
    };
    let session_id = state.service.submit(query)?;
    Ok(Json(SubmitSessionResponse { session_id }))
}

/// `GET /sessions`
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    let sessions = state
        .service
        .list()
        .into_iter()
        .map(|(session_id, submitted_at)| SessionSummaryView {
            session_id,
            submitted_at,
        })
        .collect();
    Json(SessionListResponse { sessions })
}

/// `GET /sessions/{id}`
pub async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let id = SessionId(id);
    let status = state.service.status(&id).ok_or_else(|| not_found(&id))?;
    Ok(Json(SessionStatusResponse {
        session_id: id,
        status,
    }))
}

/// Returns `{"status":"pending"}` until the session is terminal.
///
/// `GET /sessions/{id}/result`
pub async fn session_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResult>, ApiError> {
    let id = SessionId(id);
    let result = state.service.result(&id).ok_or_else(|| not_found(&id))?;
    Ok(Json(result))
}

/// `POST /sessions/{id}/cancel`
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = SessionId(id);
    if !state.service.cancel(&id) {
        return Err(not_found(&id));
    }
    Ok(Json(serde_json::json!({
        "success": true,
        "session_id": id,
    })))
}
