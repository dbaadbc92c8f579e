//! API error types with HTTP status code mapping.
//!
//! [`ApiError`] is the unified error type for all API endpoints. It implements
//! `axum::response::IntoResponse` to produce structured JSON error responses
//! with appropriate HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use graphmend_core::CoreError;
use graphmend_memory::MemoryError;
use graphmend_retrieval::RetrievalError;
use graphmend_storage::StorageError;

use crate::config::ConfigError;

/// Structured error detail in API responses.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "BAD_REQUEST").
    pub code: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Entity not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Request violates a graph invariant (422).
    #[error("invalid graph write: {0}")]
    InvalidGraph(String),

    /// Internal server error (500).
    #[error("internal error: {0}")]
    InternalError(String),

    /// Resource conflict (409).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::InvalidGraph(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_GRAPH"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::InvalidGraph(msg)
            | ApiError::InternalError(msg)
            | ApiError::Conflict(msg) => msg,
        };
        if status.is_server_error() {
            tracing::error!(%message, "request failed");
        }

        let body = serde_json::json!({
            "success": false,
            "error": ApiErrorDetail {
                code: code.to_string(),
                message,
            },
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match &err {
            CoreError::NodeNotFound { .. } | CoreError::EdgeNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            CoreError::UnknownNodeKind(_) | CoreError::UnknownEdgeType(_) => {
                ApiError::BadRequest(err.to_string())
            }
            CoreError::DanglingEdge { .. }
            | CoreError::InvalidWeight { .. }
            | CoreError::DimensionMismatch { .. }
            | CoreError::NodeIdentityChanged { .. } => ApiError::InvalidGraph(err.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NodeNotFound { .. } | StorageError::EdgeNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            StorageError::Invariant(core) => core.into(),
            StorageError::IntegrityError { .. } => ApiError::Conflict(err.to_string()),
            _ => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<RetrievalError> for ApiError {
    fn from(err: RetrievalError) -> Self {
        match err {
            RetrievalError::Storage(err) => err.into(),
            RetrievalError::Core(err) => err.into(),
            RetrievalError::InvalidConfig(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl From<MemoryError> for ApiError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Storage(err) => err.into(),
            MemoryError::InvalidSignature => ApiError::BadRequest(err.to_string()),
            MemoryError::DecayInProgress => ApiError::Conflict(err.to_string()),
            MemoryError::InvalidConfig(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmend_core::NodeId;

    #[test]
    fn storage_not_found_maps_to_404() {
        let err: ApiError = StorageError::NodeNotFound { id: "x".into() }.into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn invariant_violations_map_to_invalid_graph() {
        let err: ApiError = StorageError::Invariant(CoreError::InvalidWeight { weight: 1.5 }).into();
        assert!(matches!(err, ApiError::InvalidGraph(_)));
        let err: ApiError = CoreError::NodeIdentityChanged {
            id: NodeId::new("a"),
        }
        .into();
        assert_eq!(err.status_and_code().0, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn decay_in_progress_is_a_conflict() {
        let err: ApiError = MemoryError::DecayInProgress.into();
        assert_eq!(err.status_and_code(), (StatusCode::CONFLICT, "CONFLICT"));
    }
}
