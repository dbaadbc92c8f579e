//! Session request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use graphmend_core::NodeId;

use crate::controller::SessionStatus;
use crate::service::SessionId;

/// Request to start a debugging session.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitSessionRequest {
    pub text: String,
    #[serde(default)]
    pub anchors: Vec<NodeId>,
    #[serde(default)]
    pub error_trace: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitSessionResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusResponse {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummaryView {
    pub session_id: SessionId,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummaryView>,
}
