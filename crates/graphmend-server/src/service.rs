//! Session registry behind the query API.
//!
//! Each submitted query runs as its own tokio task driving a
//! [`Controller`] session. [`DebugService`] keeps a handle per session so
//! its status and result can be read, and so it can be cancelled, while
//! other sessions proceed independently.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use graphmend_core::DebugQuery;

use crate::controller::{Controller, SessionStatus, TerminalResult};
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of a session, which may still be running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionResult {
    Pending,
    Terminal(Box<TerminalResult>),
}

/// A finished session's result and when it was stored.
struct Finished {
    at: DateTime<Utc>,
    result: TerminalResult,
}

struct SessionEntry {
    status: watch::Receiver<SessionStatus>,
    result: Arc<RwLock<Option<Finished>>>,
    cancel: CancellationToken,
    submitted_at: DateTime<Utc>,
}

pub struct DebugService {
    /// `None` when no fix generator or validator is configured; sessions
    /// are then refused.
    controller: Option<Arc<Controller>>,
    sessions: DashMap<SessionId, SessionEntry>,
    /// Finished sessions older than this are forgotten.
    retention: Duration,
}

impl DebugService {
    pub fn new(controller: Option<Arc<Controller>>, retention: Duration) -> Self {
        DebugService {
            controller,
            sessions: DashMap::new(),
            retention,
        }
    }

    /// Starts a session for `query` and returns its handle.
    pub fn submit(&self, query: DebugQuery) -> Result<SessionId, ApiError> {
        if query.is_empty() {
            return Err(ApiError::BadRequest("query is empty".to_string()));
        }
        let controller = self.controller.clone().ok_or_else(|| {
            ApiError::BadRequest(
                "debug sessions need GRAPHMEND_GENERATOR_URL and GRAPHMEND_VALIDATOR_URL".to_string(),
            )
        })?;
        self.evict_expired(Utc::now());

        let id = SessionId::new();
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let result = Arc::new(RwLock::new(None));
        let cancel = CancellationToken::new();

        self.sessions.insert(
            id,
            SessionEntry {
                status: status_rx,
                result: result.clone(),
                cancel: cancel.clone(),
                submitted_at: Utc::now(),
            },
        );

        let span = tracing::info_span!("session", id = %id);
        let run = tokio::spawn(
            async move { controller.run(query, cancel, &status_tx).await }.instrument(span),
        );
        tokio::spawn(async move {
            let terminal = match run.await {
                Ok(terminal) => terminal,
                Err(err) => {
                    tracing::error!(session = %id, error = %err, "session task failed");
                    TerminalResult::aborted_task(format!("session task failed: {}", err))
                }
            };
            *result.write() = Some(Finished {
                at: Utc::now(),
                result: terminal,
            });
        });

        tracing::info!(session = %id, "session submitted");
        Ok(id)
    }

    /// Forgets sessions that finished more than the retention period
    /// before `now`. Returns how many were removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| match entry.result.read().as_ref() {
            Some(finished) => now - finished.at <= retention,
            None => true,
        });
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            tracing::debug!(evicted, "expired finished sessions");
        }
        evicted
    }

    pub fn status(&self, id: &SessionId) -> Option<SessionStatus> {
        self.sessions.get(id).map(|entry| *entry.status.borrow())
    }

    pub fn result(&self, id: &SessionId) -> Option<SessionResult> {
        self.sessions.get(id).map(|entry| match entry.result.read().as_ref() {
            Some(finished) => SessionResult::Terminal(Box::new(finished.result.clone())),
            None => SessionResult::Pending,
        })
    }

    /// Requests cancellation. Returns `false` for unknown sessions.
    pub fn cancel(&self, id: &SessionId) -> bool {
        match self.sessions.get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(session = %id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Ids of all known sessions, oldest first.
    pub fn list(&self) -> Vec<(SessionId, DateTime<Utc>)> {
        self.evict_expired(Utc::now());
        let mut ids: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.submitted_at))
            .collect();
        ids.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0 .0.cmp(&b.0 .0)));
        ids
    }

    /// Cancels every running session.
    pub fn shutdown(&self) {
        for entry in self.sessions.iter() {
            entry.cancel.cancel();
        }
    }
}
