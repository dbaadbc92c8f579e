//! The orchestration controller: one debugging session as a state machine.
//!
//! ```text
//! Idle -> Retrieving -> Proposing -> Validating -> Committing -> Terminal
//!             ^             |            |
//!             |             v            v
//!             +-------- Refining <-------+
//!                           |
//!                           v
//!                       Escalating -> Terminal
//! ```
//!
//! The iteration counter is plain session data. Every failed attempt goes
//! through `Refining`, which escalates once the counter reaches
//! `max_iterations`, so a session always terminates. Cancellation is
//! observed before each transition. A session that reaches `Committing` or
//! `Escalating` writes to memory exactly once; aborted and failed sessions
//! never write.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use graphmend_core::{DebugQuery, EdgeKey, NodeId};
use graphmend_memory::{AppliedFix, DebugMemory};
use graphmend_retrieval::{AgrEngine, RetrievalHints, RetrievalOutcome, TerminationReason};

use crate::collaborators::{
    normalize_approach, CandidateFix, CollaboratorError, FixGenerator, FixRequest,
    ValidationReport, Validator,
};
use crate::config::{ConfigError, ControllerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Retrieving,
    Proposing,
    Validating,
    Refining,
    Committing,
    Escalating,
    Terminal,
}

/// Live view of a running session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Refinements performed so far.
    pub iteration: usize,
    /// Confidence of the latest retrieval.
    pub confidence: f32,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus {
            state: SessionState::Idle,
            iteration: 0,
            confidence: 0.0,
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Validated { details: String },
    TestsFailed { details: String },
    /// Tests passed but the validator found regressions.
    Regressions { details: String },
    GeneratorFailed { error: CollaboratorError },
    /// The validator could not judge the fix. Not evidence the fix is wrong.
    ValidatorFailed { error: CollaboratorError },
}

impl AttemptOutcome {
    fn rank(&self) -> u8 {
        match self {
            AttemptOutcome::Validated { .. } => 4,
            AttemptOutcome::Regressions { .. } => 3,
            AttemptOutcome::TestsFailed { .. } => 2,
            AttemptOutcome::ValidatorFailed { .. } => 1,
            AttemptOutcome::GeneratorFailed { .. } => 0,
        }
    }

    /// `true` when the proposed fix itself was shown to be wrong.
    fn rejects_fix(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::TestsFailed { .. } | AttemptOutcome::Regressions { .. }
        )
    }

    fn describe(&self) -> String {
        match self {
            AttemptOutcome::Validated { .. } => "validated".to_string(),
            AttemptOutcome::TestsFailed { .. } => "tests failed".to_string(),
            AttemptOutcome::Regressions { .. } => "regressions found".to_string(),
            AttemptOutcome::GeneratorFailed { error } => format!("fix generation failed: {}", error),
            AttemptOutcome::ValidatorFailed { error } => format!("validation failed: {}", error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Refinement counter when the attempt started.
    pub iteration: usize,
    pub confidence: f32,
    pub retrieval: TerminationReason,
    pub context: Vec<NodeId>,
    pub fix: Option<CandidateFix>,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Fixed,
    /// Escalated: no attempt passed validation.
    NoValidatedFix,
    Aborted,
    /// A store failure ended the session.
    Failed,
}

/// What the terminal memory write did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MemoryWrite {
    Recorded {
        success: bool,
        /// `false` when the query has no signature to record against.
        pattern_recorded: bool,
        edges_updated: usize,
        edges_missing: usize,
    },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalResult {
    pub outcome: SessionOutcome,
    pub reason: String,
    /// The validated fix, for `Fixed` sessions.
    pub fix: Option<CandidateFix>,
    pub best_attempt: Option<AttemptRecord>,
    pub attempts: Vec<AttemptRecord>,
    /// Attempts made.
    pub iterations: usize,
    /// Refinements performed; the final value of [`SessionStatus::iteration`].
    pub refinements: usize,
    /// Retrieval confidence of every attempt, in order.
    pub confidence_trajectory: Vec<f32>,
    pub last_retrieval: Option<TerminationReason>,
    pub memory: MemoryWrite,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TerminalResult {
    /// Result for a session whose task ended without reaching a terminal
    /// state. Nothing is written to memory.
    pub fn aborted_task(reason: String) -> Self {
        TerminalResult {
            outcome: SessionOutcome::Failed,
            reason: reason.clone(),
            fix: None,
            best_attempt: None,
            attempts: Vec::new(),
            iterations: 0,
            refinements: 0,
            confidence_trajectory: Vec::new(),
            last_retrieval: None,
            memory: MemoryWrite::Skipped {
                reason: "session task did not finish".to_string(),
            },
            error: Some(reason),
        }
    }
}

/// Ephemeral state of one session.
struct Session {
    query: DebugQuery,
    iteration: usize,
    hints: RetrievalHints,
    excluded: Vec<String>,
    attempts: Vec<AttemptRecord>,
    /// Every edge traversed by any attempt.
    edges: Vec<EdgeKey>,
    trajectory: Vec<f32>,
    last_retrieval: Option<TerminationReason>,
}

impl Session {
    fn new(query: DebugQuery) -> Self {
        Session {
            query,
            iteration: 0,
            hints: RetrievalHints::default(),
            excluded: Vec::new(),
            attempts: Vec::new(),
            edges: Vec::new(),
            trajectory: Vec::new(),
            last_retrieval: None,
        }
    }

    fn is_excluded(&self, fix: &CandidateFix) -> bool {
        let key = fix.approach_key();
        self.excluded.iter().any(|a| normalize_approach(a) == key)
    }

    fn attempt(
        &self,
        retrieval: &RetrievalOutcome,
        fix: Option<CandidateFix>,
        outcome: AttemptOutcome,
    ) -> AttemptRecord {
        AttemptRecord {
            iteration: self.iteration,
            confidence: retrieval.confidence,
            retrieval: retrieval.termination,
            context: retrieval.node_ids(),
            fix,
            outcome,
        }
    }
}

enum Step {
    Retrieve,
    Propose(RetrievalOutcome),
    Validate(RetrievalOutcome, CandidateFix),
    Refine(AttemptRecord),
    Commit(RetrievalOutcome, CandidateFix, ValidationReport),
    Escalate,
}

/// The best attempt: validated over regressions over failed tests over
/// collaborator failures, then by confidence, earliest first.
pub fn best_attempt(attempts: &[AttemptRecord]) -> Option<&AttemptRecord> {
    attempts
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| {
            a.outcome
                .rank()
                .cmp(&b.outcome.rank())
                .then(a.confidence.total_cmp(&b.confidence))
                .then(ib.cmp(ia))
        })
        .map(|(_, attempt)| attempt)
}

pub struct Controller {
    engine: Arc<AgrEngine>,
    memory: Arc<DebugMemory>,
    generator: Arc<dyn FixGenerator>,
    validator: Arc<dyn Validator>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        engine: Arc<AgrEngine>,
        memory: Arc<DebugMemory>,
        generator: Arc<dyn FixGenerator>,
        validator: Arc<dyn Validator>,
        config: ControllerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Controller {
            engine,
            memory,
            generator,
            validator,
            config,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Runs one session to its terminal state, publishing progress on
    /// `status`.
    pub async fn run(
        &self,
        query: DebugQuery,
        cancel: CancellationToken,
        status: &watch::Sender<SessionStatus>,
    ) -> TerminalResult {
        let mut session = Session::new(query);
        publish(status, SessionState::Idle, &session);
        let mut step = Step::Retrieve;

        loop {
            if cancel.is_cancelled() {
                tracing::info!(iteration = session.iteration, "session cancelled");
                let result = self.finish(
                    session,
                    SessionOutcome::Aborted,
                    "cancelled".to_string(),
                    None,
                    MemoryWrite::Skipped {
                        reason: "session cancelled".to_string(),
                    },
                    None,
                );
                publish_terminal(status, &result);
                return result;
            }

            step = match step {
                Step::Retrieve => {
                    publish(status, SessionState::Retrieving, &session);
                    match self.retrieve(&session).await {
                        Ok(outcome) => {
                            tracing::info!(
                                iteration = session.iteration,
                                confidence = outcome.confidence,
                                context = outcome.context.len(),
                                termination = ?outcome.termination,
                                "retrieved context"
                            );
                            session.trajectory.push(outcome.confidence);
                            session.last_retrieval = Some(outcome.termination);
                            for key in &outcome.edges_used {
                                if !session.edges.contains(key) {
                                    session.edges.push(key.clone());
                                }
                            }
                            Step::Propose(outcome)
                        }
                        Err(error) => {
                            tracing::error!(%error, "session failed during retrieval");
                            let result = self.finish(
                                session,
                                SessionOutcome::Failed,
                                "store failure during retrieval".to_string(),
                                None,
                                MemoryWrite::Skipped {
                                    reason: "session failed".to_string(),
                                },
                                Some(error),
                            );
                            publish_terminal(status, &result);
                            return result;
                        }
                    }
                }

                Step::Propose(outcome) => {
                    publish(status, SessionState::Proposing, &session);
                    match self.propose(&session, &outcome, &cancel).await {
                        Ok(fix) if session.is_excluded(&fix) => {
                            let error = CollaboratorError::Malformed(format!(
                                "proposed excluded approach '{}'",
                                fix.approach
                            ));
                            let attempt = session.attempt(
                                &outcome,
                                Some(fix),
                                AttemptOutcome::GeneratorFailed { error },
                            );
                            Step::Refine(attempt)
                        }
                        Ok(fix) => Step::Validate(outcome, fix),
                        Err(error) => {
                            tracing::warn!(%error, "fix generation failed");
                            let attempt = session.attempt(
                                &outcome,
                                None,
                                AttemptOutcome::GeneratorFailed { error },
                            );
                            Step::Refine(attempt)
                        }
                    }
                }

                Step::Validate(outcome, fix) => {
                    publish(status, SessionState::Validating, &session);
                    let validation = self
                        .bounded(self.config.validator_timeout_ms, &cancel, self.validator.validate(&fix))
                        .await;
                    match validation {
                        Ok(report) if report.is_clean() => Step::Commit(outcome, fix, report),
                        Ok(report) => {
                            tracing::info!(approach = %fix.approach, tests_pass = report.tests_pass, "fix rejected");
                            let result = if report.tests_pass {
                                AttemptOutcome::Regressions {
                                    details: report.details,
                                }
                            } else {
                                AttemptOutcome::TestsFailed {
                                    details: report.details,
                                }
                            };
                            Step::Refine(session.attempt(&outcome, Some(fix), result))
                        }
                        Err(error) => {
                            tracing::warn!(%error, "validator failed");
                            let attempt = session.attempt(
                                &outcome,
                                Some(fix),
                                AttemptOutcome::ValidatorFailed { error },
                            );
                            Step::Refine(attempt)
                        }
                    }
                }

                Step::Refine(attempt) => {
                    publish(status, SessionState::Refining, &session);
                    let no_seeds = attempt.retrieval == TerminationReason::NoSeedsFound;
                    let widen = !matches!(attempt.outcome, AttemptOutcome::ValidatorFailed { .. });
                    if attempt.outcome.rejects_fix() {
                        if let Some(fix) = &attempt.fix {
                            session.excluded.push(fix.approach.clone());
                        }
                    }
                    session.attempts.push(attempt);
                    session.iteration += 1;

                    if session.iteration >= self.config.max_iterations {
                        Step::Escalate
                    } else {
                        if no_seeds {
                            session.hints.broaden = true;
                        } else if widen {
                            session.hints.extra_depth += 1;
                        }
                        Step::Retrieve
                    }
                }

                Step::Commit(outcome, fix, report) => {
                    publish(status, SessionState::Committing, &session);
                    let attempt = session.attempt(
                        &outcome,
                        Some(fix.clone()),
                        AttemptOutcome::Validated {
                            details: report.details,
                        },
                    );
                    session.attempts.push(attempt);
                    let applied = AppliedFix {
                        approach: fix.approach.clone(),
                        transformation_ref: fix.transformation_ref(),
                        files: fix.files(),
                    };
                    let memory = self
                        .write_memory(
                            session.query.clone(),
                            outcome.node_ids(),
                            outcome.edges_used.clone(),
                            Some(applied),
                            true,
                        )
                        .await;
                    let reason = format!("fix validated on attempt {}", session.attempts.len());
                    let result =
                        self.finish(session, SessionOutcome::Fixed, reason, Some(fix), memory, None);
                    publish_terminal(status, &result);
                    return result;
                }

                Step::Escalate => {
                    publish(status, SessionState::Escalating, &session);
                    let context = best_attempt(&session.attempts)
                        .map(|a| a.context.clone())
                        .unwrap_or_default();
                    let memory = self
                        .write_memory(
                            session.query.clone(),
                            context,
                            session.edges.clone(),
                            None,
                            false,
                        )
                        .await;
                    let last_failure = session
                        .attempts
                        .last()
                        .map(|a| a.outcome.describe())
                        .unwrap_or_default();
                    let reason = format!(
                        "no validated fix after {} iterations; last failure: {}",
                        session.iteration, last_failure
                    );
                    let result = self.finish(
                        session,
                        SessionOutcome::NoValidatedFix,
                        reason,
                        None,
                        memory,
                        None,
                    );
                    publish_terminal(status, &result);
                    return result;
                }
            };
        }
    }

    async fn retrieve(&self, session: &Session) -> Result<RetrievalOutcome, String> {
        let engine = self.engine.clone();
        let query = session.query.clone();
        let hints = session.hints;
        match tokio::task::spawn_blocking(move || engine.retrieve(&query, &hints)).await {
            Ok(result) => result.map_err(|err| err.to_string()),
            Err(err) => Err(format!("retrieval task failed: {}", err)),
        }
    }

    async fn propose(
        &self,
        session: &Session,
        outcome: &RetrievalOutcome,
        cancel: &CancellationToken,
    ) -> Result<CandidateFix, CollaboratorError> {
        let templates = match self
            .memory
            .suggest_templates(&session.query, self.config.template_hints)
        {
            Ok(templates) => templates,
            Err(error) => {
                tracing::warn!(%error, "fix template lookup failed");
                Vec::new()
            }
        };
        let request = FixRequest {
            query: session.query.clone(),
            context: outcome.context.clone(),
            templates,
            excluded_approaches: session.excluded.clone(),
            iteration: session.iteration,
        };
        self.bounded(self.config.generator_timeout_ms, cancel, self.generator.generate(&request))
            .await
    }

    /// Awaits a collaborator call under a deadline, giving up early on
    /// cancellation.
    async fn bounded<T>(
        &self,
        timeout_ms: u64,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, CollaboratorError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
            result = tokio::time::timeout(Duration::from_millis(timeout_ms), call) => match result {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout(timeout_ms)),
            },
        }
    }

    /// The single memory write of a session: the outcome against the
    /// query's signature, then the weight adjustment of the used edges.
    async fn write_memory(
        &self,
        query: DebugQuery,
        context: Vec<NodeId>,
        edges: Vec<EdgeKey>,
        fix: Option<AppliedFix>,
        success: bool,
    ) -> MemoryWrite {
        let memory = self.memory.clone();
        let task = tokio::task::spawn_blocking(move || {
            let now = Utc::now();
            let pattern_recorded =
                match memory.record_outcome(&query, &context, fix.as_ref(), success, now) {
                    Ok(_) => true,
                    Err(err) if err.is_recoverable() => {
                        tracing::warn!(error = %err, "outcome not recorded");
                        false
                    }
                    Err(err) => return Err(err),
                };
            let summary = memory.reinforce_edges(&edges, success, now)?;
            Ok(MemoryWrite::Recorded {
                success,
                pattern_recorded,
                edges_updated: summary.updated.len(),
                edges_missing: summary.missing.len(),
            })
        });

        match task.await {
            Ok(Ok(write)) => write,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "memory write failed");
                MemoryWrite::Failed {
                    reason: err.to_string(),
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "memory write task failed");
                MemoryWrite::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn finish(
        &self,
        session: Session,
        outcome: SessionOutcome,
        reason: String,
        fix: Option<CandidateFix>,
        memory: MemoryWrite,
        error: Option<String>,
    ) -> TerminalResult {
        let best = best_attempt(&session.attempts).cloned();
        tracing::info!(
            outcome = ?outcome,
            attempts = session.attempts.len(),
            %reason,
            "session finished"
        );
        TerminalResult {
            outcome,
            reason,
            fix,
            best_attempt: best,
            iterations: session.attempts.len(),
            refinements: session.iteration,
            attempts: session.attempts,
            confidence_trajectory: session.trajectory,
            last_retrieval: session.last_retrieval,
            memory,
            error,
        }
    }
}

fn publish(status: &watch::Sender<SessionStatus>, state: SessionState, session: &Session) {
    status.send_replace(SessionStatus {
        state,
        iteration: session.iteration,
        confidence: session.trajectory.last().copied().unwrap_or(0.0),
    });
}

fn publish_terminal(status: &watch::Sender<SessionStatus>, result: &TerminalResult) {
    status.send_replace(SessionStatus {
        state: SessionState::Terminal,
        iteration: result.refinements,
        confidence: result.confidence_trajectory.last().copied().unwrap_or(0.0),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: AttemptOutcome, confidence: f32) -> AttemptRecord {
        AttemptRecord {
            iteration: 0,
            confidence,
            retrieval: TerminationReason::MaxDepth,
            context: Vec::new(),
            fix: None,
            outcome,
        }
    }

    #[test]
    fn best_attempt_prefers_fixes_that_ran() {
        let attempts = vec![
            record(
                AttemptOutcome::GeneratorFailed {
                    error: CollaboratorError::Timeout(10),
                },
                0.9,
            ),
            record(AttemptOutcome::TestsFailed { details: String::new() }, 0.4),
            record(AttemptOutcome::Regressions { details: String::new() }, 0.3),
        ];
        let best = best_attempt(&attempts).unwrap();
        assert!(matches!(best.outcome, AttemptOutcome::Regressions { .. }));
    }

    #[test]
    fn best_attempt_ties_go_to_the_earliest() {
        let mut first = record(AttemptOutcome::TestsFailed { details: "a".into() }, 0.5);
        first.iteration = 0;
        let mut second = record(AttemptOutcome::TestsFailed { details: "b".into() }, 0.5);
        second.iteration = 1;
        let attempts = vec![first, second];
        assert_eq!(best_attempt(&attempts).unwrap().iteration, 0);
    }

    #[test]
    fn validator_failures_do_not_reject_the_fix() {
        assert!(!AttemptOutcome::ValidatorFailed {
            error: CollaboratorError::Execution("no sandbox".into()),
        }
        .rejects_fix());
        assert!(AttemptOutcome::TestsFailed { details: String::new() }.rejects_fix());
    }

    #[test]
    fn attempt_outcome_serializes_with_kind_tag() {
        let value = serde_json::to_value(AttemptOutcome::GeneratorFailed {
            error: CollaboratorError::Timeout(50),
        })
        .unwrap();
        assert_eq!(value["kind"], "generator_failed");
        assert_eq!(value["error"]["kind"], "timeout");
    }
}
