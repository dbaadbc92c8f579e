//! Time-based decay of edge weights and pruning of stale patterns.
//!
//! An edge loses weight exponentially in the days since it was last
//! touched: `w' = w × decay_per_day^days`. "Last touched" is the later of
//! its last reinforcement and the previous decay pass, so running decay
//! twice in a row does not decay the same interval twice.
//!
//! Only one pass runs at a time per [`DebugMemory`]; a concurrent call is
//! rejected with [`MemoryError::DecayInProgress`] rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use graphmend_core::BugPattern;
use graphmend_storage::{StorageError, WeightUpdate};

use crate::error::MemoryError;
use crate::memory::DebugMemory;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayReport {
    pub ran_at: DateTime<Utc>,
    pub edges_decayed: usize,
    pub patterns_pruned: usize,
}

/// Clears the single-flight flag when the pass ends, including on error.
struct DecayGate<'a>(&'a AtomicBool);

impl<'a> DecayGate<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DecayGate(flag))
    }
}

impl Drop for DecayGate<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DebugMemory {
    /// Runs one decay-and-prune pass as of `now`.
    pub fn decay(&self, now: DateTime<Utc>) -> Result<DecayReport, MemoryError> {
        let Some(_gate) = DecayGate::acquire(&self.decay_running) else {
            tracing::warn!("decay requested while another pass is running; rejected");
            return Err(MemoryError::DecayInProgress);
        };

        let previous_pass = self.patterns.last_decay()?;
        let edges_decayed = {
            let _weights = self.weight_lock.lock();
            let mut updates = Vec::new();
            let mut factors = Vec::new();
            for edge in self.graph.list_edges()? {
                let since = previous_pass
                    .map_or(edge.last_reinforced, |p| p.max(edge.last_reinforced));
                let days = (now - since).num_milliseconds() as f64 / 1_000.0 / SECONDS_PER_DAY;
                if days <= 0.0 || edge.weight == 0.0 {
                    continue;
                }
                let factor = self.config.decay_per_day.powf(days) as f32;
                updates.push(WeightUpdate {
                    key: edge.key(),
                    weight: edge.weight * factor,
                    reinforced_at: None,
                });
                factors.push(factor);
            }
            let stored = self.graph.set_edge_weights(&updates)?;
            for ((update, factor), weight_after) in updates.iter().zip(factors).zip(stored) {
                self.append_adjustment(&update.key, now, factor, weight_after)?;
            }
            updates.len()
        };

        let mut patterns_pruned = 0;
        for candidate in self.patterns.list_patterns()? {
            if !self.prunable(&candidate, now) {
                continue;
            }
            // A concurrent record_outcome may have refreshed the pattern
            // since the listing; judge the stored copy under its lock.
            let pruned = self.with_signature_lock(candidate.digest(), || -> Result<bool, StorageError> {
                match self.patterns.get_pattern(candidate.digest())? {
                    Some(current) if self.prunable(&current, now) => {
                        self.patterns.delete_pattern(current.digest())
                    }
                    _ => Ok(false),
                }
            })?;
            if pruned {
                patterns_pruned += 1;
            }
        }

        self.patterns.set_last_decay(now)?;
        tracing::info!(edges_decayed, patterns_pruned, "decay pass complete");
        Ok(DecayReport {
            ran_at: now,
            edges_decayed,
            patterns_pruned,
        })
    }

    fn prunable(&self, pattern: &BugPattern, now: DateTime<Utc>) -> bool {
        now - pattern.last_used > chrono::Duration::days(self.config.prune_age_days)
            && pattern.success_rate < self.config.prune_success_threshold
    }

    /// Runs [`decay`](Self::decay) every `interval` until `cancel` fires.
    ///
    /// The first pass happens one interval after the call. Ticks missed
    /// while a pass is running are skipped.
    pub fn spawn_decay_schedule(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("decay schedule stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let memory = self.clone();
                        match tokio::task::spawn_blocking(move || memory.decay(Utc::now())).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(err)) => tracing::warn!(error = %err, "scheduled decay failed"),
                            Err(err) => tracing::error!(error = %err, "scheduled decay task panicked"),
                        }
                    }
                }
            }
        })
    }
}
