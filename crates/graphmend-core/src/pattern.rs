//! Learned records kept by the persistent debug memory.
//!
//! These are plain data. The rules that create and evolve them (rolling
//! success rates, template reusability, decay and pruning) live in
//! `graphmend-memory`; storage backends only persist them.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::edge::EdgeKey;
use crate::id::NodeId;
use crate::signature::BugSignature;

/// Number of adjustments kept per edge reinforcement record.
pub const REINFORCEMENT_HISTORY_CAP: usize = 32;

/// A reusable fix strategy attached to a bug pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixTemplate {
    /// Short digest of the normalised approach summary.
    pub id: String,
    pub approach: String,
    /// Reference to the code transformation (patch id, commit, diff handle).
    pub transformation_ref: String,
    /// Files the transformation touched.
    #[serde(default)]
    pub files: Vec<String>,
    /// Fraction of the pattern's occurrences this template resolved, in [0, 1].
    pub reusability: f32,
    pub uses: u64,
    pub last_used: DateTime<Utc>,
}

impl FixTemplate {
    /// Stable template id for an approach summary (case and whitespace
    /// insensitive).
    pub fn id_for(approach: &str) -> String {
        let normalized = approach
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let hex = blake3::hash(normalized.as_bytes()).to_hex();
        hex.as_str()[..16].to_string()
    }
}

/// A stored bug signature with its outcome history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugPattern {
    pub signature: BugSignature,
    pub occurrences: u64,
    pub successes: u64,
    /// Rolling success rate in [0, 1].
    pub success_rate: f32,
    /// Ordered by reusability, best first.
    pub fix_templates: Vec<FixTemplate>,
    /// Context node ids used by the most recent attempt.
    #[serde(default)]
    pub last_context: Vec<NodeId>,
    pub first_seen: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl BugPattern {
    pub fn new(signature: BugSignature, now: DateTime<Utc>) -> Self {
        BugPattern {
            signature,
            occurrences: 0,
            successes: 0,
            success_rate: 0.0,
            fix_templates: Vec::new(),
            last_context: Vec::new(),
            first_seen: now,
            last_used: now,
        }
    }

    pub fn digest(&self) -> &str {
        &self.signature.digest
    }

    /// Largest number of files touched by any stored fix template.
    pub fn max_files_touched(&self) -> usize {
        self.fix_templates
            .iter()
            .map(|t| t.files.len())
            .max()
            .unwrap_or(0)
    }
}

/// One weight adjustment applied to an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeAdjustment {
    pub at: DateTime<Utc>,
    /// Multiplicative factor that was applied.
    pub factor: f32,
    pub weight_after: f32,
}

/// Bounded adjustment history for one edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinforcementRecord {
    pub edge: EdgeKey,
    pub history: VecDeque<EdgeAdjustment>,
}

impl ReinforcementRecord {
    pub fn new(edge: EdgeKey) -> Self {
        ReinforcementRecord {
            edge,
            history: VecDeque::new(),
        }
    }

    /// Appends an adjustment, evicting the oldest beyond the cap.
    pub fn push(&mut self, adjustment: EdgeAdjustment) {
        self.history.push_back(adjustment);
        while self.history.len() > REINFORCEMENT_HISTORY_CAP {
            self.history.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&EdgeAdjustment> {
        self.history.back()
    }
}
