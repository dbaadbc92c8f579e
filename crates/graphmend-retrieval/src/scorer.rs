//! The confidence scorer.
//!
//! Confidence is the weighted mean of four sub-scores in [0, 1]:
//!
//! - relevance: mean query similarity over the context
//! - coherence: mean of each member's path weight (the mean edge weight
//!   along its shortest retained path from a seed; seeds score 1)
//! - completeness: fraction of the expected edge types present among the
//!   edges that brought members in
//! - historical: success rate of the closest stored bug pattern, 0.5 when
//!   memory has no match
//!
//! The scorer holds only its weights and has no side effects, so identical
//! inputs always give identical scores.

use serde::{Deserialize, Serialize};

use graphmend_core::{EdgeType, EdgeTypeSet, NodeId};

use crate::config::ScorerWeights;

/// Historical sub-score used when memory has no matching pattern.
pub const DEFAULT_HISTORICAL_SUCCESS: f32 = 0.5;

/// One member of a context set as seen by the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMember {
    pub node_id: NodeId,
    /// Query similarity, in [0, 1].
    pub similarity: f32,
    /// Mean edge weight along the member's retained path, 1.0 for seeds.
    pub path_weight: f32,
    /// Hop at which the member was discovered, 0 for seeds.
    pub hop: usize,
}

/// The sub-scores and their combination.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub relevance: f32,
    pub coherence: f32,
    pub completeness: f32,
    pub historical: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ConfidenceScorer {
    weights: ScorerWeights,
}

impl ConfidenceScorer {
    pub fn new(weights: ScorerWeights) -> Self {
        ConfidenceScorer { weights }
    }

    pub fn weights(&self) -> &ScorerWeights {
        &self.weights
    }

    /// Edge types a bug context is expected to contain after `hop` hops.
    pub fn expected_edge_types(hop: usize) -> EdgeTypeSet {
        if hop >= 2 {
            [EdgeType::DependsOn, EdgeType::TestedBy].into_iter().collect()
        } else {
            [EdgeType::DependsOn].into_iter().collect()
        }
    }

    /// Scores a context. An empty context scores 0 overall.
    pub fn score(
        &self,
        members: &[ContextMember],
        edge_types_present: &EdgeTypeSet,
        hop: usize,
        historical_success: Option<f32>,
    ) -> ConfidenceBreakdown {
        if members.is_empty() {
            return ConfidenceBreakdown::default();
        }
        let n = members.len() as f32;
        let relevance = members.iter().map(|m| m.similarity.clamp(0.0, 1.0)).sum::<f32>() / n;
        let coherence = members.iter().map(|m| m.path_weight.clamp(0.0, 1.0)).sum::<f32>() / n;

        let expected = Self::expected_edge_types(hop);
        let present = expected.iter().filter(|t| edge_types_present.contains(*t)).count();
        let completeness = present as f32 / expected.len().max(1) as f32;

        let historical = historical_success
            .unwrap_or(DEFAULT_HISTORICAL_SUCCESS)
            .clamp(0.0, 1.0);

        let w = &self.weights;
        let total = w.total();
        let confidence = if total > 0.0 {
            ((relevance * w.relevance
                + coherence * w.coherence
                + completeness * w.completeness
                + historical * w.historical)
                / total)
                .clamp(0.0, 1.0)
        } else {
            0.0
        };

        ConfidenceBreakdown {
            relevance,
            coherence,
            completeness,
            historical,
            confidence,
        }
    }
}
