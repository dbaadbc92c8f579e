//! Retrieval configuration.
//!
//! Every threshold the traversal uses is a field here with a `Default`
//! matching the documented starting configuration. Nothing in the engine
//! hard-codes these values.

use serde::{Deserialize, Serialize};

use graphmend_core::{EdgeTypeOrder, EdgeTypeSet};

use crate::error::RetrievalError;

/// Absolute ceiling on traversal depth.
pub const HARD_MAX_HOPS: usize = 5;

/// Weights of the four confidence sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerWeights {
    pub relevance: f32,
    pub coherence: f32,
    pub completeness: f32,
    pub historical: f32,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        ScorerWeights {
            relevance: 0.35,
            coherence: 0.25,
            completeness: 0.20,
            historical: 0.20,
        }
    }
}

impl ScorerWeights {
    pub fn total(&self) -> f32 {
        self.relevance + self.coherence + self.completeness + self.historical
    }
}

/// Weights of the query-complexity sub-signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityWeights {
    pub length: f32,
    pub technicality: f32,
    pub error_signals: f32,
    pub multi_file_history: f32,
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        ComplexityWeights {
            length: 0.25,
            technicality: 0.25,
            error_signals: 0.30,
            multi_file_history: 0.20,
        }
    }
}

impl ComplexityWeights {
    pub fn total(&self) -> f32 {
        self.length + self.technicality + self.error_signals + self.multi_file_history
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum number of embedding-matched seeds.
    pub seed_top_n: usize,
    /// Minimum query similarity for an embedding-matched seed.
    pub min_seed_similarity: f32,
    /// A discovered node with query similarity above this is always kept.
    pub relevance_floor: f32,
    /// Minimum edge weight that keeps an otherwise irrelevant node, per hop
    /// (index 0 is hop 1). Hops past the end reuse the last entry.
    pub hop_min_weights: Vec<f32>,
    /// Edges below this weight are never enumerated.
    pub min_edge_weight: f32,
    /// Edge types followed during expansion.
    pub edge_types: EdgeTypeSet,
    /// Priority among edge types when weights tie.
    pub edge_order: EdgeTypeOrder,
    pub confidence_threshold: f32,
    pub min_information_gain: f32,
    /// Depth cap, never above [`HARD_MAX_HOPS`].
    pub hard_max_hops: usize,
    /// Maximum neighbour rows inspected per retrieval.
    pub operation_budget: usize,
    /// Wall-clock budget per retrieval, in milliseconds.
    pub time_budget_ms: u64,
    /// Maximum context size.
    pub max_context_nodes: usize,
    /// New nodes at least this similar to an existing member count as
    /// overlap when computing information gain.
    pub cluster_similarity: f32,
    /// Composite ranking weight of query similarity.
    pub similarity_weight: f32,
    /// Composite ranking weight of path coherence.
    pub path_weight: f32,
    /// Frontier size from which neighbour enumeration fans out across
    /// threads.
    pub parallel_fanout_min: usize,
    pub scorer: ScorerWeights,
    pub complexity: ComplexityWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            seed_top_n: 10,
            min_seed_similarity: 0.2,
            relevance_floor: 0.3,
            hop_min_weights: vec![0.5, 0.6, 0.7, 0.8, 0.85],
            min_edge_weight: 0.05,
            edge_types: EdgeTypeSet::all(),
            edge_order: EdgeTypeOrder::default(),
            confidence_threshold: 0.9,
            min_information_gain: 0.1,
            hard_max_hops: HARD_MAX_HOPS,
            operation_budget: 50_000,
            time_budget_ms: 2_000,
            max_context_nodes: 200,
            cluster_similarity: 0.92,
            similarity_weight: 0.6,
            path_weight: 0.4,
            parallel_fanout_min: 16,
            scorer: ScorerWeights::default(),
            complexity: ComplexityWeights::default(),
        }
    }
}

fn unit(name: &str, value: f32) -> Result<(), RetrievalError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RetrievalError::InvalidConfig(format!(
            "{name} must be in [0, 1], got {value}"
        )))
    }
}

impl RetrievalConfig {
    /// Minimum keep-weight for `hop` (1-based).
    pub fn hop_min_weight(&self, hop: usize) -> f32 {
        let idx = hop.saturating_sub(1);
        self.hop_min_weights
            .get(idx)
            .or(self.hop_min_weights.last())
            .copied()
            .unwrap_or(1.0)
    }

    pub fn validate(&self) -> Result<(), RetrievalError> {
        unit("min_seed_similarity", self.min_seed_similarity)?;
        unit("relevance_floor", self.relevance_floor)?;
        unit("min_edge_weight", self.min_edge_weight)?;
        unit("confidence_threshold", self.confidence_threshold)?;
        unit("min_information_gain", self.min_information_gain)?;
        unit("cluster_similarity", self.cluster_similarity)?;
        unit("similarity_weight", self.similarity_weight)?;
        unit("path_weight", self.path_weight)?;
        for (i, w) in self.hop_min_weights.iter().enumerate() {
            unit(&format!("hop_min_weights[{i}]"), *w)?;
        }
        for (name, w) in [
            ("scorer.relevance", self.scorer.relevance),
            ("scorer.coherence", self.scorer.coherence),
            ("scorer.completeness", self.scorer.completeness),
            ("scorer.historical", self.scorer.historical),
            ("complexity.length", self.complexity.length),
            ("complexity.technicality", self.complexity.technicality),
            ("complexity.error_signals", self.complexity.error_signals),
            ("complexity.multi_file_history", self.complexity.multi_file_history),
        ] {
            unit(name, w)?;
        }
        if self.scorer.total() <= 0.0 {
            return Err(RetrievalError::InvalidConfig(
                "scorer weights must not all be zero".into(),
            ));
        }
        if self.hard_max_hops == 0 || self.hard_max_hops > HARD_MAX_HOPS {
            return Err(RetrievalError::InvalidConfig(format!(
                "hard_max_hops must be in 1..={HARD_MAX_HOPS}, got {}",
                self.hard_max_hops
            )));
        }
        if self.max_context_nodes == 0 {
            return Err(RetrievalError::InvalidConfig(
                "max_context_nodes must be positive".into(),
            ));
        }
        if self.parallel_fanout_min < 2 {
            return Err(RetrievalError::InvalidConfig(
                "parallel_fanout_min must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RetrievalConfig::default().validate().is_ok());
        assert!((ScorerWeights::default().total() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn hop_min_weight_grows_and_saturates() {
        let config = RetrievalConfig::default();
        assert_eq!(config.hop_min_weight(1), 0.5);
        assert!(config.hop_min_weight(3) > config.hop_min_weight(2));
        assert_eq!(config.hop_min_weight(9), 0.85);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let config = RetrievalConfig {
            hard_max_hops: 6,
            ..RetrievalConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RetrievalConfig {
            confidence_threshold: 1.2,
            ..RetrievalConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RetrievalConfig =
            serde_json::from_str(r#"{"seed_top_n": 3, "scorer": {"relevance": 0.5}}"#).unwrap();
        assert_eq!(config.seed_top_n, 3);
        assert_eq!(config.scorer.relevance, 0.5);
        assert_eq!(config.scorer.coherence, 0.25);
        assert_eq!(config.confidence_threshold, 0.9);
    }
}
