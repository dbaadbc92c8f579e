//! The adaptive graph-guided retrieval engine.
//!
//! A retrieval runs in three phases:
//!
//! 1. Seeds: explicit anchors are resolved directly; the query text is
//!    embedded and the top-N most similar nodes above a threshold join
//!    them. Missing anchors are skipped.
//! 2. Depth: the query complexity (including the number of files the
//!    closest historical fix touched) selects a [`DepthPlan`].
//! 3. Expansion: each hop enumerates the neighbours of every member not
//!    yet expanded, keeps the relevant ones, rescores the whole context and
//!    checks the termination conditions.
//!
//! Within a hop every edge is read exactly once, at the start of the hop;
//! weight changes made concurrently by the memory show up on the next hop
//! at the earliest. Members are never re-scored or re-expanded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use graphmend_core::{
    DebugQuery, Edge, EdgeKey, EdgeTypeSet, Embedder, Embedding, Node, NodeId, NodeKind,
};
use graphmend_storage::{GraphStore, StorageError};

use crate::complexity::{complexity_score, initial_depth, ComplexitySignals, DepthPlan};
use crate::config::RetrievalConfig;
use crate::error::RetrievalError;
use crate::scorer::{ConfidenceBreakdown, ConfidenceScorer, ContextMember};

// ---------------------------------------------------------------------------
// Collaborator seam
// ---------------------------------------------------------------------------

/// What the debug memory knows about the closest matching bug pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalHint {
    pub digest: String,
    pub similarity: f32,
    pub success_rate: f32,
    /// Most files touched by any stored fix for the pattern.
    pub max_files_touched: usize,
}

/// Source of historical signals, implemented by the debug memory.
pub trait PatternHints: Send + Sync {
    fn closest_pattern(&self, query: &DebugQuery) -> Result<Option<HistoricalHint>, StorageError>;
}

// ---------------------------------------------------------------------------
// Request and outcome types
// ---------------------------------------------------------------------------

/// Adjustments requested by the caller after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetrievalHints {
    /// Extra hops on top of the complexity-derived depth.
    pub extra_depth: usize,
    /// Take more seeds at a lower similarity threshold.
    pub broaden: bool,
}

/// The condition that ended expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// No anchor resolved and nothing matched the query text.
    NoSeedsFound,
    ConfidenceReached,
    LowInformationGain,
    MaxDepth,
    /// Past the target depth, the last hop did not improve confidence.
    ConfidencePlateau,
    BudgetExhausted,
    ContextLimit,
}

/// Per-hop trace entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopReport {
    pub hop: usize,
    /// Members expanded during this hop.
    pub frontier: usize,
    /// Members added during this hop.
    pub added: usize,
    pub confidence: f32,
    pub information_gain: f32,
}

/// A ranked context member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub content_ref: String,
    pub similarity: f32,
    pub path_weight: f32,
    pub hop: usize,
    /// Composite ranking score.
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Context ranked by composite score, best first.
    pub context: Vec<ContextEntry>,
    pub confidence: f32,
    pub breakdown: ConfidenceBreakdown,
    pub termination: TerminationReason,
    pub seeds: Vec<NodeId>,
    /// Edges along which members were discovered, in discovery order.
    pub edges_used: Vec<EdgeKey>,
    pub hops: Vec<HopReport>,
    pub complexity: f32,
    pub depth: DepthPlan,
    pub historical: Option<HistoricalHint>,
}

impl RetrievalOutcome {
    fn no_seeds(complexity: f32, depth: DepthPlan, historical: Option<HistoricalHint>) -> Self {
        RetrievalOutcome {
            context: Vec::new(),
            confidence: 0.0,
            breakdown: ConfidenceBreakdown::default(),
            termination: TerminationReason::NoSeedsFound,
            seeds: Vec::new(),
            edges_used: Vec::new(),
            hops: Vec::new(),
            complexity,
            depth,
            historical,
        }
    }

    pub fn is_no_seeds(&self) -> bool {
        self.termination == TerminationReason::NoSeedsFound
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.context.iter().map(|c| c.node_id.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Internal per-member traversal state.
struct Member {
    node: Node,
    similarity: f32,
    hop: usize,
    path_sum: f32,
    path_len: usize,
}

impl Member {
    fn path_weight(&self) -> f32 {
        if self.path_len == 0 {
            1.0
        } else {
            self.path_sum / self.path_len as f32
        }
    }

    fn scored(&self) -> ContextMember {
        ContextMember {
            node_id: self.node.id.clone(),
            similarity: self.similarity,
            path_weight: self.path_weight(),
            hop: self.hop,
        }
    }
}

/// Mutable state of one traversal.
struct Traversal {
    context: IndexMap<NodeId, Member>,
    edges_used: Vec<EdgeKey>,
    edge_types_present: EdgeTypeSet,
    expanded: usize,
    operations: usize,
}

type NeighborBatch = Vec<(NodeId, Result<Vec<(Edge, Node)>, StorageError>)>;

pub struct AgrEngine {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    hints: Option<Arc<dyn PatternHints>>,
    scorer: ConfidenceScorer,
    config: RetrievalConfig,
}

impl AgrEngine {
    pub fn new(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Result<Self, RetrievalError> {
        config.validate()?;
        Ok(AgrEngine {
            store,
            embedder,
            hints: None,
            scorer: ConfidenceScorer::new(config.scorer),
            config,
        })
    }

    /// Attaches the debug memory as the source of historical signals.
    pub fn with_pattern_hints(mut self, hints: Arc<dyn PatternHints>) -> Self {
        self.hints = Some(hints);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Runs one retrieval.
    ///
    /// Storage failures abort with an error. Everything else degrades the
    /// outcome: an unresolvable query returns an empty context with
    /// [`TerminationReason::NoSeedsFound`].
    pub fn retrieve(
        &self,
        query: &DebugQuery,
        hints: &RetrievalHints,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let started = Instant::now();
        let historical = self.historical_hint(query);

        let signals = ComplexitySignals::from_query(
            query,
            historical.as_ref().map_or(0, |h| h.max_files_touched),
        );
        let complexity = complexity_score(&signals, &self.config.complexity);
        let depth = initial_depth(complexity).widened(hints.extra_depth, self.config.hard_max_hops);

        let text = query.full_text();
        let query_embedding = if text.trim().is_empty() {
            None
        } else {
            Some(self.embedder.embed(&text))
        };

        let seeds = self.select_seeds(query, query_embedding.as_ref(), hints)?;
        if seeds.is_empty() {
            tracing::debug!(complexity, "no seeds resolved");
            return Ok(RetrievalOutcome::no_seeds(complexity, depth, historical));
        }

        let size = self.store.size_estimate()?;
        // No hop can inspect more rows than the graph has edges.
        let operation_budget = self
            .config
            .operation_budget
            .min(size.edge_count.saturating_mul(depth.k_max).max(1));
        let context_cap = self.config.max_context_nodes.max(seeds.len());
        let time_budget = Duration::from_millis(self.config.time_budget_ms);

        let mut state = Traversal {
            context: IndexMap::new(),
            edges_used: Vec::new(),
            edge_types_present: EdgeTypeSet::empty(),
            expanded: 0,
            operations: 0,
        };
        let seed_ids: Vec<NodeId> = seeds.iter().map(|(n, _)| n.id.clone()).collect();
        for (node, similarity) in seeds {
            state.context.insert(
                node.id.clone(),
                Member {
                    node,
                    similarity,
                    hop: 0,
                    path_sum: 0.0,
                    path_len: 0,
                },
            );
        }

        let historical_success = historical.as_ref().map(|h| h.success_rate);
        let mut breakdown = self.score(&state, 0, historical_success);
        let mut hops = Vec::new();
        let mut termination = TerminationReason::MaxDepth;

        for hop in 1..=depth.k_max {
            if started.elapsed() >= time_budget || state.operations >= operation_budget {
                termination = TerminationReason::BudgetExhausted;
                break;
            }

            let frontier: Vec<NodeId> = state.context.keys().skip(state.expanded).cloned().collect();
            state.expanded = state.context.len();
            let batch = self.enumerate(&frontier)?;

            let existing = state.context.len();
            let mut budget_hit = false;
            let mut limit_hit = false;
            'origins: for (origin, neighbors) in batch {
                let Some(parent) = state.context.get(&origin) else {
                    continue;
                };
                let (parent_sum, parent_len) = (parent.path_sum, parent.path_len);
                for (edge, node) in neighbors {
                    if state.operations >= operation_budget {
                        budget_hit = true;
                        break 'origins;
                    }
                    state.operations += 1;
                    if state.context.contains_key(&node.id) {
                        continue;
                    }
                    let similarity = query_embedding
                        .as_ref()
                        .map_or(0.0, |q| q.similarity(&node.embedding));
                    let keep = similarity > self.config.relevance_floor
                        || edge.weight >= self.config.hop_min_weight(hop);
                    if !keep {
                        continue;
                    }
                    if state.context.len() >= context_cap {
                        limit_hit = true;
                        break 'origins;
                    }
                    state.edges_used.push(edge.key());
                    state.edge_types_present.insert(edge.edge_type);
                    state.context.insert(
                        node.id.clone(),
                        Member {
                            node,
                            similarity,
                            hop,
                            path_sum: parent_sum + edge.weight,
                            path_len: parent_len + 1,
                        },
                    );
                }
            }

            let previous_confidence = breakdown.confidence;
            breakdown = self.score(&state, hop, historical_success);
            let added = state.context.len() - existing;
            let information_gain = self.information_gain(&state, existing);
            tracing::debug!(
                hop,
                frontier = frontier.len(),
                added,
                confidence = breakdown.confidence,
                information_gain,
                "hop complete"
            );
            hops.push(HopReport {
                hop,
                frontier: frontier.len(),
                added,
                confidence: breakdown.confidence,
                information_gain,
            });

            let fired = if breakdown.confidence >= self.config.confidence_threshold {
                Some(TerminationReason::ConfidenceReached)
            } else if information_gain < self.config.min_information_gain {
                Some(TerminationReason::LowInformationGain)
            } else if hop >= depth.k_max {
                Some(TerminationReason::MaxDepth)
            } else if budget_hit || started.elapsed() >= time_budget {
                Some(TerminationReason::BudgetExhausted)
            } else if limit_hit || state.context.len() >= context_cap {
                Some(TerminationReason::ContextLimit)
            } else if hop >= depth.initial_k && breakdown.confidence <= previous_confidence {
                Some(TerminationReason::ConfidencePlateau)
            } else {
                None
            };
            if let Some(reason) = fired {
                termination = reason;
                break;
            }
        }

        let context = self.rank(&state);
        tracing::debug!(
            nodes = context.len(),
            confidence = breakdown.confidence,
            termination = ?termination,
            "retrieval complete"
        );
        Ok(RetrievalOutcome {
            context,
            confidence: breakdown.confidence,
            breakdown,
            termination,
            seeds: seed_ids,
            edges_used: state.edges_used,
            hops,
            complexity,
            depth,
            historical,
        })
    }

    fn historical_hint(&self, query: &DebugQuery) -> Option<HistoricalHint> {
        let hints = self.hints.as_ref()?;
        match hints.closest_pattern(query) {
            Ok(hint) => hint,
            Err(err) => {
                tracing::warn!(error = %err, "pattern lookup failed; retrieving without history");
                None
            }
        }
    }

    /// Anchors first (in the order given), then the best embedding matches.
    fn select_seeds(
        &self,
        query: &DebugQuery,
        query_embedding: Option<&Embedding>,
        hints: &RetrievalHints,
    ) -> Result<Vec<(Node, f32)>, RetrievalError> {
        let mut seeds: IndexMap<NodeId, (Node, f32)> = IndexMap::new();
        for anchor in &query.anchors {
            match self.store.get_node(anchor) {
                Ok(node) => {
                    let similarity = query_embedding.map_or(0.0, |q| q.similarity(&node.embedding));
                    seeds.entry(node.id.clone()).or_insert((node, similarity));
                }
                Err(err) if err.is_not_found() => {
                    tracing::debug!(anchor = %anchor, "anchor not in graph; skipping");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let Some(q) = query_embedding else {
            return Ok(seeds.into_values().collect());
        };
        let (top_n, threshold) = if hints.broaden {
            (self.config.seed_top_n * 2, self.config.min_seed_similarity / 2.0)
        } else {
            (self.config.seed_top_n, self.config.min_seed_similarity)
        };

        let mut matches: Vec<(Node, f32)> = Vec::new();
        for node in self.store.scan_nodes()? {
            if node.embedding.dim() != q.dim() {
                return Err(graphmend_core::CoreError::DimensionMismatch {
                    expected: node.embedding.dim(),
                    actual: q.dim(),
                }
                .into());
            }
            if seeds.contains_key(&node.id) {
                continue;
            }
            let similarity = q.similarity(&node.embedding);
            if similarity >= threshold && similarity > 0.0 {
                matches.push((node, similarity));
            }
        }
        matches.sort_by(|(na, sa), (nb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| na.id.cmp(&nb.id))
        });
        for (node, similarity) in matches.into_iter().take(top_n) {
            seeds.insert(node.id.clone(), (node, similarity));
        }
        Ok(seeds.into_values().collect())
    }

    /// Reads the neighbour lists of every frontier member, in frontier
    /// order. Large frontiers are split across scoped threads.
    fn enumerate(&self, frontier: &[NodeId]) -> Result<Vec<(NodeId, Vec<(Edge, Node)>)>, RetrievalError> {
        let store = self.store.as_ref();
        let edge_types = &self.config.edge_types;
        let min_weight = self.config.min_edge_weight;
        let read = |ids: &[NodeId]| -> NeighborBatch {
            ids.iter()
                .map(|id| (id.clone(), store.neighbors(id, edge_types, min_weight)))
                .collect()
        };

        let raw: NeighborBatch = if frontier.len() >= self.config.parallel_fanout_min {
            let workers = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .clamp(2, 8);
            let chunk = frontier.len().div_ceil(workers);
            std::thread::scope(|scope| {
                let handles: Vec<_> = frontier
                    .chunks(chunk)
                    .map(|ids| scope.spawn(move || read(ids)))
                    .collect();
                handles
                    .into_iter()
                    .flat_map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                    .collect()
            })
        } else {
            read(frontier)
        };

        let mut batch = Vec::with_capacity(raw.len());
        for (origin, result) in raw {
            match result {
                Ok(mut neighbors) => {
                    let order = &self.config.edge_order;
                    neighbors.sort_by(|(ea, na), (eb, nb)| {
                        eb.weight
                            .partial_cmp(&ea.weight)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| order.rank(ea.edge_type).cmp(&order.rank(eb.edge_type)))
                            .then_with(|| na.id.cmp(&nb.id))
                    });
                    batch.push((origin, neighbors));
                }
                Err(err) if err.is_not_found() => {
                    tracing::warn!(node = %origin, "frontier node vanished during traversal");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(batch)
    }

    fn score(&self, state: &Traversal, hop: usize, historical: Option<f32>) -> ConfidenceBreakdown {
        let members: Vec<ContextMember> = state.context.values().map(Member::scored).collect();
        self.scorer
            .score(&members, &state.edge_types_present, hop, historical)
    }

    /// (new − overlap) / max(1, new), where overlap counts new members that
    /// fall in the semantic cluster of a member present before the hop.
    fn information_gain(&self, state: &Traversal, existing: usize) -> f32 {
        let added: Vec<&Member> = state.context.values().skip(existing).collect();
        if added.is_empty() {
            return 0.0;
        }
        let before: Vec<&Member> = state.context.values().take(existing).collect();
        let overlap = added
            .iter()
            .filter(|m| {
                before.iter().any(|b| {
                    m.node.embedding.similarity(&b.node.embedding) >= self.config.cluster_similarity
                })
            })
            .count();
        (added.len() - overlap) as f32 / added.len().max(1) as f32
    }

    fn rank(&self, state: &Traversal) -> Vec<ContextEntry> {
        let mut ranked: Vec<ContextEntry> = state
            .context
            .values()
            .map(|m| {
                let path_weight = m.path_weight();
                ContextEntry {
                    node_id: m.node.id.clone(),
                    kind: m.node.kind,
                    content_ref: m.node.content_ref.0.clone(),
                    similarity: m.similarity,
                    path_weight,
                    hop: m.hop,
                    score: self.config.similarity_weight * m.similarity
                        + self.config.path_weight * path_weight,
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.hop.cmp(&b.hop))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        ranked
    }
}
