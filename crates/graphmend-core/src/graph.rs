//! CodeGraph: the typed, weighted multigraph of code artifacts.
//!
//! [`CodeGraph`] wraps a petgraph `StableGraph` together with id indices so
//! that nodes are addressed by their stable artifact id and edges by their
//! (from, to, type) key. All mutations go through `CodeGraph` methods, which
//! enforce the data-model invariants:
//!
//! - node ids are unique; upserting an existing id only refreshes its
//!   embedding and `last_modified` fields
//! - every node embedding has the same dimensionality
//! - edge weights stay within [0, 1]
//! - an edge never references a missing node (checked at write time)
//! - at most one edge exists per (from, to, type); upserts overwrite
//!
//! Cycles and self-loops are permitted.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::Directed;
use serde::{Deserialize, Serialize};

use crate::edge::{clamp_weight, validate_weight, Edge, EdgeKey, EdgeTypeSet};
use crate::error::CoreError;
use crate::id::NodeId;
use crate::node::Node;

/// Serializable flat form of a graph, used for bulk ingestion and export.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// The code artifact multigraph.
#[derive(Debug, Clone, Default)]
pub struct CodeGraph {
    graph: StableGraph<Node, Edge, Directed, u32>,
    node_index: HashMap<NodeId, NodeIndex<u32>>,
    edge_index: HashMap<EdgeKey, EdgeIndex<u32>>,
    /// Embedding dimensionality, fixed by the first node inserted.
    dimension: Option<usize>,
}

impl CodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a graph from a snapshot, validating every node and edge.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self, CoreError> {
        let mut graph = CodeGraph::new();
        for node in snapshot.nodes {
            graph.upsert_node(node)?;
        }
        for edge in snapshot.edges {
            graph.upsert_edge(edge)?;
        }
        Ok(graph)
    }

    /// Flattens the graph. Nodes are ordered by id and edges by key.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<Node> = self.graph.node_weights().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut edges: Vec<Edge> = self.graph.edge_weights().cloned().collect();
        edges.sort_by_key(|e| e.key());
        GraphSnapshot { nodes, edges }
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.node_index
            .get(id)
            .and_then(|idx| self.graph.node_weight(*idx))
    }

    pub fn get_edge(&self, key: &EdgeKey) -> Option<&Edge> {
        self.edge_index
            .get(key)
            .and_then(|idx| self.graph.edge_weight(*idx))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    /// Outgoing neighbours of `id` over edges whose type is in `edge_types`
    /// and whose weight is at least `min_weight`.
    ///
    /// Results are ordered by descending weight, ties broken by neighbour id
    /// ascending (see [`sort_neighbors`]).
    pub fn neighbors(
        &self,
        id: &NodeId,
        edge_types: &EdgeTypeSet,
        min_weight: f32,
    ) -> Result<Vec<(Edge, Node)>, CoreError> {
        let idx = self
            .node_index
            .get(id)
            .ok_or_else(|| CoreError::NodeNotFound { id: id.clone() })?;

        let mut result: Vec<(Edge, Node)> = self
            .graph
            .edges(*idx)
            .filter(|e| edge_types.contains(e.weight().edge_type) && e.weight().weight >= min_weight)
            .filter_map(|e| {
                self.graph
                    .node_weight(e.target())
                    .map(|node| (e.weight().clone(), node.clone()))
            })
            .collect();
        sort_neighbors(&mut result);
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Inserts a node or refreshes an existing one.
    ///
    /// Returns `true` if the node was newly created.
    pub fn upsert_node(&mut self, node: Node) -> Result<bool, CoreError> {
        match self.dimension {
            Some(expected) if expected != node.embedding.dim() => {
                return Err(CoreError::DimensionMismatch {
                    expected,
                    actual: node.embedding.dim(),
                });
            }
            _ => {}
        }

        if let Some(&idx) = self.node_index.get(&node.id) {
            // The index always points at a live node; StableGraph keeps
            // indices valid across removals.
            if let Some(existing) = self.graph.node_weight_mut(idx) {
                if !existing.same_artifact(&node) {
                    return Err(CoreError::NodeIdentityChanged { id: node.id });
                }
                existing.embedding = node.embedding;
                existing.last_modified = node.last_modified;
            }
            return Ok(false);
        }

        if self.dimension.is_none() {
            self.dimension = Some(node.embedding.dim());
        }
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.node_index.insert(id, idx);
        Ok(true)
    }

    /// Inserts an edge or overwrites the weight and timestamp of the edge
    /// with the same key.
    ///
    /// Returns `true` if the edge was newly created.
    pub fn upsert_edge(&mut self, edge: Edge) -> Result<bool, CoreError> {
        validate_weight(edge.weight)?;
        let key = edge.key();
        let from_idx = *self
            .node_index
            .get(&edge.from)
            .ok_or_else(|| CoreError::DanglingEdge {
                key: key.clone(),
                missing: edge.from.clone(),
            })?;
        let to_idx = *self
            .node_index
            .get(&edge.to)
            .ok_or_else(|| CoreError::DanglingEdge {
                key: key.clone(),
                missing: edge.to.clone(),
            })?;

        if let Some(&idx) = self.edge_index.get(&key) {
            if let Some(existing) = self.graph.edge_weight_mut(idx) {
                existing.weight = edge.weight;
                existing.last_reinforced = edge.last_reinforced;
            }
            return Ok(false);
        }

        let idx = self.graph.add_edge(from_idx, to_idx, edge);
        self.edge_index.insert(key, idx);
        Ok(true)
    }

    /// Sets an edge's weight (clamped into [0, 1]) and, if given, its
    /// last-reinforced timestamp. Returns the stored weight.
    pub fn set_edge_weight(
        &mut self,
        key: &EdgeKey,
        weight: f32,
        reinforced_at: Option<DateTime<Utc>>,
    ) -> Result<f32, CoreError> {
        let idx = *self
            .edge_index
            .get(key)
            .ok_or_else(|| CoreError::EdgeNotFound { key: key.clone() })?;
        let edge = self
            .graph
            .edge_weight_mut(idx)
            .ok_or_else(|| CoreError::EdgeNotFound { key: key.clone() })?;
        edge.weight = clamp_weight(weight);
        if let Some(at) = reinforced_at {
            edge.last_reinforced = at;
        }
        Ok(edge.weight)
    }
}

/// Orders neighbour lists: weight descending, then neighbour id ascending,
/// then edge type.
pub fn sort_neighbors(neighbors: &mut [(Edge, Node)]) {
    neighbors.sort_by(|(ea, na), (eb, nb)| {
        eb.weight
            .partial_cmp(&ea.weight)
            .unwrap_or(Ordering::Equal)
            .then_with(|| na.id.cmp(&nb.id))
            .then_with(|| ea.edge_type.cmp(&eb.edge_type))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeType;
    use crate::embedding::Embedding;
    use crate::node::NodeKind;
    use proptest::prelude::*;

    fn node(id: &str) -> Node {
        Node::new(id, NodeKind::Function, format!("src/{id}.rs"), Embedding::new(vec![1.0, 0.0, 0.0]))
    }

    fn graph_with(ids: &[&str]) -> CodeGraph {
        let mut g = CodeGraph::new();
        for id in ids {
            g.upsert_node(node(id)).unwrap();
        }
        g
    }

    #[test]
    fn upsert_node_refreshes_embedding_only() {
        let mut g = graph_with(&["a"]);
        let mut refreshed = node("a");
        refreshed.embedding = Embedding::new(vec![0.0, 1.0, 0.0]);
        assert!(!g.upsert_node(refreshed.clone()).unwrap());
        assert_eq!(g.get_node(&"a".into()).unwrap().embedding, refreshed.embedding);
        assert_eq!(g.node_count(), 1);

        let mut changed = node("a");
        changed.kind = NodeKind::Test;
        assert!(matches!(
            g.upsert_node(changed),
            Err(CoreError::NodeIdentityChanged { .. })
        ));
    }

    #[test]
    fn rejects_embedding_dimension_mismatch() {
        let mut g = graph_with(&["a"]);
        let bad = Node::new("b", NodeKind::Test, "t", Embedding::new(vec![1.0]));
        assert_eq!(
            g.upsert_node(bad),
            Err(CoreError::DimensionMismatch { expected: 3, actual: 1 })
        );
    }

    #[test]
    fn rejects_edges_to_missing_nodes() {
        let mut g = graph_with(&["a"]);
        let err = g
            .upsert_edge(Edge::new("a", "ghost", EdgeType::DependsOn, 0.5).unwrap())
            .unwrap_err();
        assert!(matches!(err, CoreError::DanglingEdge { missing, .. } if missing.as_str() == "ghost"));
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn upsert_edge_overwrites_same_key() {
        let mut g = graph_with(&["a", "b"]);
        assert!(g.upsert_edge(Edge::new("a", "b", EdgeType::DependsOn, 0.4).unwrap()).unwrap());
        assert!(!g.upsert_edge(Edge::new("a", "b", EdgeType::DependsOn, 0.7).unwrap()).unwrap());
        assert_eq!(g.edge_count(), 1);
        let key = EdgeKey::new("a", "b", EdgeType::DependsOn);
        assert_eq!(g.get_edge(&key).unwrap().weight, 0.7);
    }

    #[test]
    fn parallel_edges_of_different_types_coexist() {
        let mut g = graph_with(&["a", "b"]);
        g.upsert_edge(Edge::new("a", "b", EdgeType::DependsOn, 0.4).unwrap()).unwrap();
        g.upsert_edge(Edge::new("a", "b", EdgeType::DataFlowsTo, 0.6).unwrap()).unwrap();
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn neighbors_ordered_by_weight_then_id() {
        let mut g = graph_with(&["a", "b", "c", "d"]);
        g.upsert_edge(Edge::new("a", "c", EdgeType::DependsOn, 0.5).unwrap()).unwrap();
        g.upsert_edge(Edge::new("a", "b", EdgeType::DependsOn, 0.5).unwrap()).unwrap();
        g.upsert_edge(Edge::new("a", "d", EdgeType::TestedBy, 0.9).unwrap()).unwrap();

        let ids: Vec<String> = g
            .neighbors(&"a".into(), &EdgeTypeSet::all(), 0.0)
            .unwrap()
            .into_iter()
            .map(|(_, n)| n.id.0)
            .collect();
        assert_eq!(ids, vec!["d", "b", "c"]);
    }

    #[test]
    fn neighbors_filter_by_type_and_weight() {
        let mut g = graph_with(&["a", "b", "c"]);
        g.upsert_edge(Edge::new("a", "b", EdgeType::DependsOn, 0.2).unwrap()).unwrap();
        g.upsert_edge(Edge::new("a", "c", EdgeType::TestedBy, 0.9).unwrap()).unwrap();

        let only_tests: EdgeTypeSet = [EdgeType::TestedBy].into_iter().collect();
        let found = g.neighbors(&"a".into(), &only_tests, 0.0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.id.as_str(), "c");

        let strong = g.neighbors(&"a".into(), &EdgeTypeSet::all(), 0.5).unwrap();
        assert_eq!(strong.len(), 1);

        assert!(matches!(
            g.neighbors(&"zzz".into(), &EdgeTypeSet::all(), 0.0),
            Err(CoreError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn self_loops_are_allowed() {
        let mut g = graph_with(&["a"]);
        g.upsert_edge(Edge::new("a", "a", EdgeType::DataFlowsTo, 0.3).unwrap()).unwrap();
        let found = g.neighbors(&"a".into(), &EdgeTypeSet::all(), 0.0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.id.as_str(), "a");
    }

    #[test]
    fn set_edge_weight_clamps() {
        let mut g = graph_with(&["a", "b"]);
        g.upsert_edge(Edge::new("a", "b", EdgeType::DependsOn, 0.95).unwrap()).unwrap();
        let key = EdgeKey::new("a", "b", EdgeType::DependsOn);
        assert_eq!(g.set_edge_weight(&key, 1.045, None).unwrap(), 1.0);
        assert_eq!(g.set_edge_weight(&key, -3.0, None).unwrap(), 0.0);
    }

    #[test]
    fn snapshot_roundtrip_preserves_graph() {
        let mut g = graph_with(&["a", "b", "c"]);
        g.upsert_edge(Edge::new("a", "b", EdgeType::Implements, 0.8).unwrap()).unwrap();
        g.upsert_edge(Edge::new("b", "c", EdgeType::TestedBy, 0.6).unwrap()).unwrap();
        let snapshot = g.snapshot();
        let rebuilt = CodeGraph::from_snapshot(snapshot.clone()).unwrap();
        assert_eq!(rebuilt.snapshot(), snapshot);
    }

    proptest! {
        #[test]
        fn upsert_edge_is_idempotent(weight in 0.0f32..=1.0, type_idx in 0usize..7) {
            let edge_type = EdgeType::ALL[type_idx];
            let edge = Edge::new("a", "b", edge_type, weight).unwrap();

            let mut once = graph_with(&["a", "b"]);
            once.upsert_edge(edge.clone()).unwrap();

            // Share the node timestamps so snapshots are comparable.
            let mut twice = CodeGraph::from_snapshot(GraphSnapshot {
                nodes: once.snapshot().nodes,
                edges: vec![],
            })
            .unwrap();
            twice.upsert_edge(edge.clone()).unwrap();
            twice.upsert_edge(edge).unwrap();

            prop_assert_eq!(once.snapshot(), twice.snapshot());
        }

        #[test]
        fn stored_weights_stay_in_bounds(factors in proptest::collection::vec(0.0f32..3.0, 1..40)) {
            let mut g = graph_with(&["a", "b"]);
            g.upsert_edge(Edge::new("a", "b", EdgeType::DependsOn, 0.5).unwrap()).unwrap();
            let key = EdgeKey::new("a", "b", EdgeType::DependsOn);
            for f in factors {
                let current = g.get_edge(&key).unwrap().weight;
                let stored = g.set_edge_weight(&key, current * f, None).unwrap();
                prop_assert!((0.0..=1.0).contains(&stored));
            }
        }
    }
}
