//! In-memory implementation of [`GraphStore`] and [`PatternStore`].
//!
//! [`InMemoryStore`] keeps a [`CodeGraph`] and the memory records behind
//! `parking_lot` read-write locks. Nothing survives the process; it backs
//! tests and ephemeral servers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use graphmend_core::{
    BugPattern, CodeGraph, Edge, EdgeKey, EdgeTypeSet, Node, NodeId, ReinforcementRecord,
};

use crate::error::StorageError;
use crate::traits::{GraphStore, PatternStore};
use crate::types::{SizeEstimate, WeightUpdate};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    graph: RwLock<CodeGraph>,
    patterns: RwLock<BTreeMap<String, BugPattern>>,
    reinforcements: RwLock<BTreeMap<EdgeKey, ReinforcementRecord>>,
    last_decay: RwLock<Option<DateTime<Utc>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an already-built graph.
    pub fn from_graph(graph: CodeGraph) -> Self {
        InMemoryStore {
            graph: RwLock::new(graph),
            ..Self::default()
        }
    }
}

impl GraphStore for InMemoryStore {
    fn get_node(&self, id: &NodeId) -> Result<Node, StorageError> {
        self.graph
            .read()
            .get_node(id)
            .cloned()
            .ok_or_else(|| StorageError::NodeNotFound { id: id.0.clone() })
    }

    fn neighbors(
        &self,
        id: &NodeId,
        edge_types: &EdgeTypeSet,
        min_weight: f32,
    ) -> Result<Vec<(Edge, Node)>, StorageError> {
        Ok(self.graph.read().neighbors(id, edge_types, min_weight)?)
    }

    fn size_estimate(&self) -> Result<SizeEstimate, StorageError> {
        let graph = self.graph.read();
        Ok(SizeEstimate {
            node_count: graph.node_count(),
            edge_count: graph.edge_count(),
        })
    }

    fn scan_nodes(&self) -> Result<Vec<Node>, StorageError> {
        let mut nodes: Vec<Node> = self.graph.read().nodes().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    fn get_edge(&self, key: &EdgeKey) -> Result<Edge, StorageError> {
        self.graph
            .read()
            .get_edge(key)
            .cloned()
            .ok_or_else(|| StorageError::EdgeNotFound {
                key: key.to_string(),
            })
    }

    fn list_edges(&self) -> Result<Vec<Edge>, StorageError> {
        let mut edges: Vec<Edge> = self.graph.read().edges().cloned().collect();
        edges.sort_by_key(|e| e.key());
        Ok(edges)
    }

    fn upsert_node(&self, node: Node) -> Result<bool, StorageError> {
        Ok(self.graph.write().upsert_node(node)?)
    }

    fn upsert_edge(&self, edge: Edge) -> Result<bool, StorageError> {
        Ok(self.graph.write().upsert_edge(edge)?)
    }

    fn set_edge_weights(&self, updates: &[WeightUpdate]) -> Result<Vec<f32>, StorageError> {
        let mut graph = self.graph.write();
        // Validate the whole batch before touching anything.
        if let Some(missing) = updates.iter().find(|u| graph.get_edge(&u.key).is_none()) {
            return Err(StorageError::EdgeNotFound {
                key: missing.key.to_string(),
            });
        }
        updates
            .iter()
            .map(|u| Ok(graph.set_edge_weight(&u.key, u.weight, u.reinforced_at)?))
            .collect()
    }
}

impl PatternStore for InMemoryStore {
    fn get_pattern(&self, digest: &str) -> Result<Option<BugPattern>, StorageError> {
        Ok(self.patterns.read().get(digest).cloned())
    }

    fn put_pattern(&self, pattern: &BugPattern) -> Result<(), StorageError> {
        self.patterns
            .write()
            .insert(pattern.digest().to_string(), pattern.clone());
        Ok(())
    }

    fn delete_pattern(&self, digest: &str) -> Result<bool, StorageError> {
        Ok(self.patterns.write().remove(digest).is_some())
    }

    fn list_patterns(&self) -> Result<Vec<BugPattern>, StorageError> {
        Ok(self.patterns.read().values().cloned().collect())
    }

    fn get_reinforcement(&self, key: &EdgeKey) -> Result<Option<ReinforcementRecord>, StorageError> {
        Ok(self.reinforcements.read().get(key).cloned())
    }

    fn put_reinforcement(&self, record: &ReinforcementRecord) -> Result<(), StorageError> {
        self.reinforcements
            .write()
            .insert(record.edge.clone(), record.clone());
        Ok(())
    }

    fn last_decay(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(*self.last_decay.read())
    }

    fn set_last_decay(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        *self.last_decay.write() = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphmend_core::{BugSignature, EdgeType, Embedding, GraphSnapshot, NodeKind};

    fn node(id: &str) -> Node {
        Node::new(id, NodeKind::Function, format!("src/{id}.rs"), Embedding::new(vec![0.5, 0.5]))
    }

    fn populated() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .import_snapshot(GraphSnapshot {
                nodes: vec![node("a"), node("b"), node("c")],
                edges: vec![
                    Edge::new("a", "b", EdgeType::DependsOn, 0.9).unwrap(),
                    Edge::new("b", "c", EdgeType::TestedBy, 0.95).unwrap(),
                ],
            })
            .unwrap();
        store
    }

    #[test]
    fn get_node_reports_not_found() {
        let store = populated();
        assert_eq!(store.get_node(&"a".into()).unwrap().id.as_str(), "a");
        let err = store.get_node(&"zzz".into()).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn size_estimate_counts_nodes_and_edges() {
        let store = populated();
        assert_eq!(
            store.size_estimate().unwrap(),
            SizeEstimate {
                node_count: 3,
                edge_count: 2
            }
        );
    }

    #[test]
    fn dangling_edge_is_rejected() {
        let store = populated();
        let err = store
            .upsert_edge(Edge::new("a", "ghost", EdgeType::DependsOn, 0.5).unwrap())
            .unwrap_err();
        assert!(matches!(err, StorageError::Invariant(_)));
    }

    #[test]
    fn weight_batch_is_all_or_nothing() {
        let store = populated();
        let good = EdgeKey::new("a", "b", EdgeType::DependsOn);
        let updates = vec![
            WeightUpdate {
                key: good.clone(),
                weight: 0.1,
                reinforced_at: None,
            },
            WeightUpdate {
                key: EdgeKey::new("a", "c", EdgeType::DependsOn),
                weight: 0.1,
                reinforced_at: None,
            },
        ];
        assert!(store.set_edge_weights(&updates).unwrap_err().is_not_found());
        assert_eq!(store.get_edge(&good).unwrap().weight, 0.9);

        let stored = store
            .set_edge_weights(&[WeightUpdate {
                key: good.clone(),
                weight: 1.5,
                reinforced_at: None,
            }])
            .unwrap();
        assert_eq!(stored, vec![1.0]);
    }

    #[test]
    fn pattern_crud() {
        let store = InMemoryStore::new();
        let sig = BugSignature::from_text("NullPointerException in parser").unwrap();
        let pattern = BugPattern::new(sig.clone(), Utc::now());
        store.put_pattern(&pattern).unwrap();
        assert_eq!(store.get_pattern(&sig.digest).unwrap(), Some(pattern));
        assert_eq!(store.list_patterns().unwrap().len(), 1);
        assert!(store.delete_pattern(&sig.digest).unwrap());
        assert!(!store.delete_pattern(&sig.digest).unwrap());
    }

    #[test]
    fn last_decay_roundtrip() {
        let store = InMemoryStore::new();
        assert_eq!(store.last_decay().unwrap(), None);
        let now = Utc::now();
        store.set_last_decay(now).unwrap();
        assert_eq!(store.last_decay().unwrap(), Some(now));
    }
}
