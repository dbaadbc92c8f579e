//! The storage contracts shared by every backend.
//!
//! [`GraphStore`] is the Code Graph Store access contract: point lookups,
//! ordered neighbour enumeration and idempotent upserts. [`PatternStore`]
//! persists the records owned by the debug memory.
//!
//! Both traits take `&self` so that one store instance can be shared
//! (behind an `Arc`) by concurrent sessions. Backends use interior
//! mutability and make each call atomic on its own.

use chrono::{DateTime, Utc};

use graphmend_core::{
    BugPattern, Edge, EdgeKey, EdgeTypeSet, GraphSnapshot, Node, NodeId, ReinforcementRecord,
};

use crate::error::StorageError;
use crate::types::{SizeEstimate, WeightUpdate};

/// Storage contract for the code graph.
pub trait GraphStore: Send + Sync {
    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    /// Returns the node, or [`StorageError::NodeNotFound`].
    fn get_node(&self, id: &NodeId) -> Result<Node, StorageError>;

    /// Outgoing neighbours of `id` over edges whose type is in `edge_types`
    /// and whose weight is at least `min_weight`.
    ///
    /// Ordered by weight descending, ties broken by neighbour id ascending.
    /// An edge whose target node is missing is logged and skipped.
    fn neighbors(
        &self,
        id: &NodeId,
        edge_types: &EdgeTypeSet,
        min_weight: f32,
    ) -> Result<Vec<(Edge, Node)>, StorageError>;

    fn size_estimate(&self) -> Result<SizeEstimate, StorageError>;

    /// Every node in the store, ordered by id. Used for seed selection.
    fn scan_nodes(&self) -> Result<Vec<Node>, StorageError>;

    /// Returns the edge, or [`StorageError::EdgeNotFound`].
    fn get_edge(&self, key: &EdgeKey) -> Result<Edge, StorageError>;

    /// Every edge in the store, ordered by key.
    fn list_edges(&self) -> Result<Vec<Edge>, StorageError>;

    // -------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------

    /// Inserts a node or refreshes its embedding and `last_modified`.
    /// Returns `true` if the node was new.
    fn upsert_node(&self, node: Node) -> Result<bool, StorageError>;

    /// Inserts an edge or overwrites weight and timestamp of the edge with
    /// the same (from, to, type). Returns `true` if the edge was new.
    fn upsert_edge(&self, edge: Edge) -> Result<bool, StorageError>;

    /// Applies a batch of weight writes atomically, clamping each weight
    /// into [0, 1]. Returns the stored weights in input order.
    fn set_edge_weights(&self, updates: &[WeightUpdate]) -> Result<Vec<f32>, StorageError>;

    // -------------------------------------------------------------------
    // Bulk helpers built on the primitives above
    // -------------------------------------------------------------------

    /// Upserts every node, then every edge, of a snapshot.
    fn import_snapshot(&self, snapshot: GraphSnapshot) -> Result<SizeEstimate, StorageError> {
        for node in snapshot.nodes {
            self.upsert_node(node)?;
        }
        for edge in snapshot.edges {
            self.upsert_edge(edge)?;
        }
        self.size_estimate()
    }

    fn export_snapshot(&self) -> Result<GraphSnapshot, StorageError> {
        Ok(GraphSnapshot {
            nodes: self.scan_nodes()?,
            edges: self.list_edges()?,
        })
    }
}

/// Storage contract for learned debug memory records.
pub trait PatternStore: Send + Sync {
    fn get_pattern(&self, digest: &str) -> Result<Option<BugPattern>, StorageError>;

    /// Inserts or replaces the pattern keyed by its signature digest.
    fn put_pattern(&self, pattern: &BugPattern) -> Result<(), StorageError>;

    /// Returns `true` if a pattern was removed.
    fn delete_pattern(&self, digest: &str) -> Result<bool, StorageError>;

    /// Every stored pattern, ordered by digest.
    fn list_patterns(&self) -> Result<Vec<BugPattern>, StorageError>;

    fn get_reinforcement(&self, key: &EdgeKey) -> Result<Option<ReinforcementRecord>, StorageError>;

    fn put_reinforcement(&self, record: &ReinforcementRecord) -> Result<(), StorageError>;

    /// Completion time of the most recent decay pass.
    fn last_decay(&self) -> Result<Option<DateTime<Utc>>, StorageError>;

    fn set_last_decay(&self, at: DateTime<Utc>) -> Result<(), StorageError>;
}
