//! Core error types for graphmend-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! invariants of the code graph data model.

use thiserror::Error;

use crate::edge::EdgeKey;
use crate::id::NodeId;

/// Core errors produced by the graphmend-core crate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A node id was not found in the graph.
    #[error("node not found: {id}")]
    NodeNotFound { id: NodeId },

    /// An edge (from, to, type) triple was not found in the graph.
    #[error("edge not found: {key}")]
    EdgeNotFound { key: EdgeKey },

    /// An edge references a node that does not exist.
    #[error("edge {key} references missing node {missing}")]
    DanglingEdge { key: EdgeKey, missing: NodeId },

    /// An edge weight outside [0, 1] (or not finite) was supplied.
    #[error("invalid edge weight {weight}: must be within [0, 1]")]
    InvalidWeight { weight: f32 },

    /// A node embedding does not match the graph's fixed dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An upsert tried to change a node field that is fixed at creation.
    #[error("node {id} is immutable except for its embedding and last-modified time")]
    NodeIdentityChanged { id: NodeId },

    /// A stored node kind string could not be parsed.
    #[error("unknown node kind: '{0}'")]
    UnknownNodeKind(String),

    /// A stored edge type string could not be parsed.
    #[error("unknown edge type: '{0}'")]
    UnknownEdgeType(String),
}
