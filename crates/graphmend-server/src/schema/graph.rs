//! Ingestion request/response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use graphmend_core::{EdgeType, NodeId, NodeKind};

/// A node to upsert.
///
/// Either `embedding` is given, or the node is embedded from `text` (or
/// its content reference when `text` is absent) with the server's query
/// embedder.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeInput {
    pub id: NodeId,
    pub kind: NodeKind,
    pub content_ref: String,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertNodesRequest {
    pub nodes: Vec<NodeInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeInput {
    pub from: NodeId,
    pub to: NodeId,
    pub edge_type: EdgeType,
    pub weight: f32,
    #[serde(default)]
    pub last_reinforced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertEdgesRequest {
    pub edges: Vec<EdgeInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpsertResponse {
    /// Records that did not exist before.
    pub created: usize,
    /// Records that were overwritten.
    pub updated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStatsResponse {
    pub node_count: usize,
    pub edge_count: usize,
    pub pattern_count: usize,
}
