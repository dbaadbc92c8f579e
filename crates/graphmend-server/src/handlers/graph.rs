//! Ingestion handlers for the code graph.

use axum::extract::State;
use axum::Json;
use chrono::Utc;

use graphmend_core::{Edge, Embedding, Node};

use crate::error::ApiError;
use crate::schema::graph::{
    GraphStatsResponse, NodeInput, UpsertEdgesRequest, UpsertNodesRequest, UpsertResponse,
};
use crate::state::AppState;

fn build_node(state: &AppState, input: NodeInput) -> Result<Node, ApiError> {
    let dimension = state.embedder.dimension();
    let embedding = match input.embedding {
        Some(values) if values.len() != dimension => {
            return Err(ApiError::InvalidGraph(format!(
                "node {} has a {}-dimensional embedding, expected {}",
                input.id,
                values.len(),
                dimension
            )))
        }
        Some(values) => Embedding::new(values),
        None => state
            .embedder
            .embed(input.text.as_deref().unwrap_or(&input.content_ref)),
    };
    Ok(Node::new(input.id, input.kind, input.content_ref, embedding)
        .with_last_modified(input.last_modified.unwrap_or_else(Utc::now)))
}

/// Upserts nodes. Existing nodes get a fresh embedding and timestamp.
///
/// `POST /graph/nodes`
pub async fn upsert_nodes(
    State(state): State<AppState>,
    Json(req): Json<UpsertNodesRequest>,
) -> Result<Json<UpsertResponse>, ApiError> {
    let mut response = UpsertResponse {
        created: 0,
        updated: 0,
    };
    for input in req.nodes {
        let node = build_node(&state, input)?;
        if state.graph.upsert_node(node)? {
            response.created += 1;
        } else {
            response.updated += 1;
        }
    }
    Ok(Json(response))
}

/// Upserts edges. Both endpoints must already exist.
///
/// `POST /graph/edges`
pub async fn upsert_edges(
    State(state): State<AppState>,
    Json(req): Json<UpsertEdgesRequest>,
) -> Result<Json<UpsertResponse>, ApiError> {
    let mut response = UpsertResponse {
        created: 0,
        updated: 0,
    };
    for input in req.edges {
        let at = input.last_reinforced.unwrap_or_else(Utc::now);
        let edge = Edge::at(input.from, input.to, input.edge_type, input.weight, at)?;
        if state.graph.upsert_edge(edge)? {
            response.created += 1;
        } else {
            response.updated += 1;
        }
    }
    Ok(Json(response))
}

/// `GET /graph/stats`
pub async fn graph_stats(
    State(state): State<AppState>,
) -> Result<Json<GraphStatsResponse>, ApiError> {
    let size = state.graph.size_estimate()?;
    let pattern_count = state.patterns.list_patterns()?.len();
    Ok(Json(GraphStatsResponse {
        node_count: size.node_count,
        edge_count: size.edge_count,
        pattern_count,
    }))
}
