//! Core data model for graphmend.
//!
//! A repository is represented as a typed, weighted multigraph of code
//! artifacts ([`Node`]) joined by directed relationships ([`Edge`]). This
//! crate owns that model, the [`CodeGraph`] container that enforces its
//! invariants, and the shared records that the retrieval engine and the
//! debug memory exchange (query embeddings, bug signatures, learned
//! patterns).

pub mod edge;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod pattern;
pub mod query;
pub mod signature;

// Re-export commonly used types
pub use edge::{clamp_weight, Edge, EdgeKey, EdgeType, EdgeTypeOrder, EdgeTypeSet};
pub use embedding::{Embedder, Embedding, HashingEmbedder};
pub use error::CoreError;
pub use graph::{CodeGraph, GraphSnapshot};
pub use id::NodeId;
pub use node::{ContentRef, Node, NodeKind};
pub use pattern::{BugPattern, EdgeAdjustment, FixTemplate, ReinforcementRecord};
pub use query::DebugQuery;
pub use signature::BugSignature;
