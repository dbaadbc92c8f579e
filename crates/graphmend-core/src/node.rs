//! Code artifact nodes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;
use crate::error::CoreError;
use crate::id::NodeId;

/// The kind of artifact a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Function,
    /// A module or source file.
    Module,
    Test,
    Documentation,
    Commit,
    Config,
}

impl NodeKind {
    pub const ALL: [NodeKind; 6] = [
        NodeKind::Function,
        NodeKind::Module,
        NodeKind::Test,
        NodeKind::Documentation,
        NodeKind::Commit,
        NodeKind::Config,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Function => "function",
            NodeKind::Module => "module",
            NodeKind::Test => "test",
            NodeKind::Documentation => "documentation",
            NodeKind::Commit => "commit",
            NodeKind::Config => "config",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| CoreError::UnknownNodeKind(s.to_string()))
    }
}

/// Opaque handle to the artifact's source. The graph never owns content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(pub String);

impl ContentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        ContentRef(reference.into())
    }
}

/// A code, test, documentation, commit or config artifact.
///
/// Identity, kind and content reference are fixed at creation; only the
/// embedding and `last_modified` are refreshed when the artifact changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub content_ref: ContentRef,
    pub last_modified: DateTime<Utc>,
    pub embedding: Embedding,
}

impl Node {
    pub fn new(
        id: impl Into<NodeId>,
        kind: NodeKind,
        content_ref: impl Into<String>,
        embedding: Embedding,
    ) -> Self {
        Node {
            id: id.into(),
            kind,
            content_ref: ContentRef::new(content_ref),
            last_modified: Utc::now(),
            embedding,
        }
    }

    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = at;
        self
    }

    /// Returns `true` if `other` describes the same artifact, i.e. it only
    /// differs in refreshable fields.
    pub fn same_artifact(&self, other: &Node) -> bool {
        self.id == other.id && self.kind == other.kind && self.content_ref == other.content_ref
    }
}
