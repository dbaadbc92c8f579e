//! Stable artifact identifiers.
//!
//! Node ids are assigned by the ingestion collaborator (e.g. a qualified
//! function name or a commit hash) and are unique within a repository scope.
//! They order lexicographically, which is the tie-break used wherever
//! traversal needs a deterministic order.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        NodeId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_display() {
        assert_eq!(format!("{}", NodeId::new("auth::login")), "auth::login");
    }

    #[test]
    fn node_ids_order_lexicographically() {
        let mut ids = vec![NodeId::from("b"), NodeId::from("a"), NodeId::from("ab")];
        ids.sort();
        assert_eq!(ids, vec![NodeId::from("a"), NodeId::from("ab"), NodeId::from("b")]);
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&NodeId::from("src/lib.rs")).unwrap();
        assert_eq!(json, "\"src/lib.rs\"");
    }
}
