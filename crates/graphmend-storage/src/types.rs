//! Storage-layer value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use graphmend_core::EdgeKey;

/// Node and edge counts, used to bound worst-case traversal work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SizeEstimate {
    pub node_count: usize,
    pub edge_count: usize,
}

/// A pending edge-weight write.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightUpdate {
    pub key: EdgeKey,
    /// Target weight; backends clamp it into [0, 1].
    pub weight: f32,
    /// New last-reinforced timestamp, or `None` to keep the current one.
    pub reinforced_at: Option<DateTime<Utc>>,
}
