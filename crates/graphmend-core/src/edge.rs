//! Typed, weighted relationships between code artifacts.
//!
//! The graph is a multigraph: several edges of different [`EdgeType`]s may
//! join the same ordered node pair, and each is identified by its
//! [`EdgeKey`]. Edges of the same key are never duplicated; an upsert
//! overwrites weight and timestamp instead.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::NodeId;

/// Relationship kinds between artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Implements,
    DependsOn,
    DataFlowsTo,
    TestedBy,
    Documents,
    Modifies,
    HistoricallyRelated,
}

impl EdgeType {
    /// Every edge type, in declaration order.
    pub const ALL: [EdgeType; 7] = [
        EdgeType::Implements,
        EdgeType::DependsOn,
        EdgeType::DataFlowsTo,
        EdgeType::TestedBy,
        EdgeType::Documents,
        EdgeType::Modifies,
        EdgeType::HistoricallyRelated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Implements => "implements",
            EdgeType::DependsOn => "depends_on",
            EdgeType::DataFlowsTo => "data_flows_to",
            EdgeType::TestedBy => "tested_by",
            EdgeType::Documents => "documents",
            EdgeType::Modifies => "modifies",
            EdgeType::HistoricallyRelated => "historically_related",
        }
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EdgeType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownEdgeType(s.to_string()))
    }
}

/// A set of edge types, used to filter neighbour enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<EdgeType>", into = "Vec<EdgeType>")]
pub struct EdgeTypeSet(u8);

impl EdgeTypeSet {
    pub fn empty() -> Self {
        EdgeTypeSet(0)
    }

    pub fn all() -> Self {
        EdgeType::ALL.iter().copied().collect()
    }

    pub fn contains(&self, edge_type: EdgeType) -> bool {
        self.0 & edge_type.bit() != 0
    }

    pub fn insert(&mut self, edge_type: EdgeType) {
        self.0 |= edge_type.bit();
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = EdgeType> + '_ {
        EdgeType::ALL.iter().copied().filter(|t| self.contains(*t))
    }
}

impl Default for EdgeTypeSet {
    fn default() -> Self {
        EdgeTypeSet::all()
    }
}

impl FromIterator<EdgeType> for EdgeTypeSet {
    fn from_iter<I: IntoIterator<Item = EdgeType>>(iter: I) -> Self {
        let mut set = EdgeTypeSet::empty();
        for t in iter {
            set.insert(t);
        }
        set
    }
}

impl From<Vec<EdgeType>> for EdgeTypeSet {
    fn from(types: Vec<EdgeType>) -> Self {
        types.into_iter().collect()
    }
}

impl From<EdgeTypeSet> for Vec<EdgeType> {
    fn from(set: EdgeTypeSet) -> Self {
        set.iter().collect()
    }
}

/// Total priority order over edge types; earlier entries are preferred.
///
/// Types missing from the list rank after every listed type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeTypeOrder(pub Vec<EdgeType>);

impl EdgeTypeOrder {
    pub fn rank(&self, edge_type: EdgeType) -> usize {
        self.0
            .iter()
            .position(|t| *t == edge_type)
            .unwrap_or(self.0.len())
    }
}

impl Default for EdgeTypeOrder {
    fn default() -> Self {
        EdgeTypeOrder(vec![
            EdgeType::Implements,
            EdgeType::DependsOn,
            EdgeType::DataFlowsTo,
            EdgeType::TestedBy,
            EdgeType::Documents,
            EdgeType::Modifies,
            EdgeType::HistoricallyRelated,
        ])
    }
}

/// Identity of one edge in the multigraph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub from: NodeId,
    pub to: NodeId,
    pub edge_type: EdgeType,
}

impl EdgeKey {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, edge_type: EdgeType) -> Self {
        EdgeKey {
            from: from.into(),
            to: to.into(),
            edge_type,
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.from, self.edge_type, self.to)
    }
}

/// A directed, typed, weighted edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub edge_type: EdgeType,
    /// Relationship strength in [0, 1].
    pub weight: f32,
    pub last_reinforced: DateTime<Utc>,
}

impl Edge {
    /// Builds an edge stamped with the current time, rejecting weights
    /// outside [0, 1].
    pub fn new(
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        edge_type: EdgeType,
        weight: f32,
    ) -> Result<Self, CoreError> {
        Self::at(from, to, edge_type, weight, Utc::now())
    }

    pub fn at(
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        edge_type: EdgeType,
        weight: f32,
        last_reinforced: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        validate_weight(weight)?;
        Ok(Edge {
            from: from.into(),
            to: to.into(),
            edge_type,
            weight,
            last_reinforced,
        })
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            from: self.from.clone(),
            to: self.to.clone(),
            edge_type: self.edge_type,
        }
    }
}

/// Returns an error unless `weight` is finite and within [0, 1].
pub fn validate_weight(weight: f32) -> Result<(), CoreError> {
    if weight.is_finite() && (0.0..=1.0).contains(&weight) {
        Ok(())
    } else {
        Err(CoreError::InvalidWeight { weight })
    }
}

/// Clamps a computed weight into [0, 1]. NaN collapses to 0.
pub fn clamp_weight(weight: f32) -> f32 {
    if weight.is_nan() {
        0.0
    } else {
        weight.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_type_roundtrips_through_str() {
        for t in EdgeType::ALL {
            assert_eq!(t.as_str().parse::<EdgeType>().unwrap(), t);
        }
        assert!("calls".parse::<EdgeType>().is_err());
    }

    #[test]
    fn edge_type_set_membership() {
        let set: EdgeTypeSet = [EdgeType::TestedBy, EdgeType::DependsOn].into_iter().collect();
        assert!(set.contains(EdgeType::TestedBy));
        assert!(set.contains(EdgeType::DependsOn));
        assert!(!set.contains(EdgeType::Implements));
        assert_eq!(set.len(), 2);
        assert_eq!(EdgeTypeSet::all().len(), EdgeType::ALL.len());
    }

    #[test]
    fn edge_type_set_serializes_as_list() {
        let set: EdgeTypeSet = [EdgeType::Documents].into_iter().collect();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "[\"documents\"]");
        let back: EdgeTypeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn default_order_prefers_implements() {
        let order = EdgeTypeOrder::default();
        assert!(order.rank(EdgeType::Implements) < order.rank(EdgeType::DependsOn));
        assert!(order.rank(EdgeType::DependsOn) < order.rank(EdgeType::DataFlowsTo));
        assert!(order.rank(EdgeType::TestedBy) < order.rank(EdgeType::Documents));
        assert!(
            order.rank(EdgeType::Documents) < order.rank(EdgeType::HistoricallyRelated)
        );
    }

    #[test]
    fn unlisted_types_rank_last() {
        let order = EdgeTypeOrder(vec![EdgeType::TestedBy]);
        assert_eq!(order.rank(EdgeType::TestedBy), 0);
        assert_eq!(order.rank(EdgeType::Implements), 1);
    }

    #[test]
    fn edge_rejects_out_of_range_weight() {
        assert!(Edge::new("a", "b", EdgeType::DependsOn, 1.2).is_err());
        assert!(Edge::new("a", "b", EdgeType::DependsOn, -0.1).is_err());
        assert!(Edge::new("a", "b", EdgeType::DependsOn, f32::NAN).is_err());
        assert!(Edge::new("a", "b", EdgeType::DependsOn, 1.0).is_ok());
    }

    #[test]
    fn clamp_weight_bounds() {
        assert_eq!(clamp_weight(1.5), 1.0);
        assert_eq!(clamp_weight(-2.0), 0.0);
        assert_eq!(clamp_weight(f32::NAN), 0.0);
        assert_eq!(clamp_weight(0.42), 0.42);
    }
}
