//! Stable ID newtypes for graph entities.
//!
//! Node and edge identifiers are distinct newtype wrappers over `u32`, so a
//! `NodeId` cannot be accidentally used where an `EdgeId` is expected. Node ids
//! are dense in `0..num_nodes`; edge ids are dense in `0..num_edges` and are
//! assigned in insertion order.

use std::fmt;

use petgraph::graph::{EdgeIndex, NodeIndex};
use serde::{Deserialize, Serialize};

/// Node identifier. Maps to a petgraph `NodeIndex<u32>` when exporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Edge identifier, equal to the edge's insertion position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u32);

/// Stable index of a field inside one feature frame.
///
/// Assigned the first time a field name is written. Removing the field does
/// not release the id or shift any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId(pub u32);

impl NodeId {
    /// Returns the id as a `usize` row index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl EdgeId {
    /// Returns the id as a `usize` row index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// Display implementations -- just print the inner value.

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Bridge between our ids and petgraph's indices.

impl From<NodeIndex<u32>> for NodeId {
    fn from(idx: NodeIndex<u32>) -> Self {
        NodeId(idx.index() as u32)
    }
}

impl From<NodeId> for NodeIndex<u32> {
    fn from(id: NodeId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

impl From<EdgeId> for EdgeIndex<u32> {
    fn from(id: EdgeId) -> Self {
        EdgeIndex::new(id.0 as usize)
    }
}

/// Converts a slice of raw indices into node ids.
pub fn node_ids(raw: &[u32]) -> Vec<NodeId> {
    raw.iter().copied().map(NodeId).collect()
}

/// Converts a slice of raw indices into edge ids.
pub fn edge_ids(raw: &[u32]) -> Vec<EdgeId> {
    raw.iter().copied().map(EdgeId).collect()
}
