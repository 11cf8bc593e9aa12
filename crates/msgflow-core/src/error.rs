//! Core error types for msgflow-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering every
//! failure the graph store, feature frames, and tensor layer can report. All
//! of them are synchronous and surface at the operation that detects them.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::{DType, Device};

/// Which id space an index belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Node,
    Edge,
    Row,
    Axis,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexKind::Node => "node",
            IndexKind::Edge => "edge",
            IndexKind::Row => "row",
            IndexKind::Axis => "axis",
        };
        f.write_str(name)
    }
}

/// Core errors produced by the msgflow-core crate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// A node, edge, row, or axis reference outside `[0, bound)`.
    #[error("invalid {kind} index {index} (bound {bound})")]
    InvalidIndex {
        kind: IndexKind,
        index: usize,
        bound: usize,
    },

    /// Tensor shapes disagree (leading dimension or per-item feature shape).
    #[error("shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// A field was read that the frame has never stored.
    #[error("unknown field '{field}'")]
    UnknownField { field: String },

    /// A field has rows that were never written and no initializer is
    /// registered to fill them.
    #[error("field '{field}' has {rows} uninitialized row(s) and no initializer")]
    UninitializedField { field: String, rows: usize },

    /// Two tensors live on incompatible devices.
    #[error("device mismatch: expected {expected}, got {got}")]
    DeviceMismatch { expected: Device, got: Device },

    /// Two tensors have different element types.
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    /// A bracketed tree string could not be parsed.
    #[error("invalid tree at byte {offset}: {reason}")]
    InvalidTree { offset: usize, reason: String },

    /// Batching was asked to combine zero graphs.
    #[error("cannot batch an empty list of graphs")]
    EmptyBatch,
}

impl CoreError {
    /// Convenience constructor for [`CoreError::ShapeMismatch`].
    pub fn shape(context: impl Into<String>, expected: &[usize], got: &[usize]) -> Self {
        CoreError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    /// Convenience constructor for [`CoreError::InvalidIndex`].
    pub fn index(kind: IndexKind, index: usize, bound: usize) -> Self {
        CoreError::InvalidIndex { kind, index, bound }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = CoreError::index(IndexKind::Node, 9, 5);
        assert_eq!(err.to_string(), "invalid node index 9 (bound 5)");

        let err = CoreError::UnknownField { field: "h".into() };
        assert_eq!(err.to_string(), "unknown field 'h'");

        let err = CoreError::DeviceMismatch {
            expected: Device::Cpu,
            got: Device::Accel(1),
        };
        assert_eq!(err.to_string(), "device mismatch: expected cpu, got accel:1");
    }
}
