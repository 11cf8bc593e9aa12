//! Graph storage for message passing: topology, sparse adjacency, feature
//! frames, and the dense tensor type they hold.

pub mod error;
pub mod frame;
pub mod graph;
pub mod id;
pub mod sparse;
pub mod tensor;
pub mod tree;

// Re-export commonly used types
pub use error::{CoreError, IndexKind};
pub use frame::{uniform_initializer, zero_initializer, Frame, Initializer};
pub use graph::{Graph, GraphTopology};
pub use id::{EdgeId, FieldId, NodeId};
pub use sparse::SparseMatrix;
pub use tensor::{broadcast_feature, DType, Device, ReduceKind, Shape, Tensor};
pub use tree::{parse_bracket_tree, PAD_WORD};
