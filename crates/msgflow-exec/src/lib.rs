//! Message-passing execution over msgflow graphs.
//!
//! This crate provides:
//! - **Registry**: named built-in message and reduce combinators
//!   ([`CombinatorRegistry`])
//! - **Functions**: built-in or user-supplied message, reduce, and node
//!   functions ([`MessageFn`], [`ReduceFn`], [`NodeFn`])
//! - **Scheduler**: `update_all`, `send_and_recv`, `pull`, `push`, split
//!   `send`/`recv` through an [`Outbox`], `apply_nodes`, `apply_edges`, and
//!   node/edge filters, with a fused kernel for built-in pairs and
//!   degree-bucketed batching for user reducers ([`Scheduler`],
//!   [`MessagePassing`])
//! - **Traversal**: BFS, DFS, and topological frontiers ([`Frontiers`])
//! - **Propagation**: frontier-ordered message passing ([`Propagation`])

pub mod batch;
pub mod error;
pub mod function;
pub mod outbox;
pub mod propagate;
pub mod registry;
pub mod scheduler;
pub mod traversal;

pub use batch::{EdgeBatch, NodeBatch};
pub use error::ExecError;
pub use function::{FieldMap, MessageFn, NodeFn, ReduceFn};
pub use outbox::Outbox;
pub use propagate::{prop_edges, prop_edges_dfs, prop_nodes, prop_nodes_bfs, prop_nodes_topo, Propagation};
pub use registry::{BinaryOp, CombinatorRegistry, MessageKind, Target};
pub use scheduler::{MessagePassing, Scheduler, SchedulerConfig};
pub use traversal::{
    bfs_edges, bfs_nodes, dfs_edges, dfs_labeled_edges, topological_nodes, DfsOptions, EdgeLabel, Frontiers,
};
