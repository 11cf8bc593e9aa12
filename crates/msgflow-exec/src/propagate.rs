//! Propagation: message passing driven frontier by frontier.
//!
//! A propagation computes a traversal order from the current topology, then
//! runs one scheduler call per frontier, strictly in order, so each frontier
//! sees the features written by all earlier ones. Node frontiers are
//! processed with `pull` (every in-edge of the frontier's nodes); edge
//! frontiers with `send_and_recv`.
//!
//! The whole order is computed before the first frontier runs. An order that
//! cannot be built (a cycle under topological propagation, an invalid seed)
//! therefore fails without writing anything. A failure inside a later
//! frontier leaves the writes of earlier frontiers in place.

use msgflow_core::{EdgeId, Graph, NodeId};

use crate::error::ExecError;
use crate::function::{MessageFn, NodeFn, ReduceFn};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::traversal::{bfs_nodes, dfs_labeled_edges, topological_nodes, DfsOptions, Frontiers};

/// A message/reduce pair plus the knobs shared by every propagation order.
///
/// Holds no graph state; each call re-derives its order from the graph it
/// is given.
#[derive(Debug, Clone)]
pub struct Propagation<'f> {
    message: &'f MessageFn,
    reduce: &'f ReduceFn,
    apply: Option<&'f NodeFn>,
    reverse: bool,
    config: SchedulerConfig,
}

impl<'f> Propagation<'f> {
    pub fn new(message: &'f MessageFn, reduce: &'f ReduceFn) -> Self {
        Propagation {
            message,
            reduce,
            apply: None,
            reverse: false,
            config: SchedulerConfig::default(),
        }
    }

    /// Runs `apply` on every reduced frontier.
    pub fn with_apply(mut self, apply: &'f NodeFn) -> Self {
        self.apply = Some(apply);
        self
    }

    /// Computes orders over in-edges instead of out-edges. Messages still
    /// flow along the stored edge direction.
    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Pulls into each node frontier in turn.
    pub fn prop_nodes(&self, graph: &mut Graph, frontiers: &Frontiers<NodeId>) -> Result<(), ExecError> {
        let mut scheduler = Scheduler::new(graph, self.config);
        for (k, frontier) in frontiers.iter().enumerate() {
            tracing::trace!("node frontier {}: {} nodes", k, frontier.len());
            scheduler.pull(frontier, self.message, self.reduce, self.apply)?;
        }
        Ok(())
    }

    /// Sends along each edge frontier in turn.
    pub fn prop_edges(&self, graph: &mut Graph, frontiers: &Frontiers<EdgeId>) -> Result<(), ExecError> {
        let mut scheduler = Scheduler::new(graph, self.config);
        for (k, frontier) in frontiers.iter().enumerate() {
            tracing::trace!("edge frontier {}: {} edges", k, frontier.len());
            scheduler.send_and_recv(frontier, self.message, self.reduce, self.apply)?;
        }
        Ok(())
    }

    /// Breadth-first layers from `sources`.
    pub fn prop_nodes_bfs(&self, graph: &mut Graph, sources: &[NodeId]) -> Result<(), ExecError> {
        let frontiers = bfs_nodes(graph, sources, self.reverse)?;
        tracing::debug!("bfs propagation: {} frontiers", frontiers.len());
        self.prop_nodes(graph, &frontiers)
    }

    /// Kahn layers over the whole graph.
    pub fn prop_nodes_topo(&self, graph: &mut Graph) -> Result<(), ExecError> {
        let frontiers = topological_nodes(graph, self.reverse)?;
        tracing::debug!("topological propagation: {} frontiers", frontiers.len());
        self.prop_nodes(graph, &frontiers)
    }

    /// Depth-first edges from `sources`, one edge per step.
    pub fn prop_edges_dfs(
        &self,
        graph: &mut Graph,
        sources: &[NodeId],
        has_reverse_edge: bool,
        has_nontree_edge: bool,
    ) -> Result<(), ExecError> {
        let options = DfsOptions {
            reverse: self.reverse,
            has_reverse_edge,
            has_nontree_edge,
        };
        let frontiers = dfs_labeled_edges(graph, sources, options)?;
        tracing::debug!("dfs propagation: {} edges", frontiers.len());
        self.prop_edges(graph, &frontiers)
    }
}

pub fn prop_nodes(
    graph: &mut Graph,
    frontiers: &Frontiers<NodeId>,
    message: &MessageFn,
    reduce: &ReduceFn,
) -> Result<(), ExecError> {
    Propagation::new(message, reduce).prop_nodes(graph, frontiers)
}

pub fn prop_edges(
    graph: &mut Graph,
    frontiers: &Frontiers<EdgeId>,
    message: &MessageFn,
    reduce: &ReduceFn,
) -> Result<(), ExecError> {
    Propagation::new(message, reduce).prop_edges(graph, frontiers)
}

/// BFS propagation from a single seed.
pub fn prop_nodes_bfs(graph: &mut Graph, source: NodeId, message: &MessageFn, reduce: &ReduceFn) -> Result<(), ExecError> {
    Propagation::new(message, reduce).prop_nodes_bfs(graph, &[source])
}

/// Topological propagation; fails with [`ExecError::CycleDetected`] on a
/// cyclic graph before any write.
pub fn prop_nodes_topo(graph: &mut Graph, message: &MessageFn, reduce: &ReduceFn) -> Result<(), ExecError> {
    Propagation::new(message, reduce).prop_nodes_topo(graph)
}

/// DFS propagation from a single seed.
pub fn prop_edges_dfs(
    graph: &mut Graph,
    source: NodeId,
    has_reverse_edge: bool,
    has_nontree_edge: bool,
    message: &MessageFn,
    reduce: &ReduceFn,
) -> Result<(), ExecError> {
    Propagation::new(message, reduce).prop_edges_dfs(graph, &[source], has_reverse_edge, has_nontree_edge)
}

#[cfg(test)]
mod tests {
    use msgflow_core::Tensor;

    use super::*;
    use crate::function::{copy_u, sum, FieldMap};

    fn chain(n: u32) -> Graph {
        let edges: Vec<(u32, u32)> = (0..n - 1).map(|k| (k, k + 1)).collect();
        let mut g = Graph::from_edges(n as usize, &edges).unwrap();
        g.set_ndata("x", Tensor::scalar_rows(&vec![1.0; n as usize], 1)).unwrap();
        g
    }

    #[test]
    fn bfs_on_a_chain_accumulates_along_the_path() {
        let mut g = chain(4);
        prop_nodes_bfs(&mut g, NodeId(0), &copy_u("x", "m"), &sum("m", "x")).unwrap();
        // Each node takes its predecessor's value, already updated.
        assert_eq!(g.ndata().get("x").unwrap().data(), &[1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn apply_runs_after_each_frontier() {
        let mut g = chain(3);
        let message = copy_u("x", "m");
        let reduce = sum("m", "x");
        let inc = NodeFn::new(|nodes| {
            let mut out = FieldMap::new();
            out.insert("x".into(), nodes.data("x")?.map(|v| v + 1.0));
            Ok(out)
        });
        Propagation::new(&message, &reduce)
            .with_apply(&inc)
            .prop_nodes_bfs(&mut g, &[NodeId(0)])
            .unwrap();
        assert_eq!(g.ndata().get("x").unwrap().data(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn invalid_seed_writes_nothing() {
        let mut g = chain(3);
        let err = prop_nodes_bfs(&mut g, NodeId(3), &copy_u("x", "m"), &sum("m", "x")).unwrap_err();
        assert!(matches!(err, ExecError::Core(_)));
        assert_eq!(g.ndata().get("x").unwrap().data(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn reverse_topological_order_runs_from_sinks() {
        let message = copy_u("x", "m");
        let reduce = sum("m", "x");
        let start = || {
            let mut g = chain(3);
            g.set_ndata("x", Tensor::scalar_rows(&[1.0, 2.0, 3.0], 1)).unwrap();
            g
        };

        let mut forward = start();
        Propagation::new(&message, &reduce).prop_nodes_topo(&mut forward).unwrap();
        assert_eq!(forward.ndata().get("x").unwrap().data(), &[1.0, 1.0, 1.0]);

        // Layers [2], [1], [0]: node 2 pulls before node 1 changes.
        let mut backward = start();
        Propagation::new(&message, &reduce)
            .with_reverse(true)
            .prop_nodes_topo(&mut backward)
            .unwrap();
        assert_eq!(backward.ndata().get("x").unwrap().data(), &[1.0, 1.0, 2.0]);
    }
}
