//! Graph: the topology store plus its node and edge feature frames.
//!
//! [`Graph`] is the single entry point for building and querying a graph. It
//! owns:
//! - the topology as two parallel endpoint arrays (`src[e]`, `dst[e]`), where
//!   the position `e` is the [`EdgeId`] assigned at insertion;
//! - a node [`Frame`] and an edge [`Frame`], grown automatically as nodes and
//!   edges are added;
//! - a lazily built dual CSR index ([`Graph::in_csr`] with one row per
//!   destination, [`Graph::out_csr`] with one row per source).
//!
//! # Edge order
//!
//! Graphs are append-only. Edge ids are dense and assigned in insertion order,
//! and every per-node edge list (in-edges, out-edges, predecessors,
//! successors) is returned in ascending edge id order. Message mailboxes and
//! traversal orders are built on these lists, which is what makes them
//! reproducible.

use std::ops::Range;
use std::sync::OnceLock;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::EdgeType;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, IndexKind};
use crate::frame::Frame;
use crate::id::{EdgeId, NodeId};
use crate::sparse::SparseMatrix;
use crate::tensor::Tensor;

/// Both CSR orientations of the adjacency.
#[derive(Debug, Clone)]
struct Adjacency {
    /// Rows are destinations, columns are sources.
    incoming: SparseMatrix,
    /// Rows are sources, columns are destinations.
    outgoing: SparseMatrix,
}

/// Serializable snapshot of a graph's topology (no features).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphTopology {
    pub num_nodes: usize,
    pub src: Vec<NodeId>,
    pub dst: Vec<NodeId>,
}

/// A directed multigraph with node and edge features.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    num_nodes: usize,
    src: Vec<NodeId>,
    dst: Vec<NodeId>,
    ndata: Frame,
    edata: Frame,
    /// Cleared on every topology mutation.
    adjacency: OnceLock<Adjacency>,
    /// Per-component node and edge counts when built by [`Graph::batch`].
    batch_sizes: Option<(Vec<usize>, Vec<usize>)>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Graph::default()
    }

    /// Creates a graph with `num_nodes` nodes and no edges.
    pub fn with_nodes(num_nodes: usize) -> Self {
        Graph {
            num_nodes,
            ndata: Frame::new(num_nodes),
            ..Graph::default()
        }
    }

    /// Creates a graph from `(src, dst)` pairs, in edge id order.
    pub fn from_edges(num_nodes: usize, edges: &[(u32, u32)]) -> Result<Self, CoreError> {
        let mut graph = Graph::with_nodes(num_nodes);
        let (src, dst): (Vec<NodeId>, Vec<NodeId>) = edges
            .iter()
            .map(|&(u, v)| (NodeId(u), NodeId(v)))
            .unzip();
        graph.add_edges(&src, &dst)?;
        Ok(graph)
    }

    /// Rebuilds a featureless graph from a topology snapshot.
    pub fn from_topology(topology: &GraphTopology) -> Result<Self, CoreError> {
        let mut graph = Graph::with_nodes(topology.num_nodes);
        graph.add_edges(&topology.src, &topology.dst)?;
        Ok(graph)
    }

    /// Returns a serializable copy of the topology.
    pub fn topology(&self) -> GraphTopology {
        GraphTopology {
            num_nodes: self.num_nodes,
            src: self.src.clone(),
            dst: self.dst.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Appends `count` nodes. Existing node fields are backfilled by their
    /// initializers (or left pending, see [`Frame`]).
    pub fn add_nodes(&mut self, count: usize) -> Result<Range<NodeId>, CoreError> {
        let start = self.num_nodes as u32;
        self.ndata.grow(count)?;
        self.num_nodes += count;
        self.touch();
        Ok(NodeId(start)..NodeId(self.num_nodes as u32))
    }

    /// Appends one node.
    pub fn add_node(&mut self) -> Result<NodeId, CoreError> {
        Ok(self.add_nodes(1)?.start)
    }

    /// Appends edges `src[i] -> dst[i]`, returning their new ids in order.
    ///
    /// A side of length one is broadcast against the other. All ids are
    /// validated before anything is inserted.
    pub fn add_edges(&mut self, src: &[NodeId], dst: &[NodeId]) -> Result<Vec<EdgeId>, CoreError> {
        let count = match (src.len(), dst.len()) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            (a, b) => return Err(CoreError::shape("add_edges", &[a], &[b])),
        };
        for &n in src.iter().chain(dst) {
            self.check_node(n)?;
        }

        self.edata.grow(count)?;
        let start = self.src.len() as u32;
        for i in 0..count {
            self.src.push(src[if src.len() == 1 { 0 } else { i }]);
            self.dst.push(dst[if dst.len() == 1 { 0 } else { i }]);
        }
        self.touch();
        Ok((start..start + count as u32).map(EdgeId).collect())
    }

    /// Appends one edge `src -> dst`.
    pub fn add_edge(&mut self, src: NodeId, dst: NodeId) -> Result<EdgeId, CoreError> {
        let ids = self.add_edges(&[src], &[dst])?;
        Ok(ids[0])
    }

    /// Invalidates derived state after a topology change.
    fn touch(&mut self) {
        self.adjacency = OnceLock::new();
        self.batch_sizes = None;
    }

    // -----------------------------------------------------------------------
    // Size and validation
    // -----------------------------------------------------------------------

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    /// All node ids in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        (0..self.num_nodes as u32).map(NodeId)
    }

    /// All edge ids in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = EdgeId> {
        (0..self.src.len() as u32).map(EdgeId)
    }

    /// Fails with `InvalidIndex` unless `node` is in `[0, num_nodes)`.
    pub fn check_node(&self, node: NodeId) -> Result<(), CoreError> {
        if node.index() >= self.num_nodes {
            return Err(CoreError::index(IndexKind::Node, node.index(), self.num_nodes));
        }
        Ok(())
    }

    /// Fails with `InvalidIndex` unless `edge` is in `[0, num_edges)`.
    pub fn check_edge(&self, edge: EdgeId) -> Result<(), CoreError> {
        if edge.index() >= self.num_edges() {
            return Err(CoreError::index(IndexKind::Edge, edge.index(), self.num_edges()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Topology queries
    // -----------------------------------------------------------------------

    /// Source endpoints, indexed by edge id.
    pub fn src(&self) -> &[NodeId] {
        &self.src
    }

    /// Destination endpoints, indexed by edge id.
    pub fn dst(&self) -> &[NodeId] {
        &self.dst
    }

    /// Endpoints of one edge.
    pub fn endpoints(&self, edge: EdgeId) -> Result<(NodeId, NodeId), CoreError> {
        self.check_edge(edge)?;
        Ok((self.src[edge.index()], self.dst[edge.index()]))
    }

    /// Endpoints of several edges, as two parallel lists.
    pub fn find_edges(&self, edges: &[EdgeId]) -> Result<(Vec<NodeId>, Vec<NodeId>), CoreError> {
        let mut src = Vec::with_capacity(edges.len());
        let mut dst = Vec::with_capacity(edges.len());
        for &e in edges {
            let (u, v) = self.endpoints(e)?;
            src.push(u);
            dst.push(v);
        }
        Ok((src, dst))
    }

    /// Ids of every edge `u -> v`, ascending.
    pub fn edge_ids(&self, u: NodeId, v: NodeId) -> Result<Vec<EdgeId>, CoreError> {
        self.check_node(v)?;
        Ok(self
            .out_edges(u)?
            .iter()
            .copied()
            .filter(|e| self.dst[e.index()] == v)
            .collect())
    }

    pub fn has_edge_between(&self, u: NodeId, v: NodeId) -> Result<bool, CoreError> {
        Ok(!self.edge_ids(u, v)?.is_empty())
    }

    /// Ids of the edges leaving `node`, ascending.
    pub fn out_edges(&self, node: NodeId) -> Result<&[EdgeId], CoreError> {
        self.check_node(node)?;
        Ok(self.out_csr().row_entries(node.index()))
    }

    /// Ids of the edges entering `node`, ascending.
    pub fn in_edges(&self, node: NodeId) -> Result<&[EdgeId], CoreError> {
        self.check_node(node)?;
        Ok(self.in_csr().row_entries(node.index()))
    }

    /// Destinations of the out-edges of `node`, in edge id order.
    pub fn successors(&self, node: NodeId) -> Result<Vec<NodeId>, CoreError> {
        self.check_node(node)?;
        Ok(self
            .out_csr()
            .row_indices(node.index())
            .iter()
            .copied()
            .map(NodeId)
            .collect())
    }

    /// Sources of the in-edges of `node`, in edge id order.
    pub fn predecessors(&self, node: NodeId) -> Result<Vec<NodeId>, CoreError> {
        self.check_node(node)?;
        Ok(self
            .in_csr()
            .row_indices(node.index())
            .iter()
            .copied()
            .map(NodeId)
            .collect())
    }

    pub fn in_degree(&self, node: NodeId) -> Result<usize, CoreError> {
        self.check_node(node)?;
        Ok(self.in_csr().row_nnz(node.index()))
    }

    pub fn out_degree(&self, node: NodeId) -> Result<usize, CoreError> {
        self.check_node(node)?;
        Ok(self.out_csr().row_nnz(node.index()))
    }

    /// In-degree of every node, indexed by node id.
    pub fn in_degrees(&self) -> Vec<usize> {
        let csr = self.in_csr();
        (0..self.num_nodes).map(|v| csr.row_nnz(v)).collect()
    }

    /// Out-degree of every node, indexed by node id.
    pub fn out_degrees(&self) -> Vec<usize> {
        let csr = self.out_csr();
        (0..self.num_nodes).map(|u| csr.row_nnz(u)).collect()
    }

    // -----------------------------------------------------------------------
    // Sparse views
    // -----------------------------------------------------------------------

    fn adjacency(&self) -> &Adjacency {
        self.adjacency.get_or_init(|| {
            let rows: Vec<u32> = self.dst.iter().map(|n| n.0).collect();
            let cols: Vec<u32> = self.src.iter().map(|n| n.0).collect();
            // Endpoints are validated on insertion.
            let incoming = SparseMatrix::assemble(self.num_nodes, self.num_nodes, &rows, &cols, None);
            let outgoing = incoming.transpose();
            tracing::trace!(
                "built adjacency index: {} nodes, {} edges",
                self.num_nodes,
                self.src.len()
            );
            Adjacency { incoming, outgoing }
        })
    }

    /// CSR with one row per destination node; column = source, entry id =
    /// edge id.
    pub fn in_csr(&self) -> &SparseMatrix {
        &self.adjacency().incoming
    }

    /// CSR with one row per source node; column = destination.
    pub fn out_csr(&self) -> &SparseMatrix {
        &self.adjacency().outgoing
    }

    /// The adjacency as a sparse `[num_nodes, num_nodes]` matrix with
    /// `A[dst, src] = 1` per edge, so `A.spmm(x)` sums over in-neighbors.
    pub fn as_sparse_adjacency(&self) -> &SparseMatrix {
        self.in_csr()
    }

    // -----------------------------------------------------------------------
    // Features
    // -----------------------------------------------------------------------

    pub fn ndata(&self) -> &Frame {
        &self.ndata
    }

    pub fn ndata_mut(&mut self) -> &mut Frame {
        &mut self.ndata
    }

    pub fn edata(&self) -> &Frame {
        &self.edata
    }

    pub fn edata_mut(&mut self) -> &mut Frame {
        &mut self.edata
    }

    /// Shorthand for `ndata_mut().set(field, tensor)`.
    pub fn set_ndata(&mut self, field: &str, tensor: Tensor) -> Result<(), CoreError> {
        self.ndata.set(field, tensor)
    }

    /// Shorthand for `edata_mut().set(field, tensor)`.
    pub fn set_edata(&mut self, field: &str, tensor: Tensor) -> Result<(), CoreError> {
        self.edata.set(field, tensor)
    }

    // -----------------------------------------------------------------------
    // petgraph interop
    // -----------------------------------------------------------------------

    /// Builds a featureless graph from a petgraph graph.
    ///
    /// Directed graphs keep petgraph's edge order. Each undirected edge
    /// `{a, b}` becomes the pair `a -> b`, `b -> a`, in that order.
    pub fn from_petgraph<N, E, Ty: EdgeType>(graph: &petgraph::Graph<N, E, Ty>) -> Result<Self, CoreError> {
        let mut src = Vec::new();
        let mut dst = Vec::new();
        for e in graph.edge_indices() {
            if let Some((a, b)) = graph.edge_endpoints(e) {
                src.push(NodeId::from(a));
                dst.push(NodeId::from(b));
                if !Ty::is_directed() {
                    src.push(NodeId::from(b));
                    dst.push(NodeId::from(a));
                }
            }
        }
        let mut out = Graph::with_nodes(graph.node_count());
        out.add_edges(&src, &dst)?;
        Ok(out)
    }

    /// Exports the topology; edge weights carry the edge ids.
    pub fn to_petgraph(&self) -> DiGraph<NodeId, EdgeId> {
        let mut out = DiGraph::with_capacity(self.num_nodes, self.num_edges());
        for n in self.nodes() {
            out.add_node(n);
        }
        for (k, (&u, &v)) in self.src.iter().zip(&self.dst).enumerate() {
            out.add_edge(NodeIndex::from(u), NodeIndex::from(v), EdgeId(k as u32));
        }
        out
    }

    // -----------------------------------------------------------------------
    // Batching
    // -----------------------------------------------------------------------

    /// Merges graphs into one disjoint union.
    ///
    /// Node ids of graph `k` are shifted by the node count of graphs
    /// `0..k`; edges keep their relative order. Feature frames are stacked,
    /// so every graph must carry the first graph's fields.
    pub fn batch(graphs: &[Graph]) -> Result<Graph, CoreError> {
        if graphs.is_empty() {
            return Err(CoreError::EmptyBatch);
        }
        let mut src = Vec::new();
        let mut dst = Vec::new();
        let mut offset = 0u32;
        let mut node_sizes = Vec::new();
        let mut edge_sizes = Vec::new();
        for g in graphs {
            src.extend(g.src.iter().map(|n| NodeId(n.0 + offset)));
            dst.extend(g.dst.iter().map(|n| NodeId(n.0 + offset)));
            offset += g.num_nodes as u32;
            let (n, e) = g.batch_sizes();
            node_sizes.extend(n);
            edge_sizes.extend(e);
        }
        let ndata = Frame::concat(&graphs.iter().map(|g| &g.ndata).collect::<Vec<_>>())?;
        let edata = Frame::concat(&graphs.iter().map(|g| &g.edata).collect::<Vec<_>>())?;
        Ok(Graph {
            num_nodes: offset as usize,
            src,
            dst,
            ndata,
            edata,
            adjacency: OnceLock::new(),
            batch_sizes: Some((node_sizes, edge_sizes)),
        })
    }

    /// Per-component node and edge counts. A graph that was not built by
    /// [`Graph::batch`] is a single component.
    pub fn batch_sizes(&self) -> (Vec<usize>, Vec<usize>) {
        self.batch_sizes
            .clone()
            .unwrap_or_else(|| (vec![self.num_nodes], vec![self.num_edges()]))
    }

    /// Number of components.
    pub fn batch_size(&self) -> usize {
        self.batch_sizes.as_ref().map_or(1, |(n, _)| n.len())
    }

    /// Splits a batched graph back into its components.
    pub fn unbatch(&self) -> Result<Vec<Graph>, CoreError> {
        let (node_sizes, edge_sizes) = self.batch_sizes();
        let mut out = Vec::with_capacity(node_sizes.len());
        let (mut node_start, mut edge_start) = (0usize, 0usize);
        for (&nn, &ne) in node_sizes.iter().zip(&edge_sizes) {
            let shift = node_start as u32;
            let edges = edge_start..edge_start + ne;
            let src: Vec<NodeId> = self.src[edges.clone()].iter().map(|n| NodeId(n.0 - shift)).collect();
            let dst: Vec<NodeId> = self.dst[edges.clone()].iter().map(|n| NodeId(n.0 - shift)).collect();
            let mut g = Graph::with_nodes(nn);
            g.add_edges(&src, &dst)?;
            g.ndata = self.ndata.slice(node_start..node_start + nn)?;
            g.edata = self.edata.slice(edges)?;
            out.push(g);
            node_start += nn;
            edge_start += ne;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::frame::zero_initializer;
    use crate::tensor::{DType, Device};
    use petgraph::graph::UnGraph;

    fn path(n: u32) -> Graph {
        let edges: Vec<(u32, u32)> = (0..n - 1).map(|i| (i, i + 1)).collect();
        Graph::from_edges(n as usize, &edges).unwrap()
    }

    #[test]
    fn edge_ids_follow_insertion_order() {
        let mut g = Graph::with_nodes(3);
        let e0 = g.add_edge(NodeId(0), NodeId(1)).unwrap();
        let e1 = g.add_edge(NodeId(2), NodeId(1)).unwrap();
        assert_eq!((e0, e1), (EdgeId(0), EdgeId(1)));
        assert_eq!(g.in_edges(NodeId(1)).unwrap(), &[EdgeId(0), EdgeId(1)]);
        assert_eq!(g.predecessors(NodeId(1)).unwrap(), vec![NodeId(0), NodeId(2)]);
    }

    #[test]
    fn invalid_node_reference() {
        let mut g = Graph::with_nodes(2);
        let err = g.add_edge(NodeId(0), NodeId(2)).unwrap_err();
        assert_eq!(err, CoreError::index(IndexKind::Node, 2, 2));
        // Nothing was inserted.
        assert_eq!(g.num_edges(), 0);
        assert!(matches!(g.out_edges(NodeId(5)), Err(CoreError::InvalidIndex { .. })));
    }

    #[test]
    fn add_edges_broadcasts_single_side() {
        let mut g = Graph::with_nodes(4);
        let ids = g
            .add_edges(&[NodeId(0)], &[NodeId(1), NodeId(2), NodeId(3)])
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(g.successors(NodeId(0)).unwrap(), vec![NodeId(1), NodeId(2), NodeId(3)]);

        let err = g
            .add_edges(&[NodeId(0), NodeId(1)], &[NodeId(1), NodeId(2), NodeId(3)])
            .unwrap_err();
        assert!(matches!(err, CoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn adjacency_is_rebuilt_after_mutation() {
        let mut g = path(3);
        assert_eq!(g.in_degrees(), vec![0, 1, 1]);
        g.add_edge(NodeId(2), NodeId(0)).unwrap();
        assert_eq!(g.in_degrees(), vec![1, 1, 1]);
        assert_eq!(g.out_degrees(), vec![1, 1, 1]);
    }

    #[test]
    fn parallel_edges_and_lookup() {
        let g = Graph::from_edges(2, &[(0, 1), (1, 0), (0, 1)]).unwrap();
        assert_eq!(g.edge_ids(NodeId(0), NodeId(1)).unwrap(), vec![EdgeId(0), EdgeId(2)]);
        assert!(!g.has_edge_between(NodeId(1), NodeId(1)).unwrap());
        let (s, d) = g.find_edges(&[EdgeId(1)]).unwrap();
        assert_eq!((s[0], d[0]), (NodeId(1), NodeId(0)));
        assert!(g.find_edges(&[EdgeId(3)]).is_err());
    }

    #[test]
    fn sparse_adjacency_sums_in_neighbors() {
        let g = Graph::from_edges(3, &[(0, 2), (1, 2), (2, 0)]).unwrap();
        let x = Tensor::from_vec(&[3, 1], vec![1.0, 2.0, 4.0]).unwrap();
        let y = g.as_sparse_adjacency().spmm(&x).unwrap();
        assert_eq!(y.data(), &[4.0, 0.0, 3.0]);
    }

    #[test]
    fn growing_backfills_features() {
        let mut g = Graph::with_nodes(2);
        g.set_ndata("h", Tensor::ones(&[2, 3], DType::F32, Device::Cpu)).unwrap();
        g.add_nodes(1).unwrap();
        assert!(matches!(
            g.ndata().get("h"),
            Err(CoreError::UninitializedField { .. })
        ));
        g.ndata_mut().register_initializer("h", zero_initializer()).unwrap();
        g.add_nodes(1).unwrap();
        let h = g.ndata().get("h").unwrap();
        assert_eq!(h.shape(), &[4, 3]);
        assert_eq!(h.row(3), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn failed_growth_leaves_graph_unchanged() {
        let mut g = Graph::from_edges(2, &[(0, 1)]).unwrap();
        g.set_ndata("a", Tensor::ones(&[2, 1], DType::F32, Device::Cpu)).unwrap();
        g.set_ndata("b", Tensor::ones(&[2, 1], DType::F32, Device::Cpu)).unwrap();
        g.ndata_mut().register_initializer("b", zero_initializer()).unwrap();
        g.ndata_mut()
            .register_initializer(
                "a",
                Arc::new(|_: &[usize], dtype: DType, device: Device, _: Range<usize>| {
                    Tensor::zeros(&[99, 1], dtype, device)
                }),
            )
            .unwrap();

        let err = g.add_nodes(1).unwrap_err();
        assert!(matches!(err, CoreError::ShapeMismatch { .. }));
        assert_eq!(g.num_nodes(), 2);
        assert_eq!(g.ndata().num_rows(), 2);
        assert_eq!(g.ndata().get("a").unwrap().num_rows(), 2);
        assert_eq!(g.ndata().get("b").unwrap().num_rows(), 2);

        g.set_edata("w", Tensor::ones(&[1, 1], DType::F32, Device::Cpu)).unwrap();
        g.edata_mut()
            .register_initializer(
                "w",
                Arc::new(|_: &[usize], dtype: DType, device: Device, _: Range<usize>| {
                    Tensor::zeros(&[5, 1], dtype, device)
                }),
            )
            .unwrap();
        assert!(g.add_edge(NodeId(1), NodeId(0)).is_err());
        assert_eq!(g.num_edges(), 1);
        assert_eq!(g.edata().num_rows(), 1);
        assert_eq!(g.in_degrees(), vec![0, 1]);
    }

    #[test]
    fn undirected_petgraph_becomes_bidirected() {
        let ug = UnGraph::<(), ()>::from_edges([(0u32, 1u32), (1, 2)]);
        let g = Graph::from_petgraph(&ug).unwrap();
        assert_eq!(g.num_nodes(), 3);
        let pairs: Vec<(u32, u32)> = g.src().iter().zip(g.dst()).map(|(u, v)| (u.0, v.0)).collect();
        assert_eq!(pairs, vec![(0, 1), (1, 0), (1, 2), (2, 1)]);

        let back = g.to_petgraph();
        assert_eq!(back.edge_count(), 4);
        assert_eq!(back.edge_weights().copied().collect::<Vec<_>>()[3], EdgeId(3));
    }

    #[test]
    fn batch_and_unbatch() {
        let mut a = path(2);
        a.set_ndata("h", Tensor::scalar_rows(&[1.0, 2.0], 1)).unwrap();
        let mut b = path(3);
        b.set_ndata("h", Tensor::scalar_rows(&[3.0, 4.0, 5.0], 1)).unwrap();

        let g = Graph::batch(&[a, b]).unwrap();
        assert_eq!(g.num_nodes(), 5);
        assert_eq!(g.batch_size(), 2);
        assert_eq!(g.batch_sizes(), (vec![2, 3], vec![1, 2]));
        assert_eq!(g.successors(NodeId(2)).unwrap(), vec![NodeId(3)]);

        let parts = g.unbatch().unwrap();
        assert_eq!(parts[1].topology(), path(3).topology());
        assert_eq!(parts[1].ndata().get("h").unwrap().data(), &[3.0, 4.0, 5.0]);
        assert!(matches!(Graph::batch(&[]), Err(CoreError::EmptyBatch)));
    }

    #[test]
    fn topology_serde_roundtrip() {
        let g = Graph::from_edges(3, &[(0, 1), (2, 1)]).unwrap();
        let json = serde_json::to_string(&g.topology()).unwrap();
        let back: GraphTopology = serde_json::from_str(&json).unwrap();
        let rebuilt = Graph::from_topology(&back).unwrap();
        assert_eq!(rebuilt.in_edges(NodeId(1)).unwrap(), &[EdgeId(0), EdgeId(1)]);

        insta::assert_json_snapshot!(g.topology(), @r###"
        {
          "num_nodes": 3,
          "src": [
            0,
            2
          ],
          "dst": [
            1,
            1
          ]
        }
        "###);
    }
}
