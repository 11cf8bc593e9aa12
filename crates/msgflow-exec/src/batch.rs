//! Views handed to user-supplied functions.
//!
//! An [`EdgeBatch`] exposes the source, destination, and edge features of a
//! set of edges; a [`NodeBatch`] exposes node features and, during a reduce,
//! the mailbox of messages addressed to those nodes. Feature rows are
//! gathered on access, so a function only pays for the fields it reads.

use msgflow_core::{CoreError, EdgeId, Graph, NodeId, Tensor};

use crate::error::ExecError;
use crate::function::FieldMap;

/// A batch of edges, in the order the scheduler evaluates them.
pub struct EdgeBatch<'a> {
    graph: &'a Graph,
    edges: &'a [EdgeId],
    src: Vec<usize>,
    dst: Vec<usize>,
}

impl<'a> EdgeBatch<'a> {
    /// Builds a batch over edges the caller has already validated.
    pub(crate) fn new(graph: &'a Graph, edges: &'a [EdgeId]) -> Self {
        let (src, dst) = edges
            .iter()
            .map(|e| (graph.src()[e.index()].index(), graph.dst()[e.index()].index()))
            .unzip();
        EdgeBatch {
            graph,
            edges,
            src,
            dst,
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edges(&self) -> &[EdgeId] {
        self.edges
    }

    pub fn src_nodes(&self) -> Vec<NodeId> {
        self.src.iter().map(|&u| NodeId(u as u32)).collect()
    }

    pub fn dst_nodes(&self) -> Vec<NodeId> {
        self.dst.iter().map(|&v| NodeId(v as u32)).collect()
    }

    /// Node field `field` of each edge's source, one row per edge.
    pub fn src(&self, field: &str) -> Result<Tensor, ExecError> {
        Ok(self.graph.ndata().gather(field, &self.src)?)
    }

    /// Node field `field` of each edge's destination, one row per edge.
    pub fn dst(&self, field: &str) -> Result<Tensor, ExecError> {
        Ok(self.graph.ndata().gather(field, &self.dst)?)
    }

    /// Edge field `field`, one row per edge.
    pub fn data(&self, field: &str) -> Result<Tensor, ExecError> {
        let rows: Vec<usize> = self.edges.iter().map(|e| e.index()).collect();
        Ok(self.graph.edata().gather(field, &rows)?)
    }
}

/// A batch of nodes.
///
/// During a reduce every node in the batch has the same in-degree `D`, and
/// each mailbox field has shape `[len, D, *feature]` with messages ordered by
/// edge id. Outside a reduce the mailbox is empty.
pub struct NodeBatch<'a> {
    graph: &'a Graph,
    nodes: Vec<NodeId>,
    staged: Option<&'a FieldMap>,
    mailbox: FieldMap,
    degree: usize,
}

impl<'a> NodeBatch<'a> {
    pub(crate) fn new(graph: &'a Graph, nodes: Vec<NodeId>) -> Self {
        NodeBatch {
            graph,
            nodes,
            staged: None,
            mailbox: FieldMap::new(),
            degree: 0,
        }
    }

    pub(crate) fn with_mailbox(mut self, mailbox: FieldMap, degree: usize) -> Self {
        self.mailbox = mailbox;
        self.degree = degree;
        self
    }

    /// Overlays not-yet-committed rows (aligned with `nodes`) on top of the
    /// stored node features.
    pub(crate) fn with_staged(mut self, staged: &'a FieldMap) -> Self {
        self.staged = Some(staged);
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// In-degree shared by every node of the batch (0 outside a reduce).
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Node field `field`, one row per node.
    pub fn data(&self, field: &str) -> Result<Tensor, ExecError> {
        if let Some(t) = self.staged.and_then(|s| s.get(field)) {
            return Ok(t.clone());
        }
        let rows: Vec<usize> = self.nodes.iter().map(|n| n.index()).collect();
        Ok(self.graph.ndata().gather(field, &rows)?)
    }

    /// Mailbox field `field` with shape `[len, degree, *feature]`.
    pub fn mailbox(&self, field: &str) -> Result<&Tensor, ExecError> {
        self.mailbox.get(field).ok_or_else(|| {
            ExecError::Core(CoreError::UnknownField {
                field: field.to_string(),
            })
        })
    }

    pub fn mailbox_fields(&self) -> impl Iterator<Item = &str> {
        self.mailbox.keys().map(String::as_str)
    }
}
