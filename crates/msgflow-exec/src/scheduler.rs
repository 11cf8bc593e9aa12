//! Message-passing scheduler.
//!
//! Every message-passing call goes through the same pipeline:
//!
//! 1. The active edge set is grouped by destination. Within a group, edges
//!    are ordered by edge id, which is the order messages appear in a
//!    mailbox.
//! 2. If both functions are built-ins and the reducer is fusable, a single
//!    kernel folds each edge's message straight into its destination's
//!    accumulator without materializing per-edge messages.
//! 3. Otherwise messages are computed for the whole edge set, then reduced:
//!    built-in reducers fold each group's segment; user reducers run once
//!    per degree bucket (all destinations with the same in-degree) on a
//!    mailbox of shape `[nodes, degree, *feature]`.
//! 4. The optional apply step runs on the reduced rows.
//! 5. All new node features are written back in one
//!    [`Frame::commit`](msgflow_core::Frame::commit).
//!
//! `send` stops after computing messages and parks them in an [`Outbox`];
//! `recv` later picks up from step 3 with the parked messages.
//!
//! Nothing is written until step 5, and the commit itself is all or nothing,
//! so a failing call leaves the graph unchanged. Destinations outside the
//! active edge set (including every node with in-degree zero) are never
//! touched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use msgflow_core::{broadcast_feature, CoreError, EdgeId, Graph, NodeId, ReduceKind, Shape, Tensor};

use crate::batch::{EdgeBatch, NodeBatch};
use crate::error::ExecError;
use crate::function::{BuiltinMessage, BuiltinReduce, FieldMap, MessageFn, NodeFn, ReduceFn};
use crate::outbox::Outbox;
use crate::registry::{CombinatorRegistry, MessageKind, Target};

/// Scheduler knobs.
///
/// Missing keys in a serialized config take their default value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fold built-in message/reduce pairs into one kernel.
    pub use_fused_kernels: bool,
    /// Batch user reducers by in-degree. When off, each destination is
    /// reduced on its own.
    pub degree_bucketing: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            use_fused_kernels: true,
            degree_bucketing: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Destination grouping
// ---------------------------------------------------------------------------

/// An edge set grouped by destination, CSR style: group `g` owns
/// `edges[offsets[g]..offsets[g + 1]]`, all pointing at `nodes[g]`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DstGroups {
    nodes: Vec<NodeId>,
    offsets: Vec<usize>,
    edges: Vec<EdgeId>,
}

impl DstGroups {
    /// Every edge of the graph, read off the incoming adjacency.
    fn all(graph: &Graph) -> DstGroups {
        let csr = graph.in_csr();
        let mut nodes = Vec::new();
        let mut offsets = vec![0];
        let mut edges = Vec::with_capacity(csr.nnz());
        for v in 0..graph.num_nodes() {
            let row = csr.row_entries(v);
            if row.is_empty() {
                continue;
            }
            nodes.push(NodeId(v as u32));
            edges.extend_from_slice(row);
            offsets.push(edges.len());
        }
        DstGroups {
            nodes,
            offsets,
            edges,
        }
    }

    /// An arbitrary (validated) edge subset. Repeated edges are kept.
    fn from_edges(graph: &Graph, edges: &[EdgeId]) -> DstGroups {
        let dst = graph.dst();
        let mut sorted = edges.to_vec();
        sorted.sort_by_key(|e| (dst[e.index()], *e));

        let mut nodes: Vec<NodeId> = Vec::new();
        let mut offsets = vec![0];
        for (i, e) in sorted.iter().enumerate() {
            let v = dst[e.index()];
            if nodes.last() != Some(&v) {
                if i > 0 {
                    offsets.push(i);
                }
                nodes.push(v);
            }
        }
        if !sorted.is_empty() {
            offsets.push(sorted.len());
        }
        DstGroups {
            nodes,
            offsets,
            edges: sorted,
        }
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn edges_of(&self, group: usize) -> &[EdgeId] {
        &self.edges[self.offsets[group]..self.offsets[group + 1]]
    }

    fn degree(&self, group: usize) -> usize {
        self.offsets[group + 1] - self.offsets[group]
    }

    fn node_rows(&self) -> Vec<usize> {
        self.nodes.iter().map(|n| n.index()).collect()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Runs message passing over one graph with a fixed configuration.
pub struct Scheduler<'g> {
    graph: &'g mut Graph,
    config: SchedulerConfig,
}

impl<'g> Scheduler<'g> {
    pub fn new(graph: &'g mut Graph, config: SchedulerConfig) -> Self {
        Scheduler { graph, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Sends along every edge and reduces at every node with in-degree > 0.
    pub fn update_all(
        &mut self,
        message: &MessageFn,
        reduce: &ReduceFn,
        apply: Option<&NodeFn>,
    ) -> Result<(), ExecError> {
        let groups = DstGroups::all(self.graph);
        tracing::debug!(
            "update_all: {} edges into {} nodes",
            groups.edges.len(),
            groups.len()
        );
        self.run(groups, message, reduce, apply)
    }

    /// Sends along `edges` and reduces at their destinations.
    pub fn send_and_recv(
        &mut self,
        edges: &[EdgeId],
        message: &MessageFn,
        reduce: &ReduceFn,
        apply: Option<&NodeFn>,
    ) -> Result<(), ExecError> {
        for &e in edges {
            self.graph.check_edge(e)?;
        }
        let groups = DstGroups::from_edges(self.graph, edges);
        tracing::debug!(
            "send_and_recv: {} edges into {} nodes",
            edges.len(),
            groups.len()
        );
        self.run(groups, message, reduce, apply)
    }

    /// Gathers along every in-edge of `nodes` and reduces at `nodes`.
    ///
    /// Nodes without in-edges are skipped and keep their features.
    pub fn pull(
        &mut self,
        nodes: &[NodeId],
        message: &MessageFn,
        reduce: &ReduceFn,
        apply: Option<&NodeFn>,
    ) -> Result<(), ExecError> {
        let mut targets = nodes.to_vec();
        targets.sort_unstable();
        targets.dedup();
        let mut edges = Vec::new();
        for &v in &targets {
            edges.extend_from_slice(self.graph.in_edges(v)?);
        }
        let groups = DstGroups::from_edges(self.graph, &edges);
        tracing::debug!(
            "pull: {} nodes, {} with in-edges, {} edges",
            targets.len(),
            groups.len(),
            edges.len()
        );
        self.run(groups, message, reduce, apply)
    }

    /// Sends along every out-edge of `nodes` and reduces at the receivers.
    pub fn push(
        &mut self,
        nodes: &[NodeId],
        message: &MessageFn,
        reduce: &ReduceFn,
        apply: Option<&NodeFn>,
    ) -> Result<(), ExecError> {
        let mut senders = nodes.to_vec();
        senders.sort_unstable();
        senders.dedup();
        let mut edges = Vec::new();
        for &u in &senders {
            edges.extend_from_slice(self.graph.out_edges(u)?);
        }
        let groups = DstGroups::from_edges(self.graph, &edges);
        tracing::debug!(
            "push: {} nodes, {} edges into {} nodes",
            senders.len(),
            edges.len(),
            groups.len()
        );
        self.run(groups, message, reduce, apply)
    }

    /// Computes messages on `edges` (all edges when `None`) and parks them
    /// in `outbox` until [`Scheduler::recv`].
    pub fn send(&mut self, edges: Option<&[EdgeId]>, message: &MessageFn, outbox: &mut Outbox) -> Result<(), ExecError> {
        let edges: Vec<EdgeId> = match edges {
            Some(edges) => {
                for &e in edges {
                    self.graph.check_edge(e)?;
                }
                edges.to_vec()
            }
            None => self.graph.edges().collect(),
        };
        if edges.is_empty() {
            return Ok(());
        }
        self.check_frame_devices()?;
        let messages = compute_messages(self.graph, &edges, message)?;
        tracing::debug!("send: {} edges, {} fields", edges.len(), messages.len());
        outbox.store(self.graph.num_edges(), &edges, &messages)
    }

    /// Reduces the parked messages addressed to `nodes` (all nodes when
    /// `None`) and consumes them.
    ///
    /// Nodes without a parked message are skipped. The messages stay in the
    /// outbox if the call fails.
    pub fn recv(
        &mut self,
        nodes: Option<&[NodeId]>,
        reduce: &ReduceFn,
        apply: Option<&NodeFn>,
        outbox: &mut Outbox,
    ) -> Result<(), ExecError> {
        let mut edges = Vec::with_capacity(outbox.len());
        for e in outbox.edges() {
            self.graph.check_edge(e)?;
            edges.push(e);
        }
        if let Some(nodes) = nodes {
            let mut targets = nodes.to_vec();
            for &n in &targets {
                self.graph.check_node(n)?;
            }
            targets.sort_unstable();
            let dst = self.graph.dst();
            edges.retain(|e| targets.binary_search(&dst[e.index()]).is_ok());
        }
        let groups = DstGroups::from_edges(self.graph, &edges);
        tracing::debug!("recv: {} messages into {} nodes", edges.len(), groups.len());
        if groups.is_empty() {
            return Ok(());
        }
        let messages = outbox.gather(&groups.edges)?;
        let updates = reduce_messages(self.graph, &groups, &messages, reduce, self.config.degree_bucketing)?;
        self.write_back(&groups, updates, apply)?;
        outbox.consume(&groups.edges);
        Ok(())
    }

    /// Nodes of `nodes` (all nodes when `None`) whose mask entry is
    /// nonzero, in input order.
    ///
    /// The predicate returns one mask value per node in the batch.
    pub fn filter_nodes<F>(&self, predicate: F, nodes: Option<&[NodeId]>) -> Result<Vec<NodeId>, ExecError>
    where
        F: Fn(&NodeBatch<'_>) -> Result<Tensor, ExecError>,
    {
        let nodes: Vec<NodeId> = match nodes {
            Some(nodes) => {
                for &n in nodes {
                    self.graph.check_node(n)?;
                }
                nodes.to_vec()
            }
            None => self.graph.nodes().collect(),
        };
        let mask = {
            let batch = NodeBatch::new(self.graph, nodes.clone());
            predicate(&batch)?
        };
        keep_masked(nodes, &mask, "filter_nodes")
    }

    /// Edges of `edges` (all edges when `None`) whose mask entry is
    /// nonzero, in input order.
    pub fn filter_edges<F>(&self, predicate: F, edges: Option<&[EdgeId]>) -> Result<Vec<EdgeId>, ExecError>
    where
        F: Fn(&EdgeBatch<'_>) -> Result<Tensor, ExecError>,
    {
        let edges: Vec<EdgeId> = match edges {
            Some(edges) => {
                for &e in edges {
                    self.graph.check_edge(e)?;
                }
                edges.to_vec()
            }
            None => self.graph.edges().collect(),
        };
        let mask = {
            let batch = EdgeBatch::new(self.graph, &edges);
            predicate(&batch)?
        };
        keep_masked(edges, &mask, "filter_edges")
    }

    /// Runs a node function over `nodes` (all nodes when `None`) and writes
    /// its output back.
    pub fn apply_nodes(&mut self, f: &NodeFn, nodes: Option<&[NodeId]>) -> Result<(), ExecError> {
        let nodes: Vec<NodeId> = match nodes {
            Some(nodes) => {
                for &n in nodes {
                    self.graph.check_node(n)?;
                }
                nodes.to_vec()
            }
            None => self.graph.nodes().collect(),
        };
        if nodes.is_empty() {
            return Ok(());
        }
        let rows: Vec<usize> = nodes.iter().map(|n| n.index()).collect();
        let updates = {
            let batch = NodeBatch::new(self.graph, nodes);
            f.call(&batch)?
        };
        check_rows(&updates, rows.len(), "apply_nodes")?;
        tracing::debug!("apply_nodes: {} nodes, {} fields", rows.len(), updates.len());
        self.graph.ndata_mut().commit(&rows, &updates)?;
        Ok(())
    }

    /// Computes a message function over `edges` (all edges when `None`) and
    /// stores its output as edge features.
    pub fn apply_edges(&mut self, f: &MessageFn, edges: Option<&[EdgeId]>) -> Result<(), ExecError> {
        let edges: Vec<EdgeId> = match edges {
            Some(edges) => {
                for &e in edges {
                    self.graph.check_edge(e)?;
                }
                edges.to_vec()
            }
            None => self.graph.edges().collect(),
        };
        if edges.is_empty() {
            return Ok(());
        }
        self.check_frame_devices()?;
        let updates = compute_messages(self.graph, &edges, f)?;
        let rows: Vec<usize> = edges.iter().map(|e| e.index()).collect();
        tracing::debug!("apply_edges: {} edges, {} fields", rows.len(), updates.len());
        self.graph.edata_mut().commit(&rows, &updates)?;
        Ok(())
    }

    fn run(
        &mut self,
        groups: DstGroups,
        message: &MessageFn,
        reduce: &ReduceFn,
        apply: Option<&NodeFn>,
    ) -> Result<(), ExecError> {
        if groups.is_empty() {
            tracing::trace!("empty edge set, nothing to do");
            return Ok(());
        }
        self.check_frame_devices()?;

        let graph: &Graph = self.graph;
        let updates = match (message, reduce) {
            (MessageFn::Builtin(m), ReduceFn::Builtin(r)) => {
                check_pair(m, r)?;
                let fusable = CombinatorRegistry::global().reducer_for(r.kind)?.is_fusable();
                if self.config.use_fused_kernels && fusable {
                    tracing::debug!("fused path: {} + {}", m.kind, r.kind.name());
                    let out = fused_kernel(graph, &groups, m, r)?;
                    FieldMap::from([(r.out_field.clone(), out)])
                } else {
                    tracing::debug!("general path: {} + {}", m.kind, r.kind.name());
                    let messages = compute_messages(graph, &groups.edges, message)?;
                    reduce_messages(graph, &groups, &messages, reduce, self.config.degree_bucketing)?
                }
            }
            _ => {
                tracing::debug!(
                    "general path: {} message, {} reduce",
                    if message.is_builtin() { "built-in" } else { "user" },
                    if reduce.is_builtin() { "built-in" } else { "user" }
                );
                let messages = compute_messages(graph, &groups.edges, message)?;
                reduce_messages(graph, &groups, &messages, reduce, self.config.degree_bucketing)?
            }
        };

        self.write_back(&groups, updates, apply)
    }

    /// Runs the optional apply step on the reduced rows, then commits.
    fn write_back(&mut self, groups: &DstGroups, mut updates: FieldMap, apply: Option<&NodeFn>) -> Result<(), ExecError> {
        if let Some(apply) = apply {
            let applied = {
                let batch = NodeBatch::new(self.graph, groups.nodes.clone()).with_staged(&updates);
                apply.call(&batch)?
            };
            check_rows(&applied, groups.len(), "apply")?;
            updates.extend(applied);
        }

        let rows = groups.node_rows();
        self.graph.ndata_mut().commit(&rows, &updates)?;
        Ok(())
    }

    /// Node and edge features must share a device.
    fn check_frame_devices(&self) -> Result<(), ExecError> {
        if let (Some(nodes), Some(edges)) = (self.graph.ndata().device(), self.graph.edata().device()) {
            if nodes != edges {
                return Err(CoreError::DeviceMismatch {
                    expected: nodes,
                    got: edges,
                }
                .into());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Graph-level entry points
// ---------------------------------------------------------------------------

/// Message passing on a graph with the default [`SchedulerConfig`].
pub trait MessagePassing {
    fn update_all_with(
        &mut self,
        message: &MessageFn,
        reduce: &ReduceFn,
        apply: Option<&NodeFn>,
    ) -> Result<(), ExecError>;

    fn send_and_recv(&mut self, edges: &[EdgeId], message: &MessageFn, reduce: &ReduceFn) -> Result<(), ExecError>;

    fn pull(&mut self, nodes: &[NodeId], message: &MessageFn, reduce: &ReduceFn) -> Result<(), ExecError>;

    fn push(&mut self, nodes: &[NodeId], message: &MessageFn, reduce: &ReduceFn) -> Result<(), ExecError>;

    fn send(&mut self, edges: Option<&[EdgeId]>, message: &MessageFn, outbox: &mut Outbox) -> Result<(), ExecError>;

    fn recv(&mut self, nodes: Option<&[NodeId]>, reduce: &ReduceFn, outbox: &mut Outbox) -> Result<(), ExecError>;

    fn apply_nodes(&mut self, f: &NodeFn, nodes: Option<&[NodeId]>) -> Result<(), ExecError>;

    fn apply_edges(&mut self, f: &MessageFn, edges: Option<&[EdgeId]>) -> Result<(), ExecError>;

    fn update_all(&mut self, message: &MessageFn, reduce: &ReduceFn) -> Result<(), ExecError> {
        self.update_all_with(message, reduce, None)
    }
}

impl MessagePassing for Graph {
    fn update_all_with(
        &mut self,
        message: &MessageFn,
        reduce: &ReduceFn,
        apply: Option<&NodeFn>,
    ) -> Result<(), ExecError> {
        Scheduler::new(self, SchedulerConfig::default()).update_all(message, reduce, apply)
    }

    fn send_and_recv(&mut self, edges: &[EdgeId], message: &MessageFn, reduce: &ReduceFn) -> Result<(), ExecError> {
        Scheduler::new(self, SchedulerConfig::default()).send_and_recv(edges, message, reduce, None)
    }

    fn pull(&mut self, nodes: &[NodeId], message: &MessageFn, reduce: &ReduceFn) -> Result<(), ExecError> {
        Scheduler::new(self, SchedulerConfig::default()).pull(nodes, message, reduce, None)
    }

    fn push(&mut self, nodes: &[NodeId], message: &MessageFn, reduce: &ReduceFn) -> Result<(), ExecError> {
        Scheduler::new(self, SchedulerConfig::default()).push(nodes, message, reduce, None)
    }

    fn send(&mut self, edges: Option<&[EdgeId]>, message: &MessageFn, outbox: &mut Outbox) -> Result<(), ExecError> {
        Scheduler::new(self, SchedulerConfig::default()).send(edges, message, outbox)
    }

    fn recv(&mut self, nodes: Option<&[NodeId]>, reduce: &ReduceFn, outbox: &mut Outbox) -> Result<(), ExecError> {
        Scheduler::new(self, SchedulerConfig::default()).recv(nodes, reduce, None, outbox)
    }

    fn apply_nodes(&mut self, f: &NodeFn, nodes: Option<&[NodeId]>) -> Result<(), ExecError> {
        Scheduler::new(self, SchedulerConfig::default()).apply_nodes(f, nodes)
    }

    fn apply_edges(&mut self, f: &MessageFn, edges: Option<&[EdgeId]>) -> Result<(), ExecError> {
        Scheduler::new(self, SchedulerConfig::default()).apply_edges(f, edges)
    }
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

fn check_pair(message: &BuiltinMessage, reduce: &BuiltinReduce) -> Result<(), ExecError> {
    if message.out_field != reduce.msg_field {
        return Err(ExecError::InvalidFunctionPair {
            message_out: message.out_field.clone(),
            reduce_in: reduce.msg_field.clone(),
        });
    }
    Ok(())
}

/// Keeps the ids whose mask entry is nonzero. The mask must hold exactly one
/// value per id.
fn keep_masked<T>(ids: Vec<T>, mask: &Tensor, context: &str) -> Result<Vec<T>, ExecError> {
    if mask.numel() != ids.len() || mask.shape().first() != Some(&ids.len()) {
        return Err(CoreError::shape(format!("{context} mask"), &[ids.len()], mask.shape()).into());
    }
    Ok(ids
        .into_iter()
        .zip(mask.data())
        .filter(|(_, &m)| m != 0.0)
        .map(|(id, _)| id)
        .collect())
}

/// Every output field must have exactly `rows` leading rows.
fn check_rows(out: &FieldMap, rows: usize, context: &str) -> Result<(), ExecError> {
    for (field, tensor) in out {
        if tensor.shape().is_empty() || tensor.num_rows() != rows {
            return Err(CoreError::shape(format!("{context} output '{field}'"), &[rows], tensor.shape()).into());
        }
    }
    Ok(())
}

/// Materializes one message row per edge, in the order of `edges`.
fn compute_messages(graph: &Graph, edges: &[EdgeId], message: &MessageFn) -> Result<FieldMap, ExecError> {
    let batch = EdgeBatch::new(graph, edges);
    match message {
        MessageFn::Builtin(m) => {
            let operand = |target: Target, field: &str| match target {
                Target::Src => batch.src(field),
                Target::Dst => batch.dst(field),
                Target::Edge => batch.data(field),
            };
            let (lhs_target, _) = m.kind.operands();
            let lhs = operand(lhs_target, &m.lhs_field)?;
            let out = match m.kind {
                MessageKind::Copy(_) => lhs,
                MessageKind::Binary { op, rhs, .. } => {
                    let rhs_field = m.rhs_field.as_deref().unwrap_or(&m.lhs_field);
                    let rhs = operand(rhs, rhs_field)?;
                    lhs.zip_with(&rhs, &m.kind.to_string(), |a, b| op.apply(a, b))?
                }
            };
            Ok(FieldMap::from([(m.out_field.clone(), out)]))
        }
        MessageFn::User(f) => {
            let out = f(&batch)?;
            check_rows(&out, edges.len(), "message")?;
            Ok(out)
        }
    }
}

/// Folds each group's contiguous segment of `messages` into one row.
fn segment_reduce(messages: &Tensor, groups: &DstGroups, kind: ReduceKind) -> Result<Tensor, CoreError> {
    let width = messages.row_len();
    let identity = kind.identity(messages.dtype());
    let mut out = vec![identity; groups.len() * width];
    for g in 0..groups.len() {
        let acc = &mut out[g * width..(g + 1) * width];
        for r in groups.offsets[g]..groups.offsets[g + 1] {
            for (a, &m) in acc.iter_mut().zip(messages.row(r)) {
                *a = kind.combine(*a, m);
            }
        }
        let count = groups.degree(g);
        acc.iter_mut().for_each(|a| *a = kind.finalize(*a, count));
    }
    let mut shape = Shape::from_slice(&[groups.len()]);
    shape.extend_from_slice(messages.feature_shape());
    Tensor::from_vec_typed(&shape, out, messages.dtype(), messages.device())
}

fn reduce_messages(
    graph: &Graph,
    groups: &DstGroups,
    messages: &FieldMap,
    reduce: &ReduceFn,
    degree_bucketing: bool,
) -> Result<FieldMap, ExecError> {
    match reduce {
        ReduceFn::Builtin(r) => {
            let msgs = messages.get(&r.msg_field).ok_or_else(|| CoreError::UnknownField {
                field: r.msg_field.clone(),
            })?;
            let out = segment_reduce(msgs, groups, r.kind)?;
            Ok(FieldMap::from([(r.out_field.clone(), out)]))
        }
        ReduceFn::User(f) => {
            let buckets: Vec<Vec<usize>> = if degree_bucketing {
                let mut by_degree: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
                for g in 0..groups.len() {
                    by_degree.entry(groups.degree(g)).or_default().push(g);
                }
                by_degree.into_values().collect()
            } else {
                (0..groups.len()).map(|g| vec![g]).collect()
            };

            let mut parts = Vec::with_capacity(buckets.len());
            for bucket in buckets {
                let degree = groups.degree(bucket[0]);
                let rows: Vec<usize> = bucket
                    .iter()
                    .flat_map(|&g| groups.offsets[g]..groups.offsets[g + 1])
                    .collect();
                let mut mailbox = FieldMap::new();
                for (field, tensor) in messages {
                    let mut shape = vec![bucket.len(), degree];
                    shape.extend_from_slice(tensor.feature_shape());
                    mailbox.insert(field.clone(), tensor.gather_rows(&rows)?.reshape(&shape)?);
                }
                let nodes = bucket.iter().map(|&g| groups.nodes[g]).collect();
                tracing::trace!("reduce bucket: degree {}, {} nodes", degree, bucket.len());
                let batch = NodeBatch::new(graph, nodes).with_mailbox(mailbox, degree);
                let out = f(&batch)?;
                check_rows(&out, bucket.len(), "reduce")?;
                parts.push((bucket, out));
            }
            merge_buckets(groups.len(), parts)
        }
    }
}

/// Reassembles per-bucket outputs into group order.
fn merge_buckets(num_groups: usize, parts: Vec<(Vec<usize>, FieldMap)>) -> Result<FieldMap, ExecError> {
    let Some((_, first)) = parts.first() else {
        return Ok(FieldMap::new());
    };
    // position[g] = row of group g in the bucket-order concatenation
    let mut position = vec![0usize; num_groups];
    for (i, g) in parts.iter().flat_map(|(bucket, _)| bucket).enumerate() {
        position[*g] = i;
    }

    let mut merged = FieldMap::new();
    for field in first.keys() {
        let mut pieces = Vec::with_capacity(parts.len());
        for (_, out) in &parts {
            let piece = out.get(field).ok_or_else(|| CoreError::UnknownField { field: field.clone() })?;
            pieces.push(piece.clone());
        }
        let stacked = Tensor::concat_rows(&pieces)?;
        merged.insert(field.clone(), stacked.gather_rows(&position)?);
    }
    Ok(merged)
}

fn stored_operand<'a>(graph: &'a Graph, target: Target, field: &str) -> Result<&'a Tensor, CoreError> {
    match target {
        Target::Src | Target::Dst => graph.ndata().get(field),
        Target::Edge => graph.edata().get(field),
    }
}

/// Computes `reduce(message(e) for e in group)` per destination without
/// materializing the messages.
///
/// Messages are rounded to the operand dtype and folded in edge-id order,
/// which makes the result identical to the materialized path.
fn fused_kernel(
    graph: &Graph,
    groups: &DstGroups,
    message: &BuiltinMessage,
    reduce: &BuiltinReduce,
) -> Result<Tensor, ExecError> {
    let (lhs_target, rhs_target) = message.kind.operands();
    let lhs = stored_operand(graph, lhs_target, &message.lhs_field)?;
    let rhs = match rhs_target {
        Some(target) => {
            let field = message.rhs_field.as_deref().unwrap_or(&message.lhs_field);
            Some((target, stored_operand(graph, target, field)?))
        }
        None => None,
    };

    let feature: Shape = match rhs {
        Some((_, rhs)) => {
            lhs.check_device(rhs)?;
            if lhs.dtype() != rhs.dtype() {
                return Err(CoreError::DTypeMismatch {
                    expected: lhs.dtype(),
                    got: rhs.dtype(),
                }
                .into());
            }
            broadcast_feature(lhs.feature_shape(), rhs.feature_shape())
                .ok_or_else(|| CoreError::shape(message.kind.to_string(), lhs.shape(), rhs.shape()))?
        }
        None => Shape::from_slice(lhs.feature_shape()),
    };
    let width: usize = feature.iter().product();
    let dtype = lhs.dtype();

    let (src, dst) = (graph.src(), graph.dst());
    let row_of = |target: Target, e: EdgeId| match target {
        Target::Src => src[e.index()].index(),
        Target::Dst => dst[e.index()].index(),
        Target::Edge => e.index(),
    };

    let identity = reduce.kind.identity(dtype);
    let mut out = vec![identity; groups.len() * width];
    for g in 0..groups.len() {
        let acc = &mut out[g * width..(g + 1) * width];
        for &e in groups.edges_of(g) {
            let l = lhs.try_row(row_of(lhs_target, e))?;
            let r = match rhs {
                Some((target, t)) => Some(t.try_row(row_of(target, e))?),
                None => None,
            };
            for (k, a) in acc.iter_mut().enumerate() {
                let x = if l.len() == 1 { l[0] } else { l[k] };
                let y = match r {
                    Some(r) if r.len() == 1 => r[0],
                    Some(r) => r[k],
                    None => 0.0,
                };
                *a = reduce.kind.combine(*a, dtype.round(message.kind.eval(x, y)));
            }
        }
        let count = groups.degree(g);
        acc.iter_mut().for_each(|a| *a = reduce.kind.finalize(*a, count));
    }

    let mut shape = Shape::from_slice(&[groups.len()]);
    shape.extend_from_slice(&feature);
    Ok(Tensor::from_vec_typed(&shape, out, dtype, lhs.device())?)
}
