//! Traversal orders over a graph, expressed as frontiers.
//!
//! Every generator walks the compact adjacency of the graph store
//! (out-edges, or in-edges when `reverse` is set) and visits neighbors in
//! edge-id order, so a given topology always yields the same frontiers.
//! Generators only read topology; they never touch feature data.

use serde::{Deserialize, Serialize};

use msgflow_core::{CoreError, EdgeId, Graph, NodeId, SparseMatrix};

use crate::error::ExecError;

/// Classification of an edge emitted by [`dfs_labeled_edges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    /// A tree edge, emitted when it discovers its target.
    Forward,
    /// A tree edge again, emitted when the search backtracks over it.
    Reverse,
    /// An edge whose target was already discovered.
    NonTree,
}

/// An ordered sequence of frontiers stored flat: frontier `k` holds the
/// next `sections[k]` entries of `ids`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FrontierParts<T>")]
pub struct Frontiers<T> {
    ids: Vec<T>,
    sections: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<EdgeLabel>>,
}

#[derive(Deserialize)]
struct FrontierParts<T> {
    ids: Vec<T>,
    sections: Vec<usize>,
    #[serde(default)]
    tags: Option<Vec<EdgeLabel>>,
}

impl<T> TryFrom<FrontierParts<T>> for Frontiers<T> {
    type Error = CoreError;

    /// Sections must cover `ids` exactly; tags, if present, label every id.
    fn try_from(parts: FrontierParts<T>) -> Result<Self, Self::Error> {
        let covered = parts
            .sections
            .iter()
            .try_fold(0usize, |acc, &len| acc.checked_add(len));
        if covered != Some(parts.ids.len()) {
            return Err(CoreError::shape(
                "frontier sections",
                &[parts.ids.len()],
                &[covered.unwrap_or(usize::MAX)],
            ));
        }
        if let Some(tags) = &parts.tags {
            if tags.len() != parts.ids.len() {
                return Err(CoreError::shape("frontier tags", &[parts.ids.len()], &[tags.len()]));
            }
        }
        Ok(Frontiers {
            ids: parts.ids,
            sections: parts.sections,
            tags: parts.tags,
        })
    }
}

impl<T> Frontiers<T> {
    pub fn new() -> Self {
        Frontiers {
            ids: Vec::new(),
            sections: Vec::new(),
            tags: None,
        }
    }

    /// Appends one frontier.
    pub fn push(&mut self, frontier: impl IntoIterator<Item = T>) {
        let before = self.ids.len();
        self.ids.extend(frontier);
        self.sections.push(self.ids.len() - before);
    }

    /// Appends a single-item frontier with a label.
    pub fn push_tagged(&mut self, item: T, label: EdgeLabel) {
        self.ids.push(item);
        self.sections.push(1);
        self.tags.get_or_insert_with(Vec::new).push(label);
    }

    /// Number of frontiers.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// All items, frontier after frontier.
    pub fn ids(&self) -> &[T] {
        &self.ids
    }

    pub fn sections(&self) -> &[usize] {
        &self.sections
    }

    /// Per-item labels, present only for labeled traversals.
    pub fn tags(&self) -> Option<&[EdgeLabel]> {
        self.tags.as_deref()
    }

    pub fn get(&self, k: usize) -> Option<&[T]> {
        let len = *self.sections.get(k)?;
        let start: usize = self.sections[..k].iter().sum();
        Some(&self.ids[start..start + len])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[T]> + '_ {
        self.sections.iter().scan(0usize, move |start, &len| {
            let begin = *start;
            *start += len;
            Some(&self.ids[begin..begin + len])
        })
    }
}

impl<T: Clone> Frontiers<T> {
    pub fn to_vecs(&self) -> Vec<Vec<T>> {
        self.iter().map(<[T]>::to_vec).collect()
    }
}

impl<T> Default for Frontiers<T> {
    fn default() -> Self {
        Frontiers::new()
    }
}

/// Options for depth-first edge traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DfsOptions {
    /// Follow in-edges instead of out-edges.
    pub reverse: bool,
    /// Emit each tree edge a second time when backtracking over it.
    pub has_reverse_edge: bool,
    /// Emit edges that reach an already discovered node.
    pub has_nontree_edge: bool,
}

fn adjacency(graph: &Graph, reverse: bool) -> &SparseMatrix {
    if reverse {
        graph.in_csr()
    } else {
        graph.out_csr()
    }
}

/// Marks `sources` visited and returns them, first occurrence wins.
fn seed_layer(graph: &Graph, sources: &[NodeId], visited: &mut [bool]) -> Result<Vec<usize>, ExecError> {
    let mut layer = Vec::with_capacity(sources.len());
    for &s in sources {
        graph.check_node(s)?;
        if !visited[s.index()] {
            visited[s.index()] = true;
            layer.push(s.index());
        }
    }
    Ok(layer)
}

/// Breadth-first node layers: frontier `k` holds the nodes first reached
/// at distance `k` from any source. All sources form frontier 0.
pub fn bfs_nodes(graph: &Graph, sources: &[NodeId], reverse: bool) -> Result<Frontiers<NodeId>, ExecError> {
    let csr = adjacency(graph, reverse);
    let mut visited = vec![false; graph.num_nodes()];
    let mut layer = seed_layer(graph, sources, &mut visited)?;
    let mut frontiers = Frontiers::new();
    while !layer.is_empty() {
        let mut next = Vec::new();
        for &u in &layer {
            for &v in csr.row_indices(u) {
                let v = v as usize;
                if !visited[v] {
                    visited[v] = true;
                    next.push(v);
                }
            }
        }
        frontiers.push(layer.iter().map(|&u| NodeId(u as u32)));
        layer = next;
    }
    tracing::trace!("bfs_nodes: {} frontiers", frontiers.len());
    Ok(frontiers)
}

/// Breadth-first edge layers: frontier `k` holds the edges that discover
/// the nodes of node layer `k + 1`.
pub fn bfs_edges(graph: &Graph, sources: &[NodeId], reverse: bool) -> Result<Frontiers<EdgeId>, ExecError> {
    let csr = adjacency(graph, reverse);
    let mut visited = vec![false; graph.num_nodes()];
    let mut layer = seed_layer(graph, sources, &mut visited)?;
    let mut frontiers = Frontiers::new();
    loop {
        let mut next = Vec::new();
        let mut edges = Vec::new();
        for &u in &layer {
            for (&v, &e) in csr.row_indices(u).iter().zip(csr.row_entries(u)) {
                let v = v as usize;
                if !visited[v] {
                    visited[v] = true;
                    next.push(v);
                    edges.push(e);
                }
            }
        }
        if edges.is_empty() {
            break;
        }
        frontiers.push(edges);
        layer = next;
    }
    Ok(frontiers)
}

/// Kahn layering: frontier 0 holds every node without predecessors, and
/// each later frontier holds the nodes whose last predecessor was resolved
/// by the previous one.
///
/// Fails with [`ExecError::CycleDetected`] when some nodes never become
/// ready.
pub fn topological_nodes(graph: &Graph, reverse: bool) -> Result<Frontiers<NodeId>, ExecError> {
    let csr = adjacency(graph, reverse);
    let mut pending = if reverse {
        graph.out_degrees()
    } else {
        graph.in_degrees()
    };
    let mut layer: Vec<usize> = (0..graph.num_nodes()).filter(|&v| pending[v] == 0).collect();
    let mut frontiers = Frontiers::new();
    let mut resolved = 0;
    while !layer.is_empty() {
        let mut next = Vec::new();
        for &u in &layer {
            // Parallel edges decrement once each.
            for &v in csr.row_indices(u) {
                let v = v as usize;
                pending[v] -= 1;
                if pending[v] == 0 {
                    next.push(v);
                }
            }
        }
        resolved += layer.len();
        frontiers.push(layer.iter().map(|&u| NodeId(u as u32)));
        layer = next;
    }
    let unresolved = graph.num_nodes() - resolved;
    if unresolved > 0 {
        return Err(ExecError::CycleDetected { unresolved });
    }
    Ok(frontiers)
}

/// Depth-first tree edges, one per frontier, in discovery order.
pub fn dfs_edges(graph: &Graph, sources: &[NodeId], reverse: bool) -> Result<Frontiers<EdgeId>, ExecError> {
    let mut frontiers = Frontiers::new();
    for &source in sources {
        graph.check_node(source)?;
        dfs_visit(adjacency(graph, reverse), source.index(), false, false, |e, _| {
            frontiers.push([e]);
        });
    }
    Ok(frontiers)
}

/// Depth-first edges with labels, one per frontier.
///
/// Each source starts a fresh search. Tree edges are emitted as
/// [`EdgeLabel::Forward`] on discovery and, with `has_reverse_edge`, again as
/// [`EdgeLabel::Reverse`] when the search backtracks over them. With
/// `has_nontree_edge`, edges into already discovered nodes are emitted as
/// [`EdgeLabel::NonTree`] when they are examined.
pub fn dfs_labeled_edges(
    graph: &Graph,
    sources: &[NodeId],
    options: DfsOptions,
) -> Result<Frontiers<EdgeId>, ExecError> {
    let mut frontiers = Frontiers::new();
    for &source in sources {
        graph.check_node(source)?;
        dfs_visit(
            adjacency(graph, options.reverse),
            source.index(),
            options.has_reverse_edge,
            options.has_nontree_edge,
            |e, label| frontiers.push_tagged(e, label),
        );
    }
    Ok(frontiers)
}

/// Iterative depth-first search. Stack entries are
/// `(node, next out-edge slot, slot is a tree edge)`.
fn dfs_visit(
    csr: &SparseMatrix,
    source: usize,
    has_reverse_edge: bool,
    has_nontree_edge: bool,
    mut visit: impl FnMut(EdgeId, EdgeLabel),
) {
    let mut visited = vec![false; csr.nrows()];
    visited[source] = true;
    if csr.row_nnz(source) == 0 {
        return;
    }
    let mut stack: Vec<(usize, usize, bool)> = vec![(source, 0, false)];
    while let Some(top) = stack.last_mut() {
        let (u, i, on_tree) = *top;
        let v = csr.row_indices(u)[i] as usize;
        let e = csr.row_entries(u)[i];
        if visited[v] {
            if on_tree && has_reverse_edge {
                visit(e, EdgeLabel::Reverse);
            } else if !on_tree && has_nontree_edge {
                visit(e, EdgeLabel::NonTree);
            }
            stack.pop();
            if i + 1 < csr.row_nnz(u) {
                stack.push((u, i + 1, false));
            }
        } else {
            visited[v] = true;
            top.2 = true;
            visit(e, EdgeLabel::Forward);
            if csr.row_nnz(v) > 0 {
                stack.push((v, 0, false));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msgflow_core::id::node_ids;

    /// Path 0 - 1 - 2 - 3 - 4 with both directions; edge 2k is k -> k+1.
    fn bidirected_path(n: u32) -> Graph {
        let mut edges = Vec::new();
        for k in 0..n - 1 {
            edges.push((k, k + 1));
            edges.push((k + 1, k));
        }
        Graph::from_edges(n as usize, &edges).unwrap()
    }

    fn raw<T: Copy>(f: &Frontiers<T>, to_u32: impl Fn(T) -> u32) -> Vec<Vec<u32>> {
        f.iter().map(|s| s.iter().map(|&x| to_u32(x)).collect()).collect()
    }

    #[test]
    fn bfs_layers_by_distance() {
        let g = bidirected_path(5);
        let f = bfs_nodes(&g, &[NodeId(2)], false).unwrap();
        assert_eq!(raw(&f, |n| n.0), vec![vec![2], vec![1, 3], vec![0, 4]]);

        let multi = bfs_nodes(&g, &node_ids(&[0, 4, 0]), false).unwrap();
        assert_eq!(raw(&multi, |n| n.0), vec![vec![0, 4], vec![1, 3], vec![2]]);
    }

    #[test]
    fn bfs_edges_are_discovery_edges() {
        let g = bidirected_path(4);
        let f = bfs_edges(&g, &[NodeId(0)], false).unwrap();
        assert_eq!(raw(&f, |e| e.0), vec![vec![0], vec![2], vec![4]]);
    }

    #[test]
    fn reverse_follows_in_edges() {
        let g = Graph::from_edges(3, &[(0, 1), (1, 2)]).unwrap();
        assert_eq!(raw(&bfs_nodes(&g, &[NodeId(0)], true).unwrap(), |n| n.0), vec![vec![0]]);
        assert_eq!(
            raw(&bfs_nodes(&g, &[NodeId(2)], true).unwrap(), |n| n.0),
            vec![vec![2], vec![1], vec![0]]
        );
    }

    #[test]
    fn topological_layers_tree() {
        let g = Graph::from_edges(5, &[(1, 0), (2, 0), (3, 2), (4, 2)]).unwrap();
        let f = topological_nodes(&g, false).unwrap();
        assert_eq!(raw(&f, |n| n.0), vec![vec![1, 3, 4], vec![2], vec![0]]);
        let r = topological_nodes(&g, true).unwrap();
        assert_eq!(raw(&r, |n| n.0), vec![vec![0], vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn topological_counts_parallel_edges() {
        let g = Graph::from_edges(2, &[(0, 1), (0, 1)]).unwrap();
        assert_eq!(raw(&topological_nodes(&g, false).unwrap(), |n| n.0), vec![vec![0], vec![1]]);
    }

    #[test]
    fn cycles_are_reported() {
        let g = Graph::from_edges(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]).unwrap();
        assert_eq!(
            topological_nodes(&g, false).unwrap_err(),
            ExecError::CycleDetected { unresolved: 3 }
        );
    }

    #[test]
    fn dfs_labels_on_bidirected_path() {
        let g = bidirected_path(5);
        let plain = dfs_edges(&g, &[NodeId(0)], false).unwrap();
        assert_eq!(plain.ids(), &[EdgeId(0), EdgeId(2), EdgeId(4), EdgeId(6)]);
        assert_eq!(plain.tags(), None);

        let options = DfsOptions {
            has_reverse_edge: true,
            ..DfsOptions::default()
        };
        let rev = dfs_labeled_edges(&g, &[NodeId(0)], options).unwrap();
        assert_eq!(raw(&rev, |e| e.0).concat(), vec![0, 2, 4, 6, 6, 4, 2, 0]);
        assert_eq!(rev.tags().unwrap()[3..5], [EdgeLabel::Forward, EdgeLabel::Reverse]);

        let options = DfsOptions {
            has_nontree_edge: true,
            ..DfsOptions::default()
        };
        let nontree = dfs_labeled_edges(&g, &[NodeId(0)], options).unwrap();
        assert_eq!(raw(&nontree, |e| e.0).concat(), vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(nontree.tags().unwrap()[1], EdgeLabel::NonTree);
    }

    #[test]
    fn dfs_from_sink_is_empty() {
        let g = Graph::from_edges(2, &[(0, 1)]).unwrap();
        assert!(dfs_edges(&g, &[NodeId(1)], false).unwrap().is_empty());
        assert!(dfs_edges(&g, &[NodeId(5)], false).is_err());
    }

    #[test]
    fn frontier_accessors() {
        let mut f = Frontiers::new();
        f.push([NodeId(3)]);
        f.push(Vec::<NodeId>::new());
        f.push([NodeId(1), NodeId(2)]);
        assert_eq!(f.len(), 3);
        assert_eq!(f.sections(), &[1, 0, 2]);
        assert_eq!(f.get(2), Some(&[NodeId(1), NodeId(2)][..]));
        assert_eq!(f.get(3), None);
        assert_eq!(f.to_vecs()[1], Vec::<NodeId>::new());
    }

    #[test]
    fn frontiers_snapshot() {
        let g = Graph::from_edges(5, &[(1, 0), (2, 0), (3, 2), (4, 2)]).unwrap();
        let f = topological_nodes(&g, false).unwrap();
        insta::assert_json_snapshot!(f, @r###"
        {
          "ids": [
            1,
            3,
            4,
            2,
            0
          ],
          "sections": [
            3,
            1,
            1
          ]
        }
        "###);
    }

    #[test]
    fn frontiers_deserialize_checked() {
        let g = bidirected_path(3);
        let options = DfsOptions {
            has_reverse_edge: true,
            ..DfsOptions::default()
        };
        let f = dfs_labeled_edges(&g, &[NodeId(0)], options).unwrap();
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(serde_json::from_str::<Frontiers<EdgeId>>(&json).unwrap(), f);

        for payload in [
            r#"{"ids":[1],"sections":[5]}"#,
            r#"{"ids":[1,2],"sections":[1]}"#,
            r#"{"ids":[1],"sections":[1],"tags":["forward","reverse"]}"#,
        ] {
            assert!(serde_json::from_str::<Frontiers<NodeId>>(payload).is_err(), "{payload}");
        }
    }
}
