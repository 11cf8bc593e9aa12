//! Traversal orders checked against petgraph's algorithms.

use std::collections::HashMap;

use msgflow_core::{Graph, NodeId};
use msgflow_exec::{bfs_nodes, topological_nodes, ExecError};
use petgraph::algo::{dijkstra, toposort};
use petgraph::graph::NodeIndex;
use proptest::prelude::*;

fn arb_graph() -> impl Strategy<Value = (usize, Vec<(u32, u32)>, u32)> {
    (1usize..10).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::vec((0..n as u32, 0..n as u32), 0..30),
            0..n as u32,
        )
    })
}

proptest! {
    #[test]
    fn bfs_layers_are_shortest_path_distances((n, edges, seed) in arb_graph()) {
        let g = Graph::from_edges(n, &edges).unwrap();
        let frontiers = bfs_nodes(&g, &[NodeId(seed)], false).unwrap();
        let dist = dijkstra(&g.to_petgraph(), NodeIndex::new(seed as usize), None, |_| 1usize);

        let mut layer_of = HashMap::new();
        for (k, layer) in frontiers.iter().enumerate() {
            for &v in layer {
                prop_assert!(layer_of.insert(v, k).is_none(), "node {} visited twice", v);
            }
        }
        prop_assert_eq!(layer_of.len(), dist.len());
        for (v, k) in layer_of {
            prop_assert_eq!(dist.get(&NodeIndex::from(v)).copied(), Some(k));
        }
    }

    #[test]
    fn topological_layers_respect_edges((n, edges, _seed) in arb_graph()) {
        let g = Graph::from_edges(n, &edges).unwrap();
        let oracle = toposort(&g.to_petgraph(), None);
        match topological_nodes(&g, false) {
            Ok(frontiers) => {
                prop_assert!(oracle.is_ok());
                let mut layer_of = vec![usize::MAX; n];
                for (k, layer) in frontiers.iter().enumerate() {
                    for v in layer {
                        layer_of[v.index()] = k;
                    }
                }
                for &(u, v) in &edges {
                    prop_assert!(layer_of[u as usize] < layer_of[v as usize]);
                }
            }
            Err(ExecError::CycleDetected { unresolved }) => {
                prop_assert!(oracle.is_err());
                prop_assert!(unresolved > 0);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }
}
