//! Contraction round-trip behavior of the dynamic adjacency array.

use proptest::prelude::*;

use hedgecut::graph::adjacency::{DynamicAdjacencyArray, NoopLocks};
use hedgecut::graph::{EdgeWeight, NodeId};

fn neighbors(dar: &DynamicAdjacencyArray, u: NodeId) -> Vec<(NodeId, EdgeWeight)> {
    let mut out: Vec<_> =
        dar.incident_edges(u).map(|e| (dar.edge(e).target, dar.edge(e).weight)).collect();
    out.sort_unstable();
    out
}

#[test]
fn contract_uncontract_basic_round_trip() {
    let mut dar =
        DynamicAdjacencyArray::build_from_edge_list(4, &[(0, 1), (0, 2), (1, 2), (2, 3)], None)
            .unwrap();

    dar.contract(0, 1, &NoopLocks);
    // neighbors of the merged vertex: 2 twice, 3 reachable via 2 only
    assert_eq!(dar.node_degree(0), 2);
    dar.remove_parallel_edges();
    assert_eq!(neighbors(&dar, 0), vec![(2, 2)]);

    dar.uncontract(0, 1, |_| {}, |_| {}, &NoopLocks);
    assert_eq!(neighbors(&dar, 0), vec![(1, 1), (2, 1)]);
    assert_eq!(neighbors(&dar, 1), vec![(0, 1), (2, 1)]);
    assert_eq!(neighbors(&dar, 2), vec![(0, 1), (1, 1), (3, 1)]);
    assert_eq!(neighbors(&dar, 3), vec![(2, 1)]);
    dar.validate().unwrap();
}

#[test]
#[should_panic(expected = "out of order")]
fn lifo_violation_trips_the_invariant() {
    let mut dar =
        DynamicAdjacencyArray::build_from_edge_list(4, &[(0, 1), (0, 2), (1, 2), (2, 3)], None)
            .unwrap();
    dar.contract(0, 1, &NoopLocks);
    dar.contract(0, 2, &NoopLocks);
    dar.uncontract(0, 1, |_| {}, |_| {}, &NoopLocks);
}

#[test]
fn twin_symmetry_summed_weight_is_doubled() {
    let pairs = [(0, 1), (1, 2), (2, 3), (3, 0), (0, 2)];
    let weights = [3, 1, 4, 1, 5];
    let dar = DynamicAdjacencyArray::build_from_edge_list(4, &pairs, Some(&weights)).unwrap();
    let total: EdgeWeight = dar.edges().map(|e| dar.edge(e).weight).sum();
    assert_eq!(total, 2 * weights.iter().sum::<EdgeWeight>());
    for e in dar.edges() {
        let rec = dar.edge(e);
        let twin = dar.edge(rec.twin);
        assert_eq!(twin.weight, rec.weight);
        assert_eq!(twin.target, rec.source);
    }
}

/// Connected-ish random graph on `n` nodes.
fn arbitrary_graph(n: NodeId) -> impl Strategy<Value = Vec<(NodeId, NodeId)>> {
    let all_pairs: Vec<(NodeId, NodeId)> =
        (0..n).flat_map(|a| (a + 1..n).map(move |b| (a, b))).collect();
    proptest::sample::subsequence(all_pairs, 3..=(n as usize * (n as usize - 1) / 2))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any valid contraction sequence, undone in reverse order, restores
    /// every header and every active edge weight.
    #[test]
    fn random_round_trips_restore_state(
        pairs in arbitrary_graph(12),
        merge_seq in proptest::collection::vec((0..12u32, 0..12u32), 1..8),
    ) {
        let mut dar = DynamicAdjacencyArray::build_from_edge_list(12, &pairs, None).unwrap();
        let snapshot_headers: Vec<_> = (0..12).map(|u| *dar.header(u)).collect();
        let snapshot_neighbors: Vec<_> = (0..12).map(|u| neighbors(&dar, u)).collect();

        // apply the merge sequence, keeping only currently-valid pairs
        let mut reps: Vec<NodeId> = (0..12).collect();
        let mut performed = Vec::new();
        for (a, b) in merge_seq {
            let (u, v) = (reps[a as usize], reps[b as usize]);
            if u != v {
                dar.contract(u, v, &NoopLocks);
                for r in reps.iter_mut() {
                    if *r == v {
                        *r = u;
                    }
                }
                performed.push((u, v));
            }
        }
        dar.remove_parallel_edges();
        dar.validate().unwrap();

        for &(u, v) in performed.iter().rev() {
            dar.uncontract(u, v, |_| {}, |_| {}, &NoopLocks);
        }
        dar.validate().unwrap();

        for u in 0..12 {
            prop_assert_eq!(*dar.header(u), snapshot_headers[u as usize].clone());
            prop_assert_eq!(neighbors(&dar, u), snapshot_neighbors[u as usize].clone());
        }
    }

    /// Twin symmetry holds at every intermediate level.
    #[test]
    fn twin_symmetry_is_preserved_under_contraction(
        pairs in arbitrary_graph(10),
        merges in proptest::collection::vec((0..10u32, 0..10u32), 1..6),
    ) {
        let mut dar = DynamicAdjacencyArray::build_from_edge_list(10, &pairs, None).unwrap();
        let mut reps: Vec<NodeId> = (0..10).collect();
        for (a, b) in merges {
            let (u, v) = (reps[a as usize], reps[b as usize]);
            if u != v {
                dar.contract(u, v, &NoopLocks);
                for r in reps.iter_mut() {
                    if *r == v {
                        *r = u;
                    }
                }
                dar.remove_parallel_edges();
                prop_assert!(dar.validate().is_ok());
            }
        }
    }
}
