//! Full multilevel flow: deterministic coarsening, a greedy flat partition
//! of the coarsest graph, and LP refinement interleaved with uncoarsening.

use hedgecut::coarsening::DeterministicCoarsener;
use hedgecut::context::Context;
use hedgecut::graph::dynamic_graph::DynamicGraph;
use hedgecut::graph::hypergraph::Hypergraph;
use hedgecut::graph::partitioned::{PartitionView, PartitionedHypergraph};
use hedgecut::graph::{NodeId, PartId};
use hedgecut::metrics;
use hedgecut::refinement::lp::DeterministicLabelPropagation;

fn grid_edges(rows: NodeId, cols: NodeId) -> Vec<(NodeId, NodeId)> {
    let mut pairs = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            let v = r * cols + c;
            if c + 1 < cols {
                pairs.push((v, v + 1));
            }
            if r + 1 < rows {
                pairs.push((v, v + cols));
            }
        }
    }
    pairs
}

/// Greedy balanced assignment of the coarse representatives.
fn initial_partition(g: &DynamicGraph, k: PartId) -> Vec<PartId> {
    let mut heads: Vec<NodeId> =
        (0..g.initial_num_nodes()).filter(|&u| g.is_head(u)).collect();
    heads.sort_by_key(|&u| std::cmp::Reverse(g.node_weight(u)));
    let mut part_weights = vec![0i64; k as usize];
    let mut partition = vec![0 as PartId; g.initial_num_nodes() as usize];
    for u in heads {
        let lightest =
            (0..k).min_by_key(|&p| part_weights[p as usize]).unwrap();
        partition[u as usize] = lightest;
        part_weights[lightest as usize] += g.node_weight(u);
    }
    partition
}

#[test]
fn multilevel_partition_of_a_grid() {
    let rows = 12;
    let cols = 12;
    let n = rows * cols;
    let edges = grid_edges(rows, cols);

    let mut ctx = Context::default();
    ctx.partition.k = 4;
    ctx.partition.seed = 42;
    // the greedy flat partition packs items of at most the cluster weight
    // cap on top of a perfectly balanced load, so epsilon must cover one cap
    ctx.partition.epsilon = 0.25;
    ctx.coarsening.contraction_limit = 24;
    ctx.coarsening.max_allowed_node_weight = 8;
    ctx.setup_part_weights(n as i64);

    // coarsen
    let mut g = DynamicGraph::from_edge_list(n, &edges, None, None).unwrap();
    let mut coarsener = DeterministicCoarsener::new(&ctx);
    let levels = coarsener.coarsen(&mut g);
    assert!(!levels.is_empty());
    let coarse_nodes = g.current_num_nodes();
    assert!(coarse_nodes < n / 2);

    // flat partition of the coarsest level, projected through uncoarsening
    let mut partition = initial_partition(&g, 4);
    while let Some(m) = g.uncontract_latest(|_| {}, |_| {}) {
        partition[m.v as usize] = partition[m.u as usize];
    }
    assert_eq!(g.current_num_nodes(), n);

    // refine the projected partition on the flat hypergraph view
    let hg = Hypergraph::from_graph_edges(n, &edges, None, None).unwrap();
    let phg = PartitionedHypergraph::from_partition(&hg, 4, &partition);
    let projected_quality = metrics::km1(&phg);

    let mut lp = DeterministicLabelPropagation::new(&ctx, n, hg.initial_num_edges());
    let improvement = lp.refine(&phg);
    let final_quality = metrics::km1(&phg);
    assert_eq!(projected_quality - final_quality, improvement);
    assert!(final_quality <= projected_quality);
    assert!(metrics::is_balanced(&phg, &ctx));

    // a 4-way grid partition should beat the all-cut worst case comfortably
    assert!(final_quality < (edges.len() as i64) / 2);
    for v in 0..n {
        assert!(phg.part_id(v) < 4);
    }
}
