//! Thread-count invariance of the deterministic components.

use hedgecut::coarsening::DeterministicCoarsener;
use hedgecut::context::Context;
use hedgecut::graph::dynamic_graph::DynamicGraph;
use hedgecut::graph::hypergraph::Hypergraph;
use hedgecut::graph::partitioned::PartitionedHypergraph;
use hedgecut::graph::{NodeId, PartId};
use hedgecut::parallel::install_with_pool;
use hedgecut::refinement::lp::DeterministicLabelPropagation;
use hedgecut::{metrics, parallel};

fn torus_edges(rows: NodeId, cols: NodeId) -> Vec<(NodeId, NodeId)> {
    let mut pairs = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            let v = r * cols + c;
            pairs.push((v, r * cols + (c + 1) % cols));
            pairs.push((v, ((r + 1) % rows) * cols + c));
        }
    }
    pairs
}

/// Pseudo-random but seed-deterministic starting partition.
fn scrambled_partition(n: NodeId, k: PartId, seed: u64) -> Vec<PartId> {
    (0..n).map(|v| (parallel::splitmix64(seed ^ v as u64) % k as u64) as PartId).collect()
}

#[test]
fn sync_lp_partitions_are_identical_across_thread_counts() {
    let run = |threads: usize| {
        install_with_pool(Some(threads), || {
            let edges = torus_edges(12, 12);
            let hg = Hypergraph::from_graph_edges(144, &edges, None, None).unwrap();
            let mut ctx = Context::default();
            ctx.partition.k = 4;
            ctx.partition.seed = 42;
            ctx.partition.epsilon = 0.2;
            ctx.setup_part_weights(hg.total_node_weight());
            let partition = scrambled_partition(144, 4, 7);
            let phg = PartitionedHypergraph::from_partition(&hg, 4, &partition);
            let mut lp =
                DeterministicLabelPropagation::new(&ctx, 144, hg.initial_num_edges());
            let improvement = lp.refine(&phg);
            (improvement, phg.partition_vector())
        })
    };
    let single = run(1);
    let eight = run(8);
    assert_eq!(single, eight, "partitions must be byte-identical");
}

#[test]
fn sync_lp_never_worsens_and_respects_balance() {
    let edges = torus_edges(10, 10);
    let hg = Hypergraph::from_graph_edges(100, &edges, None, None).unwrap();
    let mut ctx = Context::default();
    ctx.partition.k = 3;
    ctx.partition.epsilon = 0.3;
    ctx.setup_part_weights(hg.total_node_weight());
    let partition = scrambled_partition(100, 3, 13);
    let phg = PartitionedHypergraph::from_partition(&hg, 3, &partition);
    let before = metrics::km1(&phg);

    let mut lp = DeterministicLabelPropagation::new(&ctx, 100, hg.initial_num_edges());
    let improvement = lp.refine(&phg);
    let after = metrics::km1(&phg);
    assert_eq!(before - after, improvement);
    assert!(after <= before);
    assert!(metrics::is_balanced(&phg, &ctx));
}

#[test]
fn coarsening_is_identical_across_thread_counts() {
    let run = |threads: usize| {
        install_with_pool(Some(threads), || {
            let edges = torus_edges(14, 14);
            let mut g = DynamicGraph::from_edge_list(196, &edges, None, None).unwrap();
            let mut ctx = Context::default();
            ctx.partition.seed = 42;
            ctx.coarsening.contraction_limit = 24;
            ctx.coarsening.max_allowed_node_weight = 12;
            let mut coarsener = DeterministicCoarsener::new(&ctx);
            let levels = coarsener.coarsen(&mut g);
            let weights: Vec<_> = (0..196)
                .filter(|&u| g.is_head(u))
                .map(|u| (u, g.node_weight(u), g.node_degree(u)))
                .collect();
            (levels, g.current_num_nodes(), weights)
        })
    };
    assert_eq!(run(1), run(8));
}
