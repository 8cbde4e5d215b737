//! Localized FM never worsens the partition (spec scenario: improvement or
//! no-op).

use hedgecut::context::Context;
use hedgecut::graph::hypergraph::Hypergraph;
use hedgecut::graph::partitioned::PartitionedHypergraph;
use hedgecut::graph::{NodeId, PartId};
use hedgecut::metrics;
use hedgecut::parallel::splitmix64;
use hedgecut::refinement::fm::shared::FmSharedData;
use hedgecut::refinement::fm::{multitry_fm_round, LocalizedKWayFm};
use hedgecut::refinement::gains::GainPolicy;

fn community_hypergraph(groups: u32, group_size: u32) -> Hypergraph {
    let n = groups * group_size;
    let mut nets: Vec<Vec<NodeId>> = Vec::new();
    for g in 0..groups {
        let base = g * group_size;
        // dense triads inside the group
        for i in 0..group_size {
            nets.push(vec![base + i, base + (i + 1) % group_size, base + (i + 2) % group_size]);
        }
        // one sparse bridge to the next group
        nets.push(vec![base, (base + group_size) % n]);
    }
    Hypergraph::new(n, &nets, None, None).unwrap()
}

fn scrambled(n: u32, k: PartId, seed: u64) -> Vec<PartId> {
    (0..n).map(|v| (splitmix64(seed ^ v as u64) % k as u64) as PartId).collect()
}

#[test]
fn single_localized_call_is_non_worsening() {
    let hg = community_hypergraph(4, 8);
    let mut ctx = Context::default();
    ctx.partition.k = 4;
    ctx.partition.epsilon = 0.5;
    ctx.setup_part_weights(hg.total_node_weight());

    for seed in 0..10u64 {
        let partition = scrambled(32, 4, seed);
        let phg = PartitionedHypergraph::from_partition(&hg, 4, &partition);
        let before = metrics::km1(&phg);

        let mut shared = FmSharedData::new(32, 1);
        for v in 0..32 {
            shared.refinement_nodes.push(v, 0);
        }
        let mut fm = LocalizedKWayFm::new(&ctx, GainPolicy::Km1, 4, 32);
        let improvement = fm.find_moves(&phg, &shared, 0).unwrap();

        let after = metrics::km1(&phg);
        assert_eq!(before - after, improvement);
        assert!(after <= before, "seed {seed}: quality got worse");
    }
}

#[test]
fn repeated_rounds_converge_to_community_structure() {
    let hg = community_hypergraph(2, 8);
    let mut ctx = Context::default();
    ctx.partition.k = 2;
    ctx.partition.epsilon = 0.2;
    ctx.refinement.fm.num_seed_nodes = 4;
    ctx.setup_part_weights(hg.total_node_weight());

    let partition = scrambled(16, 2, 3);
    let phg = PartitionedHypergraph::from_partition(&hg, 2, &partition);
    let mut shared = FmSharedData::new(16, 2);
    let nodes: Vec<NodeId> = (0..16).collect();

    let mut quality = metrics::km1(&phg);
    for _ in 0..4 {
        let improvement = multitry_fm_round(&ctx, GainPolicy::Km1, &phg, &mut shared, &nodes);
        let next = metrics::km1(&phg);
        assert_eq!(quality - next, improvement);
        assert!(next <= quality);
        quality = next;
    }
    assert!(metrics::is_balanced(&phg, &ctx));
}

#[test]
fn cut_objective_is_supported() {
    let hg = community_hypergraph(2, 6);
    let mut ctx = Context::default();
    ctx.partition.k = 2;
    ctx.partition.epsilon = 0.5;
    ctx.partition.objective = hedgecut::context::Objective::Cut;
    ctx.setup_part_weights(hg.total_node_weight());

    let partition = scrambled(12, 2, 5);
    let phg = PartitionedHypergraph::from_partition(&hg, 2, &partition);
    let before = metrics::cut(&phg);
    let mut shared = FmSharedData::new(12, 1);
    for v in 0..12 {
        shared.refinement_nodes.push(v, 0);
    }
    let mut fm = LocalizedKWayFm::new(&ctx, GainPolicy::Cut, 2, 12);
    let improvement = fm.find_moves(&phg, &shared, 0).unwrap();
    let after = metrics::cut(&phg);
    assert_eq!(before - after, improvement);
    assert!(after <= before);
}
