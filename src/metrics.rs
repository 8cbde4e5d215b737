//! Partition quality metrics. O(E·k); intended for pass boundaries, tests
//! and CI, not inner loops.

use crate::context::{Context, Objective};
use crate::graph::partitioned::PartitionView;
use crate::graph::{EdgeId, Gain, PartId};

/// Number of blocks with pins on `e`.
fn connectivity<P: PartitionView>(phg: &P, e: EdgeId) -> u32 {
    (0..phg.k()).filter(|&p| phg.pin_count_in_part(e, p) > 0).count() as u32
}

/// Connectivity objective `Σ_e w(e) · (λ(e) − 1)`.
pub fn km1<P: PartitionView>(phg: &P) -> Gain {
    (0..phg.initial_num_edges())
        .map(|e| phg.edge_weight(e) * (connectivity(phg, e) as Gain - 1))
        .sum()
}

/// Total weight of hyperedges spanning more than one block.
pub fn cut<P: PartitionView>(phg: &P) -> Gain {
    (0..phg.initial_num_edges())
        .filter(|&e| connectivity(phg, e) > 1)
        .map(|e| phg.edge_weight(e))
        .sum()
}

/// The configured objective.
pub fn quality<P: PartitionView>(phg: &P, objective: Objective) -> Gain {
    match objective {
        Objective::Km1 => km1(phg),
        Objective::Cut => cut(phg),
    }
}

/// Worst relative overload against the perfect balance weights.
pub fn imbalance<P: PartitionView>(phg: &P, context: &Context) -> f64 {
    (0..phg.k())
        .map(|p| {
            let perfect = context.partition.perfect_balance_part_weights[p as usize].max(1);
            phg.part_weight(p) as f64 / perfect as f64 - 1.0
        })
        .fold(f64::MIN, f64::max)
}

/// True iff no block exceeds its maximum weight.
pub fn is_balanced<P: PartitionView>(phg: &P, context: &Context) -> bool {
    (0..phg.k() as usize)
        .all(|p| phg.part_weight(p as PartId) <= context.partition.max_part_weights[p])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::hypergraph::Hypergraph;
    use crate::graph::partitioned::PartitionedHypergraph;

    #[test]
    fn km1_and_cut_on_small_instance() {
        let hg = Hypergraph::new(
            4,
            &[vec![0, 1, 2], vec![2, 3], vec![0, 1]],
            Some(&[2, 3, 5]),
            None,
        )
        .unwrap();
        let phg = PartitionedHypergraph::from_partition(&hg, 2, &[0, 0, 1, 1]);
        // e0 spans both blocks (λ=2), e1 is internal to 1, e2 internal to 0
        assert_eq!(km1(&phg), 2);
        assert_eq!(cut(&phg), 2);

        let phg = PartitionedHypergraph::from_partition(&hg, 2, &[0, 1, 0, 1]);
        // e0: λ=2, e1: λ=2, e2: λ=2
        assert_eq!(km1(&phg), 2 + 3 + 5);
        assert_eq!(cut(&phg), 2 + 3 + 5);
    }

    #[test]
    fn balance_checks() {
        let hg = Hypergraph::new(4, &[vec![0, 1]], None, None).unwrap();
        let mut ctx = Context::default();
        ctx.partition.k = 2;
        ctx.setup_part_weights(hg.total_node_weight());
        let phg = PartitionedHypergraph::from_partition(&hg, 2, &[0, 0, 1, 1]);
        assert!(is_balanced(&phg, &ctx));
        assert!(imbalance(&phg, &ctx) <= 0.0);
    }
}
