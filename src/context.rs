//! Frozen configuration record threaded through the partitioning core.
//!
//! Mirrors the option set the components recognize; presets and CLI parsing
//! live host-side. A `Context` is built once, optionally completed with
//! [`Context::setup_part_weights`], and passed by reference.

use crate::graph::{NodeId, NodeWeight, PartId};

/// Objective minimized by refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Objective {
    /// `Σ_e w(e) · (λ(e) − 1)` with λ the number of blocks touched by e.
    #[default]
    Km1,
    /// Total weight of hyperedges spanning more than one block.
    Cut,
}

#[derive(Debug, Clone)]
pub struct PartitionParams {
    pub k: PartId,
    pub epsilon: f64,
    pub objective: Objective,
    pub seed: u64,
    pub max_part_weights: Vec<NodeWeight>,
    pub perfect_balance_part_weights: Vec<NodeWeight>,
}

#[derive(Debug, Clone)]
pub struct CoarseningParams {
    pub contraction_limit: NodeId,
    pub maximum_shrink_factor: f64,
    pub num_sub_rounds_deterministic: usize,
    /// 0 derives the cap from total weight and the contraction limit.
    pub max_allowed_node_weight: NodeWeight,
}

#[derive(Debug, Clone)]
pub struct LabelPropagationParams {
    pub maximum_iterations: usize,
    pub hyperedge_size_activation_threshold: usize,
}

#[derive(Debug, Clone)]
pub struct DeterministicRefinementParams {
    pub use_active_node_set: bool,
    pub recalculate_gains_on_second_apply: bool,
    pub num_sub_rounds_sync_lp: usize,
}

#[derive(Debug, Clone)]
pub struct FmParams {
    pub num_seed_nodes: usize,
    pub perform_moves_global: bool,
    pub allow_zero_gain_moves: bool,
}

#[derive(Debug, Clone)]
pub struct AdvancedParams {
    pub num_threads_per_search: usize,
    pub min_relative_improvement_per_round: f64,
}

#[derive(Debug, Clone)]
pub struct RefinementParams {
    pub label_propagation: LabelPropagationParams,
    pub deterministic: DeterministicRefinementParams,
    pub fm: FmParams,
    pub advanced: AdvancedParams,
}

#[derive(Debug, Clone)]
pub struct SharedMemoryParams {
    pub num_threads: usize,
    pub static_balancing_work_packages: usize,
}

#[derive(Debug, Clone)]
pub struct Context {
    pub partition: PartitionParams,
    pub coarsening: CoarseningParams,
    pub refinement: RefinementParams,
    pub shared_memory: SharedMemoryParams,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            partition: PartitionParams {
                k: 2,
                epsilon: 0.03,
                objective: Objective::Km1,
                seed: 42,
                max_part_weights: Vec::new(),
                perfect_balance_part_weights: Vec::new(),
            },
            coarsening: CoarseningParams {
                contraction_limit: 160,
                maximum_shrink_factor: 2.5,
                num_sub_rounds_deterministic: 3,
                max_allowed_node_weight: 0,
            },
            refinement: RefinementParams {
                label_propagation: LabelPropagationParams {
                    maximum_iterations: 5,
                    hyperedge_size_activation_threshold: 100,
                },
                deterministic: DeterministicRefinementParams {
                    use_active_node_set: true,
                    recalculate_gains_on_second_apply: true,
                    num_sub_rounds_sync_lp: 2,
                },
                fm: FmParams {
                    num_seed_nodes: 25,
                    perform_moves_global: false,
                    allow_zero_gain_moves: false,
                },
                advanced: AdvancedParams {
                    num_threads_per_search: 1,
                    min_relative_improvement_per_round: 0.001,
                },
            },
            shared_memory: SharedMemoryParams {
                num_threads: 1,
                static_balancing_work_packages: 128,
            },
        }
    }
}

impl Context {
    /// Derive per-block weight bounds from the total node weight: perfect
    /// balance is `ceil(total / k)`, the maximum adds the imbalance factor
    /// `epsilon`.
    pub fn setup_part_weights(&mut self, total_node_weight: NodeWeight) {
        let k = self.partition.k as i64;
        let perfect = (total_node_weight + k - 1) / k;
        let max = ((1.0 + self.partition.epsilon) * perfect as f64).floor() as NodeWeight;
        self.partition.perfect_balance_part_weights = vec![perfect; k as usize];
        self.partition.max_part_weights = vec![max; k as usize];
    }

    /// Weight cap for coarsening clusters.
    pub fn max_cluster_weight(&self, total_node_weight: NodeWeight) -> NodeWeight {
        if self.coarsening.max_allowed_node_weight > 0 {
            self.coarsening.max_allowed_node_weight
        } else {
            (total_node_weight as f64
                / (self.coarsening.contraction_limit.max(1) as f64))
                .ceil() as NodeWeight
                * 2
        }
    }
}
