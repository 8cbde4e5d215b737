//! Localized k-way FM refinement.
//!
//! Each search claims a handful of seed nodes from the shared refinement
//! queue, grows a region through per-block priority queues, and stages its
//! moves on a delta overlay. Only the best prefix of the move sequence is
//! applied to the shared partition, with gains re-derived from live pin
//! counts and a second rollback if the attributed total turns negative.

pub mod heap;
pub mod shared;
pub mod stop_rule;

use std::sync::atomic::{AtomicI64, Ordering};

use hashbrown::{HashMap, HashSet};

use crate::context::Context;
use crate::graph::delta::DeltaPartitionedHypergraph;
use crate::graph::partitioned::{PartitionView, PartitionedHypergraph, SharedView, SyncUpdate};
use crate::graph::{EdgeId, Gain, Move, NodeId, PartId, INVALID_PART};
use crate::parallel::derive_seed;
use crate::refinement::gains::GainPolicy;
use crate::refinement::SearchId;

use heap::AddressableMaxHeap;
use shared::FmSharedData;
use stop_rule::StopRule;

/// One worker's localized FM search state, reused across searches.
pub struct LocalizedKWayFm<'a> {
    context: &'a Context,
    policy: GainPolicy,
    k: PartId,
    this_search: SearchId,
    /// Keyed by the best vertex gain available in each block.
    block_pq: AddressableMaxHeap,
    /// One PQ per block holding the touched vertices of that block.
    vertex_pqs: Vec<AddressableMaxHeap>,
    update_deduplicator: HashSet<NodeId>,
    /// An edge is valid while the gains of its pins are as recorded in the
    /// PQs; pin-count threshold crossings invalidate it.
    valid_hyperedges: HashMap<EdgeId, bool>,
    seeds: Vec<NodeId>,
    local_moves: Vec<Move>,
}

impl<'a> LocalizedKWayFm<'a> {
    pub fn new(context: &'a Context, policy: GainPolicy, k: PartId, num_nodes: NodeId) -> Self {
        LocalizedKWayFm {
            context,
            policy,
            k,
            this_search: 0,
            block_pq: AddressableMaxHeap::new(k as usize),
            vertex_pqs: (0..k).map(|_| AddressableMaxHeap::new(num_nodes as usize)).collect(),
            update_deduplicator: HashSet::new(),
            valid_hyperedges: HashMap::new(),
            seeds: Vec::new(),
            local_moves: Vec::new(),
        }
    }

    /// Run one localized search seeded from the shared queue. Returns `None`
    /// when no seed could be claimed, otherwise the applied improvement.
    pub fn find_moves(
        &mut self,
        phg: &PartitionedHypergraph<'_>,
        shared: &FmSharedData,
        task_id: usize,
    ) -> Option<Gain> {
        self.seeds.clear();
        self.local_moves.clear();
        self.valid_hyperedges.clear();
        self.update_deduplicator.clear();
        self.this_search = shared.node_tracker.new_search();

        let num_seeds = self.context.refinement.fm.num_seed_nodes.max(1);
        let mut d = DeltaPartitionedHypergraph::new(phg);
        while self.seeds.len() < num_seeds {
            let Some(seed) = shared.refinement_nodes.try_pop(task_id) else {
                break;
            };
            if !self.update_deduplicator.contains(&seed) && self.insert_or_update_pq(&d, seed, shared)
            {
                self.seeds.push(seed);
            }
        }
        self.update_deduplicator.clear();
        for i in 0..self.k {
            self.update_block(i);
        }
        if self.seeds.is_empty() {
            return None;
        }

        let (improvement, best_index) = if self.context.refinement.fm.perform_moves_global {
            drop(d);
            let mut view = SharedView(phg);
            let (best, best_index) = self.run_search(&mut view, shared);
            // moves were live; cut back to the best prefix
            for i in (best_index..self.local_moves.len()).rev() {
                let m = self.local_moves[i];
                phg.change_node_part_shared(m.node, m.to, m.from, i64::MAX, &mut |_| {});
            }
            (best, best_index)
        } else {
            let (_, best_index) = self.run_search(&mut d, shared);
            (self.apply_moves_on_global(phg, best_index), best_index)
        };
        self.clear_pqs(shared, best_index, task_id);
        Some(improvement)
    }

    /// Grow the region and record moves on the overlay until the stop rule
    /// fires or the queues drain. Returns the best estimated improvement and
    /// the move-prefix length achieving it.
    fn run_search<D: PartitionView>(&mut self, d: &mut D, shared: &FmSharedData) -> (Gain, usize) {
        let mut stop_rule = StopRule::new(d.initial_num_nodes());
        let allow_zero = self.context.refinement.fm.allow_zero_gain_moves;
        let mut best_improvement: Gain = 0;
        let mut best_index = 0usize;
        let mut estimated: Gain = 0;

        while !stop_rule.search_should_stop() {
            let Some(m) = self.find_next_move(d) else { break };
            shared.node_tracker.deactivate(m.node, self.this_search);

            let mut moved = false;
            let mut heaviest = 0;
            let mut to_weight = 0;
            let mut invalidated: Vec<EdgeId> = Vec::new();
            if m.to != INVALID_PART {
                heaviest = (0..self.k).map(|p| d.part_weight(p)).max().unwrap_or(0);
                let from_weight = d.part_weight(m.from);
                to_weight = d.part_weight(m.to);
                let cap = self.context.partition.max_part_weights[m.to as usize].max(from_weight);
                moved = d.change_node_part(m.node, m.from, m.to, cap, &mut |u: SyncUpdate| {
                    let pf = u.pin_count_in_from_part_after;
                    let pt = u.pin_count_in_to_part_after;
                    if pf == 0 || pf == 1 || pt == 1 || pt == 2 {
                        invalidated.push(u.he);
                    }
                });
            }

            if moved {
                for he in invalidated {
                    self.valid_hyperedges.insert(he, false);
                }
                estimated += m.gain;
                self.local_moves.push(m);
                stop_rule.update(m.gain);

                let improved = if allow_zero {
                    estimated >= best_improvement
                } else {
                    estimated > best_improvement
                        || (estimated >= best_improvement
                            && to_weight + d.node_weight(m.node) < heaviest)
                };
                if improved {
                    stop_rule.reset();
                    best_improvement = estimated;
                    best_index = self.local_moves.len();
                }
                self.insert_or_update_neighbors(d, shared, m.node);
            }
            self.update_blocks(d, m.from);
        }
        (best_improvement, best_index)
    }

    /// Pop the overall best move candidate, re-validating its gain against
    /// the current state; stale entries are re-keyed and retried.
    fn find_next_move<D: PartitionView>(&mut self, d: &D) -> Option<Move> {
        loop {
            let (from, _) = self.block_pq.top()?;
            let (u, estimated_gain) = self.vertex_pqs[from as usize].top()?;
            let (to, gain) = self.best_destination_block(d, u);
            if gain >= estimated_gain {
                self.vertex_pqs[from as usize].delete_top();
                return Some(Move { node: u, from, to, gain });
            }
            self.vertex_pqs[from as usize].adjust_key(u, gain);
            let new_top = self.vertex_pqs[from as usize].top_key();
            if new_top != self.block_pq.key_of(from) {
                self.block_pq.adjust_key(from, new_top);
            }
        }
    }

    /// Highest-gain target block that either accepts `u`'s weight or is
    /// lighter than the current best candidate; ties prefer lighter blocks.
    fn best_destination_block<D: PartitionView>(&self, d: &D, u: NodeId) -> (PartId, Gain) {
        let from = d.part_id(u);
        let wu = d.node_weight(u);
        let from_weight = d.part_weight(from);
        let mut to = INVALID_PART;
        let mut best_gain = Gain::MIN;
        let mut best_to_weight = from_weight - wu;
        for i in 0..self.k {
            if i == from {
                continue;
            }
            let to_weight = d.part_weight(i);
            let gain = self.policy.gain(d, u, i);
            if (gain > best_gain || (gain == best_gain && to_weight < best_to_weight))
                && (to_weight + wu <= self.context.partition.max_part_weights[i as usize]
                    || to_weight < best_to_weight)
            {
                to = i;
                best_gain = gain;
                best_to_weight = to_weight;
            }
        }
        (to, if to == INVALID_PART { Gain::MIN } else { best_gain })
    }

    fn insert_or_update_pq<D: PartitionView>(
        &mut self,
        d: &D,
        v: NodeId,
        shared: &FmSharedData,
    ) -> bool {
        let s = shared.node_tracker.search_of(v);
        if shared.node_tracker.is_search_inactive(s) {
            if shared.node_tracker.try_acquire(v, self.this_search) {
                let pv = d.part_id(v);
                let (_, gain) = self.best_destination_block(d, v);
                self.vertex_pqs[pv as usize].insert(v, gain);
                return true;
            }
            false
        } else if s == self.this_search {
            let pv = d.part_id(v);
            debug_assert!(self.vertex_pqs[pv as usize].contains(v));
            let (_, gain) = self.best_destination_block(d, v);
            self.vertex_pqs[pv as usize].adjust_key(v, gain);
            true
        } else {
            false
        }
    }

    /// Revisit the pins of invalidated small edges around a moved node.
    fn insert_or_update_neighbors<D: PartitionView>(
        &mut self,
        d: &D,
        shared: &FmSharedData,
        u: NodeId,
    ) {
        let threshold = self.context.refinement.label_propagation.hyperedge_size_activation_threshold;
        for i in 0..d.incident_edges(u).len() {
            let e = d.incident_edges(u)[i];
            if d.edge_size(e) < threshold && !self.valid_hyperedges.get(&e).copied().unwrap_or(false)
            {
                for j in 0..d.pins(e).len() {
                    let v = d.pins(e)[j];
                    if self.update_deduplicator.insert(v) {
                        self.insert_or_update_pq(d, v, shared);
                    }
                }
                self.valid_hyperedges.insert(e, true);
            }
        }
    }

    fn update_block(&mut self, i: PartId) {
        if !self.vertex_pqs[i as usize].is_empty() {
            let key = self.vertex_pqs[i as usize].top_key();
            self.block_pq.insert_or_adjust(i, key);
        } else if self.block_pq.contains(i) {
            self.block_pq.remove(i);
        }
    }

    fn update_blocks<D: PartitionView>(&mut self, d: &D, moved_from: PartId) {
        if moved_from == INVALID_PART || self.update_deduplicator.len() >= self.k as usize {
            for i in 0..self.k {
                self.update_block(i);
            }
        } else {
            self.update_block(moved_from);
            let parts: Vec<PartId> =
                self.update_deduplicator.iter().map(|&v| d.part_id(v)).collect();
            for p in parts {
                self.update_block(p);
            }
        }
        self.update_deduplicator.clear();
    }

    /// Replay the chosen prefix on the shared partition, re-deriving gains
    /// from live pin counts; if the attributed total went negative, roll
    /// back to the best actually-observed prefix.
    fn apply_moves_on_global(&mut self, phg: &PartitionedHypergraph<'_>, best_index: usize) -> Gain {
        let policy = self.policy;
        let mut attributed: Gain = 0;
        let mut best: Gain = 0;
        let mut best_idx = 0usize;
        for i in 0..best_index {
            let m = self.local_moves[i];
            let mut last_gain = 0;
            phg.change_node_part_shared(m.node, m.from, m.to, i64::MAX, &mut |u| {
                last_gain += policy.attributed_gain(&u);
            });
            self.local_moves[i].gain = last_gain;
            attributed += last_gain;
            if attributed >= best {
                best = attributed;
                best_idx = i + 1;
            }
        }
        if attributed < 0 {
            for i in (best_idx..best_index).rev() {
                let m = self.local_moves[i];
                phg.change_node_part_shared(m.node, m.to, m.from, i64::MAX, &mut |u| {
                    attributed += policy.attributed_gain(&u);
                });
            }
            attributed
        } else {
            attributed
        }
    }

    /// Release unmoved nodes back to the tracker; seeds of a search that
    /// went nowhere are marked fruitless, everything else that completed a
    /// queue cycle is rescheduled.
    fn clear_pqs(&mut self, shared: &FmSharedData, best_index: usize, task_id: usize) {
        let made_moves = !self.local_moves.is_empty();
        if made_moves && best_index == 0 {
            for &u in &self.seeds {
                shared.mark_fruitless_seed(u);
            }
        }
        for i in 0..self.k as usize {
            for j in 0..self.vertex_pqs[i].len() {
                let node = self.vertex_pqs[i].at(j);
                shared.node_tracker.release(node);
                if made_moves
                    && !shared.is_fruitless_seed(node)
                    && shared.refinement_nodes.was_pushed_and_removed(node)
                {
                    shared.refinement_nodes.push(node, task_id);
                }
            }
            self.vertex_pqs[i].clear();
        }
        self.block_pq.clear();
    }
}

/// One multi-try FM round: seed the shared queue with `nodes`, run localized
/// searches on every worker until the queue is exhausted, and return the
/// total applied improvement.
pub fn multitry_fm_round(
    context: &Context,
    policy: GainPolicy,
    phg: &PartitionedHypergraph<'_>,
    shared: &mut FmSharedData,
    nodes: &[NodeId],
) -> Gain {
    shared.reset_round();
    let tasks = shared.refinement_nodes.num_tasks();
    for (i, &v) in nodes.iter().enumerate() {
        // single-threaded seeding may fill any queue
        shared.refinement_nodes.push(v, i % tasks);
    }
    shared
        .refinement_nodes
        .shuffle(derive_seed(context.partition.seed, "fm-seed-order", 0));

    let total = AtomicI64::new(0);
    let shared_ref: &FmSharedData = shared;
    rayon::scope(|s| {
        for task_id in 0..tasks {
            let total = &total;
            s.spawn(move |_| {
                let mut fm =
                    LocalizedKWayFm::new(context, policy, phg.k(), phg.initial_num_nodes());
                while let Some(improvement) = fm.find_moves(phg, shared_ref, task_id) {
                    total.fetch_add(improvement, Ordering::Relaxed);
                }
            });
        }
    });
    total.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::hypergraph::Hypergraph;
    use crate::metrics;

    fn context_for(k: PartId, total_weight: i64) -> Context {
        let mut ctx = Context::default();
        ctx.partition.k = k;
        ctx.partition.epsilon = 0.5;
        ctx.setup_part_weights(total_weight);
        ctx
    }

    #[test]
    fn localized_search_fixes_obvious_misplacement() {
        // node 4 is tied to block 0 by two edges; start it in block 1
        let hg = Hypergraph::new(
            6,
            &[vec![0, 1, 4], vec![0, 4], vec![2, 3, 5], vec![2, 5]],
            None,
            None,
        )
        .unwrap();
        let ctx = context_for(2, hg.total_node_weight());
        let phg = PartitionedHypergraph::from_partition(&hg, 2, &[0, 0, 1, 1, 1, 1]);
        let before = metrics::km1(&phg);

        let mut shared = FmSharedData::new(6, 1);
        shared.refinement_nodes.push(4, 0);
        let mut fm = LocalizedKWayFm::new(&ctx, GainPolicy::Km1, 2, 6);
        let improvement = fm.find_moves(&phg, &shared, 0).unwrap();

        let after = metrics::km1(&phg);
        assert_eq!(improvement, before - after);
        assert_eq!(phg.part_id(4), 0);
        assert!(improvement > 0);
    }

    #[test]
    fn search_without_claimable_seeds_reports_none() {
        let hg = Hypergraph::new(2, &[vec![0, 1]], None, None).unwrap();
        let ctx = context_for(2, 2);
        let phg = PartitionedHypergraph::from_partition(&hg, 2, &[0, 1]);
        let shared = FmSharedData::new(2, 1);
        let mut fm = LocalizedKWayFm::new(&ctx, GainPolicy::Km1, 2, 2);
        assert!(fm.find_moves(&phg, &shared, 0).is_none());
    }

    #[test]
    fn multitry_round_never_worsens_quality() {
        let hg = Hypergraph::new(
            8,
            &[
                vec![0, 1, 2],
                vec![1, 2, 3],
                vec![4, 5, 6],
                vec![5, 6, 7],
                vec![3, 4],
                vec![0, 7],
            ],
            None,
            None,
        )
        .unwrap();
        let mut ctx = context_for(2, hg.total_node_weight());
        ctx.refinement.fm.num_seed_nodes = 2;
        // deliberately scrambled partition
        let phg = PartitionedHypergraph::from_partition(&hg, 2, &[0, 1, 0, 1, 0, 1, 0, 1]);
        let before = metrics::km1(&phg);
        let mut shared = FmSharedData::new(8, 2);
        let nodes: Vec<NodeId> = (0..8).collect();
        let improvement = multitry_fm_round(&ctx, GainPolicy::Km1, &phg, &mut shared, &nodes);
        let after = metrics::km1(&phg);
        assert_eq!(before - after, improvement);
        assert!(after <= before);
        assert!(metrics::is_balanced(&phg, &ctx));
    }
}
