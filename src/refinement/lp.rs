//! Deterministic synchronous label propagation.
//!
//! Every iteration processes a seeded bucket permutation of the (active)
//! nodes in sub-rounds. A sub-round computes best moves in parallel against
//! the committed state, then applies them in two stages: the balanced
//! swap-prefix selection per block pair, and a gain-sorted second pass with
//! either unbalanced-move reversal or full gain recalculation. A sub-round
//! whose attributed total turns negative is reverted wholesale, which keeps
//! quality monotone; all cross-thread effects are commutative, so the final
//! partition is a function of `(input, seed)` only.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::context::Context;
use crate::graph::partitioned::{PartitionView, PartitionedHypergraph};
use crate::graph::{Gain, Move, NodeId, NodeWeight, PartId};
use crate::parallel::permutation::{ParallelPermutation, NUM_BUCKETS};
use crate::parallel::{chunk_bounds, derive_seed, idiv_ceil};
use crate::refinement::gains::GainPolicy;

/// Marks "no solution" from the prefix search; distinct from the wrapped
/// begin-1 "empty prefix" sentinels.
const NO_SOLUTION: usize = usize::MAX - 1;
const SEQUENTIAL_CUTOFF: usize = 2000;
const INVALID_MOVE_POS: u32 = u32::MAX;

#[derive(Clone, Copy)]
struct RecalcData {
    first_in: u32,
    last_out: u32,
    remaining_pins: u32,
}

impl Default for RecalcData {
    fn default() -> Self {
        RecalcData { first_in: u32::MAX, last_out: 0, remaining_pins: 0 }
    }
}

/// Synchronous label-propagation refiner.
pub struct DeterministicLabelPropagation<'a> {
    context: &'a Context,
    policy: GainPolicy,
    permutation: ParallelPermutation,
    round: u32,
    /// Per-node and (offset by the node count) per-edge activation guards.
    last_moved_in_round: Vec<AtomicU32>,
    active_nodes: Mutex<Vec<NodeId>>,
    last_recalc_round: Vec<AtomicU32>,
    recalc_round: u32,
    move_pos_of_node: Vec<u32>,
    iteration_counter: u64,
}

impl<'a> DeterministicLabelPropagation<'a> {
    pub fn new(context: &'a Context, num_nodes: NodeId, num_edges: u32) -> Self {
        DeterministicLabelPropagation {
            context,
            policy: GainPolicy::from(context.partition.objective),
            permutation: ParallelPermutation::default(),
            round: 0,
            last_moved_in_round: (0..num_nodes as usize + num_edges as usize)
                .map(|_| AtomicU32::new(0))
                .collect(),
            active_nodes: Mutex::new(Vec::new()),
            last_recalc_round: (0..num_edges).map(|_| AtomicU32::new(0)).collect(),
            recalc_round: 0,
            move_pos_of_node: vec![INVALID_MOVE_POS; num_nodes as usize],
            iteration_counter: 0,
        }
    }

    /// Run up to `maximum_iterations` rounds; returns the total improvement.
    pub fn refine(&mut self, phg: &PartitionedHypergraph<'_>) -> Gain {
        let n = phg.initial_num_nodes();
        let mut num_sub_rounds = self.context.refinement.deterministic.num_sub_rounds_sync_lp.max(1);
        let use_active_node_set = self.context.refinement.deterministic.use_active_node_set;
        let mut overall_improvement: Gain = 0;

        for iter in 0..self.context.refinement.label_propagation.maximum_iterations {
            self.round += 1;
            let seed = derive_seed(self.context.partition.seed, "sync-lp", self.iteration_counter);
            self.iteration_counter += 1;

            let active = std::mem::take(&mut *self.active_nodes.lock());
            // an empty active set with earlier positive gains means retry
            // everything under a fresh permutation
            if !use_active_node_set || iter == 0 || active.is_empty() {
                self.permutation.random_grouping(
                    n,
                    self.context.shared_memory.static_balancing_work_packages,
                    seed,
                );
            } else {
                let mut sorted = active;
                sorted.par_sort_unstable();
                self.permutation.sample_buckets_and_group_by(
                    n,
                    &sorted,
                    self.context.shared_memory.static_balancing_work_packages,
                    seed,
                );
            }

            let num_buckets_per_sub_round = idiv_ceil(NUM_BUCKETS, num_sub_rounds);
            let mut num_moves = 0usize;
            let mut round_improvement: Gain = 0;
            let mut increase_sub_rounds = false;
            for sub_round in 0..num_sub_rounds {
                let (first_bucket, last_bucket) =
                    chunk_bounds(sub_round, NUM_BUCKETS, num_buckets_per_sub_round);
                let first = self.permutation.bucket_bounds[first_bucket];
                let last = self.permutation.bucket_bounds[last_bucket];

                let moves: Vec<Move> = (first..last)
                    .into_par_iter()
                    .filter_map(|pos| self.compute_best_move(phg, self.permutation.at(pos)))
                    .collect();

                let moves_in_sub_round = moves.len();
                if moves_in_sub_round == 0 {
                    continue;
                }
                let (prefix_gain, reverted, leftover) =
                    self.apply_moves_by_maximal_prefixes_in_block_pairs(phg, moves);
                increase_sub_rounds |= reverted;
                let mut sub_round_improvement = prefix_gain;
                if sub_round_improvement > 0 && !leftover.is_empty() {
                    sub_round_improvement += if self
                        .context
                        .refinement
                        .deterministic
                        .recalculate_gains_on_second_apply
                        && self.policy == GainPolicy::Km1
                    {
                        self.apply_moves_sorted_by_gain_with_recalculation(phg, leftover)
                    } else {
                        self.apply_moves_sorted_by_gain_and_revert_unbalanced(phg, leftover)
                    };
                }
                round_improvement += sub_round_improvement;
                num_moves += moves_in_sub_round;
            }

            overall_improvement += round_improvement;
            if increase_sub_rounds {
                num_sub_rounds = (num_sub_rounds * 2).min(NUM_BUCKETS);
            }
            if num_moves == 0 {
                break;
            }
        }
        log::debug!("sync LP finished, improvement {overall_improvement}");
        overall_improvement
    }

    fn compute_best_move(&self, phg: &PartitionedHypergraph<'_>, u: NodeId) -> Option<Move> {
        let k = phg.k();
        let from = phg.part_id(u);
        let wu = phg.node_weight(u);
        let fits =
            |to: PartId| phg.part_weight(to) + wu <= self.context.partition.max_part_weights[to as usize];
        if k == 2 {
            let to = 1 - from;
            let gain = self.policy.gain(phg, u, to);
            return (gain > 0 && fits(to)).then_some(Move { node: u, from, to, gain });
        }
        let mut best: Option<Move> = None;
        for to in 0..k {
            if to == from || !fits(to) {
                continue;
            }
            let gain = self.policy.gain(phg, u, to);
            if gain > 0 && best.map_or(true, |b| gain > b.gain) {
                best = Some(Move { node: u, from, to, gain });
            }
        }
        best
    }

    /// Apply one move on the shared partition, returning the attributed gain
    /// and collecting newly touched nodes for the next iteration's active set.
    fn perform_move_with_attributed_gain(
        &self,
        phg: &PartitionedHypergraph<'_>,
        m: &Move,
        activate_neighbors: bool,
    ) -> Gain {
        let policy = self.policy;
        let mut attributed: Gain = 0;
        let moved = phg.change_node_part_shared(m.node, m.from, m.to, i64::MAX, &mut |u| {
            attributed += policy.attributed_gain(&u);
        });
        if moved && activate_neighbors && self.context.refinement.deterministic.use_active_node_set {
            let n = phg.initial_num_nodes() as usize;
            let threshold =
                self.context.refinement.label_propagation.hyperedge_size_activation_threshold;
            for &he in phg.incident_edges(m.node) {
                if phg.edge_size(he) <= threshold {
                    let guard = &self.last_moved_in_round[n + he as usize];
                    if guard.load(Ordering::Relaxed) != self.round {
                        guard.store(self.round, Ordering::Relaxed);
                        for &v in phg.pins(he) {
                            let lrv = self.last_moved_in_round[v as usize].load(Ordering::Relaxed);
                            if lrv != self.round
                                && self.last_moved_in_round[v as usize]
                                    .compare_exchange(
                                        lrv,
                                        self.round,
                                        Ordering::AcqRel,
                                        Ordering::Relaxed,
                                    )
                                    .is_ok()
                            {
                                self.active_nodes.lock().push(v);
                            }
                        }
                    }
                }
            }
        }
        attributed
    }

    fn apply_moves_if<F>(
        &self,
        phg: &PartitionedHypergraph<'_>,
        moves: &[Move],
        end: usize,
        predicate: F,
    ) -> Gain
    where
        F: Fn(usize) -> bool + Sync,
    {
        (0..end)
            .into_par_iter()
            .map(|i| {
                if predicate(i) {
                    self.perform_move_with_attributed_gain(phg, &moves[i], true)
                } else {
                    0
                }
            })
            .sum()
    }

    /// Stage one of a sub-round: group moves by direction, sort each
    /// direction by gain, and commit the balanced prefix pair of every block
    /// pair. Returns the attributed gain, whether everything was reverted,
    /// and the uncommitted moves.
    fn apply_moves_by_maximal_prefixes_in_block_pairs(
        &self,
        phg: &PartitionedHypergraph<'_>,
        moves: Vec<Move>,
    ) -> (Gain, bool, Vec<Move>) {
        let k = phg.k() as usize;
        let max_key = k * k;
        let num_moves = moves.len();
        let index = |p1: PartId, p2: PartId| p1 as usize * k + p2 as usize;

        // stable counting sort by direction
        let mut positions = vec![0usize; max_key + 1];
        for m in &moves {
            positions[index(m.from, m.to) + 1] += 1;
        }
        for i in 0..max_key {
            positions[i + 1] += positions[i];
        }
        let mut cursor = positions.clone();
        let mut sorted_moves = vec![Move { node: 0, from: 0, to: 0, gain: 0 }; num_moves];
        for m in moves {
            let d = index(m.from, m.to);
            sorted_moves[cursor[d]] = m;
            cursor[d] += 1;
        }

        let has_moves = |d: usize| positions[d + 1] != positions[d];
        let mut relevant_block_pairs: Vec<(PartId, PartId)> = Vec::new();
        let mut involvements = vec![0usize; k];
        for p1 in 0..k as PartId {
            for p2 in p1 + 1..k as PartId {
                if has_moves(index(p1, p2)) || has_moves(index(p2, p1)) {
                    relevant_block_pairs.push((p1, p2));
                }
                // only moves into a block reduce its slack
                if has_moves(index(p1, p2)) {
                    involvements[p2 as usize] += 1;
                }
                if has_moves(index(p2, p1)) {
                    involvements[p1 as usize] += 1;
                }
            }
        }

        // per-direction gain sort and node-weight prefix sums
        let mut cumulative_node_weights = vec![0 as NodeWeight; num_moves];
        {
            let mut move_chunks: Vec<(&mut [Move], &mut [NodeWeight])> = Vec::with_capacity(max_key);
            let mut rest_m = sorted_moves.as_mut_slice();
            let mut rest_w = cumulative_node_weights.as_mut_slice();
            for d in 0..max_key {
                let len = positions[d + 1] - positions[d];
                let (m_head, m_tail) = rest_m.split_at_mut(len);
                let (w_head, w_tail) = rest_w.split_at_mut(len);
                move_chunks.push((m_head, w_head));
                rest_m = m_tail;
                rest_w = w_tail;
            }
            move_chunks.into_par_iter().for_each(|(chunk, weights)| {
                chunk.sort_unstable_by(|m1, m2| m2.gain.cmp(&m1.gain).then(m1.node.cmp(&m2.node)));
                let mut sum = 0;
                for (m, w) in chunk.iter().zip(weights.iter_mut()) {
                    sum += phg.node_weight(m.node);
                    *w = sum;
                }
            });
        }

        // swap_prefix[d] is the first position (within the direction range)
        // whose move is NOT committed
        let mut swap_prefix = vec![0usize; max_key];
        let prefix_results: Vec<((PartId, PartId), (usize, usize))> = relevant_block_pairs
            .par_iter()
            .map(|&(p1, p2)| {
                let budget_p1 = self.context.partition.max_part_weights[p1 as usize]
                    - phg.part_weight(p1);
                let budget_p2 = self.context.partition.max_part_weights[p2 as usize]
                    - phg.part_weight(p2);
                let lb_p1 = -(budget_p1 / involvements[p1 as usize].max(1) as NodeWeight);
                let ub_p2 = budget_p2 / involvements[p2 as usize].max(1) as NodeWeight;

                let d12 = index(p1, p2);
                let d21 = index(p2, p1);
                let (p1_begin, p1_end) = (positions[d12], positions[d12 + 1]);
                let (p2_begin, p2_end) = (positions[d21], positions[d21 + 1]);
                let mut best = find_best_prefixes_recursive(
                    &cumulative_node_weights,
                    p1_begin,
                    p1_end,
                    p2_begin,
                    p2_end,
                    p1_begin.wrapping_sub(1),
                    p2_begin.wrapping_sub(1),
                    lb_p1,
                    ub_p2,
                );
                if best.0 == NO_SOLUTION {
                    best = (p1_begin, p2_begin);
                }
                ((p1, p2), best)
            })
            .collect();
        for ((p1, p2), (end1, end2)) in prefix_results {
            swap_prefix[index(p1, p2)] = end1;
            swap_prefix[index(p2, p1)] = end2;
        }

        let committed =
            |pos: usize| pos < swap_prefix[index(sorted_moves[pos].from, sorted_moves[pos].to)];
        let mut actual_gain = self.apply_moves_if(phg, &sorted_moves, num_moves, committed);
        let leftover: Vec<Move> = (0..num_moves)
            .into_par_iter()
            .filter_map(|pos| (!committed(pos)).then(|| sorted_moves[pos]))
            .collect();

        // revert everything if the committed prefixes decreased quality
        let revert_all = actual_gain < 0;
        if revert_all {
            let reversed: Vec<Move> = (0..num_moves)
                .filter(|&pos| committed(pos))
                .map(|pos| {
                    let m = sorted_moves[pos];
                    Move { node: m.node, from: m.to, to: m.from, gain: -m.gain }
                })
                .collect();
            actual_gain += self.apply_moves_if(phg, &reversed, reversed.len(), |_| true);
            debug_assert_eq!(actual_gain, 0);
        }

        (actual_gain, revert_all, leftover)
    }

    /// Stage two, plain variant: apply by descending gain, then walk the
    /// sequence backwards reverting moves until no block is overloaded.
    fn apply_moves_sorted_by_gain_and_revert_unbalanced(
        &self,
        phg: &PartitionedHypergraph<'_>,
        mut moves: Vec<Move>,
    ) -> Gain {
        let k = phg.k() as usize;
        let num_moves = moves.len();
        moves.par_sort_unstable_by(|m1, m2| m2.gain.cmp(&m1.gain).then(m1.node.cmp(&m2.node)));

        let max_part_weights = &self.context.partition.max_part_weights;
        let mut part_weights: Vec<NodeWeight> = moves
            .par_iter()
            .fold(
                || vec![0 as NodeWeight; k],
                |mut acc, m| {
                    acc[m.from as usize] -= phg.node_weight(m.node);
                    acc[m.to as usize] += phg.node_weight(m.node);
                    acc
                },
            )
            .reduce(
                || vec![0 as NodeWeight; k],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    a
                },
            );
        let mut num_overloaded = 0usize;
        for p in 0..k {
            part_weights[p] += phg.part_weight(p as PartId);
            if part_weights[p] > max_part_weights[p] {
                num_overloaded += 1;
            }
        }

        let mut j = num_moves;
        while num_overloaded > 0 && j > 0 {
            j -= 1;
            let m = moves[j];
            if !m.is_valid() {
                continue;
            }
            let w = phg.node_weight(m.node);
            if part_weights[m.to as usize] > max_part_weights[m.to as usize]
                && part_weights[m.from as usize] + w <= max_part_weights[m.from as usize]
            {
                part_weights[m.to as usize] -= w;
                part_weights[m.from as usize] += w;
                if part_weights[m.to as usize] <= max_part_weights[m.to as usize] {
                    num_overloaded -= 1;
                }
                moves[j].invalidate();
            }
        }

        if num_overloaded > 0 {
            // second run may push weight back into blocks that then overload
            let mut j = num_moves;
            let mut last_valid_move = 0usize;
            while num_overloaded > 0 {
                if j == 0 {
                    if last_valid_move == 0 {
                        break;
                    }
                    j = last_valid_move;
                    last_valid_move = 0;
                }
                let m = moves[j - 1];
                if m.is_valid() && part_weights[m.to as usize] > max_part_weights[m.to as usize] {
                    let w = phg.node_weight(m.node);
                    if part_weights[m.from as usize] + w > max_part_weights[m.from as usize]
                        && part_weights[m.from as usize] <= max_part_weights[m.from as usize]
                    {
                        num_overloaded += 1;
                    }
                    part_weights[m.to as usize] -= w;
                    part_weights[m.from as usize] += w;
                    if part_weights[m.to as usize] <= max_part_weights[m.to as usize] {
                        num_overloaded -= 1;
                    }
                    moves[j - 1].invalidate();
                }
                if last_valid_move == 0 && moves[j - 1].is_valid() {
                    last_valid_move = j;
                }
                j -= 1;
            }
        }

        let mut gain = self.apply_moves_if(phg, &moves, num_moves, |i| moves[i].is_valid());
        if gain < 0 {
            let reversed: Vec<Move> = moves
                .iter()
                .filter(|m| m.is_valid())
                .map(|m| Move { node: m.node, from: m.to, to: m.from, gain: -m.gain })
                .collect();
            gain += self.apply_moves_if(phg, &reversed, reversed.len(), |_| true);
            debug_assert_eq!(gain, 0);
        }
        gain
    }

    /// Stage two, recalculation variant (km1): recompute every move's exact
    /// gain under "all moves execute in sorted order", then commit the best
    /// prefix that does not overload additional blocks.
    fn apply_moves_sorted_by_gain_with_recalculation(
        &mut self,
        phg: &PartitionedHypergraph<'_>,
        mut moves: Vec<Move>,
    ) -> Gain {
        if self.recalc_round == u32::MAX - 1 {
            self.last_recalc_round.par_iter().for_each(|x| x.store(0, Ordering::Relaxed));
            self.recalc_round = 0;
        }
        self.recalc_round += 1;
        let recalc_round = self.recalc_round;

        let num_moves = moves.len();
        moves.par_sort_unstable_by(|m1, m2| m2.gain.cmp(&m1.gain).then(m1.node.cmp(&m2.node)));

        for (pos, m) in moves.iter().enumerate() {
            self.move_pos_of_node[m.node as usize] = pos as u32 + 1;
        }
        let move_pos_of_node = &self.move_pos_of_node;
        let recalc_gains: Vec<AtomicI64> = (0..num_moves).map(|_| AtomicI64::new(0)).collect();

        let k = phg.k() as usize;
        moves.par_iter().for_each(|m| {
            for &e in phg.incident_edges(m.node) {
                let expected = self.last_recalc_round[e as usize].load(Ordering::Relaxed);
                if expected < recalc_round
                    && self.last_recalc_round[e as usize]
                        .swap(recalc_round, Ordering::AcqRel)
                        == expected
                {
                    let mut r = vec![RecalcData::default(); k];
                    for &v in phg.pins(e) {
                        let pos = move_pos_of_node[v as usize];
                        if pos != INVALID_MOVE_POS {
                            let mv = &moves[pos as usize - 1];
                            let to = &mut r[mv.to as usize];
                            to.first_in = to.first_in.min(pos);
                            let from = &mut r[mv.from as usize];
                            from.last_out = from.last_out.max(pos);
                        } else {
                            r[phg.part_id(v) as usize].remaining_pins += 1;
                        }
                    }
                    let we = phg.edge_weight(e);
                    for &v in phg.pins(e) {
                        let pos = move_pos_of_node[v as usize];
                        if pos == INVALID_MOVE_POS {
                            continue;
                        }
                        let mv = &moves[pos as usize - 1];
                        let rf = &r[mv.from as usize];
                        let rt = &r[mv.to as usize];
                        let benefit =
                            rf.last_out == pos && rf.first_in > pos && rf.remaining_pins == 0;
                        let penalty =
                            rt.first_in == pos && rt.last_out < pos && rt.remaining_pins == 0;
                        if benefit && !penalty {
                            recalc_gains[pos as usize - 1].fetch_add(we, Ordering::Relaxed);
                        }
                        if !benefit && penalty {
                            recalc_gains[pos as usize - 1].fetch_sub(we, Ordering::Relaxed);
                        }
                    }
                }
            }
        });

        for (pos, m) in moves.iter_mut().enumerate() {
            m.gain = recalc_gains[pos].load(Ordering::Relaxed);
        }
        for m in &moves {
            self.move_pos_of_node[m.node as usize] = INVALID_MOVE_POS;
        }

        // prefix scan over part weights and recomputed gains; committing may
        // not overload blocks beyond the count already overloaded
        let max_part_weights = &self.context.partition.max_part_weights;
        let mut part_weights: Vec<NodeWeight> =
            (0..k).map(|p| phg.part_weight(p as PartId)).collect();
        let num_overloaded_before: usize =
            (0..k).filter(|&p| part_weights[p] > max_part_weights[p]).count();
        let mut num_overloaded = num_overloaded_before;

        let mut best_gain: Gain = 0;
        let mut gain_sum: Gain = 0;
        let mut best_index = 0usize;
        for (pos, m) in moves.iter().enumerate() {
            let w = phg.node_weight(m.node);
            if part_weights[m.from as usize] > max_part_weights[m.from as usize]
                && part_weights[m.from as usize] - w <= max_part_weights[m.from as usize]
            {
                num_overloaded -= 1;
            }
            if part_weights[m.to as usize] <= max_part_weights[m.to as usize]
                && part_weights[m.to as usize] + w > max_part_weights[m.to as usize]
            {
                num_overloaded += 1;
            }
            part_weights[m.from as usize] -= w;
            part_weights[m.to as usize] += w;
            gain_sum += m.gain;
            if num_overloaded <= num_overloaded_before && gain_sum >= best_gain {
                best_index = pos + 1;
                best_gain = gain_sum;
            }
        }

        let attributed = self.apply_moves_if(phg, &moves, best_index, |_| true);
        debug_assert_eq!(attributed, best_gain);
        attributed
    }
}

fn balance(cumulative: &[NodeWeight], i: usize, invalid: usize) -> NodeWeight {
    if i == invalid {
        0
    } else {
        cumulative[i]
    }
}

/// Find prefix ends `(a, b)` of the two move sequences maximizing `a + b`
/// under the balance corridor `[lb, ub]`. Divide and conquer on the longer
/// side; the midpoint's matching prefix on the other side decides which half
/// can be pruned.
#[allow(clippy::too_many_arguments)]
fn find_best_prefixes_recursive(
    cumulative: &[NodeWeight],
    p1_begin: usize,
    p1_end: usize,
    p2_begin: usize,
    p2_end: usize,
    p1_invalid: usize,
    p2_invalid: usize,
    lb_p1: NodeWeight,
    ub_p2: NodeWeight,
) -> (usize, usize) {
    let n1 = p1_end - p1_begin;
    let n2 = p2_end - p2_begin;
    if n1 < SEQUENTIAL_CUTOFF && n2 < SEQUENTIAL_CUTOFF {
        return find_best_prefixes_sequentially(
            cumulative, p1_begin, p1_end, p2_begin, p2_end, p1_invalid, p2_invalid, lb_p1, ub_p2,
        );
    }

    let is_feasible = |i1: usize, i2: usize| {
        let bal = balance(cumulative, i1, p1_invalid) - balance(cumulative, i2, p2_invalid);
        lb_p1 <= bal && bal <= ub_p2
    };

    if n1 > n2 {
        let p1_mid = p1_begin + n1 / 2;
        let target = cumulative[p1_mid];
        let p2_match =
            p2_begin + cumulative[p2_begin..p2_end].partition_point(|&x| x < target);
        if p2_match != p2_end && p1_mid != p1_end && is_feasible(p1_mid, p2_match) {
            return find_best_prefixes_recursive(
                cumulative, p1_mid + 1, p1_end, p2_match + 1, p2_end, p1_invalid, p2_invalid,
                lb_p1, ub_p2,
            );
        }
        if p2_match == p2_end
            && balance(cumulative, p1_mid, p1_invalid)
                - balance(cumulative, p2_end.wrapping_sub(1), p2_invalid)
                > ub_p2
        {
            return find_best_prefixes_recursive(
                cumulative, p1_begin, p1_mid, p2_begin, p2_match, p1_invalid, p2_invalid, lb_p1,
                ub_p2,
            );
        }
        let (left, right) = rayon::join(
            || {
                find_best_prefixes_recursive(
                    cumulative, p1_begin, p1_mid, p2_begin, p2_match, p1_invalid, p2_invalid,
                    lb_p1, ub_p2,
                )
            },
            || {
                find_best_prefixes_recursive(
                    cumulative, p1_mid, p1_end, p2_match, p2_end, p1_invalid, p2_invalid, lb_p1,
                    ub_p2,
                )
            },
        );
        if right.0 != NO_SOLUTION {
            right
        } else {
            left
        }
    } else {
        let p2_mid = p2_begin + n2 / 2;
        let target = cumulative[p2_mid];
        let p1_match =
            p1_begin + cumulative[p1_begin..p1_end].partition_point(|&x| x < target);
        if p1_match != p1_end && p2_mid != p2_end && is_feasible(p1_match, p2_mid) {
            return find_best_prefixes_recursive(
                cumulative, p1_match + 1, p1_end, p2_mid + 1, p2_end, p1_invalid, p2_invalid,
                lb_p1, ub_p2,
            );
        }
        if p1_match == p1_end
            && balance(cumulative, p1_end.wrapping_sub(1), p1_invalid)
                - balance(cumulative, p2_mid, p2_invalid)
                < lb_p1
        {
            return find_best_prefixes_recursive(
                cumulative, p1_begin, p1_match, p2_begin, p2_mid, p1_invalid, p2_invalid, lb_p1,
                ub_p2,
            );
        }
        let (left, right) = rayon::join(
            || {
                find_best_prefixes_recursive(
                    cumulative, p1_begin, p1_match, p2_begin, p2_mid, p1_invalid, p2_invalid,
                    lb_p1, ub_p2,
                )
            },
            || {
                find_best_prefixes_recursive(
                    cumulative, p1_match, p1_end, p2_mid, p2_end, p1_invalid, p2_invalid, lb_p1,
                    ub_p2,
                )
            },
        );
        if right.0 != NO_SOLUTION {
            right
        } else {
            left
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn find_best_prefixes_sequentially(
    cumulative: &[NodeWeight],
    p1_begin: usize,
    mut p1_end: usize,
    p2_begin: usize,
    mut p2_end: usize,
    p1_invalid: usize,
    p2_invalid: usize,
    lb_p1: NodeWeight,
    ub_p2: NodeWeight,
) -> (usize, usize) {
    loop {
        let bal = balance(cumulative, p1_end.wrapping_sub(1), p1_invalid)
            - balance(cumulative, p2_end.wrapping_sub(1), p2_invalid);
        if lb_p1 <= bal && bal <= ub_p2 {
            return (p1_end, p2_end);
        }
        if bal < 0 {
            if p2_end == p2_begin {
                break;
            }
            p2_end -= 1;
        } else {
            if p1_end == p1_begin {
                break;
            }
            p1_end -= 1;
        }
    }
    (NO_SOLUTION, NO_SOLUTION)
}
