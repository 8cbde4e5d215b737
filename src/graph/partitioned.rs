//! Partitioned hypergraph: block assignment, per-block pin counts, and the
//! [`PartitionView`] trait that refiners are generic over.
//!
//! Pin counts and part weights are atomic so concurrent refinement moves
//! compose; the *sum* of attributed gains over a move set is independent of
//! interleaving even though individual attributions may differ.

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use crate::graph::hypergraph::Hypergraph;
use crate::graph::{EdgeId, EdgeWeight, NodeId, NodeWeight, PartId, INVALID_PART};

/// Pin-count transition of one hyperedge during a move, handed to gain and
/// bookkeeping callbacks synchronously with the count updates.
#[derive(Debug, Clone, Copy)]
pub struct SyncUpdate {
    pub he: EdgeId,
    pub edge_weight: EdgeWeight,
    pub edge_size: usize,
    pub pin_count_in_from_part_after: u32,
    pub pin_count_in_to_part_after: u32,
}

/// Read/move capabilities the refiners require from a partition state,
/// implemented by both the shared partitioned hypergraph and the FM delta
/// overlay.
pub trait PartitionView {
    fn k(&self) -> PartId;
    fn part_id(&self, v: NodeId) -> PartId;
    fn part_weight(&self, p: PartId) -> NodeWeight;
    fn node_weight(&self, v: NodeId) -> NodeWeight;
    fn edge_weight(&self, e: EdgeId) -> EdgeWeight;
    fn edge_size(&self, e: EdgeId) -> usize;
    fn pin_count_in_part(&self, e: EdgeId, p: PartId) -> u32;
    fn incident_edges(&self, v: NodeId) -> &[EdgeId];
    fn pins(&self, e: EdgeId) -> &[NodeId];
    fn initial_num_nodes(&self) -> NodeId;
    fn initial_num_edges(&self) -> EdgeId;

    /// Move `v` from `from` to `to` unless that would push `to` beyond
    /// `max_weight_to`. On success, invokes `delta` once per incident edge
    /// with the synchronized pin-count transition.
    fn change_node_part(
        &mut self,
        v: NodeId,
        from: PartId,
        to: PartId,
        max_weight_to: NodeWeight,
        delta: &mut dyn FnMut(SyncUpdate),
    ) -> bool;
}

/// Concrete shared-memory partitioned hypergraph.
pub struct PartitionedHypergraph<'a> {
    hg: &'a Hypergraph,
    k: PartId,
    part_ids: Vec<AtomicU32>,
    part_weights: Vec<AtomicI64>,
    /// `k` counters per hyperedge, row-major.
    pin_counts: Vec<AtomicU32>,
}

impl<'a> PartitionedHypergraph<'a> {
    pub fn new(hg: &'a Hypergraph, k: PartId) -> Self {
        let e = hg.initial_num_edges() as usize;
        PartitionedHypergraph {
            hg,
            k,
            part_ids: (0..hg.initial_num_nodes()).map(|_| AtomicU32::new(INVALID_PART)).collect(),
            part_weights: (0..k).map(|_| AtomicI64::new(0)).collect(),
            pin_counts: (0..e * k as usize).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn hypergraph(&self) -> &'a Hypergraph {
        self.hg
    }

    /// Assign the initial block of `v` and update weights and pin counts.
    pub fn set_node_part(&self, v: NodeId, p: PartId) {
        debug_assert_eq!(self.part_ids[v as usize].load(Ordering::Relaxed), INVALID_PART);
        self.part_ids[v as usize].store(p, Ordering::Relaxed);
        self.part_weights[p as usize].fetch_add(self.hg.node_weight(v), Ordering::Relaxed);
        for &e in self.hg.incident_edges(v) {
            self.pin_counts[e as usize * self.k as usize + p as usize]
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Build a partitioned hypergraph from a complete assignment vector.
    pub fn from_partition(hg: &'a Hypergraph, k: PartId, partition: &[PartId]) -> Self {
        let phg = Self::new(hg, k);
        for (v, &p) in partition.iter().enumerate() {
            phg.set_node_part(v as NodeId, p);
        }
        phg
    }

    /// Snapshot of the current block of every node.
    pub fn partition_vector(&self) -> Vec<PartId> {
        self.part_ids.iter().map(|p| p.load(Ordering::Relaxed)).collect()
    }

    /// Number of blocks with pins on `e`.
    pub fn connectivity(&self, e: EdgeId) -> u32 {
        (0..self.k).filter(|&p| self.pin_count_in_part(e, p) > 0).count() as u32
    }

    /// Shared-safe move; see [`PartitionView::change_node_part`].
    pub fn change_node_part_shared(
        &self,
        v: NodeId,
        from: PartId,
        to: PartId,
        max_weight_to: NodeWeight,
        delta: &mut dyn FnMut(SyncUpdate),
    ) -> bool {
        debug_assert_ne!(from, to);
        debug_assert_eq!(self.part_ids[v as usize].load(Ordering::Relaxed), from);
        let w = self.hg.node_weight(v);
        // Optimistic weight reservation on the target block.
        let new_to_weight = self.part_weights[to as usize].fetch_add(w, Ordering::AcqRel) + w;
        if new_to_weight > max_weight_to {
            self.part_weights[to as usize].fetch_sub(w, Ordering::AcqRel);
            return false;
        }
        self.part_ids[v as usize].store(to, Ordering::Release);
        self.part_weights[from as usize].fetch_sub(w, Ordering::AcqRel);
        let k = self.k as usize;
        for &e in self.hg.incident_edges(v) {
            let row = e as usize * k;
            let after_from =
                self.pin_counts[row + from as usize].fetch_sub(1, Ordering::AcqRel) - 1;
            let after_to = self.pin_counts[row + to as usize].fetch_add(1, Ordering::AcqRel) + 1;
            delta(SyncUpdate {
                he: e,
                edge_weight: self.hg.edge_weight(e),
                edge_size: self.hg.edge_size(e),
                pin_count_in_from_part_after: after_from,
                pin_count_in_to_part_after: after_to,
            });
        }
        true
    }
}

impl<'a> PartitionView for PartitionedHypergraph<'a> {
    fn k(&self) -> PartId {
        self.k
    }

    fn part_id(&self, v: NodeId) -> PartId {
        self.part_ids[v as usize].load(Ordering::Relaxed)
    }

    fn part_weight(&self, p: PartId) -> NodeWeight {
        self.part_weights[p as usize].load(Ordering::Relaxed)
    }

    fn node_weight(&self, v: NodeId) -> NodeWeight {
        self.hg.node_weight(v)
    }

    fn edge_weight(&self, e: EdgeId) -> EdgeWeight {
        self.hg.edge_weight(e)
    }

    fn edge_size(&self, e: EdgeId) -> usize {
        self.hg.edge_size(e)
    }

    fn pin_count_in_part(&self, e: EdgeId, p: PartId) -> u32 {
        self.pin_counts[e as usize * self.k as usize + p as usize].load(Ordering::Relaxed)
    }

    fn incident_edges(&self, v: NodeId) -> &[EdgeId] {
        self.hg.incident_edges(v)
    }

    fn pins(&self, e: EdgeId) -> &[NodeId] {
        self.hg.pins(e)
    }

    fn initial_num_nodes(&self) -> NodeId {
        self.hg.initial_num_nodes()
    }

    fn initial_num_edges(&self) -> EdgeId {
        self.hg.initial_num_edges()
    }

    fn change_node_part(
        &mut self,
        v: NodeId,
        from: PartId,
        to: PartId,
        max_weight_to: NodeWeight,
        delta: &mut dyn FnMut(SyncUpdate),
    ) -> bool {
        self.change_node_part_shared(v, from, to, max_weight_to, delta)
    }
}

/// Adapter exposing a shared reference to the partitioned hypergraph
/// through [`PartitionView`]; moves go straight to the shared state. Used by
/// refiners that operate globally instead of on a delta overlay.
pub struct SharedView<'x, 'hg>(pub &'x PartitionedHypergraph<'hg>);

impl<'x, 'hg> PartitionView for SharedView<'x, 'hg> {
    fn k(&self) -> PartId {
        self.0.k()
    }

    fn part_id(&self, v: NodeId) -> PartId {
        self.0.part_id(v)
    }

    fn part_weight(&self, p: PartId) -> NodeWeight {
        self.0.part_weight(p)
    }

    fn node_weight(&self, v: NodeId) -> NodeWeight {
        self.0.node_weight(v)
    }

    fn edge_weight(&self, e: EdgeId) -> EdgeWeight {
        self.0.edge_weight(e)
    }

    fn edge_size(&self, e: EdgeId) -> usize {
        self.0.edge_size(e)
    }

    fn pin_count_in_part(&self, e: EdgeId, p: PartId) -> u32 {
        self.0.pin_count_in_part(e, p)
    }

    fn incident_edges(&self, v: NodeId) -> &[EdgeId] {
        self.0.incident_edges(v)
    }

    fn pins(&self, e: EdgeId) -> &[NodeId] {
        self.0.pins(e)
    }

    fn initial_num_nodes(&self) -> NodeId {
        self.0.initial_num_nodes()
    }

    fn initial_num_edges(&self) -> EdgeId {
        self.0.initial_num_edges()
    }

    fn change_node_part(
        &mut self,
        v: NodeId,
        from: PartId,
        to: PartId,
        max_weight_to: NodeWeight,
        delta: &mut dyn FnMut(SyncUpdate),
    ) -> bool {
        self.0.change_node_part_shared(v, from, to, max_weight_to, delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Hypergraph {
        Hypergraph::new(4, &[vec![0, 1, 2], vec![2, 3], vec![0, 3]], None, None).unwrap()
    }

    #[test]
    fn pin_counts_follow_assignment() {
        let hg = small();
        let phg = PartitionedHypergraph::from_partition(&hg, 2, &[0, 0, 1, 1]);
        assert_eq!(phg.pin_count_in_part(0, 0), 2);
        assert_eq!(phg.pin_count_in_part(0, 1), 1);
        assert_eq!(phg.pin_count_in_part(1, 1), 2);
        assert_eq!(phg.connectivity(0), 2);
        assert_eq!(phg.connectivity(1), 1);
        assert_eq!(phg.part_weight(0), 2);
    }

    #[test]
    fn change_node_part_respects_weight_cap_and_reports_deltas() {
        let hg = small();
        let phg = PartitionedHypergraph::from_partition(&hg, 2, &[0, 0, 1, 1]);
        let mut updates = Vec::new();
        let moved = phg.change_node_part_shared(2, 1, 0, 10, &mut |u: SyncUpdate| {
            updates.push((u.he, u.pin_count_in_from_part_after, u.pin_count_in_to_part_after));
        });
        assert!(moved);
        assert_eq!(phg.part_id(2), 0);
        assert_eq!(updates, vec![(0, 0, 3), (1, 1, 1)]);

        // cap of 3 rejects moving node 3 (weight 1) into block 0 (weight 3)
        assert!(!phg.change_node_part_shared(3, 1, 0, 3, &mut |_| {}));
        assert_eq!(phg.part_id(3), 1);
        assert_eq!(phg.part_weight(0), 3);
    }
}
