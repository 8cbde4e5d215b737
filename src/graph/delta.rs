//! Delta overlay over the shared partitioned hypergraph.
//!
//! A localized FM search stages its moves here so they stay invisible to
//! concurrent searches; lookups read through to the shared state unless an
//! override exists. Rollback is discarding the maps.

use hashbrown::HashMap;

use crate::graph::partitioned::{PartitionView, PartitionedHypergraph, SyncUpdate};
use crate::graph::{EdgeId, EdgeWeight, NodeId, NodeWeight, PartId};

/// Staged partition changes on top of a [`PartitionedHypergraph`].
pub struct DeltaPartitionedHypergraph<'a, 'hg> {
    phg: &'a PartitionedHypergraph<'hg>,
    part_id_override: HashMap<NodeId, PartId>,
    pin_count_delta: HashMap<(EdgeId, PartId), i32>,
    part_weight_delta: Vec<NodeWeight>,
}

impl<'a, 'hg> DeltaPartitionedHypergraph<'a, 'hg> {
    pub fn new(phg: &'a PartitionedHypergraph<'hg>) -> Self {
        let k = phg.k() as usize;
        DeltaPartitionedHypergraph {
            phg,
            part_id_override: HashMap::new(),
            pin_count_delta: HashMap::new(),
            part_weight_delta: vec![0; k],
        }
    }

    /// Drop all staged changes.
    pub fn clear(&mut self) {
        self.part_id_override.clear();
        self.pin_count_delta.clear();
        self.part_weight_delta.iter_mut().for_each(|d| *d = 0);
    }

    pub fn base(&self) -> &'a PartitionedHypergraph<'hg> {
        self.phg
    }
}

impl<'a, 'hg> PartitionView for DeltaPartitionedHypergraph<'a, 'hg> {
    fn k(&self) -> PartId {
        self.phg.k()
    }

    fn part_id(&self, v: NodeId) -> PartId {
        self.part_id_override.get(&v).copied().unwrap_or_else(|| self.phg.part_id(v))
    }

    fn part_weight(&self, p: PartId) -> NodeWeight {
        self.phg.part_weight(p) + self.part_weight_delta[p as usize]
    }

    fn node_weight(&self, v: NodeId) -> NodeWeight {
        self.phg.node_weight(v)
    }

    fn edge_weight(&self, e: EdgeId) -> EdgeWeight {
        self.phg.edge_weight(e)
    }

    fn edge_size(&self, e: EdgeId) -> usize {
        self.phg.edge_size(e)
    }

    fn pin_count_in_part(&self, e: EdgeId, p: PartId) -> u32 {
        let base = self.phg.pin_count_in_part(e, p) as i32;
        let delta = self.pin_count_delta.get(&(e, p)).copied().unwrap_or(0);
        debug_assert!(base + delta >= 0);
        (base + delta) as u32
    }

    fn incident_edges(&self, v: NodeId) -> &[EdgeId] {
        self.phg.incident_edges(v)
    }

    fn pins(&self, e: EdgeId) -> &[NodeId] {
        self.phg.pins(e)
    }

    fn initial_num_nodes(&self) -> NodeId {
        self.phg.initial_num_nodes()
    }

    fn initial_num_edges(&self) -> EdgeId {
        self.phg.initial_num_edges()
    }

    fn change_node_part(
        &mut self,
        v: NodeId,
        from: PartId,
        to: PartId,
        max_weight_to: NodeWeight,
        delta: &mut dyn FnMut(SyncUpdate),
    ) -> bool {
        debug_assert_ne!(from, to);
        debug_assert_eq!(self.part_id(v), from);
        let w = self.node_weight(v);
        if self.part_weight(to) + w > max_weight_to {
            return false;
        }
        self.part_id_override.insert(v, to);
        self.part_weight_delta[from as usize] -= w;
        self.part_weight_delta[to as usize] += w;
        for &e in self.phg.incident_edges(v) {
            *self.pin_count_delta.entry((e, from)).or_insert(0) -= 1;
            *self.pin_count_delta.entry((e, to)).or_insert(0) += 1;
            delta(SyncUpdate {
                he: e,
                edge_weight: self.edge_weight(e),
                edge_size: self.edge_size(e),
                pin_count_in_from_part_after: self.pin_count_in_part(e, from),
                pin_count_in_to_part_after: self.pin_count_in_part(e, to),
            });
        }
        true
    }
}
