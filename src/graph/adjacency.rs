//! Dynamic adjacency array: arena storage for per-vertex edge lists with
//! versioned contraction and uncontraction.
//!
//! The arena holds one slab of [`Edge`] records per vertex (bounds in
//! `index_array`) and a parallel array of [`Header`] records. Contracting
//! `v` into `u` splices v's edge-list ring into u's, retires the u↔v edge
//! pairs, and re-targets the reverse records of v's surviving edges so that
//! neighbors observe `u` as the representative. Every retirement carries a
//! version stamp; because uncontractions must happen in reverse contraction
//! order, the retirements of one epoch form a contiguous LIFO group at the
//! front of each segment's inactive suffix and can be reactivated by a
//! version scan.
//!
//! Records never leave their slab: swaps are intra-slab and fix up the twin
//! back-pointers of both records, so `edges[e].twin` is exact at all times
//! and `edges[e].original_target` names the slab that holds the twin.

use hashbrown::HashSet;
use rayon::prelude::*;

use crate::debug_invariants;
use crate::error::CoreError;
use crate::graph::{EdgeId, EdgeWeight, NodeId};

/// Per-vertex lock hooks injected by the caller.
///
/// The hooks bracket header access during contraction exactly as the
/// interface demands; drivers that serialize through `&mut` access can use
/// [`NoopLocks`]. Hooks must be re-entrant-safe for the same worker; nested
/// contractions on the same head are not supported.
pub trait VertexLocks {
    fn acquire(&self, u: NodeId);
    fn release(&self, u: NodeId);
}

/// Default no-op lock implementation.
pub struct NoopLocks;

impl VertexLocks for NoopLocks {
    #[inline]
    fn acquire(&self, _u: NodeId) {}
    #[inline]
    fn release(&self, _u: NodeId) {}
}

/// One directed half-edge record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    /// Current representative of the other endpoint.
    pub target: NodeId,
    /// Current representative owning this record's list.
    pub source: NodeId,
    /// Edge weight; parallel-edge removal accumulates weights on survivors.
    pub weight: EdgeWeight,
    /// Version stamp of the epoch at which the record was retired.
    pub version: u32,
    /// Slot of the reverse record; maintained under swaps.
    pub twin: EdgeId,
    /// Slab holding the twin record; follows the twin pointer when
    /// uncontraction has to re-pair crossed survivors.
    pub original_target: NodeId,
}

/// Header of one vertex's edge segment.
///
/// `prev`/`next` link the contraction ring (all segments merged into one
/// head); `it_prev`/`it_next` link the iteration ring, which skips empty
/// segments. `degree` is meaningful on heads and counts the active edges of
/// the whole merged list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub prev: NodeId,
    pub next: NodeId,
    pub it_prev: NodeId,
    pub it_next: NodeId,
    /// Tail of this vertex's ring; kept across splicing so the sublist can
    /// be cut back out during uncontraction.
    pub tail: NodeId,
    /// Slab-relative start of the active window.
    pub first_active: u32,
    /// Slab-relative end of the active window.
    pub first_inactive: u32,
    pub degree: u32,
    pub current_version: u32,
    pub is_head: bool,
}

impl Header {
    fn new(u: NodeId, slab_len: u32) -> Self {
        Header {
            prev: u,
            next: u,
            it_prev: u,
            it_next: u,
            tail: u,
            first_active: 0,
            first_inactive: slab_len,
            degree: slab_len,
            current_version: 0,
            is_head: true,
        }
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.first_inactive - self.first_active
    }
}

/// Scan record used while detecting parallel edges.
#[derive(Debug, Clone, Copy)]
struct ParallelEdgeInformation {
    target: NodeId,
    edge_id: EdgeId,
    header_id: NodeId,
    /// Election key, identical for a record and its twin: the version depths
    /// of the two segments holding the pair, deepest first, then the smaller
    /// slot. Both directions of a bundle therefore elect the same pair as
    /// survivor without coordination, and every retired pair keeps at least
    /// one member inside a segment whose version scan will reach it.
    key: (u32, u32, EdgeId),
}

/// Arena of per-vertex edge lists supporting versioned contraction.
#[derive(Debug, Clone)]
pub struct DynamicAdjacencyArray {
    num_nodes: NodeId,
    index_array: Vec<EdgeId>,
    headers: Vec<Header>,
    edges: Vec<Edge>,
}

impl DynamicAdjacencyArray {
    /// Build the arena from a flat edge list. Each input pair produces two
    /// half-edge records referencing each other through `twin`.
    pub fn build_from_edge_list(
        num_nodes: NodeId,
        pairs: &[(NodeId, NodeId)],
        weights: Option<&[EdgeWeight]>,
    ) -> Result<Self, CoreError> {
        if let Some(w) = weights {
            if w.len() != pairs.len() {
                return Err(CoreError::WeightLengthMismatch {
                    expected: pairs.len(),
                    got: w.len(),
                });
            }
        }
        for &(a, b) in pairs {
            if a >= num_nodes || b >= num_nodes {
                return Err(CoreError::NodeOutOfRange(a.max(b), num_nodes));
            }
        }

        let n = num_nodes as usize;
        let m = pairs.len();

        // (endpoint, pair, direction); sorting gives every record its slot:
        // entry j of the sorted list lands at arena slot j.
        let mut endpoints: Vec<(NodeId, u32, bool)> = pairs
            .par_iter()
            .enumerate()
            .flat_map_iter(|(p, &(a, b))| [(a, p as u32, false), (b, p as u32, true)])
            .collect();
        endpoints.par_sort_unstable();

        let mut index_array = vec![0 as EdgeId; n + 1];
        for &(e, _, _) in &endpoints {
            index_array[e as usize + 1] += 1;
        }
        for u in 0..n {
            index_array[u + 1] += index_array[u];
        }

        let mut fwd_slot = vec![0 as EdgeId; m];
        let mut bwd_slot = vec![0 as EdgeId; m];
        for (j, &(_, p, dir)) in endpoints.iter().enumerate() {
            if dir {
                bwd_slot[p as usize] = j as EdgeId;
            } else {
                fwd_slot[p as usize] = j as EdgeId;
            }
        }

        let edges: Vec<Edge> = endpoints
            .par_iter()
            .map(|&(ep, p, dir)| {
                let (a, b) = pairs[p as usize];
                let other = if dir { a } else { b };
                let twin = if dir { fwd_slot[p as usize] } else { bwd_slot[p as usize] };
                Edge {
                    target: other,
                    source: ep,
                    weight: weights.map_or(1, |w| w[p as usize]),
                    version: 0,
                    twin,
                    original_target: other,
                }
            })
            .collect();

        let headers: Vec<Header> = (0..num_nodes)
            .map(|u| {
                let len = index_array[u as usize + 1] - index_array[u as usize];
                Header::new(u, len)
            })
            .collect();

        let dar = DynamicAdjacencyArray { num_nodes, index_array, headers, edges };
        debug_invariants!(dar.validate(), "construction");
        Ok(dar)
    }

    #[inline]
    pub fn num_nodes(&self) -> NodeId {
        self.num_nodes
    }

    /// One past the largest edge id.
    #[inline]
    pub fn max_edge_id(&self) -> EdgeId {
        self.edges.len() as EdgeId
    }

    #[inline]
    pub fn edge(&self, e: EdgeId) -> &Edge {
        &self.edges[e as usize]
    }

    #[inline]
    pub fn header(&self, u: NodeId) -> &Header {
        &self.headers[u as usize]
    }

    /// Degree of the merged list headed by `u`. O(1).
    #[inline]
    pub fn node_degree(&self, u: NodeId) -> u32 {
        self.headers[u as usize].degree
    }

    #[inline]
    fn first_edge(&self, u: NodeId) -> EdgeId {
        self.index_array[u as usize]
    }

    #[inline]
    fn slab_len(&self, u: NodeId) -> u32 {
        self.index_array[u as usize + 1] - self.index_array[u as usize]
    }

    #[inline]
    fn segment_size(&self, u: NodeId) -> u32 {
        self.headers[u as usize].size()
    }

    /// Contraction ring of `head`, head first.
    fn ring(&self, head: NodeId) -> Vec<NodeId> {
        let mut members = vec![head];
        let mut cur = self.headers[head as usize].next;
        while cur != head {
            members.push(cur);
            cur = self.headers[cur as usize].next;
        }
        members
    }

    /// Iterate the incident edges of head `u` via the iteration ring. O(degree).
    pub fn incident_edges(&self, u: NodeId) -> IncidentEdgeIter<'_> {
        let h = &self.headers[u as usize];
        IncidentEdgeIter {
            dar: self,
            head: u,
            current: u,
            pos: h.first_active,
            done: false,
        }
    }

    /// Iterate every active edge of the arena.
    pub fn edges(&self) -> ActiveEdgeIter<'_> {
        ActiveEdgeIter { dar: self, u: 0, pos: 0 }
    }

    /// Swap two records of the same slab, fixing both twins' back-pointers.
    fn swap_records(&mut self, a: EdgeId, b: EdgeId) {
        if a == b {
            return;
        }
        self.edges.swap(a as usize, b as usize);
        let ta = self.edges[a as usize].twin;
        self.edges[ta as usize].twin = a;
        let tb = self.edges[b as usize].twin;
        self.edges[tb as usize].twin = b;
    }

    /// Retire the record at `e` out of segment `seg`'s active window,
    /// stamping the given version.
    fn retire(&mut self, seg: NodeId, e: EdgeId, stamp: u32) {
        let last = self.first_edge(seg) + self.headers[seg as usize].first_inactive - 1;
        self.swap_records(e, last);
        self.edges[last as usize].version = stamp;
        self.headers[seg as usize].first_inactive -= 1;
        debug_assert!(
            self.headers[seg as usize].first_active <= self.headers[seg as usize].first_inactive
        );
    }

    /// Move the retired record at `slot` back into segment `seg`'s active
    /// window; returns its new slot.
    fn reactivate_slot(&mut self, seg: NodeId, slot: EdgeId) -> EdgeId {
        let frontier = self.first_edge(seg) + self.headers[seg as usize].first_inactive;
        self.swap_records(slot, frontier);
        self.headers[seg as usize].first_inactive += 1;
        frontier
    }

    /// Make `a` and `b` twins; their displaced former partners are paired
    /// with each other. `original_target` fields follow the new pairing.
    fn repair_pair(&mut self, a: EdgeId, b: EdgeId) {
        let old_a = self.edges[a as usize].twin;
        let old_b = self.edges[b as usize].twin;
        if old_a == b {
            debug_assert_eq!(old_b, a);
            return;
        }
        // old_x.original_target names the slab of x itself
        let slab_a = self.edges[old_a as usize].original_target;
        let slab_b = self.edges[old_b as usize].original_target;
        let slab_old_a = self.edges[a as usize].original_target;
        let slab_old_b = self.edges[b as usize].original_target;
        self.edges[a as usize].twin = b;
        self.edges[b as usize].twin = a;
        self.edges[a as usize].original_target = slab_b;
        self.edges[b as usize].original_target = slab_a;
        self.edges[old_a as usize].twin = old_b;
        self.edges[old_b as usize].twin = old_a;
        self.edges[old_a as usize].original_target = slab_old_b;
        self.edges[old_b as usize].original_target = slab_old_a;
    }

    /// Relink the iteration ring of `head` from its contraction ring: the
    /// head plus every non-empty segment, in ring order.
    fn rebuild_it_ring(&mut self, head: NodeId) {
        let members: Vec<NodeId> = self
            .ring(head)
            .into_iter()
            .filter(|&h| h == head || self.segment_size(h) > 0)
            .collect();
        let k = members.len();
        for (i, &h) in members.iter().enumerate() {
            self.headers[h as usize].it_prev = members[(i + k - 1) % k];
            self.headers[h as usize].it_next = members[(i + 1) % k];
        }
    }

    fn recompute_degree(&mut self, head: NodeId) {
        let deg: u32 = self.ring(head).iter().map(|&h| self.segment_size(h)).sum();
        self.headers[head as usize].degree = deg;
    }

    /// Search `head`'s merged list for an active edge targeting `target`,
    /// ignoring records in `excluded` (edges reactivated mid-restoration).
    fn find_active_edge(
        &self,
        head: NodeId,
        target: NodeId,
        excluded: &HashSet<EdgeId>,
    ) -> Option<EdgeId> {
        for h in self.ring(head) {
            let fe = self.first_edge(h);
            let hd = &self.headers[h as usize];
            for off in hd.first_active..hd.first_inactive {
                let e = fe + off;
                if self.edges[e as usize].target == target && !excluded.contains(&e) {
                    return Some(e);
                }
            }
        }
        None
    }

    /// Contract `v` into `u`: remove the u↔v edge pairs, re-target v's
    /// surviving reverse records to `u`, and splice v's ring as u's tail.
    pub fn contract<L: VertexLocks>(&mut self, u: NodeId, v: NodeId, locks: &L) {
        locks.acquire(u);
        locks.acquire(v);
        debug_assert!(u != v);
        debug_assert!(self.headers[u as usize].is_head && self.headers[v as usize].is_head);

        let chain = self.ring(v);
        for &h in &chain {
            self.headers[h as usize].current_version += 1;
        }

        for &h in &chain {
            let fe = self.first_edge(h);
            let mut off = self.headers[h as usize].first_active;
            while off < self.headers[h as usize].first_inactive {
                let e = fe + off;
                if self.edges[e as usize].target == u {
                    let twin = self.edges[e as usize].twin;
                    let twin_seg = self.edges[e as usize].original_target;
                    let stamp = self.headers[h as usize].current_version;
                    self.retire(h, e, stamp);
                    let twin_stamp = self.headers[twin_seg as usize].current_version;
                    self.retire(twin_seg, twin, twin_stamp);
                    // the swapped-in record takes position `e`; do not advance
                } else {
                    let twin = self.edges[e as usize].twin;
                    self.edges[twin as usize].target = u;
                    self.edges[e as usize].source = u;
                    off += 1;
                }
            }
        }

        // Splice v's ring behind u's tail; v keeps its own tail so the
        // sublist can be unspliced later.
        let u_tail = self.headers[u as usize].tail;
        let v_tail = self.headers[v as usize].tail;
        self.headers[u_tail as usize].next = v;
        self.headers[v as usize].prev = u_tail;
        self.headers[v_tail as usize].next = u;
        self.headers[u as usize].prev = v_tail;
        self.headers[u as usize].tail = v_tail;
        self.headers[v as usize].is_head = false;

        self.recompute_degree(u);
        self.rebuild_it_ring(u);

        debug_invariants!(self.validate_head(u), "contract");
        locks.release(v);
        locks.release(u);
    }

    /// Undo the most recent contraction onto `u`. For every reactivated edge
    /// `e` of v's sublist, `case_one(e)` fires if u still has an active
    /// parallel edge to the same target (u and v were both neighbors of it),
    /// `case_two(e)` otherwise.
    pub fn uncontract<L, F1, F2>(
        &mut self,
        u: NodeId,
        v: NodeId,
        mut case_one: F1,
        mut case_two: F2,
        locks: &L,
    ) where
        L: VertexLocks,
        F1: FnMut(EdgeId),
        F2: FnMut(EdgeId),
    {
        locks.acquire(u);
        locks.acquire(v);
        debug_assert!(self.headers[u as usize].is_head && !self.headers[v as usize].is_head);
        debug_assert_eq!(
            self.headers[u as usize].tail, self.headers[v as usize].tail,
            "uncontract({u}, {v}) out of order: uncontractions must reverse contractions"
        );

        // Cut v's sublist [v .. v.tail] back out of u's ring.
        let v_tail = self.headers[v as usize].tail;
        let pred = self.headers[v as usize].prev;
        self.headers[pred as usize].next = u;
        self.headers[u as usize].prev = pred;
        self.headers[u as usize].tail = pred;
        self.headers[v_tail as usize].next = v;
        self.headers[v as usize].prev = v_tail;
        self.headers[v as usize].is_head = true;

        let chain = self.ring(v);

        // Surviving edges of v's sublist become v's again.
        for &h in &chain {
            let fe = self.first_edge(h);
            let hd = self.headers[h as usize];
            for off in hd.first_active..hd.first_inactive {
                let e = fe + off;
                let twin = self.edges[e as usize].twin;
                self.edges[twin as usize].target = v;
                self.edges[e as usize].source = v;
            }
        }

        // Version scan: reactivate this epoch's retirements. Records already
        // reactivated by this call are excluded from survivor searches so a
        // restored duplicate never masquerades as its bundle's survivor.
        let mut restored: HashSet<EdgeId> = HashSet::new();
        for &h in &chain {
            let fe = self.first_edge(h);
            let cv = self.headers[h as usize].current_version;
            loop {
                let fi = self.headers[h as usize].first_inactive;
                if fi >= self.slab_len(h) {
                    break;
                }
                let e = fe + fi;
                if self.edges[e as usize].version != cv {
                    break;
                }
                self.headers[h as usize].first_inactive += 1;
                self.edges[e as usize].source = v;
                restored.insert(e);
                let target = self.edges[e as usize].target;

                // A surviving parallel edge to the same target marks `e` as a
                // restored duplicate. The survivor sits in u's remaining list
                // when the bundle was formed by this contraction, or within
                // v's own sublist when an earlier bundle was only coalesced
                // at this epoch's removal pass.
                let survivor_u = self.find_active_edge(u, target, &restored);
                let survivor_v = if survivor_u.is_none() {
                    self.find_active_edge(v, target, &restored)
                } else {
                    None
                };
                if let Some(survivor) = survivor_u.or(survivor_v) {
                    // Take the duplicate's weight back out of the surviving
                    // direction pair and wake one retired reverse record on
                    // the far side. Independent survivor elections can leave
                    // the twin pairings crossed; re-pair so the active
                    // records of both directions reference each other.
                    let near_head = if survivor_u.is_some() { u } else { v };
                    let w = self.edges[e as usize].weight;
                    self.edges[survivor as usize].weight -= w;
                    let far_active = self
                        .find_active_edge(target, near_head, &restored)
                        .expect("twin symmetry: surviving direction has no reverse record");
                    self.repair_pair(survivor, far_active);
                    self.edges[far_active as usize].weight -= w;

                    let far_retired = self.edges[e as usize].twin;
                    debug_assert!(!self.is_active_slot(far_retired));
                    let far_seg = self.edges[e as usize].original_target;
                    let new_slot = self.reactivate_slot(far_seg, far_retired);
                    self.edges[new_slot as usize].target = v;
                    self.edges[new_slot as usize].weight = w;
                    restored.insert(new_slot);
                    self.headers[target as usize].degree += 1;
                    self.rebuild_it_ring(target);
                    if survivor_u.is_some() {
                        case_one(e);
                    } else {
                        case_two(e);
                    }
                } else {
                    // Restored u↔v edge; its twin sits retired in u's list.
                    let twin = self.edges[e as usize].twin;
                    let twin_seg = self.edges[e as usize].original_target;
                    let new_slot = self.reactivate_slot(twin_seg, twin);
                    debug_assert_eq!(self.edges[new_slot as usize].target, v);
                    restored.insert(new_slot);
                    case_two(e);
                }
            }
        }

        for &h in &chain {
            self.headers[h as usize].current_version -= 1;
        }

        self.recompute_degree(u);
        self.recompute_degree(v);
        self.rebuild_it_ring(u);
        self.rebuild_it_ring(v);

        debug_invariants!(self.validate_head(u), "uncontract (representative)");
        debug_invariants!(self.validate_head(v), "uncontract (partner)");
        locks.release(v);
        locks.release(u);
    }

    /// Detect and coalesce parallel edges: per head, scan the merged list,
    /// sort by target, sum each run's weight into its elected survivor and
    /// retire the rest with current-version stamps.
    ///
    /// Both directions of a bundle elect survivors through the symmetric key
    /// `(max, min)` of the two segments' version depths, so survivors remain
    /// construction twins and uncontraction can restore the bundle pair by
    /// pair.
    pub fn remove_parallel_edges(&mut self) {
        // Plan phase (read-only, parallel over heads): weight updates plus
        // per-segment retire lists.
        struct HeadPlan {
            head: NodeId,
            weight_add: Vec<(EdgeId, EdgeWeight)>,
            retire: Vec<(NodeId, EdgeId)>,
        }

        let plans: Vec<HeadPlan> = (0..self.num_nodes)
            .into_par_iter()
            .filter(|&u| self.headers[u as usize].is_head && self.node_degree(u) > 1)
            .map(|u| {
                let mut scan: Vec<ParallelEdgeInformation> = Vec::with_capacity(
                    self.node_degree(u) as usize,
                );
                for h in self.ring(u) {
                    let fe = self.first_edge(h);
                    let hd = &self.headers[h as usize];
                    for off in hd.first_active..hd.first_inactive {
                        let e = fe + off;
                        let rec = &self.edges[e as usize];
                        let depth_here = self.headers[h as usize].current_version;
                        let depth_there =
                            self.headers[rec.original_target as usize].current_version;
                        scan.push(ParallelEdgeInformation {
                            target: rec.target,
                            edge_id: e,
                            header_id: h,
                            key: (
                                depth_here.max(depth_there),
                                depth_here.min(depth_there),
                                e.min(rec.twin),
                            ),
                        });
                    }
                }
                scan.sort_unstable_by_key(|p| (p.target, p.key));

                let mut plan = HeadPlan { head: u, weight_add: Vec::new(), retire: Vec::new() };
                let mut i = 0;
                while i < scan.len() {
                    let mut j = i + 1;
                    while j < scan.len() && scan[j].target == scan[i].target {
                        j += 1;
                    }
                    if j - i > 1 {
                        // scan[i] carries the minimal key of the run and survives
                        let mut total = 0;
                        for dup in &scan[i + 1..j] {
                            total += self.edges[dup.edge_id as usize].weight;
                            plan.retire.push((dup.header_id, dup.edge_id));
                        }
                        plan.weight_add.push((scan[i].edge_id, total));
                    }
                    i = j;
                }
                plan
            })
            .collect();

        // Apply phase: weight updates first (slots still valid), then
        // retirements in descending slot order per segment so pending slots
        // stay put.
        for plan in &plans {
            for &(e, add) in &plan.weight_add {
                self.edges[e as usize].weight += add;
            }
        }
        for plan in plans {
            let mut retire = plan.retire;
            retire.sort_unstable_by(|a, b| b.1.cmp(&a.1));
            for (seg, e) in retire {
                let stamp = self.headers[seg as usize].current_version;
                self.retire(seg, e, stamp);
            }
            self.recompute_degree(plan.head);
            self.rebuild_it_ring(plan.head);
        }

        debug_invariants!(self.validate(), "remove_parallel_edges");
    }

    /// `original_target` names the slab of the twin, so the slab of `e`
    /// itself is its twin's `original_target`.
    #[inline]
    fn is_active_slot(&self, e: EdgeId) -> bool {
        let own = self.edges[self.edges[e as usize].twin as usize].original_target;
        let fe = self.first_edge(own);
        let hd = &self.headers[own as usize];
        e >= fe + hd.first_active && e < fe + hd.first_inactive
    }

    /// Structural validation of every head's list. Debug/strict builds only
    /// (via the `debug_invariants!` macro); O(V + E).
    pub fn validate(&self) -> Result<(), String> {
        for u in 0..self.num_nodes {
            if self.headers[u as usize].is_head {
                self.validate_head(u)?;
            }
        }
        Ok(())
    }

    fn validate_head(&self, u: NodeId) -> Result<(), String> {
        let ring = self.ring(u);
        let mut degree = 0;
        for &h in &ring {
            let hd = &self.headers[h as usize];
            if hd.first_active > hd.first_inactive || hd.first_inactive > self.slab_len(h) {
                return Err(format!("segment {h}: active window out of bounds"));
            }
            degree += hd.size();
            let fe = self.first_edge(h);
            for off in hd.first_active..hd.first_inactive {
                let e = fe + off;
                let rec = &self.edges[e as usize];
                if rec.source != u {
                    return Err(format!("edge {e}: source {} but head {u}", rec.source));
                }
                let twin = &self.edges[rec.twin as usize];
                if twin.twin != e {
                    return Err(format!("edge {e}: twin back-pointer broken"));
                }
                if !self.is_active_slot(rec.twin) {
                    return Err(format!("edge {e}: twin {} inactive", rec.twin));
                }
                if twin.weight != rec.weight {
                    return Err(format!("edge {e}: twin weight mismatch"));
                }
                if twin.target != u {
                    return Err(format!("edge {e}: twin targets {}, not {u}", twin.target));
                }
            }
        }
        if degree != self.headers[u as usize].degree {
            return Err(format!(
                "head {u}: degree {} but {degree} active edges",
                self.headers[u as usize].degree
            ));
        }
        // Iteration ring: head plus exactly the non-empty segments, in order.
        let expect: Vec<NodeId> = ring
            .iter()
            .copied()
            .filter(|&h| h == u || self.segment_size(h) > 0)
            .collect();
        let mut it_ring = vec![u];
        let mut cur = self.headers[u as usize].it_next;
        while cur != u {
            it_ring.push(cur);
            if it_ring.len() > ring.len() {
                return Err(format!("head {u}: iteration ring does not close"));
            }
            cur = self.headers[cur as usize].it_next;
        }
        if it_ring != expect {
            return Err(format!("head {u}: iteration ring {it_ring:?} != {expect:?}"));
        }
        Ok(())
    }
}

/// Iterator over the incident edge ids of one head.
pub struct IncidentEdgeIter<'a> {
    dar: &'a DynamicAdjacencyArray,
    head: NodeId,
    current: NodeId,
    pos: u32,
    done: bool,
}

impl<'a> Iterator for IncidentEdgeIter<'a> {
    type Item = EdgeId;

    fn next(&mut self) -> Option<EdgeId> {
        loop {
            if self.done {
                return None;
            }
            let hd = self.dar.header(self.current);
            if self.pos < hd.first_inactive {
                let e = self.dar.first_edge(self.current) + self.pos;
                self.pos += 1;
                return Some(e);
            }
            let next = hd.it_next;
            if next == self.head {
                self.done = true;
            } else {
                self.current = next;
                self.pos = self.dar.header(next).first_active;
            }
        }
    }
}

/// Iterator over every active edge id in the arena.
pub struct ActiveEdgeIter<'a> {
    dar: &'a DynamicAdjacencyArray,
    u: NodeId,
    pos: u32,
}

impl<'a> Iterator for ActiveEdgeIter<'a> {
    type Item = EdgeId;

    fn next(&mut self) -> Option<EdgeId> {
        while self.u < self.dar.num_nodes {
            let hd = self.dar.header(self.u);
            if self.pos < hd.first_active {
                self.pos = hd.first_active;
            }
            if self.pos < hd.first_inactive {
                let e = self.dar.first_edge(self.u) + self.pos;
                self.pos += 1;
                return Some(e);
            }
            self.u += 1;
            self.pos = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> DynamicAdjacencyArray {
        // 0-1, 0-2, 1-2, 2-3
        DynamicAdjacencyArray::build_from_edge_list(4, &[(0, 1), (0, 2), (1, 2), (2, 3)], None)
            .unwrap()
    }

    fn active_neighbors(dar: &DynamicAdjacencyArray, u: NodeId) -> Vec<(NodeId, EdgeWeight)> {
        let mut out: Vec<_> = dar
            .incident_edges(u)
            .map(|e| (dar.edge(e).target, dar.edge(e).weight))
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn construction_counts_and_twins() {
        let dar = diamond();
        assert_eq!(dar.node_degree(0), 2);
        assert_eq!(dar.node_degree(2), 3);
        assert_eq!(dar.max_edge_id(), 8);
        for e in dar.edges() {
            let rec = dar.edge(e);
            let twin = dar.edge(rec.twin);
            assert_eq!(twin.twin, e);
            assert_eq!(twin.target, rec.source);
        }
        dar.validate().unwrap();
    }

    #[test]
    fn contract_merges_and_uncontract_restores() {
        let mut dar = diamond();
        let before_headers = dar.headers.clone();

        dar.contract(0, 1, &NoopLocks);
        // two parallel edges to 2 remain
        assert_eq!(dar.node_degree(0), 2);
        assert_eq!(active_neighbors(&dar, 0), vec![(2, 1), (2, 1)]);
        assert_eq!(active_neighbors(&dar, 2), vec![(0, 1), (0, 1), (3, 1)]);

        dar.remove_parallel_edges();
        assert_eq!(dar.node_degree(0), 1);
        assert_eq!(active_neighbors(&dar, 0), vec![(2, 2)]);
        assert_eq!(active_neighbors(&dar, 2), vec![(0, 2), (3, 1)]);

        let mut case_one = 0;
        let mut case_two = 0;
        dar.uncontract(0, 1, |_| case_one += 1, |_| case_two += 1, &NoopLocks);
        assert_eq!(case_one, 1); // the coalesced (1,2) edge
        assert_eq!(case_two, 1); // the (0,1) edge

        assert_eq!(active_neighbors(&dar, 0), vec![(1, 1), (2, 1)]);
        assert_eq!(active_neighbors(&dar, 1), vec![(0, 1), (2, 1)]);
        assert_eq!(active_neighbors(&dar, 2), vec![(0, 1), (1, 1), (3, 1)]);
        assert_eq!(dar.headers, before_headers);
        dar.validate().unwrap();
    }

    #[test]
    fn nested_contraction_round_trip() {
        let mut dar = diamond();
        let before_headers = dar.headers.clone();

        dar.contract(0, 1, &NoopLocks);
        dar.remove_parallel_edges();
        dar.contract(2, 3, &NoopLocks);
        dar.remove_parallel_edges();
        dar.contract(0, 2, &NoopLocks);
        dar.remove_parallel_edges();
        assert_eq!(dar.node_degree(0), 0);

        dar.uncontract(0, 2, |_| {}, |_| {}, &NoopLocks);
        assert_eq!(active_neighbors(&dar, 0), vec![(2, 2)]);
        assert_eq!(active_neighbors(&dar, 2), vec![(0, 2)]);
        dar.uncontract(2, 3, |_| {}, |_| {}, &NoopLocks);
        dar.uncontract(0, 1, |_| {}, |_| {}, &NoopLocks);

        assert_eq!(dar.headers, before_headers);
        let total: EdgeWeight = dar.edges().map(|e| dar.edge(e).weight).sum();
        assert_eq!(total, 8); // both directions of 4 unit edges
        dar.validate().unwrap();
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn uncontract_out_of_order_is_detected() {
        let mut dar = diamond();
        dar.contract(0, 1, &NoopLocks);
        dar.contract(0, 2, &NoopLocks);
        dar.uncontract(0, 1, |_| {}, |_| {}, &NoopLocks);
    }

    #[test]
    fn twin_symmetry_doubles_total_weight() {
        let mut dar =
            DynamicAdjacencyArray::build_from_edge_list(5, &[(0, 1), (1, 2), (2, 3), (3, 4), (4, 0)], Some(&[2, 3, 4, 5, 6]))
                .unwrap();
        let total = |d: &DynamicAdjacencyArray| d.edges().map(|e| d.edge(e).weight).sum::<EdgeWeight>();
        assert_eq!(total(&dar), 2 * (2 + 3 + 4 + 5 + 6));
        dar.contract(1, 2, &NoopLocks);
        dar.remove_parallel_edges();
        dar.validate().unwrap();
        // weights are preserved under contraction (no u↔v weight vanishes
        // beyond the removed pair itself)
        assert_eq!(total(&dar), 2 * (2 + 4 + 5 + 6));
    }

    #[test]
    fn iteration_skips_empty_segments() {
        let mut dar = diamond();
        dar.contract(2, 3, &NoopLocks); // 3's segment becomes empty (only edge was to 2)
        let ids: Vec<_> = dar.incident_edges(2).collect();
        assert_eq!(ids.len(), dar.node_degree(2) as usize);
        dar.validate().unwrap();
    }
}
