//! State shared between concurrent localized FM searches: the refinement
//! node queue, per-node search ownership, and fruitless-seed marks.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use rayon::prelude::*;

use crate::graph::NodeId;
use crate::parallel::work_container::WorkContainer;
use crate::refinement::SearchId;

/// Search id meaning "claimed and moved; no search may touch this node
/// again this round".
pub const DEACTIVATED: SearchId = SearchId::MAX - 1;

/// CAS-based ownership of nodes by searches. Search ids start at 1; 0 means
/// free.
pub struct NodeTracker {
    search_of_node: Vec<AtomicU32>,
    highest_active_search: AtomicU32,
}

impl NodeTracker {
    pub fn new(num_nodes: NodeId) -> Self {
        NodeTracker {
            search_of_node: (0..num_nodes).map(|_| AtomicU32::new(0)).collect(),
            highest_active_search: AtomicU32::new(0),
        }
    }

    pub fn new_search(&self) -> SearchId {
        self.highest_active_search.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn search_of(&self, v: NodeId) -> SearchId {
        self.search_of_node[v as usize].load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_search_inactive(&self, search: SearchId) -> bool {
        search == 0
    }

    /// Try to claim `v` for `search`; fails if another live search holds it
    /// or it was deactivated.
    pub fn try_acquire(&self, v: NodeId, search: SearchId) -> bool {
        let mut current = self.search_of(v);
        loop {
            if !self.is_search_inactive(current) {
                return false;
            }
            match self.search_of_node[v as usize].compare_exchange(
                current,
                search,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Mark a moved node so no search (including the owner) reclaims it.
    pub fn deactivate(&self, v: NodeId, search: SearchId) {
        debug_assert_eq!(self.search_of(v), search);
        self.search_of_node[v as usize].store(DEACTIVATED, Ordering::Release);
    }

    /// Give an unmoved node back.
    pub fn release(&self, v: NodeId) {
        self.search_of_node[v as usize].store(0, Ordering::Release);
    }

    /// Free every node for the next round.
    pub fn reset(&self) {
        self.search_of_node.par_iter().for_each(|s| s.store(0, Ordering::Relaxed));
    }
}

/// Shared state of one multi-try FM round.
pub struct FmSharedData {
    pub refinement_nodes: WorkContainer<NodeId>,
    pub node_tracker: NodeTracker,
    fruitless_seed: Vec<AtomicBool>,
}

impl FmSharedData {
    pub fn new(num_nodes: NodeId, num_tasks: usize) -> Self {
        FmSharedData {
            refinement_nodes: WorkContainer::new(num_nodes as usize, num_tasks),
            node_tracker: NodeTracker::new(num_nodes),
            fruitless_seed: (0..num_nodes).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn mark_fruitless_seed(&self, v: NodeId) {
        self.fruitless_seed[v as usize].store(true, Ordering::Relaxed);
    }

    pub fn is_fruitless_seed(&self, v: NodeId) -> bool {
        self.fruitless_seed[v as usize].load(Ordering::Relaxed)
    }

    /// Prepare for the next round: new epoch for the queue, all nodes free.
    pub fn reset_round(&mut self) {
        self.refinement_nodes.clear();
        self.node_tracker.reset();
        self.fruitless_seed.par_iter().for_each(|f| f.store(false, Ordering::Relaxed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_exclusive_until_release() {
        let tracker = NodeTracker::new(4);
        let s1 = tracker.new_search();
        let s2 = tracker.new_search();
        assert!(tracker.try_acquire(2, s1));
        assert!(!tracker.try_acquire(2, s2));
        tracker.release(2);
        assert!(tracker.try_acquire(2, s2));
        tracker.deactivate(2, s2);
        assert!(!tracker.try_acquire(2, s1));
    }
}
