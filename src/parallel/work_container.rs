//! Shared refinement-node queues: per-worker SPMC queues with stealing and
//! timestamp-based deduplication.
//!
//! Each worker owns one [`SpmcQueue`]: only the owner pushes, any thread may
//! pop from the front. Element storage is segmented into fixed chunks, so a
//! push never moves published elements out from under a concurrent reader;
//! a segment pointer, once stored, stays valid until the queue is dropped.
//! That makes the grow path wait-free for readers and removes any need to
//! fence them out while a new segment is installed.
//!
//! Popping from the front (instead of a stack discipline) matters for the
//! consumer: a node released at the end of one local search should not be
//! rescheduled immediately, since its gains are unlikely to have recovered.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::parallel::derive_seed;

const SEG0_BITS: u32 = 13;
const NUM_SEGMENTS: usize = 19;

/// Queue elements are plain copyable ids that can index the timestamp table.
pub trait QueueElement: Copy + Send + Sync {
    fn index(self) -> usize;
}

impl QueueElement for u32 {
    fn index(self) -> usize {
        self as usize
    }
}

impl QueueElement for usize {
    fn index(self) -> usize {
        self
    }
}

#[inline]
fn locate(slot: usize) -> (usize, usize) {
    let adj = (slot >> SEG0_BITS) + 1;
    let s = (usize::BITS - 1 - adj.leading_zeros()) as usize;
    let base = ((1usize << s) - 1) << SEG0_BITS;
    (s, slot - base)
}

#[inline]
fn segment_len(s: usize) -> usize {
    1usize << (SEG0_BITS as usize + s)
}

/// Single-producer multiple-consumer queue.
///
/// `size` is published with release semantics after the element write, so a
/// reader that saw `slot < size` also sees the element and its segment.
pub struct SpmcQueue<T> {
    segments: [AtomicPtr<T>; NUM_SEGMENTS],
    size: AtomicUsize,
    capacity: AtomicUsize,
    front: AtomicUsize,
}

unsafe impl<T: Send> Send for SpmcQueue<T> {}
unsafe impl<T: Send + Sync> Sync for SpmcQueue<T> {}

impl<T: QueueElement> Default for SpmcQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueueElement> SpmcQueue<T> {
    pub fn new() -> Self {
        Self {
            segments: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            size: AtomicUsize::new(0),
            capacity: AtomicUsize::new(0),
            front: AtomicUsize::new(0),
        }
    }

    /// Append an element. Owner thread only.
    pub fn push_back(&self, el: T) {
        let slot = self.size.load(Ordering::Relaxed);
        let (s, off) = locate(slot);
        let mut seg = self.segments[s].load(Ordering::Acquire);
        if seg.is_null() {
            seg = self.install_segment(s);
        }
        unsafe { seg.add(off).write(el) };
        self.size.store(slot + 1, Ordering::Release);
    }

    /// Allocate and publish segment `s`. Owner thread only. Readers never
    /// have to be fenced out: a reader that saw `slot < size` also sees the
    /// segment that was published before `size` moved past it, and published
    /// segments never move or shrink.
    #[cold]
    fn install_segment(&self, s: usize) -> *mut T {
        let len = segment_len(s);
        let boxed: Box<[T]> = {
            // Elements are Copy ids; zero-like fill via first write is not
            // possible here, so allocate uninitialized and never read slots
            // beyond `size`.
            let mut v = Vec::with_capacity(len);
            #[allow(clippy::uninit_vec)]
            unsafe {
                v.set_len(len);
            }
            v.into_boxed_slice()
        };
        let ptr = Box::into_raw(boxed) as *mut T;
        self.segments[s].store(ptr, Ordering::Release);
        self.capacity.fetch_add(len, Ordering::Relaxed);
        ptr
    }

    /// Pop from the front. Any thread. A failed pop is not a linearizable
    /// emptiness check; the container-level steal loop compensates.
    pub fn try_pop_front(&self) -> Option<T> {
        let f = self.front.load(Ordering::Acquire);
        // The pre-check does not make fetch_add beyond `size` impossible,
        // only rare; such lost slots occur at the tail of a phase and are
        // tolerated.
        if f < self.size.load(Ordering::Acquire) {
            let slot = self.front.fetch_add(1, Ordering::AcqRel);
            if slot < self.size.load(Ordering::Acquire) {
                let (s, off) = locate(slot);
                let seg = self.segments[s].load(Ordering::Acquire);
                debug_assert!(!seg.is_null());
                return Some(unsafe { *seg.add(off) });
            }
        }
        None
    }

    pub fn unsafe_size(&self) -> usize {
        let f = self.front.load(Ordering::Acquire);
        let b = self.size.load(Ordering::Acquire);
        if b >= f {
            b - f
        } else {
            0
        }
    }

    pub fn empty(&self) -> bool {
        self.unsafe_size() == 0
    }

    /// True when the next push must allocate a fresh segment. Advisory and
    /// racy by construction; callers must not rely on it.
    pub fn next_push_causes_reallocation(&self) -> bool {
        self.size.load(Ordering::Relaxed) == self.capacity.load(Ordering::Relaxed)
    }

    pub fn clear(&mut self) {
        self.front.store(0, Ordering::Relaxed);
        self.size.store(0, Ordering::Relaxed);
    }

    /// Unpopped elements, owner-exclusive access.
    fn pending_mut(&mut self) -> Vec<T> {
        let f = (*self.front.get_mut()).min(*self.size.get_mut());
        let b = *self.size.get_mut();
        (f..b)
            .map(|slot| {
                let (s, off) = locate(slot);
                let seg = self.segments[s].load(Ordering::Relaxed);
                unsafe { *seg.add(off) }
            })
            .collect()
    }
}

impl<T> Drop for SpmcQueue<T> {
    fn drop(&mut self) {
        for (s, seg) in self.segments.iter().enumerate() {
            let ptr = seg.load(Ordering::Relaxed);
            if !ptr.is_null() {
                let len = segment_len(s);
                unsafe {
                    drop(Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len)));
                }
            }
        }
    }
}

/// Per-worker queues with stealing and epoch-timestamped deduplication.
///
/// `timestamps[el]` records the epoch at which `el` was last pushed (epoch)
/// or popped (epoch + 1); [`WorkContainer::clear`] advances the epoch by 2 so
/// stale marks never alias a later round.
pub struct WorkContainer<T> {
    current: u32,
    timestamps: Vec<AtomicU32>,
    queues: Vec<SpmcQueue<T>>,
}

impl<T: QueueElement> WorkContainer<T> {
    pub fn new(max_num_elements: usize, num_tasks: usize) -> Self {
        Self {
            current: 2,
            timestamps: (0..max_num_elements).map(|_| AtomicU32::new(0)).collect(),
            queues: (0..num_tasks.max(1)).map(|_| SpmcQueue::new()).collect(),
        }
    }

    pub fn num_tasks(&self) -> usize {
        self.queues.len()
    }

    pub fn unsafe_size(&self) -> usize {
        self.queues.iter().map(SpmcQueue::unsafe_size).sum()
    }

    /// Push onto the queue owned by `task_id`. Must be called by that queue's
    /// owning worker.
    pub fn push(&self, el: T, task_id: usize) {
        self.queues[task_id].push_back(el);
        self.timestamps[el.index()].store(self.current, Ordering::Relaxed);
    }

    /// Pop from the local queue, then sweep the peers for work to steal.
    /// Peers are never blocked mid-growth (segments are installed without
    /// fencing readers), so an empty sweep really means no visible work.
    pub fn try_pop(&self, task_id: usize) -> Option<T> {
        if let Some(el) = self.queues[task_id].try_pop_front() {
            self.timestamps[el.index()].store(self.current + 1, Ordering::Relaxed);
            return Some(el);
        }
        for q in &self.queues {
            if let Some(el) = q.try_pop_front() {
                self.timestamps[el.index()].store(self.current + 1, Ordering::Relaxed);
                return Some(el);
            }
        }
        None
    }

    /// True iff `el` went through a full push/pop cycle since the last clear.
    pub fn was_pushed_and_removed(&self, el: T) -> bool {
        self.timestamps[el.index()].load(Ordering::Relaxed) == self.current + 1
    }

    /// Reproducibly shuffle every queue's pending elements.
    pub fn shuffle(&mut self, seed: u64) {
        for (i, q) in self.queues.iter_mut().enumerate() {
            let mut pending = q.pending_mut();
            let mut rng = SmallRng::seed_from_u64(derive_seed(seed, "work-queue", i as u64));
            pending.shuffle(&mut rng);
            q.clear();
            for el in pending {
                q.push_back(el);
            }
        }
    }

    /// Advance the epoch and empty all queues. Near timestamp overflow the
    /// table is reset in parallel.
    pub fn clear(&mut self) {
        if self.current >= u32::MAX - 2 {
            self.timestamps
                .par_iter()
                .for_each(|t| t.store(0, Ordering::Relaxed));
            self.current = 0;
        }
        for q in &mut self.queues {
            q.clear();
        }
        self.current += 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_covers_segment_boundaries() {
        assert_eq!(locate(0), (0, 0));
        assert_eq!(locate(8191), (0, 8191));
        assert_eq!(locate(8192), (1, 0));
        assert_eq!(locate(24575), (1, 16383));
        assert_eq!(locate(24576), (2, 0));
    }

    #[test]
    fn fifo_order_single_thread() {
        let q: SpmcQueue<u32> = SpmcQueue::new();
        for i in 0..100 {
            q.push_back(i);
        }
        for i in 0..100 {
            assert_eq!(q.try_pop_front(), Some(i));
        }
        assert!(q.empty());
        assert_eq!(q.try_pop_front(), None);
    }

    #[test]
    fn push_across_segment_boundary_keeps_elements() {
        let q: SpmcQueue<u32> = SpmcQueue::new();
        let n = 10_000u32;
        for i in 0..n {
            q.push_back(i);
        }
        assert_eq!(q.unsafe_size(), n as usize);
        let mut popped = 0;
        while let Some(el) = q.try_pop_front() {
            assert_eq!(el, popped);
            popped += 1;
        }
        assert_eq!(popped, n);
    }

    #[test]
    fn timestamps_track_push_and_pop() {
        let mut wc: WorkContainer<u32> = WorkContainer::new(16, 2);
        wc.push(5, 0);
        assert!(!wc.was_pushed_and_removed(5));
        assert_eq!(wc.try_pop(1), Some(5)); // stolen from queue 0
        assert!(wc.was_pushed_and_removed(5));
        wc.clear();
        assert!(!wc.was_pushed_and_removed(5));
    }

    #[test]
    fn shuffle_is_seed_reproducible() {
        let mk = || {
            let mut wc: WorkContainer<u32> = WorkContainer::new(64, 1);
            for i in 0..64 {
                wc.push(i, 0);
            }
            wc.shuffle(77);
            let mut out = Vec::new();
            while let Some(el) = wc.try_pop(0) {
                out.push(el);
            }
            out
        };
        let a = mk();
        assert_eq!(a, mk());
        assert_ne!(a, (0..64).collect::<Vec<_>>());
    }
}
