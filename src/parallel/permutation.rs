//! Reproducible bucketed permutations.
//!
//! Deterministic coarsening and refinement evaluate vertices in the order of
//! a seeded permutation that is split into `NUM_BUCKETS` buckets; a
//! sub-round processes a contiguous range of buckets. The permutation is a
//! pure function of `(element set, seed)`: elements are keyed to a bucket by
//! a seeded hash, ordered by `(bucket, element)`, and each bucket is then
//! shuffled with its own derived RNG. No step depends on thread count or
//! scheduling order.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::graph::NodeId;
use crate::parallel::{derive_seed, splitmix64};

/// Number of buckets every permutation is grouped into. Sub-round bounds are
/// expressed in buckets, so this also caps the sub-round count.
pub const NUM_BUCKETS: usize = 256;

/// A permutation of a set of node ids, grouped into [`NUM_BUCKETS`] buckets.
#[derive(Debug, Clone, Default)]
pub struct ParallelPermutation {
    /// The permuted elements, bucket by bucket.
    pub permutation: Vec<NodeId>,
    /// `bucket_bounds[b]..bucket_bounds[b+1]` is the slice of bucket `b`.
    pub bucket_bounds: Vec<usize>,
    /// Position of each element in `permutation`; `usize::MAX` for elements
    /// absent from the permuted set. Used for deterministic tie-breaking.
    positions: Vec<usize>,
}

impl ParallelPermutation {
    #[inline]
    fn bucket_of(seed: u64, el: NodeId) -> usize {
        (splitmix64(seed ^ (el as u64).wrapping_mul(0x9E37_79B1_85EB_CA87)) % NUM_BUCKETS as u64)
            as usize
    }

    /// Permute `[0, n)`.
    pub fn random_grouping(&mut self, n: NodeId, num_tasks: usize, seed: u64) {
        let all: Vec<NodeId> = (0..n).collect();
        self.group_elements(n, &all, num_tasks, seed);
    }

    /// Permute a sorted subset of `[0, n)`. Used with active-node sets;
    /// `elements` must be sorted so the grouping is independent of how the
    /// set was collected.
    pub fn sample_buckets_and_group_by(
        &mut self,
        n: NodeId,
        elements: &[NodeId],
        num_tasks: usize,
        seed: u64,
    ) {
        debug_assert!(elements.windows(2).all(|w| w[0] < w[1]));
        self.group_elements(n, elements, num_tasks, seed);
    }

    fn group_elements(&mut self, n: NodeId, elements: &[NodeId], num_tasks: usize, seed: u64) {
        let m = elements.len();
        let min_len = (m / num_tasks.max(1)).max(1024);

        // Key every element to its bucket, then order by (bucket, element).
        // The sort makes the bucket layout independent of evaluation order.
        let mut keyed: Vec<(u32, NodeId)> = elements
            .par_iter()
            .with_min_len(min_len)
            .map(|&el| (Self::bucket_of(seed, el) as u32, el))
            .collect();
        keyed.par_sort_unstable();

        self.bucket_bounds.clear();
        self.bucket_bounds.resize(NUM_BUCKETS + 1, 0);
        for &(b, _) in &keyed {
            self.bucket_bounds[b as usize + 1] += 1;
        }
        for b in 0..NUM_BUCKETS {
            self.bucket_bounds[b + 1] += self.bucket_bounds[b];
        }

        self.permutation.clear();
        self.permutation.extend(keyed.iter().map(|&(_, el)| el));

        // Shuffle within each bucket with a bucket-derived RNG.
        let bounds = self.bucket_bounds.clone();
        let chunks: Vec<&mut [NodeId]> = {
            let mut rest = self.permutation.as_mut_slice();
            let mut out = Vec::with_capacity(NUM_BUCKETS);
            for b in 0..NUM_BUCKETS {
                let len = bounds[b + 1] - bounds[b];
                let (head, tail) = rest.split_at_mut(len);
                out.push(head);
                rest = tail;
            }
            out
        };
        chunks.into_par_iter().enumerate().for_each(|(b, chunk)| {
            let mut rng = SmallRng::seed_from_u64(derive_seed(seed, "bucket", b as u64));
            chunk.shuffle(&mut rng);
        });

        self.positions.clear();
        self.positions.resize(n as usize, usize::MAX);
        // Sequential write; positions of distinct elements never collide.
        for (pos, &el) in self.permutation.iter().enumerate() {
            self.positions[el as usize] = pos;
        }
    }

    /// Element at permutation position `pos`.
    #[inline]
    pub fn at(&self, pos: usize) -> NodeId {
        self.permutation[pos]
    }

    /// Position of `el` in the permutation, `usize::MAX` if absent.
    #[inline]
    pub fn position_of(&self, el: NodeId) -> usize {
        self.positions[el as usize]
    }

    pub fn len(&self) -> usize {
        self.permutation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permutation.is_empty()
    }
}
