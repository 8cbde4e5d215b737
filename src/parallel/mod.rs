//! Parallel runtime helpers: deterministic seed derivation, chunking, and
//! ergonomic wrappers around Rayon thread pools.
//!
//! Determinism-critical components never draw entropy from the OS or from
//! worker identity. Every random decision is derived from the context seed
//! through the stable mixers below, so results are a function of
//! `(input, seed)` alone and in particular do not depend on the thread count.

use rayon::{ThreadPool, ThreadPoolBuilder};

pub mod permutation;
pub mod work_container;

/// Steele/Vigna SplitMix64 mixer used for deterministic seeding.
#[inline]
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Deterministically derive a new 64-bit salt from `(label, extra)`.
///
/// Used to give every pass/round/sub-component its own RNG stream without
/// correlating them.
pub fn derive_seed(global_seed: u64, label: &str, extra: u64) -> u64 {
    let mut h = global_seed ^ 0xA076_1D64_78BD_642F;
    h = splitmix64(h ^ extra.rotate_left(17));
    for &b in label.as_bytes() {
        h = splitmix64(h ^ b as u64);
    }
    h
}

/// Ceiling integer division.
#[inline]
pub const fn idiv_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Half-open bounds of chunk `i` when `n` elements are cut into chunks of
/// `chunk_size`; the last chunk may be short.
#[inline]
pub fn chunk_bounds(i: usize, n: usize, chunk_size: usize) -> (usize, usize) {
    let start = (i * chunk_size).min(n);
    let end = ((i + 1) * chunk_size).min(n);
    (start, end)
}

/// Build a Rayon pool with `num_threads` workers (`None` lets Rayon choose).
pub fn build_pool(num_threads: Option<usize>) -> ThreadPool {
    let mut builder = ThreadPoolBuilder::new();
    if let Some(n) = num_threads {
        builder = builder.num_threads(n);
    }
    builder.build().expect("failed to build thread pool")
}

/// Run `f` inside a pool with a fixed worker count. All Rayon parallelism in
/// `f` uses this pool; the deterministic components produce identical output
/// for every choice of `num_threads`.
pub fn install_with_pool<F, R>(num_threads: Option<usize>, f: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    build_pool(num_threads).install(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splitmix_is_stable() {
        // Fixed points pin the mixer so seed-derived artifacts stay
        // reproducible across releases.
        assert_eq!(splitmix64(0), 0xE220_A839_7B1D_CDAF);
        assert_ne!(splitmix64(1), splitmix64(2));
    }

    #[test]
    fn derive_seed_separates_labels() {
        let s = 42;
        assert_ne!(derive_seed(s, "coarsening", 0), derive_seed(s, "lp", 0));
        assert_ne!(derive_seed(s, "lp", 0), derive_seed(s, "lp", 1));
    }

    #[test]
    fn chunk_bounds_cover_range() {
        let n = 10;
        let cs = 3;
        let mut covered = Vec::new();
        for i in 0..idiv_ceil(n, cs) {
            let (a, b) = chunk_bounds(i, n, cs);
            covered.extend(a..b);
        }
        assert_eq!(covered, (0..n).collect::<Vec<_>>());
    }
}
