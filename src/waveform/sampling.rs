//! Deterministic per-class sampling
//!
//! Each class gets its own ChaCha8 stream seeded from the configured seed, the
//! class id and the identities of the sources that contributed rows to it.
//! `FxHasher` is unseeded, so the derived seed is stable across runs.

use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Identity of a contributing source: `(name, size_bytes)`
pub(crate) type SourceIdentity<'a> = (&'a str, u64);

/// Seed for one class's sampling stream
pub(crate) fn class_seed(seed: u64, class: i64, contributors: &[SourceIdentity<'_>]) -> u64 {
    let mut hasher = FxHasher::default();
    seed.hash(&mut hasher);
    class.hash(&mut hasher);
    for (name, size) in contributors {
        name.hash(&mut hasher);
        size.hash(&mut hasher);
    }
    hasher.finish()
}

/// Draw `min(k, population)` distinct ordinals from `0..population`, ascending
pub(crate) fn sample_ordinals(class_seed: u64, population: usize, k: usize) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(class_seed);
    let mut picked = index::sample(&mut rng, population, k.min(population)).into_vec();
    picked.sort_unstable();
    picked
}
