//! Source of uniform random integers for weighted selection.
//!
//! Kept behind a trait so resolution can be driven deterministically in tests.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub trait RandomSource: Send + Sync {
    /// Uniform integer in `[low, high]`, both inclusive. Requires `low <= high`.
    fn next_in_range(&self, low: u32, high: u32) -> u32;
}

/// Per-thread OS-seeded generator, used in production
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_in_range(&self, low: u32, high: u32) -> u32 {
        rand::thread_rng().gen_range(low..=high)
    }
}

/// Reproducible generator for tests and simulations
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_in_range(&self, low: u32, high: u32) -> u32 {
        self.rng.lock().gen_range(low..=high)
    }
}
