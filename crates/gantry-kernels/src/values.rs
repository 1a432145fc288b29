//! Deterministic input data for the sample pipelines.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seeded generator of uniform floats in `[0, 1)`.
///
/// The same seed always yields the same sequence.
#[derive(Debug, Clone)]
pub struct ValueGenerator {
    rng: StdRng,
}

impl ValueGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Next value in `[0, 1)`.
    pub fn next_value(&mut self) -> f32 {
        self.rng.random::<f32>()
    }

    /// `len` fresh values.
    pub fn vector(&mut self, len: usize) -> Vec<f32> {
        (0..len).map(|_| self.next_value()).collect()
    }
}

/// `[0, 1, 2, ...]` scaled by `step`.
pub fn ramp(len: usize, step: f32) -> Vec<f32> {
    (0..len).map(|i| i as f32 * step).collect()
}
