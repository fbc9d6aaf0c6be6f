//! Pseudo-random bit and uniform-sample source
//!
//! Every component that needs randomness owns its own `BitSource`, so batches
//! running on different threads never share RNG state.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;

#[derive(Debug, Clone)]
pub struct BitSource {
    rng: StdRng,
}

impl BitSource {
    /// Seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic source, used by tests and reproducible experiments
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Derive an independent child source from this one's stream.
    pub fn fork(&mut self) -> Self {
        Self::seeded(self.rng.gen())
    }

    /// `count` independent fair bits, each 0 or 1.
    pub fn bits(&mut self, count: usize) -> Vec<u8> {
        (0..count).map(|_| u8::from(self.rng.gen::<bool>())).collect()
    }

    /// Uniform draw in `[0, 1)`
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform phase in `[0, 2π)`
    pub fn phase(&mut self) -> f64 {
        self.uniform() * TAU
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

impl Default for BitSource {
    fn default() -> Self {
        Self::from_entropy()
    }
}
