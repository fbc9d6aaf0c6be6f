use num_complex::Complex64;
use std::ops::Deref;

/// Complex baseband samples with their sample rate carried alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    samples: Vec<Complex64>,
    sample_rate: f64,
}

impl Signal {
    pub fn new(samples: Vec<Complex64>, sample_rate: f64) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[Complex64] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [Complex64] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<Complex64> {
        self.samples
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }

    /// Sum of squared magnitudes
    pub fn energy(&self) -> f64 {
        energy(&self.samples)
    }
}

impl Deref for Signal {
    type Target = [Complex64];

    fn deref(&self) -> &[Complex64] {
        &self.samples
    }
}

impl AsRef<[Complex64]> for Signal {
    fn as_ref(&self) -> &[Complex64] {
        &self.samples
    }
}

pub fn energy(samples: &[Complex64]) -> f64 {
    samples.iter().map(|s| s.norm_sqr()).sum()
}

/// Arithmetic mean; zero for an empty slice.
pub fn mean(samples: &[Complex64]) -> Complex64 {
    if samples.is_empty() {
        return Complex64::new(0.0, 0.0);
    }
    let sum: Complex64 = samples.iter().sum();
    sum / samples.len() as f64
}
