use crate::bits::BitSource;
use crate::error::{EcholagError, Result};
use crate::signal::{energy, Signal};
use num_complex::Complex64;
use rand_distr::{Distribution, Normal};

/// Additive white Gaussian noise at a target SNR
///
/// SNR is measured against the signal's total energy `E = Σ|s|²`: the expected
/// total noise energy added over the whole buffer is `E / 10^(snr_db/10)`.
/// Each sample therefore gets complex noise of variance `E / (N · snr_linear)`,
/// split evenly between I and Q.
#[derive(Debug, Clone)]
pub struct NoiseInjector {
    source: BitSource,
}

impl NoiseInjector {
    pub fn new(source: BitSource) -> Self {
        Self { source }
    }

    /// Add noise to `samples` in place.
    pub fn add_noise(&mut self, samples: &mut [Complex64], snr_db: f64) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let sigma = component_sigma(energy(samples), samples.len(), snr_db)?;
        if sigma == 0.0 {
            return Ok(());
        }

        let normal = Normal::new(0.0, sigma).map_err(|_| EcholagError::InvalidSnr { snr_db })?;
        let rng = self.source.rng_mut();
        for sample in samples.iter_mut() {
            *sample += Complex64::new(normal.sample(rng), normal.sample(rng));
        }
        Ok(())
    }

    /// Return-new-value form of [`NoiseInjector::add_noise`].
    pub fn inject_noise(&mut self, mut signal: Signal, snr_db: f64) -> Result<Signal> {
        self.add_noise(signal.samples_mut(), snr_db)?;
        Ok(signal)
    }
}

/// Per-component noise deviation for a buffer of `len` samples with `energy`.
pub fn component_sigma(energy: f64, len: usize, snr_db: f64) -> Result<f64> {
    if snr_db.is_nan() {
        return Err(EcholagError::InvalidSnr { snr_db });
    }
    if len == 0 || energy == 0.0 {
        return Ok(0.0);
    }
    // sqrt(E / (2·N·10^(snr/10))) with the SNR factor applied in amplitude
    let sigma = (energy / len as f64 / 2.0).sqrt() * 10f64.powf(-snr_db / 20.0);
    if !sigma.is_finite() {
        return Err(EcholagError::InvalidSnr { snr_db });
    }
    Ok(sigma)
}

/// One-shot noise injection with an entropy-seeded source
pub fn inject_noise(signal: Signal, snr_db: f64) -> Result<Signal> {
    NoiseInjector::new(BitSource::from_entropy()).inject_noise(signal, snr_db)
}
