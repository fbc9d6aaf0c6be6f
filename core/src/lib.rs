//! Delay estimation between a reference signal and a noisy excerpt of it
//!
//! Generates keyed reference signals (amplitude, phase, frequency), cuts a
//! delayed window out of them, buries both in Gaussian noise and recovers the
//! delay with an FFT-accelerated normalized cross-correlation. The experiment
//! harness repeats this Monte-Carlo style, one worker thread per modulation.

pub mod bits;
pub mod error;
pub mod experiment;
pub mod export;
pub mod fft_correlation;
pub mod modulation;
pub mod noise;
pub mod signal;
pub mod window;

pub use bits::BitSource;
pub use error::{ConfigError, EcholagError, Result};
pub use experiment::{
    run_concurrent, run_concurrent_until, run_experiment, snr_sweep, Experiment, ExperimentConfig,
    ExperimentStats, SnrGrid, SweepSeries, TrialOutcome, TrialRecord, WorkerReport,
};
pub use fft_correlation::{correlate, CorrelationEngine, CorrelationResult};
pub use modulation::{generate_modulated_signal, ModulationConfig, ModulationType, SignalModulator};
pub use noise::{inject_noise, NoiseInjector};
pub use num_complex::Complex64;
pub use signal::Signal;
pub use window::{extract, extract_delayed_window, extract_random};

// Trial configuration
pub const DEFAULT_WINDOW_FRACTION: f64 = 0.3; // window length relative to the reference
pub const DEFAULT_SNR_DB: f64 = 10.0;

// Correlation: lags whose normalization energy falls below this are zeroed
pub const ENERGY_FLOOR: f64 = 1e-12;

// Narrowband constraint: carrier cycles that must fit into one symbol
pub const NARROWBAND_MIN_CYCLES_PER_BIT: f64 = 1.0;
