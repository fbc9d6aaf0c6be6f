//! Monte-Carlo delay detection experiments
//!
//! A trial generates a reference signal, cuts a randomly delayed window out of
//! it, adds noise to both at their own SNRs and correlates them. The trial
//! succeeds when the estimated delay lands within one symbol of the true one.
//!
//! [`run_concurrent`] fans out one scoped thread per configuration. Workers own
//! their generator, noise injectors and correlation engine; the FFT lock in
//! [`crate::fft_correlation`] is the only thing they share. A worker that
//! fails or panics only loses its own report.

use crate::bits::BitSource;
use crate::error::{EcholagError, Result};
use crate::fft_correlation::{CorrelationEngine, CorrelationResult};
use crate::modulation::{ModulationConfig, ModulationType, SignalModulator};
use crate::noise::NoiseInjector;
use crate::signal::Signal;
use crate::window::{extract, extract_random, window_len};
use crate::{DEFAULT_SNR_DB, DEFAULT_WINDOW_FRACTION};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

fn default_window_fraction() -> f64 {
    DEFAULT_WINDOW_FRACTION
}

/// Everything one batch of trials needs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub modulation: ModulationConfig,
    /// SNR applied to the full reference signal
    pub reference_snr_db: f64,
    /// SNR applied to the extracted window
    pub window_snr_db: f64,
    /// Window length as a fraction of the reference length
    #[serde(default = "default_window_fraction")]
    pub window_fraction: f64,
    /// Fixed seed for reproducible batches, entropy when `None`
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self::new(ModulationConfig::default())
    }
}

impl ExperimentConfig {
    pub fn new(modulation: ModulationConfig) -> Self {
        Self {
            modulation,
            reference_snr_db: DEFAULT_SNR_DB,
            window_snr_db: DEFAULT_SNR_DB,
            window_fraction: DEFAULT_WINDOW_FRACTION,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.modulation.validate()?;
        if !(self.window_fraction > 0.0 && self.window_fraction <= 1.0) {
            return Err(EcholagError::InvalidFraction(self.window_fraction));
        }
        for snr_db in [self.reference_snr_db, self.window_snr_db] {
            if snr_db.is_nan() {
                return Err(EcholagError::InvalidSnr { snr_db });
            }
        }
        Ok(())
    }

    /// Same experiment under another modulation, with a seed of its own
    pub fn with_modulation(&self, modulation: ModulationType) -> Self {
        Self {
            modulation: self.modulation.with_modulation(modulation),
            seed: derive_seed(self.seed, modulation as u64 + 1),
            ..*self
        }
    }

    /// One configuration per modulation type
    pub fn for_each_modulation(&self) -> Vec<ExperimentConfig> {
        ModulationType::ALL
            .iter()
            .map(|&m| self.with_modulation(m))
            .collect()
    }
}

fn derive_seed(seed: Option<u64>, salt: u64) -> Option<u64> {
    seed.map(|s| s ^ salt.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrialOutcome {
    pub estimated_delay: isize,
    pub true_delay: usize,
    pub success: bool,
}

/// Signals and correlation curve behind one [`TrialOutcome`]
#[derive(Debug, Clone)]
pub struct TrialRecord {
    /// Noisy reference
    pub reference: Signal,
    /// Noisy window
    pub window: Signal,
    pub correlation: CorrelationResult,
    pub outcome: TrialOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExperimentStats {
    pub total_trials: usize,
    pub success_count: usize,
    pub success_rate: f64,
}

impl ExperimentStats {
    pub fn record(&mut self, outcome: &TrialOutcome) {
        self.total_trials += 1;
        if outcome.success {
            self.success_count += 1;
        }
        self.success_rate = self.success_count as f64 / self.total_trials as f64;
    }

    /// Fraction of trials that missed the delay
    pub fn error_rate(&self) -> f64 {
        if self.total_trials == 0 {
            return 0.0;
        }
        1.0 - self.success_rate
    }
}

/// Long-lived trial runner for one configuration
#[derive(Debug)]
pub struct Experiment {
    config: ExperimentConfig,
    modulator: SignalModulator,
    reference_noise: NoiseInjector,
    window_noise: NoiseInjector,
    placement: BitSource,
    engine: CorrelationEngine,
    window_len: usize,
}

impl Experiment {
    pub fn new(config: ExperimentConfig) -> Result<Self> {
        config.validate()?;

        let mut master = match config.seed {
            Some(seed) => BitSource::seeded(seed),
            None => BitSource::from_entropy(),
        };
        let modulator = SignalModulator::new(config.modulation, master.fork())?;
        let window_len = window_len(modulator.signal_len(), config.window_fraction)?;
        let engine = CorrelationEngine::with_capacity(modulator.signal_len(), window_len);

        Ok(Self {
            config,
            modulator,
            reference_noise: NoiseInjector::new(master.fork()),
            window_noise: NoiseInjector::new(master.fork()),
            placement: master.fork(),
            engine,
            window_len,
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn samples_per_bit(&self) -> usize {
        self.modulator.samples_per_bit()
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn run_trial(&mut self) -> Result<TrialOutcome> {
        Ok(self.run_trial_recorded()?.outcome)
    }

    /// Random-delay trial keeping its signals and correlation curve
    pub fn run_trial_recorded(&mut self) -> Result<TrialRecord> {
        self.trial(None)
    }

    /// Trial with the window cut at a caller-chosen delay
    pub fn run_trial_at(&mut self, delay: usize) -> Result<TrialRecord> {
        self.trial(Some(delay))
    }

    fn trial(&mut self, delay: Option<usize>) -> Result<TrialRecord> {
        let reference = self.modulator.generate()?;
        let (window, true_delay) = match delay {
            Some(delay) => (extract(&reference, delay, self.window_len)?, delay),
            None => extract_random(&reference, self.window_len, self.placement.uniform())?,
        };

        let reference = self
            .reference_noise
            .inject_noise(reference, self.config.reference_snr_db)?;
        let window = self
            .window_noise
            .inject_noise(window, self.config.window_snr_db)?;

        let correlation = self.engine.correlate(&reference, &window)?;
        let estimated_delay = correlation.estimated_delay();
        let miss = (estimated_delay - true_delay as isize).unsigned_abs();
        let outcome = TrialOutcome {
            estimated_delay,
            true_delay,
            success: miss < self.samples_per_bit(),
        };
        debug!(
            "{} trial: true {} estimated {} peak {:.3}",
            self.config.modulation.modulation,
            true_delay,
            estimated_delay,
            correlation.peak_value()
        );

        Ok(TrialRecord {
            reference,
            window,
            correlation,
            outcome,
        })
    }

    pub fn run(&mut self, num_trials: usize) -> Result<ExperimentStats> {
        self.run_until(num_trials, &AtomicBool::new(false))
    }

    /// Run a batch, checking `cancel` between trials.
    pub fn run_until(&mut self, num_trials: usize, cancel: &AtomicBool) -> Result<ExperimentStats> {
        let mut stats = ExperimentStats::default();
        for _ in 0..num_trials {
            if cancel.load(Ordering::Relaxed) {
                return Err(EcholagError::Cancelled {
                    completed: stats.total_trials,
                });
            }
            let outcome = self.run_trial()?;
            stats.record(&outcome);
        }
        info!(
            "{} batch done: {}/{} detected ({:.3})",
            self.config.modulation.modulation,
            stats.success_count,
            stats.total_trials,
            stats.success_rate
        );
        Ok(stats)
    }
}

/// Run `num_trials` independent trials of one configuration.
pub fn run_experiment(config: &ExperimentConfig, num_trials: usize) -> Result<ExperimentStats> {
    Experiment::new(*config)?.run(num_trials)
}

/// Outcome of one concurrent worker
#[derive(Debug)]
pub struct WorkerReport {
    pub modulation: ModulationType,
    pub result: Result<ExperimentStats>,
}

/// One worker thread per configuration, joined before returning.
///
/// Reports come back in the order of `configs`.
pub fn run_concurrent(configs: &[ExperimentConfig], num_trials: usize) -> Vec<WorkerReport> {
    run_concurrent_until(configs, num_trials, &AtomicBool::new(false))
}

pub fn run_concurrent_until(
    configs: &[ExperimentConfig],
    num_trials: usize,
    cancel: &AtomicBool,
) -> Vec<WorkerReport> {
    thread::scope(|scope| {
        let handles: Vec<_> = configs
            .iter()
            .map(|config| {
                let handle = thread::Builder::new()
                    .name(format!("echolag-{}", config.modulation.modulation))
                    .spawn_scoped(scope, move || -> Result<ExperimentStats> {
                        Experiment::new(*config)?.run_until(num_trials, cancel)
                    });
                (config.modulation.modulation, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(modulation, handle)| {
                let result = match handle {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or_else(|_| Err(EcholagError::WorkerPanicked(modulation.to_string()))),
                    Err(e) => Err(EcholagError::Io(e)),
                };
                if let Err(e) = &result {
                    warn!("{} worker failed: {}", modulation, e);
                }
                WorkerReport { modulation, result }
            })
            .collect()
    })
}

/// Evenly spaced SNR values `min + i·(max - min)/points` for `i < points`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnrGrid {
    pub min_db: f64,
    pub max_db: f64,
    pub points: usize,
}

impl SnrGrid {
    pub fn values(&self) -> Vec<f64> {
        if self.points == 0 {
            return Vec::new();
        }
        let step = (self.max_db - self.min_db) / self.points as f64;
        (0..self.points)
            .map(|i| self.min_db + i as f64 * step)
            .collect()
    }
}

/// Success rate against window SNR for one modulation
#[derive(Debug)]
pub struct SweepSeries {
    pub modulation: ModulationType,
    /// `(window SNR, stats)` for every grid point evaluated
    pub points: Vec<(f64, ExperimentStats)>,
    /// Set when a worker failed; later grid points are skipped for this series
    pub failure: Option<EcholagError>,
}

/// Evaluate every modulation of `base` at each window SNR of `snr_values`.
///
/// The reference SNR stays at `base.reference_snr_db`. Each grid point runs
/// the modulations concurrently.
pub fn snr_sweep(base: &ExperimentConfig, snr_values: &[f64], num_trials: usize) -> Vec<SweepSeries> {
    let mut series: Vec<SweepSeries> = ModulationType::ALL
        .iter()
        .map(|&modulation| SweepSeries {
            modulation,
            points: Vec::with_capacity(snr_values.len()),
            failure: None,
        })
        .collect();

    for (index, &snr_db) in snr_values.iter().enumerate() {
        let point = ExperimentConfig {
            window_snr_db: snr_db,
            seed: derive_seed(base.seed, 1000 + index as u64),
            ..*base
        };
        let configs: Vec<ExperimentConfig> = point
            .for_each_modulation()
            .into_iter()
            .filter(|c| {
                series
                    .iter()
                    .any(|s| s.modulation == c.modulation.modulation && s.failure.is_none())
            })
            .collect();
        if configs.is_empty() {
            break;
        }

        info!("sweep point {}/{}: window SNR {:.2} dB", index + 1, snr_values.len(), snr_db);
        for report in run_concurrent(&configs, num_trials) {
            let Some(entry) = series.iter_mut().find(|s| s.modulation == report.modulation) else {
                continue;
            };
            match report.result {
                Ok(stats) => entry.points.push((snr_db, stats)),
                Err(e) => entry.failure = Some(e),
            }
        }
    }

    series
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(modulation: ModulationType, snr_db: f64, seed: u64) -> ExperimentConfig {
        ExperimentConfig {
            modulation: ModulationConfig {
                sample_rate: 1.0,
                carrier_freq: 0.25,
                num_info_bits: 40,
                info_velocity: 10.0,
                modulation,
            },
            reference_snr_db: snr_db,
            window_snr_db: snr_db,
            window_fraction: DEFAULT_WINDOW_FRACTION,
            seed: Some(seed),
        }
    }

    #[test]
    fn test_stats_accumulate() {
        let mut stats = ExperimentStats::default();
        assert_eq!(stats.error_rate(), 0.0);

        let hit = TrialOutcome { estimated_delay: 5, true_delay: 5, success: true };
        let miss = TrialOutcome { estimated_delay: -3, true_delay: 40, success: false };
        stats.record(&hit);
        stats.record(&hit);
        stats.record(&hit);
        stats.record(&miss);

        assert_eq!(stats.total_trials, 4);
        assert_eq!(stats.success_count, 3);
        assert!((stats.success_rate - 0.75).abs() < 1e-12);
        assert!((stats.error_rate() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_config_validation() {
        let config = small_config(ModulationType::Phase, 10.0, 1);
        assert!(config.validate().is_ok());

        let bad = ExperimentConfig { window_fraction: 0.0, ..config };
        assert!(matches!(bad.validate(), Err(EcholagError::InvalidFraction(_))));

        let bad = ExperimentConfig { window_snr_db: f64::NAN, ..config };
        assert!(matches!(bad.validate(), Err(EcholagError::InvalidSnr { .. })));

        let mut bad = config;
        bad.modulation.carrier_freq = 0.75;
        assert!(matches!(Experiment::new(bad), Err(EcholagError::Config(_))));
    }

    #[test]
    fn test_noise_free_trial_at_fixed_delay() {
        let config = small_config(ModulationType::Phase, f64::INFINITY, 21);
        let mut experiment = Experiment::new(config).unwrap();
        assert_eq!(experiment.window_len(), 120);
        assert_eq!(experiment.samples_per_bit(), 10);

        let record = experiment.run_trial_at(137).unwrap();
        assert_eq!(record.outcome.true_delay, 137);
        assert_eq!(record.outcome.estimated_delay, 137);
        assert!(record.outcome.success);
        assert_eq!(record.window.samples(), &record.reference.samples()[137..257]);
    }

    #[test]
    fn test_fixed_delay_out_of_range() {
        let mut experiment = Experiment::new(small_config(ModulationType::Amplitude, 10.0, 2)).unwrap();
        assert!(matches!(
            experiment.run_trial_at(281),
            Err(EcholagError::WindowOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_high_snr_batch_detects() {
        for modulation in ModulationType::ALL {
            let stats = run_experiment(&small_config(modulation, 20.0, 5), 20).unwrap();
            assert_eq!(stats.total_trials, 20);
            assert!(stats.success_rate >= 0.75, "{}: {}", modulation, stats.success_rate);
        }
    }

    #[test]
    fn test_seeded_batches_repeat() {
        let config = small_config(ModulationType::Frequency, -5.0, 77);
        let a = run_experiment(&config, 15).unwrap();
        let b = run_experiment(&config, 15).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_concurrent_reports_in_order() {
        let base = small_config(ModulationType::Amplitude, 20.0, 9);
        let configs = base.for_each_modulation();
        let reports = run_concurrent(&configs, 10);

        assert_eq!(reports.len(), 3);
        for (report, expected) in reports.iter().zip(ModulationType::ALL) {
            assert_eq!(report.modulation, expected);
            let stats = report.result.as_ref().unwrap();
            assert_eq!(stats.total_trials, 10);
        }
    }

    #[test]
    fn test_failed_worker_is_isolated() {
        let good = small_config(ModulationType::Phase, 20.0, 3);
        let mut bad = small_config(ModulationType::Frequency, 20.0, 4);
        bad.modulation.num_info_bits = 0;

        let reports = run_concurrent(&[good, bad], 5);
        assert!(reports[0].result.is_ok());
        assert!(matches!(reports[1].result, Err(EcholagError::Config(_))));
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = AtomicBool::new(true);
        let mut experiment = Experiment::new(small_config(ModulationType::Phase, 10.0, 6)).unwrap();
        assert!(matches!(
            experiment.run_until(5, &cancel),
            Err(EcholagError::Cancelled { completed: 0 })
        ));
    }

    #[test]
    fn test_snr_grid_values() {
        let grid = SnrGrid { min_db: 0.0, max_db: 20.0, points: 10 };
        let values = grid.values();
        assert_eq!(values.len(), 10);
        assert_eq!(values[0], 0.0);
        assert!((values[9] - 18.0).abs() < 1e-12);
        assert!(SnrGrid { min_db: 0.0, max_db: 1.0, points: 0 }.values().is_empty());
    }

    #[test]
    fn test_sweep_covers_every_modulation() {
        let base = small_config(ModulationType::Amplitude, 20.0, 12);
        let series = snr_sweep(&base, &[10.0, 20.0], 4);
        assert_eq!(series.len(), 3);
        for s in &series {
            assert!(s.failure.is_none());
            assert_eq!(s.points.len(), 2);
            assert_eq!(s.points[0].0, 10.0);
            assert_eq!(s.points[1].1.total_trials, 4);
        }
    }

    #[test]
    fn test_config_json_defaults() {
        let json = r#"{
            "modulation": {
                "sample_rate": 20.0,
                "carrier_freq": 10.0,
                "num_info_bits": 100,
                "info_velocity": 10.0,
                "modulation": "phase"
            },
            "reference_snr_db": 10.0,
            "window_snr_db": 5.0
        }"#;
        let config: ExperimentConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.window_fraction, DEFAULT_WINDOW_FRACTION);
        assert_eq!(config.seed, None);
        assert_eq!(config.modulation.modulation, ModulationType::Phase);
        assert!(config.validate().is_ok());
    }
}
