use clap::{Args, Parser, Subcommand};
use echolag_core::export::{
    append_real, error_rate_file_name, save_complex, save_real, CORRELATION_FILE, REFERENCE_FILE,
    WINDOW_FILE,
};
use echolag_core::{
    run_concurrent, snr_sweep, EcholagError, Experiment, ExperimentConfig, ExperimentStats,
    ModulationConfig, ModulationType, SnrGrid,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Parser)]
#[command(name = "echolag")]
#[command(about = "Delay estimation of noisy keyed signals by normalized cross-correlation")]
struct Cli {
    /// Log every trial (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Signal parameters shared by `research` and `sweep`
#[derive(Args)]
struct SignalArgs {
    /// Sample rate in Hz
    #[arg(value_name = "FD", required_unless_present = "config")]
    sample_rate: Option<f64>,

    /// Carrier frequency in Hz
    #[arg(value_name = "F", required_unless_present = "config")]
    carrier_freq: Option<f64>,

    /// Number of information bits
    #[arg(value_name = "N", required_unless_present = "config")]
    num_info_bits: Option<usize>,

    /// Symbol duration scale (seconds per bit)
    #[arg(value_name = "VEL", required_unless_present = "config")]
    info_velocity: Option<f64>,
}

impl SignalArgs {
    fn experiment(
        &self,
        reference_snr_db: Option<f64>,
        window_snr_db: Option<f64>,
        window_percent: Option<f64>,
    ) -> Result<ExperimentConfig, CliError> {
        Ok(ExperimentConfig {
            modulation: ModulationConfig {
                sample_rate: required(self.sample_rate, "FD")?,
                carrier_freq: required(self.carrier_freq, "F")?,
                num_info_bits: required(self.num_info_bits, "N")?,
                info_velocity: required(self.info_velocity, "VEL")?,
                modulation: ModulationType::Amplitude,
            },
            reference_snr_db: required(reference_snr_db, "SNR1")?,
            window_snr_db: required(window_snr_db, "SNR2")?,
            window_fraction: required(window_percent, "SIG_SIZE")? / 100.0,
            seed: None,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one trial and dump reference, window and correlation curve
    #[command(allow_negative_numbers = true)]
    Demo {
        /// Sample rate in Hz
        #[arg(value_name = "FD")]
        sample_rate: f64,

        /// Carrier frequency in Hz
        #[arg(value_name = "F")]
        carrier_freq: f64,

        /// Number of information bits
        #[arg(value_name = "N")]
        num_info_bits: usize,

        /// Symbol duration scale (seconds per bit)
        #[arg(value_name = "VEL")]
        info_velocity: f64,

        /// Window offset into the reference, in samples
        #[arg(value_name = "DT")]
        delay: usize,

        /// SNR of the reference in dB
        #[arg(value_name = "SNR1")]
        reference_snr_db: f64,

        /// SNR of the window in dB
        #[arg(value_name = "SNR2")]
        window_snr_db: f64,

        /// Modulation: 0|am|amplitude, 1|pm|phase, 2|fm|frequency
        #[arg(value_name = "TYPE")]
        modulation: ModulationType,

        /// Window length in percent of the reference
        #[arg(value_name = "SIG_SIZE")]
        window_percent: f64,

        /// Directory receiving the text files
        #[arg(long, default_value = "data")]
        out_dir: PathBuf,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run all modulations concurrently and append their error rates
    #[command(allow_negative_numbers = true)]
    Research {
        #[command(flatten)]
        signal: SignalArgs,

        /// SNR of the reference in dB
        #[arg(value_name = "SNR1", required_unless_present = "config")]
        reference_snr_db: Option<f64>,

        /// SNR of the window in dB
        #[arg(value_name = "SNR2", required_unless_present = "config")]
        window_snr_db: Option<f64>,

        /// Trials per modulation
        #[arg(value_name = "N_RUNS", required_unless_present = "config")]
        num_trials: Option<usize>,

        /// Window length in percent of the reference
        #[arg(value_name = "SIG_SIZE", required_unless_present = "config")]
        window_percent: Option<f64>,

        /// JSON run file (experiment config plus `num_trials`) replacing the positional arguments
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "data")]
        out_dir: PathBuf,

        /// Seed for reproducible runs, overrides the run file's seed
        #[arg(long)]
        seed: Option<u64>,

        /// Print a JSON summary on stdout
        #[arg(long)]
        json: bool,
    },

    /// Sweep the window SNR and rewrite the error-rate series
    #[command(allow_negative_numbers = true)]
    Sweep {
        #[command(flatten)]
        signal: SignalArgs,

        /// Fixed SNR of the reference in dB
        #[arg(value_name = "SNR_STATIC", required_unless_present = "config")]
        reference_snr_db: Option<f64>,

        #[arg(value_name = "SNR_MIN", required_unless_present = "config")]
        snr_min: Option<f64>,

        #[arg(value_name = "SNR_MAX", required_unless_present = "config")]
        snr_max: Option<f64>,

        #[arg(value_name = "N_POINTS", required_unless_present = "config")]
        points: Option<usize>,

        #[arg(value_name = "N_RUNS", required_unless_present = "config")]
        num_trials: Option<usize>,

        #[arg(value_name = "SIG_SIZE", required_unless_present = "config")]
        window_percent: Option<f64>,

        /// JSON run file (experiment config, `num_trials` and `grid`) replacing the positional arguments
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "data")]
        out_dir: PathBuf,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        json: bool,
    },
}

/// Contents of a `--config` file
#[derive(Debug, Deserialize)]
struct RunFile {
    #[serde(flatten)]
    experiment: ExperimentConfig,
    num_trials: usize,
    /// Window SNR grid, read by `sweep` only
    #[serde(default)]
    grid: Option<SnrGrid>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] EcholagError),

    #[error("failed to read {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("config {0} has no sweep grid")]
    MissingGrid(PathBuf),

    #[error("missing argument {0}")]
    MissingArgument(&'static str),

    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode summary: {0}")]
    Summary(#[from] serde_json::Error),

    #[error("{0} of {1} modulation workers failed")]
    WorkersFailed(usize, usize),
}

#[derive(Serialize)]
struct SummaryRow {
    modulation: ModulationType,
    window_snr_db: f64,
    #[serde(flatten)]
    stats: ExperimentStats,
    error_rate: f64,
}

impl SummaryRow {
    fn new(modulation: ModulationType, window_snr_db: f64, stats: ExperimentStats) -> Self {
        Self {
            modulation,
            window_snr_db,
            stats,
            error_rate: stats.error_rate(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Demo {
            sample_rate,
            carrier_freq,
            num_info_bits,
            info_velocity,
            delay,
            reference_snr_db,
            window_snr_db,
            modulation,
            window_percent,
            out_dir,
            seed,
        } => {
            let config = ExperimentConfig {
                modulation: ModulationConfig {
                    sample_rate,
                    carrier_freq,
                    num_info_bits,
                    info_velocity,
                    modulation,
                },
                reference_snr_db,
                window_snr_db,
                window_fraction: window_percent / 100.0,
                seed,
            };
            demo_command(&config, delay, &out_dir)?
        }
        Commands::Research {
            signal,
            reference_snr_db,
            window_snr_db,
            num_trials,
            window_percent,
            config,
            out_dir,
            seed,
            json,
        } => {
            let (base, num_trials) = match config {
                Some(path) => {
                    let file = load_run_file(&path)?;
                    (file.experiment, file.num_trials)
                }
                None => (
                    signal.experiment(reference_snr_db, window_snr_db, window_percent)?,
                    required(num_trials, "N_RUNS")?,
                ),
            };
            research_command(&with_seed(base, seed), num_trials, &out_dir, json)?
        }
        Commands::Sweep {
            signal,
            reference_snr_db,
            snr_min,
            snr_max,
            points,
            num_trials,
            window_percent,
            config,
            out_dir,
            seed,
            json,
        } => {
            let (base, grid, num_trials) = match config {
                Some(path) => {
                    let file = load_run_file(&path)?;
                    let grid = file.grid.ok_or(CliError::MissingGrid(path))?;
                    (file.experiment, grid, file.num_trials)
                }
                None => {
                    let grid = SnrGrid {
                        min_db: required(snr_min, "SNR_MIN")?,
                        max_db: required(snr_max, "SNR_MAX")?,
                        points: required(points, "N_POINTS")?,
                    };
                    (
                        signal.experiment(reference_snr_db, snr_min, window_percent)?,
                        grid,
                        required(num_trials, "N_RUNS")?,
                    )
                }
            };
            sweep_command(&with_seed(base, seed), &grid, num_trials, &out_dir, json)?
        }
    }

    Ok(())
}

fn required<T>(value: Option<T>, name: &'static str) -> Result<T, CliError> {
    value.ok_or(CliError::MissingArgument(name))
}

/// A `--seed` on the command line wins over the one in the run file.
fn with_seed(config: ExperimentConfig, seed: Option<u64>) -> ExperimentConfig {
    ExperimentConfig {
        seed: seed.or(config.seed),
        ..config
    }
}

fn load_run_file(path: &Path) -> Result<RunFile, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    let file = serde_json::from_str(&text).map_err(|source| CliError::ParseConfig {
        path: path.to_path_buf(),
        source,
    })?;
    info!("loaded run file {}", path.display());
    Ok(file)
}

fn prepare_out_dir(out_dir: &Path) -> Result<(), CliError> {
    fs::create_dir_all(out_dir).map_err(|source| CliError::OutputDir {
        path: out_dir.to_path_buf(),
        source,
    })
}

fn demo_command(config: &ExperimentConfig, delay: usize, out_dir: &Path) -> Result<(), CliError> {
    let mut experiment = Experiment::new(*config)?;
    let record = experiment.run_trial_at(delay)?;
    println!(
        "{}: window of {} samples at {}, estimated {} (peak {:.4}), {}",
        config.modulation.modulation,
        record.window.len(),
        record.outcome.true_delay,
        record.outcome.estimated_delay,
        record.correlation.peak_value(),
        if record.outcome.success { "detected" } else { "missed" }
    );

    prepare_out_dir(out_dir)?;
    save_complex(&out_dir.join(REFERENCE_FILE), &record.reference)?;
    save_complex(&out_dir.join(WINDOW_FILE), &record.window)?;
    save_real(&out_dir.join(CORRELATION_FILE), &record.correlation.normalized)?;
    println!("Wrote {} {} {} to {}", REFERENCE_FILE, WINDOW_FILE, CORRELATION_FILE, out_dir.display());
    Ok(())
}

fn research_command(
    base: &ExperimentConfig,
    num_trials: usize,
    out_dir: &Path,
    json: bool,
) -> Result<(), CliError> {
    base.validate()?;
    prepare_out_dir(out_dir)?;

    let configs = base.for_each_modulation();
    let reports = run_concurrent(&configs, num_trials);

    let mut rows = Vec::new();
    let mut failed = 0;
    for report in reports {
        match report.result {
            Ok(stats) => {
                append_real(&out_dir.join(error_rate_file_name(report.modulation)), stats.error_rate())?;
                if !json {
                    println!(
                        "{}: {}/{} detected, error rate {:.4}",
                        report.modulation,
                        stats.success_count,
                        stats.total_trials,
                        stats.error_rate()
                    );
                }
                rows.push(SummaryRow::new(report.modulation, base.window_snr_db, stats));
            }
            Err(e) => {
                eprintln!("{}: {}", report.modulation, e);
                failed += 1;
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }
    if failed > 0 {
        return Err(CliError::WorkersFailed(failed, configs.len()));
    }
    Ok(())
}

fn sweep_command(
    base: &ExperimentConfig,
    grid: &SnrGrid,
    num_trials: usize,
    out_dir: &Path,
    json: bool,
) -> Result<(), CliError> {
    base.validate()?;
    prepare_out_dir(out_dir)?;

    let snr_values = grid.values();
    info!(
        "sweeping window SNR over {} points from {} dB",
        snr_values.len(),
        grid.min_db
    );
    let series = snr_sweep(base, &snr_values, num_trials);

    let mut rows = Vec::new();
    let mut failed = 0;
    for s in &series {
        let error_rates: Vec<f64> = s.points.iter().map(|(_, stats)| stats.error_rate()).collect();
        save_real(&out_dir.join(error_rate_file_name(s.modulation)), &error_rates)?;

        for &(snr_db, stats) in &s.points {
            if !json {
                println!(
                    "{} @ {:.2} dB: error rate {:.4}",
                    s.modulation,
                    snr_db,
                    stats.error_rate()
                );
            }
            rows.push(SummaryRow::new(s.modulation, snr_db, stats));
        }
        if let Some(e) = &s.failure {
            warn!("{} series stopped after {} points", s.modulation, s.points.len());
            eprintln!("{}: {}", s.modulation, e);
            failed += 1;
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }
    if failed > 0 {
        return Err(CliError::WorkersFailed(failed, series.len()));
    }
    Ok(())
}
