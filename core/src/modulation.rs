use crate::bits::BitSource;
use crate::error::{ConfigError, EcholagError, Result};
use crate::signal::Signal;
use crate::NARROWBAND_MIN_CYCLES_PER_BIT;
use log::debug;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

// Keying schemes
//
// Every scheme runs a single phase accumulator wrapped to [0, 2π):
// - Amplitude: (1 + bit)·cos(phase), carrier step fixed
// - Phase:     ±cos(phase) + j·±sin(phase), two bits per symbol pick the signs
// - Frequency: cos(phase), step switches between mark (bit 1) and space (bit 0),
//   both tones kept below Nyquist (see ModulationConfig::fsk_tones)
//
// A symbol lasts `info_velocity · sample_rate` samples (rounded), so the
// reference signal holds `num_info_bits` symbols.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulationType {
    Amplitude,
    Phase,
    Frequency,
}

impl ModulationType {
    pub const ALL: [ModulationType; 3] = [
        ModulationType::Amplitude,
        ModulationType::Phase,
        ModulationType::Frequency,
    ];

    /// Numeric identifier accepted on the command line (0 = AM, 1 = PM, 2 = FM)
    pub fn from_index(index: u32) -> std::result::Result<Self, ConfigError> {
        match index {
            0 => Ok(ModulationType::Amplitude),
            1 => Ok(ModulationType::Phase),
            2 => Ok(ModulationType::Frequency),
            other => Err(ConfigError::UnknownModulation(other.to_string())),
        }
    }

    pub fn bits_per_symbol(self) -> usize {
        match self {
            ModulationType::Phase => 2,
            ModulationType::Amplitude | ModulationType::Frequency => 1,
        }
    }

    pub fn short_name(self) -> &'static str {
        match self {
            ModulationType::Amplitude => "am",
            ModulationType::Phase => "pm",
            ModulationType::Frequency => "fm",
        }
    }
}

impl fmt::Display for ModulationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for ModulationType {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "am" | "amplitude" => Ok(ModulationType::Amplitude),
            "1" | "pm" | "phase" => Ok(ModulationType::Phase),
            "2" | "fm" | "frequency" => Ok(ModulationType::Frequency),
            _ => Err(ConfigError::UnknownModulation(s.to_string())),
        }
    }
}

/// Parameters of the reference signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModulationConfig {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// Carrier frequency in Hz
    pub carrier_freq: f64,
    /// Number of symbols in the reference signal
    pub num_info_bits: usize,
    /// Symbol duration scale: one symbol spans `info_velocity · sample_rate` samples
    pub info_velocity: f64,
    pub modulation: ModulationType,
}

impl Default for ModulationConfig {
    fn default() -> Self {
        Self {
            sample_rate: 20.0,
            carrier_freq: 10.0,
            num_info_bits: 100,
            info_velocity: 10.0,
            modulation: ModulationType::Amplitude,
        }
    }
}

impl ModulationConfig {
    pub fn with_modulation(mut self, modulation: ModulationType) -> Self {
        self.modulation = modulation;
        self
    }

    /// Check every field and derived constraint, first failure wins.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(self.sample_rate > 0.0) || !self.sample_rate.is_finite() {
            return Err(ConfigError::NonPositiveSampleRate(self.sample_rate));
        }
        if !(self.carrier_freq > 0.0) || !self.carrier_freq.is_finite() {
            return Err(ConfigError::NonPositiveCarrier(self.carrier_freq));
        }
        if !(self.info_velocity > 0.0) || !self.info_velocity.is_finite() {
            return Err(ConfigError::NonPositiveVelocity(self.info_velocity));
        }
        if self.num_info_bits == 0 {
            return Err(ConfigError::ZeroBits);
        }
        if 2.0 * self.carrier_freq > self.sample_rate {
            return Err(ConfigError::Nyquist {
                carrier_freq: self.carrier_freq,
                sample_rate: self.sample_rate,
            });
        }
        let exact = self.info_velocity * self.sample_rate;
        if exact.round() < 1.0 {
            return Err(ConfigError::ZeroSamplesPerBit {
                samples_per_bit: exact,
            });
        }
        let cycles_per_bit = self.carrier_freq * self.bit_duration();
        if cycles_per_bit < NARROWBAND_MIN_CYCLES_PER_BIT {
            return Err(ConfigError::Narrowband { cycles_per_bit });
        }
        if self.modulation == ModulationType::Frequency {
            let (mark, space) = self.fsk_tones();
            if space <= 0.0 {
                return Err(ConfigError::FskTones {
                    mark,
                    space,
                    sample_rate: self.sample_rate,
                });
            }
        }
        Ok(())
    }

    /// Mark (bit 1) and space (bit 0) tone frequencies in Hz.
    ///
    /// The tones sit `±Δ` around the carrier with `Δ = 1 / (2 · bit_duration)`,
    /// so they are `1 / bit_duration` apart. When the mark tone would come
    /// closer than `Δ` to Nyquist, both tones move down together until it
    /// doesn't; a mark at or above `sample_rate / 2` would alias onto the
    /// space tone.
    pub fn fsk_tones(&self) -> (f64, f64) {
        let deviation = self.sample_rate / (2.0 * self.samples_per_bit() as f64);
        let ceiling = self.sample_rate / 2.0 - deviation;
        let shift = (self.carrier_freq + deviation - ceiling).max(0.0);
        (
            self.carrier_freq + deviation - shift,
            self.carrier_freq - deviation - shift,
        )
    }

    /// Samples per symbol, rounded
    pub fn samples_per_bit(&self) -> usize {
        (self.info_velocity * self.sample_rate).round() as usize
    }

    /// Duration of one symbol in seconds, after rounding to whole samples
    pub fn bit_duration(&self) -> f64 {
        self.samples_per_bit() as f64 / self.sample_rate
    }

    /// Length of the generated reference signal
    pub fn signal_len(&self) -> usize {
        (self.num_info_bits as f64 * self.info_velocity * self.sample_rate).round() as usize
    }

    /// Number of random bits one reference signal consumes
    pub fn bit_count(&self) -> usize {
        self.num_info_bits * self.modulation.bits_per_symbol()
    }
}

/// Generates keyed waveforms for one validated [`ModulationConfig`]
///
/// Phase steps are derived once in [`SignalModulator::configure`] and reused
/// for every generated signal.
#[derive(Debug, Clone)]
pub struct SignalModulator {
    config: ModulationConfig,
    samples_per_bit: usize,
    signal_len: usize,
    carrier_step: f64,
    mark_step: f64,
    space_step: f64,
    source: BitSource,
}

impl SignalModulator {
    pub fn new(config: ModulationConfig, source: BitSource) -> Result<Self> {
        let mut modulator = Self {
            config,
            samples_per_bit: 0,
            signal_len: 0,
            carrier_step: 0.0,
            mark_step: 0.0,
            space_step: 0.0,
            source,
        };
        modulator.configure(config)?;
        Ok(modulator)
    }

    /// Validate `config` and cache its derived phase increments.
    ///
    /// On error the previous configuration stays in effect.
    pub fn configure(&mut self, config: ModulationConfig) -> Result<()> {
        config.validate()?;

        let samples_per_bit = config.samples_per_bit();
        let (mark_freq, space_freq) = config.fsk_tones();

        self.config = config;
        self.samples_per_bit = samples_per_bit;
        self.signal_len = config.signal_len();
        self.carrier_step = TAU * config.carrier_freq / config.sample_rate;
        self.mark_step = TAU * mark_freq / config.sample_rate;
        self.space_step = TAU * space_freq / config.sample_rate;

        debug!(
            "configured {} modulator: {} samples/bit, {} samples, carrier step {:.4} rad",
            config.modulation, samples_per_bit, self.signal_len, self.carrier_step
        );
        Ok(())
    }

    pub fn config(&self) -> &ModulationConfig {
        &self.config
    }

    pub fn samples_per_bit(&self) -> usize {
        self.samples_per_bit
    }

    pub fn signal_len(&self) -> usize {
        self.signal_len
    }

    /// Draw fresh bits and a random initial phase, then modulate.
    pub fn generate(&mut self) -> Result<Signal> {
        let bits = self.source.bits(self.config.bit_count());
        let initial_phase = self.source.phase();
        self.modulate(&bits, initial_phase)
    }

    /// Modulate caller-supplied bits (two per symbol for phase keying).
    pub fn modulate(&self, bits: &[u8], initial_phase: f64) -> Result<Signal> {
        let expected = self.config.bit_count();
        if bits.len() != expected {
            return Err(EcholagError::BitCountMismatch {
                expected,
                got: bits.len(),
            });
        }
        if self.signal_len == 0 {
            return Err(EcholagError::EmptySignal);
        }

        let last_symbol = self.config.num_info_bits - 1;
        let mut phase = initial_phase.rem_euclid(TAU);
        let mut samples = Vec::with_capacity(self.signal_len);

        for n in 0..self.signal_len {
            let symbol = (n / self.samples_per_bit).min(last_symbol);

            let (sample, step) = match self.config.modulation {
                ModulationType::Amplitude => {
                    let level = 1.0 + f64::from(bits[symbol]);
                    (Complex64::new(level * phase.cos(), 0.0), self.carrier_step)
                }
                ModulationType::Phase => {
                    let i = bipolar(bits[2 * symbol]) * phase.cos();
                    let q = bipolar(bits[2 * symbol + 1]) * phase.sin();
                    (Complex64::new(i, q), self.carrier_step)
                }
                ModulationType::Frequency => {
                    let step = if bits[symbol] != 0 {
                        self.mark_step
                    } else {
                        self.space_step
                    };
                    (Complex64::new(phase.cos(), 0.0), step)
                }
            };

            samples.push(sample);
            phase = (phase + step).rem_euclid(TAU);
        }

        Ok(Signal::new(samples, self.config.sample_rate))
    }
}

fn bipolar(bit: u8) -> f64 {
    if bit != 0 {
        1.0
    } else {
        -1.0
    }
}

/// One-shot generation with an entropy-seeded source
pub fn generate_modulated_signal(config: &ModulationConfig) -> Result<Signal> {
    SignalModulator::new(*config, BitSource::from_entropy())?.generate()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(modulation: ModulationType) -> ModulationConfig {
        ModulationConfig {
            sample_rate: 1.0,
            carrier_freq: 0.25,
            num_info_bits: 10,
            info_velocity: 10.0,
            modulation,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ModulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.samples_per_bit(), 200);
        assert_eq!(config.signal_len(), 20_000);
    }

    #[test]
    fn test_validation_failures() {
        let base = small_config(ModulationType::Amplitude);

        let config = ModulationConfig { sample_rate: 0.0, ..base };
        assert!(matches!(config.validate(), Err(ConfigError::NonPositiveSampleRate(_))));

        let config = ModulationConfig { carrier_freq: -1.0, ..base };
        assert!(matches!(config.validate(), Err(ConfigError::NonPositiveCarrier(_))));

        let config = ModulationConfig { info_velocity: 0.0, ..base };
        assert!(matches!(config.validate(), Err(ConfigError::NonPositiveVelocity(_))));

        let config = ModulationConfig { num_info_bits: 0, ..base };
        assert_eq!(config.validate(), Err(ConfigError::ZeroBits));

        let config = ModulationConfig { carrier_freq: 0.6, ..base };
        assert!(matches!(config.validate(), Err(ConfigError::Nyquist { .. })));

        let config = ModulationConfig { info_velocity: 0.2, ..base };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroSamplesPerBit { .. })));

        // 0.05 Hz carrier over a 10 s symbol is half a cycle
        let config = ModulationConfig { carrier_freq: 0.05, ..base };
        assert!(matches!(config.validate(), Err(ConfigError::Narrowband { .. })));

        let config = ModulationConfig { sample_rate: f64::NAN, ..base };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_configure_keeps_previous_on_error() {
        let mut modulator =
            SignalModulator::new(small_config(ModulationType::Phase), BitSource::seeded(1)).unwrap();
        let bad = ModulationConfig { num_info_bits: 0, ..small_config(ModulationType::Phase) };
        assert!(modulator.configure(bad).is_err());
        assert_eq!(modulator.config().num_info_bits, 10);
        assert_eq!(modulator.signal_len(), 100);
    }

    #[test]
    fn test_generated_length() {
        for modulation in ModulationType::ALL {
            let mut modulator =
                SignalModulator::new(small_config(modulation), BitSource::seeded(5)).unwrap();
            let signal = modulator.generate().unwrap();
            assert_eq!(signal.len(), 100, "{} length", modulation);
            assert_eq!(signal.sample_rate(), 1.0);
        }
    }

    #[test]
    fn test_amplitude_levels() {
        let modulator =
            SignalModulator::new(small_config(ModulationType::Amplitude), BitSource::seeded(1))
                .unwrap();
        let bits = [0, 1, 0, 1, 1, 0, 0, 1, 0, 1];
        let signal = modulator.modulate(&bits, 0.0).unwrap();

        // Step π/2 from phase 0: cos cycles through 1, 0, -1, 0
        for (n, s) in signal.iter().enumerate() {
            let level = 1.0 + bits[n / 10] as f64;
            let expected = level * (n as f64 * TAU / 4.0).cos();
            assert!((s.re - expected).abs() < 1e-9, "sample {}", n);
            assert_eq!(s.im, 0.0);
        }
    }

    #[test]
    fn test_phase_keying_unit_magnitude_and_signs() {
        let modulator =
            SignalModulator::new(small_config(ModulationType::Phase), BitSource::seeded(1))
                .unwrap();
        let mut bits = vec![0u8; 20];
        bits[0] = 1; // symbol 0: I positive, Q negative
        bits[3] = 1; // symbol 1: I negative, Q positive
        let signal = modulator.modulate(&bits, 0.3).unwrap();

        for s in signal.iter() {
            assert!((s.norm() - 1.0).abs() < 1e-9);
        }
        // Phase 0.3 at n = 0
        assert!((signal[0].re - 0.3f64.cos()).abs() < 1e-9);
        assert!((signal[0].im + 0.3f64.sin()).abs() < 1e-9);
        // n = 10 sits at phase 0.3 + 10·π/2 = 0.3 + π (mod 2π)
        let phase = (0.3 + 10.0 * TAU / 4.0).rem_euclid(TAU);
        assert!((signal[10].re + phase.cos()).abs() < 1e-9);
        assert!((signal[10].im - phase.sin()).abs() < 1e-9);
    }

    #[test]
    fn test_frequency_keying_steps() {
        let config = small_config(ModulationType::Frequency);
        let modulator = SignalModulator::new(config, BitSource::seeded(1)).unwrap();
        let bits = [1, 0, 1, 1, 0, 0, 1, 0, 1, 0];
        let signal = modulator.modulate(&bits, 0.0).unwrap();

        let deviation = 1.0 / 20.0;
        let mut phase = 0.0f64;
        for (n, s) in signal.iter().enumerate() {
            assert!((s.re - phase.cos()).abs() < 1e-9, "sample {}", n);
            let freq = if bits[n / 10] == 1 { 0.25 + deviation } else { 0.25 - deviation };
            phase = (phase + TAU * freq).rem_euclid(TAU);
        }
    }

    #[test]
    fn test_fsk_tones_stay_below_nyquist() {
        // Carrier exactly at Nyquist: 20 Hz sampling, 10 Hz carrier, 200 samples/bit
        let config = ModulationConfig::default().with_modulation(ModulationType::Frequency);
        assert!(config.validate().is_ok());

        let (mark, space) = config.fsk_tones();
        assert!((mark - 9.95).abs() < 1e-12, "mark {}", mark);
        assert!((space - 9.85).abs() < 1e-12, "space {}", space);
        assert!((mark - space - 1.0 / config.bit_duration()).abs() < 1e-12);

        // Tones well inside the band are left around the carrier
        let (mark, space) = small_config(ModulationType::Frequency).fsk_tones();
        assert!((mark - 0.3).abs() < 1e-12);
        assert!((space - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_fsk_mark_and_space_differ_at_nyquist_carrier() {
        let config = ModulationConfig::default().with_modulation(ModulationType::Frequency);
        let modulator = SignalModulator::new(config, BitSource::seeded(1)).unwrap();

        // A mark tone aliased onto the space tone would make these mirror images
        let marks = modulator.modulate(&[1u8; 100], 0.7).unwrap();
        let spaces = modulator.modulate(&[0u8; 100], TAU - 0.7).unwrap();
        let max_diff = marks
            .iter()
            .zip(spaces.iter())
            .map(|(a, b)| (a - b).norm())
            .fold(0.0f64, f64::max);
        assert!(max_diff > 1.0, "max difference {}", max_diff);
    }

    #[test]
    fn test_fsk_tones_without_room_rejected() {
        // Two samples per bit at a Nyquist carrier leave no room for the space tone
        let config = ModulationConfig {
            sample_rate: 1.0,
            carrier_freq: 0.5,
            num_info_bits: 10,
            info_velocity: 2.0,
            modulation: ModulationType::Frequency,
        };
        assert!(matches!(config.validate(), Err(ConfigError::FskTones { .. })));
        assert!(config.with_modulation(ModulationType::Amplitude).validate().is_ok());
    }

    #[test]
    fn test_bit_count_mismatch() {
        let modulator =
            SignalModulator::new(small_config(ModulationType::Phase), BitSource::seeded(1))
                .unwrap();
        let err = modulator.modulate(&[0u8; 10], 0.0).unwrap_err();
        assert!(matches!(err, EcholagError::BitCountMismatch { expected: 20, got: 10 }));
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let config = small_config(ModulationType::Frequency);
        let a = SignalModulator::new(config, BitSource::seeded(9)).unwrap().generate().unwrap();
        let b = SignalModulator::new(config, BitSource::seeded(9)).unwrap().generate().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_modulation_type_parsing() {
        assert_eq!("am".parse::<ModulationType>().unwrap(), ModulationType::Amplitude);
        assert_eq!("1".parse::<ModulationType>().unwrap(), ModulationType::Phase);
        assert_eq!("Frequency".parse::<ModulationType>().unwrap(), ModulationType::Frequency);
        assert!("qam".parse::<ModulationType>().is_err());
        assert!(ModulationType::from_index(3).is_err());
        assert_eq!(ModulationType::from_index(2).unwrap(), ModulationType::Frequency);
    }
}
