use thiserror::Error;

/// Rejected [`ModulationConfig`](crate::ModulationConfig) fields.
///
/// Raised at configuration time, before any sample is generated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("sample rate must be positive, got {0}")]
    NonPositiveSampleRate(f64),

    #[error("carrier frequency must be positive, got {0}")]
    NonPositiveCarrier(f64),

    #[error("information velocity must be positive, got {0}")]
    NonPositiveVelocity(f64),

    #[error("number of information bits must be non-zero")]
    ZeroBits,

    #[error("a bit spans {samples_per_bit:.3} samples, need at least one")]
    ZeroSamplesPerBit { samples_per_bit: f64 },

    #[error("carrier {carrier_freq} Hz violates Nyquist for sample rate {sample_rate} Hz")]
    Nyquist { carrier_freq: f64, sample_rate: f64 },

    #[error("narrowband constraint violated: {cycles_per_bit:.3} carrier cycles per bit")]
    Narrowband { cycles_per_bit: f64 },

    #[error("FSK tones {space:.3}..{mark:.3} Hz do not fit between DC and Nyquist at {sample_rate} Hz")]
    FskTones {
        mark: f64,
        space: f64,
        sample_rate: f64,
    },

    #[error("unknown modulation type: {0}")]
    UnknownModulation(String),
}

#[derive(Debug, Error)]
pub enum EcholagError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("template has {template} samples but reference only {reference}")]
    TemplateLongerThanReference { reference: usize, template: usize },

    #[error("expected {expected} bits, got {got}")]
    BitCountMismatch { expected: usize, got: usize },

    #[error("empty signal")]
    EmptySignal,

    #[error("zero-length window requested")]
    EmptyWindow,

    #[error("window [{start}, {start}+{length}) exceeds signal of {available} samples")]
    WindowOutOfBounds {
        start: usize,
        length: usize,
        available: usize,
    },

    #[error("window fraction must lie in (0, 1], got {0}")]
    InvalidFraction(f64),

    #[error("uniform draw must lie in [0, 1), got {0}")]
    InvalidUniform(f64),

    #[error("noise deviation is not finite for SNR {snr_db} dB")]
    InvalidSnr { snr_db: f64 },

    #[error("worker for {0} panicked")]
    WorkerPanicked(String),

    #[error("experiment cancelled after {completed} trials")]
    Cancelled { completed: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EcholagError {
    /// Caller-misuse errors: a bad argument rather than a bad configuration.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            EcholagError::TemplateLongerThanReference { .. }
                | EcholagError::BitCountMismatch { .. }
                | EcholagError::EmptySignal
                | EcholagError::EmptyWindow
                | EcholagError::WindowOutOfBounds { .. }
                | EcholagError::InvalidFraction(_)
                | EcholagError::InvalidUniform(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EcholagError>;
