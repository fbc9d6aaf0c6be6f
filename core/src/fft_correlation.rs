//! FFT-based normalized cross-correlation for complex signals
//!
//! Estimates where a (shorter) template sits inside a reference signal. Both
//! inputs are mean-removed, correlated via the correlation theorem
//! `r = IFFT(FFT(a) · conj(FFT(b)))` on buffers zero-padded past
//! `len(a) + len(b) - 1`, and each lag is normalized by the energy that
//! actually takes part in it.
//!
//! # Lag indexing
//!
//! The output holds `len(a) + len(b) - 1` values:
//!
//! - index `k < len(a)`: lag `k`, template aligned to start at `a[k]`
//! - index `k >= len(a)`: negative lag `k - (len(a) + len(b) - 1)`, template
//!   hanging off the front of the reference (read from the tail of the
//!   circular result)
//!
//! # Normalization
//!
//! Lag `τ` is divided by `sqrt(E_a(τ) · E_b)`, where `E_a(τ)` is the energy of
//! the reference samples overlapped at that lag and `E_b` the template's
//! energy. Values stay in `[0, 1]` (Cauchy-Schwarz), partial overlaps at the
//! edges are scored against the whole template, and lags whose denominator is
//! below [`ENERGY_FLOOR`] are defined as zero.
//!
//! # Threading
//!
//! Plan creation and transform execution go through one process-wide lock.
//! Mean removal, energy prefix sums and the lag scan run outside it, so
//! independent engines on different threads only contend for the transforms.

use crate::error::{EcholagError, Result};
use crate::signal::mean;
use crate::ENERGY_FLOOR;
use log::debug;
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static FFT_CONTEXT: Mutex<()> = Mutex::new(());

/// Serialize access to the transform library.
fn fft_context() -> MutexGuard<'static, ()> {
    // Guards no data, poisoning is irrelevant
    FFT_CONTEXT.lock().unwrap_or_else(PoisonError::into_inner)
}

const ZERO: Complex64 = Complex64::new(0.0, 0.0);

/// Normalized correlation curve and its peak
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationResult {
    /// One value per lag index, see the module docs for the layout
    pub normalized: Vec<f64>,
    /// Arg-max of `normalized`, first occurrence on ties
    pub peak_lag: usize,
    reference_len: usize,
    template_len: usize,
}

impl CorrelationResult {
    pub fn peak_value(&self) -> f64 {
        self.normalized[self.peak_lag]
    }

    /// Signed lag for an index into `normalized`
    pub fn signed_lag(&self, index: usize) -> isize {
        if index < self.reference_len {
            index as isize
        } else {
            index as isize - (self.reference_len + self.template_len - 1) as isize
        }
    }

    /// Signed lag of the peak, the delay estimate
    pub fn estimated_delay(&self) -> isize {
        self.signed_lag(self.peak_lag)
    }

    pub fn reference_len(&self) -> usize {
        self.reference_len
    }

    pub fn template_len(&self) -> usize {
        self.template_len
    }
}

/// Reusable correlation engine
///
/// Buffers and plans are sized lazily to the largest transform seen so far.
/// A call that fits in the current transform length reuses it as-is.
pub struct CorrelationEngine {
    planner: FftPlanner<f64>,
    fft_len: usize,
    forward: Option<Arc<dyn Fft<f64>>>,
    inverse: Option<Arc<dyn Fft<f64>>>,
    reference: Vec<Complex64>,
    template: Vec<Complex64>,
    scratch: Vec<Complex64>,
    prefix_energy: Vec<f64>,
}

impl fmt::Debug for CorrelationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationEngine")
            .field("fft_len", &self.fft_len)
            .finish()
    }
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationEngine {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            fft_len: 0,
            forward: None,
            inverse: None,
            reference: Vec::new(),
            template: Vec::new(),
            scratch: Vec::new(),
            prefix_energy: Vec::new(),
        }
    }

    /// Engine with plans ready for signals of the given lengths
    pub fn with_capacity(reference_len: usize, template_len: usize) -> Self {
        let mut engine = Self::new();
        if reference_len > 0 && template_len > 0 {
            engine.reserve((reference_len + template_len - 1).next_power_of_two());
        }
        engine
    }

    /// Current transform length, zero before the first call
    pub fn fft_len(&self) -> usize {
        self.fft_len
    }

    fn reserve(&mut self, fft_len: usize) {
        if fft_len <= self.fft_len {
            return;
        }
        debug!("correlation transform grows {} -> {}", self.fft_len, fft_len);

        let (forward, inverse) = {
            let _guard = fft_context();
            (
                self.planner.plan_fft_forward(fft_len),
                self.planner.plan_fft_inverse(fft_len),
            )
        };
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        self.reference.resize(fft_len, ZERO);
        self.template.resize(fft_len, ZERO);
        self.scratch.resize(scratch_len, ZERO);
        self.forward = Some(forward);
        self.inverse = Some(inverse);
        self.fft_len = fft_len;
    }

    /// Correlate `template` against `reference`.
    ///
    /// # Errors
    ///
    /// `EmptySignal` if either input is empty, `TemplateLongerThanReference`
    /// if `template.len() > reference.len()`.
    pub fn correlate(
        &mut self,
        reference: &[Complex64],
        template: &[Complex64],
    ) -> Result<CorrelationResult> {
        if reference.is_empty() || template.is_empty() {
            return Err(EcholagError::EmptySignal);
        }
        if template.len() > reference.len() {
            return Err(EcholagError::TemplateLongerThanReference {
                reference: reference.len(),
                template: template.len(),
            });
        }

        let n = reference.len();
        let m = template.len();
        let output_len = n + m - 1;
        self.reserve(output_len.next_power_of_two());
        let fft_len = self.fft_len;

        // DC removal into the zero-padded transform buffers
        let mean_ref = mean(reference);
        let mean_tpl = mean(template);
        for (dst, src) in self.reference.iter_mut().zip(reference) {
            *dst = src - mean_ref;
        }
        self.reference[n..].fill(ZERO);
        for (dst, src) in self.template.iter_mut().zip(template) {
            *dst = src - mean_tpl;
        }
        self.template[m..].fill(ZERO);

        self.prefix_energy.clear();
        self.prefix_energy.push(0.0);
        let mut running = 0.0;
        for s in &self.reference[..n] {
            running += s.norm_sqr();
            self.prefix_energy.push(running);
        }
        let template_energy: f64 = self.template[..m].iter().map(|s| s.norm_sqr()).sum();

        let (forward, inverse) = match (&self.forward, &self.inverse) {
            (Some(f), Some(i)) => (Arc::clone(f), Arc::clone(i)),
            _ => unreachable!("reserve() installs both plans"),
        };

        {
            let _guard = fft_context();
            forward.process_with_scratch(&mut self.reference, &mut self.scratch);
            forward.process_with_scratch(&mut self.template, &mut self.scratch);
        }
        for (x, y) in self.reference.iter_mut().zip(self.template.iter()) {
            *x *= y.conj();
        }
        {
            let _guard = fft_context();
            inverse.process_with_scratch(&mut self.reference, &mut self.scratch);
        }

        let scale = 1.0 / fft_len as f64;
        let mut normalized = Vec::with_capacity(output_len);
        let mut peak_lag = 0;
        let mut peak_value = f64::NEG_INFINITY;

        for k in 0..output_len {
            // Circular index and the reference span the template overlaps
            let (circular, lo, hi) = if k < n {
                (k, k, (k + m).min(n))
            } else {
                let back = output_len - k;
                (fft_len - back, 0, m - back)
            };

            let raw = self.reference[circular].norm() * scale;
            let local_energy = self.prefix_energy[hi] - self.prefix_energy[lo];
            let denom = local_energy * template_energy;
            let value = if denom < ENERGY_FLOOR {
                0.0
            } else {
                raw / denom.sqrt()
            };

            if value > peak_value {
                peak_value = value;
                peak_lag = k;
            }
            normalized.push(value);
        }

        Ok(CorrelationResult {
            normalized,
            peak_lag,
            reference_len: n,
            template_len: m,
        })
    }
}

/// One-shot correlation with a throwaway engine
pub fn correlate(reference: &[Complex64], template: &[Complex64]) -> Result<CorrelationResult> {
    CorrelationEngine::with_capacity(reference.len(), template.len()).correlate(reference, template)
}
