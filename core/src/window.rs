//! Delayed sub-window extraction
//!
//! The randomized variant returns the chosen offset alongside the window; that
//! offset is the ground-truth delay a trial is scored against.

use crate::error::{EcholagError, Result};
use crate::signal::Signal;

/// Copy `source[start..start + length]` into a new signal.
pub fn extract(source: &Signal, start: usize, length: usize) -> Result<Signal> {
    if length == 0 {
        return Err(EcholagError::EmptyWindow);
    }
    let available = source.len();
    let end = start.checked_add(length);
    match end {
        Some(end) if length <= available && end <= available => Ok(Signal::new(
            source.samples()[start..end].to_vec(),
            source.sample_rate(),
        )),
        _ => Err(EcholagError::WindowOutOfBounds {
            start,
            length,
            available,
        }),
    }
}

/// Extract `length` samples at offset `round((len - length) · u)`.
///
/// `u` must come from `[0, 1)`. Returns the window and its offset.
pub fn extract_random(source: &Signal, length: usize, u: f64) -> Result<(Signal, usize)> {
    if !(0.0..1.0).contains(&u) {
        return Err(EcholagError::InvalidUniform(u));
    }
    if length == 0 {
        return Err(EcholagError::EmptyWindow);
    }
    if length > source.len() {
        return Err(EcholagError::WindowOutOfBounds {
            start: 0,
            length,
            available: source.len(),
        });
    }
    let start = ((source.len() - length) as f64 * u).round() as usize;
    let window = extract(source, start, length)?;
    Ok((window, start))
}

/// Window length for a fraction of `source_len`, at least one sample.
pub fn window_len(source_len: usize, fraction: f64) -> Result<usize> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(EcholagError::InvalidFraction(fraction));
    }
    Ok(((source_len as f64 * fraction).round() as usize).max(1))
}

/// Window sized at `fraction` of the source, placed by the uniform draw `u`.
pub fn extract_delayed_window(source: &Signal, fraction: f64, u: f64) -> Result<(Signal, usize)> {
    if source.is_empty() {
        return Err(EcholagError::EmptySignal);
    }
    let length = window_len(source.len(), fraction)?;
    extract_random(source, length, u)
}
