//! Plain-text artifacts for offline plotting
//!
//! Complex sequences are written as `(re,im)`, real sequences as one value,
//! both one record per line.

use crate::error::Result;
use crate::modulation::ModulationType;
use num_complex::Complex64;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub const REFERENCE_FILE: &str = "first_data.txt";
pub const WINDOW_FILE: &str = "second_data.txt";
pub const CORRELATION_FILE: &str = "correlation.txt";

/// Error-rate series file for a modulation, e.g. `ber_am.txt`
pub fn error_rate_file_name(modulation: ModulationType) -> String {
    format!("ber_{}.txt", modulation.short_name())
}

pub fn write_complex<W: Write>(mut writer: W, samples: &[Complex64]) -> io::Result<()> {
    for s in samples {
        writeln!(writer, "({},{})", s.re, s.im)?;
    }
    writer.flush()
}

pub fn write_real<W: Write>(mut writer: W, values: &[f64]) -> io::Result<()> {
    for v in values {
        writeln!(writer, "{}", v)?;
    }
    writer.flush()
}

pub fn save_complex(path: &Path, samples: &[Complex64]) -> Result<()> {
    write_complex(BufWriter::new(File::create(path)?), samples)?;
    Ok(())
}

pub fn save_real(path: &Path, values: &[f64]) -> Result<()> {
    write_real(BufWriter::new(File::create(path)?), values)?;
    Ok(())
}

/// Append one value to a real series, creating the file if needed.
pub fn append_real(path: &Path, value: f64) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", value)?;
    Ok(())
}
