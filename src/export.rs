//! Flat numeric tables in the text layout `numpy.savetxt` writes with its default format:
//! one row per line, values separated by a single space, each printed as `%.18e`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Formats one value like C's `%.18e`.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let s = format!("{value:.18e}");
    match s.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
        }
        None => s,
    }
}

/// Writes one value per line.
pub fn write_column<W: Write>(mut out: W, values: &[f64]) -> Result<()> {
    for &v in values {
        writeln!(out, "{}", format_value(v))?;
    }
    out.flush()?;
    Ok(())
}

/// Writes one row per line. Every row must have the same width.
pub fn write_table<W: Write, R: AsRef<[f64]>>(mut out: W, rows: &[R]) -> Result<()> {
    let width = rows.first().map(|r| r.as_ref().len());
    for (i, row) in rows.iter().enumerate() {
        let row = row.as_ref();
        if Some(row.len()) != width {
            return Err(Error::InvalidArgument(format!(
                "row {i} has {} values, expected {}",
                row.len(),
                width.unwrap_or(0)
            )));
        }
        let line: Vec<String> = row.iter().map(|&v| format_value(v)).collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    out.flush()?;
    Ok(())
}

pub fn save_column<P: AsRef<Path>>(path: P, values: &[f64]) -> Result<()> {
    write_column(BufWriter::new(File::create(path)?), values)
}

pub fn save_table<P: AsRef<Path>, R: AsRef<[f64]>>(path: P, rows: &[R]) -> Result<()> {
    write_table(BufWriter::new(File::create(path)?), rows)
}

/// Reads a table back. Blank lines and `#` comments are skipped.
pub fn load_table<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<f64>>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>().map_err(|e| {
                    Error::InvalidArgument(format!("line {}: '{tok}': {e}", lineno + 1))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }
    Ok(rows)
}
