//! Raw per-hit lists and their histograms.
//!
//! A hit list is a whitespace-separated table, one hit per row, with `#`
//! comment lines. One column (by default the fourth, index 3: TOT) holds the
//! per-hit value. Rows that are too short or not numeric are skipped.

use std::io::BufRead;
use std::path::Path;

use log::debug;
use serde::Serialize;

use crate::error::AppError;
use crate::io::extract::{Extraction, SkippedLine, open};

/// Read the 0-based `column` of every data row.
pub fn read_hit_column<R: BufRead>(mut reader: R, column: usize) -> std::io::Result<Extraction<f64>> {
    let mut out = Extraction::default();
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;

        let text = String::from_utf8_lossy(&buf);
        let text = text.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        out.lines_read += 1;

        let parsed = text
            .split_whitespace()
            .nth(column)
            .ok_or_else(|| format!("fewer than {} columns", column + 1))
            .and_then(|field| {
                field
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| format!("'{field}' is not a finite number"))
            });
        match parsed {
            Ok(v) => out.items.push(v),
            Err(reason) => {
                debug!("line {line_no}: skipped ({reason})");
                out.skipped.push(SkippedLine {
                    line: line_no,
                    reason,
                });
            }
        }
    }

    Ok(out)
}

/// Open `path` and read its hit column.
pub fn load_hit_column(path: &Path, column: usize) -> Result<Extraction<f64>, AppError> {
    let reader = open(path)?;
    read_hit_column(reader, column)
        .map_err(|e| AppError::new(2, format!("Failed to read '{}': {e}", path.display())))
}

/// Equal-width histogram over a closed range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    /// `bins + 1` edges.
    pub edges: Vec<f64>,
    pub counts: Vec<f64>,
}

impl Histogram {
    /// Bin `values` into `bins` equal bins over `[lo, hi]`.
    ///
    /// Every bin is half-open `[a, b)` except the last, which also includes
    /// `hi`. Values outside the range are dropped.
    pub fn new(values: &[f64], bins: usize, range: (f64, f64)) -> Result<Self, String> {
        let (lo, hi) = range;
        if bins == 0 {
            return Err("histogram needs at least one bin".to_string());
        }
        if !(lo.is_finite() && hi.is_finite() && hi > lo) {
            return Err(format!("invalid histogram range [{lo}, {hi}]"));
        }

        let width = (hi - lo) / bins as f64;
        let edges: Vec<f64> = (0..=bins).map(|i| lo + width * i as f64).collect();
        let mut counts = vec![0.0; bins];

        for &v in values {
            if !(v >= lo && v <= hi) {
                continue;
            }
            let idx = (((v - lo) / width).floor() as usize).min(bins - 1);
            counts[idx] += 1.0;
        }

        Ok(Self { edges, counts })
    }

    pub fn centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    pub fn peak_count(&self) -> f64 {
        self.counts.iter().copied().fold(0.0, f64::max)
    }
}
