//! Deterministic synthetic detector data.
//!
//! Generates per-hit TOT spectra (one or more Gaussian lines) and threshold
//! scans (an error-function turn-on with counting noise), and renders them in
//! the same text layouts the readers in `io` accept.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::domain::ThresholdPoint;
use crate::error::AppError;
use crate::math::erf;

/// One Gaussian line of a synthetic spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakShape {
    /// Relative share of hits.
    pub weight: f64,
    pub mu: f64,
    pub sigma: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSynth {
    pub peaks: Vec<PeakShape>,
    pub hits: usize,
    pub seed: u64,
}

impl Default for SpectrumSynth {
    fn default() -> Self {
        Self {
            peaks: vec![PeakShape {
                weight: 1.0,
                mu: 60.0,
                sigma: 6.0,
            }],
            hits: 20_000,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSynth {
    /// Plateau hit count above the edge.
    pub amplitude: f64,
    pub mu: f64,
    pub sigma: f64,
    pub thl_start: i64,
    pub thl_stop: i64,
    pub thl_step: i64,
    /// Add Gaussian counting noise with variance equal to the count.
    pub noise: bool,
    pub seed: u64,
}

impl Default for ScanSynth {
    fn default() -> Self {
        Self {
            amplitude: 20_000.0,
            mu: 900.0,
            sigma: 30.0,
            thl_start: 700,
            thl_stop: 1100,
            thl_step: 2,
            noise: true,
            seed: 42,
        }
    }
}

/// Draw `params.hits` per-hit TOT values.
pub fn generate_hits(params: &SpectrumSynth) -> Result<Vec<f64>, AppError> {
    if params.peaks.is_empty() {
        return Err(AppError::new(2, "Synthetic spectrum needs at least one peak."));
    }
    let total_weight: f64 = params.peaks.iter().map(|p| p.weight).sum();
    if !(total_weight > 0.0) || params.peaks.iter().any(|p| p.weight < 0.0) {
        return Err(AppError::new(2, "Peak weights must be non-negative with a positive sum."));
    }

    let lines = params
        .peaks
        .iter()
        .map(|p| {
            Normal::new(p.mu, p.sigma)
                .map(|d| (p.weight / total_weight, d))
                .map_err(|e| AppError::new(2, format!("Invalid peak (μ={}, σ={}): {e}", p.mu, p.sigma)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut out = Vec::with_capacity(params.hits);
    for _ in 0..params.hits {
        let mut u: f64 = rng.r#gen();
        let mut chosen = &lines[lines.len() - 1].1;
        for (share, dist) in &lines {
            if u < *share {
                chosen = dist;
                break;
            }
            u -= share;
        }
        out.push(chosen.sample(&mut rng));
    }
    Ok(out)
}

/// One point per THL step from `thl_start` to `thl_stop` inclusive.
pub fn generate_scan(params: &ScanSynth) -> Result<Vec<ThresholdPoint>, AppError> {
    if params.thl_step <= 0 || params.thl_stop < params.thl_start {
        return Err(AppError::new(2, "THL range must be ascending with a positive step."));
    }
    if !(params.sigma > 0.0 && params.amplitude >= 0.0) {
        return Err(AppError::new(2, "Scan σ must be positive and amplitude non-negative."));
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let unit = Normal::new(0.0, 1.0)
        .map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    let mut points = Vec::new();
    let mut thl = params.thl_start;
    while thl <= params.thl_stop {
        let z = (thl as f64 - params.mu) / (std::f64::consts::SQRT_2 * params.sigma);
        let expected = params.amplitude * (1.0 + erf(z)) / 2.0;
        let hits = if params.noise {
            expected + expected.sqrt() * unit.sample(&mut rng)
        } else {
            expected
        };
        points.push(ThresholdPoint {
            thl,
            hits: hits.max(0.0).round(),
        });
        thl += params.thl_step;
    }
    Ok(points)
}

/// Hit list with `x y toa tot` columns.
pub fn hit_list_text(tot: &[f64]) -> String {
    let mut out = String::from("# x y toa tot\n");
    for (i, v) in tot.iter().enumerate() {
        let _ = writeln!(out, "{} {} {} {v:.3}", i % 256, (i / 256) % 256, i * 25);
    }
    out
}

/// Threshold dump in the default layout: `# THL` on line 9, the pixel table
/// from line 39, and a `# Hits:` footer.
pub fn thl_dump_text(point: &ThresholdPoint, pixels: usize) -> String {
    let pixels = pixels.max(1);
    let mut out = String::new();
    for line in 1..=8 {
        let _ = writeln!(out, "# header {line}");
    }
    let _ = writeln!(out, "# THL = {}", point.thl);
    for line in 10..=38 {
        let _ = writeln!(out, "# dac {line}");
    }

    let total = point.hits.max(0.0).round() as u64;
    let per = total / pixels as u64;
    let extra = (total % pixels as u64) as usize;
    for p in 0..pixels {
        let count = per + u64::from(p < extra);
        let _ = writeln!(out, "{} {} {count}", p % 256, p / 256);
    }
    let _ = writeln!(out, "# Hits: {total}");
    out
}

/// Write one dump per point into `dir` as `<prefix>_<thl>.txt`.
pub fn write_scan_dumps(
    dir: &Path,
    prefix: &str,
    points: &[ThresholdPoint],
    pixels: usize,
) -> Result<Vec<PathBuf>, AppError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| AppError::new(2, format!("Failed to create '{}': {e}", dir.display())))?;
    points
        .iter()
        .map(|point| {
            let path = dir.join(format!("{prefix}_{}.txt", point.thl));
            std::fs::write(&path, thl_dump_text(point, pixels))
                .map_err(|e| AppError::new(2, format!("Failed to write '{}': {e}", path.display())))?;
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::thl::{HitsSource, ThlDumpLayout, parse_dump};
    use crate::io::spectrum::read_hit_column;

    #[test]
    fn hits_are_deterministic_per_seed() {
        let params = SpectrumSynth {
            hits: 500,
            ..SpectrumSynth::default()
        };
        let a = generate_hits(&params).unwrap();
        let b = generate_hits(&params).unwrap();
        assert_eq!(a, b);
        let c = generate_hits(&SpectrumSynth { seed: 7, ..params }).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn hit_mixture_follows_weights() {
        let params = SpectrumSynth {
            peaks: vec![
                PeakShape { weight: 3.0, mu: 40.0, sigma: 2.0 },
                PeakShape { weight: 1.0, mu: 120.0, sigma: 2.0 },
            ],
            hits: 8000,
            seed: 1,
        };
        let hits = generate_hits(&params).unwrap();
        let low = hits.iter().filter(|&&v| v < 80.0).count() as f64 / hits.len() as f64;
        assert!((low - 0.75).abs() < 0.03, "{low}");
    }

    #[test]
    fn noiseless_scan_is_monotone() {
        let params = ScanSynth {
            noise: false,
            ..ScanSynth::default()
        };
        let points = generate_scan(&params).unwrap();
        assert_eq!(points.len(), 201);
        assert!(points.windows(2).all(|w| w[1].hits >= w[0].hits));
        assert!(generate_scan(&ScanSynth { thl_step: 0, ..params }).is_err());
    }

    #[test]
    fn rendered_files_parse_back() {
        let point = ThresholdPoint { thl: 912, hits: 1003.0 };
        let text = thl_dump_text(&point, 10);
        let column = parse_dump(&text, &ThlDumpLayout::default()).unwrap().unwrap();
        assert_eq!(column, point);
        let summary = ThlDumpLayout {
            hits: HitsSource::Summary,
            ..ThlDumpLayout::default()
        };
        assert_eq!(parse_dump(&text, &summary).unwrap().unwrap(), point);

        let list = hit_list_text(&[35.25, 40.5]);
        let ex = read_hit_column(list.as_bytes(), 3).unwrap();
        assert_eq!(ex.items, vec![35.25, 40.5]);
    }
}
