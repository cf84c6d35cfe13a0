//! Threshold-scan analysis.
//!
//! Hits vs THL is fitted with an error-function step. Its first difference,
//! smoothed with a Savitzky–Golay filter, is a peak whose Gaussian fit and
//! half-maximum width give the position and width of the line in THL units.

use log::{debug, warn};
use serde::Serialize;

use crate::calc::{CalcError, half_max_width, resolution_percent};
use crate::domain::{FitResult, ModelKind, ResolutionBasis, ThresholdPoint};
use crate::fit::{FitOptions, fit_model, guess};
use crate::math::{diff, savgol, savgol_window};

const SAVGOL_ORDER: usize = 2;
const MIN_POINTS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSettings {
    pub max_iterations: usize,
    /// Hits fall with THL; the derivative is negated before peak fitting.
    pub falling_edge: bool,
    pub basis: ResolutionBasis,
    /// Denominator for `ResolutionBasis::ReferenceEnergy`.
    pub reference_energy: Option<f64>,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            falling_edge: false,
            basis: ResolutionBasis::Mean,
            reference_energy: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdAnalysis {
    /// Sorted by THL.
    pub points: Vec<ThresholdPoint>,
    pub step: Option<FitResult>,
    /// THL of each derivative sample (`points[1..]`).
    pub derivative_x: Vec<f64>,
    pub derivative: Vec<f64>,
    pub smoothed: Vec<f64>,
    pub peak: Option<FitResult>,
    pub fwhm: Option<f64>,
    pub resolution: Option<f64>,
    #[serde(skip)]
    pub failures: Vec<CalcError>,
}

/// Analyze one threshold scan.
///
/// Fails only when there are too few points to form a derivative peak.
/// Individual stage failures are collected in `failures`.
pub fn analyze_threshold_scan(
    label: &str,
    points: &[ThresholdPoint],
    settings: &ThresholdSettings,
) -> Result<ThresholdAnalysis, CalcError> {
    if points.len() < MIN_POINTS {
        return Err(CalcError::Signal(format!(
            "{label}: threshold scan needs at least {MIN_POINTS} points, got {}",
            points.len()
        )));
    }

    let mut points = points.to_vec();
    points.sort_by_key(|p| p.thl);
    let thl: Vec<f64> = points.iter().map(|p| p.thl as f64).collect();
    let hits: Vec<f64> = points.iter().map(|p| p.hits).collect();

    let mut failures = Vec::new();
    let mut stage_failed = |stage: &str, reason: String| {
        let err = CalcError::Signal(format!("{label}: {stage} failed: {reason}"));
        warn!("{err}");
        failures.push(err);
    };

    let opts = FitOptions::default().with_max_iterations(settings.max_iterations);
    let step = fit_model(ModelKind::ErfStep, &thl, &hits, &opts)
        .map_err(|e| stage_failed("error-function fit", e.to_string()))
        .ok();

    let derivative_x = thl[1..].to_vec();
    let mut derivative = diff(&hits);
    if settings.falling_edge {
        derivative.iter_mut().for_each(|d| *d = -*d);
    }
    let smoothed = savgol_window(derivative.len())
        .and_then(|w| savgol(&derivative, w, SAVGOL_ORDER))
        .unwrap_or_else(|| {
            debug!("{label}: derivative too short to smooth");
            derivative.clone()
        });

    let peak = match guess::derivative_peak(&derivative_x, &smoothed) {
        Some((initial, bounds)) => {
            let opts = opts.clone().with_initial(initial).with_bounds(bounds);
            fit_model(ModelKind::Gaussian, &derivative_x, &smoothed, &opts)
                .map_err(|e| stage_failed("derivative Gaussian fit", e.to_string()))
                .ok()
        }
        None => {
            stage_failed("derivative Gaussian fit", "no positive peak".to_string());
            None
        }
    };

    let fwhm = half_max_width(&derivative_x, &smoothed)
        .map_err(|e| stage_failed("half-max width", e.to_string()))
        .ok();

    let denominator = match settings.basis {
        ResolutionBasis::ReferenceEnergy => settings.reference_energy,
        ResolutionBasis::Mean => peak.as_ref().and_then(FitResult::mean),
    };
    let resolution = match (fwhm, denominator) {
        (Some(w), Some(d)) => resolution_percent(w, d)
            .map_err(|e| stage_failed("resolution", e.to_string()))
            .ok(),
        _ => None,
    };

    Ok(ThresholdAnalysis {
        points,
        step,
        derivative_x,
        derivative,
        smoothed,
        peak,
        fwhm,
        resolution,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::erf;

    fn scan(amplitude: f64, mu: f64, sigma: f64) -> Vec<ThresholdPoint> {
        // Descending THL; the analysis sorts.
        (0..300)
            .rev()
            .map(|i| {
                let thl = 600 + 2 * i;
                let z = (thl as f64 - mu) / (std::f64::consts::SQRT_2 * sigma);
                ThresholdPoint {
                    thl,
                    hits: amplitude * (1.0 + erf(z)) / 2.0,
                }
            })
            .collect()
    }

    #[test]
    fn recovers_edge_position_and_width() {
        let points = scan(5000.0, 900.0, 40.0);
        let a = analyze_threshold_scan("Mo_40", &points, &ThresholdSettings::default()).unwrap();
        assert!(a.failures.is_empty(), "{:?}", a.failures);
        assert!(a.points.windows(2).all(|w| w[0].thl < w[1].thl));

        let step = a.step.unwrap();
        assert!((step.mean().unwrap() - 900.0).abs() < 0.5);
        assert!((step.sigma().unwrap() - 40.0).abs() < 0.5);

        let peak = a.peak.unwrap();
        assert!((peak.mean().unwrap() - 900.0).abs() < 3.0);
        assert_eq!(a.derivative_x.len(), a.smoothed.len());
        let fwhm = a.fwhm.unwrap();
        assert!((fwhm - 2.355 * 40.0).abs() < 6.0, "{fwhm}");
        assert!(a.resolution.unwrap() > 0.0);
    }

    #[test]
    fn falling_edge_is_flipped() {
        let points: Vec<ThresholdPoint> = scan(5000.0, 900.0, 40.0)
            .into_iter()
            .map(|p| ThresholdPoint {
                thl: p.thl,
                hits: 5000.0 - p.hits,
            })
            .collect();
        let settings = ThresholdSettings {
            falling_edge: true,
            ..ThresholdSettings::default()
        };
        let a = analyze_threshold_scan("x", &points, &settings).unwrap();
        assert!((a.peak.unwrap().mean().unwrap() - 900.0).abs() < 3.0);
    }

    #[test]
    fn reference_energy_resolution() {
        let settings = ThresholdSettings {
            basis: ResolutionBasis::ReferenceEnergy,
            reference_energy: Some(17.5),
            ..ThresholdSettings::default()
        };
        let a = analyze_threshold_scan("x", &scan(100.0, 900.0, 40.0), &settings).unwrap();
        let expected = a.fwhm.unwrap() / 17.5 * 100.0;
        assert!((a.resolution.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn too_few_points() {
        let points = scan(10.0, 900.0, 40.0);
        assert!(analyze_threshold_scan("x", &points[..3], &ThresholdSettings::default()).is_err());
    }
}
