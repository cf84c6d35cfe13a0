//! Derived quantities computed from fit parameters.
//!
//! The scalar formulas live here as pure functions that check their
//! preconditions and return `CalcError` instead of producing `inf`/`NaN`.
//! The multi-record computations built on them live in submodules:
//!
//! - `baseline`: shifts relative to a reference temperature
//! - `calibration`: energy calibration, correction and TOT prediction
//! - `peak`: width and resolution of a fitted spectrum peak
//! - `threshold`: threshold-scan analysis

pub mod baseline;
pub mod calibration;
pub mod peak;
pub mod threshold;

pub use baseline::*;
pub use calibration::*;
pub use peak::*;
pub use threshold::*;

use thiserror::Error;

/// FWHM of a Gaussian in units of σ (`2·sqrt(2·ln 2)`, rounded as customary).
pub const FWHM_FACTOR: f64 = 2.355;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("{name} must be finite, got {value}")]
    NonFinite { name: &'static str, value: f64 },

    #[error("sigma must be non-negative, got {0}")]
    NegativeSigma(f64),

    #[error("{name} must be non-zero")]
    Zero { name: &'static str },

    #[error(
        "{key} has no {reference_temperature}°C baseline; {} record(s) not computed ({})",
        .temperatures.len(),
        format_temperatures(.temperatures)
    )]
    MissingBaseline {
        key: String,
        reference_temperature: i32,
        temperatures: Vec<i32>,
    },

    #[error("{key} at {temperature}°C has no {quantity} value")]
    MissingQuantity {
        key: String,
        temperature: i32,
        quantity: &'static str,
    },

    #[error("no reference energy for group '{0}'")]
    UnknownMaterial(String),

    #[error("{label} at {temperature}°C has {got} point(s); at least {needed} needed")]
    TooFewPoints {
        label: String,
        temperature: i32,
        got: usize,
        needed: usize,
    },

    #[error("{label} at {temperature}°C has {got} value(s); expected {expected}")]
    SeriesLength {
        label: String,
        temperature: i32,
        got: usize,
        expected: usize,
    },

    #[error("no slope row for {label} at {temperature}°C")]
    MissingSlope { label: String, temperature: i32 },

    #[error("{label} at {temperature}°C: fit failed: {reason}")]
    Fit {
        label: String,
        temperature: i32,
        reason: String,
    },

    #[error("{0}")]
    Signal(String),
}

fn format_temperatures(temps: &[i32]) -> String {
    temps
        .iter()
        .map(|t| format!("{t}°C"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn finite(name: &'static str, value: f64) -> Result<f64, CalcError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CalcError::NonFinite { name, value })
    }
}

fn non_zero(name: &'static str, value: f64) -> Result<f64, CalcError> {
    finite(name, value)?;
    if value == 0.0 {
        Err(CalcError::Zero { name })
    } else {
        Ok(value)
    }
}

/// `FWHM = 2.355·σ`.
pub fn fwhm(sigma: f64) -> Result<f64, CalcError> {
    finite("sigma", sigma)?;
    if sigma < 0.0 {
        return Err(CalcError::NegativeSigma(sigma));
    }
    Ok(FWHM_FACTOR * sigma)
}

/// Energy resolution in percent: `100·fwhm/reference`.
pub fn resolution_percent(fwhm: f64, reference: f64) -> Result<f64, CalcError> {
    finite("fwhm", fwhm)?;
    let reference = non_zero("reference", reference)?;
    Ok(100.0 * fwhm / reference)
}

/// `100·(measured − reference)/reference`.
pub fn relative_error_percent(measured: f64, reference: f64) -> Result<f64, CalcError> {
    finite("measured", measured)?;
    let reference = non_zero("reference", reference)?;
    Ok(100.0 * (measured - reference) / reference)
}

/// `slope·x + intercept`.
pub fn correct_linear(x: f64, slope: f64, intercept: f64) -> Result<f64, CalcError> {
    finite("x", x)?;
    finite("slope", slope)?;
    finite("intercept", intercept)?;
    Ok(slope * x + intercept)
}

/// `(y − intercept)/slope`.
pub fn invert_linear(y: f64, slope: f64, intercept: f64) -> Result<f64, CalcError> {
    finite("y", y)?;
    finite("intercept", intercept)?;
    let slope = non_zero("slope", slope)?;
    Ok((y - intercept) / slope)
}

/// Energy of a peak at `mu` given a reference peak `mu_ref` of energy `e_ref`.
pub fn equivalent_energy(mu: f64, mu_ref: f64, e_ref: f64) -> Result<f64, CalcError> {
    finite("mu", mu)?;
    finite("reference energy", e_ref)?;
    let mu_ref = non_zero("reference mu", mu_ref)?;
    Ok(mu / mu_ref * e_ref)
}

/// `equivalent − reference`.
pub fn energy_shift(equivalent: f64, e_ref: f64) -> Result<f64, CalcError> {
    finite("equivalent energy", equivalent)?;
    finite("reference energy", e_ref)?;
    Ok(equivalent - e_ref)
}

/// Full width at half maximum of a sampled peak.
///
/// The half-maximum crossings on each side of the highest sample are located
/// by linear interpolation between neighbouring samples. `x` must be sorted.
pub fn half_max_width(x: &[f64], y: &[f64]) -> Result<f64, CalcError> {
    if x.len() != y.len() || x.len() < 3 {
        return Err(CalcError::Signal(format!(
            "half-max width needs matching x/y with at least 3 samples (got {} and {})",
            x.len(),
            y.len()
        )));
    }
    let (peak, &top) = y
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, &f64)>, (i, v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .ok_or_else(|| CalcError::Signal("empty signal".to_string()))?;
    if !(top > 0.0) {
        return Err(CalcError::Signal("peak height must be positive".to_string()));
    }
    let half = top / 2.0;

    let left = (0..peak)
        .rev()
        .find(|&i| y[i] <= half)
        .map(|i| interpolate(x[i], y[i], x[i + 1], y[i + 1], half))
        .ok_or_else(|| CalcError::Signal("signal never falls to half maximum on the left".to_string()))?;
    let right = (peak + 1..y.len())
        .find(|&i| y[i] <= half)
        .map(|i| interpolate(x[i - 1], y[i - 1], x[i], y[i], half))
        .ok_or_else(|| CalcError::Signal("signal never falls to half maximum on the right".to_string()))?;

    Ok(right - left)
}

fn interpolate(x0: f64, y0: f64, x1: f64, y1: f64, level: f64) -> f64 {
    if y1 == y0 {
        return x0;
    }
    x0 + (level - y0) * (x1 - x0) / (y1 - y0)
}
