//! Width and resolution of a fitted spectrum peak.

use serde::Serialize;

use crate::calc::{CalcError, fwhm, resolution_percent};
use crate::domain::{FitResult, ModelKind, ResolutionBasis};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakSummary {
    pub label: String,
    pub model: ModelKind,
    pub mu: f64,
    pub sigma: f64,
    /// `2.355·σ`, in the units of the fitted axis.
    pub fwhm: f64,
    pub resolution: Option<f64>,
}

/// Summarize the dominant Gaussian component of a peak fit.
///
/// For a double Gaussian this is the component with the larger amplitude.
/// Resolution is `fwhm/μ` for [`ResolutionBasis::Mean`] and
/// `fwhm/reference_energy` otherwise; it is `None` when the needed
/// reference energy is absent.
pub fn summarize_peak(
    label: &str,
    fit: &FitResult,
    basis: ResolutionBasis,
    reference_energy: Option<f64>,
) -> Result<PeakSummary, CalcError> {
    let (mu, sigma) = dominant_component(fit).ok_or_else(|| {
        CalcError::Signal(format!("{label}: {} fit has no peak", fit.model.display_name()))
    })?;
    let sigma = sigma.abs();
    let width = fwhm(sigma)?;
    let denominator = match basis {
        ResolutionBasis::Mean => Some(mu),
        ResolutionBasis::ReferenceEnergy => reference_energy,
    };
    let resolution = denominator
        .map(|d| resolution_percent(width, d))
        .transpose()?;

    Ok(PeakSummary {
        label: label.to_string(),
        model: fit.model,
        mu,
        sigma,
        fwhm: width,
        resolution,
    })
}

fn dominant_component(fit: &FitResult) -> Option<(f64, f64)> {
    match fit.model {
        ModelKind::DoubleGaussian => {
            let first = (fit.param("amplitude1")?, fit.param("mu1")?, fit.param("sigma1")?);
            let second = (fit.param("amplitude2")?, fit.param("mu2")?, fit.param("sigma2")?);
            let (_, mu, sigma) = if second.0.abs() > first.0.abs() { second } else { first };
            Some((mu, sigma))
        }
        _ => Some((fit.mean()?, fit.sigma()?)),
    }
}
