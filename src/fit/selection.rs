//! Peak model selection (single vs double Gaussian) using BIC.
//!
//! For `--model auto` the tool fits both models and computes:
//! - SSE / RMSE
//! - BIC = n * ln(SSE/n) + k * ln(n)
//!
//! Selection rules:
//! 1. Skip underdetermined models: require `n >= k + 5`
//! 2. Choose the model with minimum BIC
//! 3. If ΔBIC < 2 between the best and a simpler model, pick the simpler model

use log::{debug, warn};

use crate::domain::{FitResult, ModelChoice, ModelKind};
use crate::fit::fitter::{FitError, FitOptions, fit_model, fit_multistart};
use crate::fit::seed_grid::double_gaussian_seeds;

/// Minimum number of extra observations beyond parameter count in auto mode.
const MIN_N_BUFFER: usize = 5;

/// How to fit a spectrum peak.
#[derive(Debug, Clone)]
pub struct PeakFitPlan {
    pub choice: ModelChoice,
    /// Single-Gaussian options. A missing initial guess is derived from the data.
    pub single: FitOptions,
    /// Double-Gaussian options; `initial` is the base of the seed grid.
    pub double: Option<FitOptions>,
}

/// Output of fitting + selection.
#[derive(Debug, Clone)]
pub struct FitSelection {
    pub best: FitResult,
    /// Fits for all attempted models that succeeded.
    pub fits: Vec<FitResult>,
    /// Models that were skipped or failed, and why.
    pub skipped: Vec<(ModelKind, String)>,
}

/// Fit the peak model(s) requested by `plan` and select the best.
pub fn fit_peak(x: &[f64], y: &[f64], plan: &PeakFitPlan) -> Result<FitSelection, FitError> {
    match plan.choice {
        ModelChoice::Gaussian => {
            let fit = fit_model(ModelKind::Gaussian, x, y, &plan.single)?;
            Ok(single_selection(fit))
        }
        ModelChoice::Double => {
            let fit = fit_double(x, y, plan.double.as_ref())?;
            Ok(single_selection(fit))
        }
        ModelChoice::Auto => fit_auto(x, y, plan),
    }
}

fn fit_auto(x: &[f64], y: &[f64], plan: &PeakFitPlan) -> Result<FitSelection, FitError> {
    let n = x.len();
    let mut fits = Vec::new();
    let mut skipped = Vec::new();
    let mut first_error = None;

    for kind in [ModelKind::Gaussian, ModelKind::DoubleGaussian] {
        let k = kind.param_count();
        if n < k + MIN_N_BUFFER {
            skipped.push((
                kind,
                format!("Underdetermined: n={n} < k+{MIN_N_BUFFER}={}", k + MIN_N_BUFFER),
            ));
            continue;
        }
        if kind == ModelKind::DoubleGaussian && plan.double.is_none() {
            skipped.push((kind, "no initial guess configured".to_string()));
            continue;
        }

        let outcome = match kind {
            ModelKind::Gaussian => fit_model(kind, x, y, &plan.single),
            _ => fit_double(x, y, plan.double.as_ref()),
        };
        match outcome {
            Ok(fit) => fits.push(fit),
            Err(e) => {
                debug!("{} fit failed: {e}", kind.display_name());
                skipped.push((kind, e.to_string()));
                first_error.get_or_insert(e);
            }
        }
    }

    if fits.is_empty() {
        return Err(first_error.unwrap_or(FitError::Underdetermined {
            model: ModelKind::Gaussian.display_name(),
            needed: ModelKind::Gaussian.param_count() + MIN_N_BUFFER,
            got: n,
        }));
    }

    let best = select_by_bic(&fits);
    if first_error.is_some() {
        warn!(
            "Model selection considered {} of 2 models; chose {}.",
            fits.len(),
            best.model.display_name()
        );
    }

    Ok(FitSelection {
        best,
        fits,
        skipped,
    })
}

fn fit_double(x: &[f64], y: &[f64], opts: Option<&FitOptions>) -> Result<FitResult, FitError> {
    let model = ModelKind::DoubleGaussian;
    let missing = || FitError::InitialGuess {
        model: model.display_name(),
        needed: model.param_count(),
        got: 0,
    };
    let opts = opts.ok_or_else(missing)?;
    let base = opts.initial.as_ref().ok_or_else(missing)?;

    let seeds = double_gaussian_seeds(base);
    if seeds.is_empty() {
        return Err(FitError::InitialGuess {
            model: model.display_name(),
            needed: model.param_count(),
            got: base.len(),
        });
    }
    fit_multistart(model, x, y, &seeds, opts)
}

fn single_selection(fit: FitResult) -> FitSelection {
    FitSelection {
        best: fit.clone(),
        fits: vec![fit],
        skipped: Vec::new(),
    }
}

/// Bayesian information criterion for a least-squares fit.
pub fn bic(n: usize, sse: f64, k: usize) -> f64 {
    let n_f = n as f64;
    let sse_per = (sse / n_f).max(1e-12);
    n_f * sse_per.ln() + (k as f64) * n_f.ln()
}

fn select_by_bic(fits: &[FitResult]) -> FitResult {
    let mut best = &fits[0];
    for f in &fits[1..] {
        if f.quality.bic < best.quality.bic {
            best = f;
        }
    }

    let best_bic = best.quality.bic;

    // Walk in order of increasing complexity and take the first fit within
    // 2 BIC points of the best.
    let order = [ModelKind::Gaussian, ModelKind::DoubleGaussian];
    for kind in order {
        if let Some(f) = fits.iter().find(|f| f.model == kind) {
            if f.quality.bic <= best_bic + 2.0 {
                return f.clone();
            }
        }
    }

    best.clone()
}
