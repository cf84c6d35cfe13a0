//! Low-level fitting routines for a single model kind.
//!
//! Given:
//! - ordered samples `(x_i, y_i)`
//! - for nonlinear models, an initial guess and optional box bounds
//!
//! we return the parameter vector minimizing the sum of squared residuals,
//! together with its quality diagnostics.
//!
//! Linear models are solved in closed form (SVD least squares, or `Σxy/Σx²`
//! through the origin). Peak and step models go through Levenberg–Marquardt.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use thiserror::Error;

use crate::domain::{FitQuality, FitResult, ModelKind};
use crate::fit::guess;
use crate::fit::selection::bic;
use crate::math::{Bounds, LmFailure, LmOptions, levenberg_marquardt, solve_least_squares};
use crate::models::ModelFunction;

/// Why a fit produced no parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("x has {x} values but y has {y}")]
    LengthMismatch { x: usize, y: usize },

    #[error("{model} needs at least {needed} points, got {got}")]
    Underdetermined {
        model: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("all y values are zero")]
    AllZero,

    #[error("input contains non-finite values")]
    NonFiniteInput,

    #[error("{model} needs {needed} initial parameters, got {got}")]
    InitialGuess {
        model: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("x values do not determine the {model} parameters")]
    Singular { model: &'static str },

    #[error("{model}: {reason}")]
    Solver {
        model: &'static str,
        reason: LmFailure,
    },

    #[error("no seed produced a {model} fit")]
    NoCandidates { model: &'static str },
}

/// Options for nonlinear fits. Ignored by the linear models.
#[derive(Debug, Clone, Default)]
pub struct FitOptions {
    /// Starting point. When absent, a data-driven guess is used where one
    /// exists (single Gaussian, erf step).
    pub initial: Option<Vec<f64>>,
    pub bounds: Option<Bounds>,
    pub solver: LmOptions,
}

impl FitOptions {
    pub fn with_initial(mut self, initial: Vec<f64>) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.solver.max_iterations = max_iterations;
        self
    }
}

/// Fit a single model kind.
pub fn fit_model(
    model: ModelKind,
    x: &[f64],
    y: &[f64],
    opts: &FitOptions,
) -> Result<FitResult, FitError> {
    validate(model, x, y)?;
    match model {
        ModelKind::Linear => linear(x, y),
        ModelKind::Proportional => proportional(x, y),
        _ => nonlinear(model, x, y, opts),
    }
}

/// Ordinary least squares `y = slope·x + intercept`.
pub fn fit_linear(x: &[f64], y: &[f64]) -> Result<FitResult, FitError> {
    fit_model(ModelKind::Linear, x, y, &FitOptions::default())
}

/// Slope-only least squares through the origin, `slope = Σxy / Σx²`.
pub fn fit_proportional(x: &[f64], y: &[f64]) -> Result<FitResult, FitError> {
    fit_model(ModelKind::Proportional, x, y, &FitOptions::default())
}

/// Fit a nonlinear model from several starting points and keep the best.
///
/// Seeds are evaluated in parallel. Selection is deterministic: the lowest
/// SSE wins and ties go to the earlier seed. If every seed fails, the error
/// of the first seed is returned.
pub fn fit_multistart(
    model: ModelKind,
    x: &[f64],
    y: &[f64],
    seeds: &[Vec<f64>],
    opts: &FitOptions,
) -> Result<FitResult, FitError> {
    validate(model, x, y)?;
    if seeds.is_empty() {
        return Err(FitError::NoCandidates {
            model: model.display_name(),
        });
    }

    let outcomes: Vec<(usize, Result<FitResult, FitError>)> = seeds
        .par_iter()
        .enumerate()
        .map(|(idx, seed)| {
            let seeded = FitOptions {
                initial: Some(seed.clone()),
                ..opts.clone()
            };
            (idx, nonlinear(model, x, y, &seeded))
        })
        .collect();

    let mut best: Option<(usize, FitResult)> = None;
    let mut first_error: Option<FitError> = None;
    for (idx, outcome) in outcomes {
        match outcome {
            Ok(fit) => {
                let better = match &best {
                    None => true,
                    Some((best_idx, b)) => {
                        fit.quality.sse < b.quality.sse
                            || (fit.quality.sse == b.quality.sse && idx < *best_idx)
                    }
                };
                if better {
                    best = Some((idx, fit));
                }
            }
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match (best, first_error) {
        (Some((_, fit)), _) => Ok(fit),
        (None, Some(e)) => Err(e),
        (None, None) => Err(FitError::NoCandidates {
            model: model.display_name(),
        }),
    }
}

fn validate(model: ModelKind, x: &[f64], y: &[f64]) -> Result<(), FitError> {
    if x.len() != y.len() {
        return Err(FitError::LengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    let k = model.param_count();
    if x.len() < k {
        return Err(FitError::Underdetermined {
            model: model.display_name(),
            needed: k,
            got: x.len(),
        });
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(FitError::NonFiniteInput);
    }
    if y.iter().all(|v| *v == 0.0) {
        return Err(FitError::AllZero);
    }
    Ok(())
}

fn linear(x: &[f64], y: &[f64]) -> Result<FitResult, FitError> {
    let n = x.len();
    let mut design = DMatrix::<f64>::zeros(n, 2);
    for (i, &xi) in x.iter().enumerate() {
        design[(i, 0)] = xi;
        design[(i, 1)] = 1.0;
    }
    let target = DVector::from_column_slice(y);

    let beta = solve_least_squares(&design, &target).ok_or(FitError::Singular {
        model: ModelKind::Linear.display_name(),
    })?;
    let params = vec![beta[0], beta[1]];
    let sse = sse_of(ModelKind::Linear, x, y, &params);

    let uncertainties = if n > 2 {
        (design.transpose() * &design)
            .try_inverse()
            .map(|inv| standard_errors(&inv, sse / (n - 2) as f64))
    } else {
        None
    };

    Ok(build_result(ModelKind::Linear, params, uncertainties, sse, n, 0))
}

fn proportional(x: &[f64], y: &[f64]) -> Result<FitResult, FitError> {
    let n = x.len();
    let sxx: f64 = x.iter().map(|v| v * v).sum();
    if sxx == 0.0 {
        return Err(FitError::Singular {
            model: ModelKind::Proportional.display_name(),
        });
    }
    let sxy: f64 = x.iter().zip(y.iter()).map(|(a, b)| a * b).sum();
    let params = vec![sxy / sxx];
    let sse = sse_of(ModelKind::Proportional, x, y, &params);

    let uncertainties = (n > 1).then(|| vec![(sse / (n - 1) as f64 / sxx).sqrt()]);

    Ok(build_result(ModelKind::Proportional, params, uncertainties, sse, n, 0))
}

fn nonlinear(
    model: ModelKind,
    x: &[f64],
    y: &[f64],
    opts: &FitOptions,
) -> Result<FitResult, FitError> {
    let k = model.param_count();

    let initial = match &opts.initial {
        Some(p0) => p0.clone(),
        None => default_guess(model, x, y).ok_or(FitError::InitialGuess {
            model: model.display_name(),
            needed: k,
            got: 0,
        })?,
    };
    if initial.len() != k {
        return Err(FitError::InitialGuess {
            model: model.display_name(),
            needed: k,
            got: initial.len(),
        });
    }
    if initial.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFiniteInput);
    }
    if let Some(b) = &opts.bounds {
        if b.len() != k {
            return Err(FitError::InvalidBounds(format!(
                "{} needs {k} bounds, got {}",
                model.display_name(),
                b.len()
            )));
        }
    }

    let outcome = levenberg_marquardt(
        &ModelFunction(model),
        x,
        y,
        &initial,
        opts.bounds.as_ref(),
        &opts.solver,
    )
    .map_err(|reason| FitError::Solver {
        model: model.display_name(),
        reason,
    })?;

    let mut params = outcome.params;
    // Width enters squared, so its sign is arbitrary.
    match model {
        ModelKind::Gaussian | ModelKind::ErfStep => params[2] = params[2].abs(),
        ModelKind::DoubleGaussian => {
            params[2] = params[2].abs();
            params[5] = params[5].abs();
        }
        _ => {}
    }

    let uncertainties = outcome
        .covariance
        .map(|cov| cov.diagonal().iter().map(|v| v.max(0.0).sqrt()).collect());

    Ok(build_result(
        model,
        params,
        uncertainties,
        outcome.sse,
        x.len(),
        outcome.iterations,
    ))
}

fn default_guess(model: ModelKind, x: &[f64], y: &[f64]) -> Option<Vec<f64>> {
    match model {
        ModelKind::Gaussian => guess::gaussian_from_weights(x, y),
        ModelKind::ErfStep => guess::erf_step(x, y),
        _ => None,
    }
}

fn standard_errors(inverse: &DMatrix<f64>, s2: f64) -> Vec<f64> {
    inverse
        .diagonal()
        .iter()
        .map(|v| (v * s2).max(0.0).sqrt())
        .collect()
}

fn sse_of(model: ModelKind, x: &[f64], y: &[f64], params: &[f64]) -> f64 {
    x.iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| {
            let r = yi - crate::models::predict(model, xi, params);
            r * r
        })
        .sum()
}

fn build_result(
    model: ModelKind,
    params: Vec<f64>,
    uncertainties: Option<Vec<f64>>,
    sse: f64,
    n: usize,
    iterations: usize,
) -> FitResult {
    let k = model.param_count();
    FitResult {
        model,
        params,
        uncertainties,
        quality: FitQuality {
            sse,
            rmse: (sse / n as f64).sqrt(),
            bic: bic(n, sse, k),
            n,
            iterations,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::predict;

    fn sample(model: ModelKind, p: &[f64], xs: impl Iterator<Item = f64>) -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = xs.collect();
        let y = x.iter().map(|&v| predict(model, v, p)).collect();
        (x, y)
    }

    #[test]
    fn proportional_fit_through_origin() {
        let fit = fit_proportional(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]).unwrap();
        assert!((fit.slope().unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(fit.intercept(), Some(0.0));
        assert!(fit.quality.sse < 1e-20);
    }

    #[test]
    fn linear_fit_recovers_line_and_errors() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [3.1, 4.9, 7.2, 8.8, 11.1];
        let fit = fit_linear(&x, &y).unwrap();
        assert!((fit.slope().unwrap() - 1.99).abs() < 1e-9);
        assert!((fit.intercept().unwrap() - 1.05).abs() < 1e-9);
        let errs = fit.uncertainties.unwrap();
        assert_eq!(errs.len(), 2);
        assert!(errs.iter().all(|e| *e > 0.0));
    }

    #[test]
    fn gaussian_fit_recovers_noiseless_peak() {
        let (x, y) = sample(ModelKind::Gaussian, &[100.0, 25.0, 3.0], (0..50).map(|i| i as f64));
        let opts = FitOptions::default().with_initial(vec![80.0, 23.0, 5.0]);
        let fit = fit_model(ModelKind::Gaussian, &x, &y, &opts).unwrap();

        let mu = fit.mean().unwrap();
        let sigma = fit.sigma().unwrap();
        let a = fit.param("amplitude").unwrap();
        assert!((mu - 25.0).abs() / 25.0 < 0.01, "mu = {mu}");
        assert!((sigma - 3.0).abs() / 3.0 < 0.01, "sigma = {sigma}");
        assert!((a - 100.0).abs() / 100.0 < 0.05, "A = {a}");
    }

    #[test]
    fn gaussian_width_reported_positive() {
        let (x, y) = sample(ModelKind::Gaussian, &[50.0, 10.0, 2.0], (0..40).map(|i| i as f64 * 0.5));
        let opts = FitOptions::default().with_initial(vec![40.0, 9.0, -2.5]);
        let fit = fit_model(ModelKind::Gaussian, &x, &y, &opts).unwrap();
        assert!(fit.sigma().unwrap() > 0.0);
        assert!((fit.sigma().unwrap() - 2.0).abs() < 1e-4);
    }

    #[test]
    fn erf_step_recovers_turn_on() {
        let (x, y) = sample(
            ModelKind::ErfStep,
            &[1200.0, 900.0, 15.0],
            (0..100).map(|i| 800.0 + 2.0 * i as f64),
        );
        let fit = fit_model(ModelKind::ErfStep, &x, &y, &FitOptions::default()).unwrap();
        assert!((fit.param("mu").unwrap() - 900.0).abs() < 0.1);
        assert!((fit.param("sigma").unwrap() - 15.0).abs() < 0.1);
        assert!((fit.param("amplitude").unwrap() - 1200.0).abs() < 1.0);
    }

    #[test]
    fn multistart_picks_lowest_sse() {
        let truth = [100.0, 35.0, 2.0, 50.0, 140.0, 2.5];
        let (x, y) = sample(ModelKind::DoubleGaussian, &truth, (0..200).map(|i| i as f64 + 0.5));
        let seeds = vec![
            // Swapped peaks: converges to a worse local minimum or not at all.
            vec![50.0, 140.0, 2.0, 100.0, 35.0, 2.0],
            vec![90.0, 34.0, 3.0, 45.0, 141.0, 3.0],
        ];
        let bounds = Bounds::new(
            vec![0.0, 20.0, 0.1, 0.0, 80.0, 0.1],
            vec![f64::INFINITY, 50.0, f64::INFINITY, f64::INFINITY, 160.0, f64::INFINITY],
        )
        .unwrap();
        let opts = FitOptions::default().with_bounds(bounds);

        let fit = fit_multistart(ModelKind::DoubleGaussian, &x, &y, &seeds, &opts).unwrap();
        assert!((fit.params[1] - 35.0).abs() < 1e-3);
        assert!((fit.params[4] - 140.0).abs() < 1e-3);
        assert!(fit.quality.sse < 1e-6);
    }

    #[test]
    fn degenerate_inputs_are_errors() {
        assert!(matches!(
            fit_linear(&[1.0, 2.0], &[1.0]),
            Err(FitError::LengthMismatch { x: 2, y: 1 })
        ));
        assert!(matches!(
            fit_linear(&[1.0], &[1.0]),
            Err(FitError::Underdetermined { needed: 2, got: 1, .. })
        ));
        assert_eq!(
            fit_proportional(&[1.0, 2.0], &[0.0, 0.0]).unwrap_err(),
            FitError::AllZero
        );
        assert_eq!(
            fit_proportional(&[1.0, f64::NAN], &[1.0, 2.0]).unwrap_err(),
            FitError::NonFiniteInput
        );
        assert!(matches!(
            fit_linear(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0]),
            Err(FitError::Singular { .. })
        ));
        assert!(matches!(
            fit_proportional(&[0.0, 0.0], &[1.0, 2.0]),
            Err(FitError::Singular { .. })
        ));
        assert!(matches!(
            fit_model(
                ModelKind::DoubleGaussian,
                &[1.0; 8],
                &[1.0; 8],
                &FitOptions::default()
            ),
            Err(FitError::InitialGuess { needed: 6, got: 0, .. })
        ));
    }

    #[test]
    fn iteration_limit_surfaces_as_error() {
        let (x, y) = sample(ModelKind::Gaussian, &[100.0, 25.0, 3.0], (0..50).map(|i| i as f64));
        let opts = FitOptions::default()
            .with_initial(vec![10.0, 15.0, 8.0])
            .with_max_iterations(1);
        let err = fit_model(ModelKind::Gaussian, &x, &y, &opts).unwrap_err();
        assert!(matches!(
            err,
            FitError::Solver {
                reason: LmFailure::NotConverged { iterations: 1 },
                ..
            }
        ));
    }
}
