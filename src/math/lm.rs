//! Levenberg–Marquardt nonlinear least squares.
//!
//! We minimize
//!
//! ```text
//! SSE(p) = Σ (y_i - f(x_i; p))^2
//! ```
//!
//! by repeatedly solving the damped normal equations
//!
//! ```text
//! (JᵀJ + λ·diag(JᵀJ)) δ = Jᵀr
//! ```
//!
//! and accepting `p + δ` only when it lowers the SSE. λ shrinks after a
//! successful step and grows after a rejected one, moving the solver between
//! Gauss–Newton and gradient descent.
//!
//! Box bounds are enforced by projecting every trial point back into the box.

use nalgebra::{DMatrix, DVector};

use crate::math::solve_least_squares;

/// Smallest damping factor reached after repeated successful steps.
const MIN_LAMBDA: f64 = 1e-12;
/// Damping factor above which no downhill step is assumed to exist.
const MAX_LAMBDA: f64 = 1e16;
/// Floor for the diagonal scaling so flat directions still get damped.
const DIAG_FLOOR: f64 = 1e-12;

/// A model `f(x; p)` with an analytic gradient in `p`.
pub trait ResidualModel {
    fn n_params(&self) -> usize;

    fn value(&self, x: f64, p: &[f64]) -> f64;

    /// Write `∂f/∂p_j` at `x` into `out` (length `n_params()`).
    fn gradient(&self, x: f64, p: &[f64], out: &mut [f64]);
}

/// Solver tuning.
#[derive(Debug, Clone)]
pub struct LmOptions {
    /// Maximum number of outer iterations (Jacobian evaluations).
    pub max_iterations: usize,
    /// Relative SSE reduction below which an accepted step ends the fit.
    pub ftol: f64,
    /// Relative parameter step below which an accepted step ends the fit.
    pub xtol: f64,
    pub initial_lambda: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            ftol: 1e-12,
            xtol: 1e-12,
            initial_lambda: 1e-3,
        }
    }
}

/// Inclusive per-parameter bounds. Use `±f64::INFINITY` for a free side.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Result<Self, String> {
        if lower.len() != upper.len() {
            return Err(format!(
                "bounds length mismatch: {} lower vs {} upper",
                lower.len(),
                upper.len()
            ));
        }
        for (i, (lo, hi)) in lower.iter().zip(upper.iter()).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(format!("invalid bounds for parameter {i}: [{lo}, {hi}]"));
            }
        }
        Ok(Self { lower, upper })
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Clamp `p` into the box.
    pub fn project(&self, p: &mut [f64]) {
        for (j, v) in p.iter_mut().enumerate() {
            if let (Some(&lo), Some(&hi)) = (self.lower.get(j), self.upper.get(j)) {
                *v = v.clamp(lo, hi);
            }
        }
    }
}

/// Converged solver state.
#[derive(Debug, Clone)]
pub struct LmOutcome {
    pub params: Vec<f64>,
    pub sse: f64,
    pub iterations: usize,
    /// `s²·(JᵀJ)⁻¹` at the solution, when `n > k` and `JᵀJ` is invertible.
    pub covariance: Option<DMatrix<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LmFailure {
    /// The model produced a non-finite value or derivative.
    NonFinite,
    /// The Jacobian vanished: the data carry no information about `p`.
    Singular,
    NotConverged { iterations: usize },
}

impl std::fmt::Display for LmFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LmFailure::NonFinite => write!(f, "model evaluation produced non-finite values"),
            LmFailure::Singular => write!(f, "Jacobian is singular at the initial guess"),
            LmFailure::NotConverged { iterations } => {
                write!(f, "no convergence within {iterations} iterations")
            }
        }
    }
}

/// Fit `model` to `(x, y)` starting from `p0`.
pub fn levenberg_marquardt<M: ResidualModel>(
    model: &M,
    x: &[f64],
    y: &[f64],
    p0: &[f64],
    bounds: Option<&Bounds>,
    opts: &LmOptions,
) -> Result<LmOutcome, LmFailure> {
    let k = model.n_params();

    let mut p = p0.to_vec();
    if let Some(b) = bounds {
        b.project(&mut p);
    }

    let mut sse = sum_squares(model, x, y, &p);
    if !sse.is_finite() {
        return Err(LmFailure::NonFinite);
    }

    let mut lambda = opts.initial_lambda.max(MIN_LAMBDA);

    for iteration in 1..=opts.max_iterations.max(1) {
        if sse == 0.0 {
            return Ok(finish(model, x, y, p, sse, iteration));
        }

        let (jac, r) = jacobian_and_residuals(model, x, y, &p)?;
        let jt = jac.transpose();
        let jtj = &jt * &jac;
        let jtr = &jt * &r;

        if jtj.diagonal().iter().all(|d| *d <= DIAG_FLOOR) {
            return Err(LmFailure::Singular);
        }

        let mut accepted = false;
        while lambda <= MAX_LAMBDA {
            let mut a = jtj.clone();
            for j in 0..k {
                a[(j, j)] += lambda * jtj[(j, j)].max(DIAG_FLOOR);
            }

            let Some(delta) = solve_least_squares(&a, &jtr) else {
                lambda *= 10.0;
                continue;
            };

            let mut trial: Vec<f64> = p.iter().zip(delta.iter()).map(|(a, d)| a + d).collect();
            if let Some(b) = bounds {
                b.project(&mut trial);
            }
            let trial_sse = sum_squares(model, x, y, &trial);

            if trial_sse.is_finite() && trial_sse < sse {
                let step = norm(trial.iter().zip(p.iter()).map(|(a, b)| a - b));
                let scale = norm(p.iter().copied());
                let reduction = (sse - trial_sse) / sse;

                p = trial;
                sse = trial_sse;
                lambda = (lambda / 10.0).max(MIN_LAMBDA);
                accepted = true;

                if reduction <= opts.ftol || step <= opts.xtol * (scale + opts.xtol) {
                    return Ok(finish(model, x, y, p, sse, iteration));
                }
                break;
            }

            lambda *= 10.0;
        }

        if !accepted {
            // No damping yields a downhill step: p is a (projected) minimum.
            return Ok(finish(model, x, y, p, sse, iteration));
        }
    }

    Err(LmFailure::NotConverged {
        iterations: opts.max_iterations,
    })
}

fn finish<M: ResidualModel>(
    model: &M,
    x: &[f64],
    y: &[f64],
    params: Vec<f64>,
    sse: f64,
    iterations: usize,
) -> LmOutcome {
    let n = x.len();
    let k = model.n_params();

    let covariance = if n > k {
        jacobian_and_residuals(model, x, y, &params)
            .ok()
            .and_then(|(jac, _)| (jac.transpose() * &jac).try_inverse())
            .map(|inv| inv * (sse / (n - k) as f64))
            .filter(|cov| cov.iter().all(|v| v.is_finite()))
    } else {
        None
    };

    LmOutcome {
        params,
        sse,
        iterations,
        covariance,
    }
}

fn jacobian_and_residuals<M: ResidualModel>(
    model: &M,
    x: &[f64],
    y: &[f64],
    p: &[f64],
) -> Result<(DMatrix<f64>, DVector<f64>), LmFailure> {
    let n = x.len();
    let k = model.n_params();

    let mut jac = DMatrix::<f64>::zeros(n, k);
    let mut r = DVector::<f64>::zeros(n);
    let mut row = vec![0.0; k];

    for i in 0..n {
        model.gradient(x[i], p, &mut row);
        for j in 0..k {
            if !row[j].is_finite() {
                return Err(LmFailure::NonFinite);
            }
            jac[(i, j)] = row[j];
        }
        let resid = y[i] - model.value(x[i], p);
        if !resid.is_finite() {
            return Err(LmFailure::NonFinite);
        }
        r[i] = resid;
    }

    Ok((jac, r))
}

fn sum_squares<M: ResidualModel>(model: &M, x: &[f64], y: &[f64], p: &[f64]) -> f64 {
    x.iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| {
            let r = yi - model.value(xi, p);
            r * r
        })
        .sum()
}

fn norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt()
}
