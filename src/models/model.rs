//! Model evaluation for the peak, step and line models.
//!
//! The fitter relies on two primitive operations:
//! - predict `y(x)` given a parameter vector (for residuals/plots)
//! - fill the analytic gradient `∂y/∂p` at `x` (for Levenberg–Marquardt)
//!
//! Parameter order follows [`ModelKind::param_names`].

use std::f64::consts::SQRT_2;

use crate::domain::ModelKind;
use crate::math::{ResidualModel, erf, erf_derivative};

/// Predict `y(x)` for the given model kind.
pub fn predict(model: ModelKind, x: f64, p: &[f64]) -> f64 {
    match model {
        ModelKind::Gaussian => gaussian(x, p[0], p[1], p[2]),
        ModelKind::DoubleGaussian => gaussian(x, p[0], p[1], p[2]) + gaussian(x, p[3], p[4], p[5]),
        ModelKind::ErfStep => {
            let z = (x - p[1]) / (SQRT_2 * p[2]);
            p[0] * (1.0 + erf(z)) / 2.0
        }
        ModelKind::Linear => p[0] * x + p[1],
        ModelKind::Proportional => p[0] * x,
    }
}

/// Fill `∂y/∂p` at `x`.
///
/// # Panics
/// Panics if `p` or `out` is shorter than `model.param_count()`.
pub fn fill_gradient(model: ModelKind, x: f64, p: &[f64], out: &mut [f64]) {
    match model {
        ModelKind::Gaussian => gaussian_gradient(x, &p[0..3], &mut out[0..3]),
        ModelKind::DoubleGaussian => {
            gaussian_gradient(x, &p[0..3], &mut out[0..3]);
            gaussian_gradient(x, &p[3..6], &mut out[3..6]);
        }
        ModelKind::ErfStep => {
            let (a, mu, sigma) = (p[0], p[1], p[2]);
            let d = x - mu;
            let z = d / (SQRT_2 * sigma);
            let bump = erf_derivative(z) / (2.0 * SQRT_2);
            out[0] = (1.0 + erf(z)) / 2.0;
            out[1] = -a * bump / sigma;
            out[2] = -a * bump * d / (sigma * sigma);
        }
        ModelKind::Linear => {
            out[0] = x;
            out[1] = 1.0;
        }
        ModelKind::Proportional => out[0] = x,
    }
}

fn gaussian(x: f64, a: f64, mu: f64, sigma: f64) -> f64 {
    let d = x - mu;
    a * (-(d * d) / (2.0 * sigma * sigma)).exp()
}

fn gaussian_gradient(x: f64, p: &[f64], out: &mut [f64]) {
    let (a, mu, sigma) = (p[0], p[1], p[2]);
    let d = x - mu;
    let s2 = sigma * sigma;
    let e = (-(d * d) / (2.0 * s2)).exp();
    out[0] = e;
    out[1] = a * e * d / s2;
    out[2] = a * e * d * d / (s2 * sigma);
}

/// Adapter exposing a [`ModelKind`] to the nonlinear solver.
#[derive(Debug, Clone, Copy)]
pub struct ModelFunction(pub ModelKind);

impl ResidualModel for ModelFunction {
    fn n_params(&self) -> usize {
        self.0.param_count()
    }

    fn value(&self, x: f64, p: &[f64]) -> f64 {
        predict(self.0, x, p)
    }

    fn gradient(&self, x: f64, p: &[f64], out: &mut [f64]) {
        fill_gradient(self.0, x, p, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_gradient(model: ModelKind, p: &[f64], xs: &[f64]) {
        let k = model.param_count();
        let mut analytic = vec![0.0; k];
        for &x in xs {
            fill_gradient(model, x, p, &mut analytic);
            for j in 0..k {
                let h = 1e-6 * p[j].abs().max(1.0);
                let mut up = p.to_vec();
                let mut down = p.to_vec();
                up[j] += h;
                down[j] -= h;
                let fd = (predict(model, x, &up) - predict(model, x, &down)) / (2.0 * h);
                assert!(
                    (fd - analytic[j]).abs() <= 1e-5 * fd.abs().max(1.0),
                    "{model:?} d/dp{j} at x={x}: analytic {} vs fd {fd}",
                    analytic[j]
                );
            }
        }
    }

    #[test]
    fn gaussian_peaks_at_mean() {
        let p = [100.0, 25.0, 3.0];
        assert!((predict(ModelKind::Gaussian, 25.0, &p) - 100.0).abs() < 1e-12);
        let half = predict(ModelKind::Gaussian, 25.0 + 3.0 * (2.0 * 2f64.ln()).sqrt(), &p);
        assert!((half - 50.0).abs() < 1e-9);
    }

    #[test]
    fn erf_step_is_half_amplitude_at_midpoint() {
        let p = [400.0, 900.0, 12.0];
        assert!((predict(ModelKind::ErfStep, 900.0, &p) - 200.0).abs() < 1e-9);
        assert!(predict(ModelKind::ErfStep, 700.0, &p) < 1e-6);
        assert!((predict(ModelKind::ErfStep, 1100.0, &p) - 400.0).abs() < 1e-6);
    }

    #[test]
    fn analytic_gradients_match_finite_differences() {
        let xs = [18.0, 24.0, 25.0, 27.5, 33.0];
        check_gradient(ModelKind::Gaussian, &[100.0, 25.0, 3.0], &xs);
        check_gradient(ModelKind::DoubleGaussian, &[80.0, 22.0, 2.0, 40.0, 29.0, 3.5], &xs);
        check_gradient(ModelKind::ErfStep, &[50.0, 25.0, 4.0], &xs);
        check_gradient(ModelKind::Linear, &[1.3, -0.4], &xs);
        check_gradient(ModelKind::Proportional, &[1.3], &xs);
    }
}
