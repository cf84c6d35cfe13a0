//! Linear least squares solver.
//!
//! Used in three places:
//!
//! - ordinary linear calibration fits (`y = slope·x + intercept`)
//! - local polynomial fits inside the Savitzky–Golay smoother
//! - the damped normal equations of each Levenberg–Marquardt step
//!
//! We solve via SVD so tall (more rows than columns) and near-singular
//! systems are handled without panicking. (Nalgebra's `QR::solve` is intended
//! for square systems.)

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.nrows() == 0 || x.ncols() == 0 || x.nrows() != y.len() {
        return None;
    }
    if x.iter().any(|v| !v.is_finite()) || y.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let svd = x.clone().svd(true, true);

    // A rank-deficient design (e.g. all x identical in a line fit) has a
    // vanishing singular value; reject it rather than return a minimum-norm
    // solution that looks like a calibration.
    let max_sv = svd.singular_values.max();
    let min_sv = svd.singular_values.min();
    if !(max_sv > 0.0) || min_sv <= max_sv * 1e-12 {
        return None;
    }

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}
