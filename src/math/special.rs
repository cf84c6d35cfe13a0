//! Special functions used by the peak and step models.
//!
//! - `erf(x)`, `erfc(x)`: error function and complement
//!
//! Numerical notes:
//! - For `|x| < 0.5` we sum the Maclaurin series of `erf` directly; `1 - erfc`
//!   would lose relative precision near 0.
//! - Elsewhere we use a Chebyshev-fitted `erfc` with fractional error below
//!   `1.2e-7`, which is well under the noise of any counting experiment.

/// Below this magnitude `erf` is computed from its series.
const SERIES_LIMIT: f64 = 0.5;

/// Series terms; at `|x| = 0.5` term 12 is below `1e-17`.
const SERIES_TERMS: usize = 12;

/// `2 / sqrt(π)`.
pub const FRAC_2_SQRT_PI: f64 = std::f64::consts::FRAC_2_SQRT_PI;

/// Error function.
pub fn erf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x.abs() < SERIES_LIMIT {
        return erf_series(x);
    }
    1.0 - erfc(x)
}

/// Complementary error function `1 - erf(x)`.
pub fn erfc(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x.abs() < SERIES_LIMIT {
        return 1.0 - erf_series(x);
    }
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ans = t * poly.exp();
    if x >= 0.0 { ans } else { 2.0 - ans }
}

/// Derivative of `erf`: `2/sqrt(π) · exp(-x²)`.
pub fn erf_derivative(x: f64) -> f64 {
    FRAC_2_SQRT_PI * (-x * x).exp()
}

fn erf_series(x: f64) -> f64 {
    // erf(x) = 2/sqrt(π) Σ (-1)^n x^(2n+1) / (n! (2n+1))
    let x2 = x * x;
    let mut term = x;
    let mut sum = x;
    for n in 1..SERIES_TERMS {
        term *= -x2 / n as f64;
        sum += term / (2 * n + 1) as f64;
    }
    FRAC_2_SQRT_PI * sum
}
