//! Sampled-signal helpers for threshold scans.
//!
//! - `savgol`: Savitzky–Golay smoothing (local polynomial least squares)
//! - `diff`: first difference
//! - `highest_peak`: index of the tallest interior local maximum

use nalgebra::{DMatrix, DVector};

use crate::math::solve_least_squares;

/// Largest smoothing window used on threshold-scan derivatives.
pub const MAX_SAVGOL_WINDOW: usize = 51;

/// Window length for a signal of `n` samples: `min(n - 1, 51)`, bumped to
/// the next odd number when even.
///
/// Returns `None` when the signal is too short for an order-2 fit.
pub fn savgol_window(n: usize) -> Option<usize> {
    let mut window = n.saturating_sub(1).min(MAX_SAVGOL_WINDOW);
    if window % 2 == 0 {
        window += 1;
    }
    if window < 3 || window > n { None } else { Some(window) }
}

/// Savitzky–Golay smoothing with polynomial order `order`.
///
/// For each sample we fit a polynomial to the `window` samples around it and
/// evaluate the fit at that sample. Near the edges the window is shifted
/// (clamped) to stay inside the signal rather than padded.
///
/// Returns `None` if `window` is even, larger than the signal, or not larger
/// than `order`.
pub fn savgol(y: &[f64], window: usize, order: usize) -> Option<Vec<f64>> {
    let n = y.len();
    if window % 2 == 0 || window > n || window <= order {
        return None;
    }
    let half = window / 2;

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let start = i.saturating_sub(half).min(n - window);
        let rows = start..start + window;

        // Local coordinates centred on the evaluated sample keep the design
        // well conditioned.
        let mut design = DMatrix::<f64>::zeros(window, order + 1);
        let mut target = DVector::<f64>::zeros(window);
        for (r, j) in rows.enumerate() {
            let t = j as f64 - i as f64;
            let mut power = 1.0;
            for c in 0..=order {
                design[(r, c)] = power;
                power *= t;
            }
            target[r] = y[j];
        }

        let coeffs = solve_least_squares(&design, &target)?;
        // Evaluated at t = 0, only the constant term survives.
        out.push(coeffs[0]);
    }
    Some(out)
}

/// `y[i+1] - y[i]`; one element shorter than `y`.
pub fn diff(y: &[f64]) -> Vec<f64> {
    y.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Index of the highest interior local maximum.
///
/// A sample is a local maximum if it is strictly greater than its left
/// neighbour and not smaller than its right one (flat tops count once, at
/// their left edge). Falls back to the global maximum when no interior peak
/// exists, e.g. for monotonic signals.
pub fn highest_peak(y: &[f64]) -> Option<usize> {
    if y.is_empty() {
        return None;
    }

    let interior = (1..y.len().saturating_sub(1))
        .filter(|&i| y[i] > y[i - 1] && y[i] >= y[i + 1])
        .fold(None, |best: Option<usize>, i| match best {
            Some(b) if y[b] >= y[i] => Some(b),
            _ => Some(i),
        });

    interior.or_else(|| {
        y.iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
                Some((_, bv)) if bv >= v => best,
                _ => Some((i, v)),
            })
            .map(|(i, _)| i)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_odd_and_capped() {
        assert_eq!(savgol_window(2), None);
        assert_eq!(savgol_window(3), Some(3));
        assert_eq!(savgol_window(4), Some(3));
        assert_eq!(savgol_window(5), Some(5));
        assert_eq!(savgol_window(12), Some(11));
        assert_eq!(savgol_window(200), Some(51));
        assert_eq!(savgol_window(53), Some(51));
    }

    #[test]
    fn savgol_preserves_quadratics() {
        let y: Vec<f64> = (0..30)
            .map(|i| {
                let x = i as f64;
                0.5 * x * x - 3.0 * x + 7.0
            })
            .collect();
        let smoothed = savgol(&y, 7, 2).unwrap();
        for (a, b) in y.iter().zip(smoothed.iter()) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
    }

    #[test]
    fn savgol_damps_alternating_noise() {
        let y: Vec<f64> = (0..21).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let smoothed = savgol(&y, 9, 2).unwrap();
        let max = smoothed[5..15].iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(max < 0.5, "max residual wiggle {max}");
    }

    #[test]
    fn savgol_rejects_bad_windows() {
        assert!(savgol(&[1.0, 2.0, 3.0], 4, 2).is_none());
        assert!(savgol(&[1.0, 2.0, 3.0], 5, 2).is_none());
        assert!(savgol(&[1.0, 2.0, 3.0], 1, 2).is_none());
    }

    #[test]
    fn diff_and_peak() {
        assert_eq!(diff(&[1.0, 4.0, 9.0]), vec![3.0, 5.0]);
        assert!(diff(&[1.0]).is_empty());

        let y = [0.0, 2.0, 1.0, 5.0, 5.0, 3.0, 0.0];
        assert_eq!(highest_peak(&y), Some(3));
        assert_eq!(highest_peak(&[1.0, 2.0, 3.0]), Some(2));
        assert_eq!(highest_peak(&[]), None);
    }
}
