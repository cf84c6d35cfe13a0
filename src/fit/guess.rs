//! Data-driven starting points for the nonlinear models.

use crate::math::{Bounds, highest_peak};

/// Single-Gaussian guess `[max y, weighted mean, weighted std]`.
///
/// Negative `y` values get zero weight. Returns `None` when there is no
/// positive weight or the samples do not span any width.
pub fn gaussian_from_weights(x: &[f64], y: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = y.iter().map(|v| v.max(0.0)).sum();
    if !(total > 0.0) || x.len() != y.len() {
        return None;
    }
    let mean = x.iter().zip(y).map(|(a, w)| a * w.max(0.0)).sum::<f64>() / total;
    let var = x
        .iter()
        .zip(y)
        .map(|(a, w)| (a - mean).powi(2) * w.max(0.0))
        .sum::<f64>()
        / total;
    let sigma = if var > 0.0 { var.sqrt() } else { span(x)? / 10.0 };
    let amplitude = max_of(y)?;
    Some(vec![amplitude, mean, sigma])
}

/// Single-Gaussian guess from raw per-hit values: `[peak_height, mean, std]`.
pub fn gaussian_from_samples(values: &[f64], peak_height: f64) -> Option<Vec<f64>> {
    if values.is_empty() || !(peak_height > 0.0) {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if !(std > 0.0) {
        return None;
    }
    Some(vec![peak_height, mean, std])
}

/// Erf-step guess `[max y, mean x, span/10]`.
pub fn erf_step(x: &[f64], y: &[f64]) -> Option<Vec<f64>> {
    if x.is_empty() {
        return None;
    }
    let width = span(x)? / 10.0;
    if !(width > 0.0) {
        return None;
    }
    let mean = x.iter().sum::<f64>() / x.len() as f64;
    Some(vec![max_of(y)?, mean, width])
}

/// Gaussian guess and bounds for the peak of a smoothed derivative.
///
/// The mean starts at the highest local maximum; the width at a tenth of the
/// x span. Bounds are `[0, min x, 1] ..= [2A, max x, max(10, span/4)]`.
pub fn derivative_peak(x: &[f64], y: &[f64]) -> Option<(Vec<f64>, Bounds)> {
    if x.len() != y.len() {
        return None;
    }
    let amplitude = max_of(y)?;
    if !(amplitude > 0.0) {
        return None;
    }
    let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = hi - lo;
    if !(width > 0.0) {
        return None;
    }

    let peak = highest_peak(y)?;
    let initial = vec![amplitude, x[peak], width / 10.0];
    let bounds = Bounds::new(
        vec![0.0, lo, 1.0],
        vec![2.0 * amplitude, hi, (width / 4.0).max(10.0)],
    )
    .ok()?;
    Some((initial, bounds))
}

fn span(x: &[f64]) -> Option<f64> {
    let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (hi >= lo).then_some(hi - lo)
}

fn max_of(y: &[f64]) -> Option<f64> {
    y.iter().copied().fold(None, |m: Option<f64>, v| match m {
        Some(m) if m >= v => Some(m),
        _ => Some(v),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_guess_centres_on_mass() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [0.0, 1.0, 4.0, 1.0, 0.0];
        let g = gaussian_from_weights(&x, &y).unwrap();
        assert_eq!(g[0], 4.0);
        assert!((g[1] - 3.0).abs() < 1e-12);
        assert!((g[2] - (2.0_f64 / 6.0).sqrt()).abs() < 1e-12);

        assert!(gaussian_from_weights(&x, &[0.0; 5]).is_none());
    }

    #[test]
    fn sample_guess_uses_population_std() {
        let g = gaussian_from_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 10.0).unwrap();
        assert_eq!(g, vec![10.0, 5.0, 2.0]);
        assert!(gaussian_from_samples(&[3.0, 3.0], 1.0).is_none());
    }

    #[test]
    fn erf_guess() {
        let g = erf_step(&[800.0, 900.0, 1000.0], &[0.0, 10.0, 30.0]).unwrap();
        assert_eq!(g, vec![30.0, 900.0, 20.0]);
    }

    #[test]
    fn derivative_guess_and_bounds() {
        let x: Vec<f64> = (0..9).map(|i| 100.0 + 10.0 * i as f64).collect();
        let y = [0.0, 1.0, 3.0, 8.0, 12.0, 7.0, 2.0, 1.0, 0.0];
        let (p0, b) = derivative_peak(&x, &y).unwrap();
        assert_eq!(p0, vec![12.0, 140.0, 8.0]);
        assert_eq!(b.lower, vec![0.0, 100.0, 1.0]);
        assert_eq!(b.upper, vec![24.0, 180.0, 20.0]);

        assert!(derivative_peak(&x, &[-1.0; 9]).is_none());
    }
}
