//! Multi-start seed grid for the double Gaussian.
//!
//! Both peak positions and the widths are perturbed on a small deterministic
//! grid around the configured guess; the fitter keeps the best result.
//!
//! Seed 0 is always the unperturbed guess, so ties resolve to it.

/// Peak-position offsets, in units of the guessed width.
const MU_SHIFTS: [f64; 3] = [0.0, -1.0, 1.0];

/// Width multipliers.
const WIDTH_SCALES: [f64; 3] = [1.0, 0.5, 2.0];

/// Seeds around `base = [A1, μ1, σ1, A2, μ2, σ2]`.
///
/// Returns an empty grid if `base` does not have six parameters.
pub fn double_gaussian_seeds(base: &[f64]) -> Vec<Vec<f64>> {
    let [a1, mu1, s1, a2, mu2, s2] = match base {
        [a1, mu1, s1, a2, mu2, s2] => [*a1, *mu1, *s1, *a2, *mu2, *s2],
        _ => return Vec::new(),
    };

    let mut seeds = Vec::with_capacity(WIDTH_SCALES.len() * MU_SHIFTS.len().pow(2));
    for &scale in &WIDTH_SCALES {
        for &shift1 in &MU_SHIFTS {
            for &shift2 in &MU_SHIFTS {
                seeds.push(vec![
                    a1,
                    mu1 + shift1 * s1.abs(),
                    s1 * scale,
                    a2,
                    mu2 + shift2 * s2.abs(),
                    s2 * scale,
                ]);
            }
        }
    }
    seeds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_starts_with_base_and_is_unique() {
        let base = [100.0, 35.0, 2.0, 50.0, 140.0, 3.0];
        let seeds = double_gaussian_seeds(&base);
        assert_eq!(seeds.len(), 27);
        assert_eq!(seeds[0], base.to_vec());
        for i in 0..seeds.len() {
            for j in (i + 1)..seeds.len() {
                assert_ne!(seeds[i], seeds[j]);
            }
        }
    }

    #[test]
    fn wrong_arity_gives_empty_grid() {
        assert!(double_gaussian_seeds(&[1.0, 2.0, 3.0]).is_empty());
    }
}
