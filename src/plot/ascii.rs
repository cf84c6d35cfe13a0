//! ASCII plotting for terminal output.
//!
//! A fixed-size character grid, deterministic so it can be golden-tested.
//!
//! Plot elements:
//! - data points: `o`
//! - fitted curve: `-` line

use crate::domain::FitResult;
use crate::models::predict;

/// Plot data points with a fitted model sampled across their x range.
pub fn render_fit_plot(points: &[(f64, f64)], fit: &FitResult, width: usize, height: usize) -> String {
    let Some((x_min, x_max)) = x_range(points) else {
        return render_points(points, width, height);
    };
    let curve = sample_curve(fit, x_min, x_max, width.max(2));
    render_plot(points, Some(&curve), x_min, x_max, width, height)
}

/// Plot a fitted model alone over `[x_min, x_max]`.
pub fn render_curve(fit: &FitResult, x_min: f64, x_max: f64, width: usize, height: usize) -> String {
    if !(x_min.is_finite() && x_max.is_finite() && x_max > x_min) {
        return render_points(&[], width, height);
    }
    let curve = sample_curve(fit, x_min, x_max, width.max(2));
    render_plot(&[], Some(&curve), x_min, x_max, width, height)
}

/// Plot data points only.
pub fn render_points(points: &[(f64, f64)], width: usize, height: usize) -> String {
    let (x_min, x_max) = x_range(points).unwrap_or((0.0, 1.0));
    render_plot(points, None, x_min, x_max, width, height)
}

fn render_plot(
    points: &[(f64, f64)],
    curve: Option<&[(f64, f64)]>,
    x_min: f64,
    x_max: f64,
    width: usize,
    height: usize,
) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let (y_min, y_max) = y_range(points, curve).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Curve first so points overlay it.
    if let Some(curve) = curve {
        draw_curve(&mut grid, curve, x_min, x_max, y_min, y_max);
    }
    for &(x, y) in points.iter().filter(|(x, y)| x.is_finite() && y.is_finite()) {
        let col = map_x(x, x_min, x_max, width);
        let row = map_y(y, y_min, y_max, height);
        grid[row][col] = 'o';
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: x=[{x_min:.3}, {x_max:.3}] | y=[{y_min:.2}, {y_max:.2}]\n"
    ));
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
    out
}

fn x_range(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    let (lo, hi) = points
        .iter()
        .map(|&(x, _)| x)
        .filter(|x| x.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));
    (hi > lo).then_some((lo, hi))
}

fn sample_curve(fit: &FitResult, x_min: f64, x_max: f64, n: usize) -> Vec<(f64, f64)> {
    let n = n.max(2);
    (0..n)
        .map(|i| {
            let u = i as f64 / (n as f64 - 1.0);
            let x = x_min + u * (x_max - x_min);
            (x, predict(fit.model, x, &fit.params))
        })
        .filter(|(_, y)| y.is_finite())
        .collect()
}

fn y_range(points: &[(f64, f64)], curve: Option<&[(f64, f64)]>) -> Option<(f64, f64)> {
    let (lo, hi) = points
        .iter()
        .chain(curve.unwrap_or(&[]))
        .map(|&(_, y)| y)
        .filter(|y| y.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| (lo.min(y), hi.max(y)));
    (hi > lo).then_some((lo, hi))
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let pad = ((max - min).abs() * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // Row 0 is the top.
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], x_min: f64, x_max: f64, y_min: f64, y_max: f64) {
    let height = grid.len();
    let width = grid.first().map_or(0, Vec::len);
    if curve.len() < 2 || width == 0 {
        return;
    }

    let mut prev = None;
    for &(x, y) in curve {
        let col = map_x(x, x_min, x_max, width);
        let row = map_y(y, y_min, y_max, height);
        match prev {
            Some((c0, r0)) => draw_line(grid, c0, r0, col, row),
            None => grid[row][col] = '-',
        }
        prev = Some((col, row));
    }
}

/// Bresenham line of `-` over empty cells.
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize) {
    let (mut x, mut y) = (x0 as isize, y0 as isize);
    let (x1, y1) = (x1 as isize, y1 as isize);

    let dx = (x1 - x).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let dy = -(y1 - y).abs();
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if let Some(cell) = grid
            .get_mut(y as usize)
            .and_then(|row| row.get_mut(x as usize))
            .filter(|c| **c == ' ')
        {
            *cell = '-';
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitQuality, ModelKind};

    #[test]
    fn plot_golden_snapshot_small() {
        let fit = FitResult {
            model: ModelKind::Linear,
            params: vec![0.0, 50.0],
            uncertainties: None,
            quality: FitQuality { sse: 0.0, rmse: 0.0, bic: 0.0, n: 2, iterations: 0 },
        };

        let txt = render_fit_plot(&[(20.0, 50.0), (40.0, 60.0)], &fit, 10, 5);
        let expected = concat!(
            "Plot: x=[20.000, 40.000] | y=[49.50, 60.50]\n",
            "         o\n",
            "          \n",
            "          \n",
            "          \n",
            "o---------\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn curve_without_points() {
        let fit = FitResult {
            model: ModelKind::Proportional,
            params: vec![2.0],
            uncertainties: None,
            quality: FitQuality { sse: 0.0, rmse: 0.0, bic: 0.0, n: 3, iterations: 0 },
        };
        let txt = render_curve(&fit, 0.0, 10.0, 20, 6);
        assert!(txt.starts_with("Plot: x=[0.000, 10.000] | y=[-1.00, 21.00]\n"));
        assert!(!txt.contains('o'));
        assert!(txt.lines().nth(6).is_some_and(|row| row.starts_with('-')));
        assert!(render_curve(&fit, 1.0, 1.0, 20, 6).lines().skip(1).all(|row| row.trim().is_empty()));
    }

    #[test]
    fn degenerate_ranges_do_not_panic() {
        let txt = render_points(&[(1.0, 1.0)], 3, 2);
        assert_eq!(txt.lines().count(), 6);
        assert!(txt.contains('o'));
        let txt = render_points(&[], 12, 5);
        assert_eq!(txt.lines().nth(1).map(str::len), Some(12));
    }
}
