//! Formatted terminal output.
//!
//! Line formats are fixed so downstream scripts can keep parsing them; most
//! of them are also readable by the extractors in `io::extract`.

use crate::calc::{CalibrationReport, CorrectedEnergy, PeakSummary, ShiftRow, ThresholdAnalysis, TotPrediction};
use crate::fit::FitSelection;
use crate::io::extract::Extraction;

/// `Group_Cu: 2Ikrum Re, Temperature: 40°C, Absolute Shift: ..., Relative Error: ...%, Energy Resolution = ...%`
pub fn format_shift_line(row: &ShiftRow) -> String {
    format!(
        "{}, Temperature: {}°C, Absolute Shift: {:.4} keV, Relative Error: {:.2}%, Energy Resolution = {}",
        row.key(),
        row.temperature,
        row.shift,
        row.relative_error,
        fmt_percent(row.resolution),
    )
}

/// `Group_Cu: 2Ikrum Re, Temperature: 40°C, Energy: 8.36 keV`
pub fn format_energy_line(row: &ShiftRow) -> String {
    format!(
        "{}, Temperature: {}°C, Energy: {:.2} keV",
        row.key(),
        row.temperature,
        row.equivalent_energy
    )
}

/// `20°C_2Ikrum Re: μ = 51.20, σ = 3.10, FWHM = 7.30 keV, Energy Resolution = 90.80%`
pub fn format_peak_line(peak: &PeakSummary) -> String {
    format!(
        "{}: μ = {:.2}, σ = {:.2}, FWHM = {:.2} keV, Energy Resolution = {}",
        peak.label,
        peak.mu,
        peak.sigma,
        peak.fwhm,
        fmt_percent(peak.resolution),
    )
}

pub fn format_correction_line(c: &CorrectedEnergy) -> String {
    format!(
        "Ikrum: {}, Temperature: {}°C, Actual Energy: {:.4} keV, Corrected Energy: {:.4} keV",
        c.label, c.temperature, c.measured, c.corrected
    )
}

pub fn format_prediction_line(p: &TotPrediction) -> String {
    format!(
        "{}: Mean TOT = {:.2}, Predicted Energy = {:.2} keV",
        p.label, p.tot, p.energy
    )
}

/// Slope table followed by the target estimates per temperature.
pub fn format_calibration(report: &CalibrationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<16} {:>6} {:>10} {:>10} {:>8}\n",
        "Ikrum", "T(°C)", "slope", "intercept", "RMSE"
    ));
    out.push_str(&format!("{:-<16} {:-<6} {:-<10} {:-<10} {:-<8}\n", "", "", "", "", ""));
    for fit in &report.fits {
        out.push_str(&format!(
            "{:<16} {:>6} {:>10.4} {:>10.4} {:>8.4}\n",
            truncate(&fit.label, 16),
            fit.temperature,
            fit.slope(),
            fit.intercept(),
            fit.fit.quality.rmse,
        ));
    }

    let mut temperature = None;
    for fit in report.fits.iter().filter(|f| !f.estimates.is_empty()) {
        if temperature != Some(fit.temperature) {
            out.push_str(&format!("\nEstimated Measured Energy for {}°C:\n", fit.temperature));
            temperature = Some(fit.temperature);
        }
        for (target, measured) in &fit.estimates {
            out.push_str(&format!(
                "  Ikrum {}: For Actual Energy {target} keV → {measured:.2} keV\n",
                fit.label
            ));
        }
    }
    out
}

/// Threshold-scan result in the tagged μ/σ line format plus the edge fit.
pub fn format_threshold(label: &str, analysis: &ThresholdAnalysis) -> String {
    let mut out = String::new();
    if let Some(step) = &analysis.step {
        out.push_str(&format!(
            "{label}: edge μ = {:.2}, σ = {:.2} ({} points)\n",
            step.mean().unwrap_or(f64::NAN),
            step.sigma().map(f64::abs).unwrap_or(f64::NAN),
            analysis.points.len(),
        ));
    }
    if let Some(peak) = &analysis.peak {
        out.push_str(&format!(
            "{label}: μ = {:.2}, σ = {:.2}, FWHM = {}, Energy Resolution = {}\n",
            peak.mean().unwrap_or(f64::NAN),
            peak.sigma().map(f64::abs).unwrap_or(f64::NAN),
            analysis.fwhm.map_or_else(|| "n/a".to_string(), |w| format!("{w:.2}")),
            fmt_percent(analysis.resolution),
        ));
    }
    out
}

/// Per-model diagnostics; the selected model is marked with `*`.
pub fn format_fit_diagnostics(selection: &FitSelection) -> String {
    let mut out = String::from("Model diagnostics:\n");
    for fit in &selection.fits {
        let chosen = if fit.model == selection.best.model { "*" } else { " " };
        out.push_str(&format!(
            "{chosen} {:<16} SSE={:.3} RMSE={:.3} BIC={:.3} iter={}\n",
            fit.model.display_name(),
            fit.quality.sse,
            fit.quality.rmse,
            fit.quality.bic,
            fit.quality.iterations,
        ));
    }
    for (kind, reason) in &selection.skipped {
        out.push_str(&format!("  (skipped {}) {reason}\n", kind.display_name()));
    }
    out.push_str(&format!(
        "Parameters: {}\n",
        fmt_params(selection.best.model.param_names(), &selection.best.params, selection.best.uncertainties.as_deref())
    ));
    out
}

pub fn format_extraction_summary<T>(source: &str, extraction: &Extraction<T>) -> String {
    format!(
        "{source}: {} of {} line(s) used, {} skipped",
        extraction.items.len(),
        extraction.lines_read,
        extraction.skipped.len()
    )
}

/// Trailing failure section; empty when there is nothing to report.
pub fn format_failures<E: std::fmt::Display>(failures: &[E]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let mut out = format!("\nFailures ({}):\n", failures.len());
    for f in failures {
        out.push_str(&format!("  - {f}\n"));
    }
    out
}

fn fmt_percent(v: Option<f64>) -> String {
    v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}%"))
}

fn fmt_params(names: &[&str], values: &[f64], errors: Option<&[f64]>) -> String {
    let parts: Vec<String> = names
        .iter()
        .zip(values)
        .enumerate()
        .map(|(i, (name, v))| match errors.and_then(|e| e.get(i)) {
            Some(err) => format!("{name}={v:.4}±{err:.4}"),
            None => format!("{name}={v:.4}"),
        })
        .collect();
    parts.join(", ")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}
