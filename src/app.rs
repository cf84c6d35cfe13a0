//! Top-level application orchestration.
//!
//! `src/main.rs` only parses arguments and sets up logging; this module is
//! the "real main" that:
//! - loads and overrides the pipeline configuration
//! - runs one analysis pipeline per subcommand
//! - prints report lines, failures and plots
//! - writes optional exports

use log::{info, warn};
use serde::Serialize;

use crate::cli::{
    CalibrateArgs, Cli, Command, CorrectArgs, ExportOpts, PlotArgs, PlotOpts, PredictArgs,
    ShiftArgs, SpectrumArgs, SynthCommand, SynthScanArgs, SynthSpectrumArgs, ThlScanArgs,
};
use crate::config::PipelineConfig;
use crate::data::{PeakShape, ScanSynth, SpectrumSynth};
use crate::domain::{FitResult, Quantity};
use crate::error::AppError;
use crate::io::export::write_rows_csv;
use crate::io::json::{FitBundle, FitEntry, read_fit_bundle, write_fit_bundle};
use crate::io::thl::HitsSource;
use crate::report;

pub mod pipeline;

/// Run one parsed command line.
pub fn run(cli: Cli) -> Result<(), AppError> {
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Spectrum(args) => handle_spectrum(config, args),
        Command::ThlScan(args) => handle_thl_scan(config, args),
        Command::Shift(args) => handle_shift(config, args),
        Command::Calibrate(args) => handle_calibrate(config, args),
        Command::Correct(args) => handle_correct(args),
        Command::Predict(args) => handle_predict(config, args),
        Command::Plot(args) => handle_plot(args),
        Command::Synth(SynthCommand::Spectrum(args)) => handle_synth_spectrum(args),
        Command::Synth(SynthCommand::ThlScan(args)) => handle_synth_scan(args),
    }
}

fn handle_spectrum(mut config: PipelineConfig, args: SpectrumArgs) -> Result<(), AppError> {
    apply_spectrum_overrides(&mut config, &args)?;
    let reference_energy = match (args.reference_energy, &args.material) {
        (Some(energy), _) => Some(energy),
        (None, Some(material)) => Some(config.reference_energies.get(material).ok_or_else(|| {
            AppError::new(2, format!("No reference energy for material '{material}'."))
        })?),
        (None, None) => None,
    };

    let batch = pipeline::run_spectra(&config, &args.inputs, reference_energy)?;

    let mut rows = Vec::new();
    let mut entries = Vec::new();
    let x_range = [config.spectrum.range[0], config.spectrum.range[1]];
    for (label, run) in &batch.runs {
        if batch.runs.len() > 1 {
            println!("\n== {label} ==");
        }
        println!(
            "{}",
            report::format_extraction_summary(&run.input.display().to_string(), &run.hits)
        );
        print!("{}", report::format_fit_diagnostics(&run.selection));
        println!("{}", report::format_peak_line(&run.summary));

        let centers = run.histogram.centers();
        if args.plot.plot {
            let points: Vec<(f64, f64)> = centers.iter().copied().zip(run.histogram.counts.iter().copied()).collect();
            print_plot(&points, &run.selection.best, &args.plot);
        }

        let best = &run.selection.best;
        rows.extend(centers.iter().zip(&run.histogram.counts).map(|(&center, &count)| HistogramRow {
            label: label.clone(),
            center,
            count,
            fitted: crate::models::predict(best.model, center, &best.params),
        }));
        entries.extend(run.selection.fits.iter().map(|fit| entry(label, None, Some(x_range), fit)));
    }

    if batch.runs.len() > 1 {
        println!("\nComparison:");
        for (_, run) in &batch.runs {
            println!("{}", report::format_peak_line(&run.summary));
        }
    }
    print!("{}", report::format_failures(&batch.failures));

    if let Some(path) = &args.export.export {
        write_rows_csv(path, &rows)?;
        info!("Wrote {} histogram row(s) to {}", rows.len(), path.display());
    }
    export_bundle(&args.export, "spectrum", entries)
}

fn apply_spectrum_overrides(config: &mut PipelineConfig, args: &SpectrumArgs) -> Result<(), AppError> {
    let s = &mut config.spectrum;
    if let Some(column) = args.column {
        s.column = column;
    }
    if let Some(bins) = args.bins {
        s.bins = bins;
    }
    if let Some(range) = &args.range {
        s.range = pair(range)?;
    }
    if let Some(model) = args.model {
        s.model = model;
    }
    if let Some(basis) = args.basis {
        s.basis = basis;
    }
    config.validate()
}

fn handle_thl_scan(mut config: PipelineConfig, args: ThlScanArgs) -> Result<(), AppError> {
    let t = &mut config.threshold;
    if let Some(window) = &args.window {
        t.layout.window = Some(pair(window)?);
    }
    if args.hits_summary {
        t.layout.hits = HitsSource::Summary;
    }
    if args.falling_edge {
        t.falling_edge = true;
    }
    if let Some(basis) = args.basis {
        t.basis = basis;
    }
    config.validate()?;

    let mut scans = Vec::new();
    if !args.inputs.is_empty() {
        scans.push((args.label.clone(), pipeline::ScanInput::Files(args.inputs.clone())));
    }
    scans.extend(
        args.scans
            .iter()
            .map(|s| (s.label.clone(), pipeline::ScanInput::Directory(s.path.clone()))),
    );

    let batch = pipeline::run_threshold_scans(&config, &scans, args.reference_energy)?;

    let mut failures = Vec::new();
    let mut rows = Vec::new();
    let mut entries = Vec::new();
    for (label, run) in &batch.runs {
        println!(
            "{label}: {} point(s), {} file(s) skipped, {} outside window",
            run.scan.points.len(),
            run.scan.skipped.len(),
            run.scan.filtered
        );
        print!("{}", report::format_threshold(label, &run.analysis));

        let a = &run.analysis;
        if args.plot.plot {
            let points: Vec<(f64, f64)> = a.points.iter().map(|p| (p.thl as f64, p.hits)).collect();
            match &a.step {
                Some(step) => print_plot(&points, step, &args.plot),
                None => print_points(&points, &args.plot),
            }
            let derivative: Vec<(f64, f64)> = a.derivative_x.iter().copied().zip(a.smoothed.iter().copied()).collect();
            match &a.peak {
                Some(peak) => print_plot(&derivative, peak, &args.plot),
                None => print_points(&derivative, &args.plot),
            }
        }

        failures.extend(
            run.scan
                .skipped
                .iter()
                .map(|(path, reason)| format!("{}: {reason}", path.display())),
        );
        failures.extend(a.failures.iter().map(ToString::to_string));

        rows.extend(a.points.iter().enumerate().map(|(i, p)| ThresholdRow {
            label: label.clone(),
            thl: p.thl,
            hits: p.hits,
            derivative: i.checked_sub(1).and_then(|j| a.derivative.get(j).copied()),
            smoothed: i.checked_sub(1).and_then(|j| a.smoothed.get(j).copied()),
        }));
        let thl_range = a
            .points
            .first()
            .zip(a.points.last())
            .map(|(lo, hi)| [lo.thl as f64, hi.thl as f64]);
        entries.extend(
            [&a.step, &a.peak]
                .into_iter()
                .flatten()
                .map(|fit| entry(label, None, thl_range, fit)),
        );
    }
    failures.extend(batch.failures.iter().cloned());
    print!("{}", report::format_failures(&failures));

    if let Some(path) = &args.export.export {
        write_rows_csv(path, &rows)?;
    }
    export_bundle(&args.export, "thl-scan", entries)
}

fn handle_shift(mut config: PipelineConfig, args: ShiftArgs) -> Result<(), AppError> {
    if let Some(t) = args.reference_temperature {
        config.reference_temperature = t;
    }
    if let Some(basis) = args.basis {
        config.shift.basis = basis;
    }
    let group = args
        .group
        .clone()
        .unwrap_or_else(|| pipeline::default_group(&args.input));

    let run = pipeline::run_shift(&config, &args.input, args.format, &group, args.reference_energy)?;

    println!(
        "{}",
        report::format_extraction_summary(&args.input.display().to_string(), &run.records)
    );
    for row in &run.report.rows {
        println!("{}", report::format_shift_line(row));
    }
    if args.energies {
        println!();
        for row in &run.report.rows {
            println!("{}", report::format_energy_line(row));
        }
    }
    print!("{}", report::format_failures(&run.report.failures));

    if let Some(path) = &args.export {
        write_rows_csv(path, &run.report.rows)?;
    }
    Ok(())
}

fn handle_calibrate(mut config: PipelineConfig, args: CalibrateArgs) -> Result<(), AppError> {
    if args.linear {
        config.calibration.through_origin = false;
    }
    if !args.targets.is_empty() {
        config.calibration.targets = args.targets.clone();
    }
    config.validate()?;

    let run = pipeline::run_calibration(&config, &args.input)?;

    println!(
        "{}",
        report::format_extraction_summary(&args.input.display().to_string(), &run.records)
    );
    print!("{}", report::format_calibration(&run.report));
    print!("{}", report::format_failures(&run.report.failures));

    let measured_vs_actual = |label: &str, temperature: i32| -> Vec<(f64, f64)> {
        run.records
            .items
            .iter()
            .filter(|r| r.label() == label && r.temperature() == temperature)
            .filter_map(|r| Some((r.get(Quantity::Energy)?, config.reference_energies.for_record(r)?)))
            .collect()
    };

    if args.plot.plot {
        for fit in &run.report.fits {
            println!("\n{} at {}°C:", fit.label, fit.temperature);
            print_plot(&measured_vs_actual(&fit.label, fit.temperature), &fit.fit, &args.plot);
        }
    }

    if let Some(path) = &args.slope_table {
        crate::io::slope_table::save_slope_table(path, &run.report.slope_rows())?;
        info!("Wrote slope table to {}", path.display());
    }
    if let Some(path) = &args.export.export {
        let points: Vec<_> = run.report.fits.iter().flat_map(|f| f.points.iter().cloned()).collect();
        write_rows_csv(path, &points)?;
    }
    let entries = run
        .report
        .fits
        .iter()
        .map(|f| {
            let x = measured_vs_actual(&f.label, f.temperature);
            entry(&f.label, Some(f.temperature), span(x.iter().map(|p| p.0)), &f.fit)
        })
        .collect();
    export_bundle(&args.export, "calibrate", entries)
}

fn handle_correct(args: CorrectArgs) -> Result<(), AppError> {
    let group = pipeline::default_group(&args.input);
    let run = pipeline::run_correction(&args.input, &args.slopes, &group)?;

    for (line, reason) in &run.bad_rows {
        warn!("{} line {line}: {reason}", args.slopes.display());
    }
    for c in &run.corrected {
        println!("{}", report::format_correction_line(c));
    }
    print!("{}", report::format_failures(&run.failures));

    if let Some(path) = &args.export {
        write_rows_csv(path, &run.corrected)?;
    }
    Ok(())
}

fn handle_predict(config: PipelineConfig, args: PredictArgs) -> Result<(), AppError> {
    let known = args
        .known
        .clone()
        .unwrap_or_else(|| config.calibration.known_energies.clone());
    let run = pipeline::run_prediction(&args.input, &known)?;

    for p in &run.predictions {
        println!("{}", report::format_prediction_line(p));
    }
    print!("{}", report::format_failures(&run.failures));

    if let Some(path) = &args.export.export {
        let rows: Vec<PredictionRow> = run
            .predictions
            .iter()
            .map(|p| PredictionRow {
                label: p.label.clone(),
                temperature: p.temperature,
                tot: p.tot,
                energy: p.energy,
                slope: p.fit.slope().unwrap_or(f64::NAN),
                intercept: p.fit.intercept().unwrap_or(0.0),
            })
            .collect();
        write_rows_csv(path, &rows)?;
    }
    let energy_range = span(known.iter().copied());
    let entries = run
        .predictions
        .iter()
        .map(|p| entry(&p.label, Some(p.temperature), energy_range, &p.fit))
        .collect();
    export_bundle(&args.export, "predict", entries)
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let bundle = read_fit_bundle(&args.bundle)?;
    if bundle.entries.is_empty() {
        return Err(AppError::new(3, format!("No fits in '{}'.", args.bundle.display())));
    }

    println!("{} ({}, {})", bundle.command, bundle.tool, bundle.generated_at.to_rfc3339());
    for e in &bundle.entries {
        let title = match e.temperature {
            Some(t) => format!("{} at {t}°C", e.label),
            None => e.label.clone(),
        };
        println!("\n{title}: {}", e.fit.model.display_name());
        match e.x_range {
            Some([lo, hi]) => println!(
                "{}",
                crate::plot::render_curve(&e.fit, lo, hi, args.width, args.height)
            ),
            None => println!("  (no x range recorded)"),
        }
    }
    Ok(())
}

fn handle_synth_spectrum(args: SynthSpectrumArgs) -> Result<(), AppError> {
    let mut params = SpectrumSynth {
        hits: args.hits,
        seed: args.seed,
        ..SpectrumSynth::default()
    };
    if !args.peaks.is_empty() {
        params.peaks = args.peaks.iter().map(|s| parse_peak(s)).collect::<Result<_, _>>()?;
    }

    let hits = crate::data::generate_hits(&params)?;
    std::fs::write(&args.out, crate::data::hit_list_text(&hits))
        .map_err(|e| AppError::new(2, format!("Failed to write '{}': {e}", args.out.display())))?;
    println!("Wrote {} hit(s) to {}", hits.len(), args.out.display());
    Ok(())
}

fn handle_synth_scan(args: SynthScanArgs) -> Result<(), AppError> {
    let params = ScanSynth {
        amplitude: args.amplitude,
        mu: args.mu,
        sigma: args.sigma,
        thl_start: args.start,
        thl_stop: args.stop,
        thl_step: args.step,
        noise: !args.no_noise,
        seed: args.seed,
    };
    let points = crate::data::generate_scan(&params)?;
    let files = crate::data::write_scan_dumps(&args.out_dir, &args.prefix, &points, args.pixels)?;
    println!("Wrote {} dump file(s) to {}", files.len(), args.out_dir.display());
    Ok(())
}

/// One histogram bin with the selected model evaluated at its center.
#[derive(Debug, Serialize)]
struct HistogramRow {
    label: String,
    center: f64,
    count: f64,
    fitted: f64,
}

#[derive(Debug, Serialize)]
struct ThresholdRow {
    label: String,
    thl: i64,
    hits: f64,
    derivative: Option<f64>,
    smoothed: Option<f64>,
}

#[derive(Debug, Serialize)]
struct PredictionRow {
    label: String,
    temperature: i32,
    tot: f64,
    energy: f64,
    slope: f64,
    intercept: f64,
}

fn print_plot(points: &[(f64, f64)], fit: &FitResult, opts: &PlotOpts) {
    println!("{}", crate::plot::render_fit_plot(points, fit, opts.width, opts.height));
}

fn print_points(points: &[(f64, f64)], opts: &PlotOpts) {
    println!("{}", crate::plot::render_points(points, opts.width, opts.height));
}

fn entry(label: &str, temperature: Option<i32>, x_range: Option<[f64; 2]>, fit: &FitResult) -> FitEntry {
    FitEntry {
        label: label.to_string(),
        temperature,
        x_range,
        fit: fit.clone(),
    }
}

fn export_bundle(opts: &ExportOpts, command: &str, entries: Vec<FitEntry>) -> Result<(), AppError> {
    let Some(path) = &opts.export_json else {
        return Ok(());
    };
    let bundle = FitBundle::new(command, entries);
    write_fit_bundle(path, &bundle)?;
    info!("Wrote {} fit(s) to {}", bundle.entries.len(), path.display());
    Ok(())
}

fn span(values: impl Iterator<Item = f64>) -> Option<[f64; 2]> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    (hi > lo).then_some([lo, hi])
}

fn pair<T: Copy>(values: &[T]) -> Result<[T; 2], AppError> {
    match values {
        [a, b] => Ok([*a, *b]),
        _ => Err(AppError::new(2, "Expected exactly two values.")),
    }
}

/// `mu,sigma[,weight]`
fn parse_peak(s: &str) -> Result<PeakShape, AppError> {
    let invalid = || AppError::new(2, format!("Invalid peak '{s}': expected MU,SIGMA[,WEIGHT]"));
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;
    match values.as_slice() {
        [mu, sigma] => Ok(PeakShape { weight: 1.0, mu: *mu, sigma: *sigma }),
        [mu, sigma, weight] => Ok(PeakShape { weight: *weight, mu: *mu, sigma: *sigma }),
        _ => Err(invalid()),
    }
}
