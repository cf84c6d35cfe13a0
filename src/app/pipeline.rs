//! Shared analysis pipelines: extract -> fit/compute -> collect failures.
//!
//! Each `run_*` returns everything a front-end prints or exports, so the
//! handlers in `app` only deal with presentation. Exit codes are decided
//! here: unreadable input is 2, nothing usable extracted is 3, and a whole
//! run without a single computed result is 4.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::calc::{
    CalcError, CalibrationReport, CorrectedEnergy, PeakSummary, ShiftReport, ThresholdAnalysis,
    TotPrediction, analyze_threshold_scan, calibrate_energies, compute_shifts, correct_energies,
    group_key, predict_from_series, summarize_peak,
};
use crate::cli::LabeledInput;
use crate::config::PipelineConfig;
use crate::domain::{GroupedRecords, Record, SeriesLine};
use crate::error::AppError;
use crate::fit::guess::gaussian_from_samples;
use crate::fit::{FitSelection, fit_peak};
use crate::io::extract::{Extraction, LineFormat, read_records, read_series};
use crate::io::slope_table::load_slope_table;
use crate::io::spectrum::{Histogram, load_hit_column};
use crate::io::thl::{ThresholdScan, list_scan_files, load_threshold_scan};

/// All computed outputs of a `tpxcal spectrum` run.
#[derive(Debug, Clone)]
pub struct SpectrumRun {
    pub input: PathBuf,
    pub hits: Extraction<f64>,
    pub histogram: Histogram,
    pub selection: FitSelection,
    pub summary: PeakSummary,
}

/// Histogram one hit list and fit its peak.
pub fn run_spectrum(
    config: &PipelineConfig,
    input: &Path,
    label: &str,
    reference_energy: Option<f64>,
) -> Result<SpectrumRun, AppError> {
    let s = &config.spectrum;
    let hits = load_hit_column(input, s.column)?;
    info!(
        "{}: {} hit value(s), {} line(s) skipped",
        input.display(),
        hits.items.len(),
        hits.skipped.len()
    );
    ensure_items(input, &hits)?;

    let [lo, hi] = s.range;
    let histogram = Histogram::new(&hits.items, s.bins, (lo, hi)).map_err(|e| AppError::new(2, e))?;
    if histogram.total() == 0.0 {
        return Err(AppError::new(
            3,
            format!("No hits of '{}' fall inside [{lo}, {hi}].", input.display()),
        ));
    }

    let mut plan = config.peak_plan()?;
    if plan.single.initial.is_none() {
        let in_range: Vec<f64> = hits.items.iter().copied().filter(|v| (lo..=hi).contains(v)).collect();
        plan.single.initial = gaussian_from_samples(&in_range, histogram.peak_count());
    }
    let selection = fit_peak(&histogram.centers(), &histogram.counts, &plan)?;
    let summary = summarize_peak(label, &selection.best, s.basis, reference_energy)?;
    info!(
        "{label}: selected {} (μ = {:.3}, σ = {:.3})",
        selection.best.model.display_name(),
        summary.mu,
        summary.sigma
    );

    Ok(SpectrumRun {
        input: input.to_path_buf(),
        hits,
        histogram,
        selection,
        summary,
    })
}

/// Results of one pipeline over several labeled inputs.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    /// `(label, run)` in input order, for every input that produced a result.
    pub runs: Vec<(String, T)>,
    /// `label: reason` for every input that did not.
    pub failures: Vec<String>,
}

/// Fit every hit list of a comparison run.
///
/// An input that fails is reported and the others continue; see
/// [`run_batch`] for when the whole run fails.
pub fn run_spectra(
    config: &PipelineConfig,
    inputs: &[LabeledInput],
    reference_energy: Option<f64>,
) -> Result<Batch<SpectrumRun>, AppError> {
    run_batch(
        inputs.iter().map(|i| (i.label.as_str(), i.path.as_path())),
        |label, path| run_spectrum(config, path, label, reference_energy),
    )
}

/// Where the dump files of one threshold scan come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanInput {
    Files(Vec<PathBuf>),
    /// Every file directly inside the directory.
    Directory(PathBuf),
}

/// Analyze several threshold scans, e.g. one per temperature.
pub fn run_threshold_scans(
    config: &PipelineConfig,
    scans: &[(String, ScanInput)],
    reference_energy: Option<f64>,
) -> Result<Batch<ThresholdRun>, AppError> {
    run_batch(
        scans.iter().map(|(label, input)| (label.as_str(), input)),
        |label, input| {
            let files = match input {
                ScanInput::Files(files) => files.clone(),
                ScanInput::Directory(dir) => list_scan_files(dir).map_err(|e| AppError::new(2, e))?,
            };
            run_threshold(config, &files, label, reference_energy)
        },
    )
}

/// Run `run` on every labeled item, collecting per-item failures.
///
/// Fails only when no item produced a result: a single item keeps its own
/// error, several failed items give exit code 3 with every reason.
fn run_batch<'a, I, T>(
    items: impl Iterator<Item = (&'a str, &'a I)>,
    run: impl Fn(&str, &I) -> Result<T, AppError>,
) -> Result<Batch<T>, AppError>
where
    I: ?Sized + 'a,
{
    let mut batch = Batch {
        runs: Vec::new(),
        failures: Vec::new(),
    };
    let mut errors = Vec::new();

    for (label, item) in items {
        match run(label, item) {
            Ok(result) => batch.runs.push((label.to_string(), result)),
            Err(err) => {
                warn!("{label}: {err}");
                batch.failures.push(format!("{label}: {err}"));
                errors.push(err);
            }
        }
    }

    if !batch.runs.is_empty() {
        if !batch.failures.is_empty() {
            info!(
                "{} input(s) analyzed, {} failed.",
                batch.runs.len(),
                batch.failures.len()
            );
        }
        return Ok(batch);
    }
    if errors.len() > 1 {
        return Err(AppError::new(
            3,
            format!("Every input failed: {}", batch.failures.join("; ")),
        ));
    }
    Err(errors
        .pop()
        .unwrap_or_else(|| AppError::new(2, "No input given.")))
}

#[derive(Debug, Clone)]
pub struct ThresholdRun {
    pub scan: ThresholdScan,
    pub analysis: ThresholdAnalysis,
}

/// Load one point per dump and analyze the scan.
pub fn run_threshold(
    config: &PipelineConfig,
    inputs: &[PathBuf],
    label: &str,
    reference_energy: Option<f64>,
) -> Result<ThresholdRun, AppError> {
    let scan = load_threshold_scan(inputs, &config.threshold.layout);
    if scan.points.is_empty() {
        return Err(AppError::new(
            3,
            format!("No threshold points loaded from {} file(s).", inputs.len()),
        ));
    }

    let mut settings = config.threshold_settings();
    settings.reference_energy = reference_energy;
    let analysis = analyze_threshold_scan(label, &scan.points, &settings)
        .map_err(|e| AppError::new(3, e.to_string()))?;
    if analysis.step.is_none() && analysis.peak.is_none() {
        return Err(AppError::new(
            4,
            format!("{label}: {}", join_failures(&analysis.failures)),
        ));
    }

    Ok(ThresholdRun { scan, analysis })
}

#[derive(Debug, Clone)]
pub struct ShiftRun {
    pub records: Extraction<Record>,
    pub report: ShiftReport,
}

/// Extract μ/σ records and compute shifts against the baseline temperature.
pub fn run_shift(
    config: &PipelineConfig,
    input: &Path,
    format: LineFormat,
    group: &str,
    reference_energy: Option<f64>,
) -> Result<ShiftRun, AppError> {
    let records = read_records(input, format, group)?;
    info!(
        "{}: {} record(s) extracted, {} line(s) skipped",
        input.display(),
        records.items.len(),
        records.skipped.len()
    );
    ensure_items(input, &records)?;

    let grouped = GroupedRecords::from_records(records.items.iter().cloned(), group_key);
    let mut settings = config.shift_settings();
    settings.reference_energy = reference_energy;
    let report = compute_shifts(&grouped, &config.reference_energies, &settings);
    info!(
        "{} group(s): {} row(s) computed, {} failure(s)",
        grouped.len(),
        report.rows.len(),
        report.failures.len()
    );
    if report.rows.is_empty() {
        return Err(AppError::new(
            4,
            format!("No shift computed: {}", join_failures(&report.failures)),
        ));
    }

    Ok(ShiftRun { records, report })
}

#[derive(Debug, Clone)]
pub struct CalibrationRun {
    pub records: Extraction<Record>,
    pub report: CalibrationReport,
}

/// Fit actual vs measured energy for every (label, temperature).
pub fn run_calibration(config: &PipelineConfig, input: &Path) -> Result<CalibrationRun, AppError> {
    let records = read_records(input, LineFormat::KeyValue, "")?;
    info!(
        "{}: {} record(s) extracted, {} line(s) skipped",
        input.display(),
        records.items.len(),
        records.skipped.len()
    );
    ensure_items(input, &records)?;

    let c = &config.calibration;
    let report = calibrate_energies(
        &records.items,
        &config.reference_energies,
        c.through_origin,
        &c.targets,
    );
    if report.fits.is_empty() {
        return Err(AppError::new(
            4,
            format!("No calibration fitted: {}", join_failures(&report.failures)),
        ));
    }

    Ok(CalibrationRun { records, report })
}

#[derive(Debug, Clone)]
pub struct CorrectionRun {
    pub records: Extraction<Record>,
    /// Slope-table rows that could not be read, with their 1-based line.
    pub bad_rows: Vec<(usize, String)>,
    pub corrected: Vec<CorrectedEnergy>,
    pub failures: Vec<CalcError>,
}

/// Correct actual-energy lines with a slope table.
pub fn run_correction(input: &Path, slopes: &Path, group: &str) -> Result<CorrectionRun, AppError> {
    let (table, bad_rows) = load_slope_table(slopes)?;
    if table.is_empty() {
        return Err(AppError::new(
            3,
            format!("No usable rows in slope table '{}'.", slopes.display()),
        ));
    }

    let records = read_records(input, LineFormat::ActualEnergy, group)?;
    ensure_items(input, &records)?;

    let (corrected, failures) = correct_energies(&records.items, &table);
    info!(
        "Corrected {} energy value(s) with {} slope row(s); {} without a row",
        corrected.len(),
        table.len(),
        failures.len()
    );
    if corrected.is_empty() {
        return Err(AppError::new(
            4,
            format!("No energy corrected: {}", join_failures(&failures)),
        ));
    }

    Ok(CorrectionRun {
        records,
        bad_rows,
        corrected,
        failures,
    })
}

#[derive(Debug, Clone)]
pub struct PredictionRun {
    pub series: Extraction<SeriesLine>,
    pub predictions: Vec<TotPrediction>,
    pub failures: Vec<CalcError>,
}

/// Predict the energy of the trailing TOT value of every series.
pub fn run_prediction(input: &Path, known: &[f64]) -> Result<PredictionRun, AppError> {
    if known.len() < 2 {
        return Err(AppError::new(2, "At least two known energies are needed."));
    }

    let series = read_series(input)?;
    ensure_items(input, &series)?;

    let mut predictions = Vec::new();
    let mut failures = Vec::new();
    for line in &series.items {
        match predict_from_series(line, known) {
            Ok(p) => predictions.push(p),
            Err(err) => {
                warn!("{err}");
                failures.push(err);
            }
        }
    }
    info!(
        "Predicted {} of {} series.",
        predictions.len(),
        series.items.len()
    );
    if predictions.is_empty() {
        return Err(AppError::new(
            4,
            format!("No energy predicted: {}", join_failures(&failures)),
        ));
    }

    Ok(PredictionRun {
        series,
        predictions,
        failures,
    })
}

/// Material group for lines that do not carry one: `Group_<file stem>`.
pub fn default_group(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if stem.starts_with("Group_") {
        stem
    } else {
        format!("Group_{stem}")
    }
}

fn ensure_items<T>(path: &Path, extraction: &Extraction<T>) -> Result<(), AppError> {
    if extraction.items.is_empty() {
        return Err(AppError::new(
            3,
            format!(
                "Nothing usable in '{}' ({} line(s) read, {} skipped).",
                path.display(),
                extraction.lines_read,
                extraction.skipped.len()
            ),
        ));
    }
    Ok(())
}

fn join_failures(failures: &[CalcError]) -> String {
    if failures.is_empty() {
        return "no result".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ScanSynth, SpectrumSynth, generate_hits, generate_scan, hit_list_text, write_scan_dumps};
    use crate::domain::ModelChoice;

    #[test]
    fn spectrum_run_recovers_synthetic_peak() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let path = dir.join("am.txt");
        let hits = generate_hits(&SpectrumSynth::default()).unwrap();
        std::fs::write(&path, hit_list_text(&hits)).unwrap();

        let mut config = PipelineConfig::default();
        config.spectrum.model = ModelChoice::Gaussian;
        let run = run_spectrum(&config, &path, "am", Some(59.4)).unwrap();
        assert_eq!(run.hits.items.len(), 20_000);
        assert!((run.summary.mu - 60.0).abs() < 1.0, "{}", run.summary.mu);
        assert!((run.summary.sigma - 6.0).abs() < 0.6, "{}", run.summary.sigma);
        assert!(run.summary.resolution.is_some());
    }

    #[test]
    fn spectrum_outside_range_is_no_data() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let path = dir.join("hits.txt");
        std::fs::write(&path, hit_list_text(&[500.0, 600.0])).unwrap();
        let err = run_spectrum(&PipelineConfig::default(), &path, "x", None).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    fn labeled(label: &str, path: &Path) -> LabeledInput {
        LabeledInput {
            label: label.to_string(),
            path: path.to_path_buf(),
        }
    }

    #[test]
    fn spectra_batch_continues_past_a_failed_input() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let good = dir.join("am.txt");
        std::fs::write(&good, hit_list_text(&generate_hits(&SpectrumSynth::default()).unwrap())).unwrap();
        let out_of_range = dir.join("nb.txt");
        std::fs::write(&out_of_range, hit_list_text(&[500.0, 600.0])).unwrap();

        let mut config = PipelineConfig::default();
        config.spectrum.model = ModelChoice::Gaussian;
        let inputs = [labeled("Nb", &out_of_range), labeled("Am", &good)];
        let batch = run_spectra(&config, &inputs, None).unwrap();

        assert_eq!(batch.runs.len(), 1);
        assert_eq!(batch.runs[0].0, "Am");
        assert_eq!(batch.runs[0].1.input, good);
        assert_eq!(batch.failures.len(), 1);
        assert!(batch.failures[0].starts_with("Nb: "), "{}", batch.failures[0]);
    }

    #[test]
    fn spectra_batch_fails_only_when_every_input_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let garbage = dir.join("garbage.txt");
        std::fs::write(&garbage, "not a hit list\n").unwrap();
        let missing = dir.join("missing.txt");
        let config = PipelineConfig::default();

        let err = run_spectra(&config, &[labeled("a", &garbage), labeled("b", &missing)], None).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("a: ") && err.to_string().contains("b: "), "{err}");

        let err = run_spectra(&config, &[labeled("b", &missing)], None).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn threshold_scans_by_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let scan_dir = tmp.path().join("20C");
        std::fs::create_dir(&scan_dir).unwrap();
        let points = generate_scan(&ScanSynth {
            noise: false,
            sigma: 40.0,
            thl_start: 600,
            thl_stop: 1198,
            ..ScanSynth::default()
        })
        .unwrap();
        write_scan_dumps(&scan_dir, "scan", &points, 8).unwrap();

        let scans = [
            ("20C".to_string(), ScanInput::Directory(scan_dir)),
            ("40C".to_string(), ScanInput::Directory(tmp.path().join("40C"))),
        ];
        let batch = run_threshold_scans(&PipelineConfig::default(), &scans, None).unwrap();
        assert_eq!(batch.runs.len(), 1);
        assert_eq!(batch.runs[0].1.scan.points.len(), points.len());
        assert!(batch.failures[0].starts_with("40C: "), "{}", batch.failures[0]);
    }

    #[test]
    fn threshold_run_from_dump_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let points = generate_scan(&ScanSynth {
            noise: false,
            sigma: 40.0,
            thl_start: 600,
            thl_stop: 1198,
            ..ScanSynth::default()
        })
        .unwrap();
        let files = write_scan_dumps(&dir, "scan", &points, 8).unwrap();

        let run = run_threshold(&PipelineConfig::default(), &files, "scan", None).unwrap();
        assert_eq!(run.scan.points.len(), points.len());
        let mu = run.analysis.step.as_ref().and_then(|f| f.mean()).unwrap();
        assert!((mu - 900.0).abs() < 2.0, "{mu}");
    }

    #[test]
    fn shift_run_reports_missing_baseline_and_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let path = dir.join("shift.txt");
        std::fs::write(
            &path,
            "20°C_2Ikrum Re: μ = 50.00, σ = 3.00\n\
             40°C_2Ikrum Re: μ = 49.40, σ = 3.10\n\
             40°C_5Ikrum Re: μ = 48.00, σ = 3.00\n\
             garbage\n",
        )
        .unwrap();

        let config = PipelineConfig::default();
        let run = run_shift(&config, &path, LineFormat::Tagged, "Group_Cu", None).unwrap();
        assert_eq!(run.records.skipped.len(), 1);
        assert_eq!(run.report.rows.len(), 2);
        assert!(matches!(
            run.report.failures.as_slice(),
            [CalcError::MissingBaseline { .. }]
        ));
    }

    #[test]
    fn calibration_and_correction_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let input = dir.join("energies.txt");
        std::fs::write(
            &input,
            "Group_Cu: 15Ikrum, Temperature: 20°C, Energy: 4.02 keV\n\
             Group_Zr: 15Ikrum, Temperature: 20°C, Energy: 7.85 keV\n\
             Group_Mo: 15Ikrum, Temperature: 20°C, Energy: 8.75 keV\n",
        )
        .unwrap();
        let run = run_calibration(&PipelineConfig::default(), &input).unwrap();
        assert_eq!(run.report.fits.len(), 1);
        assert!((run.report.fits[0].slope() - 2.0).abs() < 1e-9);

        let table = dir.join("slopes.csv");
        crate::io::slope_table::save_slope_table(&table, &run.report.slope_rows()).unwrap();
        let actual = dir.join("actual.txt");
        std::fs::write(&actual, "15Ikrum, 20, Actual Energy = 29.70 KeV\n15Ikrum, 40, Actual Energy = 30.0 KeV\n").unwrap();
        let corrected = run_correction(&actual, &table, "Group_Am").unwrap();
        assert_eq!(corrected.corrected.len(), 1);
        assert!((corrected.corrected[0].corrected - 59.4).abs() < 1e-9);
        assert_eq!(corrected.failures.len(), 1);
    }

    #[test]
    fn prediction_run_and_empty_input() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let path = dir.join("tot.txt");
        // TOT = 1·E + 2 on the known points.
        std::fs::write(&path, "20°C_15Ikrum: [a], [10.04, 17.66, 19.46, 61.4]\n").unwrap();
        let run = run_prediction(&path, &[8.04, 15.66, 17.46]).unwrap();
        assert!((run.predictions[0].energy - 59.4).abs() < 1e-6);

        let empty = dir.join("empty.txt");
        std::fs::write(&empty, "nothing here\n").unwrap();
        assert_eq!(run_prediction(&empty, &[8.04, 15.7]).unwrap_err().exit_code(), 3);
        assert_eq!(run_prediction(&path, &[8.04]).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn group_from_file_stem() {
        assert_eq!(default_group(Path::new("/data/Cu.txt")), "Group_Cu");
        assert_eq!(default_group(Path::new("Group_Mo.txt")), "Group_Mo");
    }
}
