//! Command-line parsing for the detector calibration toolkit.
//!
//! Argument parsing and command dispatch stay separate from the fitting and
//! calculation code. Flags here override the matching `PipelineConfig` fields.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};

use crate::domain::{ModelChoice, ResolutionBasis};
use crate::io::extract::LineFormat;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "tpxcal", version, about = "Timepix energy calibration toolkit")]
pub struct Cli {
    /// TOML configuration file (default: $TPXCAL_CONFIG, else built-in defaults).
    #[arg(long, global = true, value_name = "TOML")]
    pub config: Option<PathBuf>,

    /// More log output (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Histogram a per-hit list and fit its peak.
    Spectrum(SpectrumArgs),
    /// Analyze a threshold scan from one dump file per THL step.
    ThlScan(ThlScanArgs),
    /// Energy shift, relative error and resolution against the baseline temperature.
    Shift(ShiftArgs),
    /// Fit actual vs measured energy per Ikrum and temperature.
    Calibrate(CalibrateArgs),
    /// Correct measured energies with a slope/intercept table.
    Correct(CorrectArgs),
    /// Predict energies from TOT series with a linear TOT calibration.
    Predict(PredictArgs),
    /// Plot the fits stored in a JSON bundle.
    Plot(PlotArgs),
    /// Write synthetic input files.
    #[command(subcommand)]
    Synth(SynthCommand),
}

/// Terminal plot options.
#[derive(Debug, Clone, Args)]
pub struct PlotOpts {
    /// Render an ASCII plot.
    #[arg(long)]
    pub plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

/// Export options.
#[derive(Debug, Clone, Args)]
pub struct ExportOpts {
    /// Export result rows to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    /// Export fit results to JSON.
    #[arg(long = "export-json", value_name = "JSON")]
    pub export_json: Option<PathBuf>,
}

/// An input file or directory with the label its results are reported under.
///
/// Parsed from `LABEL=PATH`, or from a bare path labeled by its file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledInput {
    pub label: String,
    pub path: PathBuf,
}

impl FromStr for LabeledInput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((label, path)) => {
                let label = label.trim();
                if label.is_empty() || path.is_empty() {
                    return Err(format!("expected LABEL=PATH, got '{s}'"));
                }
                Ok(Self {
                    label: label.to_string(),
                    path: PathBuf::from(path),
                })
            }
            None if !s.is_empty() => {
                let path = PathBuf::from(s);
                Ok(Self {
                    label: file_stem(&path),
                    path,
                })
            }
            None => Err("empty input".to_string()),
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}

#[derive(Debug, Clone, Args)]
pub struct SpectrumArgs {
    /// Per-hit lists to fit and compare, as `LABEL=PATH` or a bare path.
    #[arg(required = true, value_name = "[LABEL=]PATH")]
    pub inputs: Vec<LabeledInput>,

    /// 0-based column holding the per-hit value.
    #[arg(long)]
    pub column: Option<usize>,

    /// Number of histogram bins.
    #[arg(long)]
    pub bins: Option<usize>,

    /// Histogram range.
    #[arg(long, num_args = 2, value_names = ["LO", "HI"], allow_negative_numbers = true)]
    pub range: Option<Vec<f64>>,

    /// Peak model.
    #[arg(long, value_enum)]
    pub model: Option<ModelChoice>,

    /// Material of the line (looked up in the reference energy table).
    #[arg(long)]
    pub material: Option<String>,

    /// Reference energy in keV (overrides --material).
    #[arg(long)]
    pub reference_energy: Option<f64>,

    /// Resolution denominator.
    #[arg(long, value_enum)]
    pub basis: Option<ResolutionBasis>,

    #[command(flatten)]
    pub plot: PlotOpts,

    #[command(flatten)]
    pub export: ExportOpts,
}

#[derive(Debug, Clone, Args)]
pub struct ThlScanArgs {
    /// Dump files of one scan, one per THL step.
    #[arg(required_unless_present = "scans")]
    pub inputs: Vec<PathBuf>,

    /// Label of the scan given by the positional files.
    #[arg(long, default_value = "scan")]
    pub label: String,

    /// Further scan to compare, as a directory of dumps; repeatable.
    #[arg(long = "scan", value_name = "LABEL=DIR")]
    pub scans: Vec<LabeledInput>,

    /// Only use dumps with THL in this inclusive window.
    #[arg(long, num_args = 2, value_names = ["LO", "HI"], allow_negative_numbers = true)]
    pub window: Option<Vec<i64>>,

    /// Read hits from the trailing `Hits:` line instead of summing a column.
    #[arg(long)]
    pub hits_summary: bool,

    /// Hits fall with increasing THL.
    #[arg(long)]
    pub falling_edge: bool,

    /// Reference energy in keV for the resolution.
    #[arg(long)]
    pub reference_energy: Option<f64>,

    /// Resolution denominator.
    #[arg(long, value_enum)]
    pub basis: Option<ResolutionBasis>,

    #[command(flatten)]
    pub plot: PlotOpts,

    #[command(flatten)]
    pub export: ExportOpts,
}

#[derive(Debug, Clone, Args)]
pub struct ShiftArgs {
    /// Table of μ/σ records.
    pub input: PathBuf,

    /// Line format of the input.
    #[arg(long, value_enum, default_value_t = LineFormat::Tagged)]
    pub format: LineFormat,

    /// Material group for tagged lines (default: `Group_<file stem>`).
    #[arg(long)]
    pub group: Option<String>,

    /// Baseline temperature in °C.
    #[arg(long)]
    pub reference_temperature: Option<i32>,

    /// Reference energy in keV for every record (default: by material).
    #[arg(long)]
    pub reference_energy: Option<f64>,

    /// Resolution denominator.
    #[arg(long, value_enum)]
    pub basis: Option<ResolutionBasis>,

    /// Also print the equivalent energy of every record.
    #[arg(long)]
    pub energies: bool,

    /// Export shift rows to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct CalibrateArgs {
    /// Key-value lines with measured energies per material group.
    pub input: PathBuf,

    /// Fit with a free intercept instead of through the origin.
    #[arg(long)]
    pub linear: bool,

    /// Actual energy (keV) whose measured energy is estimated; repeatable.
    #[arg(long = "target")]
    pub targets: Vec<f64>,

    /// Write the slope/intercept table to this CSV.
    #[arg(long, value_name = "CSV")]
    pub slope_table: Option<PathBuf>,

    #[command(flatten)]
    pub plot: PlotOpts,

    #[command(flatten)]
    pub export: ExportOpts,
}

#[derive(Debug, Clone, Args)]
pub struct CorrectArgs {
    /// `label, temperature, Actual Energy = <v> KeV` lines.
    pub input: PathBuf,

    /// Slope/intercept table written by `calibrate`.
    #[arg(long, value_name = "CSV")]
    pub slopes: PathBuf,

    /// Export corrected energies to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct PredictArgs {
    /// `label: [..], [tot1, ..., totN, unknown]` lines.
    pub input: PathBuf,

    /// Energies (keV) of the leading TOT values.
    #[arg(long, value_delimiter = ',')]
    pub known: Option<Vec<f64>>,

    #[command(flatten)]
    pub export: ExportOpts,
}

#[derive(Debug, Clone, Args)]
pub struct PlotArgs {
    /// JSON bundle written with `--export-json`.
    #[arg(long, value_name = "JSON")]
    pub bundle: PathBuf,

    /// Plot width (columns).
    #[arg(long, default_value_t = 80)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 20)]
    pub height: usize,
}

#[derive(Debug, Subcommand)]
pub enum SynthCommand {
    /// Per-hit TOT list with Gaussian lines.
    Spectrum(SynthSpectrumArgs),
    /// Directory of threshold-scan dumps.
    ThlScan(SynthScanArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SynthSpectrumArgs {
    /// Output file.
    #[arg(long)]
    pub out: PathBuf,

    /// Number of hits.
    #[arg(long, default_value_t = 20_000)]
    pub hits: usize,

    /// Peak as `mu,sigma[,weight]`; repeatable (default: 60,6).
    #[arg(long = "peak", value_name = "MU,SIGMA[,WEIGHT]")]
    pub peaks: Vec<String>,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Debug, Clone, Args)]
pub struct SynthScanArgs {
    /// Output directory.
    #[arg(long)]
    pub out_dir: PathBuf,

    /// File name prefix.
    #[arg(long, default_value = "scan")]
    pub prefix: String,

    #[arg(long, default_value_t = 20_000.0)]
    pub amplitude: f64,

    #[arg(long, default_value_t = 900.0)]
    pub mu: f64,

    #[arg(long, default_value_t = 30.0)]
    pub sigma: f64,

    #[arg(long, default_value_t = 700, allow_negative_numbers = true)]
    pub start: i64,

    #[arg(long, default_value_t = 1100, allow_negative_numbers = true)]
    pub stop: i64,

    #[arg(long, default_value_t = 2)]
    pub step: i64,

    /// Pixel rows per dump.
    #[arg(long, default_value_t = 16)]
    pub pixels: usize,

    /// Exact counts without counting noise.
    #[arg(long)]
    pub no_noise: bool,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spectrum_overrides() {
        let cli = Cli::try_parse_from([
            "tpxcal", "-vv", "spectrum", "am.txt", "--range", "15", "50", "--bins", "50", "--model",
            "gaussian", "--material", "Am", "--plot",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Spectrum(args) = cli.command else {
            panic!("expected spectrum");
        };
        assert_eq!(args.range, Some(vec![15.0, 50.0]));
        assert_eq!(args.bins, Some(50));
        assert_eq!(args.model, Some(ModelChoice::Gaussian));
        assert!(args.plot.plot);
    }

    #[test]
    fn parses_shift_and_predict() {
        let cli = Cli::try_parse_from([
            "tpxcal", "shift", "cu.txt", "--format", "key-value", "--basis", "reference-energy",
            "--config", "c.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        let Command::Shift(args) = cli.command else {
            panic!("expected shift");
        };
        assert_eq!(args.format, LineFormat::KeyValue);
        assert_eq!(args.basis, Some(ResolutionBasis::ReferenceEnergy));

        let cli = Cli::try_parse_from(["tpxcal", "predict", "tot.txt", "--known", "8.04,15.7,17.5"]).unwrap();
        let Command::Predict(args) = cli.command else {
            panic!("expected predict");
        };
        assert_eq!(args.known, Some(vec![8.04, 15.7, 17.5]));
    }

    #[test]
    fn spectrum_inputs_take_optional_labels() {
        let cli = Cli::try_parse_from(["tpxcal", "spectrum", "Am 40C=data/am_40.txt", "/data/nb.txt"]).unwrap();
        let Command::Spectrum(args) = cli.command else {
            panic!("expected spectrum");
        };
        assert_eq!(
            args.inputs,
            vec![
                LabeledInput {
                    label: "Am 40C".to_string(),
                    path: PathBuf::from("data/am_40.txt"),
                },
                LabeledInput {
                    label: "nb".to_string(),
                    path: PathBuf::from("/data/nb.txt"),
                },
            ]
        );
        assert!("=x.txt".parse::<LabeledInput>().is_err());
        assert!(Cli::try_parse_from(["tpxcal", "spectrum"]).is_err());
    }

    #[test]
    fn thl_scan_needs_inputs() {
        assert!(Cli::try_parse_from(["tpxcal", "thl-scan"]).is_err());
        let cli = Cli::try_parse_from(["tpxcal", "thl-scan", "--scan", "20C=scans/20", "--scan", "40C=scans/40"]).unwrap();
        let Command::ThlScan(args) = cli.command else {
            panic!("expected thl-scan");
        };
        assert!(args.inputs.is_empty());
        assert_eq!(args.scans.len(), 2);
        assert_eq!(args.scans[1].label, "40C");

        let cli = Cli::try_parse_from(["tpxcal", "thl-scan", "a.txt", "b.txt", "--window", "800", "992"]).unwrap();
        let Command::ThlScan(args) = cli.command else {
            panic!("expected thl-scan");
        };
        assert_eq!(args.inputs.len(), 2);
        assert_eq!(args.window, Some(vec![800, 992]));
    }
}
