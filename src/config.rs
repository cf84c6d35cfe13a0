//! Pipeline configuration.
//!
//! Every analysis constant lives in a [`PipelineConfig`], loaded from a TOML
//! file named by `--config` or `TPXCAL_CONFIG` (a `.env` file is honored).
//! Absent fields take their defaults, unknown fields are rejected, and the
//! whole configuration is validated before any input is read.
//!
//! ```toml
//! reference_temperature = 20
//!
//! # replaces the built-in table
//! [reference_energies]
//! Cu = 8.04
//! Am = 59.4
//!
//! [spectrum]
//! bins = 120
//! range = [0.0, 240.0]
//! model = "auto"
//!
//! [spectrum.double]
//! initial = [400.0, 55.0, 5.0, 150.0, 70.0, 5.0]
//!
//! [threshold.layout]
//! window = [800, 992]
//! hits = { mode = "summary" }
//! ```

use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::calc::{ShiftSettings, ThresholdSettings};
use crate::domain::{ModelChoice, ReferenceEnergies, ResolutionBasis};
use crate::error::AppError;
use crate::fit::{FitOptions, PeakFitPlan};
use crate::io::thl::ThlDumpLayout;
use crate::math::Bounds;

pub const CONFIG_ENV: &str = "TPXCAL_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Baseline temperature in °C.
    pub reference_temperature: i32,
    /// Peak energies in keV by material.
    pub reference_energies: ReferenceEnergies,
    pub spectrum: SpectrumConfig,
    pub threshold: ThresholdConfig,
    pub shift: ShiftConfig,
    pub calibration: CalibrationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reference_temperature: 20,
            reference_energies: ReferenceEnergies::default(),
            spectrum: SpectrumConfig::default(),
            threshold: ThresholdConfig::default(),
            shift: ShiftConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpectrumConfig {
    /// 0-based column of the per-hit value.
    pub column: usize,
    pub bins: usize,
    pub range: [f64; 2],
    pub model: ModelChoice,
    pub max_iterations: usize,
    pub basis: ResolutionBasis,
    pub double: Option<DoubleGaussianConfig>,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            column: 3,
            bins: 100,
            range: [0.0, 200.0],
            model: ModelChoice::Auto,
            max_iterations: 10_000,
            basis: ResolutionBasis::ReferenceEnergy,
            double: None,
        }
    }
}

/// Starting point and optional box bounds for a double-Gaussian fit,
/// ordered `[A1, μ1, σ1, A2, μ2, σ2]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DoubleGaussianConfig {
    pub initial: [f64; 6],
    pub lower: Option<[f64; 6]>,
    pub upper: Option<[f64; 6]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdConfig {
    pub layout: ThlDumpLayout,
    pub max_iterations: usize,
    pub falling_edge: bool,
    pub basis: ResolutionBasis,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            layout: ThlDumpLayout::default(),
            max_iterations: 10_000,
            falling_edge: false,
            basis: ResolutionBasis::Mean,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShiftConfig {
    pub basis: ResolutionBasis,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            basis: ResolutionBasis::Mean,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationConfig {
    /// Fit `actual = slope·measured` instead of a free intercept.
    pub through_origin: bool,
    /// Actual energies (keV) whose measured energy is estimated.
    pub targets: Vec<f64>,
    /// Energies of the leading values of a TOT series.
    pub known_energies: Vec<f64>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            through_origin: true,
            targets: vec![59.4],
            known_energies: vec![8.04, 15.7, 17.5],
        }
    }
}

impl PipelineConfig {
    /// Load from `explicit`, else from `$TPXCAL_CONFIG`, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let config = match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                debug!("No configuration file; using defaults.");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(2, format!("Failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&text)
            .map_err(|e| AppError::new(2, format!("Invalid config '{}': {e}", path.display())))
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Reject settings no analysis could run with.
    pub fn validate(&self) -> Result<(), AppError> {
        let invalid = |msg: String| Err(AppError::new(2, format!("Invalid config: {msg}")));

        for (material, energy) in self.reference_energies.iter() {
            if !(energy.is_finite() && energy > 0.0) {
                return invalid(format!("reference energy for {material} must be positive"));
            }
        }

        let s = &self.spectrum;
        if s.bins == 0 {
            return invalid("spectrum.bins must be > 0".to_string());
        }
        let [lo, hi] = s.range;
        if !(lo.is_finite() && hi.is_finite() && hi > lo) {
            return invalid(format!("spectrum.range [{lo}, {hi}] must be finite and ascending"));
        }
        if s.max_iterations == 0 || self.threshold.max_iterations == 0 {
            return invalid("max_iterations must be > 0".to_string());
        }
        if let Some(double) = &s.double {
            if double.initial.iter().any(|v| !v.is_finite()) {
                return invalid("spectrum.double.initial must be finite".to_string());
            }
            double_bounds(double).map_err(|e| AppError::new(2, format!("Invalid config: {e}")))?;
        }

        if let Err(e) = self.threshold.layout.validate() {
            return invalid(format!("threshold.layout: {e}"));
        }

        let c = &self.calibration;
        if c.targets.iter().any(|v| !v.is_finite()) {
            return invalid("calibration.targets must be finite".to_string());
        }
        if c.known_energies.len() < 2 || c.known_energies.iter().any(|v| !v.is_finite()) {
            return invalid("calibration.known_energies needs at least two finite values".to_string());
        }

        Ok(())
    }

    pub fn peak_plan(&self) -> Result<PeakFitPlan, AppError> {
        let s = &self.spectrum;
        let single = FitOptions::default().with_max_iterations(s.max_iterations);
        let double = match &s.double {
            Some(cfg) => {
                let mut opts = FitOptions::default()
                    .with_max_iterations(s.max_iterations)
                    .with_initial(cfg.initial.to_vec());
                if let Some(bounds) =
                    double_bounds(cfg).map_err(|e| AppError::new(2, format!("Invalid config: {e}")))?
                {
                    opts = opts.with_bounds(bounds);
                }
                Some(opts)
            }
            None => None,
        };
        Ok(PeakFitPlan {
            choice: s.model,
            single,
            double,
        })
    }

    pub fn shift_settings(&self) -> ShiftSettings {
        ShiftSettings {
            reference_temperature: self.reference_temperature,
            basis: self.shift.basis,
            reference_energy: None,
        }
    }

    pub fn threshold_settings(&self) -> ThresholdSettings {
        ThresholdSettings {
            max_iterations: self.threshold.max_iterations,
            falling_edge: self.threshold.falling_edge,
            basis: self.threshold.basis,
            reference_energy: None,
        }
    }
}

/// Bounds with a missing side left open.
fn double_bounds(cfg: &DoubleGaussianConfig) -> Result<Option<Bounds>, String> {
    if cfg.lower.is_none() && cfg.upper.is_none() {
        return Ok(None);
    }
    let lower = cfg.lower.unwrap_or([f64::NEG_INFINITY; 6]);
    let upper = cfg.upper.unwrap_or([f64::INFINITY; 6]);
    Bounds::new(lower.to_vec(), upper.to_vec())
        .map(Some)
        .map_err(|e| format!("spectrum.double bounds: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::thl::HitsSource;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.reference_energies.get("Am"), Some(59.4));
        assert_eq!(config.calibration.known_energies, vec![8.04, 15.7, 17.5]);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            reference_temperature = 25

            [spectrum]
            bins = 120
            range = [10.0, 250.0]
            model = "double"

            [spectrum.double]
            initial = [400.0, 55.0, 5.0, 150.0, 70.0, 5.0]
            lower = [0.0, 40.0, 1.0, 0.0, 60.0, 1.0]

            [threshold.layout]
            window = [800, 992]
            hits = { mode = "summary" }
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.reference_temperature, 25);
        assert_eq!(config.spectrum.bins, 120);
        assert_eq!(config.spectrum.column, 3);
        assert_eq!(config.threshold.layout.hits, HitsSource::Summary);
        assert_eq!(config.threshold.layout.thl_line, 9);
        assert_eq!(config.reference_energies.get("Cu"), Some(8.04));

        let plan = config.peak_plan().unwrap();
        assert_eq!(plan.choice, ModelChoice::Double);
        let double = plan.double.unwrap();
        assert_eq!(double.initial.as_ref().map(Vec::len), Some(6));
        assert!(double.bounds.is_some());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(PipelineConfig::from_toml("[spectrum]\nbinz = 3\n").is_err());
    }

    #[test]
    fn invalid_values_fail_with_exit_code_two() {
        let mut config = PipelineConfig::default();
        config.spectrum.range = [10.0, 5.0];
        assert_eq!(config.validate().unwrap_err().exit_code(), 2);

        let mut config = PipelineConfig::default();
        config.calibration.known_energies = vec![8.04];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.spectrum.double = Some(DoubleGaussianConfig {
            initial: [1.0; 6],
            lower: Some([2.0; 6]),
            upper: Some([1.0; 6]),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_input_error() {
        let err = PipelineConfig::from_file(Path::new("/nonexistent/tpxcal.toml")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
