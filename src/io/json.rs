//! Fit-result bundles.
//!
//! A bundle is the portable record of one run: every fitted model with its
//! parameters, uncertainties and quality, plus the x range it was fitted on
//! so the curve can be re-plotted later. The schema is [`FitBundle`].

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::FitResult;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitBundle {
    pub tool: String,
    pub command: String,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<FitEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitEntry {
    pub label: String,
    pub temperature: Option<i32>,
    /// Range of x the model was fitted on.
    pub x_range: Option<[f64; 2]>,
    pub fit: FitResult,
}

impl FitEntry {
    /// Check that the stored fit can be evaluated: one finite parameter per
    /// model parameter, matching uncertainties, and an increasing x range.
    pub fn validate(&self) -> Result<(), String> {
        let fit = &self.fit;
        let expected = fit.model.param_count();
        if fit.params.len() != expected {
            return Err(format!(
                "{} needs {expected} parameter(s), found {}",
                fit.model.display_name(),
                fit.params.len()
            ));
        }
        if let Some(i) = fit.params.iter().position(|p| !p.is_finite()) {
            return Err(format!("parameter {} is not finite", fit.model.param_names()[i]));
        }
        if let Some(u) = &fit.uncertainties {
            if u.len() != expected {
                return Err(format!("{} uncertainties for {expected} parameter(s)", u.len()));
            }
        }
        if let Some([lo, hi]) = self.x_range {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(format!("invalid x range [{lo}, {hi}]"));
            }
        }
        Ok(())
    }
}

impl FitBundle {
    pub fn new(command: &str, entries: Vec<FitEntry>) -> Self {
        Self {
            tool: "tpxcal".to_string(),
            command: command.to_string(),
            generated_at: Utc::now(),
            entries,
        }
    }
}

/// Write a bundle as pretty JSON.
pub fn write_fit_bundle(path: &Path, bundle: &FitBundle) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create fit JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, bundle)
        .map_err(|e| AppError::new(2, format!("Failed to write fit JSON: {e}")))
}

/// Read a bundle written by [`write_fit_bundle`].
pub fn read_fit_bundle(path: &Path) -> Result<FitBundle, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open fit JSON '{}': {e}", path.display())))?;
    let bundle: FitBundle =
        serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid fit JSON: {e}")))?;
    for entry in &bundle.entries {
        entry.validate().map_err(|reason| {
            AppError::new(
                2,
                format!("Invalid fit '{}' in '{}': {reason}", entry.label, path.display()),
            )
        })?;
    }
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitQuality, ModelKind};

    fn gaussian_entry() -> FitEntry {
        FitEntry {
            label: "Am_20".to_string(),
            temperature: Some(20),
            x_range: Some([0.0, 200.0]),
            fit: FitResult {
                model: ModelKind::Gaussian,
                params: vec![812.0, 61.3, 6.2],
                uncertainties: Some(vec![4.0, 0.05, 0.05]),
                quality: FitQuality { sse: 12.5, rmse: 0.35, bic: -180.0, n: 100, iterations: 9 },
            },
        }
    }

    #[test]
    fn bundle_file_round_trip() {
        let bundle = FitBundle::new("spectrum", vec![gaussian_entry()]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fits.json");
        write_fit_bundle(&path, &bundle).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["entries"][0]["fit"]["model"], "gaussian");
        assert_eq!(value["tool"], "tpxcal");

        let back = read_fit_bundle(&path).unwrap();
        assert_eq!(back, bundle);
    }

    #[test]
    fn malformed_bundle_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{\"tool\": 1}").unwrap();
        assert_eq!(read_fit_bundle(&path).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn short_parameter_vector_is_rejected_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.json");
        let mut value = serde_json::to_value(FitBundle::new("spectrum", vec![gaussian_entry()])).unwrap();
        value["entries"][0]["fit"]["params"] = serde_json::json!([1.0]);
        std::fs::write(&path, value.to_string()).unwrap();

        let err = read_fit_bundle(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("Am_20"), "{err}");
        assert!(err.to_string().contains("needs 3 parameter(s), found 1"), "{err}");
    }

    #[test]
    fn entry_checks() {
        assert!(gaussian_entry().validate().is_ok());

        let mut e = gaussian_entry();
        e.fit.uncertainties = Some(vec![1.0]);
        assert!(e.validate().unwrap_err().contains("uncertainties"));

        let mut e = gaussian_entry();
        e.x_range = Some([5.0, 5.0]);
        assert!(e.validate().is_err());

        let mut e = gaussian_entry();
        e.fit.params[2] = f64::NAN;
        assert_eq!(e.validate().unwrap_err(), "parameter sigma is not finite");
    }
}
