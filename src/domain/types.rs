//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - produced by the extractors
//! - consumed by the fitter / calculator
//! - exported to JSON/CSV

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// A measured scalar carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    /// Energy in keV (measured or calibrated).
    Energy,
    /// Fitted peak position (TOT or THL units).
    Mu,
    /// Fitted peak width (same units as `Mu`).
    Sigma,
    /// Event count.
    Counts,
    /// Absolute energy shift in keV.
    Shift,
    /// Relative error in percent.
    RelativeError,
    /// Energy resolution in percent.
    Resolution,
}

impl Quantity {
    pub fn display_name(self) -> &'static str {
        match self {
            Quantity::Energy => "Energy",
            Quantity::Mu => "μ",
            Quantity::Sigma => "σ",
            Quantity::Counts => "Counts",
            Quantity::Shift => "Absolute Shift",
            Quantity::RelativeError => "Relative Error",
            Quantity::Resolution => "Energy Resolution",
        }
    }
}

/// One parsed observation.
///
/// Only constructible through [`Record::new`], which enforces that the record
/// has at least one finite measurement. The temperature is always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    group: String,
    label: String,
    temperature: i32,
    measurements: Vec<(Quantity, f64)>,
}

impl Record {
    /// Build a record, dropping non-finite measurements.
    ///
    /// Returns `None` if nothing finite remains.
    pub fn new(
        group: impl Into<String>,
        label: impl Into<String>,
        temperature: i32,
        measurements: Vec<(Quantity, f64)>,
    ) -> Option<Self> {
        let measurements: Vec<(Quantity, f64)> = measurements
            .into_iter()
            .filter(|(_, v)| v.is_finite())
            .collect();
        if measurements.is_empty() {
            return None;
        }
        Some(Self {
            group: group.into(),
            label: label.into(),
            temperature,
            measurements,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn temperature(&self) -> i32 {
        self.temperature
    }

    pub fn measurements(&self) -> &[(Quantity, f64)] {
        &self.measurements
    }

    /// First value recorded for `quantity`.
    pub fn get(&self, quantity: Quantity) -> Option<f64> {
        self.measurements
            .iter()
            .find(|(q, _)| *q == quantity)
            .map(|(_, v)| *v)
    }

    /// Material name from a `Group_<Material>` group label.
    pub fn material(&self) -> Option<&str> {
        let rest = self.group.strip_prefix("Group_")?;
        let end = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let material = &rest[..end];
        if material.is_empty() { None } else { Some(material) }
    }
}

/// Records grouped by key, in first-seen key order.
///
/// Each group is an owned, append-only list.
#[derive(Debug, Clone)]
pub struct GroupedRecords<K> {
    order: Vec<K>,
    groups: HashMap<K, Vec<Record>>,
}

impl<K: Clone + Eq + Hash> GroupedRecords<K> {
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            groups: HashMap::new(),
        }
    }

    /// Group `records` by `key`.
    pub fn from_records<I, F>(records: I, key: F) -> Self
    where
        I: IntoIterator<Item = Record>,
        F: Fn(&Record) -> K,
    {
        let mut out = Self::new();
        for record in records {
            let k = key(&record);
            out.push(k, record);
        }
        out
    }

    pub fn push(&mut self, key: K, record: Record) {
        if let Some(list) = self.groups.get_mut(&key) {
            list.push(record);
            return;
        }
        self.order.push(key.clone());
        self.groups.insert(key, vec![record]);
    }

    pub fn get(&self, key: &K) -> Option<&[Record]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterate `(key, records)` in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &[Record])> {
        self.order
            .iter()
            .filter_map(|k| self.groups.get(k).map(|v| (k, v.as_slice())))
    }
}

impl<K: Clone + Eq + Hash> Default for GroupedRecords<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reference peak energies in keV, keyed by material name (`Cu`, `Am`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceEnergies(BTreeMap<String, f64>);

impl ReferenceEnergies {
    pub fn new(table: BTreeMap<String, f64>) -> Self {
        Self(table)
    }

    pub fn get(&self, material: &str) -> Option<f64> {
        self.0.get(material).copied()
    }

    /// Energy of the material named by the record's `Group_<Material>` group.
    pub fn for_record(&self, record: &Record) -> Option<f64> {
        record.material().and_then(|m| self.get(m))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl Default for ReferenceEnergies {
    fn default() -> Self {
        let table = [("Cu", 8.04), ("Zr", 15.7), ("Mo", 17.5), ("Ag", 22.1), ("Am", 59.4)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self(table)
    }
}

/// Concrete fitted model kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Gaussian,
    DoubleGaussian,
    ErfStep,
    Linear,
    Proportional,
}

impl ModelKind {
    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Gaussian => "Gaussian",
            ModelKind::DoubleGaussian => "Double Gaussian",
            ModelKind::ErfStep => "Error-function step",
            ModelKind::Linear => "Linear",
            ModelKind::Proportional => "Linear (through origin)",
        }
    }

    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::Gaussian | ModelKind::ErfStep => &["amplitude", "mu", "sigma"],
            ModelKind::DoubleGaussian => &["amplitude1", "mu1", "sigma1", "amplitude2", "mu2", "sigma2"],
            ModelKind::Linear => &["slope", "intercept"],
            ModelKind::Proportional => &["slope"],
        }
    }

    pub fn param_count(self) -> usize {
        self.param_names().len()
    }
}

/// Which peak model(s) to try on a spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelChoice {
    /// Fit single and double Gaussian and select by BIC.
    Auto,
    Gaussian,
    Double,
}

/// Denominator used for the energy resolution of a peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionBasis {
    /// `FWHM / reference energy` (FWHM and energy in the same unit).
    ReferenceEnergy,
    /// `FWHM / fitted mean` (unit-free; works on raw TOT/THL peaks).
    Mean,
}

/// Fit quality diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitQuality {
    pub sse: f64,
    pub rmse: f64,
    pub bic: f64,
    pub n: usize,
    pub iterations: usize,
}

/// Fit output for a single model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model: ModelKind,
    pub params: Vec<f64>,
    /// One standard error per parameter, when estimable.
    pub uncertainties: Option<Vec<f64>>,
    pub quality: FitQuality,
}

impl FitResult {
    /// Look up a parameter by its model name (e.g. `"mu"`).
    pub fn param(&self, name: &str) -> Option<f64> {
        let idx = self.model.param_names().iter().position(|n| *n == name)?;
        self.params.get(idx).copied()
    }

    /// Peak position of a single-peak model (or the first peak).
    pub fn mean(&self) -> Option<f64> {
        self.param("mu").or_else(|| self.param("mu1"))
    }

    /// Peak width of a single-peak model (or the first peak).
    pub fn sigma(&self) -> Option<f64> {
        self.param("sigma").or_else(|| self.param("sigma1"))
    }

    pub fn slope(&self) -> Option<f64> {
        self.param("slope")
    }

    /// Intercept of a linear model; zero for a through-origin fit.
    pub fn intercept(&self) -> Option<f64> {
        match self.model {
            ModelKind::Proportional => Some(0.0),
            _ => self.param("intercept"),
        }
    }
}

/// A derived `(reference, estimate)` pair for one group and temperature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationPoint {
    pub group: String,
    pub label: String,
    pub temperature: i32,
    pub reference: f64,
    pub estimate: f64,
}

/// A `label: [..], [v1, v2, ...]` line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesLine {
    pub label: String,
    pub temperature: i32,
    pub values: Vec<f64>,
}

/// One threshold step of a threshold scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdPoint {
    pub thl: i64,
    pub hits: f64,
}

/// One row of a slope/intercept calibration table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlopeRow {
    pub label: String,
    pub temperature: i32,
    pub slope: f64,
    pub intercept: f64,
}
