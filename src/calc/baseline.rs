//! Shifts relative to a reference-temperature baseline.
//!
//! Two phases over the grouped records:
//!
//! 1. index the reference-temperature μ/σ of every group;
//! 2. compute equivalent energy, shift, relative error, FWHM and resolution
//!    for every record of every group.
//!
//! Groups without a reference entry come back as
//! [`CalcError::MissingBaseline`], naming the records that were not computed.

use std::collections::HashMap;

use log::{debug, warn};
use serde::Serialize;

use crate::calc::{
    CalcError, energy_shift, equivalent_energy, fwhm, relative_error_percent, resolution_percent,
};
use crate::domain::{GroupedRecords, Quantity, Record, ReferenceEnergies, ResolutionBasis};

/// Key under which shifts are grouped: `"<group>: <label>"`.
pub fn group_key(record: &Record) -> String {
    format!("{}: {}", record.group(), record.label())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mu: f64,
    pub sigma: Option<f64>,
}

/// Reference-temperature entries by group key.
#[derive(Debug, Clone, Default)]
pub struct BaselineIndex {
    reference_temperature: i32,
    entries: HashMap<String, Baseline>,
}

impl BaselineIndex {
    /// Index every group's reference-temperature record.
    ///
    /// When a group has several, the last one wins.
    pub fn build(grouped: &GroupedRecords<String>, reference_temperature: i32) -> Self {
        let mut entries = HashMap::new();
        for (key, records) in grouped.iter() {
            for record in records.iter().filter(|r| r.temperature() == reference_temperature) {
                let Some(mu) = record.get(Quantity::Mu) else {
                    debug!("{key}: {reference_temperature}°C record has no μ");
                    continue;
                };
                let baseline = Baseline {
                    mu,
                    sigma: record.get(Quantity::Sigma),
                };
                if entries.insert(key.clone(), baseline).is_some() {
                    warn!("{key}: several {reference_temperature}°C records, using the last");
                }
            }
        }
        Self {
            reference_temperature,
            entries,
        }
    }

    pub fn reference_temperature(&self) -> i32 {
        self.reference_temperature
    }

    pub fn get(&self, key: &str) -> Option<&Baseline> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShiftSettings {
    pub reference_temperature: i32,
    pub basis: ResolutionBasis,
    /// Energy used for every record instead of the material table.
    pub reference_energy: Option<f64>,
}

impl Default for ShiftSettings {
    fn default() -> Self {
        Self {
            reference_temperature: 20,
            basis: ResolutionBasis::Mean,
            reference_energy: None,
        }
    }
}

/// Derived quantities for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShiftRow {
    pub group: String,
    pub label: String,
    pub temperature: i32,
    pub mu: f64,
    pub sigma: Option<f64>,
    pub reference_energy: f64,
    pub equivalent_energy: f64,
    pub shift: f64,
    pub relative_error: f64,
    /// In μ units for the `Mean` basis, keV for `ReferenceEnergy`.
    pub fwhm: Option<f64>,
    pub resolution: Option<f64>,
}

impl ShiftRow {
    pub fn key(&self) -> String {
        format!("{}: {}", self.group, self.label)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShiftReport {
    pub rows: Vec<ShiftRow>,
    pub failures: Vec<CalcError>,
}

/// Run both phases over records grouped by [`group_key`].
pub fn compute_shifts(
    grouped: &GroupedRecords<String>,
    energies: &ReferenceEnergies,
    settings: &ShiftSettings,
) -> ShiftReport {
    let index = BaselineIndex::build(grouped, settings.reference_temperature);
    let mut report = ShiftReport::default();

    for (key, records) in grouped.iter() {
        let Some(baseline) = index.get(key) else {
            let err = CalcError::MissingBaseline {
                key: key.clone(),
                reference_temperature: index.reference_temperature(),
                temperatures: records.iter().map(Record::temperature).collect(),
            };
            warn!("{err}");
            report.failures.push(err);
            continue;
        };

        for record in records {
            match shift_row(record, baseline, energies, settings) {
                Ok(row) => report.rows.push(row),
                Err(err) => {
                    warn!("{err}");
                    report.failures.push(err);
                }
            }
        }
    }

    report
}

fn shift_row(
    record: &Record,
    baseline: &Baseline,
    energies: &ReferenceEnergies,
    settings: &ShiftSettings,
) -> Result<ShiftRow, CalcError> {
    let mu = record.get(Quantity::Mu).ok_or_else(|| CalcError::MissingQuantity {
        key: group_key(record),
        temperature: record.temperature(),
        quantity: Quantity::Mu.display_name(),
    })?;
    let e_ref = settings
        .reference_energy
        .or_else(|| energies.for_record(record))
        .ok_or_else(|| CalcError::UnknownMaterial(record.group().to_string()))?;

    let equivalent = equivalent_energy(mu, baseline.mu, e_ref)?;
    let shift = energy_shift(equivalent, e_ref)?;
    let relative_error = relative_error_percent(mu, baseline.mu)?;

    let sigma = record.get(Quantity::Sigma).map(f64::abs);
    let (width, resolution) = match sigma {
        Some(s) => {
            let raw = fwhm(s)?;
            let (width, denominator) = match settings.basis {
                ResolutionBasis::Mean => (raw, mu),
                ResolutionBasis::ReferenceEnergy => (raw * e_ref / baseline.mu, e_ref),
            };
            (Some(width), Some(resolution_percent(width, denominator)?))
        }
        None => (None, None),
    };

    Ok(ShiftRow {
        group: record.group().to_string(),
        label: record.label().to_string(),
        temperature: record.temperature(),
        mu,
        sigma,
        reference_energy: e_ref,
        equivalent_energy: equivalent,
        shift,
        relative_error,
        fwhm: width,
        resolution,
    })
}
