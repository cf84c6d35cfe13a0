//! Energy calibration, slope-table correction and TOT prediction.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use serde::Serialize;

use crate::calc::{CalcError, correct_linear, invert_linear};
use crate::domain::{
    CalibrationPoint, FitResult, GroupedRecords, Quantity, Record, ReferenceEnergies, SeriesLine,
    SlopeRow,
};
use crate::fit::{fit_linear, fit_proportional};

/// Fit of actual vs measured energy for one (label, temperature).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationFit {
    pub label: String,
    pub temperature: i32,
    pub fit: FitResult,
    /// One point per record: actual energy vs calibrated measured energy.
    pub points: Vec<CalibrationPoint>,
    /// `(target actual energy, estimated measured energy)`.
    pub estimates: Vec<(f64, f64)>,
}

impl CalibrationFit {
    pub fn slope(&self) -> f64 {
        self.fit.slope().unwrap_or(f64::NAN)
    }

    pub fn intercept(&self) -> f64 {
        self.fit.intercept().unwrap_or(0.0)
    }

    pub fn slope_row(&self) -> SlopeRow {
        SlopeRow {
            label: self.label.clone(),
            temperature: self.temperature,
            slope: self.slope(),
            intercept: self.intercept(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationReport {
    /// Ordered by temperature, then label in first-seen order.
    pub fits: Vec<CalibrationFit>,
    pub failures: Vec<CalcError>,
}

impl CalibrationReport {
    pub fn slope_rows(&self) -> Vec<SlopeRow> {
        self.fits.iter().map(CalibrationFit::slope_row).collect()
    }
}

/// Fit actual energy against measured energy per (label, temperature).
///
/// The actual energy of a record comes from its `Group_<Material>` group.
/// Records without a measured energy are ignored; groups whose material has
/// no reference energy are reported once each.
pub fn calibrate_energies(
    records: &[Record],
    energies: &ReferenceEnergies,
    through_origin: bool,
    targets: &[f64],
) -> CalibrationReport {
    let mut report = CalibrationReport::default();
    let mut unknown = BTreeSet::new();

    let usable = records.iter().filter(|r| {
        if r.get(Quantity::Energy).is_none() {
            debug!("{}: {} at {}°C has no energy", r.group(), r.label(), r.temperature());
            return false;
        }
        if energies.for_record(r).is_none() {
            unknown.insert(r.group().to_string());
            return false;
        }
        true
    });
    let grouped =
        GroupedRecords::from_records(usable.cloned(), |r| (r.label().to_string(), r.temperature()));

    for group in unknown {
        let err = CalcError::UnknownMaterial(group);
        warn!("{err}");
        report.failures.push(err);
    }

    let mut keys: Vec<(usize, &(String, i32))> = grouped.iter().map(|(k, _)| k).enumerate().collect();
    keys.sort_by_key(|(seen, (_, temperature))| (*temperature, *seen));

    for (_, key) in keys {
        let Some(records) = grouped.get(key) else {
            continue;
        };
        match calibrate_group(key, records, energies, through_origin, targets) {
            Ok(fit) => report.fits.push(fit),
            Err(err) => {
                warn!("{err}");
                report.failures.push(err);
            }
        }
    }

    info!(
        "Calibrated {} (label, temperature) groups, {} failed.",
        report.fits.len(),
        report.failures.len()
    );
    report
}

fn calibrate_group(
    (label, temperature): &(String, i32),
    records: &[Record],
    energies: &ReferenceEnergies,
    through_origin: bool,
    targets: &[f64],
) -> Result<CalibrationFit, CalcError> {
    if records.len() < 2 {
        return Err(CalcError::TooFewPoints {
            label: label.clone(),
            temperature: *temperature,
            got: records.len(),
            needed: 2,
        });
    }

    let (measured, actual): (Vec<f64>, Vec<f64>) = records
        .iter()
        .filter_map(|r| Some((r.get(Quantity::Energy)?, energies.for_record(r)?)))
        .unzip();

    let fitted = if through_origin {
        fit_proportional(&measured, &actual)
    } else {
        fit_linear(&measured, &actual)
    }
    .map_err(|e| CalcError::Fit {
        label: label.clone(),
        temperature: *temperature,
        reason: e.to_string(),
    })?;

    let slope = fitted.slope().unwrap_or(f64::NAN);
    let intercept = fitted.intercept().unwrap_or(0.0);

    let points = records
        .iter()
        .zip(measured.iter().zip(&actual))
        .map(|(r, (&x, &y))| {
            Ok(CalibrationPoint {
                group: r.group().to_string(),
                label: label.clone(),
                temperature: *temperature,
                reference: y,
                estimate: correct_linear(x, slope, intercept)?,
            })
        })
        .collect::<Result<Vec<_>, CalcError>>()?;

    let estimates = targets
        .iter()
        .map(|&target| Ok((target, invert_linear(target, slope, intercept)?)))
        .collect::<Result<Vec<_>, CalcError>>()?;

    Ok(CalibrationFit {
        label: label.clone(),
        temperature: *temperature,
        fit: fitted,
        points,
        estimates,
    })
}

/// A measured energy corrected with a slope-table row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectedEnergy {
    pub label: String,
    pub temperature: i32,
    pub measured: f64,
    pub corrected: f64,
}

/// Apply `corrected = slope·measured + intercept` per (label, temperature).
///
/// Records whose (label, temperature) has no row are reported.
pub fn correct_energies(
    records: &[Record],
    table: &[SlopeRow],
) -> (Vec<CorrectedEnergy>, Vec<CalcError>) {
    let mut corrected = Vec::new();
    let mut failures = Vec::new();

    for record in records {
        let Some(measured) = record.get(Quantity::Energy) else {
            continue;
        };
        let row = table
            .iter()
            .rev()
            .find(|row| row.label == record.label() && row.temperature == record.temperature());
        let result = row
            .ok_or_else(|| CalcError::MissingSlope {
                label: record.label().to_string(),
                temperature: record.temperature(),
            })
            .and_then(|row| correct_linear(measured, row.slope, row.intercept));
        match result {
            Ok(value) => corrected.push(CorrectedEnergy {
                label: record.label().to_string(),
                temperature: record.temperature(),
                measured,
                corrected: value,
            }),
            Err(err) => {
                warn!("{err}");
                failures.push(err);
            }
        }
    }

    (corrected, failures)
}

/// Energy predicted for the trailing TOT value of a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotPrediction {
    pub label: String,
    pub temperature: i32,
    pub fit: FitResult,
    pub tot: f64,
    pub energy: f64,
}

/// Fit `TOT = slope·E + intercept` on the known energies and invert it for
/// the value after them.
///
/// The series must hold exactly one TOT per known energy plus the unknown.
pub fn predict_from_series(series: &SeriesLine, known: &[f64]) -> Result<TotPrediction, CalcError> {
    let expected = known.len() + 1;
    if series.values.len() != expected {
        return Err(CalcError::SeriesLength {
            label: series.label.clone(),
            temperature: series.temperature,
            got: series.values.len(),
            expected,
        });
    }
    let (tots, unknown) = series.values.split_at(known.len());
    let tot = unknown[0];

    let fitted = fit_linear(known, tots).map_err(|e| CalcError::Fit {
        label: series.label.clone(),
        temperature: series.temperature,
        reason: e.to_string(),
    })?;
    let slope = fitted.slope().unwrap_or(f64::NAN);
    let intercept = fitted.intercept().unwrap_or(0.0);

    Ok(TotPrediction {
        label: series.label.clone(),
        temperature: series.temperature,
        energy: invert_linear(tot, slope, intercept)?,
        tot,
        fit: fitted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measured(group: &str, label: &str, t: i32, e: f64) -> Record {
        Record::new(group, label, t, vec![(Quantity::Energy, e)]).unwrap()
    }

    #[test]
    fn through_origin_calibration_and_target_estimate() {
        let records = vec![
            measured("Group_Cu", "15Ikrum", 20, 8.04 / 2.0),
            measured("Group_Zr", "15Ikrum", 20, 15.7 / 2.0),
            measured("Group_Mo", "15Ikrum", 20, 17.5 / 2.0),
        ];
        let report = calibrate_energies(&records, &ReferenceEnergies::default(), true, &[59.4]);
        assert!(report.failures.is_empty());
        let fit = &report.fits[0];
        assert!((fit.slope() - 2.0).abs() < 1e-12);
        assert_eq!(fit.intercept(), 0.0);
        assert!((fit.estimates[0].1 - 29.7).abs() < 1e-9);
        assert_eq!(fit.points.len(), 3);
        assert!((fit.points[1].estimate - 15.7).abs() < 1e-9);
    }

    #[test]
    fn correction_with_fitted_table_reproduces_reference_energies() {
        let records = vec![
            measured("Group_Cu", "5Ikrum", 40, 7.1),
            measured("Group_Zr", "5Ikrum", 40, 14.3),
            measured("Group_Mo", "5Ikrum", 40, 16.1),
        ];
        // Collinear: actual = 1.0·measured + 0.94 for every point.
        let energies = ReferenceEnergies::new(
            [("Cu", 8.04), ("Zr", 15.24), ("Mo", 17.04)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        );
        let report = calibrate_energies(&records, &energies, false, &[]);
        let table = report.slope_rows();
        let (corrected, failures) = correct_energies(&records, &table);
        assert!(failures.is_empty());
        let expected = [8.04, 15.24, 17.04];
        for (c, e) in corrected.iter().zip(expected) {
            assert!((c.corrected - e).abs() < 1e-9, "{} vs {e}", c.corrected);
        }
    }

    #[test]
    fn small_groups_and_unknown_materials_are_reported() {
        let records = vec![
            measured("Group_Cu", "2Ikrum Re", 10, 8.0),
            measured("Group_Nb", "2Ikrum Re", 10, 16.0),
            measured("Group_Nb", "2Ikrum Re", 20, 16.0),
        ];
        let report = calibrate_energies(&records, &ReferenceEnergies::default(), true, &[59.4]);
        assert!(report.fits.is_empty());
        assert_eq!(
            report.failures,
            vec![
                CalcError::UnknownMaterial("Group_Nb".to_string()),
                CalcError::TooFewPoints {
                    label: "2Ikrum Re".to_string(),
                    temperature: 10,
                    got: 1,
                    needed: 2,
                },
            ]
        );
    }

    #[test]
    fn fits_are_ordered_by_temperature() {
        let records = vec![
            measured("Group_Cu", "A", 40, 8.0),
            measured("Group_Zr", "A", 40, 15.0),
            measured("Group_Cu", "B", 20, 8.0),
            measured("Group_Zr", "B", 20, 15.0),
            measured("Group_Cu", "A", 20, 8.0),
            measured("Group_Zr", "A", 20, 15.0),
        ];
        let report = calibrate_energies(&records, &ReferenceEnergies::default(), true, &[]);
        let order: Vec<(&str, i32)> = report
            .fits
            .iter()
            .map(|f| (f.label.as_str(), f.temperature))
            .collect();
        assert_eq!(order, [("B", 20), ("A", 20), ("A", 40)]);
    }

    #[test]
    fn correction_reports_missing_rows() {
        let records = vec![measured("Ikrum", "15Ikrum", 20, 22.1)];
        let table = vec![SlopeRow {
            label: "15Ikrum".to_string(),
            temperature: 40,
            slope: 1.0,
            intercept: 0.0,
        }];
        let (corrected, failures) = correct_energies(&records, &table);
        assert!(corrected.is_empty());
        assert_eq!(
            failures,
            vec![CalcError::MissingSlope {
                label: "15Ikrum".to_string(),
                temperature: 20,
            }]
        );
    }

    #[test]
    fn tot_series_prediction_inverts_the_fit() {
        let known = [8.04, 15.7, 17.5];
        let tot = |e: f64| 6.0 * e + 3.0;
        let series = SeriesLine {
            label: "10Ikrum Re".to_string(),
            temperature: 40,
            values: vec![tot(8.04), tot(15.7), tot(17.5), tot(22.1)],
        };
        let p = predict_from_series(&series, &known).unwrap();
        assert!((p.energy - 22.1).abs() < 1e-9);
        assert_eq!(p.tot, tot(22.1));

        let short = SeriesLine {
            values: vec![1.0, 2.0, 3.0],
            ..series
        };
        assert!(matches!(
            predict_from_series(&short, &known),
            Err(CalcError::SeriesLength { got: 3, expected: 4, .. })
        ));
    }
}
