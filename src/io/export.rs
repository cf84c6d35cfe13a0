//! CSV exports.
//!
//! Every exported table is a slice of flat `Serialize` rows; the header comes
//! from the field names and missing optional values are left empty.

use std::path::Path;

use serde::Serialize;

use crate::error::AppError;

/// Write `rows` to a CSV file at `path`.
pub fn write_rows_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), AppError> {
    let file = std::fs::File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    write_rows(file, rows)
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV '{}': {e}", path.display())))
}

/// Write `rows` as CSV to any writer.
pub fn write_rows<W: std::io::Write, T: Serialize>(writer: W, rows: &[T]) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::ShiftRow;
    use crate::domain::CalibrationPoint;

    #[test]
    fn calibration_points_have_a_header() {
        let rows = vec![CalibrationPoint {
            group: "Group_Cu".to_string(),
            label: "15Ikrum".to_string(),
            temperature: 20,
            reference: 8.04,
            estimate: 8.1,
        }];
        let mut buf = Vec::new();
        write_rows(&mut buf, &rows).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "group,label,temperature,reference,estimate\nGroup_Cu,15Ikrum,20,8.04,8.1\n"
        );
    }

    #[test]
    fn missing_optional_values_are_empty_cells() {
        let rows = vec![ShiftRow {
            group: "Group_Cu".to_string(),
            label: "2Ikrum Re".to_string(),
            temperature: 40,
            mu: 52.0,
            sigma: None,
            reference_energy: 8.04,
            equivalent_energy: 8.3616,
            shift: 0.3216,
            relative_error: 4.0,
            fwhm: None,
            resolution: None,
        }];
        let mut buf = Vec::new();
        write_rows(&mut buf, &rows).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let data = text.lines().nth(1).unwrap();
        assert_eq!(data, "Group_Cu,2Ikrum Re,40,52.0,,8.04,8.3616,0.3216,4.0,,");
    }
}
