//! Slope/intercept calibration tables.
//!
//! CSV with the header `Ikrum, Temperature (°C), Slope, Intercept`, one row
//! per (label, temperature). Written by `calibrate`, read by `correct`.

use std::path::Path;

use crate::domain::SlopeRow;
use crate::error::AppError;

pub const SLOPE_TABLE_HEADER: [&str; 4] = ["Ikrum", "Temperature (°C)", "Slope", "Intercept"];

/// Read a slope table from any reader.
///
/// Rows that do not parse are returned as `(line, message)` so the caller
/// can report them; they do not abort the read.
pub fn read_slope_table<R: std::io::Read>(reader: R) -> (Vec<SlopeRow>, Vec<(usize, String)>) {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (idx, result) in rdr.records().enumerate() {
        // records() starts after the header; lines are 1-based.
        let line = idx + 2;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                errors.push((line, format!("CSV parse error: {e}")));
                continue;
            }
        };
        match parse_row(&record) {
            Ok(row) => rows.push(row),
            Err(e) => errors.push((line, e)),
        }
    }

    (rows, errors)
}

/// Load a slope table file.
pub fn load_slope_table(path: &Path) -> Result<(Vec<SlopeRow>, Vec<(usize, String)>), AppError> {
    let file = std::fs::File::open(path).map_err(|e| {
        AppError::new(2, format!("Failed to open slope table '{}': {e}", path.display()))
    })?;
    Ok(read_slope_table(file))
}

/// Write a slope table.
pub fn write_slope_table<W: std::io::Write>(writer: W, rows: &[SlopeRow]) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(SLOPE_TABLE_HEADER)?;
    for row in rows {
        wtr.write_record([
            row.label.clone(),
            row.temperature.to_string(),
            row.slope.to_string(),
            row.intercept.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write a slope table file.
pub fn save_slope_table(path: &Path, rows: &[SlopeRow]) -> Result<(), AppError> {
    let file = std::fs::File::create(path).map_err(|e| {
        AppError::new(2, format!("Failed to create slope table '{}': {e}", path.display()))
    })?;
    write_slope_table(file, rows)
        .map_err(|e| AppError::new(2, format!("Failed to write slope table: {e}")))
}

fn parse_row(record: &csv::StringRecord) -> Result<SlopeRow, String> {
    let field = |i: usize, name: &str| {
        record
            .get(i)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("missing {name}"))
    };
    let label = field(0, "Ikrum")?.to_string();
    let temperature = field(1, "temperature")?
        .parse::<i32>()
        .map_err(|e| format!("bad temperature: {e}"))?;
    let slope = parse_finite(field(2, "slope")?, "slope")?;
    let intercept = parse_finite(field(3, "intercept")?, "intercept")?;
    Ok(SlopeRow {
        label,
        temperature,
        slope,
        intercept,
    })
}

fn parse_finite(s: &str, name: &str) -> Result<f64, String> {
    s.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("bad {name} '{s}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slope_table_survives_csv_round_trip() {
        let rows = vec![
            SlopeRow {
                label: "2Ikrum Re".to_string(),
                temperature: 20,
                slope: 1.0234,
                intercept: 0.0,
            },
            SlopeRow {
                label: "15Ikrum".to_string(),
                temperature: -5,
                slope: 0.9871,
                intercept: -0.125,
            },
        ];
        let mut buf = Vec::new();
        write_slope_table(&mut buf, &rows).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("Ikrum,Temperature (°C),Slope,Intercept\n"));

        let (back, errors) = read_slope_table(buf.as_slice());
        assert!(errors.is_empty());
        assert_eq!(back, rows);
    }

    #[test]
    fn hand_written_table_with_spaces_and_bad_rows() {
        let text = "Ikrum, Temperature (°C), Slope, Intercept\n\
                    15Ikrum, 20, 1.5, 0.25\n\
                    5Ikrum, warm, 1.0, 0.0\n\
                    2Ikrum, 40, 1.1\n";
        let (rows, errors) = read_slope_table(text.as_bytes());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "15Ikrum");
        assert_eq!(rows[0].intercept, 0.25);
        let lines: Vec<usize> = errors.iter().map(|(l, _)| *l).collect();
        assert_eq!(lines, vec![3, 4]);
    }
}
