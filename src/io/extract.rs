//! Line-oriented record extraction from summary text files.
//!
//! Every format is parsed one line at a time. A line either yields a value or
//! a reason it was skipped; a bad line never aborts the file. Skipped lines
//! are logged at debug level and returned in the extraction summary so the
//! caller can report how much of the input was usable.
//!
//! Supported line shapes:
//!
//! - key-value: `Group_Cu: 15Ikrum, Temperature: 20°C, Energy: 8.23 keV`
//! - tagged peak: `20°C_2Ikrum Re: μ = 51.20, σ = 3.10, FWHM = 7.30 keV, ...`
//! - actual energy: `15Ikrum, 20, Actual Energy = 22.10 KeV`
//! - bracket series: `40°C_10Ikrum Re: [8.04, 15.7, 17.5], [51.2, 93.15, 112.19, 140.3]`

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use clap::ValueEnum;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{Quantity, Record, SeriesLine};
use crate::error::AppError;

/// Shape of the lines in a record file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LineFormat {
    /// `Group_X: label, Temperature: T°C, Key: value unit, ...`
    KeyValue,
    /// `T°C_label: μ = .., σ = .., ...`
    Tagged,
    /// `label, T, Actual Energy = E KeV`
    ActualEnergy,
}

/// A line that produced nothing, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedLine {
    /// 1-based line number.
    pub line: usize,
    pub reason: String,
}

/// Extraction output: parsed items + skipped lines.
#[derive(Debug, Clone)]
pub struct Extraction<T> {
    pub items: Vec<T>,
    pub skipped: Vec<SkippedLine>,
    /// Non-blank lines seen.
    pub lines_read: usize,
}

impl<T> Default for Extraction<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            skipped: Vec::new(),
            lines_read: 0,
        }
    }
}

// Literal patterns; compilation cannot fail.
static TEMPERATURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)[^\d]*C").expect("temperature pattern"));
static MU_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"μ = ([\d.]+)").expect("mean pattern"));
static SIGMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"σ = ([\d.]+)").expect("width pattern"));
static RESOLUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Energy Resolution = ([\d.]+)\s*%").expect("resolution pattern")
});
static IKRUM_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(\d+Ikrum\s(?:Re|RT))").expect("label pattern"));
static SERIES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^:\[\]]+):\s*\[.*\],\s*\[([^\[\]]*)\]\s*$").expect("series pattern")
});

const UNITS: [&str; 4] = ["keV", "KeV", "eV", "%"];

/// Undo the common UTF-8-read-as-Latin-1 damage seen in exported text files.
pub fn repair_mojibake(line: &str) -> String {
    line.replace("Î¼", "μ").replace("Ïƒ", "σ").replace('Â', "")
}

/// Parse a key-value line. `None` if the line is not a well-formed record.
pub fn parse_key_value_line(line: &str) -> Option<Record> {
    try_key_value(line).ok()
}

/// Parse a tagged μ/σ line, assigning it to `group`.
pub fn parse_tagged_line(line: &str, group: &str) -> Option<Record> {
    try_tagged(line, group).ok()
}

/// Parse an actual-energy line, assigning it to `group`.
pub fn parse_actual_energy_line(line: &str, group: &str) -> Option<Record> {
    try_actual_energy(line, group).ok()
}

/// Parse a bracket series line.
pub fn parse_series_line(line: &str) -> Option<SeriesLine> {
    try_series(line).ok()
}

/// Extract all records of `format` from `reader`.
///
/// `group` is the material group assigned to formats that do not carry one
/// on the line (tagged and actual-energy lines).
pub fn extract_records<R: BufRead>(
    reader: R,
    format: LineFormat,
    group: &str,
) -> std::io::Result<Extraction<Record>> {
    extract_with(reader, |line| match format {
        LineFormat::KeyValue => try_key_value(line),
        LineFormat::Tagged => try_tagged(line, group),
        LineFormat::ActualEnergy => try_actual_energy(line, group),
    })
}

/// Extract all bracket series lines from `reader`.
pub fn extract_series<R: BufRead>(reader: R) -> std::io::Result<Extraction<SeriesLine>> {
    extract_with(reader, try_series)
}

/// Open `path` and extract records. An unreadable file is an input error.
pub fn read_records(path: &Path, format: LineFormat, group: &str) -> Result<Extraction<Record>, AppError> {
    let reader = open(path)?;
    extract_records(reader, format, group)
        .map_err(|e| AppError::new(2, format!("Failed to read '{}': {e}", path.display())))
}

/// Open `path` and extract bracket series lines.
pub fn read_series(path: &Path) -> Result<Extraction<SeriesLine>, AppError> {
    let reader = open(path)?;
    extract_series(reader)
        .map_err(|e| AppError::new(2, format!("Failed to read '{}': {e}", path.display())))
}

pub(crate) fn open(path: &Path) -> Result<BufReader<File>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open '{}': {e}", path.display())))?;
    Ok(BufReader::new(file))
}

fn extract_with<R, T, F>(mut reader: R, parse: F) -> std::io::Result<Extraction<T>>
where
    R: BufRead,
    F: Fn(&str) -> Result<T, String>,
{
    let mut out = Extraction::default();
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;

        // Invalid UTF-8 becomes U+FFFD.
        let text = String::from_utf8_lossy(&buf);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        out.lines_read += 1;

        match parse(text) {
            Ok(item) => out.items.push(item),
            Err(reason) => {
                debug!("line {line_no}: skipped ({reason})");
                out.skipped.push(SkippedLine {
                    line: line_no,
                    reason,
                });
            }
        }
    }

    Ok(out)
}

fn try_key_value(raw: &str) -> Result<Record, String> {
    let line = repair_mojibake(raw);
    let line = line.trim();

    for keyword in ["Group", "Temperature", "Energy"] {
        if !line.contains(keyword) {
            return Err(format!("missing keyword '{keyword}'"));
        }
    }

    let parts: Vec<&str> = line.split(',').collect();
    let (group, label) = parts[0]
        .split_once(':')
        .ok_or_else(|| "missing 'group: label' head".to_string())?;
    let (group, label) = (group.trim(), label.trim());
    if group.is_empty() || label.is_empty() {
        return Err("empty group or label".to_string());
    }

    let (key, temperature) = parts
        .get(1)
        .and_then(|seg| split_key_value(seg))
        .ok_or_else(|| "missing temperature segment".to_string())?;
    if key != "Temperature" {
        return Err(format!("expected 'Temperature' as second key, found '{key}'"));
    }
    let temperature = parse_temperature(temperature)?;

    let mut measurements = Vec::new();
    for seg in parts.iter().skip(2) {
        let Some((key, value)) = split_key_value(seg) else {
            continue;
        };
        let Some(quantity) = quantity_for_key(key) else {
            continue;
        };
        let value = parse_number(strip_unit(value))
            .map_err(|e| format!("bad value for '{key}': {e}"))?;
        measurements.push((quantity, value));
    }

    Record::new(group, label, temperature, measurements)
        .ok_or_else(|| "no finite measurement".to_string())
}

fn try_tagged(raw: &str, group: &str) -> Result<Record, String> {
    let line = repair_mojibake(raw);

    let temperature = TEMPERATURE_RE
        .captures(&line)
        .and_then(|c| c.get(1))
        .ok_or_else(|| "missing temperature".to_string())?;
    let temperature: i32 = temperature
        .as_str()
        .parse()
        .map_err(|e| format!("bad temperature: {e}"))?;

    let mu = capture_number(&MU_RE, &line)?.ok_or_else(|| "missing μ".to_string())?;
    let label = IKRUM_LABEL_RE
        .captures(&line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| "missing Ikrum label".to_string())?;

    let mut measurements = vec![(Quantity::Mu, mu)];
    if let Some(sigma) = capture_number(&SIGMA_RE, &line)? {
        measurements.push((Quantity::Sigma, sigma));
    }
    if let Some(resolution) = capture_number(&RESOLUTION_RE, &line)? {
        measurements.push((Quantity::Resolution, resolution));
    }

    Record::new(group, label, temperature, measurements)
        .ok_or_else(|| "no finite measurement".to_string())
}

fn try_actual_energy(raw: &str, group: &str) -> Result<Record, String> {
    let line = repair_mojibake(raw);
    let (head, energy) = line
        .split_once("Actual Energy")
        .ok_or_else(|| "missing 'Actual Energy'".to_string())?;

    let energy = energy
        .trim_start()
        .strip_prefix('=')
        .or_else(|| energy.trim_start().strip_prefix(':'))
        .ok_or_else(|| "missing '=' after 'Actual Energy'".to_string())?;
    let energy = parse_number(strip_unit(energy))?;

    let mut fields = head.split(',').map(str::trim);
    let label = fields
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "missing label".to_string())?;
    let temperature = fields
        .next()
        .ok_or_else(|| "missing temperature".to_string())
        .and_then(parse_temperature)?;

    Record::new(group, label, temperature, vec![(Quantity::Energy, energy)])
        .ok_or_else(|| "no finite measurement".to_string())
}

fn try_series(raw: &str) -> Result<SeriesLine, String> {
    let line = repair_mojibake(raw);
    let caps = SERIES_RE
        .captures(line.trim())
        .ok_or_else(|| "not a 'label: [..], [..]' line".to_string())?;

    let head = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    let temperature = TEMPERATURE_RE
        .captures(head)
        .and_then(|c| c.get(1))
        .ok_or_else(|| "missing temperature in label".to_string())?
        .as_str()
        .parse::<i32>()
        .map_err(|e| format!("bad temperature: {e}"))?;
    let label = head
        .split_once('_')
        .map(|(_, rest)| rest.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(head)
        .to_string();

    let values = caps
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_number)
        .collect::<Result<Vec<f64>, String>>()?;
    if values.is_empty() {
        return Err("empty value list".to_string());
    }

    Ok(SeriesLine {
        label,
        temperature,
        values,
    })
}

/// Split `Key: value` or `Key = value` at whichever separator comes first.
fn split_key_value(seg: &str) -> Option<(&str, &str)> {
    let idx = seg.find([':', '='])?;
    Some((seg[..idx].trim(), seg[idx + 1..].trim()))
}

fn quantity_for_key(key: &str) -> Option<Quantity> {
    match key.trim().to_lowercase().as_str() {
        "energy" | "measured energy" => Some(Quantity::Energy),
        "absolute shift" | "shift" => Some(Quantity::Shift),
        "relative error" => Some(Quantity::RelativeError),
        "energy resolution" | "resolution" => Some(Quantity::Resolution),
        "mean" | "μ" | "mu" => Some(Quantity::Mu),
        "sigma" | "σ" => Some(Quantity::Sigma),
        "hits" | "counts" => Some(Quantity::Counts),
        _ => None,
    }
}

fn parse_temperature(s: &str) -> Result<i32, String> {
    let s = s.trim();
    let s = s
        .strip_suffix("°C")
        .or_else(|| s.strip_suffix('C'))
        .unwrap_or(s)
        .trim();
    s.parse::<i32>()
        .map_err(|e| format!("bad temperature '{s}': {e}"))
}

fn strip_unit(s: &str) -> &str {
    let s = s.trim();
    for unit in UNITS {
        if let Some(v) = s.strip_suffix(unit) {
            return v.trim();
        }
    }
    s
}

fn parse_number(s: &str) -> Result<f64, String> {
    let s = s.trim();
    let v: f64 = s.parse().map_err(|e| format!("'{s}': {e}"))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(format!("'{s}' is not finite"))
    }
}

fn capture_number(re: &Regex, line: &str) -> Result<Option<f64>, String> {
    match re.captures(line).and_then(|c| c.get(1)) {
        Some(m) => parse_number(m.as_str()).map(Some),
        None => Ok(None),
    }
}
