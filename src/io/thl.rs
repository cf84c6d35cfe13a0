//! Threshold-scan instrument dumps.
//!
//! One file per THL step. A header line (line 9 by default) carries
//! `# THL = <int>`; the hit count comes either from a trailing
//! `Hits: <int>` summary or from summing one data column of the pixel table.
//!
//! A file that cannot be read or parsed is skipped and reported; the others
//! still load.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::ThresholdPoint;

static THL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\s*THL\s*=\s*(-?\d+)").expect("THL pattern"));
static HITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Hits:\s*(\d+)").expect("hits pattern"));

/// Where the hit count of a dump comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum HitsSource {
    /// `Hits: <int>` on the last non-blank line.
    Summary,
    /// Sum of a 1-based `column` from 1-based `start_line` up to the next `#` line.
    ColumnSum { start_line: usize, column: usize },
}

impl Default for HitsSource {
    fn default() -> Self {
        HitsSource::ColumnSum {
            start_line: 39,
            column: 3,
        }
    }
}

/// Layout of a threshold-scan dump file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThlDumpLayout {
    /// 1-based line holding `# THL = <int>`.
    pub thl_line: usize,
    pub hits: HitsSource,
    /// Inclusive THL window; dumps outside it are ignored.
    pub window: Option<[i64; 2]>,
}

impl Default for ThlDumpLayout {
    fn default() -> Self {
        Self {
            thl_line: 9,
            hits: HitsSource::default(),
            window: None,
        }
    }
}

impl ThlDumpLayout {
    pub fn validate(&self) -> Result<(), String> {
        if self.thl_line == 0 {
            return Err("thl_line is 1-based and must be >= 1".to_string());
        }
        if let HitsSource::ColumnSum { start_line, column } = self.hits {
            if start_line == 0 || column == 0 {
                return Err("start_line and column are 1-based and must be >= 1".to_string());
            }
        }
        if let Some([lo, hi]) = self.window {
            if lo > hi {
                return Err(format!("THL window [{lo}, {hi}] is empty"));
            }
        }
        Ok(())
    }

    fn in_window(&self, thl: i64) -> bool {
        match self.window {
            Some([lo, hi]) => (lo..=hi).contains(&thl),
            None => true,
        }
    }
}

/// Points loaded from a set of dump files.
#[derive(Debug, Clone, Default)]
pub struct ThresholdScan {
    /// In input file order.
    pub points: Vec<ThresholdPoint>,
    /// Files that could not be used, and why.
    pub skipped: Vec<(PathBuf, String)>,
    /// Files outside the THL window.
    pub filtered: usize,
}

/// Parse one dump. `Ok(None)` means the dump is outside the THL window.
pub fn parse_dump(text: &str, layout: &ThlDumpLayout) -> Result<Option<ThresholdPoint>, String> {
    let lines: Vec<&str> = text.lines().collect();

    let header = lines
        .get(layout.thl_line.saturating_sub(1))
        .ok_or_else(|| format!("file has no line {}", layout.thl_line))?;
    let thl: i64 = THL_RE
        .captures(header)
        .and_then(|c| c.get(1))
        .ok_or_else(|| format!("no '# THL = <int>' on line {}", layout.thl_line))?
        .as_str()
        .parse()
        .map_err(|e| format!("bad THL value: {e}"))?;

    if !layout.in_window(thl) {
        return Ok(None);
    }

    let hits = match &layout.hits {
        HitsSource::Summary => {
            let last = lines
                .iter()
                .rev()
                .find(|l| !l.trim().is_empty())
                .ok_or_else(|| "file is empty".to_string())?;
            HITS_RE
                .captures(last)
                .and_then(|c| c.get(1))
                .ok_or_else(|| "no 'Hits: <int>' on the last line".to_string())?
                .as_str()
                .parse::<f64>()
                .map_err(|e| format!("bad hit count: {e}"))?
        }
        HitsSource::ColumnSum { start_line, column } => {
            let mut sum = 0.0;
            for (offset, line) in lines.iter().skip(start_line.saturating_sub(1)).enumerate() {
                if line.starts_with('#') {
                    break;
                }
                let fields: Vec<&str> = line.split_whitespace().collect();
                if let Some(field) = column.checked_sub(1).and_then(|i| fields.get(i)) {
                    let v: f64 = field.parse().map_err(|e| {
                        format!("line {}: bad value '{field}': {e}", start_line + offset)
                    })?;
                    sum += v;
                }
            }
            sum
        }
    };

    Ok(Some(ThresholdPoint { thl, hits }))
}

/// Load one point per dump file.
pub fn load_threshold_scan(paths: &[PathBuf], layout: &ThlDumpLayout) -> ThresholdScan {
    let mut scan = ThresholdScan::default();

    for path in paths {
        match load_one(path, layout) {
            Ok(Some(point)) => scan.points.push(point),
            Ok(None) => {
                debug!("{}: THL outside window", path.display());
                scan.filtered += 1;
            }
            Err(reason) => {
                warn!("Skipping {}: {reason}", path.display());
                scan.skipped.push((path.clone(), reason));
            }
        }
    }

    info!(
        "Loaded {} threshold points ({} skipped, {} outside window).",
        scan.points.len(),
        scan.skipped.len(),
        scan.filtered
    );
    scan
}

/// Dump files of one scan: every regular file directly in `dir`, by name.
pub fn list_scan_files(dir: &Path) -> Result<Vec<PathBuf>, String> {
    let entries = std::fs::read_dir(dir).map_err(|e| format!("cannot list '{}': {e}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| e.to_string())?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn load_one(path: &Path, layout: &ThlDumpLayout) -> Result<Option<ThresholdPoint>, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    parse_dump(&String::from_utf8_lossy(&bytes), layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump(thl: i64, rows: &[(u32, u32, f64)], footer: &str) -> String {
        let mut s = String::new();
        for i in 1..=8 {
            s.push_str(&format!("# header {i}\n"));
        }
        s.push_str(&format!("# THL = {thl}\n"));
        for i in 10..=38 {
            s.push_str(&format!("# meta {i}\n"));
        }
        for (x, y, v) in rows {
            s.push_str(&format!("{x} {y} {v}\n"));
        }
        s.push_str(footer);
        s
    }

    #[test]
    fn column_sum_mode_stops_at_next_comment() {
        let text = dump(850, &[(1, 1, 3.0), (1, 2, 4.0), (2, 2, 5.5)], "# end\n7 7 100\n");
        let p = parse_dump(&text, &ThlDumpLayout::default()).unwrap().unwrap();
        assert_eq!(p.thl, 850);
        assert_eq!(p.hits, 12.5);
    }

    #[test]
    fn column_sum_ignores_short_rows_and_rejects_bad_numbers() {
        let text = dump(850, &[(1, 1, 3.0)], "5 5\n");
        let p = parse_dump(&text, &ThlDumpLayout::default()).unwrap().unwrap();
        assert_eq!(p.hits, 3.0);

        let text = dump(850, &[(1, 1, 3.0)], "5 5 abc\n");
        assert!(parse_dump(&text, &ThlDumpLayout::default()).is_err());
    }

    #[test]
    fn summary_mode_reads_last_non_blank_line() {
        let layout = ThlDumpLayout {
            hits: HitsSource::Summary,
            ..ThlDumpLayout::default()
        };
        let text = dump(900, &[(1, 1, 3.0)], "Hits: 4521\n\n  \n");
        let p = parse_dump(&text, &layout).unwrap().unwrap();
        assert_eq!(p, ThresholdPoint { thl: 900, hits: 4521.0 });

        let text = dump(900, &[(1, 1, 3.0)], "");
        assert!(parse_dump(&text, &layout).is_err());
    }

    #[test]
    fn window_filters_and_missing_header_fails() {
        let layout = ThlDumpLayout {
            window: Some([800, 992]),
            ..ThlDumpLayout::default()
        };
        let text = dump(1000, &[(1, 1, 3.0)], "");
        assert_eq!(parse_dump(&text, &layout).unwrap(), None);

        assert!(parse_dump("# THL = 5\n", &ThlDumpLayout::default()).is_err());
    }

    #[test]
    fn loader_skips_unreadable_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        let good = dir.join("good.txt");
        std::fs::write(&good, dump(820, &[(0, 0, 2.0)], "")).unwrap();
        let missing = dir.join("missing.txt");

        let scan = load_threshold_scan(&[good, missing], &ThlDumpLayout::default());
        assert_eq!(scan.points, vec![ThresholdPoint { thl: 820, hits: 2.0 }]);
        assert_eq!(scan.skipped.len(), 1);
    }

    #[test]
    fn scan_directory_lists_files_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.txt", "c.txt"] {
            std::fs::write(tmp.path().join(name), "").unwrap();
        }
        std::fs::create_dir(tmp.path().join("nested")).unwrap();

        let files = list_scan_files(tmp.path()).unwrap();
        let names: Vec<_> = files.iter().filter_map(|p| p.file_name()?.to_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
        assert!(list_scan_files(&tmp.path().join("missing")).is_err());
    }

    #[test]
    fn layout_validation() {
        assert!(ThlDumpLayout::default().validate().is_ok());
        let bad = ThlDumpLayout {
            window: Some([10, 5]),
            ..ThlDumpLayout::default()
        };
        assert!(bad.validate().is_err());
    }
}
