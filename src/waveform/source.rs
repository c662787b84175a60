//! Raw waveform files: resolution and row scanning
//!
//! Each row is 188 comma-separated numbers with no header: 187 signal
//! samples followed by a class label. Malformed rows are dropped and counted.

use super::{ROW_WIDTH, SIGNAL_LEN};
use crate::config::WaveformSourceSpec;
use crate::error::RowError;
use crate::freshness::RawSource;
use crate::Result;
use csv::StringRecord;
use std::collections::BTreeMap;
use std::path::Path;

/// Fallback file used when the full export is not present
fn sample_file_name(file_name: &str) -> String {
    match file_name.strip_suffix(".csv") {
        Some(stem) => format!("{stem}_sample.csv"),
        None => format!("{file_name}_sample"),
    }
}

/// A configured source and the file it resolved to, if any
#[derive(Debug, Clone)]
pub(crate) struct ResolvedSource {
    pub(crate) spec: WaveformSourceSpec,
    pub(crate) raw: Option<RawSource>,
}

impl ResolvedSource {
    /// Look up `<dir>/<file_name>`, falling back to `<dir>/<stem>_sample.csv`
    pub(crate) fn resolve(dir: &Path, spec: &WaveformSourceSpec) -> Result<Self> {
        let mut raw = RawSource::stat(dir.join(&spec.file_name))?;
        if raw.is_none() {
            let fallback = dir.join(sample_file_name(&spec.file_name));
            raw = RawSource::stat(&fallback)?;
            if raw.is_some() {
                tracing::info!(
                    source = %spec.name,
                    path = %fallback.display(),
                    "full waveform export not found, using sample file"
                );
            }
        }
        Ok(Self {
            spec: spec.clone(),
            raw,
        })
    }
}

/// Row counts for one scan of one source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ScanTally {
    pub(crate) rows_used: u64,
    pub(crate) dropped: BTreeMap<&'static str, u64>,
}

impl ScanTally {
    pub(crate) fn rows_dropped(&self) -> u64 {
        self.dropped.values().sum()
    }
}

/// Largest accepted sample magnitude; squares and sums of a full row stay finite
pub(crate) const MAX_ABS_SAMPLE: f64 = 1e6;

#[allow(clippy::cast_possible_truncation)]
fn parse_row(record: &StringRecord, label_offset: i64, signal: &mut Vec<f64>) -> std::result::Result<i64, RowError> {
    if record.len() != ROW_WIDTH {
        return Err(RowError::WrongFieldCount {
            expected: ROW_WIDTH,
            found: record.len(),
        });
    }
    signal.clear();
    for (column, field) in record.iter().take(SIGNAL_LEN).enumerate() {
        let value = field
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| RowError::InvalidNumber {
                column,
                value: field.to_string(),
            })?;
        if value.abs() > MAX_ABS_SAMPLE {
            return Err(RowError::OutOfRange {
                column,
                value: field.to_string(),
            });
        }
        signal.push(value);
    }
    let raw_label = record.get(SIGNAL_LEN).unwrap_or_default();
    let label = raw_label
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && v.abs() < 1e15)
        .ok_or_else(|| RowError::InvalidLabel(raw_label.to_string()))?;
    Ok(label.round() as i64 + label_offset)
}

/// Stream every well-formed row of `path` into `visit(label, signal)`
///
/// Labels already include `label_offset`. Rows are visited in file order.
pub(crate) fn scan<F>(path: &Path, label_offset: i64, mut visit: F) -> Result<ScanTally>
where
    F: FnMut(i64, &[f64]),
{
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut tally = ScanTally::default();
    let mut record = StringRecord::new();
    let mut signal = Vec::with_capacity(SIGNAL_LEN);
    loop {
        let parsed = match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => parse_row(&record, label_offset, &mut signal),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => Err(RowError::Unreadable(e.to_string())),
        };
        match parsed {
            Ok(label) => {
                tally.rows_used += 1;
                visit(label, &signal);
            }
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "dropping malformed waveform row");
                *tally.dropped.entry(err.reason()).or_insert(0) += 1;
            }
        }
    }
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    fn row(value: f64, label: &str) -> String {
        let mut fields: Vec<String> = (0..SIGNAL_LEN).map(|_| value.to_string()).collect();
        fields.push(label.to_string());
        fields.join(",")
    }

    #[test]
    fn test_sample_file_name() {
        assert_eq!(sample_file_name("mitbih_train.csv"), "mitbih_train_sample.csv");
        assert_eq!(sample_file_name("raw"), "raw_sample");
    }

    #[test]
    fn test_resolve_prefers_full_then_sample() {
        let dir = tempfile::tempdir().unwrap();
        let spec = WaveformSourceSpec::new("a", "a.csv", 0, vec![0]);

        assert!(ResolvedSource::resolve(dir.path(), &spec).unwrap().raw.is_none());

        fs::write(dir.path().join("a_sample.csv"), "x").unwrap();
        let resolved = ResolvedSource::resolve(dir.path(), &spec).unwrap();
        assert_eq!(resolved.raw.unwrap().path(), dir.path().join("a_sample.csv"));

        fs::write(dir.path().join("a.csv"), "x").unwrap();
        let resolved = ResolvedSource::resolve(dir.path(), &spec).unwrap();
        assert_eq!(resolved.raw.unwrap().path(), dir.path().join("a.csv"));
    }

    #[test]
    fn test_scan_drops_and_counts_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.csv");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "{}", row(0.5, "1.0")).unwrap();
        writeln!(file, "{}", row(0.25, "0.9999")).unwrap();
        writeln!(file, "1,2,3").unwrap();
        writeln!(file, "{}", row(0.5, "abc")).unwrap();
        let mut bad_number = row(0.5, "2");
        bad_number.replace_range(0..3, "nan");
        writeln!(file, "{bad_number}").unwrap();
        drop(file);

        let mut seen = Vec::new();
        let tally = scan(&path, 5, |label, signal| {
            assert_eq!(signal.len(), SIGNAL_LEN);
            seen.push((label, signal[0]));
        })
        .unwrap();

        assert_eq!(seen, vec![(6, 0.5), (6, 0.25)]);
        assert_eq!(tally.rows_used, 2);
        assert_eq!(tally.rows_dropped(), 3);
        assert_eq!(tally.dropped.get("field_count"), Some(&1));
        assert_eq!(tally.dropped.get("label"), Some(&1));
        assert_eq!(tally.dropped.get("invalid_number"), Some(&1));
    }

    #[test]
    fn test_scan_drops_out_of_range_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.csv");
        let mut huge = row(0.5, "0");
        huge.replace_range(0..3, "1e200");
        let edge = row(MAX_ABS_SAMPLE, "1");
        fs::write(&path, format!("{huge}\n{edge}\n")).unwrap();

        let mut labels = Vec::new();
        let tally = scan(&path, 0, |label, signal| {
            assert!(signal.iter().all(|v| v.abs() <= MAX_ABS_SAMPLE));
            labels.push(label);
        })
        .unwrap();

        assert_eq!(labels, vec![1]);
        assert_eq!(tally.dropped.get("out_of_range"), Some(&1));
    }

    #[test]
    fn test_scan_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan(&dir.path().join("nope.csv"), 0, |_, _| {}).is_err());
    }
}
