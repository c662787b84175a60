//! Shared delimited-text reading for the tabular datasets
//!
//! Handles the parts every dataset has in common: optional UTF-8 BOM,
//! header lookup by name, required-column validation, and dropping
//! malformed records with a per-reason tally.

use super::DatasetKind;
use crate::error::RowError;
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use csv::StringRecord;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Column name → position in the header
#[derive(Debug, Default)]
pub(crate) struct HeaderIndex {
    positions: FxHashMap<String, usize>,
    width: usize,
}

impl HeaderIndex {
    pub(crate) fn new(header: &StringRecord) -> Self {
        let positions = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        Self {
            positions,
            width: header.len(),
        }
    }

    pub(crate) fn contains(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }

    pub(crate) const fn width(&self) -> usize {
        self.width
    }
}

/// One well-formed record, addressed by column name
pub(crate) struct Row<'a> {
    record: &'a StringRecord,
    header: &'a HeaderIndex,
}

impl<'a> Row<'a> {
    /// Raw field, `None` when the column is absent from the header
    pub(crate) fn raw(&self, column: &str) -> Option<&'a str> {
        self.header
            .positions
            .get(column)
            .and_then(|&i| self.record.get(i))
    }

    /// Trimmed field, `None` when absent or blank
    pub(crate) fn text(&self, column: &str) -> Option<&'a str> {
        self.raw(column).map(str::trim).filter(|s| !s.is_empty())
    }

    /// Trimmed field with a fallback for absent or blank values
    pub(crate) fn text_or(&self, column: &str, fallback: &'a str) -> &'a str {
        self.text(column).unwrap_or(fallback)
    }
}

/// Per-dataset row sink producing one record batch
pub(crate) trait RowAccumulator {
    /// Columns that must be present in the header
    const REQUIRED: &'static [&'static str];

    /// Consume one row; an error drops the row
    fn push(&mut self, row: &Row<'_>) -> std::result::Result<(), RowError>;

    /// Rows kept but flagged (e.g. unparseable embedded geometry)
    fn flagged_rows(&self) -> u64 {
        0
    }

    /// Build the typed batch
    fn finish(self) -> Result<RecordBatch>;
}

/// Result of parsing one raw source
#[derive(Debug)]
pub(crate) struct ParseOutcome {
    pub(crate) batch: RecordBatch,
    pub(crate) dropped: BTreeMap<&'static str, u64>,
    pub(crate) flagged: u64,
}

impl ParseOutcome {
    pub(crate) fn dropped_total(&self) -> u64 {
        self.dropped.values().sum()
    }
}

fn skip_bom<R: BufRead>(reader: &mut R) -> std::io::Result<()> {
    if reader.fill_buf()?.starts_with(UTF8_BOM) {
        reader.consume(UTF8_BOM.len());
    }
    Ok(())
}

/// Parse a delimited source through `acc`
pub(crate) fn parse_source<A: RowAccumulator>(
    path: &Path,
    delimiter: u8,
    dataset: DatasetKind,
    mut acc: A,
) -> Result<ParseOutcome> {
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::SourceUnavailable {
            dataset: dataset.name().to_string(),
            path: path.to_path_buf(),
        },
        _ => Error::Io(e),
    })?;
    let mut buffered = BufReader::new(file);
    skip_bom(&mut buffered)?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(buffered);
    let header = HeaderIndex::new(reader.headers()?);

    let missing: Vec<String> = A::REQUIRED
        .iter()
        .filter(|c| !header.contains(c))
        .map(|c| (*c).to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::SchemaMismatch {
            dataset: dataset.name().to_string(),
            missing,
        });
    }

    let mut dropped: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut record = StringRecord::new();
    loop {
        let row_error = match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) if record.len() != header.width() => Some(RowError::WrongFieldCount {
                expected: header.width(),
                found: record.len(),
            }),
            Ok(true) => acc
                .push(&Row {
                    record: &record,
                    header: &header,
                })
                .err(),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => Some(RowError::Unreadable(e.to_string())),
        };
        if let Some(err) = row_error {
            tracing::debug!(dataset = %dataset, error = %err, "dropping malformed row");
            *dropped.entry(err.reason()).or_insert(0) += 1;
        }
    }

    let flagged = acc.flagged_rows();
    Ok(ParseOutcome {
        batch: acc.finish()?,
        dropped,
        flagged,
    })
}

/// Lenient float: blank or non-numeric → 0
pub(crate) fn coerce_f64(value: Option<&str>) -> f64 {
    value
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Lenient integer: accepts "3" and "3.0"; blank or non-numeric → 0
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn coerce_i64(value: Option<&str>) -> i64 {
    let Some(s) = value.map(str::trim) else {
        return 0;
    };
    s.parse::<i64>()
        .ok()
        .or_else(|| {
            s.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| v.trunc() as i64)
        })
        .unwrap_or(0)
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Parse a date in any of the formats seen in the raw exports
pub(crate) fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok().map(|dt| dt.date()))
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(value, f).ok())
        })
}

/// Days since the Unix epoch (Arrow `Date32`)
pub(crate) fn date32(date: NaiveDate) -> Option<i32> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    i32::try_from(date.signed_duration_since(epoch).num_days()).ok()
}

/// Calendar year of a date
pub(crate) fn year(date: NaiveDate) -> i32 {
    date.year()
}
