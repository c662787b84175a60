//! Error types for precache
//!
//! Two tiers:
//! - [`Error`]: fatal for the call that produced it, surfaced to the caller
//! - [`RowError`]: one malformed input row, recovered locally (row dropped, counter bumped)

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// precache error types
#[derive(Error, Debug)]
pub enum Error {
    /// A required raw tabular source is missing (never cached as an empty result)
    #[error("Source unavailable for {dataset}: {}", path.display())]
    SourceUnavailable {
        /// Logical dataset name
        dataset: String,
        /// Path that was checked
        path: PathBuf,
    },

    /// No waveform source could be read; no bundle was produced
    #[error("Waveform precomputation failed: {0}\nNo bundle written; cache key remains missing")]
    TotalPrecomputeFailure(String),

    /// A derived artifact exists but failed structural validation
    #[error("Corrupt artifact {key}: {reason}")]
    CorruptArtifact {
        /// Cache key of the artifact
        key: String,
        /// What failed validation
        reason: String,
    },

    /// Raw source header lacks required columns
    #[error("Schema mismatch in {dataset}: missing columns {missing:?}")]
    SchemaMismatch {
        /// Logical dataset name
        dataset: String,
        /// Required columns not found in the header
        missing: Vec<String>,
    },

    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage error (atomic write, Parquet framing)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Delimited-text reader error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the error means "artifact unusable, regenerate it" rather than a hard failure.
    #[must_use]
    pub const fn is_corrupt_artifact(&self) -> bool {
        matches!(
            self,
            Self::CorruptArtifact { .. } | Self::Parquet(_) | Self::Json(_) | Self::Arrow(_)
        )
    }
}

/// A single malformed row. Dropped by the parser and counted, never returned to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    /// Record has a different number of fields than the header / fixed width
    #[error("expected {expected} fields, found {found}")]
    WrongFieldCount {
        /// Expected field count
        expected: usize,
        /// Actual field count
        found: usize,
    },

    /// Record is not valid UTF-8 or is otherwise unreadable
    #[error("unreadable record: {0}")]
    Unreadable(String),

    /// A numeric field could not be parsed
    #[error("invalid number in column {column}: {value:?}")]
    InvalidNumber {
        /// Zero-based column index
        column: usize,
        /// Offending text
        value: String,
    },

    /// A numeric field parsed but lies outside the accepted magnitude
    #[error("value out of range in column {column}: {value}")]
    OutOfRange {
        /// Zero-based column index
        column: usize,
        /// Offending text
        value: String,
    },

    /// Geo Point missing or not "lat, lon"
    #[error("missing or invalid coordinates")]
    MissingCoordinates,

    /// Waveform label is not a finite integer-like value
    #[error("invalid class label {0:?}")]
    InvalidLabel(String),
}

impl RowError {
    /// Short stable name used as a metrics label
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::WrongFieldCount { .. } => "field_count",
            Self::Unreadable(_) => "unreadable",
            Self::InvalidNumber { .. } => "invalid_number",
            Self::OutOfRange { .. } => "out_of_range",
            Self::MissingCoordinates => "coordinates",
            Self::InvalidLabel(_) => "label",
        }
    }
}
