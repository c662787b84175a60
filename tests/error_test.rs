//! Tests for error types

use precache::error::RowError;
use precache::Error;
use std::path::PathBuf;

#[test]
fn test_source_unavailable_error() {
    let error = Error::SourceUnavailable {
        dataset: "transfers".to_string(),
        path: PathBuf::from("/data/dod_all_states.csv"),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Source unavailable for transfers"));
    assert!(error_str.contains("dod_all_states.csv"));
}

#[test]
fn test_total_precompute_failure_error() {
    let error = Error::TotalPrecomputeFailure("no sources".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Waveform precomputation failed"));
    assert!(error_str.contains("cache key remains missing"));
}

#[test]
fn test_corrupt_artifact_error() {
    let error = Error::CorruptArtifact {
        key: "waveforms".to_string(),
        reason: "schema_version 9".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Corrupt artifact waveforms"));
    assert!(error_str.contains("schema_version 9"));
    assert!(error.is_corrupt_artifact());
}

#[test]
fn test_schema_mismatch_error() {
    let error = Error::SchemaMismatch {
        dataset: "installations".to_string(),
        missing: vec!["Geo Point".to_string()],
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Schema mismatch in installations"));
    assert!(error_str.contains("Geo Point"));
    assert!(!error.is_corrupt_artifact());
}

#[test]
fn test_storage_error() {
    let error = Error::StorageError("rename failed".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Storage error"));
    assert!(error_str.contains("rename failed"));
}

#[test]
fn test_invalid_input_error() {
    let error: Error = "bases".parse::<precache::CacheKey>().unwrap_err();
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid input"));
    assert!(error_str.contains("bases"));
}

#[test]
fn test_invalid_config_error() {
    let error = precache::CacheConfig::builder("raw", "cache")
        .samples_per_class(0)
        .build()
        .unwrap_err();
    assert!(format!("{error}").contains("Invalid configuration"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
}

#[test]
fn test_json_error_is_corrupt() {
    let json_error = serde_json::from_str::<u32>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
    assert!(error.is_corrupt_artifact());
}

#[test]
fn test_other_error() {
    let error = Error::Other("custom error message".to_string());
    let error_str = format!("{error}");
    assert_eq!(error_str, "custom error message");
}

#[test]
fn test_error_debug() {
    let error = Error::TotalPrecomputeFailure(String::new());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("TotalPrecomputeFailure"));
}

#[test]
fn test_row_error_reasons() {
    let cases = [
        (RowError::WrongFieldCount { expected: 188, found: 3 }, "field_count"),
        (RowError::Unreadable("bad utf-8".to_string()), "unreadable"),
        (
            RowError::InvalidNumber {
                column: 4,
                value: "x".to_string(),
            },
            "invalid_number",
        ),
        (
            RowError::OutOfRange {
                column: 50,
                value: "1e200".to_string(),
            },
            "out_of_range",
        ),
        (RowError::MissingCoordinates, "coordinates"),
        (RowError::InvalidLabel("nan".to_string()), "label"),
    ];
    for (error, reason) in cases {
        assert_eq!(error.reason(), reason);
    }
    let error_str = format!("{}", RowError::WrongFieldCount { expected: 188, found: 3 });
    assert_eq!(error_str, "expected 188 fields, found 3");
}

#[test]
fn test_result_type_alias() {
    #[allow(clippy::unnecessary_wraps)]
    fn returns_result() -> precache::Result<i32> {
        Ok(42)
    }

    let result = returns_result();
    assert!(result.is_ok());
    assert_eq!(result.unwrap(), 42);
}
