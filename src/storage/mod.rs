//! Derived-artifact storage (Arrow/Parquet columnar files, JSON bundles)
//!
//! **Write-once, replace-by-rename**:
//! - Every artifact is written to a temp file in the destination directory,
//!   flushed to disk, stamped with its generation time, then renamed into place
//! - Readers in this or any other process see either the old file or the new
//!   one, never a truncated file
//! - Nothing is patched in place; regeneration always produces a whole file
//!
//! The file modification time *is* the generation timestamp used by
//! [`crate::freshness`].

use crate::{Error, Result};
use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temp path next to `target`: `.<name>.tmp-<pid>-<n>`
fn temp_path_for(target: &Path) -> Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::StorageError(format!("Invalid artifact path: {}", target.display())))?;
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    Ok(target.with_file_name(format!(".{name}.tmp-{}-{n}", std::process::id())))
}

/// Write an artifact atomically and return its size in bytes.
///
/// `write` receives a buffered handle to the temp file. On any failure the
/// temp file is removed and `target` is left untouched.
///
/// # Errors
///
/// Returns error if the directory cannot be created, `write` fails, or the
/// rename fails
pub fn write_atomic<F>(target: &Path, generated_at: SystemTime, write: F) -> Result<u64>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp = temp_path_for(target)?;

    let result = (|| -> Result<u64> {
        let file = File::create(&temp)?;
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::StorageError(format!("Failed to flush artifact: {e}")))?;
        file.sync_all()?;
        file.set_modified(generated_at)?;
        let size = file.metadata()?.len();
        drop(file);
        fs::rename(&temp, target)?;
        Ok(size)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Persist a record batch as a Parquet file (atomic)
///
/// # Errors
///
/// Returns error if encoding or the atomic write fails
pub fn write_parquet_atomic(target: &Path, batch: &RecordBatch, generated_at: SystemTime) -> Result<u64> {
    use parquet::arrow::ArrowWriter;

    write_atomic(target, generated_at, |out| {
        let mut writer = ArrowWriter::try_new(out, batch.schema(), None)?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    })
}

/// Persist a serializable value as JSON (atomic)
///
/// # Errors
///
/// Returns error if serialization or the atomic write fails
pub fn write_json_atomic<T: serde::Serialize>(
    target: &Path,
    value: &T,
    generated_at: SystemTime,
) -> Result<u64> {
    write_atomic(target, generated_at, |out| {
        serde_json::to_writer(out, value)?;
        Ok(())
    })
}

/// Load a Parquet artifact into a single record batch
///
/// # Errors
/// Returns error if file cannot be read or parsed
pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<RecordBatch> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let file = File::open(path.as_ref())
        .map_err(|e| Error::StorageError(format!("Failed to open Parquet file: {e}")))?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema: SchemaRef = Arc::clone(builder.schema());
    let reader = builder.build()?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }

    Ok(concat_batches(&schema, &batches)?)
}

/// Remove an artifact. Returns `true` if a file was deleted.
///
/// # Errors
///
/// Returns error for IO failures other than "not found"
pub fn remove_artifact(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
