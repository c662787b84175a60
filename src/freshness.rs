//! Freshness validation across the raw-source / derived-artifact boundary
//!
//! [`check`] is a pure decision function: it never touches the filesystem.
//! The filesystem helpers ([`RawSource::stat`], [`artifact_timestamp`]) are kept
//! separate so the decision can be tested with synthetic timestamps.

use crate::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Freshness of a derived artifact relative to its sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Artifact exists and is at least as new as every source
    Fresh,
    /// A source changed after the artifact was generated, or the artifact is corrupt
    Stale,
    /// Artifact does not exist
    Missing,
}

impl Freshness {
    /// True only for [`Freshness::Fresh`]
    #[must_use]
    pub const fn is_fresh(self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// A raw on-disk input, as seen when it was stat-ed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSource {
    path: PathBuf,
    modified: SystemTime,
    size_bytes: u64,
}

impl RawSource {
    /// Build from known values (tests, synthetic sources)
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, modified: SystemTime, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            modified,
            size_bytes,
        }
    }

    /// Stat a raw source. `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns error for IO failures other than "not found"
    pub fn stat(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(Some(Self {
                path: path.to_path_buf(),
                modified: meta.modified()?,
                size_bytes: meta.len(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Source path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last modification time
    #[must_use]
    pub const fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Size in bytes when stat-ed
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Decide whether an artifact generated at `artifact` is usable for `sources`.
///
/// - `None` → [`Freshness::Missing`]
/// - any source modified strictly after the artifact → [`Freshness::Stale`]
/// - otherwise → [`Freshness::Fresh`]
#[must_use]
pub fn check(sources: &[RawSource], artifact: Option<SystemTime>) -> Freshness {
    let Some(generated) = artifact else {
        return Freshness::Missing;
    };
    if sources.iter().any(|s| s.modified > generated) {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

/// Apply the structural half of the freshness rule: a fresh-by-timestamp
/// artifact that failed to deserialize or validate is stale.
#[must_use]
pub const fn demote_corrupt(freshness: Freshness, structurally_valid: bool) -> Freshness {
    match freshness {
        Freshness::Fresh if !structurally_valid => Freshness::Stale,
        other => other,
    }
}

/// Generation timestamp of an artifact file. `Ok(None)` when it does not exist.
///
/// # Errors
///
/// Returns error for IO failures other than "not found"
pub fn artifact_timestamp(path: impl AsRef<Path>) -> Result<Option<SystemTime>> {
    match fs::metadata(path.as_ref()) {
        Ok(meta) => Ok(Some(meta.modified()?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Timestamp to stamp onto a freshly generated artifact: never older than its newest source.
#[must_use]
pub fn generation_stamp(sources: &[RawSource]) -> SystemTime {
    let now = SystemTime::now();
    sources
        .iter()
        .map(RawSource::modified)
        .fold(now, std::cmp::max)
}
