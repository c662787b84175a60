//! Cache registry: status, invalidation and health over every managed artifact
//!
//! Each key moves through an explicit state machine:
//!
//! ```text
//! MISSING ──▶ REGENERATING ──▶ FRESH ──(source touched)──▶ STALE ──▶ REGENERATING ──▶ FRESH
//! ```
//!
//! Invalidation deletes the on-disk artifact and clears the memory slot of
//! *this* process only. Sibling processes keep their memory copies until
//! they are restarted or invalidated themselves; their next disk access
//! re-validates freshness from file timestamps, so no cross-process signal
//! is needed for correctness of freshly started readers.

use crate::freshness::{self, artifact_timestamp, Freshness, RawSource};
use crate::metrics::MetricsSink;
use crate::storage;
use crate::tabular::{DatasetKind, TabularLoader};
use crate::waveform::WaveformStore;
use crate::{CacheConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime};
use tracing::{info, warn};

/// Every managed artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKey {
    /// Equipment transfers table
    Transfers,
    /// Installations table
    Installations,
    /// Transcriptions table
    Transcriptions,
    /// Waveform bundle
    Waveforms,
}

impl CacheKey {
    /// Every key, tabular first
    pub const ALL: [Self; 4] = [
        Self::Transfers,
        Self::Installations,
        Self::Transcriptions,
        Self::Waveforms,
    ];

    /// Stable key name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Transfers => "transfers",
            Self::Installations => "installations",
            Self::Transcriptions => "transcriptions",
            Self::Waveforms => "waveforms",
        }
    }

    /// Tabular dataset behind this key, if any
    #[must_use]
    pub const fn dataset(self) -> Option<DatasetKind> {
        match self {
            Self::Transfers => Some(DatasetKind::Transfers),
            Self::Installations => Some(DatasetKind::Installations),
            Self::Transcriptions => Some(DatasetKind::Transcriptions),
            Self::Waveforms => None,
        }
    }
}

impl From<DatasetKind> for CacheKey {
    fn from(kind: DatasetKind) -> Self {
        match kind {
            DatasetKind::Transfers => Self::Transfers,
            DatasetKind::Installations => Self::Installations,
            DatasetKind::Transcriptions => Self::Transcriptions,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CacheKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidInput(format!("unknown cache key: {s}")))
    }
}

/// Lifecycle state of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    /// No artifact on disk
    Missing,
    /// A load or regeneration holds the key's guard
    Regenerating,
    /// Artifact is at least as new as every source
    Fresh,
    /// A source changed (or disappeared) after the artifact was generated
    Stale,
}

/// Point-in-time view of one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStatus {
    /// Cache key
    pub key: CacheKey,
    /// Artifact location
    pub path: PathBuf,
    /// Artifact file exists
    pub exists: bool,
    /// Artifact size (0 when missing)
    pub size_bytes: u64,
    /// Time since generation
    pub age: Option<Duration>,
    /// Held in this process's memory layer
    pub in_memory: bool,
    /// Lifecycle state
    pub state: CacheState,
}

/// What to invalidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationTarget {
    /// One key
    Key(CacheKey),
    /// Every key
    All,
}

impl InvalidationTarget {
    fn keys(self) -> Vec<CacheKey> {
        match self {
            Self::Key(key) => vec![key],
            Self::All => CacheKey::ALL.to_vec(),
        }
    }
}

impl FromStr for InvalidationTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Key)
        }
    }
}

/// Overall health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Raw sources reachable
    Healthy,
    /// Raw-source root is absent; only cached artifacts can be served
    Degraded,
}

/// Read-only health view for an external monitoring surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Healthy unless the raw-source root is missing
    pub status: HealthStatus,
    /// Seconds since the manager was constructed
    pub uptime_seconds: f64,
    /// Raw-source root exists
    pub data_available: bool,
    /// Cache root exists
    pub cache_directory: bool,
    /// Per-artifact status
    pub artifacts: Vec<ArtifactStatus>,
    /// Every artifact exists on disk
    pub all_caches_warm: bool,
}

fn state_of(in_flight: bool, sources: &[RawSource], generated: Option<SystemTime>) -> CacheState {
    if in_flight {
        return CacheState::Regenerating;
    }
    if generated.is_some() && sources.is_empty() {
        return CacheState::Stale;
    }
    match freshness::check(sources, generated) {
        Freshness::Fresh => CacheState::Fresh,
        Freshness::Stale => CacheState::Stale,
        Freshness::Missing => CacheState::Missing,
    }
}

/// Status, invalidation and health over the manager's artifacts
#[derive(Debug)]
pub struct CacheRegistry<'a> {
    config: &'a CacheConfig,
    metrics: &'a MetricsSink,
    tabular: &'a TabularLoader,
    waveforms: &'a WaveformStore,
    started: Instant,
}

impl<'a> CacheRegistry<'a> {
    pub(crate) const fn new(
        config: &'a CacheConfig,
        metrics: &'a MetricsSink,
        tabular: &'a TabularLoader,
        waveforms: &'a WaveformStore,
        started: Instant,
    ) -> Self {
        Self {
            config,
            metrics,
            tabular,
            waveforms,
            started,
        }
    }

    /// Artifact path for a key
    #[must_use]
    pub fn artifact_path(&self, key: CacheKey) -> PathBuf {
        match key.dataset() {
            Some(kind) => self.tabular.artifact_path(kind),
            None => self.waveforms.artifact_path(),
        }
    }

    /// Status of one key. Filesystem errors are logged and reported as missing sources.
    #[must_use]
    pub fn status(&self, key: CacheKey) -> ArtifactStatus {
        let path = self.artifact_path(key);
        let meta = fs::metadata(&path).ok().filter(fs::Metadata::is_file);
        let generated = meta.as_ref().and_then(|m| m.modified().ok());

        let sources = match key.dataset() {
            Some(kind) => RawSource::stat(kind.raw_path(self.config)).map(|s| s.into_iter().collect()),
            None => self.waveforms.present_sources(),
        }
        .unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "failed to stat raw sources");
            Vec::new()
        });

        let (in_memory, in_flight) = match key.dataset() {
            Some(kind) => (self.tabular.is_in_memory(kind), self.tabular.is_in_flight(kind)),
            None => (self.waveforms.is_in_memory(), self.waveforms.is_in_flight()),
        };

        ArtifactStatus {
            key,
            exists: meta.is_some(),
            size_bytes: meta.as_ref().map_or(0, fs::Metadata::len),
            age: generated.map(|t| SystemTime::now().duration_since(t).unwrap_or_default()),
            in_memory,
            state: state_of(in_flight, &sources, generated),
            path,
        }
    }

    /// Status of every key
    #[must_use]
    pub fn statuses(&self) -> Vec<ArtifactStatus> {
        CacheKey::ALL.into_iter().map(|k| self.status(k)).collect()
    }

    /// Delete on-disk artifacts and clear this process's memory slots
    ///
    /// Each key's guard is held while it is cleared, so an in-flight
    /// regeneration finishes first. Returns the keys that were processed.
    ///
    /// # Errors
    ///
    /// Returns error if an artifact exists but cannot be deleted
    pub fn invalidate(&self, target: InvalidationTarget) -> Result<Vec<CacheKey>> {
        let keys = target.keys();
        for &key in &keys {
            let path = self.artifact_path(key);
            let (removed, evicted) = match key.dataset() {
                Some(kind) => self.tabular.exclusive(kind, || {
                    let removed = storage::remove_artifact(&path)?;
                    Ok::<_, Error>((removed, self.tabular.evict(kind)))
                })?,
                None => self.waveforms.exclusive(|| {
                    let removed = storage::remove_artifact(&path)?;
                    Ok::<_, Error>((removed, self.waveforms.evict()))
                })?,
            };
            self.metrics.increment("invalidations", &[("dataset", key.name())]);
            info!(key = %key, removed, evicted, "invalidated");
        }
        Ok(keys)
    }

    /// Health summary
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let artifacts = self.statuses();
        let data_available = self.config.raw_root().is_dir();
        HealthReport {
            status: if data_available {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            uptime_seconds: self.started.elapsed().as_secs_f64(),
            data_available,
            cache_directory: self.config.cache_root().is_dir(),
            all_caches_warm: artifacts.iter().all(|a| a.exists),
            artifacts,
        }
    }
}
