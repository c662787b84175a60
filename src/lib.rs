//! # precache: Multi-Layer Cache Manager and Waveform Precomputation
//!
//! **Version**: 0.1.0
//!
//! precache sits between large raw data exports and an interactive
//! analytics surface. It turns slow raw sources into fast derived artifacts
//! and keeps them correct as the sources change.
//!
//! ## Layers
//!
//! - **Memory**: one slot per artifact, per process
//! - **Disk**: one Parquet file per tabular dataset, one JSON bundle for waveforms
//! - **Raw**: the original delimited exports, parsed only when the disk layer is
//!   missing, stale or corrupt
//!
//! ## Design Principles
//!
//! - **Freshness from timestamps**: an artifact is fresh iff it is at least as
//!   new as every source it was built from ([`freshness`])
//! - **Single-flight**: at most one regeneration per key per process ([`singleflight`])
//! - **Atomic replacement**: artifacts are written whole and renamed into place ([`storage`])
//! - **Determinism**: the waveform reduction depends only on file contents,
//!   the seed and the configuration ([`waveform`])
//! - **No ambient state**: configuration and metrics are explicit objects
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use precache::{CacheConfig, CacheManager, DatasetKind};
//!
//! let config = CacheConfig::builder("datasets", "cache").seed(42).build()?;
//! let manager = CacheManager::new(config);
//!
//! let transfers = manager.load(DatasetKind::Transfers)?;
//! println!("{} transfer rows", transfers.row_count());
//!
//! let bundle = manager.bundle()?;
//! for (class, summary) in &bundle.classes {
//!     println!("class {class}: {} samples of {}", summary.samples.len(), summary.population);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod freshness;
pub mod metrics;
pub mod registry;
pub mod singleflight;
pub mod storage;
pub mod tabular;
pub mod waveform;

pub use config::{CacheConfig, CacheConfigBuilder, SourceLayout, WaveformSourceSpec};
pub use error::{Error, Result};
pub use freshness::Freshness;
pub use metrics::{MetricsSink, MetricsSnapshot};
pub use registry::{
    ArtifactStatus, CacheKey, CacheRegistry, CacheState, HealthReport, HealthStatus, InvalidationTarget,
};
pub use tabular::{DatasetKind, TabularArtifact, TabularLoader};
pub use waveform::{WaveformBundle, WaveformClassBundle, WaveformEngine, WaveformStore};

use std::sync::Arc;
use std::time::Instant;

/// Read-only data access consumed by presentation code
pub trait DataAccess: Send + Sync {
    /// A tabular dataset, loaded through the cache layers
    ///
    /// # Errors
    ///
    /// Returns error if the dataset's raw source is unavailable or malformed
    fn tabular(&self, kind: DatasetKind) -> Result<Arc<TabularArtifact>>;

    /// The precomputed waveform bundle
    ///
    /// # Errors
    ///
    /// Returns error if no waveform source can be read
    fn waveform_bundle(&self) -> Result<Arc<WaveformBundle>>;
}

/// Owner of every cache layer
///
/// Construction starts with empty memory slots; dropping the manager drops them.
/// Share it by `Arc` across request handlers.
#[derive(Debug)]
pub struct CacheManager {
    config: Arc<CacheConfig>,
    metrics: Arc<MetricsSink>,
    tabular: TabularLoader,
    waveforms: WaveformStore,
    started: Instant,
}

impl CacheManager {
    /// Create a manager with its own metrics sink
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_metrics(config, Arc::new(MetricsSink::new()))
    }

    /// Create a manager recording into an existing metrics sink
    #[must_use]
    pub fn with_metrics(config: CacheConfig, metrics: Arc<MetricsSink>) -> Self {
        let config = Arc::new(config);
        Self {
            tabular: TabularLoader::new(Arc::clone(&config), Arc::clone(&metrics)),
            waveforms: WaveformStore::new(Arc::clone(&config), Arc::clone(&metrics)),
            config,
            metrics,
            started: Instant::now(),
        }
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Shared metrics sink
    #[must_use]
    pub const fn metrics(&self) -> &Arc<MetricsSink> {
        &self.metrics
    }

    /// Immutable copy of every metric
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Tabular loader
    #[must_use]
    pub const fn tabular_loader(&self) -> &TabularLoader {
        &self.tabular
    }

    /// Waveform store
    #[must_use]
    pub const fn waveform_store(&self) -> &WaveformStore {
        &self.waveforms
    }

    /// Load a tabular dataset (memory → Parquet → raw)
    ///
    /// # Errors
    ///
    /// See [`TabularLoader::load`]
    pub fn load(&self, kind: DatasetKind) -> Result<Arc<TabularArtifact>> {
        self.tabular.load(kind)
    }

    /// Load the waveform bundle (memory → JSON → precompute)
    ///
    /// # Errors
    ///
    /// See [`WaveformStore::bundle`]
    pub fn bundle(&self) -> Result<Arc<WaveformBundle>> {
        self.waveforms.bundle()
    }

    /// Bring one key into memory
    ///
    /// # Errors
    ///
    /// Returns the underlying load error
    pub fn warm(&self, key: CacheKey) -> Result<()> {
        match key.dataset() {
            Some(kind) => self.load(kind).map(drop),
            None => self.bundle().map(drop),
        }
    }

    /// Status, invalidation and health view
    #[must_use]
    pub fn registry(&self) -> CacheRegistry<'_> {
        CacheRegistry::new(
            &self.config,
            &self.metrics,
            &self.tabular,
            &self.waveforms,
            self.started,
        )
    }

    /// Status of one key
    #[must_use]
    pub fn status(&self, key: CacheKey) -> ArtifactStatus {
        self.registry().status(key)
    }

    /// Invalidate one key or all keys (this process's memory plus disk)
    ///
    /// # Errors
    ///
    /// Returns error if an artifact cannot be deleted
    pub fn invalidate(&self, target: InvalidationTarget) -> Result<Vec<CacheKey>> {
        self.registry().invalidate(target)
    }

    /// Health summary
    #[must_use]
    pub fn health(&self) -> HealthReport {
        self.registry().health()
    }
}

impl DataAccess for CacheManager {
    fn tabular(&self, kind: DatasetKind) -> Result<Arc<TabularArtifact>> {
        self.load(kind)
    }

    fn waveform_bundle(&self) -> Result<Arc<WaveformBundle>> {
        self.bundle()
    }
}

#[cfg(feature = "tokio")]
fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Other(format!("blocking task failed: {e}"))
}

/// Async facade
///
/// Regeneration blocks for as long as it takes and has no cancellation point,
/// so each call runs on tokio's blocking pool. Callers that need a deadline
/// wrap the future in `tokio::time::timeout`; the work itself still runs to
/// completion and populates the cache.
#[cfg(feature = "tokio")]
impl CacheManager {
    /// [`CacheManager::load`] on the blocking pool
    ///
    /// # Errors
    ///
    /// Returns the load error, or [`Error::Other`] if the task panicked
    pub async fn load_async(self: Arc<Self>, kind: DatasetKind) -> Result<Arc<TabularArtifact>> {
        tokio::task::spawn_blocking(move || self.load(kind))
            .await
            .map_err(join_error)?
    }

    /// [`CacheManager::bundle`] on the blocking pool
    ///
    /// # Errors
    ///
    /// Returns the precompute error, or [`Error::Other`] if the task panicked
    pub async fn bundle_async(self: Arc<Self>) -> Result<Arc<WaveformBundle>> {
        tokio::task::spawn_blocking(move || self.bundle())
            .await
            .map_err(join_error)?
    }

    /// Warm every key concurrently; one result per key, in [`CacheKey::ALL`] order
    pub async fn warm_all(self: Arc<Self>) -> Vec<(CacheKey, Result<()>)> {
        let handles: Vec<_> = CacheKey::ALL
            .into_iter()
            .map(|key| {
                let manager = Arc::clone(&self);
                (key, tokio::task::spawn_blocking(move || manager.warm(key)))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (key, handle) in handles {
            results.push((key, handle.await.map_err(join_error).and_then(|r| r)));
        }
        results
    }
}
