//! Memory → JSON bundle → precompute accessor for the waveform bundle

use super::bundle::WaveformBundle;
use super::engine::WaveformEngine;
use super::source::ResolvedSource;
use super::BUNDLE_FILE_NAME;
use crate::freshness::{self, artifact_timestamp, generation_stamp, RawSource};
use crate::metrics::MetricsSink;
use crate::storage;
use crate::{CacheConfig, Error, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DATASET: [(&str, &str); 1] = [("dataset", "waveforms")];

/// Cached access to the precomputed [`WaveformBundle`]
#[derive(Debug)]
pub struct WaveformStore {
    config: Arc<CacheConfig>,
    metrics: Arc<MetricsSink>,
    engine: WaveformEngine,
    slot: RwLock<Option<Arc<WaveformBundle>>>,
    flight: Mutex<()>,
}

impl WaveformStore {
    /// Create a store with an empty memory slot
    #[must_use]
    pub fn new(config: Arc<CacheConfig>, metrics: Arc<MetricsSink>) -> Self {
        Self {
            engine: WaveformEngine::new(Arc::clone(&config)),
            config,
            metrics,
            slot: RwLock::new(None),
            flight: Mutex::new(()),
        }
    }

    /// Bundle file location
    #[must_use]
    pub fn artifact_path(&self) -> PathBuf {
        self.config.cache_root().join(BUNDLE_FILE_NAME)
    }

    /// The underlying engine
    #[must_use]
    pub const fn engine(&self) -> &WaveformEngine {
        &self.engine
    }

    /// Return the bundle, regenerating it if missing, stale or corrupt
    ///
    /// At most one precomputation runs at a time per store; concurrent callers
    /// wait for it and share its result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TotalPrecomputeFailure`] if no waveform source is
    /// usable, or IO errors while reading source metadata
    pub fn bundle(&self) -> Result<Arc<WaveformBundle>> {
        if let Some(hit) = self.memory_hit() {
            return Ok(hit);
        }

        let _guard = self.flight.lock();
        if let Some(hit) = self.memory_hit() {
            return Ok(hit);
        }

        let resolved = self.engine.resolve()?;
        let raws: Vec<RawSource> = resolved.iter().filter_map(|s| s.raw.clone()).collect();
        if raws.is_empty() {
            self.metrics.increment("precompute_failures", &DATASET);
            return Err(Error::TotalPrecomputeFailure(format!(
                "no waveform source present under {}",
                self.config.waveform_dir().display()
            )));
        }

        let path = self.artifact_path();
        let state = freshness::check(&raws, artifact_timestamp(&path)?);
        debug!(?state, "waveform bundle freshness");
        if state.is_fresh() {
            let _timer = self
                .metrics
                .timer("cache_load_seconds", &[("dataset", "waveforms"), ("layer", "disk")]);
            match Self::read_bundle(&path) {
                Ok(bundle) => {
                    let current: BTreeSet<PathBuf> = raws.iter().map(|r| r.path().to_path_buf()).collect();
                    let same_inputs = bundle.metadata.input_files() == current;
                    let same_config = bundle.matches_config(&self.config);
                    if freshness::demote_corrupt(state, same_inputs && same_config).is_fresh() {
                        self.metrics.increment("bundle_disk_hits", &DATASET);
                        info!(classes = bundle.classes.len(), "loaded waveform bundle");
                        return Ok(self.populate(bundle));
                    }
                    info!(same_inputs, same_config, "waveform bundle out of date, regenerating");
                }
                Err(e) => {
                    warn!(error = %e, "waveform bundle unreadable, regenerating");
                    self.metrics.increment("corrupt_artifacts", &DATASET);
                }
            }
        }

        self.regenerate(&resolved, &raws, &path)
    }

    /// Drop the memory slot (this process only)
    pub fn evict(&self) -> bool {
        self.slot.write().take().is_some()
    }

    /// True if the bundle is in this process's memory layer
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.slot.read().is_some()
    }

    /// True while a load or precomputation holds the guard
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.flight.is_locked()
    }

    /// Run `f` while holding the regeneration guard
    pub(crate) fn exclusive<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.flight.lock();
        f()
    }

    /// Source files currently present (after sample fallback)
    pub(crate) fn present_sources(&self) -> Result<Vec<RawSource>> {
        Ok(self
            .engine
            .resolve()?
            .into_iter()
            .filter_map(|s| s.raw)
            .collect())
    }

    fn memory_hit(&self) -> Option<Arc<WaveformBundle>> {
        let hit = self.slot.read().as_ref().map(Arc::clone)?;
        self.metrics.increment("bundle_hits", &DATASET);
        Some(hit)
    }

    fn populate(&self, bundle: WaveformBundle) -> Arc<WaveformBundle> {
        let bundle = Arc::new(bundle);
        *self.slot.write() = Some(Arc::clone(&bundle));
        bundle
    }

    fn read_bundle(path: &Path) -> Result<WaveformBundle> {
        let bytes = fs::read(path)?;
        WaveformBundle::from_json_slice(&bytes)
    }

    fn regenerate(&self, resolved: &[ResolvedSource], raws: &[RawSource], path: &Path) -> Result<Arc<WaveformBundle>> {
        self.metrics.increment("regenerations_started", &DATASET);
        let _timer = self.metrics.timer("precompute_seconds", &DATASET);

        let stamp = generation_stamp(raws);
        let bundle = match self.engine.precompute_from(resolved, stamp) {
            Ok(bundle) => bundle,
            Err(e) => {
                self.metrics.increment("precompute_failures", &DATASET);
                return Err(e);
            }
        };
        if bundle.metadata.is_partial() {
            self.metrics.increment("precompute_partial_failures", &DATASET);
        }
        let dropped: u64 = bundle.metadata.sources_used.iter().map(|s| s.rows_dropped).sum();
        if dropped > 0 {
            self.metrics.add("rows_dropped", &DATASET, dropped);
        }

        match storage::write_json_atomic(path, &bundle, stamp) {
            Ok(size) => info!(path = %path.display(), size_bytes = size, "waveform bundle written"),
            Err(e) => {
                warn!(error = %e, "failed to persist waveform bundle");
                self.metrics.increment("persist_failures", &DATASET);
            }
        }

        self.metrics.increment("bundle_misses", &DATASET);
        Ok(self.populate(bundle))
    }
}
