//! Tabular cache loader
//!
//! Three layers per dataset, checked in order:
//!
//! ```text
//! memory slot (process-local)  ──miss──▶  Parquet artifact (FRESH?)  ──miss/stale──▶  raw parse
//!        ▲                                        │                                       │
//!        └────────────── populate ◀───────────────┴──────── atomic write + populate ◀─────┘
//! ```
//!
//! A raw source that does not exist is a hard [`Error::SourceUnavailable`];
//! it is never cached as an empty table.

pub mod geometry;
mod installations;
mod reader;
mod transcriptions;
mod transfers;

pub use transfers::category_for_nsn;

use crate::freshness::{self, artifact_timestamp, generation_stamp, RawSource};
use crate::metrics::MetricsSink;
use crate::singleflight::SingleFlight;
use crate::storage;
use crate::{CacheConfig, Error, Result};
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reader::ParseOutcome;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// The three tabular datasets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatasetKind {
    /// Equipment transfer records
    Transfers,
    /// Installation records with embedded geometry
    Installations,
    /// Medical transcription records
    Transcriptions,
}

impl DatasetKind {
    /// Every dataset, in a fixed order
    pub const ALL: [Self; 3] = [Self::Transfers, Self::Installations, Self::Transcriptions];

    /// Logical dataset name (metrics label, cache file stem)
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Transfers => "transfers",
            Self::Installations => "installations",
            Self::Transcriptions => "transcriptions",
        }
    }

    /// Columnar artifact file name under the cache root
    #[must_use]
    pub const fn artifact_file_name(self) -> &'static str {
        match self {
            Self::Transfers => "transfers.parquet",
            Self::Installations => "installations.parquet",
            Self::Transcriptions => "transcriptions.parquet",
        }
    }

    /// Raw source path for this dataset
    #[must_use]
    pub fn raw_path(self, config: &CacheConfig) -> PathBuf {
        let layout = config.layout();
        let relative = match self {
            Self::Transfers => &layout.transfers,
            Self::Installations => &layout.installations,
            Self::Transcriptions => &layout.transcriptions,
        };
        config.raw_root().join(relative)
    }

    /// Declared output schema
    #[must_use]
    pub fn schema(self) -> SchemaRef {
        match self {
            Self::Transfers => transfers::schema(),
            Self::Installations => installations::schema(),
            Self::Transcriptions => transcriptions::schema(),
        }
    }

    fn parse(self, path: &Path) -> Result<ParseOutcome> {
        match self {
            Self::Transfers => reader::parse_source(
                path,
                b',',
                self,
                transfers::TransfersAccumulator::default(),
            ),
            Self::Installations => reader::parse_source(
                path,
                b';',
                self,
                installations::InstallationsAccumulator::default(),
            ),
            Self::Transcriptions => reader::parse_source(
                path,
                b',',
                self,
                transcriptions::TranscriptionsAccumulator::default(),
            ),
        }
    }

    /// Check a loaded batch against the declared schema (names and types)
    fn validate(self, batch: &RecordBatch) -> Result<()> {
        let expected = self.schema();
        let actual = batch.schema();
        let matches = expected.fields().len() == actual.fields().len()
            && expected
                .fields()
                .iter()
                .zip(actual.fields().iter())
                .all(|(e, a)| e.name() == a.name() && e.data_type().equals_datatype(a.data_type()));
        if matches {
            Ok(())
        } else {
            Err(Error::CorruptArtifact {
                key: self.name().to_string(),
                reason: format!("schema mismatch: found {actual:?}"),
            })
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A derived, schema-typed columnar dataset
#[derive(Debug, Clone)]
pub struct TabularArtifact {
    dataset: DatasetKind,
    batch: RecordBatch,
    generated_at: DateTime<Utc>,
    path: PathBuf,
}

impl TabularArtifact {
    /// Logical dataset
    #[must_use]
    pub const fn dataset(&self) -> DatasetKind {
        self.dataset
    }

    /// Column data
    #[must_use]
    pub const fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Number of rows
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.batch.num_rows()
    }

    /// Column names and types, in schema order
    #[must_use]
    pub fn column_types(&self) -> Vec<(String, DataType)> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| (f.name().clone(), f.data_type().clone()))
            .collect()
    }

    /// Generation timestamp (the artifact file's modification time)
    #[must_use]
    pub const fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    /// Backing storage path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Per-dataset memory → Parquet → raw loader
#[derive(Debug)]
pub struct TabularLoader {
    config: Arc<CacheConfig>,
    metrics: Arc<MetricsSink>,
    slots: DashMap<DatasetKind, Arc<TabularArtifact>>,
    flights: SingleFlight<DatasetKind>,
}

impl TabularLoader {
    /// Create a loader with empty memory slots
    #[must_use]
    pub fn new(config: Arc<CacheConfig>, metrics: Arc<MetricsSink>) -> Self {
        Self {
            config,
            metrics,
            slots: DashMap::new(),
            flights: SingleFlight::new(),
        }
    }

    /// Artifact path for a dataset
    #[must_use]
    pub fn artifact_path(&self, kind: DatasetKind) -> PathBuf {
        self.config.cache_root().join(kind.artifact_file_name())
    }

    /// Load a dataset through the cache layers
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] if the raw source is missing and
    /// the artifact is not in memory, [`Error::SchemaMismatch`] if the raw
    /// header lacks required columns, or IO/encoding errors
    pub fn load(&self, kind: DatasetKind) -> Result<Arc<TabularArtifact>> {
        let labels = [("dataset", kind.name())];
        if let Some(hit) = self.memory_hit(kind) {
            return Ok(hit);
        }

        let lock = self.flights.lock_for(&kind);
        let _guard = lock.lock();

        // a concurrent caller may have finished while we waited
        if let Some(hit) = self.memory_hit(kind) {
            return Ok(hit);
        }

        let raw_path = kind.raw_path(&self.config);
        let Some(source) = RawSource::stat(&raw_path)? else {
            self.metrics.increment("source_unavailable", &labels);
            return Err(Error::SourceUnavailable {
                dataset: kind.name().to_string(),
                path: raw_path,
            });
        };

        let artifact_path = self.artifact_path(kind);
        let state = freshness::check(std::slice::from_ref(&source), artifact_timestamp(&artifact_path)?);
        debug!(dataset = %kind, ?state, "columnar artifact freshness");

        if state.is_fresh() {
            let _timer = self
                .metrics
                .timer("cache_load_seconds", &[("dataset", kind.name()), ("layer", "disk")]);
            match Self::read_artifact(kind, &artifact_path) {
                Ok(artifact) => {
                    self.metrics.increment("cache_disk_hits", &labels);
                    return Ok(self.populate(artifact));
                }
                Err(e) => {
                    warn!(dataset = %kind, error = %e, "columnar artifact unreadable, regenerating");
                    self.metrics.increment("corrupt_artifacts", &labels);
                }
            }
        }

        // stamped before parsing: a source rewritten mid-parse is newer than the artifact
        let stamp = generation_stamp(std::slice::from_ref(&source));
        self.regenerate(kind, &source, stamp, artifact_path)
    }

    /// Drop the memory slot for a dataset (this process only)
    pub fn evict(&self, kind: DatasetKind) -> bool {
        self.slots.remove(&kind).is_some()
    }

    /// True if the dataset is in this process's memory layer
    #[must_use]
    pub fn is_in_memory(&self, kind: DatasetKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// True while a load holding the dataset's guard is in progress
    #[must_use]
    pub fn is_in_flight(&self, kind: DatasetKind) -> bool {
        self.flights.is_in_flight(&kind)
    }

    /// Run `f` while holding the dataset's regeneration guard
    pub(crate) fn exclusive<T>(&self, kind: DatasetKind, f: impl FnOnce() -> T) -> T {
        self.flights.run(&kind, f)
    }

    fn memory_hit(&self, kind: DatasetKind) -> Option<Arc<TabularArtifact>> {
        let hit = self.slots.get(&kind).map(|slot| Arc::clone(slot.value()))?;
        self.metrics.increment("cache_hits", &[("dataset", kind.name())]);
        Some(hit)
    }

    fn populate(&self, artifact: TabularArtifact) -> Arc<TabularArtifact> {
        let artifact = Arc::new(artifact);
        self.slots.insert(artifact.dataset(), Arc::clone(&artifact));
        artifact
    }

    fn read_artifact(kind: DatasetKind, path: &Path) -> Result<TabularArtifact> {
        let batch = storage::load_parquet(path)?;
        kind.validate(&batch)?;
        let generated_at = artifact_timestamp(path)?.ok_or_else(|| Error::CorruptArtifact {
            key: kind.name().to_string(),
            reason: "artifact disappeared while reading".to_string(),
        })?;
        info!(dataset = %kind, rows = batch.num_rows(), "loaded columnar artifact");
        Ok(TabularArtifact {
            dataset: kind,
            batch,
            generated_at: generated_at.into(),
            path: path.to_path_buf(),
        })
    }

    fn regenerate(
        &self,
        kind: DatasetKind,
        source: &RawSource,
        stamp: SystemTime,
        artifact_path: PathBuf,
    ) -> Result<Arc<TabularArtifact>> {
        let labels = [("dataset", kind.name())];
        self.metrics.increment("regenerations_started", &labels);
        let _timer = self
            .metrics
            .timer("cache_load_seconds", &[("dataset", kind.name()), ("layer", "raw")]);

        info!(dataset = %kind, path = %source.path().display(), "parsing raw source");
        let outcome = kind.parse(source.path())?;
        for (&reason, &count) in &outcome.dropped {
            self.metrics
                .add("rows_dropped", &[("dataset", kind.name()), ("reason", reason)], count);
        }
        if outcome.flagged > 0 {
            self.metrics
                .add("geometry_parse_errors", &labels, outcome.flagged);
        }

        match storage::write_parquet_atomic(&artifact_path, &outcome.batch, stamp) {
            Ok(size) => info!(
                dataset = %kind,
                rows = outcome.batch.num_rows(),
                dropped = outcome.dropped_total(),
                size_bytes = size,
                "columnar artifact written"
            ),
            Err(e) => {
                // still served from memory; the next process re-parses
                warn!(dataset = %kind, error = %e, "failed to persist columnar artifact");
                self.metrics.increment("persist_failures", &labels);
            }
        }

        self.metrics.increment("cache_misses", &labels);
        Ok(self.populate(TabularArtifact {
            dataset: kind,
            batch: outcome.batch,
            generated_at: stamp.into(),
            path: artifact_path,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freshness::Freshness;
    use arrow::array::{Array, Float64Array, Int64Array, StringArray};
    use std::fs;
    use std::time::Duration;

    fn loader_for(raw: &Path, cache: &Path) -> TabularLoader {
        let config = CacheConfig::builder(raw, cache).build().unwrap();
        TabularLoader::new(Arc::new(config), Arc::new(MetricsSink::new()))
    }

    fn write_raw(root: &Path, kind: DatasetKind, content: &[u8]) {
        let config = CacheConfig::builder(root, root).build().unwrap();
        let path = kind.raw_path(&config);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    const TRANSFERS: &str = "State,Agency Name,NSN,Item Name,Quantity,UI,Acquisition Value,DEMIL Code,DEMIL IC,Ship Date,Station Type\n\
AL, ABBEVILLE POLICE DEPT ,1005-01-587-7175,\"MOUNT,RIFLE\",10,Each,1626,D,1,2016-09-19T00:00:00,State\n\
AL,ABBEVILLE POLICE DEPT,2320-01-371-9577,TRUCK,1,Each,62627,C,1,02/03/2015,\n\
AK,BROKEN ROW,1\n\
TX,ANOTHER PD,,,two,Each,n/a,,,,\n";

    #[test]
    fn test_source_rewritten_during_parse_leaves_artifact_stale() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), DatasetKind::Transfers, TRANSFERS.as_bytes());
        let loader = loader_for(dir.path(), &dir.path().join("cache"));
        let raw_path = DatasetKind::Transfers.raw_path(&loader.config);

        let source = RawSource::stat(&raw_path).unwrap().unwrap();
        let stamp = generation_stamp(std::slice::from_ref(&source));

        // the raw file changes after the stamp is taken but before it is parsed
        let extra = "CA,LATE PD,1005-00-000-0001,RIFLE,1,Each,10,D,1,2020-01-01T00:00:00,State\n";
        fs::write(&raw_path, format!("{TRANSFERS}{extra}")).unwrap();
        let file = fs::OpenOptions::new().write(true).open(&raw_path).unwrap();
        file.set_modified(stamp + Duration::from_secs(2)).unwrap();
        drop(file);

        let artifact_path = loader.artifact_path(DatasetKind::Transfers);
        loader
            .regenerate(DatasetKind::Transfers, &source, stamp, artifact_path.clone())
            .unwrap();

        let current = RawSource::stat(&raw_path).unwrap().unwrap();
        let written = artifact_timestamp(&artifact_path).unwrap();
        assert_eq!(freshness::check(&[current], written), Freshness::Stale);

        // a later process must not trust the artifact
        let restarted = loader_for(dir.path(), &dir.path().join("cache"));
        assert_eq!(restarted.load(DatasetKind::Transfers).unwrap().row_count(), 4);
        let snap = restarted.metrics.snapshot();
        assert_eq!(snap.counter("cache_disk_hits", &[("dataset", "transfers")]), 0);
        assert_eq!(snap.counter("regenerations_started", &[("dataset", "transfers")]), 1);
    }

    #[test]
    fn test_transfers_parse() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), DatasetKind::Transfers, TRANSFERS.as_bytes());
        let loader = loader_for(dir.path(), &dir.path().join("cache"));

        let artifact = loader.load(DatasetKind::Transfers).unwrap();
        assert_eq!(artifact.row_count(), 3);

        let batch = artifact.batch();
        let agency = batch.column_by_name("agency_name").unwrap();
        let agency = agency.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(agency.value(0), "ABBEVILLE POLICE DEPT");

        let category = batch.column_by_name("category").unwrap();
        let category = category.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(category.value(0), "Weapons & Firearms");
        assert_eq!(category.value(1), "Vehicles & Transport");
        assert_eq!(category.value(2), "Other");

        let station = batch.column_by_name("station_type").unwrap();
        let station = station.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(station.value(1), "Unknown");

        let qty = batch.column_by_name("quantity").unwrap();
        let qty = qty.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(qty.value(0), 10);
        assert_eq!(qty.value(2), 0);

        let value = batch.column_by_name("acquisition_value").unwrap();
        let value = value.as_any().downcast_ref::<Float64Array>().unwrap();
        assert!(value.value(2).abs() < f64::EPSILON);

        let year = batch.column_by_name("year").unwrap();
        assert!(year.is_valid(0));
        assert!(year.is_null(2));

        let snap = loader.metrics.snapshot();
        assert_eq!(
            snap.counter("rows_dropped", &[("dataset", "transfers"), ("reason", "field_count")]),
            1
        );
    }

    #[test]
    fn test_installations_bom_and_geometry() {
        let mut raw = b"\xEF\xBB\xBF".to_vec();
        raw.extend_from_slice(
            b"Geo Point;Geo Shape;COMPONENT;Site Name;Joint Base;State Terr;Oper Stat;PERIMETER;AREA\n\
38.87, -77.05;\"{\"\"type\"\": \"\"Polygon\"\", \"\"coordinates\"\": [[[-77.0, 38.8], [-77.1, 38.8], [-77.1, 38.9], [-77.0, 38.8]]]}\";Army Active; Fort Myer ;;Virginia;Active;0.1;0.002\n\
;;Navy Active;Nowhere;;;;;\n\
21.3, -157.9;not geojson;Navy Active;Pearl Harbor;Joint Base;Hawaii;;1.5;oops\n",
        );
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), DatasetKind::Installations, &raw);
        let loader = loader_for(dir.path(), &dir.path().join("cache"));

        let artifact = loader.load(DatasetKind::Installations).unwrap();
        assert_eq!(artifact.row_count(), 2);

        let batch = artifact.batch();
        let site = batch.column_by_name("site_name").unwrap();
        let site = site.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(site.value(0), "Fort Myer");

        let joint = batch.column_by_name("joint_base").unwrap();
        let joint = joint.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(joint.value(0), "Not Joint");
        assert_eq!(joint.value(1), "Joint Base");

        let shape_type = batch.column_by_name("shape_type").unwrap();
        let shape_type = shape_type.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(shape_type.value(0), "Polygon");
        assert!(shape_type.is_null(1));

        let snap = loader.metrics.snapshot();
        assert_eq!(snap.counter("geometry_parse_errors", &[("dataset", "installations")]), 1);
        assert_eq!(
            snap.counter("rows_dropped", &[("dataset", "installations"), ("reason", "coordinates")]),
            1
        );

        // nested geometry survives the columnar round trip
        let reloaded = TabularLoader::read_artifact(
            DatasetKind::Installations,
            &loader.artifact_path(DatasetKind::Installations),
        )
        .unwrap();
        assert_eq!(reloaded.row_count(), 2);
        let rings = reloaded.batch().column_by_name("shape_rings").unwrap();
        assert!(rings.is_valid(0));
        assert!(rings.is_null(1));
    }

    #[test]
    fn test_transcriptions_parse() {
        let raw = "Serial No,description,medical_specialty,sample_name,transcription,keywords,cleaned_transcription\n\
1, A 23-year-old ,  Allergy / Immunology ,Allergic Rhinitis,raw,\"allergy, rhinitis,\",subjective notes\n\
2,,Cardiology,Echo,raw,,\n";
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), DatasetKind::Transcriptions, raw.as_bytes());
        let loader = loader_for(dir.path(), &dir.path().join("cache"));

        let artifact = loader.load(DatasetKind::Transcriptions).unwrap();
        let batch = artifact.batch();
        assert_eq!(artifact.row_count(), 2);

        let specialty = batch.column_by_name("medical_specialty").unwrap();
        let specialty = specialty.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(specialty.value(0), "Allergy / Immunology");

        let keywords = batch.column_by_name("keywords").unwrap();
        let keywords = keywords.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(keywords.value(0), "allergy, rhinitis");
        assert_eq!(keywords.value(1), "");

        let length = batch.column_by_name("transcription_length").unwrap();
        let length = length.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(length.value(0), 16);
        assert_eq!(length.value(1), 0);
    }

    #[test]
    fn test_missing_required_column() {
        let dir = tempfile::tempdir().unwrap();
        write_raw(dir.path(), DatasetKind::Transcriptions, b"a,b\n1,2\n");
        let loader = loader_for(dir.path(), &dir.path().join("cache"));

        match loader.load(DatasetKind::Transcriptions) {
            Err(Error::SchemaMismatch { missing, .. }) => {
                assert!(missing.contains(&"keywords".to_string()));
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
        assert!(!loader.is_in_memory(DatasetKind::Transcriptions));
    }

    #[test]
    fn test_missing_source_is_fatal_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader_for(dir.path(), &dir.path().join("cache"));

        let err = loader.load(DatasetKind::Transfers).unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
        assert!(!loader.is_in_memory(DatasetKind::Transfers));
        assert!(!loader.artifact_path(DatasetKind::Transfers).exists());
    }

    #[test]
    fn test_validate_rejects_foreign_schema() {
        let batch = RecordBatch::try_from_iter(vec![(
            "x",
            Arc::new(Int64Array::from(vec![1])) as arrow::array::ArrayRef,
        )])
        .unwrap();
        assert!(DatasetKind::Transfers.validate(&batch).is_err());
    }
}
