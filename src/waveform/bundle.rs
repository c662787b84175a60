//! Waveform bundle schema
//!
//! The bundle is the whole precomputed output, serialized as one JSON
//! document. Every struct rejects unknown fields, and [`WaveformBundle::validate`]
//! checks the invariants serde cannot express (vector lengths, sample bounds,
//! matrix shape). A bundle that fails either check is treated as stale.

use super::fiducial::Fiducials;
use super::pca::PcaEmbedding;
use super::stats::SampleFeatures;
use super::SIGNAL_LEN;
use crate::config::WaveformSourceSpec;
use crate::{CacheConfig, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Current on-disk bundle layout
pub const SCHEMA_VERSION: u32 = 1;

/// Precomputed summary of one class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaveformClassBundle {
    /// Class id (label plus source offset)
    pub class: i64,
    /// Display name
    pub label: String,
    /// Rows of this class across all used sources
    pub population: u64,
    /// Seed of this class's sampling stream
    pub sample_seed: u64,
    /// Sampled waveforms, in source-then-row order
    pub samples: Vec<Vec<f64>>,
    /// Element-wise mean over the whole population
    pub mean: Vec<f64>,
    /// Element-wise population standard deviation
    pub std: Vec<f64>,
    /// One entry per sample
    pub features: Vec<SampleFeatures>,
    /// Fiducials of the normalised mean waveform
    pub mean_fiducials: Fiducials,
}

/// Pearson correlation between class means
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorrelationMatrix {
    /// Row/column order
    pub classes: Vec<i64>,
    /// `None` where a mean waveform has zero variance
    pub matrix: Vec<Vec<Option<f64>>>,
}

/// A source that contributed rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceUsage {
    /// Configured source name
    pub name: String,
    /// Resolved file
    pub path: PathBuf,
    /// File size when the bundle was built
    pub size_bytes: u64,
    /// Rows kept
    pub rows_used: u64,
    /// Malformed rows dropped
    pub rows_dropped: u64,
}

/// A source that contributed nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AbsentSource {
    /// Configured source name
    pub name: String,
    /// Resolved file, when it existed but could not be read
    pub path: Option<PathBuf>,
    /// Why it was skipped
    pub reason: String,
}

/// Generation metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleMetadata {
    /// Sampling seed
    pub seed: u64,
    /// Generation timestamp
    pub generated_at: DateTime<Utc>,
    /// Target samples per class
    pub samples_per_class: usize,
    /// Source configuration the bundle was built with
    pub waveform_sources: Vec<WaveformSourceSpec>,
    /// Sources that contributed rows, in configuration order
    pub sources_used: Vec<SourceUsage>,
    /// Sources that were missing or unreadable
    pub absent_sources: Vec<AbsentSource>,
    /// Expected classes with no rows because their source was absent
    pub absent_classes: Vec<i64>,
    /// Expected classes of absent sources that other sources still cover
    pub degraded_classes: Vec<i64>,
    /// Population per class
    pub rows_per_class: BTreeMap<i64, u64>,
}

impl BundleMetadata {
    /// True when some configured source did not contribute
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.absent_sources.is_empty()
    }

    /// Files the bundle was derived from (used and unreadable)
    #[must_use]
    pub fn input_files(&self) -> BTreeSet<PathBuf> {
        self.sources_used
            .iter()
            .map(|s| s.path.clone())
            .chain(self.absent_sources.iter().filter_map(|s| s.path.clone()))
            .collect()
    }
}

/// The whole precomputed waveform output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaveformBundle {
    /// Layout version; see [`SCHEMA_VERSION`]
    pub schema_version: u32,
    /// Per-class summaries keyed by class id
    pub classes: BTreeMap<i64, WaveformClassBundle>,
    /// Correlation between class means
    pub correlation_matrix: CorrelationMatrix,
    /// Global 2-D projection of every sample's features
    pub pca_embedding: PcaEmbedding,
    /// Generation metadata
    pub metadata: BundleMetadata,
}

fn corrupt(reason: String) -> Error {
    Error::CorruptArtifact {
        key: "waveforms".to_string(),
        reason,
    }
}

impl WaveformBundle {
    /// Parse and validate a serialized bundle
    ///
    /// # Errors
    ///
    /// Returns error if the JSON does not match the schema or fails [`Self::validate`]
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let bundle: Self = serde_json::from_slice(bytes)?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Check structural invariants
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptArtifact`] describing the first violation
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(corrupt(format!(
                "schema version {} (expected {SCHEMA_VERSION})",
                self.schema_version
            )));
        }

        let limit = self.metadata.samples_per_class;
        for (&key, class) in &self.classes {
            if key != class.class {
                return Err(corrupt(format!("class key {key} holds class {}", class.class)));
            }
            if class.mean.len() != SIGNAL_LEN || class.std.len() != SIGNAL_LEN {
                return Err(corrupt(format!("class {key}: summary vectors are not {SIGNAL_LEN} long")));
            }
            if class.samples.iter().any(|s| s.len() != SIGNAL_LEN) {
                return Err(corrupt(format!("class {key}: sample is not {SIGNAL_LEN} long")));
            }
            let bound = usize::try_from(class.population).unwrap_or(usize::MAX).min(limit);
            if class.samples.len() > bound {
                return Err(corrupt(format!(
                    "class {key}: {} samples exceed bound {bound}",
                    class.samples.len()
                )));
            }
            if class.features.len() != class.samples.len() {
                return Err(corrupt(format!("class {key}: features do not match samples")));
            }
            if self.metadata.rows_per_class.get(&key) != Some(&class.population) {
                return Err(corrupt(format!("class {key}: population disagrees with metadata")));
            }
        }

        let keys: Vec<i64> = self.classes.keys().copied().collect();
        let corr = &self.correlation_matrix;
        if corr.classes != keys {
            return Err(corrupt("correlation classes do not match bundle classes".to_string()));
        }
        if corr.matrix.len() != keys.len() || corr.matrix.iter().any(|row| row.len() != keys.len()) {
            return Err(corrupt("correlation matrix is not square".to_string()));
        }

        if let Some(point) = self
            .pca_embedding
            .points
            .iter()
            .find(|p| !self.classes.contains_key(&p.class))
        {
            return Err(corrupt(format!("embedding point for unknown class {}", point.class)));
        }
        Ok(())
    }

    /// True if the bundle was built with this configuration's seed, sample
    /// count, waveform sources and class names
    #[must_use]
    pub fn matches_config(&self, config: &CacheConfig) -> bool {
        let meta = &self.metadata;
        meta.seed == config.seed()
            && meta.samples_per_class == config.samples_per_class()
            && meta.waveform_sources == config.waveform_sources()
            && self
                .classes
                .values()
                .all(|c| c.label == config.class_name(c.class))
    }

    /// Total number of sampled waveforms
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.classes.values().map(|c| c.samples.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::fiducial::Intervals;

    fn class(id: i64, samples: usize) -> WaveformClassBundle {
        WaveformClassBundle {
            class: id,
            label: format!("Class {id}"),
            population: 10,
            sample_seed: 1,
            samples: vec![vec![0.5; SIGNAL_LEN]; samples],
            mean: vec![0.5; SIGNAL_LEN],
            std: vec![0.0; SIGNAL_LEN],
            features: vec![
                SampleFeatures {
                    amplitude: 0.0,
                    energy: 46.75,
                    zero_crossings: 0,
                    intervals: Intervals::default(),
                };
                samples
            ],
            mean_fiducials: Fiducials::default(),
        }
    }

    fn bundle() -> WaveformBundle {
        WaveformBundle {
            schema_version: SCHEMA_VERSION,
            classes: [(0, class(0, 2)), (3, class(3, 1))].into_iter().collect(),
            correlation_matrix: CorrelationMatrix {
                classes: vec![0, 3],
                matrix: vec![vec![Some(1.0), None], vec![None, Some(1.0)]],
            },
            pca_embedding: PcaEmbedding::default(),
            metadata: BundleMetadata {
                seed: 42,
                generated_at: Utc::now(),
                samples_per_class: 5,
                waveform_sources: vec![],
                sources_used: vec![],
                absent_sources: vec![],
                absent_classes: vec![],
                degraded_classes: vec![],
                rows_per_class: [(0, 10), (3, 10)].into_iter().collect(),
            },
        }
    }

    #[test]
    fn test_valid_bundle_round_trips() {
        let b = bundle();
        b.validate().unwrap();
        let json = serde_json::to_vec(&b).unwrap();
        let back = WaveformBundle::from_json_slice(&json).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut value = serde_json::to_value(bundle()).unwrap();
        value["surprise"] = serde_json::json!(1);
        let json = serde_json::to_vec(&value).unwrap();
        assert!(WaveformBundle::from_json_slice(&json).unwrap_err().is_corrupt_artifact());
    }

    #[test]
    fn test_short_vectors_rejected() {
        let mut b = bundle();
        b.classes.get_mut(&0).unwrap().mean.pop();
        assert!(b.validate().is_err());
    }

    #[test]
    fn test_sample_bound_enforced() {
        let mut b = bundle();
        b.metadata.samples_per_class = 1;
        let err = b.validate().unwrap_err();
        assert!(err.to_string().contains("exceed"));
    }

    #[test]
    fn test_non_square_matrix_rejected() {
        let mut b = bundle();
        b.correlation_matrix.matrix[1].pop();
        assert!(b.validate().is_err());
    }

    #[test]
    fn test_schema_version_checked() {
        let mut b = bundle();
        b.schema_version = 0;
        assert!(b.validate().is_err());
    }

    #[test]
    fn test_matches_config() {
        let config = CacheConfig::builder("raw", "cache")
            .seed(42)
            .samples_per_class(5)
            .class_name(0, "Class 0")
            .class_name(3, "Class 3")
            .build()
            .unwrap();
        let mut b = bundle();
        b.metadata.waveform_sources = config.waveform_sources().to_vec();
        assert!(b.matches_config(&config));

        let mut reseeded = b.clone();
        reseeded.metadata.seed = 7;
        assert!(!reseeded.matches_config(&config));

        let mut resized = b.clone();
        resized.metadata.samples_per_class = 2;
        assert!(!resized.matches_config(&config));

        let mut shifted = b.clone();
        shifted.metadata.waveform_sources[2].label_offset = 9;
        assert!(!shifted.matches_config(&config));

        let mut renamed = b;
        renamed.classes.get_mut(&3).unwrap().label = "Fusion".to_string();
        assert!(!renamed.matches_config(&config));
    }

    #[test]
    fn test_input_files() {
        let mut b = bundle();
        b.metadata.absent_sources.push(AbsentSource {
            name: "x".into(),
            path: Some(PathBuf::from("/x.csv")),
            reason: "unreadable".into(),
        });
        b.metadata.absent_sources.push(AbsentSource {
            name: "y".into(),
            path: None,
            reason: "missing".into(),
        });
        assert!(b.metadata.is_partial());
        assert_eq!(b.metadata.input_files().len(), 1);
    }
}
