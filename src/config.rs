//! Cache manager configuration
//!
//! Every path, the sampling seed and the per-class sample count are explicit
//! construction parameters. Nothing here reads process environment; the
//! binary (or any other host) decides where values come from.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Default sampling seed
pub const DEFAULT_SEED: u64 = 42;

/// Default number of sampled waveforms per class
pub const DEFAULT_SAMPLES_PER_CLASS: usize = 50;

/// Upper bound on configured waveform sources
pub const MAX_WAVEFORM_SOURCES: usize = 4;

/// Relative locations of raw sources under `raw_root`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceLayout {
    /// Equipment transfer records (comma-delimited)
    pub transfers: PathBuf,
    /// Installation records (semicolon-delimited, optional BOM, embedded GeoJSON)
    pub installations: PathBuf,
    /// Medical transcription records (comma-delimited)
    pub transcriptions: PathBuf,
    /// Directory holding the fixed-width waveform files
    pub waveform_dir: PathBuf,
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self {
            transfers: PathBuf::from("Military_Equipment_for_Local_Law_Enforcement/dod_all_states.csv"),
            installations: PathBuf::from("military_bases/military-bases.csv"),
            transcriptions: PathBuf::from(
                "healthcare_documentation/Healthcare Documentation Database.csv",
            ),
            waveform_dir: PathBuf::from("ecg_data"),
        }
    }
}

/// One raw waveform file and how its labels map onto bundle classes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformSourceSpec {
    /// Stable source name, recorded in bundle metadata
    pub name: String,
    /// File name inside the waveform directory
    pub file_name: String,
    /// Added to the integer label in column 188
    #[serde(default)]
    pub label_offset: i64,
    /// Classes this source is expected to contribute (used to flag absent classes)
    #[serde(default)]
    pub expected_classes: Vec<i64>,
}

impl WaveformSourceSpec {
    /// Create a source spec
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        file_name: impl Into<String>,
        label_offset: i64,
        expected_classes: Vec<i64>,
    ) -> Self {
        Self {
            name: name.into(),
            file_name: file_name.into(),
            label_offset,
            expected_classes,
        }
    }
}

/// The four ECG sources: MIT-BIH train/test (classes 0-4), PTB normal (5) and abnormal (6)
#[must_use]
pub fn default_waveform_sources() -> Vec<WaveformSourceSpec> {
    let mitbih: Vec<i64> = (0..=4).collect();
    vec![
        WaveformSourceSpec::new("mitbih_train", "mitbih_train.csv", 0, mitbih.clone()),
        WaveformSourceSpec::new("mitbih_test", "mitbih_test.csv", 0, mitbih),
        WaveformSourceSpec::new("ptbdb_normal", "ptbdb_normal.csv", 5, vec![5]),
        WaveformSourceSpec::new("ptbdb_abnormal", "ptbdb_abnormal.csv", 5, vec![6]),
    ]
}

/// Human-readable class names for the default sources
#[must_use]
pub fn default_class_names() -> BTreeMap<i64, String> {
    [
        (0, "Normal (N)"),
        (1, "Supraventricular (S)"),
        (2, "Ventricular (V)"),
        (3, "Fusion (F)"),
        (4, "Unknown (Q)"),
        (5, "PTB Normal"),
        (6, "PTB Abnormal"),
    ]
    .into_iter()
    .map(|(id, name)| (id, name.to_string()))
    .collect()
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_samples_per_class() -> usize {
    DEFAULT_SAMPLES_PER_CLASS
}

/// Cache manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    raw_root: PathBuf,
    cache_root: PathBuf,
    #[serde(default = "default_seed")]
    seed: u64,
    #[serde(default = "default_samples_per_class")]
    samples_per_class: usize,
    #[serde(default)]
    layout: SourceLayout,
    #[serde(default = "default_waveform_sources")]
    waveform_sources: Vec<WaveformSourceSpec>,
    #[serde(default = "default_class_names")]
    class_names: BTreeMap<i64, String>,
}

impl CacheConfig {
    /// Create a configuration builder
    #[must_use]
    pub fn builder(raw_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> CacheConfigBuilder {
        CacheConfigBuilder::new(raw_root, cache_root)
    }

    /// Parse and validate a JSON configuration document
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or fails validation
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.samples_per_class == 0 {
            return Err(Error::InvalidConfig(
                "samples_per_class must be greater than 0".to_string(),
            ));
        }
        if self.waveform_sources.is_empty() || self.waveform_sources.len() > MAX_WAVEFORM_SOURCES {
            return Err(Error::InvalidConfig(format!(
                "expected 1..={MAX_WAVEFORM_SOURCES} waveform sources, got {}",
                self.waveform_sources.len()
            )));
        }
        let mut seen = HashSet::new();
        for source in &self.waveform_sources {
            if !seen.insert(source.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate waveform source name: {}",
                    source.name
                )));
            }
        }
        Ok(())
    }

    /// Root directory of raw sources
    #[must_use]
    pub fn raw_root(&self) -> &Path {
        &self.raw_root
    }

    /// Root directory of derived artifacts
    #[must_use]
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Sampling seed
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Target sample count per class
    #[must_use]
    pub const fn samples_per_class(&self) -> usize {
        self.samples_per_class
    }

    /// Raw source layout
    #[must_use]
    pub const fn layout(&self) -> &SourceLayout {
        &self.layout
    }

    /// Configured waveform sources, in ingestion order
    #[must_use]
    pub fn waveform_sources(&self) -> &[WaveformSourceSpec] {
        &self.waveform_sources
    }

    /// Directory holding waveform files
    #[must_use]
    pub fn waveform_dir(&self) -> PathBuf {
        self.raw_root.join(&self.layout.waveform_dir)
    }

    /// Display name for a class id (falls back to `Class <id>`)
    #[must_use]
    pub fn class_name(&self, class: i64) -> String {
        self.class_names
            .get(&class)
            .cloned()
            .unwrap_or_else(|| format!("Class {class}"))
    }
}

/// Builder for [`CacheConfig`]
#[derive(Debug)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a builder with defaults for everything except the two roots
    #[must_use]
    pub fn new(raw_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            config: CacheConfig {
                raw_root: raw_root.into(),
                cache_root: cache_root.into(),
                seed: DEFAULT_SEED,
                samples_per_class: DEFAULT_SAMPLES_PER_CLASS,
                layout: SourceLayout::default(),
                waveform_sources: default_waveform_sources(),
                class_names: default_class_names(),
            },
        }
    }

    /// Set sampling seed
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Set sample count per class
    #[must_use]
    pub const fn samples_per_class(mut self, n: usize) -> Self {
        self.config.samples_per_class = n;
        self
    }

    /// Override raw source layout
    #[must_use]
    pub fn layout(mut self, layout: SourceLayout) -> Self {
        self.config.layout = layout;
        self
    }

    /// Override waveform sources
    #[must_use]
    pub fn waveform_sources(mut self, sources: Vec<WaveformSourceSpec>) -> Self {
        self.config.waveform_sources = sources;
        self
    }

    /// Set or replace a class display name
    #[must_use]
    pub fn class_name(mut self, class: i64, name: impl Into<String>) -> Self {
        self.config.class_names.insert(class, name.into());
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns error if the sample count is zero, the waveform source list is
    /// empty or longer than four, or source names repeat
    pub fn build(self) -> Result<CacheConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
