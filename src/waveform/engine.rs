//! Two-pass waveform precomputation
//!
//! ```text
//! resolve ──▶ pass 1 (per source, parallel) ──▶ merge in source order ──▶ sample plan
//!                 counts + Welford stats             Chan's formula          ChaCha8 per class
//!
//!         ──▶ pass 2 (per source, parallel) ──▶ features, correlation, PCA ──▶ WaveformBundle
//!                 collect sampled rows
//! ```
//!
//! Only the sampled rows are ever held in memory. Rows are ordered by source
//! configuration order, then file order; sampling draws ordinals over that
//! sequence, so the output depends only on file contents, the seed and the
//! configuration, never on thread scheduling.

use super::bundle::{
    AbsentSource, BundleMetadata, CorrelationMatrix, SourceUsage, WaveformBundle, WaveformClassBundle,
    SCHEMA_VERSION,
};
use super::fiducial;
use super::pca;
use super::sampling::{class_seed, sample_ordinals, SourceIdentity};
use super::source::{scan, ResolvedSource, ScanTally};
use super::stats::{correlation_matrix, RunningStats, SampleFeatures};
use super::SIGNAL_LEN;
use crate::freshness::{generation_stamp, RawSource};
use crate::{CacheConfig, Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{info, warn};

/// Per-class sample ordinals local to one source, ascending
type SamplePlan = BTreeMap<i64, Vec<u64>>;

struct Scanned<'a> {
    source: &'a ResolvedSource,
    raw: &'a RawSource,
    tally: ScanTally,
    stats: BTreeMap<i64, RunningStats>,
}

/// One source's share of a class: `(scanned index, first global ordinal, row count)`
type Contribution = (usize, u64, u64);

fn par_map<T, R, F>(items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        items.par_iter().map(f).collect()
    }
    #[cfg(not(feature = "rayon"))]
    {
        items.iter().map(f).collect()
    }
}

fn first_pass(path: &Path, label_offset: i64) -> Result<(ScanTally, BTreeMap<i64, RunningStats>)> {
    let mut stats: BTreeMap<i64, RunningStats> = BTreeMap::new();
    let tally = scan(path, label_offset, |label, signal| {
        stats
            .entry(label)
            .or_insert_with(|| RunningStats::new(SIGNAL_LEN))
            .push(signal);
    })?;
    Ok((tally, stats))
}

fn second_pass(path: &Path, label_offset: i64, plan: &SamplePlan) -> Result<BTreeMap<i64, Vec<Vec<f64>>>> {
    let mut seen: BTreeMap<i64, u64> = BTreeMap::new();
    let mut cursor: BTreeMap<i64, usize> = BTreeMap::new();
    let mut picked: BTreeMap<i64, Vec<Vec<f64>>> = BTreeMap::new();
    if plan.values().all(Vec::is_empty) {
        return Ok(picked);
    }
    scan(path, label_offset, |label, signal| {
        let ordinal = seen.entry(label).or_insert(0);
        if let Some(wanted) = plan.get(&label) {
            let next = cursor.entry(label).or_insert(0);
            if wanted.get(*next).copied() == Some(*ordinal) {
                picked.entry(label).or_default().push(signal.to_vec());
                *next += 1;
            }
        }
        *ordinal += 1;
    })?;
    Ok(picked)
}

/// Deterministic reduction of the raw waveform sources into a [`WaveformBundle`]
#[derive(Debug, Clone)]
pub struct WaveformEngine {
    config: Arc<CacheConfig>,
}

impl WaveformEngine {
    /// Create an engine over the configured sources
    #[must_use]
    pub fn new(config: Arc<CacheConfig>) -> Self {
        Self { config }
    }

    /// Locate every configured source (with `_sample.csv` fallback)
    pub(crate) fn resolve(&self) -> Result<Vec<ResolvedSource>> {
        let dir = self.config.waveform_dir();
        self.config
            .waveform_sources()
            .iter()
            .map(|spec| ResolvedSource::resolve(&dir, spec))
            .collect()
    }

    /// Resolve the sources and run the full precomputation
    ///
    /// # Errors
    ///
    /// Returns [`Error::TotalPrecomputeFailure`] if no source yields a row,
    /// or an IO error if a source disappears between the two passes
    pub fn precompute(&self) -> Result<WaveformBundle> {
        let resolved = self.resolve()?;
        let raws: Vec<RawSource> = resolved.iter().filter_map(|s| s.raw.clone()).collect();
        self.precompute_from(&resolved, generation_stamp(&raws))
    }

    pub(crate) fn precompute_from(
        &self,
        resolved: &[ResolvedSource],
        generated_at: SystemTime,
    ) -> Result<WaveformBundle> {
        let started = Instant::now();
        let mut absent_sources = Vec::new();
        let mut absent_expected = BTreeSet::new();

        let mut present: Vec<(&ResolvedSource, &RawSource)> = Vec::new();
        for source in resolved {
            if let Some(raw) = &source.raw {
                present.push((source, raw));
            } else {
                warn!(source = %source.spec.name, "waveform source missing, skipping its classes");
                absent_sources.push(AbsentSource {
                    name: source.spec.name.clone(),
                    path: None,
                    reason: "missing".to_string(),
                });
                absent_expected.extend(source.spec.expected_classes.iter().copied());
            }
        }

        let first = par_map(&present, |(source, raw)| first_pass(raw.path(), source.spec.label_offset));
        let mut scanned = Vec::new();
        for ((source, raw), outcome) in present.into_iter().zip(first) {
            match outcome {
                Ok((tally, stats)) => scanned.push(Scanned {
                    source,
                    raw,
                    tally,
                    stats,
                }),
                Err(e) => {
                    warn!(source = %source.spec.name, error = %e, "waveform source unreadable, skipping its classes");
                    absent_sources.push(AbsentSource {
                        name: source.spec.name.clone(),
                        path: Some(raw.path().to_path_buf()),
                        reason: format!("unreadable: {e}"),
                    });
                    absent_expected.extend(source.spec.expected_classes.iter().copied());
                }
            }
        }
        if scanned.is_empty() {
            return Err(Error::TotalPrecomputeFailure(format!(
                "none of the {} configured waveform sources could be read",
                resolved.len()
            )));
        }

        // merge in source order; a class's rows from earlier sources come first
        let mut population: BTreeMap<i64, RunningStats> = BTreeMap::new();
        let mut contributions: BTreeMap<i64, Vec<Contribution>> = BTreeMap::new();
        for (index, s) in scanned.iter().enumerate() {
            for (&class, stats) in &s.stats {
                let merged = population
                    .entry(class)
                    .or_insert_with(|| RunningStats::new(SIGNAL_LEN));
                let offset = merged.count();
                merged.merge(stats);
                contributions
                    .entry(class)
                    .or_default()
                    .push((index, offset, stats.count()));
            }
        }
        if population.is_empty() {
            return Err(Error::TotalPrecomputeFailure(
                "waveform sources contain no well-formed rows".to_string(),
            ));
        }

        let (seeds, plans) = self.plan(&scanned, &population, &contributions);

        let jobs: Vec<(&Scanned<'_>, &SamplePlan)> = scanned.iter().zip(&plans).collect();
        let collected = par_map(&jobs, |(s, plan)| second_pass(s.raw.path(), s.source.spec.label_offset, plan));
        let mut samples: BTreeMap<i64, Vec<Vec<f64>>> = BTreeMap::new();
        for picked in collected {
            for (class, mut rows) in picked? {
                samples.entry(class).or_default().append(&mut rows);
            }
        }

        let classes: BTreeMap<i64, WaveformClassBundle> = population
            .iter()
            .map(|(&class, stats)| {
                let class_samples = samples.remove(&class).unwrap_or_default();
                let mean = stats.mean().to_vec();
                let bundle = WaveformClassBundle {
                    class,
                    label: self.config.class_name(class),
                    population: stats.count(),
                    sample_seed: seeds.get(&class).copied().unwrap_or_default(),
                    features: class_samples.iter().map(|s| SampleFeatures::extract(s)).collect(),
                    samples: class_samples,
                    mean_fiducials: fiducial::detect(&fiducial::normalize(&mean)),
                    std: stats.std(),
                    mean,
                };
                (class, bundle)
            })
            .collect();

        let means: Vec<&[f64]> = classes.values().map(|c| c.mean.as_slice()).collect();
        let correlation = CorrelationMatrix {
            classes: classes.keys().copied().collect(),
            matrix: correlation_matrix(&means),
        };

        let points: Vec<(i64, [f64; 3])> = classes
            .values()
            .flat_map(|c| c.features.iter().map(move |f| (c.class, f.vector())))
            .collect();
        let embedding = pca::embed(&points);

        let metadata = BundleMetadata {
            seed: self.config.seed(),
            generated_at: generated_at.into(),
            samples_per_class: self.config.samples_per_class(),
            waveform_sources: self.config.waveform_sources().to_vec(),
            sources_used: scanned
                .iter()
                .map(|s| SourceUsage {
                    name: s.source.spec.name.clone(),
                    path: s.raw.path().to_path_buf(),
                    size_bytes: s.raw.size_bytes(),
                    rows_used: s.tally.rows_used,
                    rows_dropped: s.tally.rows_dropped(),
                })
                .collect(),
            absent_classes: absent_expected
                .iter()
                .copied()
                .filter(|c| !classes.contains_key(c))
                .collect(),
            degraded_classes: absent_expected
                .iter()
                .copied()
                .filter(|c| classes.contains_key(c))
                .collect(),
            absent_sources,
            rows_per_class: classes.iter().map(|(&k, c)| (k, c.population)).collect(),
        };

        if metadata.is_partial() {
            warn!(
                absent = ?metadata.absent_sources.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                absent_classes = ?metadata.absent_classes,
                degraded_classes = ?metadata.degraded_classes,
                "partial waveform bundle"
            );
        }
        info!(
            classes = classes.len(),
            samples = points.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "waveform precomputation complete"
        );

        Ok(WaveformBundle {
            schema_version: SCHEMA_VERSION,
            classes,
            correlation_matrix: correlation,
            pca_embedding: embedding,
            metadata,
        })
    }

    /// Draw each class's sample ordinals and split them per source
    fn plan(
        &self,
        scanned: &[Scanned<'_>],
        population: &BTreeMap<i64, RunningStats>,
        contributions: &BTreeMap<i64, Vec<Contribution>>,
    ) -> (BTreeMap<i64, u64>, Vec<SamplePlan>) {
        let mut seeds = BTreeMap::new();
        let mut plans = vec![SamplePlan::new(); scanned.len()];
        for (&class, stats) in population {
            let shares = contributions.get(&class).map_or(&[][..], Vec::as_slice);
            let identities: Vec<SourceIdentity<'_>> = shares
                .iter()
                .map(|&(i, _, _)| (scanned[i].source.spec.name.as_str(), scanned[i].raw.size_bytes()))
                .collect();
            let seed = class_seed(self.config.seed(), class, &identities);
            seeds.insert(class, seed);

            let total = usize::try_from(stats.count()).unwrap_or(usize::MAX);
            let ordinals = sample_ordinals(seed, total, self.config.samples_per_class());
            for &(i, offset, count) in shares {
                let local: Vec<u64> = ordinals
                    .iter()
                    .map(|&o| o as u64)
                    .filter(|&o| o >= offset && o < offset + count)
                    .map(|o| o - offset)
                    .collect();
                if !local.is_empty() {
                    plans[i].insert(class, local);
                }
            }
        }
        (seeds, plans)
    }
}
