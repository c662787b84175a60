//! Precomputation and cache-layer benchmarks
//!
//! - Full waveform precomputation (two passes over the raw files)
//! - Bundle reload from the JSON disk layer
//! - Memory-layer hits
//! - Single-beat fiducial detection

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use precache::waveform::{fiducial, SIGNAL_LEN};
use precache::{CacheConfig, CacheManager, WaveformEngine};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

/// Synthetic beat with its R peak at a class-dependent position
#[allow(clippy::cast_precision_loss)]
fn beat(class: usize, row: usize) -> Vec<f64> {
    let centre = 40.0 + 10.0 * class as f64;
    let jitter = (row as f64 * 0.11).sin() * 0.05;
    (0..SIGNAL_LEN)
        .map(|i| {
            let x = i as f64;
            (0.1 + 0.8 * (-(x - centre).powi(2) / 20.0).exp() + jitter).clamp(0.0, 1.0)
        })
        .collect()
}

/// Write the four default waveform files with `rows` rows each
fn write_sources(root: &Path, rows: usize) {
    let dir = root.join("raw").join("ecg_data");
    std::fs::create_dir_all(&dir).unwrap();
    let files = [
        ("mitbih_train.csv", 5),
        ("mitbih_test.csv", 5),
        ("ptbdb_normal.csv", 1),
        ("ptbdb_abnormal.csv", 1),
    ];
    for (offset, (name, classes)) in files.iter().enumerate() {
        let mut content = String::new();
        for row in 0..rows {
            let label = if *classes == 1 { offset - 2 } else { row % classes };
            for v in beat(label, row) {
                write!(content, "{v:.6},").unwrap();
            }
            writeln!(content, "{label}.0").unwrap();
        }
        std::fs::write(dir.join(name), content).unwrap();
    }
}

fn config(root: &Path) -> CacheConfig {
    CacheConfig::builder(root.join("raw"), root.join("cache"))
        .build()
        .unwrap()
}

/// Benchmark the full reduction
fn bench_precompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("waveform_precompute");
    group.sample_size(10);

    for rows in [500, 5_000].iter() {
        let dir = tempfile::tempdir().unwrap();
        write_sources(dir.path(), *rows);
        let engine = WaveformEngine::new(Arc::new(config(dir.path())));

        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| {
                let bundle = engine.precompute().unwrap();
                black_box(bundle);
            });
        });
    }

    group.finish();
}

/// Benchmark the disk layer (fresh process, bundle on disk)
fn bench_bundle_reload(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path(), 2_000);
    CacheManager::new(config(dir.path())).bundle().unwrap();

    c.bench_function("bundle_disk_reload", |b| {
        b.iter(|| {
            let manager = CacheManager::new(config(dir.path()));
            black_box(manager.bundle().unwrap());
        });
    });
}

/// Benchmark the memory layer
fn bench_memory_hit(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    write_sources(dir.path(), 500);
    let manager = CacheManager::new(config(dir.path()));
    manager.bundle().unwrap();

    c.bench_function("bundle_memory_hit", |b| {
        b.iter(|| black_box(manager.bundle().unwrap()));
    });
}

/// Benchmark single-beat fiducial detection
fn bench_fiducials(c: &mut Criterion) {
    let signal = fiducial::normalize(&beat(2, 7));

    c.bench_function("fiducial_detect", |b| {
        b.iter(|| black_box(fiducial::detect(black_box(&signal))));
    });
}

criterion_group!(
    benches,
    bench_precompute,
    bench_bundle_reload,
    bench_memory_hit,
    bench_fiducials
);
criterion_main!(benches);
