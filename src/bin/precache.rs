//! `precache` binary: warm, inspect and invalidate the derived caches
//!
//! # Usage
//!
//! ```bash
//! precache --raw-root datasets --cache-root cache warm
//! precache status
//! precache invalidate waveforms
//! precache fiducials 2 0
//! ```
//!
//! Every subcommand prints one JSON document on stdout; logs go to stderr
//! and are filtered by `RUST_LOG` (default `info`).

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use precache::waveform::fiducial;
use precache::{CacheConfig, CacheKey, CacheManager, InvalidationTarget};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "precache",
    version,
    about = "Multi-layer cache manager and ECG waveform precomputation",
    long_about = None
)]
struct Args {
    /// JSON configuration file; flags below override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Root directory of the raw sources
    #[arg(long, value_name = "DIR", env = "PRECACHE_RAW_ROOT")]
    raw_root: Option<PathBuf>,

    /// Root directory of the derived artifacts
    #[arg(long, value_name = "DIR", env = "PRECACHE_CACHE_ROOT")]
    cache_root: Option<PathBuf>,

    /// Waveform sampling seed
    #[arg(long)]
    seed: Option<u64>,

    /// Sampled waveforms per class
    #[arg(long)]
    samples_per_class: Option<usize>,

    /// Print the metrics snapshot after the command
    #[arg(long, default_value_t = false)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every key (or one key) into the caches
    Warm {
        /// Cache key; all keys when omitted
        key: Option<String>,
    },
    /// Run the waveform precomputation and print bundle metadata
    Precompute,
    /// Print per-key status and overall health
    Status,
    /// Delete artifacts for one key or `all`
    Invalidate {
        /// Cache key or `all`
        target: String,
    },
    /// Detect fiducial points on one sampled beat
    Fiducials {
        /// Class id
        class: i64,
        /// Index into the class's samples
        sample: usize,
    },
}

const DEFAULT_RAW_ROOT: &str = "datasets";
const DEFAULT_CACHE_ROOT: &str = "cache";

fn load_config(args: &Args) -> anyhow::Result<CacheConfig> {
    let mut doc = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str::<Value>(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => json!({ "raw_root": DEFAULT_RAW_ROOT, "cache_root": DEFAULT_CACHE_ROOT }),
    };
    let Some(fields) = doc.as_object_mut() else {
        bail!("configuration must be a JSON object");
    };
    if let Some(dir) = &args.raw_root {
        fields.insert("raw_root".into(), json!(dir));
    }
    if let Some(dir) = &args.cache_root {
        fields.insert("cache_root".into(), json!(dir));
    }
    if let Some(seed) = args.seed {
        fields.insert("seed".into(), json!(seed));
    }
    if let Some(n) = args.samples_per_class {
        fields.insert("samples_per_class".into(), json!(n));
    }
    Ok(CacheConfig::from_json_str(&doc.to_string())?)
}

fn warm(manager: &CacheManager, key: Option<&str>) -> anyhow::Result<Value> {
    let keys = match key {
        Some(k) => vec![k.parse::<CacheKey>()?],
        None => CacheKey::ALL.to_vec(),
    };
    let mut report = serde_json::Map::new();
    let mut failed = 0;
    for key in keys {
        let outcome = match manager.warm(key) {
            Ok(()) => json!({ "ok": true, "status": manager.status(key) }),
            Err(e) => {
                error!(key = %key, error = %e, "warm failed");
                failed += 1;
                json!({ "ok": false, "error": e.to_string() })
            }
        };
        report.insert(key.name().to_string(), outcome);
    }
    info!(failed, "warm complete");
    Ok(Value::Object(report))
}

fn precompute(manager: &CacheManager) -> anyhow::Result<Value> {
    let bundle = manager.bundle()?;
    let classes: Vec<Value> = bundle
        .classes
        .values()
        .map(|c| {
            json!({
                "class": c.class,
                "label": c.label,
                "population": c.population,
                "samples": c.samples.len(),
                "mean_fiducials": c.mean_fiducials,
                "mean_intervals": c.mean_fiducials.intervals(),
            })
        })
        .collect();
    Ok(json!({
        "path": manager.waveform_store().artifact_path(),
        "classes": classes,
        "correlation_matrix": bundle.correlation_matrix,
        "explained_variance": bundle.pca_embedding.explained_variance,
        "metadata": bundle.metadata,
    }))
}

fn fiducials(manager: &CacheManager, class: i64, sample: usize) -> anyhow::Result<Value> {
    let bundle = manager.bundle()?;
    let Some(summary) = bundle.classes.get(&class) else {
        bail!("class {class} not present in bundle (have {:?})", bundle.classes.keys().collect::<Vec<_>>());
    };
    let Some(signal) = summary.samples.get(sample) else {
        bail!("class {class} has {} samples, index {sample} out of range", summary.samples.len());
    };
    let points = fiducial::detect(&fiducial::normalize(signal));
    Ok(json!({
        "class": class,
        "label": summary.label,
        "sample": sample,
        "fiducials": points,
        "intervals": points.intervals(),
    }))
}

fn run(args: &Args) -> anyhow::Result<Value> {
    let config = load_config(args)?;
    let manager = CacheManager::new(config);
    let output = match &args.command {
        Command::Warm { key } => warm(&manager, key.as_deref())?,
        Command::Precompute => precompute(&manager)?,
        Command::Status => json!({
            "health": manager.health(),
        }),
        Command::Invalidate { target } => {
            let target: InvalidationTarget = target.parse()?;
            let keys = manager.invalidate(target)?;
            json!({ "invalidated": keys })
        }
        Command::Fiducials { class, sample } => fiducials(&manager, *class, *sample)?,
    };
    if args.metrics {
        return Ok(json!({ "result": output, "metrics": manager.metrics_snapshot() }));
    }
    Ok(output)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let output = run(&args)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
