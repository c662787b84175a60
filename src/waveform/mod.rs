//! ECG waveform precomputation
//!
//! Reduces up to four large fixed-width waveform exports into one compact,
//! typed [`WaveformBundle`]: per-class sampled beats, mean and standard
//! deviation waveforms, per-sample features, an inter-class correlation
//! matrix and a global 2-D PCA embedding.
//!
//! - [`WaveformEngine`] performs the reduction (pure function of file
//!   contents, seed and configuration)
//! - [`WaveformStore`] caches its output in memory and as a JSON bundle,
//!   regenerating only when the bundle is missing, stale or corrupt
//! - [`fiducial`] is the single-beat landmark detector, also usable on its own

mod bundle;
mod engine;
pub mod fiducial;
mod pca;
mod sampling;
mod source;
mod stats;
mod store;

pub use bundle::{
    AbsentSource, BundleMetadata, CorrelationMatrix, SourceUsage, WaveformBundle, WaveformClassBundle,
    SCHEMA_VERSION,
};
pub use engine::WaveformEngine;
pub use fiducial::{Fiducials, Intervals};
pub use pca::{PcaEmbedding, PcaPoint};
pub use stats::SampleFeatures;
pub use store::WaveformStore;

/// Samples per beat
pub const SIGNAL_LEN: usize = 187;

/// Fields per raw row (signal plus label)
pub const ROW_WIDTH: usize = SIGNAL_LEN + 1;

/// Bundle file name under the cache root
pub const BUNDLE_FILE_NAME: &str = "waveform_bundle.json";
