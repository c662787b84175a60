//! Streaming per-class statistics, per-sample features and correlation

use serde::{Deserialize, Serialize};

use super::fiducial::{self, Intervals};

/// Element-wise running mean / M2 (Welford), mergeable with Chan's formula
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunningStats {
    count: u64,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningStats {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; len],
            m2: vec![0.0; len],
        }
    }

    pub(crate) const fn count(&self) -> u64 {
        self.count
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn push(&mut self, row: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for ((mean, m2), &x) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(row) {
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += delta * (x - *mean);
        }
    }

    /// Fold `other` into `self`; the result equals pushing both streams
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn merge(&mut self, other: &Self) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            self.clone_from(other);
            return;
        }
        let (na, nb) = (self.count as f64, other.count as f64);
        let total = na + nb;
        for i in 0..self.mean.len() {
            let delta = other.mean[i] - self.mean[i];
            self.mean[i] += delta * nb / total;
            self.m2[i] += other.m2[i] + delta * delta * na * nb / total;
        }
        self.count += other.count;
    }

    pub(crate) fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Population standard deviation (ddof 0)
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn std(&self) -> Vec<f64> {
        if self.count == 0 {
            return vec![0.0; self.m2.len()];
        }
        let n = self.count as f64;
        self.m2.iter().map(|m2| (m2 / n).max(0.0).sqrt()).collect()
    }
}

/// Features of one sampled waveform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SampleFeatures {
    /// Peak-to-trough amplitude
    pub amplitude: f64,
    /// Sum of squares
    pub energy: f64,
    /// Sign changes after centering on the sample mean
    pub zero_crossings: u32,
    /// PR/QT/ST intervals of the min-max normalised sample
    pub intervals: Intervals,
}

impl SampleFeatures {
    /// Extract features from one waveform
    #[must_use]
    pub fn extract(signal: &[f64]) -> Self {
        let (min, max) = signal
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let amplitude = if signal.is_empty() { 0.0 } else { max - min };
        Self {
            amplitude,
            energy: signal.iter().map(|v| v * v).sum(),
            zero_crossings: zero_crossings(signal),
            intervals: fiducial::detect(&fiducial::normalize(signal)).intervals(),
        }
    }

    /// `[amplitude, energy, zero_crossings]`
    #[must_use]
    pub fn vector(&self) -> [f64; 3] {
        [self.amplitude, self.energy, f64::from(self.zero_crossings)]
    }
}

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

/// Count adjacent sign changes of `x - mean(x)` (a step through zero counts once per change)
#[allow(clippy::cast_precision_loss)]
pub(crate) fn zero_crossings(signal: &[f64]) -> u32 {
    if signal.is_empty() {
        return 0;
    }
    let mean = signal.iter().sum::<f64>() / signal.len() as f64;
    let changes = signal
        .windows(2)
        .filter(|w| sign(w[0] - mean) != sign(w[1] - mean))
        .count();
    u32::try_from(changes).unwrap_or(u32::MAX)
}

/// Pearson correlation; `None` if either input has zero variance
#[allow(clippy::cast_precision_loss)]
pub(crate) fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n == 0 {
        return None;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a[..n].iter().zip(&b[..n]) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

/// Symmetric correlation matrix over `series`; diagonal is 1
pub(crate) fn correlation_matrix(series: &[&[f64]]) -> Vec<Vec<Option<f64>>> {
    let n = series.len();
    let mut matrix = vec![vec![None; n]; n];
    for i in 0..n {
        matrix[i][i] = Some(1.0);
        for j in (i + 1)..n {
            let r = pearson(series[i], series[j]);
            matrix[i][j] = r;
            matrix[j][i] = r;
        }
    }
    matrix
}
