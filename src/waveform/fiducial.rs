//! Fiducial-point detection on a single heartbeat
//!
//! Locates the P, Q, R, S and T landmarks of one beat and derives the PR, QT
//! and ST intervals. Every landmark is an `Option`: a point that cannot be
//! located stays `None` and so does every interval that depends on it. No
//! index is ever substituted.
//!
//! Detection rules (n = signal length, w = ⌊0.18·n⌋):
//!
//! | Point | Rule |
//! |-------|------|
//! | R | first global maximum |
//! | Q | minimum over `[R - w, R)` |
//! | S | minimum over `[R + 1, R + 1 + w)` |
//! | P | highest-prominence peak in `[0, min(Q or R, ⌊0.4·n⌋))`, prominence ≥ 1% of range |
//! | T | highest-prominence peak in `(S, n)`, prominence ≥ 3% of range |
//!
//! A signal whose range is below [`FLAT_RANGE`] is treated as a flat line and
//! yields no landmarks at all.

use serde::{Deserialize, Serialize};

/// Signals with a smaller max-min range carry no detectable beat
pub const FLAT_RANGE: f64 = 0.15;

const QS_WINDOW: f64 = 0.18;
const P_REGION: f64 = 0.40;
const P_MIN_PROMINENCE: f64 = 0.01;
const T_MIN_PROMINENCE: f64 = 0.03;

/// Strips shorter than this are not analysed as a beat
const MIN_BEAT_LEN: usize = 10;

/// Landmark indices of one beat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fiducials {
    /// P-wave peak
    pub p: Option<usize>,
    /// Q point
    pub q: Option<usize>,
    /// R peak
    pub r: Option<usize>,
    /// S point
    pub s: Option<usize>,
    /// T-wave peak
    pub t: Option<usize>,
}

/// Intervals derived from [`Fiducials`], in samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Intervals {
    /// R − P
    pub pr: Option<usize>,
    /// T − Q
    pub qt: Option<usize>,
    /// T − S
    pub st: Option<usize>,
}

fn span(start: Option<usize>, end: Option<usize>) -> Option<usize> {
    end?.checked_sub(start?)
}

impl Fiducials {
    /// Derived intervals; `None` wherever an operand is unavailable
    #[must_use]
    pub fn intervals(&self) -> Intervals {
        Intervals {
            pr: span(self.p, self.r),
            qt: span(self.q, self.t),
            st: span(self.s, self.t),
        }
    }

    /// Shift every available index by `offset`
    #[must_use]
    pub fn offset(self, offset: usize) -> Self {
        let shift = |i: Option<usize>| i.map(|i| i + offset);
        Self {
            p: shift(self.p),
            q: shift(self.q),
            r: shift(self.r),
            s: shift(self.s),
            t: shift(self.t),
        }
    }
}

fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

fn argmin(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b <= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Local maxima; a flat-topped peak reports the midpoint of its plateau
#[allow(clippy::float_cmp)]
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

/// Height of a peak above the higher of its two bounding minima
fn prominence(x: &[f64], peak: usize) -> f64 {
    let height = x[peak];
    let left_min = x[..=peak]
        .iter()
        .rev()
        .take_while(|&&v| v <= height)
        .fold(height, |m, &v| m.min(v));
    let right_min = x[peak..]
        .iter()
        .take_while(|&&v| v <= height)
        .fold(height, |m, &v| m.min(v));
    height - left_min.max(right_min)
}

/// Most prominent peak of `x` with prominence at least `min_prominence`
fn most_prominent_peak(x: &[f64], min_prominence: f64) -> Option<usize> {
    local_maxima(x)
        .into_iter()
        .map(|p| (p, prominence(x, p)))
        .filter(|&(_, prom)| prom >= min_prominence)
        .fold(None, |best: Option<(usize, f64)>, (p, prom)| match best {
            Some((_, b)) if b >= prom => best,
            _ => Some((p, prom)),
        })
        .map(|(p, _)| p)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn fraction_of(n: usize, fraction: f64) -> usize {
    (n as f64 * fraction).floor() as usize
}

fn range_of(signal: &[f64]) -> Option<(f64, f64)> {
    let (min, max) = signal
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    (min.is_finite() && max.is_finite()).then_some((min, max))
}

/// Detect fiducial points on one beat (expected min-max normalised)
#[must_use]
pub fn detect(signal: &[f64]) -> Fiducials {
    let Some((min, max)) = range_of(signal) else {
        return Fiducials::default();
    };
    let range = max - min;
    if range < FLAT_RANGE {
        return Fiducials::default();
    }

    let n = signal.len();
    let window = fraction_of(n, QS_WINDOW);
    let Some(r) = argmax(signal) else {
        return Fiducials::default();
    };

    let q_start = r.saturating_sub(window);
    let q = argmin(&signal[q_start..r]).map(|i| q_start + i);

    let s_start = r + 1;
    let s_end = (s_start + window).min(n);
    let s = (s_start < s_end)
        .then(|| argmin(&signal[s_start..s_end]))
        .flatten()
        .map(|i| s_start + i);

    let p_end = q.unwrap_or(r).min(fraction_of(n, P_REGION));
    let p = most_prominent_peak(&signal[..p_end], P_MIN_PROMINENCE * range);

    let t = s.and_then(|s| {
        let t_start = s + 1;
        (t_start < n)
            .then(|| most_prominent_peak(&signal[t_start..], T_MIN_PROMINENCE * range))
            .flatten()
            .map(|i| t_start + i)
    });

    Fiducials {
        p,
        q,
        r: Some(r),
        s,
        t,
    }
}

/// Min-max scale to `[0, 1]`; a constant signal is returned unchanged
#[must_use]
pub fn normalize(signal: &[f64]) -> Vec<f64> {
    match range_of(signal) {
        Some((min, max)) if max > min => signal.iter().map(|v| (v - min) / (max - min)).collect(),
        _ => signal.to_vec(),
    }
}

/// Detect fiducials on each beat of a concatenated strip
///
/// The strip is cut into `beat_len` windows (a trailing partial window is kept
/// only if the strip is shorter than one beat). Indices are offset into strip
/// coordinates.
#[must_use]
pub fn detect_strip(strip: &[f64], beat_len: usize) -> Vec<Fiducials> {
    if beat_len == 0 {
        return Vec::new();
    }
    let beats = (strip.len() / beat_len).max(1);
    (0..beats)
        .filter_map(|i| {
            let start = i * beat_len;
            let end = (start + beat_len).min(strip.len());
            (end.saturating_sub(start) >= MIN_BEAT_LEN)
                .then(|| detect(&strip[start..end]).offset(start))
        })
        .collect()
}
