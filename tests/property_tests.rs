//! Property-based tests for precache
//!
//! - Fiducial landmarks keep their anatomical order on arbitrary beats
//! - Freshness is monotone in source and artifact timestamps
//! - Metrics counters sum exactly under concurrent increments
//! - Run with ProptestConfig::with_cases(100)

use precache::freshness::{self, Freshness, RawSource};
use precache::waveform::fiducial::{self, FLAT_RANGE};
use precache::waveform::SIGNAL_LEN;
use precache::{CacheKey, InvalidationTarget, MetricsSink};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Arbitrary beat with values in [0, 1]
fn arb_beat() -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(0.0f64..=1.0, SIGNAL_LEN)
}

/// Timestamp within a few days of the epoch offset
fn arb_time() -> impl Strategy<Value = SystemTime> {
    (1_600_000_000u64..1_600_500_000).prop_map(|s| UNIX_EPOCH + Duration::from_secs(s))
}

fn sources(times: &[SystemTime]) -> Vec<RawSource> {
    times
        .iter()
        .enumerate()
        .map(|(i, &t)| RawSource::new(format!("source-{i}.csv"), t, 1))
        .collect()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // ========================================================================
    // Fiducial Properties
    // ========================================================================

    /// Property: present landmarks are strictly ordered P < Q < R < S < T
    #[test]
    fn prop_fiducials_ordered(beat in arb_beat()) {
        let points = fiducial::detect(&fiducial::normalize(&beat));
        let present: Vec<usize> = [points.p, points.q, points.r, points.s, points.t]
            .into_iter()
            .flatten()
            .collect();
        prop_assert!(present.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(present.iter().all(|&i| i < SIGNAL_LEN));
        if points.t.is_some() {
            prop_assert!(points.s.is_some());
        }
    }

    /// Property: R is the first maximum of any non-flat beat
    #[test]
    fn prop_r_is_first_maximum(beat in arb_beat()) {
        let max = beat.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = beat.iter().copied().fold(f64::INFINITY, f64::min);
        let points = fiducial::detect(&beat);
        if max - min < FLAT_RANGE {
            prop_assert_eq!(points, fiducial::Fiducials::default());
        } else {
            let first = beat.iter().position(|&v| v >= max).unwrap();
            prop_assert_eq!(points.r, Some(first));
        }
    }

    /// Property: intervals are present only when both endpoints are
    #[test]
    fn prop_intervals_follow_points(beat in arb_beat()) {
        let points = fiducial::detect(&beat);
        let intervals = points.intervals();
        prop_assert_eq!(intervals.pr.is_some(), points.p.is_some() && points.r.is_some());
        prop_assert_eq!(intervals.qt.is_some(), points.q.is_some() && points.t.is_some());
        prop_assert_eq!(intervals.st.is_some(), points.s.is_some() && points.t.is_some());
    }

    /// Property: normalisation maps a non-constant beat onto [0, 1] exactly
    #[test]
    fn prop_normalize_unit_range(beat in arb_beat(), scale in 0.5f64..100.0, shift in -50.0f64..50.0) {
        let scaled: Vec<f64> = beat.iter().map(|v| v * scale + shift).collect();
        let normalized = fiducial::normalize(&scaled);
        prop_assert_eq!(normalized.len(), scaled.len());
        prop_assert!(normalized.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    // ========================================================================
    // Freshness Properties
    // ========================================================================

    /// Property: an artifact at least as new as every source is fresh
    #[test]
    fn prop_generation_stamp_is_fresh(times in proptest::collection::vec(arb_time(), 1..5)) {
        let sources = sources(&times);
        let stamp = freshness::generation_stamp(&sources);
        prop_assert_eq!(freshness::check(&sources, Some(stamp)), Freshness::Fresh);
    }

    /// Property: touching any source past the artifact makes it stale
    #[test]
    fn prop_touch_makes_stale(
        times in proptest::collection::vec(arb_time(), 1..5),
        which in 0usize..5,
        bump in 1u64..10_000,
    ) {
        let artifact = times.iter().copied().max().unwrap();
        let mut touched = times.clone();
        let i = which % touched.len();
        touched[i] = artifact + Duration::from_secs(bump);
        prop_assert_eq!(freshness::check(&sources(&touched), Some(artifact)), Freshness::Stale);
        prop_assert_eq!(freshness::check(&sources(&touched), None), Freshness::Missing);
    }

    // ========================================================================
    // Registry Properties
    // ========================================================================

    /// Property: key names parse back regardless of case and padding
    #[test]
    fn prop_key_parse_round_trip(index in 0usize..4, upper in any::<bool>(), pad in 0usize..3) {
        let key = CacheKey::ALL[index];
        let name = if upper { key.name().to_uppercase() } else { key.name().to_string() };
        let text = format!("{}{name}{}", " ".repeat(pad), " ".repeat(pad));
        prop_assert_eq!(text.parse::<CacheKey>().unwrap(), key);
        prop_assert_eq!(text.parse::<InvalidationTarget>().unwrap(), InvalidationTarget::Key(key));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Property: concurrent increments are never lost
    #[test]
    fn prop_counters_sum_under_contention(threads in 1usize..6, per_thread in 1u64..200) {
        let sink = Arc::new(MetricsSink::new());
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        sink.increment("cache_hits", &[("dataset", "transfers")]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let expected = per_thread * threads as u64;
        prop_assert_eq!(
            sink.snapshot().counter("cache_hits", &[("dataset", "transfers")]),
            expected
        );
    }
}
