// Throughput measurement against synthetic frame clocks

use finscope_eye::StatsTracker;
use proptest::prelude::*;
use std::time::{Duration, Instant};

fn feed(tracker: &mut StatsTracker, start: Instant, rate: f64, frames: u64) -> Vec<f64> {
    (1..=frames)
        .filter_map(|k| tracker.record_frame_at(start + Duration::from_secs_f64(k as f64 / rate)))
        .collect()
}

proptest! {
    #[test]
    fn prop_rate_matches_feed(rate in 5u32..120, windows in 1u64..4) {
        let start = Instant::now();
        let mut tracker = StatsTracker::starting_at(Duration::from_secs(1), start);
        let rates = feed(&mut tracker, start, rate as f64, rate as u64 * windows);

        prop_assert!(!rates.is_empty());
        for fps in rates {
            prop_assert!((fps - rate as f64).abs() <= rate as f64 * 0.02, "fps {} vs {}", fps, rate);
        }
    }

    #[test]
    fn prop_short_windows_track_rate(rate in 20u32..240, window_ms in 200u64..1000) {
        let start = Instant::now();
        let mut tracker = StatsTracker::starting_at(Duration::from_millis(window_ms), start);
        let rates = feed(&mut tracker, start, rate as f64, rate as u64 * 3);

        prop_assert!(!rates.is_empty());
        let last = tracker.fps().unwrap();
        // One frame of slack per window
        let slack = 1000.0 / window_ms as f64 + rate as f64 * 0.02;
        prop_assert!((last - rate as f64).abs() <= slack, "fps {} vs {}", last, rate);
    }
}

#[test]
fn test_stalled_source_reports_low_rate() {
    let start = Instant::now();
    let mut tracker = StatsTracker::starting_at(Duration::from_secs(1), start);
    for k in 1..=10 {
        tracker.record_frame_at(start + Duration::from_millis(k * 10));
    }
    // Long gap before the next frame closes the window
    let fps = tracker.record_frame_at(start + Duration::from_secs(2)).unwrap();
    assert!((fps - 5.5).abs() < 1e-9);
}
