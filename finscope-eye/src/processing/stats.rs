//! Throughput measurement for live sources

use std::time::{Duration, Instant};

/// Frame counter over a fixed window.
///
/// Each time a window elapses the rate `frames / elapsed_seconds` is
/// published and the counter starts over.
#[derive(Debug, Clone)]
pub struct StatsTracker {
    window: Duration,
    window_start: Instant,
    frames_in_window: u64,
    total_frames: u64,
    last_fps: Option<f64>,
}

impl StatsTracker {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    /// Tracker whose first window opens at `start`.
    pub fn starting_at(window: Duration, start: Instant) -> Self {
        Self {
            window,
            window_start: start,
            frames_in_window: 0,
            total_frames: 0,
            last_fps: None,
        }
    }

    pub fn record_frame(&mut self) -> Option<f64> {
        self.record_frame_at(Instant::now())
    }

    /// Count a frame seen at `now`; returns the new rate when a window closes.
    pub fn record_frame_at(&mut self, now: Instant) -> Option<f64> {
        self.frames_in_window += 1;
        self.total_frames += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window || elapsed.is_zero() {
            return None;
        }

        let fps = self.frames_in_window as f64 / elapsed.as_secs_f64();
        self.frames_in_window = 0;
        self.window_start = now;
        self.last_fps = Some(fps);
        Some(fps)
    }

    /// Most recently published rate
    pub fn fps(&self) -> Option<f64> {
        self.last_fps
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }
}
