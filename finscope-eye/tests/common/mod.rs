//! Fakes shared by the pipeline integration tests

#![allow(dead_code)]

use crossbeam::channel::{Receiver, RecvTimeoutError};
use finscope_eye::{
    DetectedObject, Detector, Frame, FrameSource, PipelineEvent, Settings, SourceDescriptor, SourceOpener,
    SourceProperties, VisionError,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const WIDTH: u32 = 16;
pub const HEIGHT: u32 = 12;

/// Settings tuned for fast tests
pub fn test_settings(output_dir: &Path) -> Settings {
    Settings {
        output_dir: output_dir.to_path_buf(),
        event_capacity: 4,
        pause_poll_ms: 5,
        stats_window_ms: 50,
        ..Settings::default()
    }
}

pub fn file_descriptor(total_frames: u64) -> SourceDescriptor {
    SourceDescriptor::File {
        path: "/fake/reef.mjpeg".into(),
        total_frames,
        fps: 0.0,
    }
}

pub fn device_descriptor() -> SourceDescriptor {
    SourceDescriptor::Device { index: 0 }
}

/// Counts source handles so tests can check exclusivity and release.
#[derive(Debug, Default)]
pub struct Handles {
    open: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
}

impl Handles {
    pub fn open_now(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn lease(self: &Arc<Self>) -> Lease {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Lease(self.clone())
    }
}

struct Lease(Arc<Handles>);

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Behaviour of the sources a [`FakeOpener`] hands out
#[derive(Clone, Default)]
pub struct SourceScript {
    /// Delay inside every read
    pub read_delay: Duration,
    /// Each read waits for a token (or a disconnect) on this channel
    pub gate: Option<Receiver<()>>,
    /// Zero-based read index that fails with a read error
    pub fail_read_at: Option<u64>,
    /// Reject every open
    pub fail_open: bool,
    /// Nominal rate reported for files
    pub file_fps: f64,
}

pub struct FakeOpener {
    pub handles: Arc<Handles>,
    script: SourceScript,
}

impl FakeOpener {
    pub fn new(script: SourceScript) -> Self {
        Self {
            handles: Arc::new(Handles::default()),
            script,
        }
    }
}

impl SourceOpener for FakeOpener {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>, VisionError> {
        if self.script.fail_open {
            return Err(VisionError::SourceOpen(format!("{} cannot be opened", descriptor)));
        }
        let (total, fps) = match descriptor {
            SourceDescriptor::File { total_frames, .. } => (Some(*total_frames), self.script.file_fps),
            SourceDescriptor::Device { .. } => (None, 30.0),
        };
        Ok(Box::new(FakeSource {
            total,
            fps,
            next: 0,
            script: self.script.clone(),
            _lease: self.handles.lease(),
        }))
    }

    fn probe(&self, path: &Path) -> Result<SourceDescriptor, VisionError> {
        Ok(SourceDescriptor::File {
            path: path.to_path_buf(),
            total_frames: 10,
            fps: self.script.file_fps,
        })
    }
}

struct FakeSource {
    total: Option<u64>,
    fps: f64,
    next: u64,
    script: SourceScript,
    _lease: Lease,
}

impl FrameSource for FakeSource {
    fn properties(&self) -> SourceProperties {
        SourceProperties {
            total_frames: self.total,
            fps: self.fps,
            width: WIDTH,
            height: HEIGHT,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        if self.total.is_some_and(|total| self.next >= total) {
            return Ok(None);
        }
        if self.script.fail_read_at == Some(self.next) {
            return Err(VisionError::Read(format!("sensor glitch at frame {}", self.next)));
        }
        if let Some(gate) = &self.script.gate {
            let _ = gate.recv();
        }
        if !self.script.read_delay.is_zero() {
            thread::sleep(self.script.read_delay);
        }

        let shade = (self.next % 200) as u8;
        let frame = Frame::filled(WIDTH, HEIGHT, [shade, 40, 90]).with_sequence(self.next);
        self.next += 1;
        Ok(Some(frame))
    }
}

/// Finds one object per frame, optionally failing on one call.
#[derive(Default)]
pub struct CountingDetector {
    pub calls: AtomicU64,
    pub fail_at: Option<u64>,
}

impl CountingDetector {
    pub fn failing_at(call: u64) -> Self {
        Self {
            calls: AtomicU64::new(0),
            fail_at: Some(call),
        }
    }
}

pub fn fish(confidence: f32) -> DetectedObject {
    DetectedObject {
        class_id: 1,
        class_name: "clownfish".to_string(),
        confidence,
        bbox: (2.0, 2.0, 8.0, 6.0),
    }
}

impl Detector for CountingDetector {
    fn detect(&self, _frame: &Frame, _threshold: f32) -> Result<Vec<DetectedObject>, VisionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(call) {
            return Err(VisionError::Detection(format!("inference failed on call {}", call)));
        }
        Ok(vec![fish(0.9), fish(0.1)])
    }

    fn class_names(&self) -> Vec<String> {
        vec!["grouper".to_string(), "clownfish".to_string()]
    }
}

/// Collect events until the final one of the run, failing the test on timeout.
pub fn drain_run(events: &Receiver<PipelineEvent>) -> (Vec<PipelineEvent>, PipelineEvent) {
    let mut frames = Vec::new();
    loop {
        match events.recv_timeout(Duration::from_secs(10)) {
            Ok(event) if event.is_final() => return (frames, event),
            Ok(event) => frames.push(event),
            Err(RecvTimeoutError::Timeout) => panic!("run did not finish within 10s"),
            Err(RecvTimeoutError::Disconnected) => panic!("event channel closed"),
        }
    }
}

/// Wait for the next frame event, skipping nothing.
pub fn next_frame_event(events: &Receiver<PipelineEvent>) -> PipelineEvent {
    let event = events
        .recv_timeout(Duration::from_secs(10))
        .expect("expected a frame event within 10s");
    assert!(!event.is_final(), "run ended early: {:?}", event);
    event
}

/// Zero-based progress indices of frame events (bounded sources)
pub fn progress_indices(events: &[PipelineEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::FrameReady { progress, .. } => progress.map(|p| p.index),
            _ => None,
        })
        .collect()
}
