// End-to-end runs over real Motion-JPEG files with recording enabled

mod common;

use common::*;
use finscope_eye::mjpeg::MjpegReader;
use finscope_eye::recording::RecordingSession;
use finscope_eye::{
    CompletionReason, Detector, ErrorKind, Frame, MediaOpener, PipelineConfig, PipelineController, PipelineEvent,
    PipelineState, RecordingBackend, SourceOpener,
};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Write a clip of `frames` solid frames and return its path.
fn write_clip(dir: &Path, frames: u64, fps: f64) -> PathBuf {
    let mut session = RecordingSession::open(dir, "dive", RecordingBackend::Mjpeg, fps, 32, 24).unwrap();
    for i in 0..frames {
        session.write(&Frame::filled(32, 24, [(i * 20) as u8, 120, 200])).unwrap();
    }
    session.close().unwrap().output_path
}

fn recorded_frames(path: &Path) -> u64 {
    MjpegReader::scan(path).unwrap().frame_count
}

#[test]
fn test_probe_and_full_playback_with_recording() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let clip = write_clip(input.path(), 6, 200.0);

    let settings = test_settings(output.path());
    let opener = Arc::new(MediaOpener::new(&settings));
    let info = opener.media_info(&clip).unwrap();
    assert_eq!((info.frames, info.width, info.height), (6, 32, 24));
    assert_eq!(info.fps, 200.0);

    let descriptor = opener.probe(&clip).unwrap();
    assert_eq!(descriptor.total_frames(), Some(6));

    let detector: Arc<dyn Detector> = Arc::new(CountingDetector::default());
    let (controller, events) = PipelineController::new(Some(detector), opener, settings.clone());
    controller.start(PipelineConfig::from_settings(descriptor, true, &settings)).unwrap();

    let (frames, last) = drain_run(&events);
    assert_eq!(progress_indices(&frames), (0..6).collect::<Vec<_>>());
    let recording = match last {
        PipelineEvent::RunCompleted { frames: 6, reason: CompletionReason::EndOfStream, recording, .. } => recording,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(controller.wait(), PipelineState::Stopped);

    let recording = recording.expect("recording path");
    let name = recording.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("dive_"));
    assert!(name.contains("_detected_"));
    assert!(std::fs::metadata(&recording).unwrap().len() > 0);
    assert_eq!(recorded_frames(&recording), 6);
    assert_eq!(MjpegReader::scan(&recording).unwrap().fps, Some(200.0));
}

#[test]
fn test_stopped_run_releases_file_and_finalizes_recording() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let clip = write_clip(input.path(), 400, 100.0);

    let settings = test_settings(output.path());
    let opener = Arc::new(MediaOpener::new(&settings));
    let descriptor = opener.probe(&clip).unwrap();
    let detector: Arc<dyn Detector> = Arc::new(CountingDetector::default());
    let (controller, events) = PipelineController::new(Some(detector), opener, settings.clone());

    controller.start(PipelineConfig::from_settings(descriptor, true, &settings)).unwrap();
    for _ in 0..3 {
        next_frame_event(&events);
    }
    assert_eq!(controller.stop(), PipelineState::Stopped);

    // The input is released: it can be reopened for reading and writing
    MjpegReader::open(&clip).unwrap();
    OpenOptions::new().append(true).open(&clip).unwrap();

    let (frames, last) = drain_run(&events);
    let (processed, recording) = match last {
        PipelineEvent::RunCompleted { frames, reason: CompletionReason::Stopped, recording, .. } => (frames, recording),
        other => panic!("unexpected outcome {:?}", other),
    };
    assert!(processed >= 3 && processed < 400);
    assert!(frames.len() as u64 <= processed);

    let recording = recording.expect("recording path");
    assert_eq!(recorded_frames(&recording), processed);
}

#[test]
fn test_failed_run_keeps_flushed_recording() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let clip = write_clip(input.path(), 10, 500.0);

    let settings = test_settings(output.path());
    let opener = Arc::new(MediaOpener::new(&settings));
    let descriptor = opener.probe(&clip).unwrap();
    let detector: Arc<dyn Detector> = Arc::new(CountingDetector::failing_at(4));
    let (controller, events) = PipelineController::new(Some(detector), opener, settings.clone());

    controller.start(PipelineConfig::from_settings(descriptor, true, &settings)).unwrap();
    let (frames, last) = drain_run(&events);
    assert_eq!(frames.len(), 4);

    let recording = match last {
        PipelineEvent::RunFailed { kind: ErrorKind::Detection, frames: 4, recording, .. } => recording,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(controller.wait(), PipelineState::Failed);
    assert_eq!(recorded_frames(&recording.expect("recording path")), 4);
}

#[test]
fn test_no_recording_without_frames() {
    let output = tempfile::tempdir().unwrap();
    let settings = test_settings(output.path());
    let opener = Arc::new(FakeOpener::new(SourceScript::default()));
    let detector: Arc<dyn Detector> = Arc::new(CountingDetector::failing_at(0));
    let (controller, events) = PipelineController::new(Some(detector), opener, settings.clone());

    controller.start(PipelineConfig::from_settings(file_descriptor(5), true, &settings)).unwrap();
    let (_, last) = drain_run(&events);
    assert!(matches!(last, PipelineEvent::RunFailed { recording: None, .. }));
    assert_eq!(std::fs::read_dir(output.path()).unwrap().count(), 0);
}

#[test]
fn test_unwritable_output_fails_run() {
    let output = tempfile::tempdir().unwrap();
    // A file where the output directory should be
    let blocked = output.path().join("occupied");
    std::fs::write(&blocked, b"x").unwrap();

    let mut settings = test_settings(&blocked);
    settings.output_dir = blocked.clone();
    let opener = Arc::new(FakeOpener::new(SourceScript {
        file_fps: 500.0,
        ..SourceScript::default()
    }));
    let detector: Arc<dyn Detector> = Arc::new(CountingDetector::default());
    let (controller, events) = PipelineController::new(Some(detector), opener.clone(), settings.clone());

    controller.start(PipelineConfig::from_settings(file_descriptor(5), true, &settings)).unwrap();
    let (frames, last) = drain_run(&events);
    assert!(frames.is_empty());
    match last {
        PipelineEvent::RunFailed { kind: ErrorKind::WriterInit, cause, recording: None, .. } => {
            assert!(cause.contains("occupied"), "cause should name the directory: {}", cause);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(opener.handles.open_now(), 0);
}

#[test]
fn test_source_without_frame_rate_records_at_fallback() {
    let output = tempfile::tempdir().unwrap();
    let settings = test_settings(output.path());
    // The default script reports 0 fps for files
    let opener = Arc::new(FakeOpener::new(SourceScript::default()));
    let detector: Arc<dyn Detector> = Arc::new(CountingDetector::default());
    let (controller, events) = PipelineController::new(Some(detector), opener, settings.clone());

    controller.start(PipelineConfig::from_settings(file_descriptor(5), true, &settings)).unwrap();
    let (frames, last) = drain_run(&events);
    assert_eq!(frames.len(), 5);
    let recording = match last {
        PipelineEvent::RunCompleted { frames: 5, recording, .. } => recording.expect("recording path"),
        other => panic!("unexpected outcome {:?}", other),
    };

    let summary = MjpegReader::scan(&recording).unwrap();
    assert_eq!(summary.frame_count, 5);
    assert_eq!(summary.fps, Some(settings.device_fallback_fps));
}
