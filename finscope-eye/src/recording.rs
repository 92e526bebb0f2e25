//! Scoped video recording of annotated frames

use crate::config::RecordingBackend;
use crate::error::VisionError;
use crate::frame::Frame;
use crate::mjpeg::MjpegWriter;
use crate::source::{effective_fps, SourceDescriptor};
use crate::utils::create_unique_file;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Encoder behind a recording session.
pub trait VideoWriter: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), VisionError>;

    /// Flush and release the file. Called exactly once.
    fn finish(&mut self) -> Result<(), VisionError>;
}

impl VideoWriter for MjpegWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), VisionError> {
        self.append(frame)
    }

    fn finish(&mut self) -> Result<(), VisionError> {
        MjpegWriter::finish(self)
    }
}

#[cfg(feature = "opencv")]
struct OpenCvWriter {
    writer: opencv::videoio::VideoWriter,
}

#[cfg(feature = "opencv")]
impl OpenCvWriter {
    fn create(path: &Path, fps: f64, width: u32, height: u32) -> Result<Self, VisionError> {
        use opencv::prelude::*;
        use opencv::videoio::VideoWriter as CvWriter;

        let name = path
            .to_str()
            .ok_or_else(|| VisionError::WriterInit(format!("Non UTF-8 path {:?}", path)))?;
        let fourcc = CvWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = CvWriter::new(
            name,
            fourcc,
            fps,
            opencv::core::Size::new(width as i32, height as i32),
            true,
        )
        .map_err(|e| VisionError::WriterInit(format!("Failed to create {:?}: {}", path, e)))?;

        if !writer.is_opened()? {
            return Err(VisionError::WriterInit(format!("Writer for {:?} did not open", path)));
        }
        Ok(Self { writer })
    }
}

#[cfg(feature = "opencv")]
impl VideoWriter for OpenCvWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), VisionError> {
        use opencv::prelude::*;

        let mat = crate::source::opencv::frame_to_mat(frame)?;
        self.writer
            .write(&mat)
            .map_err(|e| VisionError::Write(format!("Failed to write frame: {}", e)))
    }

    fn finish(&mut self) -> Result<(), VisionError> {
        use opencv::prelude::*;

        self.writer
            .release()
            .map_err(|e| VisionError::Write(format!("Failed to release writer: {}", e)))
    }
}

fn file_extension(backend: RecordingBackend) -> &'static str {
    match backend {
        RecordingBackend::Mjpeg => "mjpeg",
        RecordingBackend::OpenCv => "mp4",
    }
}

/// Name stem of a recording: `<base>_detected` for files, `camera_recording` for devices.
pub fn recording_stem(source: &SourceDescriptor) -> String {
    match source {
        SourceDescriptor::File { .. } => format!("{}_detected", source.base_name()),
        SourceDescriptor::Device { .. } => format!("{}_recording", source.base_name()),
    }
}

/// What a closed session produced
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub output_path: PathBuf,
    pub frames: u64,
    pub duration: Duration,
}

/// One open output file, from creation to guaranteed close.
pub struct RecordingSession {
    writer: Box<dyn VideoWriter>,
    output_path: PathBuf,
    started_at: Instant,
    frames: u64,
    closed: bool,
}

impl RecordingSession {
    pub fn open(
        output_dir: &Path,
        stem: &str,
        backend: RecordingBackend,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Result<Self, VisionError> {
        if width == 0 || height == 0 {
            return Err(VisionError::WriterInit(format!("Invalid recording size {}x{}", width, height)));
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(VisionError::WriterInit(format!("Invalid recording frame rate {}", fps)));
        }

        let (file, output_path) = create_unique_file(output_dir, stem, file_extension(backend))
            .map_err(|e| VisionError::WriterInit(format!("Failed to create output in {:?}: {}", output_dir, e)))?;

        let writer: Box<dyn VideoWriter> = match backend {
            RecordingBackend::Mjpeg => Box::new(MjpegWriter::new(file, output_path.clone(), fps, width, height)),
            RecordingBackend::OpenCv => {
                // The reserved empty file is overwritten by the encoder
                drop(file);
                open_opencv_writer(&output_path, fps, width, height)?
            }
        };

        info!("Recording to {:?} ({}x{} @ {:.1}fps)", output_path, width, height, fps);
        Ok(Self {
            writer,
            output_path,
            started_at: Instant::now(),
            frames: 0,
            closed: false,
        })
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn write(&mut self, frame: &Frame) -> Result<(), VisionError> {
        if self.closed {
            return Err(VisionError::Write(format!("{:?} is already closed", self.output_path)));
        }
        self.writer.write_frame(frame)?;
        self.frames += 1;
        Ok(())
    }

    /// Flush and close. Later calls are no-ops returning the same summary.
    pub fn close(&mut self) -> Result<RecordingSummary, VisionError> {
        let summary = RecordingSummary {
            output_path: self.output_path.clone(),
            frames: self.frames,
            duration: self.started_at.elapsed(),
        };
        if self.closed {
            return Ok(summary);
        }
        self.closed = true;

        self.writer.finish()?;
        info!(
            "Recording finished: {:?} ({} frames, {:.1}s)",
            summary.output_path,
            summary.frames,
            summary.duration.as_secs_f64()
        );
        Ok(summary)
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Recording {:?} dropped without close, flushing", self.output_path);
            if let Err(e) = self.close() {
                error!("Failed to finalize {:?}: {}", self.output_path, e);
            }
        }
    }
}

#[cfg(feature = "opencv")]
fn open_opencv_writer(path: &Path, fps: f64, width: u32, height: u32) -> Result<Box<dyn VideoWriter>, VisionError> {
    Ok(Box::new(OpenCvWriter::create(path, fps, width, height)?))
}

#[cfg(not(feature = "opencv"))]
fn open_opencv_writer(path: &Path, _fps: f64, _width: u32, _height: u32) -> Result<Box<dyn VideoWriter>, VisionError> {
    let _ = std::fs::remove_file(path);
    Err(VisionError::WriterInit(
        "The opencv recording backend requires the `opencv` feature".to_string(),
    ))
}

/// Lazily opened recording owned by one pipeline run.
pub struct RecordingSink {
    output_dir: PathBuf,
    stem: String,
    backend: RecordingBackend,
    fps: f64,
    session: Option<RecordingSession>,
}

impl RecordingSink {
    /// `fallback_fps` stands in when the source reports no usable frame rate.
    pub fn new(output_dir: &Path, stem: String, backend: RecordingBackend, fps: f64, fallback_fps: f64) -> Self {
        let effective = effective_fps(fps, fallback_fps);
        if effective != fps {
            warn!("Source reported {} fps, recording {} at {} fps", fps, stem, effective);
        }
        Self {
            output_dir: output_dir.to_path_buf(),
            stem,
            backend,
            fps: effective,
            session: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.output_path())
    }

    /// Append a frame, opening the session sized to the first frame.
    pub fn write(&mut self, frame: &Frame) -> Result<(), VisionError> {
        let session = match self.session.take() {
            Some(session) => session,
            None => RecordingSession::open(
                &self.output_dir,
                &self.stem,
                self.backend,
                self.fps,
                frame.width(),
                frame.height(),
            )?,
        };
        self.session.insert(session).write(frame)
    }

    /// Close the session if one was opened.
    pub fn close(&mut self) -> Result<Option<RecordingSummary>, VisionError> {
        match self.session.take() {
            Some(mut session) => session.close().map(Some),
            None => Ok(None),
        }
    }
}
