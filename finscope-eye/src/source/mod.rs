//! Frame sources: bounded media files and unbounded capture devices

mod device;
mod file;
#[cfg(feature = "opencv")]
pub(crate) mod opencv;

pub use device::{effective_fps, CaptureDevice, InfiniteDeviceSource};
pub use file::{FiniteFileSource, FrameReader};

use crate::config::Settings;
use crate::error::VisionError;
use crate::frame::Frame;
use crate::mjpeg::{self, MjpegReader, DEFAULT_MJPEG_FPS};
use std::fmt;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Tag used in output names for device recordings and snapshots
pub const DEVICE_TAG: &str = "camera";

/// What a run reads frames from
#[derive(Debug, Clone, PartialEq)]
pub enum SourceDescriptor {
    /// A media file with a known frame count
    File {
        path: PathBuf,
        total_frames: u64,
        fps: f64,
    },
    /// A live capture device
    Device { index: u32 },
}

impl SourceDescriptor {
    /// Frame count, `None` for unbounded sources
    pub fn total_frames(&self) -> Option<u64> {
        match self {
            SourceDescriptor::File { total_frames, .. } => Some(*total_frames),
            SourceDescriptor::Device { .. } => None,
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, SourceDescriptor::File { .. })
    }

    /// Human-readable base for output file names
    pub fn base_name(&self) -> String {
        match self {
            SourceDescriptor::File { path, .. } => path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .filter(|stem| !stem.is_empty())
                .unwrap_or("video")
                .to_string(),
            SourceDescriptor::Device { .. } => DEVICE_TAG.to_string(),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDescriptor::File { path, .. } => write!(f, "file {}", path.display()),
            SourceDescriptor::Device { index } => write!(f, "device {}", index),
        }
    }
}

/// Stream properties reported by an open source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceProperties {
    pub total_frames: Option<u64>,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl SourceProperties {
    /// Nominal interval between frames, if the rate is usable.
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.fps.is_finite() && self.fps > 0.0).then(|| Duration::from_secs_f64(1.0 / self.fps))
    }
}

/// An open handle that yields frames until the end of the stream.
///
/// Dropping the handle releases the underlying file or device.
pub trait FrameSource: Send {
    fn properties(&self) -> SourceProperties;

    /// Next frame, `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, VisionError>;
}

/// Opens sources from descriptors. Injected into the pipeline controller.
pub trait SourceOpener: Send + Sync {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>, VisionError>;

    /// Inspect a media file and describe it as a bounded source.
    fn probe(&self, path: &Path) -> Result<SourceDescriptor, VisionError>;
}

/// Container metadata shown before playback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    pub frames: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl MediaInfo {
    pub fn duration(&self) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(self.frames as f64 / self.fps)
        } else {
            Duration::ZERO
        }
    }

    /// `mm:ss | <frames> frames | <fps> fps`
    pub fn summary(&self) -> String {
        let secs = self.duration().as_secs();
        format!(
            "{:02}:{:02} | {} frames | {:.1} fps | {}x{}",
            secs / 60,
            secs % 60,
            self.frames,
            self.fps,
            self.width,
            self.height
        )
    }
}

/// Production opener: Motion-JPEG files natively, everything else through OpenCV.
pub struct MediaOpener {
    device_resolution: (u32, u32),
    device_fallback_fps: f64,
}

impl MediaOpener {
    pub fn new(settings: &Settings) -> Self {
        Self {
            device_resolution: settings.device_resolution,
            device_fallback_fps: settings.device_fallback_fps,
        }
    }

    pub fn media_info(&self, path: &Path) -> Result<MediaInfo, VisionError> {
        if !path.is_file() {
            return Err(VisionError::SourceOpen(format!("{:?} is not a readable file", path)));
        }

        if mjpeg::is_mjpeg_path(path) {
            let summary = MjpegReader::scan(path)?;
            return Ok(MediaInfo {
                frames: summary.frame_count,
                fps: summary.fps.unwrap_or(DEFAULT_MJPEG_FPS),
                width: summary.width,
                height: summary.height,
            });
        }

        #[cfg(feature = "opencv")]
        {
            opencv::media_info(path)
        }
        #[cfg(not(feature = "opencv"))]
        {
            Err(unsupported_container(path))
        }
    }

    fn open_file(&self, path: &Path, total_frames: u64, fps: f64) -> Result<Box<dyn FrameSource>, VisionError> {
        if mjpeg::is_mjpeg_path(path) {
            let mut reader = MjpegReader::open(path)?;
            let first = reader
                .next_frame()
                .map_err(|e| VisionError::SourceOpen(format!("{:?} is not decodable: {}", path, e)))?;
            let fps = if fps > 0.0 {
                fps
            } else {
                reader.fps_hint().unwrap_or(DEFAULT_MJPEG_FPS)
            };
            let (width, height) = first.as_ref().map(|f| (f.width(), f.height())).unwrap_or((0, 0));
            let reader = PrimedReader { first, reader };
            return Ok(Box::new(FiniteFileSource::new(path, Box::new(reader), total_frames, fps, width, height)));
        }

        #[cfg(feature = "opencv")]
        {
            opencv::open_file(path, total_frames, fps)
        }
        #[cfg(not(feature = "opencv"))]
        {
            let _ = (total_frames, fps);
            Err(unsupported_container(path))
        }
    }

    fn open_device(&self, index: u32) -> Result<Box<dyn FrameSource>, VisionError> {
        #[cfg(feature = "opencv")]
        {
            let device = opencv::open_device(index)?;
            let source = InfiniteDeviceSource::open(
                index,
                Box::new(device),
                self.device_resolution,
                self.device_fallback_fps,
            )?;
            Ok(Box::new(source))
        }
        #[cfg(not(feature = "opencv"))]
        {
            let _ = (self.device_resolution, self.device_fallback_fps);
            Err(VisionError::SourceOpen(format!(
                "Device {} unavailable: capture devices require the `opencv` feature",
                index
            )))
        }
    }
}

impl SourceOpener for MediaOpener {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn FrameSource>, VisionError> {
        let source = match descriptor {
            SourceDescriptor::File { path, total_frames, fps } => self.open_file(path, *total_frames, *fps)?,
            SourceDescriptor::Device { index } => self.open_device(*index)?,
        };
        let props = source.properties();
        info!(
            "Opened {} ({}x{} @ {:.1}fps, frames: {})",
            descriptor,
            props.width,
            props.height,
            props.fps,
            props.total_frames.map(|n| n.to_string()).unwrap_or_else(|| "live".to_string())
        );
        Ok(source)
    }

    fn probe(&self, path: &Path) -> Result<SourceDescriptor, VisionError> {
        let info = self.media_info(path)?;
        Ok(SourceDescriptor::File {
            path: path.to_path_buf(),
            total_frames: info.frames,
            fps: info.fps,
        })
    }
}

#[cfg(not(feature = "opencv"))]
fn unsupported_container(path: &Path) -> VisionError {
    VisionError::SourceOpen(format!(
        "{:?}: only Motion-JPEG files are supported without the `opencv` feature",
        path
    ))
}

/// MJPEG reader whose first frame was decoded while opening.
struct PrimedReader<R> {
    first: Option<Frame>,
    reader: MjpegReader<R>,
}

impl<R: BufRead + Send> FrameReader for PrimedReader<R> {
    fn read_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        if let Some(frame) = self.first.take() {
            return Ok(Some(frame));
        }
        self.reader.next_frame()
    }
}
