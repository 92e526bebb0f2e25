//! Unbounded capture from live devices

use super::file::FrameReader;
use super::{FrameSource, SourceProperties};
use crate::error::VisionError;
use crate::frame::Frame;
use tracing::{info, warn};

/// Driver-level handle to a capture device.
pub trait CaptureDevice: FrameReader {
    /// Ask for a capture resolution; `false` if the driver rejected it.
    fn request_resolution(&mut self, width: u32, height: u32) -> bool;

    /// Resolution the device is actually delivering
    fn resolution(&self) -> (u32, u32);

    /// Frame rate as reported by the driver, possibly zero or NaN
    fn reported_fps(&self) -> f64;
}

/// Substitute `fallback` for a missing or nonsensical device frame rate.
pub fn effective_fps(reported: f64, fallback: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 {
        reported
    } else {
        fallback
    }
}

/// Live source; only ends via stop requests or hard read failures.
pub struct InfiniteDeviceSource {
    index: u32,
    device: Box<dyn CaptureDevice>,
    fps: f64,
    width: u32,
    height: u32,
    sequence: u64,
}

impl InfiniteDeviceSource {
    /// Negotiate resolution and frame rate on a freshly opened device.
    pub fn open(
        index: u32,
        mut device: Box<dyn CaptureDevice>,
        requested: (u32, u32),
        fallback_fps: f64,
    ) -> Result<Self, VisionError> {
        if !device.request_resolution(requested.0, requested.1) {
            warn!(
                "Device {} rejected {}x{}, using its default resolution",
                index, requested.0, requested.1
            );
        }

        let (width, height) = device.resolution();
        if width == 0 || height == 0 {
            return Err(VisionError::SourceOpen(format!(
                "Device {} reports an invalid resolution {}x{}",
                index, width, height
            )));
        }
        if (width, height) != requested {
            info!("Device {} delivering {}x{}", index, width, height);
        }

        let reported = device.reported_fps();
        let fps = effective_fps(reported, fallback_fps);
        if fps != reported {
            warn!("Device {} reported {} fps, assuming {}", index, reported, fps);
        }

        Ok(Self {
            index,
            device,
            fps,
            width,
            height,
            sequence: 0,
        })
    }
}

impl FrameSource for InfiniteDeviceSource {
    fn properties(&self) -> SourceProperties {
        SourceProperties {
            total_frames: None,
            fps: self.fps,
            width: self.width,
            height: self.height,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        match self.device.read_frame() {
            Ok(Some(frame)) => {
                let frame = frame.with_sequence(self.sequence);
                self.sequence += 1;
                Ok(Some(frame))
            }
            // A live device has no natural end
            Ok(None) => Err(VisionError::Read(format!(
                "Device {} stopped delivering frames after {}",
                self.index, self.sequence
            ))),
            Err(VisionError::Read(msg)) => Err(VisionError::Read(msg)),
            Err(other) => Err(VisionError::Read(other.to_string())),
        }
    }
}

impl Drop for InfiniteDeviceSource {
    fn drop(&mut self) {
        info!("Released device {} after {} frames", self.index, self.sequence);
    }
}
