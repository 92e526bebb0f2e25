//! OpenCV capture backends and Mat conversions

use super::device::CaptureDevice;
use super::file::{FiniteFileSource, FrameReader};
use super::{FrameSource, MediaInfo};
use crate::error::VisionError;
use crate::frame::Frame;
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_FRAME_HEIGHT,
        CAP_PROP_FRAME_WIDTH,
    },
};
use std::path::Path;
use tracing::debug;

/// Convert a BGR Mat from OpenCV into an RGB frame.
pub(crate) fn mat_to_frame(mat: &Mat) -> Result<Frame, VisionError> {
    let (width, height) = (mat.cols(), mat.rows());
    if width <= 0 || height <= 0 {
        return Err(VisionError::Read("Empty frame from OpenCV".to_string()));
    }
    if mat.channels() != 3 {
        return Err(VisionError::Read(format!("Unsupported channel count: {}", mat.channels())));
    }

    let mut rgb = Mat::default();
    imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
    let data = rgb.data_bytes()?.to_vec();
    Frame::from_rgb(width as u32, height as u32, data)
}

/// Convert an RGB frame into a BGR Mat for OpenCV writers.
pub(crate) fn frame_to_mat(frame: &Frame) -> Result<Mat, VisionError> {
    let flat = Mat::from_slice(frame.as_bytes())?;
    let rgb = flat.reshape(3, frame.height() as i32)?;
    let mut bgr = Mat::default();
    imgproc::cvt_color(&*rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr)
}

fn open_capture(path: &Path) -> Result<VideoCapture, VisionError> {
    let name = path
        .to_str()
        .ok_or_else(|| VisionError::SourceOpen(format!("Non UTF-8 path {:?}", path)))?;
    let capture = VideoCapture::from_file(name, CAP_ANY)
        .map_err(|e| VisionError::SourceOpen(format!("Failed to open {:?}: {}", path, e)))?;
    if !capture.is_opened()? {
        return Err(VisionError::SourceOpen(format!("{:?} failed to open", path)));
    }
    Ok(capture)
}

fn frame_count(capture: &VideoCapture) -> Result<u64, VisionError> {
    let count = capture.get(CAP_PROP_FRAME_COUNT)?;
    Ok(if count.is_finite() && count > 0.0 { count as u64 } else { 0 })
}

fn dimensions(capture: &VideoCapture) -> Result<(u32, u32), VisionError> {
    let width = capture.get(CAP_PROP_FRAME_WIDTH)?;
    let height = capture.get(CAP_PROP_FRAME_HEIGHT)?;
    Ok((width.max(0.0) as u32, height.max(0.0) as u32))
}

pub(crate) fn media_info(path: &Path) -> Result<MediaInfo, VisionError> {
    let capture = open_capture(path)?;
    let (width, height) = dimensions(&capture)?;
    Ok(MediaInfo {
        frames: frame_count(&capture)?,
        fps: capture.get(CAP_PROP_FPS)?.max(0.0),
        width,
        height,
    })
}

pub(crate) fn open_file(path: &Path, total_frames: u64, fps: f64) -> Result<Box<dyn FrameSource>, VisionError> {
    let capture = open_capture(path)?;
    let (width, height) = dimensions(&capture)?;
    let fps = if fps > 0.0 { fps } else { capture.get(CAP_PROP_FPS)?.max(0.0) };
    let reader = CaptureReader { capture };
    Ok(Box::new(FiniteFileSource::new(path, Box::new(reader), total_frames, fps, width, height)))
}

pub(crate) fn open_device(index: u32) -> Result<OpenCvDevice, VisionError> {
    let capture = VideoCapture::new(index as i32, CAP_ANY)
        .map_err(|e| VisionError::SourceOpen(format!("Failed to open camera {}: {}", index, e)))?;

    if !capture
        .is_opened()
        .map_err(|e| VisionError::SourceOpen(format!("Camera {} not opened: {}", index, e)))?
    {
        return Err(VisionError::SourceOpen(format!("Camera {} failed to open", index)));
    }

    Ok(OpenCvDevice {
        reader: CaptureReader { capture },
    })
}

struct CaptureReader {
    capture: VideoCapture,
}

impl FrameReader for CaptureReader {
    fn read_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        let mut mat = Mat::default();
        let grabbed = self
            .capture
            .read(&mut mat)
            .map_err(|e| VisionError::Read(format!("Failed to read frame: {}", e)))?;
        if !grabbed || mat.empty() {
            return Ok(None);
        }
        mat_to_frame(&mat).map(Some)
    }
}

impl Drop for CaptureReader {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            debug!("VideoCapture release failed: {}", e);
        }
    }
}

pub(crate) struct OpenCvDevice {
    reader: CaptureReader,
}

impl FrameReader for OpenCvDevice {
    fn read_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        self.reader.read_frame()
    }
}

impl CaptureDevice for OpenCvDevice {
    fn request_resolution(&mut self, width: u32, height: u32) -> bool {
        let capture = &mut self.reader.capture;
        let width_ok = capture.set(CAP_PROP_FRAME_WIDTH, width as f64).unwrap_or(false);
        let height_ok = capture.set(CAP_PROP_FRAME_HEIGHT, height as f64).unwrap_or(false);
        width_ok && height_ok && self.resolution() == (width, height)
    }

    fn resolution(&self) -> (u32, u32) {
        dimensions(&self.reader.capture).unwrap_or((0, 0))
    }

    fn reported_fps(&self) -> f64 {
        self.reader.capture.get(CAP_PROP_FPS).unwrap_or(0.0)
    }
}
