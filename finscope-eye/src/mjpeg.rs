//! Motion-JPEG stream files: back-to-back baseline JPEG images.
//!
//! The first frame of a file written here carries a COM segment with the
//! nominal frame rate (`finscope fps=<rate>`); plain MJPEG streams without it
//! are still readable and fall back to the caller's default rate.

use crate::error::VisionError;
use crate::frame::Frame;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageFormat};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const COM: u8 = 0xFE;
const FPS_COMMENT_PREFIX: &str = "finscope fps=";

/// Rate assumed for MJPEG streams that do not record one
pub const DEFAULT_MJPEG_FPS: f64 = 25.0;

/// One undecoded JPEG image taken from the stream.
#[derive(Debug, Clone)]
pub struct JpegChunk {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Summary gathered by scanning a whole stream without decoding it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSummary {
    pub frame_count: u64,
    pub fps: Option<f64>,
    pub width: u32,
    pub height: u32,
}

pub fn is_mjpeg_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("mjpeg") || ext.eq_ignore_ascii_case("mjpg"))
        .unwrap_or(false)
}

/// Sequential reader over a Motion-JPEG stream.
pub struct MjpegReader<R> {
    inner: R,
    fps_hint: Option<f64>,
    frames_read: u64,
}

impl MjpegReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, VisionError> {
        let file = File::open(path)
            .map_err(|e| VisionError::SourceOpen(format!("Failed to open {:?}: {}", path, e)))?;
        Ok(Self::new(BufReader::new(file)))
    }

    /// Walk the whole file once to count frames.
    pub fn scan(path: &Path) -> Result<StreamSummary, VisionError> {
        let mut reader = Self::open(path)?;
        let mut summary = StreamSummary {
            frame_count: 0,
            fps: None,
            width: 0,
            height: 0,
        };

        while let Some(chunk) = reader.next_chunk()? {
            if summary.frame_count == 0 {
                summary.width = chunk.width;
                summary.height = chunk.height;
            }
            summary.frame_count += 1;
        }
        summary.fps = reader.fps_hint();

        debug!("Scanned {:?}: {:?}", path, summary);
        Ok(summary)
    }
}

impl<R: BufRead> MjpegReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            fps_hint: None,
            frames_read: 0,
        }
    }

    /// Frame rate recorded in the stream, available once the first frame was read
    pub fn fps_hint(&self) -> Option<f64> {
        self.fps_hint
    }

    /// Read and decode the next frame. `Ok(None)` on end of stream or on a truncated tail.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        let Some(chunk) = self.next_chunk()? else {
            return Ok(None);
        };

        let image = image::load_from_memory_with_format(&chunk.bytes, ImageFormat::Jpeg)
            .map_err(|e| VisionError::Read(format!("Corrupt JPEG frame {}: {}", self.frames_read - 1, e)))?;
        Ok(Some(Frame::from_rgb_image(image.to_rgb8()).with_sequence(self.frames_read - 1)))
    }

    /// Extract the next complete JPEG image without decoding it.
    pub fn next_chunk(&mut self) -> Result<Option<JpegChunk>, VisionError> {
        if !self.seek_start_of_image()? {
            return Ok(None);
        }

        let mut chunk = JpegChunk {
            bytes: vec![0xFF, SOI],
            width: 0,
            height: 0,
        };
        let mut pending: Option<u8> = None;

        loop {
            let marker = match pending.take() {
                Some(marker) => marker,
                None => match self.read_marker()? {
                    Some(marker) => marker,
                    None => return Ok(self.truncated()),
                },
            };

            match marker {
                EOI => {
                    chunk.bytes.extend_from_slice(&[0xFF, EOI]);
                    break;
                }
                0xD0..=0xD7 | 0x01 => chunk.bytes.extend_from_slice(&[0xFF, marker]),
                _ => {
                    let Some(payload) = self.read_segment()? else {
                        return Ok(self.truncated());
                    };
                    let length = (payload.len() + 2) as u16;
                    chunk.bytes.extend_from_slice(&[0xFF, marker]);
                    chunk.bytes.extend_from_slice(&length.to_be_bytes());
                    chunk.bytes.extend_from_slice(&payload);

                    if marker == COM {
                        self.parse_comment(&payload);
                    } else if is_start_of_frame(marker) && payload.len() >= 5 {
                        chunk.height = u16::from_be_bytes([payload[1], payload[2]]) as u32;
                        chunk.width = u16::from_be_bytes([payload[3], payload[4]]) as u32;
                    }

                    if marker == SOS {
                        match self.read_entropy_data(&mut chunk.bytes)? {
                            Some(next) => pending = Some(next),
                            None => return Ok(self.truncated()),
                        }
                    }
                }
            }
        }

        self.frames_read += 1;
        Ok(Some(chunk))
    }

    fn truncated(&self) -> Option<JpegChunk> {
        warn!("MJPEG stream truncated after {} complete frames", self.frames_read);
        None
    }

    fn parse_comment(&mut self, payload: &[u8]) {
        if self.fps_hint.is_some() {
            return;
        }
        if let Ok(text) = std::str::from_utf8(payload) {
            if let Some(rate) = text.strip_prefix(FPS_COMMENT_PREFIX) {
                self.fps_hint = rate.trim().parse::<f64>().ok().filter(|fps| *fps > 0.0);
            }
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>, VisionError> {
        let buf = self.inner.fill_buf().map_err(read_error)?;
        let Some(&byte) = buf.first() else {
            return Ok(None);
        };
        self.inner.consume(1);
        Ok(Some(byte))
    }

    /// Skip anything up to and including the next SOI marker.
    fn seek_start_of_image(&mut self) -> Result<bool, VisionError> {
        let mut previous_ff = false;
        while let Some(byte) = self.read_byte()? {
            if previous_ff && byte == SOI {
                return Ok(true);
            }
            previous_ff = byte == 0xFF;
        }
        Ok(false)
    }

    fn read_marker(&mut self) -> Result<Option<u8>, VisionError> {
        match self.read_byte()? {
            Some(0xFF) => {}
            Some(other) => {
                return Err(VisionError::Read(format!("Expected JPEG marker, found 0x{:02X}", other)));
            }
            None => return Ok(None),
        }
        // Fill bytes may precede the marker code
        loop {
            match self.read_byte()? {
                Some(0xFF) => continue,
                other => return Ok(other),
            }
        }
    }

    fn read_segment(&mut self) -> Result<Option<Vec<u8>>, VisionError> {
        let (Some(hi), Some(lo)) = (self.read_byte()?, self.read_byte()?) else {
            return Ok(None);
        };
        let length = u16::from_be_bytes([hi, lo]) as usize;
        if length < 2 {
            return Err(VisionError::Read(format!("Invalid JPEG segment length {}", length)));
        }

        let mut payload = vec![0u8; length - 2];
        match std::io::Read::read_exact(&mut self.inner, &mut payload) {
            Ok(()) => Ok(Some(payload)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(read_error(e)),
        }
    }

    /// Copy scan data into `out` and return the marker that terminates it.
    fn read_entropy_data(&mut self, out: &mut Vec<u8>) -> Result<Option<u8>, VisionError> {
        loop {
            let buf = self.inner.fill_buf().map_err(read_error)?;
            if buf.is_empty() {
                return Ok(None);
            }

            match buf.iter().position(|&b| b == 0xFF) {
                Some(pos) => {
                    out.extend_from_slice(&buf[..pos]);
                    self.inner.consume(pos + 1);
                }
                None => {
                    let len = buf.len();
                    out.extend_from_slice(buf);
                    self.inner.consume(len);
                    continue;
                }
            }

            match self.read_byte()? {
                None => return Ok(None),
                // Stuffed byte or restart marker: still scan data
                Some(code @ (0x00 | 0xD0..=0xD7)) => out.extend_from_slice(&[0xFF, code]),
                Some(0xFF) => {
                    // Fill byte before a marker
                    match self.read_marker_after_fill()? {
                        Some(code) => return Ok(Some(code)),
                        None => return Ok(None),
                    }
                }
                Some(code) => return Ok(Some(code)),
            }
        }
    }

    fn read_marker_after_fill(&mut self) -> Result<Option<u8>, VisionError> {
        loop {
            match self.read_byte()? {
                Some(0xFF) => continue,
                other => return Ok(other),
            }
        }
    }
}

fn is_start_of_frame(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

fn read_error(err: std::io::Error) -> VisionError {
    VisionError::Read(format!("MJPEG read failed: {}", err))
}

/// Encode one frame as a baseline JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, VisionError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode(
        frame.as_bytes(),
        frame.width(),
        frame.height(),
        ColorType::Rgb8,
    )?;
    Ok(bytes)
}

/// Insert the frame-rate comment right after the SOI marker.
fn with_fps_comment(jpeg: Vec<u8>, fps: f64) -> Vec<u8> {
    let text = format!("{}{:.3}", FPS_COMMENT_PREFIX, fps);
    let length = (text.len() + 2) as u16;

    let mut out = Vec::with_capacity(jpeg.len() + text.len() + 4);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, COM]);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(&jpeg[2..]);
    out
}

/// Appends frames to a Motion-JPEG file.
pub struct MjpegWriter {
    out: BufWriter<File>,
    path: PathBuf,
    fps: f64,
    width: u32,
    height: u32,
    quality: u8,
    frames: u64,
}

impl MjpegWriter {
    /// Wrap an already created, empty file.
    pub fn new(file: File, path: PathBuf, fps: f64, width: u32, height: u32) -> Self {
        Self {
            out: BufWriter::new(file),
            path,
            fps,
            width,
            height,
            quality: 90,
            frames: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn append(&mut self, frame: &Frame) -> Result<(), VisionError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(VisionError::Write(format!(
                "Frame size {}x{} does not match recording size {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let mut jpeg = encode_jpeg(frame, self.quality)
            .map_err(|e| VisionError::Write(format!("Failed to encode frame: {}", e)))?;
        if self.frames == 0 {
            jpeg = with_fps_comment(jpeg, self.fps);
        }

        self.out
            .write_all(&jpeg)
            .map_err(|e| VisionError::Write(format!("Failed to write {:?}: {}", self.path, e)))?;
        self.frames += 1;
        Ok(())
    }

    /// Flush buffered frames and sync the file to disk.
    pub fn finish(&mut self) -> Result<(), VisionError> {
        self.out
            .flush()
            .and_then(|_| self.out.get_ref().sync_all())
            .map_err(|e| VisionError::Write(format!("Failed to finalize {:?}: {}", self.path, e)))?;
        info!("Finalized {:?} ({} frames)", self.path, self.frames);
        Ok(())
    }
}
