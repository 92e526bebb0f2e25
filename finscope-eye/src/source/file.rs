//! Bounded playback of decodable media files

use super::{FrameSource, SourceProperties};
use crate::error::VisionError;
use crate::frame::Frame;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Container-level decoder used by [`FiniteFileSource`].
pub trait FrameReader: Send {
    /// Decode the next frame, `Ok(None)` when the container has no more.
    fn read_frame(&mut self) -> Result<Option<Frame>, VisionError>;
}

/// File source that ends after `total_frames` reads or on the first short read.
pub struct FiniteFileSource {
    path: PathBuf,
    reader: Box<dyn FrameReader>,
    total_frames: u64,
    fps: f64,
    width: u32,
    height: u32,
    delivered: u64,
    finished: bool,
}

impl FiniteFileSource {
    pub fn new(
        path: &Path,
        reader: Box<dyn FrameReader>,
        total_frames: u64,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            reader,
            total_frames,
            fps,
            width,
            height,
            delivered: 0,
            finished: false,
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl FrameSource for FiniteFileSource {
    fn properties(&self) -> SourceProperties {
        SourceProperties {
            total_frames: Some(self.total_frames),
            fps: self.fps,
            width: self.width,
            height: self.height,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        if self.finished || self.delivered >= self.total_frames {
            self.finished = true;
            return Ok(None);
        }

        match self.reader.read_frame() {
            Ok(Some(frame)) => {
                let frame = frame.with_sequence(self.delivered);
                self.delivered += 1;
                Ok(Some(frame))
            }
            Ok(None) => {
                self.finished = true;
                if self.delivered < self.total_frames {
                    warn!(
                        "{:?} ended after {} of {} frames",
                        self.path, self.delivered, self.total_frames
                    );
                }
                Ok(None)
            }
            Err(e) => {
                self.finished = true;
                Err(match e {
                    VisionError::Read(_) => e,
                    other => VisionError::Read(other.to_string()),
                })
            }
        }
    }
}

impl Drop for FiniteFileSource {
    fn drop(&mut self) {
        debug!("Closed {:?} after {} frames", self.path, self.delivered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedReader {
        script: VecDeque<Result<Option<Frame>, VisionError>>,
    }

    impl FrameReader for ScriptedReader {
        fn read_frame(&mut self) -> Result<Option<Frame>, VisionError> {
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    fn source(script: Vec<Result<Option<Frame>, VisionError>>, total: u64) -> FiniteFileSource {
        let reader = ScriptedReader { script: script.into() };
        FiniteFileSource::new(Path::new("clip.mjpeg"), Box::new(reader), total, 25.0, 4, 4)
    }

    fn frame() -> Result<Option<Frame>, VisionError> {
        Ok(Some(Frame::filled(4, 4, [0, 0, 0])))
    }

    #[test]
    fn test_stops_after_total_frames() {
        let mut src = source(vec![frame(), frame(), frame(), frame()], 2);
        assert_eq!(src.next_frame().unwrap().unwrap().sequence, 0);
        assert_eq!(src.next_frame().unwrap().unwrap().sequence, 1);
        assert!(src.next_frame().unwrap().is_none());
        assert!(src.next_frame().unwrap().is_none());
        assert_eq!(src.delivered(), 2);
    }

    #[test]
    fn test_short_read_ends_stream() {
        let mut src = source(vec![frame(), Ok(None), frame()], 5);
        assert!(src.next_frame().unwrap().is_some());
        assert!(src.next_frame().unwrap().is_none());
        // Deterministic: never resumes after a short read
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_decoder_failure_is_read_error() {
        let mut src = source(vec![Err(VisionError::Detection("boom".into()))], 5);
        let err = src.next_frame().unwrap_err();
        assert!(matches!(err, VisionError::Read(_)));
    }

    #[test]
    fn test_properties_report_bounded() {
        let src = source(vec![], 7);
        let props = src.properties();
        assert_eq!(props.total_frames, Some(7));
        assert_eq!(props.fps, 25.0);
    }
}
