//! finscope-eye: frame pipeline for running an object detector over
//! still images, video files and live camera feeds
//!
//! A [`PipelineController`] owns one run at a time: it pulls frames from a
//! [`FrameSource`], annotates them through a shared [`Detector`], optionally
//! records the annotated stream, and reports every iteration on a bounded
//! event channel drained by the display layer.

pub mod config;
pub mod error;
pub mod frame;
pub mod mjpeg;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod recording;
pub mod snapshot;
pub mod source;
mod utils;

pub use config::{PipelineConfig, RecordingBackend, Settings};
pub use error::{ErrorKind, VisionError};
pub use frame::Frame;
pub use models::{DetectedObject, Detector};
pub use pipeline::{CompletionReason, PipelineController, PipelineEvent, PipelineState, Progress};
pub use processing::{AnnotatedResult, DetectionAnnotator, StatsTracker};
pub use source::{FrameSource, MediaInfo, MediaOpener, SourceDescriptor, SourceOpener, SourceProperties};
