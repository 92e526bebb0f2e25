//! Error types for finscope-eye

use thiserror::Error;

/// Coarse classification of a [`VisionError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SourceOpen,
    ModelUnavailable,
    Read,
    Detection,
    WriterInit,
    Write,
    AlreadyActive,
    Config,
    Io,
}

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Source open error: {0}")]
    SourceOpen(String),

    #[error("Detector model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Frame read error: {0}")]
    Read(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Recording init error: {0}")]
    WriterInit(String),

    #[error("Recording write error: {0}")]
    Write(String),

    #[error("A pipeline run is already active (run #{0})")]
    AlreadyActive(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCv(String),

    #[cfg(feature = "onnx")]
    #[error("ONNX Runtime error: {0}")]
    Ort(String),
}

impl VisionError {
    /// Classify the error for callers that branch on the failure category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VisionError::SourceOpen(_) => ErrorKind::SourceOpen,
            VisionError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            VisionError::Read(_) => ErrorKind::Read,
            VisionError::Detection(_) => ErrorKind::Detection,
            VisionError::WriterInit(_) => ErrorKind::WriterInit,
            VisionError::Write(_) => ErrorKind::Write,
            VisionError::AlreadyActive(_) => ErrorKind::AlreadyActive,
            VisionError::Config(_) => ErrorKind::Config,
            VisionError::Io(_) | VisionError::Image(_) => ErrorKind::Io,
            #[cfg(feature = "opencv")]
            VisionError::OpenCv(_) => ErrorKind::Io,
            #[cfg(feature = "onnx")]
            VisionError::Ort(_) => ErrorKind::Detection,
        }
    }

    /// Whether this error prevents a run from being started at all.
    pub fn is_start_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SourceOpen | ErrorKind::ModelUnavailable | ErrorKind::AlreadyActive | ErrorKind::Config
        )
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for VisionError {
    fn from(err: opencv::Error) -> Self {
        VisionError::OpenCv(err.message)
    }
}
