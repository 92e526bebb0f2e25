//! Locating and loading the detector model artifact

use super::Detector;
use crate::error::VisionError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Artifact looked up next to the running executable
pub const DEFAULT_MODEL_FILE: &str = "best.onnx";

/// Resolve the model path: explicit setting first, else beside the executable.
pub fn resolve_model_path(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_MODEL_FILE)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_FILE))
}

/// Load the detector once at startup.
///
/// A missing artifact is not fatal: the detector is reported unavailable and
/// runs fail to start with `ModelUnavailable`.
pub fn load_detector(path: &Path) -> Result<Option<Arc<dyn Detector>>, VisionError> {
    if !path.is_file() {
        warn!("Model file {:?} not found, detection unavailable", path);
        return Ok(None);
    }

    #[cfg(feature = "onnx")]
    {
        let model = super::YoloModel::new(path)?;
        tracing::info!("Detector ready with {} classes", model.class_names().len());
        Ok(Some(Arc::new(model)))
    }
    #[cfg(not(feature = "onnx"))]
    {
        warn!("Built without the `onnx` feature, cannot load {:?}; detection unavailable", path);
        Ok(None)
    }
}
