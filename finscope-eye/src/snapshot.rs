//! Still-image detection and saving annotated snapshots

use crate::error::VisionError;
use crate::frame::Frame;
use crate::mjpeg::encode_jpeg;
use crate::processing::{AnnotatedResult, DetectionAnnotator};
use crate::utils::create_unique_file;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

const SNAPSHOT_QUALITY: u8 = 95;

/// Image formats accepted for still-image detection
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];

/// What a snapshot captures; decides its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// Annotated still image: `<base>_result_<ts>.jpg`
    Result,
    /// Annotated frame of a video: `<base>_frame_<ts>.jpg`
    Frame,
    /// Annotated camera frame: `cam_<ts>.jpg`
    Camera,
}

impl SnapshotKind {
    fn stem(self, base: &str) -> String {
        match self {
            SnapshotKind::Result => format!("{}_result", base),
            SnapshotKind::Frame => format!("{}_frame", base),
            SnapshotKind::Camera => "cam".to_string(),
        }
    }
}

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Decode a still image into an RGB frame.
pub fn load_image(path: &Path) -> Result<Frame, VisionError> {
    if !is_image_path(path) {
        return Err(VisionError::SourceOpen(format!(
            "{:?} is not a supported image ({})",
            path,
            IMAGE_EXTENSIONS.join(", ")
        )));
    }
    let image = image::open(path)
        .map_err(|e| VisionError::SourceOpen(format!("Failed to open {:?}: {}", path, e)))?;
    Ok(Frame::from_rgb_image(image.to_rgb8()))
}

/// Run detection on one image file.
pub fn detect_image(
    annotator: &DetectionAnnotator,
    path: &Path,
    confidence_threshold: f32,
) -> Result<AnnotatedResult, VisionError> {
    let frame = load_image(path)?;
    let result = annotator.annotate(&frame, confidence_threshold)?;
    info!("{:?}: found {} objects", path, result.object_count);
    Ok(result)
}

/// Write `frame` as a JPEG under `output_dir`, never replacing an existing file.
pub fn save_snapshot(output_dir: &Path, base: &str, kind: SnapshotKind, frame: &Frame) -> Result<PathBuf, VisionError> {
    let encoded = encode_jpeg(frame, SNAPSHOT_QUALITY)?;
    let (mut file, path) = create_unique_file(output_dir, &kind.stem(base), "jpg")?;
    file.write_all(&encoded)?;
    file.sync_all()?;

    info!("Saved snapshot {:?}", path);
    Ok(path)
}
