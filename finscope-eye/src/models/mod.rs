//! Detector capability and model loading

mod locator;
#[cfg(feature = "onnx")]
mod yolo;

pub use locator::{load_detector, resolve_model_path, DEFAULT_MODEL_FILE};
#[cfg(feature = "onnx")]
pub use yolo::YoloModel;

use crate::error::VisionError;
use crate::frame::Frame;
use std::cmp::Ordering;

/// Detected object
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: (f32, f32, f32, f32), // x, y, width, height in frame pixels
}

/// Process-wide detection capability.
///
/// Implementations are not required to be reentrant: the pipeline controller
/// guarantees at most one active run, and therefore one caller, at a time.
pub trait Detector: Send + Sync {
    /// Detect objects at or above `confidence_threshold`.
    fn detect(&self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<DetectedObject>, VisionError>;

    /// Class labels known to the model
    fn class_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Intersection over union of two `(x, y, w, h)` boxes.
pub fn compute_iou(a: &(f32, f32, f32, f32), b: &(f32, f32, f32, f32)) -> f32 {
    let x1 = a.0.max(b.0);
    let y1 = a.1.max(b.1);
    let x2 = (a.0 + a.2).min(b.0 + b.2);
    let y2 = (a.1 + a.3).min(b.1 + b.3);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.2 * a.3 + b.2 * b.3 - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Class-wise greedy NMS; output is sorted by descending confidence.
pub fn non_max_suppression(mut detections: Vec<DetectedObject>, iou_threshold: f32) -> Vec<DetectedObject> {
    detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));

    let mut kept: Vec<DetectedObject> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && compute_iou(&k.bbox, &candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

/// Parse the `{0: 'name', 1: 'other'}` label map embedded in exported YOLO models.
///
/// Entries are split only on a comma outside quotes that is followed by
/// `<digits>:`, so labels may contain commas.
pub fn parse_class_names(raw: &str) -> Vec<String> {
    let body = raw.trim().trim_start_matches('{').trim_end_matches('}');
    let mut entries: Vec<(usize, String)> = split_entries(body)
        .into_iter()
        .filter_map(|entry| {
            let (id, name) = entry.split_once(':')?;
            let id = id.trim().parse::<usize>().ok()?;
            let name = name.trim().trim_matches(|c| c == '\'' || c == '"').to_string();
            Some((id, name))
        })
        .collect();
    entries.sort_by_key(|(id, _)| *id);
    entries.into_iter().map(|(_, name)| name).collect()
}

fn split_entries(body: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    // Quotes only open a label right after its `:`
    let mut after_colon = false;

    for (i, c) in body.char_indices() {
        match (quote, c) {
            (Some(open), _) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') if after_colon => quote = Some(c),
            (None, ',') if starts_entry(&body[i + 1..]) => {
                entries.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        if !c.is_whitespace() {
            after_colon = quote.is_none() && c == ':';
        }
    }
    entries.push(&body[start..]);
    entries
}

/// `rest` begins with optional whitespace, digits, then `:`
fn starts_entry(rest: &str) -> bool {
    let rest = rest.trim_start();
    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    digits > 0 && rest[digits..].trim_start().starts_with(':')
}
