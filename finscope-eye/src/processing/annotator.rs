//! Detection overlay rendering

use crate::error::VisionError;
use crate::frame::Frame;
use crate::models::{DetectedObject, Detector};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::sync::Arc;
use tracing::debug;

const BOX_THICKNESS: u32 = 2;
const LABEL_BAR_HEIGHT: u32 = 4;

const PALETTE: &[[u8; 3]] = &[
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
    [52, 69, 147],
    [100, 115, 255],
    [0, 24, 236],
    [132, 56, 255],
    [203, 56, 255],
    [255, 149, 200],
];

/// Annotated frame plus what was found in it
#[derive(Debug, Clone)]
pub struct AnnotatedResult {
    pub image: Frame,
    pub object_count: usize,
    pub detections: Vec<DetectedObject>,
}

/// Runs the detector and draws its findings onto a copy of the frame.
#[derive(Clone)]
pub struct DetectionAnnotator {
    detector: Arc<dyn Detector>,
}

impl DetectionAnnotator {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &Arc<dyn Detector> {
        &self.detector
    }

    /// Detect, keep candidates at or above `confidence_threshold`, and draw them.
    pub fn annotate(&self, frame: &Frame, confidence_threshold: f32) -> Result<AnnotatedResult, VisionError> {
        let detections: Vec<DetectedObject> = self
            .detector
            .detect(frame, confidence_threshold)
            .map_err(|e| match e {
                VisionError::Detection(_) => e,
                other => VisionError::Detection(other.to_string()),
            })?
            .into_iter()
            .filter(|d| d.confidence >= confidence_threshold)
            .collect();

        let mut canvas = frame.to_rgb_image();
        for detection in &detections {
            draw_detection(&mut canvas, detection);
        }
        debug!("Frame {}: {} objects", frame.sequence, detections.len());

        Ok(AnnotatedResult {
            image: Frame::from_rgb_image(canvas).with_sequence(frame.sequence),
            object_count: detections.len(),
            detections,
        })
    }
}

fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Clip a `(x, y, w, h)` box to the canvas, `None` if nothing is left.
fn clip_box(bbox: &(f32, f32, f32, f32), width: u32, height: u32) -> Option<(i32, i32, u32, u32)> {
    if !(bbox.0.is_finite() && bbox.1.is_finite() && bbox.2.is_finite() && bbox.3.is_finite()) {
        return None;
    }
    let x0 = bbox.0.max(0.0).round() as i64;
    let y0 = bbox.1.max(0.0).round() as i64;
    let x1 = (bbox.0 + bbox.2).min(width as f32).round() as i64;
    let y1 = (bbox.1 + bbox.3).min(height as f32).round() as i64;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32))
}

fn draw_detection(canvas: &mut RgbImage, detection: &DetectedObject) {
    let (width, height) = canvas.dimensions();
    let Some((x, y, w, h)) = clip_box(&detection.bbox, width, height) else {
        return;
    };
    let color = class_color(detection.class_id);

    for t in 0..BOX_THICKNESS {
        if w <= 2 * t || h <= 2 * t {
            break;
        }
        let rect = Rect::at(x + t as i32, y + t as i32).of_size(w - 2 * t, h - 2 * t);
        draw_hollow_rect_mut(canvas, rect, color);
    }

    // Confidence bar just above the box, inside the box when at the top edge
    let bar_width = ((w as f32 * detection.confidence.clamp(0.0, 1.0)).round() as u32).max(1);
    let bar_y = if y >= LABEL_BAR_HEIGHT as i32 { y - LABEL_BAR_HEIGHT as i32 } else { y };
    draw_filled_rect_mut(canvas, Rect::at(x, bar_y).of_size(bar_width, LABEL_BAR_HEIGHT), color);
}
