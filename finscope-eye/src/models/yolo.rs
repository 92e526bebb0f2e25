//! YOLO object detection model

use super::{non_max_suppression, parse_class_names, DetectedObject, Detector};
use crate::error::VisionError;
use crate::frame::Frame;
use image::imageops::{self, FilterType};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use tracing::{debug, info};

const NMS_IOU_THRESHOLD: f32 = 0.45;
const MAX_DETECTIONS: usize = 300;

fn ort_error(context: &str, err: impl std::fmt::Display) -> VisionError {
    VisionError::Ort(format!("{}: {}", context, err))
}

/// YOLOv8-style ONNX model: output `[1, 4 + classes, anchors]`.
pub struct YoloModel {
    // ort sessions need exclusive access to run
    session: Mutex<Session>,
    input_size: (u32, u32),
    class_names: Vec<String>,
}

impl YoloModel {
    /// Create a new YOLO model
    pub fn new(model_path: &Path) -> Result<Self, VisionError> {
        let session = Session::builder()
            .map_err(|e| ort_error("Failed to create session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ort_error("Failed to set optimization level", e))?
            .commit_from_file(model_path)
            .map_err(|e| ort_error("Failed to load YOLO model", e))?;

        let class_names = session
            .metadata()
            .ok()
            .and_then(|meta| meta.custom("names").ok().flatten())
            .map(|raw| parse_class_names(&raw))
            .unwrap_or_default();

        info!("YOLO model loaded from {:?} ({} classes)", model_path, class_names.len());

        Ok(Self {
            session: Mutex::new(session),
            input_size: (640, 640),
            class_names,
        })
    }

    /// Resize to the network input and lay out as normalized CHW floats.
    fn preprocess(&self, frame: &Frame) -> Vec<f32> {
        let (width, height) = self.input_size;
        let resized = imageops::resize(&frame.to_rgb_image(), width, height, FilterType::Triangle);

        let plane = (width * height) as usize;
        let mut data = vec![0.0f32; plane * 3];
        for (i, pixel) in resized.pixels().enumerate() {
            data[i] = pixel[0] as f32 / 255.0;
            data[plane + i] = pixel[1] as f32 / 255.0;
            data[2 * plane + i] = pixel[2] as f32 / 255.0;
        }
        data
    }

    fn postprocess(&self, shape: &[i64], output: &[f32], frame: &Frame, threshold: f32) -> Result<Vec<DetectedObject>, VisionError> {
        if shape.len() != 3 || shape[1] < 5 {
            return Err(VisionError::Detection(format!("Unexpected YOLO output shape {:?}", shape)));
        }
        let attributes = shape[1] as usize;
        let anchors = shape[2] as usize;
        if output.len() < attributes * anchors {
            return Err(VisionError::Detection("YOLO output shorter than its shape".to_string()));
        }

        let scale_x = frame.width() as f32 / self.input_size.0 as f32;
        let scale_y = frame.height() as f32 / self.input_size.1 as f32;
        let at = |row: usize, anchor: usize| output[row * anchors + anchor];

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, confidence) = (4..attributes)
                .map(|row| (row - 4, at(row, anchor)))
                .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

            if confidence < threshold {
                continue;
            }

            let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
            candidates.push(DetectedObject {
                class_id,
                class_name: self
                    .class_names
                    .get(class_id)
                    .cloned()
                    .unwrap_or_else(|| format!("class {}", class_id)),
                confidence,
                bbox: ((cx - w / 2.0) * scale_x, (cy - h / 2.0) * scale_y, w * scale_x, h * scale_y),
            });
        }

        let mut detections = non_max_suppression(candidates, NMS_IOU_THRESHOLD);
        detections.truncate(MAX_DETECTIONS);
        Ok(detections)
    }
}

impl Detector for YoloModel {
    fn detect(&self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<DetectedObject>, VisionError> {
        debug!("Running YOLO detection on frame {}", frame.sequence);
        let (width, height) = self.input_size;
        let input = Tensor::from_array(([1usize, 3, height as usize, width as usize], self.preprocess(frame)))
            .map_err(|e| ort_error("Failed to create input tensor", e))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ort_error("YOLO inference failed", e))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ort_error("Failed to extract output tensor", e))?;

        self.postprocess(shape, data, frame, confidence_threshold)
    }

    fn class_names(&self) -> Vec<String> {
        self.class_names.clone()
    }
}
