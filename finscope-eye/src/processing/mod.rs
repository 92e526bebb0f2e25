//! Per-frame processing: detection overlays and throughput stats

mod annotator;
mod stats;

pub use annotator::{AnnotatedResult, DetectionAnnotator};
pub use stats::StatsTracker;
