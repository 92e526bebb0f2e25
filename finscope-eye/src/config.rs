//! Configuration for finscope-eye

use crate::error::VisionError;
use crate::source::SourceDescriptor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Container used for recorded runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingBackend {
    /// Concatenated JPEG frames, no native dependencies
    Mjpeg,
    /// mp4v through OpenCV's VideoWriter (requires the `opencv` feature)
    OpenCv,
}

/// Process-wide settings, loaded once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where recordings and snapshots are written
    pub output_dir: PathBuf,
    /// Default detection confidence threshold
    pub confidence_threshold: f32,
    /// Detector model artifact; resolved next to the executable when unset
    pub model_path: Option<PathBuf>,
    /// Capacity of the pipeline → display event channel
    pub event_capacity: usize,
    /// Idle interval while a run is paused
    pub pause_poll_ms: u64,
    /// Subtracted from the nominal frame interval when pacing file playback
    pub throttle_overhead_ms: u64,
    /// Resolution requested from capture devices
    pub device_resolution: (u32, u32),
    /// Frame rate assumed when a device reports none
    pub device_fallback_fps: f64,
    /// Length of the throughput measurement window
    pub stats_window_ms: u64,
    pub recording_backend: RecordingBackend,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            confidence_threshold: 0.4,
            model_path: None,
            event_capacity: 8,
            pause_poll_ms: 100,
            throttle_overhead_ms: 10,
            device_resolution: (1280, 720),
            device_fallback_fps: 20.0,
            stats_window_ms: 1000,
            recording_backend: RecordingBackend::Mjpeg,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, VisionError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            info!("Settings file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)
            .map_err(|e| VisionError::Config(format!("Failed to parse {:?}: {}", path, e)))?;
        settings.validate().map_err(VisionError::Config)?;

        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        validate_threshold(self.confidence_threshold)?;

        if self.event_capacity == 0 {
            return Err("Event capacity must be at least 1".to_string());
        }

        if self.pause_poll_ms == 0 || self.stats_window_ms == 0 {
            return Err("Pause poll and stats window intervals must be non-zero".to_string());
        }

        if self.device_resolution.0 == 0 || self.device_resolution.1 == 0 {
            return Err("Device resolution must be non-zero".to_string());
        }

        if !(self.device_fallback_fps.is_finite() && self.device_fallback_fps > 0.0) {
            return Err("Device fallback fps must be positive".to_string());
        }

        if self.output_dir.as_os_str().is_empty() {
            return Err("Output directory must not be empty".to_string());
        }

        Ok(())
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn throttle_overhead(&self) -> Duration {
        Duration::from_millis(self.throttle_overhead_ms)
    }

    pub fn stats_window(&self) -> Duration {
        Duration::from_millis(self.stats_window_ms)
    }
}

/// Parameters of a single pipeline run. A new run requires a new config.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub source: SourceDescriptor,
    pub confidence_threshold: f32,
    pub record: bool,
    pub output_dir: PathBuf,
}

impl PipelineConfig {
    /// Build a run config from the process settings.
    pub fn from_settings(source: SourceDescriptor, record: bool, settings: &Settings) -> Self {
        Self {
            source,
            confidence_threshold: settings.confidence_threshold,
            record,
            output_dir: settings.output_dir.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        validate_threshold(self.confidence_threshold)?;

        if self.record && self.output_dir.as_os_str().is_empty() {
            return Err("Recording requires an output directory".to_string());
        }

        if let SourceDescriptor::File { fps, .. } = &self.source {
            if !fps.is_finite() || *fps < 0.0 {
                return Err(format!("Invalid source frame rate {}", fps));
            }
        }

        Ok(())
    }
}

fn validate_threshold(threshold: f32) -> Result<(), String> {
    if !(threshold > 0.0 && threshold < 1.0) {
        return Err(format!("Confidence threshold must be in (0, 1), got {}", threshold));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_source() -> SourceDescriptor {
        SourceDescriptor::File {
            path: PathBuf::from("clip.mjpeg"),
            total_frames: 10,
            fps: 25.0,
        }
    }

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.output_dir, PathBuf::from("output"));
        assert!((settings.confidence_threshold - 0.4).abs() < f32::EPSILON);
        assert_eq!(settings.device_resolution, (1280, 720));
        assert_eq!(settings.device_fallback_fps, 20.0);
        assert_eq!(settings.pause_poll_interval(), Duration::from_millis(100));
        assert_eq!(settings.recording_backend, RecordingBackend::Mjpeg);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_partial_toml() {
        let settings: Settings = toml::from_str(
            r#"
            output_dir = "captures"
            confidence_threshold = 0.6
            recording_backend = "opencv"
            "#,
        )
        .unwrap();
        assert_eq!(settings.output_dir, PathBuf::from("captures"));
        assert!((settings.confidence_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(settings.recording_backend, RecordingBackend::OpenCv);
        assert_eq!(settings.event_capacity, 8);
    }

    #[test]
    fn test_example_settings_file_matches_defaults() {
        let settings: Settings = toml::from_str(include_str!("../../finscope.example.toml")).unwrap();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.device_resolution, Settings::default().device_resolution);
        assert_eq!(settings.event_capacity, Settings::default().event_capacity);
    }

    #[test]
    fn test_settings_load_missing_file_uses_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/finscope.toml"))).unwrap();
        assert_eq!(settings.stats_window_ms, 1000);
    }

    #[test]
    fn test_settings_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finscope.toml");
        std::fs::write(&path, "confidence_threshold = \"high\"").unwrap();
        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(matches!(err, VisionError::Config(_)));
    }

    #[test]
    fn test_settings_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.event_capacity = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.device_fallback_fps = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.confidence_threshold = 1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_pipeline_config_threshold_bounds() {
        let settings = Settings::default();
        let mut config = PipelineConfig::from_settings(file_source(), false, &settings);
        assert!(config.validate().is_ok());

        config.confidence_threshold = 0.0;
        assert!(config.validate().is_err());
        config.confidence_threshold = 1.0;
        assert!(config.validate().is_err());
        config.confidence_threshold = f32::NAN;
        assert!(config.validate().is_err());
        config.confidence_threshold = 0.99;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_config_record_needs_output_dir() {
        let mut config = PipelineConfig::from_settings(file_source(), true, &Settings::default());
        config.output_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
