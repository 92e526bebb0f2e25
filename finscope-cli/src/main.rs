// FinScope command line interface
// Runs the detector over images, video files and live cameras

mod display;
mod instance;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use display::{command_channel, run_session, SnapshotTarget};
use finscope_eye::models::{load_detector, resolve_model_path};
use finscope_eye::snapshot::{detect_image, save_snapshot, SnapshotKind};
use finscope_eye::source::DEVICE_TAG;
use finscope_eye::{
    DetectionAnnotator, Detector, MediaOpener, PipelineConfig, PipelineController, Settings, SourceDescriptor,
};
use instance::InstanceGuard;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const INSTANCE_NAME: &str = "finscope";

#[derive(Parser)]
#[command(name = "finscope")]
#[command(about = "Object detection over images, videos and live cameras", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML); defaults are used when absent
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Directory for recordings and snapshots
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Detection confidence threshold in (0, 1)
    #[arg(long, global = true)]
    conf: Option<f32>,

    /// Detector model file
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace), overridden by RUST_LOG
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect objects in still images
    Image {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Save annotated results to the output directory
        #[arg(long)]
        save: bool,
    },

    /// Run detection over a video file
    Video {
        path: PathBuf,

        /// Record the annotated video
        #[arg(long)]
        record: bool,
    },

    /// Run detection over a live camera
    Camera {
        /// Capture device index
        #[arg(long, default_value = "0")]
        index: u32,

        /// Record the annotated stream
        #[arg(long)]
        record: bool,
    },

    /// Show frame count, rate and size of a video file
    Probe { path: PathBuf },

    /// List the classes the loaded model detects
    Classes,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    // Claimed before any pipeline state exists
    let _guard = match InstanceGuard::acquire(INSTANCE_NAME).context("Failed to claim the instance lock")? {
        Some(guard) => guard,
        None => {
            error!("Another finscope instance is already running");
            std::process::exit(1);
        }
    };

    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::Image { paths, save } => run_images(&settings, &paths, save),
        Commands::Video { path, record } => run_video(settings, path, record),
        Commands::Camera { index, record } => run_camera(settings, index, record),
        Commands::Probe { path } => {
            let info = MediaOpener::new(&settings).media_info(&path)?;
            println!("{} | {}", path.display(), info.summary());
            Ok(())
        }
        Commands::Classes => {
            let detector = require_detector(load_model(&settings)?)?;
            let names = detector.class_names();
            if names.is_empty() {
                println!("The model does not list its classes");
            }
            for (id, name) in names.iter().enumerate() {
                println!("{:>3}  {}", id, name);
            }
            Ok(())
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    if let Some(dir) = &cli.output_dir {
        settings.output_dir = dir.clone();
    }
    if let Some(conf) = cli.conf {
        settings.confidence_threshold = conf;
    }
    if let Some(model) = &cli.model {
        settings.model_path = Some(model.clone());
    }

    if let Err(e) = settings.validate() {
        bail!("Invalid settings: {}", e);
    }
    Ok(settings)
}

fn load_model(settings: &Settings) -> Result<Option<Arc<dyn Detector>>> {
    let path = resolve_model_path(settings.model_path.as_deref());
    info!("Loading detector from {:?}", path);
    load_detector(&path).with_context(|| format!("Failed to load model {:?}", path))
}

fn require_detector(detector: Option<Arc<dyn Detector>>) -> Result<Arc<dyn Detector>> {
    detector.context("No detector model available; pass --model or place best.onnx next to the executable")
}

fn run_images(settings: &Settings, paths: &[PathBuf], save: bool) -> Result<()> {
    let annotator = DetectionAnnotator::new(require_detector(load_model(settings)?)?);

    let mut failures = 0;
    for (i, path) in paths.iter().enumerate() {
        println!("[{}/{}] {}", i + 1, paths.len(), path.display());
        let result = match detect_image(&annotator, path, settings.confidence_threshold) {
            Ok(result) => result,
            Err(e) => {
                error!("{}: {}", path.display(), e);
                failures += 1;
                continue;
            }
        };

        println!("  found {} objects", result.object_count);
        for detection in &result.detections {
            println!(
                "  - {} {:.0}% at ({:.0}, {:.0}) {:.0}x{:.0}",
                detection.class_name,
                detection.confidence * 100.0,
                detection.bbox.0,
                detection.bbox.1,
                detection.bbox.2,
                detection.bbox.3
            );
        }

        if save {
            let base = path.file_stem().and_then(|s| s.to_str()).unwrap_or("image");
            let saved = save_snapshot(&settings.output_dir, base, SnapshotKind::Result, &result.image)?;
            println!("  saved {}", saved.display());
        }
    }

    if failures > 0 {
        bail!("{} of {} images failed", failures, paths.len());
    }
    Ok(())
}

fn run_video(settings: Settings, path: PathBuf, record: bool) -> Result<()> {
    let opener = Arc::new(MediaOpener::new(&settings));
    let info = opener
        .media_info(&path)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    println!("{} | {}", path.display(), info.summary());

    let source = SourceDescriptor::File {
        path,
        total_frames: info.frames,
        fps: info.fps,
    };
    let snapshots = SnapshotTarget {
        output_dir: settings.output_dir.clone(),
        base: source.base_name(),
        kind: SnapshotKind::Frame,
    };
    run_pipeline(settings, opener, source, record, snapshots)
}

fn run_camera(settings: Settings, index: u32, record: bool) -> Result<()> {
    let opener = Arc::new(MediaOpener::new(&settings));
    let snapshots = SnapshotTarget {
        output_dir: settings.output_dir.clone(),
        base: DEVICE_TAG.to_string(),
        kind: SnapshotKind::Camera,
    };
    run_pipeline(settings, opener, SourceDescriptor::Device { index }, record, snapshots)
}

fn run_pipeline(
    settings: Settings,
    opener: Arc<MediaOpener>,
    source: SourceDescriptor,
    record: bool,
    snapshots: SnapshotTarget,
) -> Result<()> {
    let detector = load_model(&settings)?;
    if detector.is_none() {
        warn!("Detector unavailable, the run will be refused");
    }

    let config = PipelineConfig::from_settings(source, record, &settings);
    let (controller, events) = PipelineController::new(detector, opener, settings);
    run_session(&controller, &events, command_channel(), config, snapshots)
}
