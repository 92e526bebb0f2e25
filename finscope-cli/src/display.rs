//! Display layer: the single consumer of pipeline events
//!
//! Everything shown to the operator happens on the thread that calls
//! [`run_session`]. Operator input arrives as [`Command`]s over a channel.

use anyhow::{bail, Result};
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use finscope_eye::frame::Frame;
use finscope_eye::snapshot::{save_snapshot, SnapshotKind};
use finscope_eye::{CompletionReason, PipelineConfig, PipelineController, PipelineEvent, PipelineState};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Operator requests forwarded to the display loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TogglePause,
    Snapshot,
    Stop,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "p" | "pause" | "resume" => Some(Command::TogglePause),
            "s" | "snap" | "snapshot" => Some(Command::Snapshot),
            "q" | "quit" | "stop" => Some(Command::Stop),
            _ => None,
        }
    }
}

/// Wire Ctrl+C and stdin into one command channel.
pub fn command_channel() -> Receiver<Command> {
    let (tx, rx) = channel::unbounded();

    let ctrlc_tx = tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Command::Stop);
    }) {
        warn!("Failed to install Ctrl+C handler: {}", e);
    }

    spawn_stdin_reader(tx);
    rx
}

fn spawn_stdin_reader(tx: Sender<Command>) {
    let spawned = thread::Builder::new().name("finscope-stdin".to_string()).spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match Command::parse(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => println!("Unknown command {:?} (p = pause/resume, s = snapshot, q = stop)", line.trim()),
            }
        }
    });
    if let Err(e) = spawned {
        warn!("Operator commands unavailable: {}", e);
    }
}

/// Where and how snapshots of the current run are named
#[derive(Debug, Clone)]
pub struct SnapshotTarget {
    pub output_dir: PathBuf,
    pub base: String,
    pub kind: SnapshotKind,
}

/// Start a run and drain its events until it ends.
pub fn run_session(
    controller: &PipelineController,
    events: &Receiver<PipelineEvent>,
    commands: Receiver<Command>,
    config: PipelineConfig,
    snapshots: SnapshotTarget,
) -> Result<()> {
    let run_id = controller.start(config)?;
    println!("Running (p = pause/resume, s = snapshot, q = stop, Ctrl+C = stop)");

    let mut commands = commands;
    let mut last_frame: Option<Frame> = None;
    let mut last_report: Option<Instant> = None;

    let outcome = loop {
        select! {
            recv(events) -> event => {
                let Ok(event) = event else {
                    bail!("Event channel closed before run #{} finished", run_id);
                };
                if event.run_id() != run_id {
                    continue;
                }
                match event {
                    PipelineEvent::FrameReady { image, object_count, progress, fps, .. } => {
                        let due = last_report.map_or(true, |at| at.elapsed() >= REPORT_INTERVAL);
                        let last = progress.is_some_and(|p| p.index + 1 == p.total);
                        match (progress, fps) {
                            (Some(p), _) if due || last => {
                                info!("Frame {}/{} | objects: {}", p.index + 1, p.total, object_count);
                                last_report = Some(Instant::now());
                            }
                            (None, Some(fps)) if due => {
                                info!("FPS: {:.1} | objects: {}", fps, object_count);
                                last_report = Some(Instant::now());
                            }
                            _ => debug!("Frame {} | objects: {}", image.sequence, object_count),
                        }
                        last_frame = Some(image);
                    }
                    final_event => break final_event,
                }
            }
            recv(commands) -> command => match command {
                Ok(Command::TogglePause) => {
                    if controller.state() == PipelineState::Paused {
                        controller.resume();
                        println!("Resumed");
                    } else if controller.pause() {
                        println!("Paused");
                    }
                }
                Ok(Command::Snapshot) => match &last_frame {
                    Some(frame) => {
                        match save_snapshot(&snapshots.output_dir, &snapshots.base, snapshots.kind, frame) {
                            Ok(path) => println!("Saved {}", path.display()),
                            Err(e) => error!("Snapshot failed: {}", e),
                        }
                    }
                    None => println!("No frame to save yet"),
                },
                Ok(Command::Stop) => {
                    println!("Stopping...");
                    let state = controller.stop();
                    debug!("Run #{} joined in state {}", run_id, state);
                }
                Err(_) => commands = channel::never(),
            }
        }
    };

    let state = controller.wait();
    debug!("Run #{} ended in state {}", run_id, state);

    match outcome {
        PipelineEvent::RunCompleted { frames, reason, recording, .. } => {
            match reason {
                CompletionReason::EndOfStream => println!("Completed: {} frames processed", frames),
                CompletionReason::Stopped => println!("Stopped after {} frames", frames),
            }
            if let Some(path) = recording {
                println!("Recording saved to {}", path.display());
            }
            Ok(())
        }
        PipelineEvent::RunFailed { cause, frames, recording, .. } => {
            if let Some(path) = recording {
                println!("Partial recording saved to {}", path.display());
            }
            bail!("Run failed after {} frames: {}", frames, cause)
        }
        PipelineEvent::FrameReady { .. } => Ok(()),
    }
}
