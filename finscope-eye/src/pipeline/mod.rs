//! Frame pipeline: one worker thread per run, controlled cooperatively
//!
//! The controller owns the run state machine and a bounded event channel.
//! The worker pulls frames from a [`FrameSource`](crate::source::FrameSource),
//! annotates them, optionally records them, and reports each completed
//! iteration as a [`PipelineEvent`]. Nothing in here touches the display.

mod controller;
mod worker;

pub use controller::PipelineController;

use crate::error::ErrorKind;
use crate::frame::Frame;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of a run. `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Failed)
    }

    /// A run in this state still holds (or may hold) its source.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PipelineState::Running | PipelineState::Paused | PipelineState::Stopping
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Paused => "paused",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Zero-based position within a bounded source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub index: u64,
    pub total: u64,
}

/// Why a run ended without failing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    EndOfStream,
    Stopped,
}

/// Everything the display layer learns about a run.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// One completed iteration
    FrameReady {
        run_id: u64,
        image: Frame,
        object_count: usize,
        /// Bounded sources only
        progress: Option<Progress>,
        /// Live sources only, once the first stats window has closed
        fps: Option<f64>,
    },
    RunCompleted {
        run_id: u64,
        frames: u64,
        reason: CompletionReason,
        recording: Option<PathBuf>,
    },
    RunFailed {
        run_id: u64,
        kind: ErrorKind,
        cause: String,
        frames: u64,
        recording: Option<PathBuf>,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> u64 {
        match self {
            PipelineEvent::FrameReady { run_id, .. }
            | PipelineEvent::RunCompleted { run_id, .. }
            | PipelineEvent::RunFailed { run_id, .. } => *run_id,
        }
    }

    /// Whether this is the last event of its run
    pub fn is_final(&self) -> bool {
        !matches!(self, PipelineEvent::FrameReady { .. })
    }
}
