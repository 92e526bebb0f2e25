//! Run lifecycle: start, pause, resume, stop

use super::worker::{RunControl, RunWorker, Timing};
use super::{PipelineEvent, PipelineState};
use crate::config::{PipelineConfig, Settings};
use crate::error::VisionError;
use crate::models::Detector;
use crate::processing::DetectionAnnotator;
use crate::recording::{recording_stem, RecordingSink};
use crate::source::SourceOpener;
use crate::utils::spawn_thread;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

struct ActiveRun {
    id: u64,
    control: Arc<RunControl>,
    handle: Option<JoinHandle<()>>,
}

impl ActiveRun {
    /// Worker finished, or never started. A handle taken by a joining
    /// thread counts as held until that join completes.
    fn is_released(&self) -> bool {
        match &self.handle {
            Some(handle) => handle.is_finished(),
            None => self.control.is_released(),
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            join_worker(self.id, &self.control, handle);
        }
    }
}

fn join_worker(id: u64, control: &RunControl, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!("Pipeline worker for run #{} panicked", id);
        control.transition(
            &[PipelineState::Running, PipelineState::Paused, PipelineState::Stopping],
            PipelineState::Failed,
        );
    }
    control.mark_released();
}

/// Owns at most one run at a time and the channel its events arrive on.
///
/// The detector and source opener are injected once; each `start` builds a
/// fresh worker around them. Events from every run of this controller share
/// one bounded channel, tagged with the run id.
pub struct PipelineController {
    detector: Option<Arc<dyn Detector>>,
    opener: Arc<dyn SourceOpener>,
    settings: Settings,
    events: Sender<PipelineEvent>,
    backlog: Receiver<PipelineEvent>,
    next_run_id: Mutex<u64>,
    active: Mutex<Option<ActiveRun>>,
}

impl PipelineController {
    /// Create a controller and the receiving end of its event channel.
    pub fn new(
        detector: Option<Arc<dyn Detector>>,
        opener: Arc<dyn SourceOpener>,
        settings: Settings,
    ) -> (Self, Receiver<PipelineEvent>) {
        let (events, receiver) = channel::bounded(settings.event_capacity.max(1));
        let controller = Self {
            detector,
            opener,
            settings,
            events,
            backlog: receiver.clone(),
            next_run_id: Mutex::new(0),
            active: Mutex::new(None),
        };
        (controller, receiver)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    /// State of the latest run, `Idle` before the first start.
    pub fn state(&self) -> PipelineState {
        self.active
            .lock()
            .as_ref()
            .map_or(PipelineState::Idle, |run| run.control.state())
    }

    /// Id of the latest run, if any was started.
    pub fn active_run(&self) -> Option<u64> {
        self.active.lock().as_ref().map(|run| run.id)
    }

    /// Open the source and spawn the worker for a new run.
    ///
    /// Rejected with `AlreadyActive` while a previous run still holds its
    /// worker. Every other failure ends the new run as `Failed`, emits one
    /// `RunFailed` event and is returned to the caller; no loop is entered.
    pub fn start(&self, config: PipelineConfig) -> Result<u64, VisionError> {
        let mut active = self.active.lock();

        if let Some(previous) = active.as_mut() {
            if !previous.is_released() {
                warn!("Start rejected: run #{} is still {}", previous.id, previous.control.state());
                return Err(VisionError::AlreadyActive(previous.id));
            }
            previous.join();
        }

        let run_id = {
            let mut next = self.next_run_id.lock();
            *next += 1;
            *next
        };
        let control = Arc::new(RunControl::new(PipelineState::Running));
        *active = Some(ActiveRun {
            id: run_id,
            control: control.clone(),
            handle: None,
        });

        match self.launch(run_id, config, control.clone()) {
            Ok(handle) => {
                if let Some(run) = active.as_mut() {
                    run.handle = Some(handle);
                }
                Ok(run_id)
            }
            Err(e) => {
                error!("Run #{} failed to start: {}", run_id, e);
                control.transition(&[PipelineState::Running], PipelineState::Failed);
                control.mark_released();
                let event = PipelineEvent::RunFailed {
                    run_id,
                    kind: e.kind(),
                    cause: e.to_string(),
                    frames: 0,
                    recording: None,
                };
                // The caller is usually the consumer, so never block here
                if self.events.try_send(event).is_err() {
                    warn!("Event channel full, start failure of run #{} reported to caller only", run_id);
                }
                Err(e)
            }
        }
    }

    fn launch(
        &self,
        run_id: u64,
        config: PipelineConfig,
        control: Arc<RunControl>,
    ) -> Result<JoinHandle<()>, VisionError> {
        config.validate().map_err(VisionError::Config)?;
        let detector = self.detector.clone().ok_or_else(|| {
            VisionError::ModelUnavailable("no detector model was loaded at startup".to_string())
        })?;

        let source = self.opener.open(&config.source)?;
        let props = source.properties();
        let recording = config.record.then(|| {
            RecordingSink::new(
                &config.output_dir,
                recording_stem(&config.source),
                self.settings.recording_backend,
                props.fps,
                self.settings.device_fallback_fps,
            )
        });

        info!(
            "Run #{} starting on {} (threshold {:.2}, recording: {})",
            run_id, config.source, config.confidence_threshold, config.record
        );

        let worker = RunWorker {
            run_id,
            config,
            source,
            annotator: DetectionAnnotator::new(detector),
            recording,
            control,
            events: self.events.clone(),
            backlog: self.backlog.clone(),
            timing: Timing {
                pause_poll: self.settings.pause_poll_interval(),
                throttle_overhead: self.settings.throttle_overhead(),
                stats_window: self.settings.stats_window(),
            },
        };

        // On spawn failure the closure, and with it the source, is dropped
        spawn_thread(format!("finscope-run-{}", run_id), move || worker.run())
            .map_err(|e| VisionError::SourceOpen(format!("Failed to spawn pipeline worker: {}", e)))
    }

    /// Ask the running loop to idle after the in-flight frame.
    pub fn pause(&self) -> bool {
        let active = self.active.lock();
        let Some(run) = active.as_ref() else {
            return false;
        };
        if run.control.transition(&[PipelineState::Running], PipelineState::Paused) {
            run.control.set_paused(true);
            info!("Run #{} paused", run.id);
            true
        } else {
            false
        }
    }

    pub fn resume(&self) -> bool {
        let active = self.active.lock();
        let Some(run) = active.as_ref() else {
            return false;
        };
        if run.control.transition(&[PipelineState::Paused], PipelineState::Running) {
            run.control.set_paused(false);
            info!("Run #{} resumed", run.id);
            true
        } else {
            false
        }
    }

    /// Request a cooperative stop and join the worker.
    ///
    /// When this returns the source and recording are closed and the final
    /// event is queued. Returns the run's terminal state.
    pub fn stop(&self) -> PipelineState {
        self.join_active(true)
    }

    /// Block until the current run ends on its own and return its terminal state.
    pub fn wait(&self) -> PipelineState {
        self.join_active(false)
    }

    /// Join outside the `active` lock so other callers are never blocked
    /// behind a long-running worker.
    fn join_active(&self, stop: bool) -> PipelineState {
        let (id, control, handle) = {
            let mut active = self.active.lock();
            let Some(run) = active.as_mut() else {
                return PipelineState::Idle;
            };

            if stop {
                run.control.request_stop();
                run.control.set_paused(false);
                if run
                    .control
                    .transition(&[PipelineState::Running, PipelineState::Paused], PipelineState::Stopping)
                {
                    info!("Run #{} stopping", run.id);
                }
            }
            (run.id, run.control.clone(), run.handle.take())
        };

        match handle {
            Some(handle) => join_worker(id, &control, handle),
            None => control.wait_released(),
        }
        control.state()
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        let running = self.active.get_mut().as_ref().is_some_and(|run| !run.is_released());
        if running {
            warn!("Pipeline controller dropped with a run in progress, stopping it");
            self.stop();
        }
    }
}
