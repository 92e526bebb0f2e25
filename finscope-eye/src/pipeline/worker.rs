//! The per-run loop executed on the pipeline worker thread

use super::{CompletionReason, PipelineEvent, PipelineState, Progress};
use crate::config::PipelineConfig;
use crate::error::VisionError;
use crate::processing::{DetectionAnnotator, StatsTracker};
use crate::recording::RecordingSink;
use crate::source::FrameSource;
use crossbeam::channel::{Receiver, SendTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long a blocked send waits before re-checking the stop flag
const SEND_POLL: Duration = Duration::from_millis(50);
const MIN_THROTTLE: Duration = Duration::from_millis(1);

/// Flags shared between the controller and one run's worker.
#[derive(Debug)]
pub(crate) struct RunControl {
    state: RwLock<PipelineState>,
    paused: AtomicBool,
    stop: AtomicBool,
    /// Set once the worker has been joined or was never spawned
    released: Mutex<bool>,
    released_cv: Condvar,
}

impl RunControl {
    pub(crate) fn new(state: PipelineState) -> Self {
        Self {
            state: RwLock::new(state),
            paused: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            released: Mutex::new(false),
            released_cv: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> PipelineState {
        *self.state.read()
    }

    /// Move to `to` if the current state is one of `from`.
    pub(crate) fn transition(&self, from: &[PipelineState], to: PipelineState) -> bool {
        let mut state = self.state.write();
        if from.contains(&*state) {
            *state = to;
            true
        } else {
            false
        }
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_released(&self) {
        *self.released.lock() = true;
        self.released_cv.notify_all();
    }

    pub(crate) fn is_released(&self) -> bool {
        *self.released.lock()
    }

    /// Block until another thread has finished joining the worker.
    pub(crate) fn wait_released(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.released_cv.wait(&mut released);
        }
    }

    fn finish(&self, terminal: PipelineState) {
        *self.state.write() = terminal;
    }
}

/// Pacing knobs taken from the process settings
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timing {
    pub(crate) pause_poll: Duration,
    pub(crate) throttle_overhead: Duration,
    pub(crate) stats_window: Duration,
}

/// Everything one run owns. Consumed by [`RunWorker::run`].
pub(crate) struct RunWorker {
    pub(crate) run_id: u64,
    pub(crate) config: PipelineConfig,
    pub(crate) source: Box<dyn FrameSource>,
    pub(crate) annotator: DetectionAnnotator,
    pub(crate) recording: Option<RecordingSink>,
    pub(crate) control: std::sync::Arc<RunControl>,
    pub(crate) events: Sender<PipelineEvent>,
    /// Used only to discard stale frame events when a stopping run must deliver its final event
    pub(crate) backlog: Receiver<PipelineEvent>,
    pub(crate) timing: Timing,
}

impl RunWorker {
    pub(crate) fn run(self) {
        let RunWorker {
            run_id,
            config,
            mut source,
            annotator,
            mut recording,
            control,
            events,
            backlog,
            timing,
        } = self;

        let mut frames = 0u64;
        let outcome = {
            let mut iteration = Iteration {
                run_id,
                config: &config,
                source: source.as_mut(),
                annotator: &annotator,
                recording: recording.as_mut(),
                control: &control,
                events: &events,
                timing,
                frames: &mut frames,
            };
            iteration.process_frames()
        };

        // Teardown order: source, then writer, then the final event
        drop(source);
        let recording_path = recording.as_ref().and_then(|r| r.output_path()).map(PathBuf::from);
        let close_error = match recording.as_mut().map(RecordingSink::close) {
            Some(Err(e)) => Some(e),
            _ => None,
        };
        drop(recording);

        let outcome = match (outcome, close_error) {
            (Ok(reason), None) => Ok(reason),
            (Ok(_), Some(e)) => Err(e),
            (Err(e), Some(close)) => {
                error!("Run #{}: recording close also failed: {}", run_id, close);
                Err(e)
            }
            (Err(e), None) => Err(e),
        };

        let (event, terminal) = match outcome {
            Ok(reason) => {
                info!("Run #{} finished ({:?}) after {} frames", run_id, reason, frames);
                (
                    PipelineEvent::RunCompleted {
                        run_id,
                        frames,
                        reason,
                        recording: recording_path,
                    },
                    PipelineState::Stopped,
                )
            }
            Err(e) => {
                error!("Run #{} failed after {} frames: {}", run_id, frames, e);
                (
                    PipelineEvent::RunFailed {
                        run_id,
                        kind: e.kind(),
                        cause: e.to_string(),
                        frames,
                        recording: recording_path,
                    },
                    PipelineState::Failed,
                )
            }
        };

        deliver_final(&events, &backlog, &control, event);
        control.finish(terminal);
    }
}

/// Borrowed view of the run used by the frame loop.
struct Iteration<'a> {
    run_id: u64,
    config: &'a PipelineConfig,
    source: &'a mut dyn FrameSource,
    annotator: &'a DetectionAnnotator,
    recording: Option<&'a mut RecordingSink>,
    control: &'a RunControl,
    events: &'a Sender<PipelineEvent>,
    timing: Timing,
    frames: &'a mut u64,
}

impl Iteration<'_> {
    fn process_frames(&mut self) -> Result<CompletionReason, VisionError> {
        let props = self.source.properties();
        let throttle = props
            .total_frames
            .and_then(|_| props.frame_interval())
            .map(|interval| interval.saturating_sub(self.timing.throttle_overhead).max(MIN_THROTTLE));
        let mut stats = props
            .total_frames
            .is_none()
            .then(|| StatsTracker::new(self.timing.stats_window));

        loop {
            if self.control.stop_requested() {
                return Ok(CompletionReason::Stopped);
            }
            if self.control.is_paused() {
                thread::sleep(self.timing.pause_poll);
                continue;
            }

            let started = Instant::now();
            let Some(frame) = self.source.next_frame()? else {
                return Ok(CompletionReason::EndOfStream);
            };
            let index = *self.frames;

            let result = self.annotator.annotate(&frame, self.config.confidence_threshold)?;
            if let Some(sink) = self.recording.as_mut() {
                sink.write(&result.image)?;
            }
            *self.frames += 1;

            let fps = stats.as_mut().and_then(|tracker| {
                tracker.record_frame();
                tracker.fps()
            });
            let event = PipelineEvent::FrameReady {
                run_id: self.run_id,
                image: result.image,
                object_count: result.object_count,
                progress: props.total_frames.map(|total| Progress { index, total }),
                fps,
            };
            if !self.deliver(event) {
                debug!("Run #{}: frame {} not delivered, stopping", self.run_id, index);
                return Ok(CompletionReason::Stopped);
            }

            if let Some(target) = throttle {
                if let Some(remaining) = pacing_delay(target, started.elapsed()) {
                    thread::sleep(remaining);
                }
            }
        }
    }

    /// Send a frame event, giving up if a stop is requested while blocked.
    fn deliver(&self, mut event: PipelineEvent) -> bool {
        loop {
            match self.events.send_timeout(event, SEND_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => {
                    if self.control.stop_requested() {
                        return false;
                    }
                    event = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

/// Sleep needed to hold a frame to `target`; none once playback is behind.
fn pacing_delay(target: Duration, elapsed: Duration) -> Option<Duration> {
    let remaining = target.saturating_sub(elapsed);
    (!remaining.is_zero()).then_some(remaining)
}

/// The final event is always delivered: a stopping run evicts stale frame
/// events to make room rather than wait on a display that is busy joining it.
fn deliver_final(
    events: &Sender<PipelineEvent>,
    backlog: &Receiver<PipelineEvent>,
    control: &RunControl,
    mut event: PipelineEvent,
) {
    loop {
        match events.send_timeout(event, SEND_POLL) {
            Ok(()) => return,
            Err(SendTimeoutError::Timeout(returned)) => {
                event = returned;
                if control.stop_requested() {
                    if let Ok(stale) = backlog.try_recv() {
                        debug!("Discarded undelivered event of run #{}", stale.run_id());
                    }
                }
            }
            Err(SendTimeoutError::Disconnected(returned)) => {
                warn!("Event channel closed, run #{} outcome not delivered", returned.run_id());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_requires_expected_state() {
        let control = RunControl::new(PipelineState::Running);
        assert!(!control.transition(&[PipelineState::Paused], PipelineState::Running));
        assert!(control.transition(&[PipelineState::Running], PipelineState::Paused));
        assert_eq!(control.state(), PipelineState::Paused);

        control.finish(PipelineState::Stopped);
        assert!(!control.transition(&[PipelineState::Running, PipelineState::Paused], PipelineState::Stopping));
    }

    #[test]
    fn test_final_event_evicts_stale_frames_when_stopping() {
        let (tx, rx) = crossbeam::channel::bounded(1);
        let control = RunControl::new(PipelineState::Stopping);
        control.request_stop();

        tx.send(PipelineEvent::RunCompleted {
            run_id: 1,
            frames: 0,
            reason: CompletionReason::Stopped,
            recording: None,
        })
        .unwrap();
        deliver_final(
            &tx,
            &rx,
            &control,
            PipelineEvent::RunCompleted {
                run_id: 2,
                frames: 5,
                reason: CompletionReason::Stopped,
                recording: None,
            },
        );

        assert_eq!(rx.try_recv().unwrap().run_id(), 2);
    }

    #[test]
    fn test_pacing_skips_sleep_when_behind() {
        let target = Duration::from_millis(40);
        assert_eq!(pacing_delay(target, Duration::from_millis(15)), Some(Duration::from_millis(25)));
        assert_eq!(pacing_delay(target, target), None);
        assert_eq!(pacing_delay(target, Duration::from_millis(90)), None);
    }

    #[test]
    fn test_wait_released_wakes_on_release() {
        let control = std::sync::Arc::new(RunControl::new(PipelineState::Running));
        assert!(!control.is_released());

        let waiter = {
            let control = control.clone();
            thread::spawn(move || control.wait_released())
        };
        thread::sleep(Duration::from_millis(20));
        control.mark_released();
        waiter.join().unwrap();
        assert!(control.is_released());
    }
}
