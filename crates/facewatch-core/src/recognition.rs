//! Live recognition loop.
//!
//! While active, every tick captures a frame, has the engine detect and
//! describe the faces in it, matches them against the registered samples and
//! reports the outcome through the presenter. At most one step is in flight
//! at a time; a tick that finds a step running is skipped, not queued.
//! Stopping is cooperative: every run carries a generation, and a step only
//! keeps its stream and reports its result while both the flag and the
//! generation it started under are unchanged.

use crate::camera::{CameraError, CameraSource, CaptureConstraints, VideoStream};
use crate::engine::EngineHandle;
use crate::matcher::{FaceMatcher, MatchLabel};
use crate::present::{BoxColor, Presenter, RecognitionOutcome};
use crate::registry::{self, SharedRegistry};
use crate::status::{DebounceTimings, LabelState};
use crate::types::Detection;
use chrono::Local;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Shown for every face while nothing is registered.
pub const NO_REGISTERED_USERS: &str = "No registered users to compare against";
/// Box label used while nothing is registered.
pub const DETECTED_LABEL: &str = "Face detected";
/// Roughly one display refresh.
pub const DEFAULT_TICK: Duration = Duration::from_millis(16);

/// Snapshot of the loop's externally visible state.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionState {
    pub active: bool,
    pub last_label: Option<MatchLabel>,
    pub last_label_at: Option<Instant>,
}

impl RecognitionState {
    /// The state at startup and after every stop.
    pub fn inactive() -> Self {
        Self {
            active: false,
            last_label: None,
            last_label_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Inactive,
    Idle,
    InFlight,
}

/// What a single call to [`RecognitionLoop::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Loop is inactive; do not reschedule.
    Stopped,
    /// Another step was in flight; nothing was done.
    Skipped,
    Completed { faces: usize },
    /// Capture or detection failed; state untouched, try again next tick.
    Failed,
}

/// Clears the in-flight flag however the step ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RecognitionLoop {
    engine: EngineHandle,
    registry: SharedRegistry,
    camera: Arc<dyn CameraSource>,
    presenter: Arc<dyn Presenter>,
    timings: DebounceTimings,
    tick: Duration,
    active: AtomicBool,
    in_flight: AtomicBool,
    /// Bumped on every activation; steps and tasks of earlier runs wind down.
    generation: AtomicU64,
    stream: Mutex<Option<Box<dyn VideoStream>>>,
    labels: Mutex<LabelState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RecognitionLoop {
    pub fn new(
        engine: EngineHandle,
        registry: SharedRegistry,
        camera: Arc<dyn CameraSource>,
        presenter: Arc<dyn Presenter>,
        timings: DebounceTimings,
        tick: Duration,
    ) -> Self {
        Self {
            engine,
            registry,
            camera,
            presenter,
            timings,
            tick: tick.max(Duration::from_millis(1)),
            active: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            stream: Mutex::new(None),
            labels: Mutex::new(LabelState::default()),
            task: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> LoopPhase {
        if !self.is_active() {
            LoopPhase::Inactive
        } else if self.in_flight.load(Ordering::Acquire) {
            LoopPhase::InFlight
        } else {
            LoopPhase::Idle
        }
    }

    pub fn state(&self) -> RecognitionState {
        let labels = lock(&self.labels);
        RecognitionState {
            active: self.is_active(),
            last_label: labels.last_label.clone(),
            last_label_at: labels.last_label_at,
        }
    }

    /// Whether a loop task spawned by [`start`](Self::start) is still running.
    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Acquire the camera and spawn the per-tick loop on the current tokio
    /// runtime. A no-op while already active.
    pub fn start(self: &Arc<Self>, constraints: &CaptureConstraints) -> Result<(), CameraError> {
        if self.is_active() {
            tracing::debug!("recognition already active");
            return Ok(());
        }
        let generation = self.begin_run(constraints)?;

        let this = Arc::clone(self);
        let task = tokio::spawn(async move { this.run(generation).await });
        *lock(&self.task) = Some(task);

        tracing::info!(tick_ms = self.tick.as_millis() as u64, generation, "recognition started");
        Ok(())
    }

    /// Acquire the camera and mark the loop active without spawning a task;
    /// the caller drives [`step`](Self::step) itself.
    pub fn activate(&self, constraints: &CaptureConstraints) -> Result<(), CameraError> {
        if self.is_active() {
            return Ok(());
        }
        self.begin_run(constraints).map(|_| ())
    }

    /// Open a new run and return its generation. Steps and loop tasks from
    /// earlier runs compare against it and wind down.
    fn begin_run(&self, constraints: &CaptureConstraints) -> Result<u64, CameraError> {
        {
            let mut slot = lock(&self.stream);
            if let Some(previous) = slot.take() {
                self.camera.release(previous);
            }
            let stream = self.camera.acquire(constraints)?;
            let (width, height) = stream.dimensions();
            tracing::info!(width, height, "camera stream acquired");
            *slot = Some(stream);
        }

        lock(&self.labels).reset();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.active.store(true, Ordering::Release);
        Ok(generation)
    }

    /// Deactivate, release the camera and clear the recognition message.
    ///
    /// Never waits for an in-flight step. A step that is detecting discards
    /// its result when detection returns. A step that is blocked in a frame
    /// dequeue holds the stream; it is released as soon as that dequeue
    /// returns. Returns whether the loop was active. Safe to call repeatedly.
    pub fn stop(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::AcqRel);

        let stream = lock(&self.stream).take();
        if let Some(stream) = stream {
            self.camera.release(stream);
            tracing::info!("camera released");
        }

        lock(&self.labels).reset();
        self.presenter.clear_recognition();
        self.presenter.clear_surface();

        if was_active {
            tracing::info!("recognition stopped");
        }
        was_active
    }

    /// Run one iteration unless inactive or another step is in flight.
    pub async fn step(&self) -> StepOutcome {
        if !self.is_active() {
            return StepOutcome::Stopped;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("previous step still in flight; skipping tick");
            return StepOutcome::Skipped;
        }
        let _in_flight = InFlight(&self.in_flight);
        let generation = self.generation.load(Ordering::Acquire);

        let outcome = self.iterate(generation).await;
        if self.is_current(generation) {
            outcome
        } else {
            StepOutcome::Stopped
        }
    }

    /// Active, and still in the run that `generation` was taken from.
    fn is_current(&self, generation: u64) -> bool {
        self.is_active() && self.generation.load(Ordering::Acquire) == generation
    }

    async fn run(self: Arc<Self>, generation: u64) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if self.generation.load(Ordering::Acquire) != generation {
                break;
            }
            if self.step().await == StepOutcome::Stopped {
                break;
            }
        }
        tracing::debug!(generation, "recognition loop finished");
    }

    async fn iterate(&self, generation: u64) -> StepOutcome {
        let Some(stream) = lock(&self.stream).take() else {
            return StepOutcome::Stopped;
        };

        // The dequeue blocks until the device delivers a frame.
        let captured = tokio::task::spawn_blocking(move || {
            let mut stream = stream;
            let frame = stream.capture();
            (stream, frame)
        })
        .await;
        let (stream, frame) = match captured {
            Ok(pair) => pair,
            Err(err) => {
                tracing::error!(error = %err, "capture task failed; stopping recognition");
                self.stop();
                return StepOutcome::Stopped;
            }
        };
        if !self.park_stream(generation, stream) {
            return StepOutcome::Stopped;
        }

        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "frame capture failed; skipping frame");
                return StepOutcome::Failed;
            }
        };

        self.presenter.draw_frame(&frame);
        let now = frame.timestamp;
        let sequence = frame.sequence;
        // Taken before detection: a registration during this step applies
        // from the next one.
        let matcher = registry::read(&self.registry).matcher();

        let detections = match self.engine.detect_all(frame).await {
            Ok(detections) => detections,
            Err(err) => {
                tracing::warn!(error = %err, sequence, "face detection failed; skipping frame");
                return StepOutcome::Failed;
            }
        };

        if !self.report(generation, &detections, matcher.as_deref(), now) {
            tracing::debug!(sequence, generation, "run ended during detection; discarding result");
            return StepOutcome::Stopped;
        }
        self.presenter.finish_frame();
        tracing::trace!(sequence, faces = detections.len(), "step complete");
        StepOutcome::Completed {
            faces: detections.len(),
        }
    }

    /// Put a stream back after capture, or release it when its run ended
    /// while the dequeue was blocked. Returns whether it was put back.
    fn park_stream(&self, generation: u64, stream: Box<dyn VideoStream>) -> bool {
        let mut slot = lock(&self.stream);
        if self.is_current(generation) && slot.is_none() {
            *slot = Some(stream);
            return true;
        }
        drop(slot);
        self.camera.release(stream);
        tracing::info!(generation, "camera released after capture");
        false
    }

    /// Apply one frame's detections. Returns false, touching nothing, when
    /// the run that produced them has ended.
    fn report(
        &self,
        generation: u64,
        detections: &[Detection],
        matcher: Option<&FaceMatcher>,
        now: Instant,
    ) -> bool {
        let mut labels = lock(&self.labels);
        // stop() and begin_run() reset the labels under this lock after
        // changing the flag or generation.
        if !self.is_current(generation) {
            return false;
        }

        if detections.is_empty() {
            if labels.observe_absence(now, &self.timings) {
                tracing::debug!("no face within the grace period; clearing label");
                self.presenter.clear_recognition();
            }
            return true;
        }

        labels.mark_seen(now);
        for detection in detections {
            let Some(matcher) = matcher else {
                self.presenter.draw_box(&detection.bbox, DETECTED_LABEL, BoxColor::Detected);
                self.presenter
                    .show_recognition(NO_REGISTERED_USERS, RecognitionOutcome::Neutral);
                continue;
            };

            let best = matcher.best_match(&detection.descriptor);
            if labels.observe(&best.label, now, &self.timings) {
                self.announce(&best.label, best.distance);
            }

            let color = if best.label.is_unknown() {
                BoxColor::Unknown
            } else {
                BoxColor::Matched
            };
            self.presenter.draw_box(&detection.bbox, best.label.as_str(), color);
        }
        true
    }

    fn announce(&self, label: &MatchLabel, distance: f32) {
        let at = Local::now().format("%Y-%m-%d %H:%M:%S");
        match label {
            MatchLabel::Known(name) => {
                tracing::info!(label = %name, distance, "user recognized");
                self.presenter.show_recognition(
                    &format!("User {name} recognized at {at}"),
                    RecognitionOutcome::Recognized,
                );
            }
            MatchLabel::Unknown => {
                tracing::info!(distance, "unrecognized user");
                self.presenter.show_recognition(
                    &format!("Unrecognized user at {at}"),
                    RecognitionOutcome::NotRecognized,
                );
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
