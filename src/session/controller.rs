//! Session controller for the lifecycle of one exercise-tracking session.
//!
//! `Idle → StartingCamera → Active → Stopped → Idle`. All state lives behind a
//! single mutex that is never held across an `.await`; every transition the
//! caller triggers is applied synchronously under it. Anything asynchronous
//! (health check, camera, polls) captures the current epoch before suspending
//! and is discarded on resumption if a stop or teardown moved the epoch on.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::announce::take_announcements;
use super::state::{BackendStatus, ExerciseKind, Phase, PoseSample, SessionState};
use crate::backend::PoseBackend;
use crate::capture::{Camera, MediaStream};
use crate::config::{PollOrdering, SessionConfig};
use crate::error::{FetchError, SessionError};
use crate::speech::{SpeechSynthesizer, Utterance};

/// Owns the session state, the camera stream and the poll loop.
///
/// Dropping the controller tears the session down.
pub struct SessionController {
    shared: Arc<Shared>,
}

struct Shared {
    backend: Arc<dyn PoseBackend>,
    camera: Arc<dyn Camera>,
    speech: Arc<dyn SpeechSynthesizer>,
    config: SessionConfig,
    inner: Mutex<Inner>,
    tx: watch::Sender<SessionState>,
}

struct Inner {
    state: SessionState,
    /// Bumped whenever a run ends; late async results from older epochs are dropped.
    epoch: u64,
    stream: Option<Box<dyn MediaStream>>,
    poller: Option<JoinHandle<()>>,
    next_seq: u64,
    applied_seq: u64,
}

impl SessionController {
    pub fn new(
        backend: Arc<dyn PoseBackend>,
        camera: Arc<dyn Camera>,
        speech: Arc<dyn SpeechSynthesizer>,
        config: SessionConfig,
    ) -> Self {
        let state = SessionState::new(None, config.voice_enabled);
        let (tx, _rx) = watch::channel(state.clone());
        Self {
            shared: Arc::new(Shared {
                backend,
                camera,
                speech,
                config,
                inner: Mutex::new(Inner {
                    state,
                    epoch: 0,
                    stream: None,
                    poller: None,
                    next_seq: 0,
                    applied_seq: 0,
                }),
                tx,
            }),
        }
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.shared.lock().state.clone()
    }

    /// Read-only stream of state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.tx.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().state.phase
    }

    /// Live tracks in the held camera stream (0 when none is held).
    pub fn live_camera_tracks(&self) -> usize {
        self.shared
            .lock()
            .stream
            .as_ref()
            .map(|s| s.live_tracks())
            .unwrap_or(0)
    }

    /// Whether a poll loop is currently scheduled.
    pub fn is_polling(&self) -> bool {
        self.shared
            .lock()
            .poller
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Processed video URL for the selected exercise, if any.
    pub fn video_feed_url(&self) -> Option<String> {
        let exercise = self.shared.lock().state.exercise?;
        Some(self.shared.backend.video_feed_url(exercise))
    }

    /// Choose the exercise for the next session. Not allowed mid-session.
    pub fn select_exercise(&self, kind: ExerciseKind) -> Result<(), SessionError> {
        let mut inner = self.shared.lock();
        if !inner.state.phase.can_start() {
            return Err(SessionError::InvalidTransition {
                phase: inner.state.phase,
                action: "change exercise",
            });
        }
        inner.state.exercise = Some(kind);
        self.shared.publish(&inner);
        Ok(())
    }

    /// Probe the backend and record the result without touching the phase.
    pub async fn check_backend(&self) -> BackendStatus {
        let status = match self.shared.backend.status().await {
            Ok(s) => {
                debug!(status = %s.status, "Pose backend reachable");
                BackendStatus::Connected
            }
            Err(e) => {
                warn!("Backend connection failed: {e}");
                BackendStatus::Error
            }
        };
        let mut inner = self.shared.lock();
        inner.state.backend_status = status;
        self.shared.publish(&inner);
        status
    }

    /// Start a session: health check, then camera, then polling.
    ///
    /// The camera is only requested once the backend has answered.
    pub async fn start(&self) -> Result<(), SessionError> {
        let shared = &self.shared;

        let (kind, epoch, session_id) = {
            let mut inner = shared.lock();
            if !inner.state.phase.can_start() {
                return Err(SessionError::InvalidTransition {
                    phase: inner.state.phase,
                    action: "start",
                });
            }
            let Some(kind) = inner.state.exercise else {
                return Err(SessionError::Validation);
            };
            let session_id = Uuid::new_v4();
            inner.state.phase = Phase::StartingCamera;
            inner.state.session_id = Some(session_id);
            shared.publish(&inner);
            (kind, inner.epoch, session_id)
        };

        let _abandoned = AbandonedStart {
            shared: shared.as_ref(),
            epoch,
        };
        info!(session_id = %session_id, exercise = %kind, "Starting exercise session");

        // ── Backend reachability ────────────────────────────────────────
        let health = shared.backend.status().await;
        {
            let mut inner = shared.lock();
            if inner.epoch != epoch {
                debug!(session_id = %session_id, "Start cancelled during health check");
                return Err(SessionError::Cancelled);
            }
            if let Err(e) = health {
                let err = SessionError::BackendUnavailable {
                    reason: e.to_string(),
                };
                warn!(session_id = %session_id, "Backend unavailable: {e}");
                inner.state.backend_status = BackendStatus::Error;
                inner.state.phase = Phase::Idle;
                inner.state.last_error = Some(err.to_string());
                shared.publish(&inner);
                return Err(err);
            }
            inner.state.backend_status = BackendStatus::Connected;
            shared.publish(&inner);
        }

        // ── Camera ──────────────────────────────────────────────────────
        let acquired = shared.camera.acquire(&shared.config.video).await;
        let mut inner = shared.lock();
        if inner.epoch != epoch {
            if let Ok(mut stream) = acquired {
                stream.stop();
            }
            debug!(session_id = %session_id, "Start cancelled during camera acquisition");
            return Err(SessionError::Cancelled);
        }
        let stream = match acquired {
            Ok(stream) => stream,
            Err(e) => {
                let err = SessionError::CameraUnavailable {
                    reason: e.to_string(),
                };
                warn!(session_id = %session_id, "Error accessing camera: {e}");
                inner.state.phase = Phase::Idle;
                inner.state.last_error = Some(err.to_string());
                shared.publish(&inner);
                return Err(err);
            }
        };

        // ── Active ──────────────────────────────────────────────────────
        inner.stream = Some(stream);
        inner.state.phase = Phase::Active;
        inner.state.clear_progress();
        inner.state.started_at = Some(Utc::now());
        inner.state.last_error = None;
        inner.applied_seq = inner.next_seq;
        inner.poller = Some(spawn_poller(Arc::clone(shared), epoch));
        shared.publish(&inner);
        drop(inner);

        shared.spawn_remote_reset(kind);
        info!(session_id = %session_id, exercise = %kind, "Exercise session active");
        Ok(())
    }

    /// End the session, keeping the last counters on display.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        if !inner.state.phase.holds_camera() {
            debug!(phase = %inner.state.phase, "Stop ignored");
            return;
        }
        self.shared.release(&mut inner);
        inner.state.phase = Phase::Stopped;
        self.shared.publish(&inner);
        info!(
            session_id = ?inner.state.session_id,
            reps = inner.state.rep_count,
            "Exercise session stopped"
        );
    }

    /// Zero the counters. While active, the backend counter is reset too.
    pub fn reset(&self) {
        let mut inner = self.shared.lock();
        inner.state.clear_progress();
        self.shared.publish(&inner);
        let remote = match (inner.state.phase, inner.state.exercise) {
            (Phase::Active, Some(kind)) => Some(kind),
            _ => None,
        };
        drop(inner);

        if let Some(kind) = remote {
            self.shared.spawn_remote_reset(kind);
        }
    }

    /// Release everything and return to `Idle`, from any phase. Idempotent.
    pub fn teardown(&self) {
        let mut inner = self.shared.lock();
        self.shared.release(&mut inner);
        inner.state.phase = Phase::Idle;
        inner.state.clear_progress();
        inner.state.session_id = None;
        inner.state.started_at = None;
        self.shared.publish(&inner);
    }

    /// Toggle voice feedback. Turning it off silences speech immediately.
    pub fn set_voice_enabled(&self, enabled: bool) {
        let mut inner = self.shared.lock();
        if inner.state.voice_enabled == enabled {
            return;
        }
        inner.state.voice_enabled = enabled;
        if enabled {
            self.shared.say("Voice feedback enabled");
        } else {
            self.shared.speech.cancel();
        }
        self.shared.publish(&inner);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.tx.send_replace(inner.state.clone());
    }

    /// Stop the camera, the poll loop and speech; invalidate in-flight work.
    fn release(&self, inner: &mut Inner) {
        inner.epoch += 1;
        if let Some(mut stream) = inner.stream.take() {
            stream.stop();
        }
        if let Some(poller) = inner.poller.take() {
            // Dropping the loop's JoinSet aborts any requests still in flight.
            poller.abort();
        }
        self.speech.cancel();
    }

    /// Speak one announcement, superseding whatever is being spoken.
    fn say(&self, text: &str) {
        let utterance = Utterance::new(text, &self.config.voice, &self.speech.voices());
        self.speech.cancel();
        if let Err(e) = self.speech.speak(utterance) {
            warn!("Speech synthesis error: {e}");
        }
    }

    /// Best-effort `reset_count`; failures are only logged.
    fn spawn_remote_reset(&self, kind: ExerciseKind) {
        let backend = Arc::clone(&self.backend);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match backend.reset_count(kind).await {
                        Ok(()) => debug!(exercise = %kind, "Backend counter reset"),
                        Err(e) => warn!(exercise = %kind, "Error resetting count: {e}"),
                    }
                });
            }
            Err(_) => warn!(exercise = %kind, "No async runtime, skipping backend counter reset"),
        }
    }

    fn next_seq(&self) -> u64 {
        let mut inner = self.lock();
        inner.next_seq += 1;
        inner.next_seq
    }

    /// Apply one poll result if it still belongs to the current active run.
    fn apply_poll(&self, epoch: u64, seq: u64, result: Result<serde_json::Value, FetchError>) {
        let value = match result {
            Ok(v) => v,
            Err(e) => {
                warn!("Error fetching feedback: {e}");
                return;
            }
        };
        let Some(sample) = PoseSample::from_value(&value) else {
            debug!(seq, "Discarding malformed feedback response");
            return;
        };

        let mut inner = self.lock();
        if inner.epoch != epoch || inner.state.phase != Phase::Active {
            debug!(seq, "Discarding feedback from an ended session");
            return;
        }
        if self.config.poll_ordering == PollOrdering::LatestIssued && seq <= inner.applied_seq {
            debug!(seq, applied = inner.applied_seq, "Discarding stale feedback response");
            return;
        }
        inner.applied_seq = inner.applied_seq.max(seq);
        inner.state.apply_sample(sample);

        debug!(
            seq,
            reps = inner.state.rep_count,
            stage = ?inner.state.stage,
            angle = inner.state.joint_angle,
            "Feedback applied"
        );

        for text in take_announcements(&mut inner.state) {
            self.say(&text);
        }
        self.publish(&inner);
    }
}

/// Puts a `start()` that was dropped mid-flight back to `Idle`.
///
/// Every completed path leaves `StartingCamera` or moves the epoch, so this
/// only fires when the future is dropped between its awaits. It must be
/// declared before any `inner` guard in `start()` so it drops after it.
struct AbandonedStart<'a> {
    shared: &'a Shared,
    epoch: u64,
}

impl Drop for AbandonedStart<'_> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if inner.epoch != self.epoch || inner.state.phase != Phase::StartingCamera {
            return;
        }
        inner.epoch += 1;
        inner.state.phase = Phase::Idle;
        inner.state.session_id = None;
        self.shared.publish(&inner);
        debug!("Start abandoned before the session became active");
    }
}

/// Poll `/exercise_data` immediately and then every `poll_interval`, without
/// waiting for earlier requests to finish.
fn spawn_poller(shared: Arc<Shared>, epoch: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(shared.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let seq = shared.next_seq();
                    let shared = Arc::clone(&shared);
                    in_flight.spawn(async move {
                        let result = shared.backend.exercise_data().await;
                        shared.apply_poll(epoch, seq, result);
                    });
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }
    })
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
