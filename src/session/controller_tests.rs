use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

use super::*;
use crate::backend::ServerStatus;
use crate::capture::{TrackInfo, TrackKind, VideoConstraints};
use crate::error::{CaptureError, SpeechError};
use crate::session::state::Stage;
use crate::speech::Voice;

/// Maximum time any wait is allowed before the test is considered hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Fakes ───────────────────────────────────────────────────────────

enum Reply {
    Now(Value),
    Gated(oneshot::Receiver<Value>),
}

#[derive(Default)]
struct FakeBackend {
    down: AtomicBool,
    status_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    gated_resolved: AtomicUsize,
    resets: Mutex<Vec<ExerciseKind>>,
    replies: Mutex<VecDeque<Reply>>,
}

impl FakeBackend {
    fn push(&self, value: Value) {
        self.replies.lock().unwrap().push_back(Reply::Now(value));
    }

    /// Queue a reply that only resolves when the returned sender fires.
    fn push_gated(&self) -> oneshot::Sender<Value> {
        let (tx, rx) = oneshot::channel();
        self.replies.lock().unwrap().push_back(Reply::Gated(rx));
        tx
    }

    fn resets(&self) -> Vec<ExerciseKind> {
        self.resets.lock().unwrap().clone()
    }
}

#[async_trait]
impl PoseBackend for FakeBackend {
    async fn status(&self) -> Result<ServerStatus, FetchError> {
        self.status_calls.fetch_add(1, SeqCst);
        if self.down.load(SeqCst) {
            return Err(FetchError::Transport {
                endpoint: "/status".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(ServerStatus {
            status: "Server running".into(),
            ..Default::default()
        })
    }

    async fn reset_count(&self, kind: ExerciseKind) -> Result<(), FetchError> {
        self.resets.lock().unwrap().push(kind);
        Ok(())
    }

    async fn exercise_data(&self) -> Result<Value, FetchError> {
        let reply = self.replies.lock().unwrap().pop_front();
        self.poll_calls.fetch_add(1, SeqCst);
        match reply {
            Some(Reply::Now(value)) => Ok(value),
            Some(Reply::Gated(rx)) => {
                let value = rx.await.map_err(|_| FetchError::Transport {
                    endpoint: "/exercise_data".into(),
                    reason: "gate dropped".into(),
                });
                self.gated_resolved.fetch_add(1, SeqCst);
                value
            }
            None => Err(FetchError::Transport {
                endpoint: "/exercise_data".into(),
                reason: "no scripted reply".into(),
            }),
        }
    }

    fn video_feed_url(&self, kind: ExerciseKind) -> String {
        format!("http://fake/video_feed?exercise={kind}")
    }
}

#[derive(Default)]
struct FakeCamera {
    deny: AtomicBool,
    acquire_calls: AtomicUsize,
    live: Arc<AtomicUsize>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeCamera {
    /// Hold the next acquisition until the returned sender fires.
    fn gate(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    fn live(&self) -> usize {
        self.live.load(SeqCst)
    }
}

struct FakeStream {
    live: Arc<AtomicUsize>,
    stopped: bool,
}

impl MediaStream for FakeStream {
    fn tracks(&self) -> Vec<TrackInfo> {
        vec![TrackInfo {
            kind: TrackKind::Video,
            label: "fake".into(),
            live: !self.stopped,
        }]
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.live.fetch_sub(1, SeqCst);
        }
    }
}

#[async_trait]
impl Camera for FakeCamera {
    async fn acquire(
        &self,
        constraints: &VideoConstraints,
    ) -> Result<Box<dyn MediaStream>, CaptureError> {
        assert!(!constraints.audio, "sessions must not request audio");
        self.acquire_calls.fetch_add(1, SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.deny.load(SeqCst) {
            return Err(CaptureError::PermissionDenied {
                device: "fake".into(),
            });
        }
        self.live.fetch_add(1, SeqCst);
        Ok(Box::new(FakeStream {
            live: Arc::clone(&self.live),
            stopped: false,
        }))
    }
}

#[derive(Default)]
struct FakeSpeech {
    spoken: Mutex<Vec<String>>,
    cancels: AtomicUsize,
}

impl FakeSpeech {
    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl SpeechSynthesizer for FakeSpeech {
    fn voices(&self) -> Vec<Voice> {
        vec![Voice::new("Test", "en-US")]
    }

    fn speak(&self, utterance: Utterance) -> Result<(), SpeechError> {
        assert_eq!(utterance.voice.as_ref().map(|v| v.lang.as_str()), Some("en-US"));
        self.spoken.lock().unwrap().push(utterance.text);
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, SeqCst);
    }
}

// ── Harness ─────────────────────────────────────────────────────────

struct Harness {
    controller: SessionController,
    backend: Arc<FakeBackend>,
    camera: Arc<FakeCamera>,
    speech: Arc<FakeSpeech>,
}

fn test_config() -> SessionConfig {
    SessionConfig {
        poll_interval: Duration::from_millis(20),
        ..SessionConfig::default()
    }
}

fn harness(config: SessionConfig) -> Harness {
    let backend = Arc::new(FakeBackend::default());
    let camera = Arc::new(FakeCamera::default());
    let speech = Arc::new(FakeSpeech::default());
    let controller = SessionController::new(backend.clone(), camera.clone(), speech.clone(), config);
    Harness {
        controller,
        backend,
        camera,
        speech,
    }
}

async fn start_active(h: &Harness) {
    h.controller.select_exercise(ExerciseKind::Bicep).unwrap();
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.phase(), Phase::Active);
}

async fn wait_for_state(controller: &SessionController, pred: impl Fn(&SessionState) -> bool) {
    let mut rx = controller.subscribe();
    timeout(TEST_TIMEOUT, rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    timeout(TEST_TIMEOUT, async {
        while !cond() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

fn assert_released(h: &Harness) {
    assert_eq!(h.controller.live_camera_tracks(), 0);
    assert_eq!(h.camera.live(), 0);
    assert!(!h.controller.is_polling());
}

// ── Start ───────────────────────────────────────────────────────────

#[tokio::test]
async fn start_without_exercise_is_validation_error() {
    let h = harness(test_config());
    let rx = h.controller.subscribe();

    assert_eq!(h.controller.start().await, Err(SessionError::Validation));
    assert_eq!(h.controller.phase(), Phase::Idle);
    assert!(!rx.has_changed().unwrap(), "phase must never leave Idle");
    assert_eq!(h.backend.status_calls.load(SeqCst), 0);
    assert_eq!(h.camera.acquire_calls.load(SeqCst), 0);
}

#[tokio::test]
async fn backend_down_never_requests_camera() {
    let h = harness(test_config());
    h.backend.down.store(true, SeqCst);
    h.controller.select_exercise(ExerciseKind::Squat).unwrap();

    let err = h.controller.start().await.unwrap_err();
    assert!(matches!(err, SessionError::BackendUnavailable { .. }));

    let state = h.controller.snapshot();
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.backend_status, BackendStatus::Error);
    assert!(state.last_error.is_some());
    assert_eq!(h.backend.status_calls.load(SeqCst), 1);
    assert_eq!(h.camera.acquire_calls.load(SeqCst), 0);
    assert_released(&h);
}

#[tokio::test]
async fn camera_denied_returns_to_idle() {
    let h = harness(test_config());
    h.camera.deny.store(true, SeqCst);
    h.controller.select_exercise(ExerciseKind::Pushup).unwrap();

    let err = h.controller.start().await.unwrap_err();
    assert!(matches!(err, SessionError::CameraUnavailable { .. }));
    assert_eq!(h.controller.phase(), Phase::Idle);
    assert_released(&h);
    assert!(h.backend.resets().is_empty());
}

#[tokio::test]
async fn start_resets_leftovers_from_previous_run() {
    let mut config = test_config();
    config.voice_enabled = true;
    let h = harness(config);
    h.backend.push(json!({ "reps": 7, "stage": "up", "feedback": ["Slow down"], "angle": 40.0 }));
    start_active(&h).await;
    wait_for_state(&h.controller, |s| s.rep_count == 7).await;

    h.controller.stop();
    let stopped = h.controller.snapshot();
    assert_eq!(stopped.phase, Phase::Stopped);
    assert_eq!(stopped.rep_count, 7);
    assert_eq!(stopped.last_announced_rep_count, 7);

    h.controller.start().await.unwrap();
    let state = h.controller.snapshot();
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.rep_count, 0);
    assert!(state.feedback.is_empty());
    assert_eq!(state.joint_angle, 0.0);
    assert_eq!(state.last_announced_rep_count, 0);
    assert!(state.last_spoken_message.is_empty());
    assert_ne!(state.session_id, stopped.session_id);
    assert!(state.started_at.is_some());

    eventually("two backend resets", || h.backend.resets().len() == 2).await;
    assert_eq!(h.backend.resets(), vec![ExerciseKind::Bicep, ExerciseKind::Bicep]);
}

#[tokio::test]
async fn cannot_start_twice_or_change_exercise_mid_session() {
    let h = harness(test_config());
    start_active(&h).await;

    assert_eq!(
        h.controller.start().await,
        Err(SessionError::InvalidTransition {
            phase: Phase::Active,
            action: "start"
        })
    );
    assert!(h.controller.select_exercise(ExerciseKind::Lunge).is_err());
    assert_eq!(h.controller.snapshot().exercise, Some(ExerciseKind::Bicep));
    assert_eq!(h.camera.acquire_calls.load(SeqCst), 1);
}

#[tokio::test]
async fn video_feed_follows_selection() {
    let h = harness(test_config());
    assert!(h.controller.video_feed_url().is_none());
    h.controller.select_exercise(ExerciseKind::Shoulder).unwrap();
    assert_eq!(
        h.controller.video_feed_url().as_deref(),
        Some("http://fake/video_feed?exercise=shoulder")
    );
}

#[tokio::test]
async fn check_backend_records_status() {
    let h = harness(test_config());
    assert_eq!(h.controller.check_backend().await, BackendStatus::Connected);
    h.backend.down.store(true, SeqCst);
    assert_eq!(h.controller.check_backend().await, BackendStatus::Error);
    assert_eq!(h.controller.snapshot().backend_status, BackendStatus::Error);
    assert_eq!(h.controller.phase(), Phase::Idle);
}

// ── Polling ─────────────────────────────────────────────────────────

#[tokio::test]
async fn in_order_responses_end_at_latest() {
    let h = harness(test_config());
    let tx3 = h.backend.push_gated();
    let tx5 = h.backend.push_gated();
    start_active(&h).await;
    eventually("two polls", || h.backend.poll_calls.load(SeqCst) >= 2).await;

    tx3.send(json!({ "reps": 3 })).unwrap();
    wait_for_state(&h.controller, |s| s.rep_count == 3).await;
    tx5.send(json!({ "reps": 5 })).unwrap();
    wait_for_state(&h.controller, |s| s.rep_count == 5).await;

    assert_eq!(h.controller.snapshot().rep_count, 5);
}

#[tokio::test]
async fn out_of_order_responses_last_resolved_wins() {
    let h = harness(test_config());
    let tx3 = h.backend.push_gated();
    let tx5 = h.backend.push_gated();
    start_active(&h).await;
    eventually("two polls", || h.backend.poll_calls.load(SeqCst) >= 2).await;

    tx5.send(json!({ "reps": 5 })).unwrap();
    wait_for_state(&h.controller, |s| s.rep_count == 5).await;
    tx3.send(json!({ "reps": 3 })).unwrap();
    wait_for_state(&h.controller, |s| s.rep_count == 3).await;

    // The older request resolved last, so its value sticks.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(h.controller.snapshot().rep_count, 3);
}

#[tokio::test]
async fn latest_issued_ordering_discards_stale_responses() {
    let mut config = test_config();
    config.poll_ordering = PollOrdering::LatestIssued;
    let h = harness(config);
    let tx3 = h.backend.push_gated();
    let tx5 = h.backend.push_gated();
    start_active(&h).await;
    eventually("two polls", || h.backend.poll_calls.load(SeqCst) >= 2).await;

    tx5.send(json!({ "reps": 5 })).unwrap();
    wait_for_state(&h.controller, |s| s.rep_count == 5).await;
    tx3.send(json!({ "reps": 3 })).unwrap();
    eventually("both gated polls resolved", || {
        h.backend.gated_resolved.load(SeqCst) == 2
    })
    .await;

    assert_eq!(h.controller.snapshot().rep_count, 5);
}

#[tokio::test]
async fn malformed_response_leaves_state_untouched() {
    let h = harness(test_config());
    h.backend.push(json!({
        "reps": 2,
        "stage": "down",
        "feedback": ["Go lower"],
        "symmetry": 4.0,
        "angle": 88.0
    }));
    start_active(&h).await;
    wait_for_state(&h.controller, |s| s.rep_count == 2).await;
    let before = h.controller.snapshot();
    assert_eq!(before.stage, Stage::Down);
    assert_eq!(before.feedback, vec!["Go lower"]);

    let calls = h.backend.poll_calls.load(SeqCst);
    h.backend.push(json!({ "reps": "three", "feedback": ["bad"] }));
    h.backend.push(json!({ "stage": "up", "angle": 10.0 }));
    h.backend.push(json!(null));
    eventually("malformed replies consumed", || {
        h.backend.poll_calls.load(SeqCst) >= calls + 4
    })
    .await;

    assert_eq!(h.controller.snapshot(), before);
}

#[tokio::test]
async fn stop_discards_in_flight_response() {
    let h = harness(test_config());
    let tx = h.backend.push_gated();
    start_active(&h).await;
    eventually("first poll", || h.backend.poll_calls.load(SeqCst) >= 1).await;

    h.controller.stop();
    let after_stop = h.controller.snapshot();
    assert_eq!(after_stop.phase, Phase::Stopped);
    assert_released(&h);

    // The request may already be aborted; either way nothing may land.
    let _ = tx.send(json!({ "reps": 9, "feedback": ["late"] }));
    sleep(Duration::from_millis(60)).await;
    assert_eq!(h.controller.snapshot(), after_stop);
}

#[tokio::test]
async fn response_from_an_earlier_run_is_discarded() {
    let h = harness(test_config());
    start_active(&h).await;
    let shared = &h.controller.shared;
    let old_epoch = shared.lock().epoch;

    // Same run: a response is applied.
    let seq = shared.next_seq();
    shared.apply_poll(old_epoch, seq, Ok(json!({ "reps": 2 })));
    assert_eq!(h.controller.snapshot().rep_count, 2);

    h.controller.stop();
    let after_stop = h.controller.snapshot();
    let seq = shared.next_seq();
    shared.apply_poll(old_epoch, seq, Ok(json!({ "reps": 9, "feedback": ["late"] })));
    assert_eq!(h.controller.snapshot(), after_stop);

    // A new run is Active again; only the epoch tells the late response apart.
    h.controller.start().await.unwrap();
    let seq = shared.next_seq();
    shared.apply_poll(old_epoch, seq, Ok(json!({ "reps": 9, "feedback": ["late"] })));
    let state = h.controller.snapshot();
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.rep_count, 0);
    assert!(state.feedback.is_empty());
}

#[tokio::test]
async fn reset_clears_in_place_and_resets_backend() {
    let mut config = test_config();
    config.voice_enabled = true;
    let h = harness(config);
    h.backend.push(json!({ "reps": 4, "feedback": ["Elbows in"] }));
    start_active(&h).await;
    wait_for_state(&h.controller, |s| s.rep_count == 4).await;
    assert_eq!(h.controller.snapshot().last_announced_rep_count, 4);

    h.controller.reset();
    let state = h.controller.snapshot();
    assert_eq!(state.phase, Phase::Active);
    assert_eq!(state.rep_count, 0);
    assert!(state.feedback.is_empty());
    assert_eq!(state.last_announced_rep_count, 0);
    assert!(state.last_spoken_message.is_empty());
    assert!(h.controller.is_polling());

    eventually("second backend reset", || h.backend.resets().len() == 2).await;
}

#[tokio::test]
async fn reset_when_idle_stays_local() {
    let h = harness(test_config());
    h.controller.select_exercise(ExerciseKind::Bicep).unwrap();
    h.controller.reset();
    sleep(Duration::from_millis(20)).await;
    assert!(h.backend.resets().is_empty());
    assert_eq!(h.controller.phase(), Phase::Idle);
}

// ── Voice ───────────────────────────────────────────────────────────

#[tokio::test]
async fn voice_toggle_cancels_and_suppresses() {
    let mut config = test_config();
    config.voice_enabled = true;
    let h = harness(config);
    h.backend.push(json!({ "reps": 1, "stage": "up", "feedback": ["Keep elbows close"] }));
    start_active(&h).await;
    wait_for_state(&h.controller, |s| s.rep_count == 1).await;
    assert_eq!(
        h.speech.spoken(),
        vec!["Rep 1 completed! Good job!", "Keep elbows close"]
    );

    let cancels = h.speech.cancels.load(SeqCst);
    h.controller.set_voice_enabled(false);
    assert!(h.speech.cancels.load(SeqCst) > cancels);

    h.backend.push(json!({ "reps": 2, "feedback": ["Straighten your back"] }));
    wait_for_state(&h.controller, |s| s.rep_count == 2).await;
    assert_eq!(h.speech.spoken().len(), 2);

    h.controller.set_voice_enabled(true);
    assert_eq!(h.speech.spoken().last().map(String::as_str), Some("Voice feedback enabled"));
}

#[tokio::test]
async fn celebrations_are_not_spoken() {
    let mut config = test_config();
    config.voice_enabled = true;
    let h = harness(config);
    h.backend.push(json!({ "reps": 0, "feedback": ["Perfect form! 💪"] }));
    start_active(&h).await;
    wait_for_state(&h.controller, |s| s.feedback.len() == 1).await;
    assert!(h.speech.spoken().is_empty());
}

// ── Teardown ────────────────────────────────────────────────────────

#[tokio::test]
async fn teardown_from_idle_is_noop() {
    let h = harness(test_config());
    h.controller.teardown();
    h.controller.teardown();
    assert_eq!(h.controller.phase(), Phase::Idle);
    assert_released(&h);
}

#[tokio::test]
async fn teardown_while_starting_camera_releases_late_stream() {
    let h = harness(test_config());
    h.controller.select_exercise(ExerciseKind::Squat).unwrap();
    let gate = h.camera.gate();

    let (result, ()) = tokio::join!(h.controller.start(), async {
        eventually("camera request", || h.camera.acquire_calls.load(SeqCst) == 1).await;
        assert_eq!(h.controller.phase(), Phase::StartingCamera);
        h.controller.teardown();
        gate.send(()).unwrap();
    });

    assert_eq!(result, Err(SessionError::Cancelled));
    assert_eq!(h.controller.phase(), Phase::Idle);
    assert_released(&h);
    assert_eq!(h.backend.poll_calls.load(SeqCst), 0);
}

#[tokio::test]
async fn dropped_start_returns_to_idle() {
    let h = harness(test_config());
    h.controller.select_exercise(ExerciseKind::Squat).unwrap();
    let gate = h.camera.gate();

    let res = timeout(Duration::from_millis(50), h.controller.start()).await;
    assert!(res.is_err(), "start should still be waiting on the camera");
    assert_eq!(h.camera.acquire_calls.load(SeqCst), 1);

    let state = h.controller.snapshot();
    assert_eq!(state.phase, Phase::Idle);
    assert!(state.session_id.is_none());
    assert_released(&h);

    // The abandoned acquisition went with the dropped future.
    let _ = gate.send(());
    h.controller.start().await.unwrap();
    assert_eq!(h.controller.phase(), Phase::Active);
    assert_eq!(h.controller.live_camera_tracks(), 1);
}

#[tokio::test]
async fn stop_while_starting_camera_ends_stopped() {
    let h = harness(test_config());
    h.controller.select_exercise(ExerciseKind::Lunge).unwrap();
    let gate = h.camera.gate();

    let (result, ()) = tokio::join!(h.controller.start(), async {
        eventually("camera request", || h.camera.acquire_calls.load(SeqCst) == 1).await;
        h.controller.stop();
        gate.send(()).unwrap();
    });

    assert_eq!(result, Err(SessionError::Cancelled));
    assert_eq!(h.controller.phase(), Phase::Stopped);
    assert_released(&h);
}

#[tokio::test]
async fn teardown_from_active_releases_everything() {
    let h = harness(test_config());
    h.backend.push(json!({ "reps": 3 }));
    start_active(&h).await;
    wait_for_state(&h.controller, |s| s.rep_count == 3).await;
    assert_eq!(h.controller.live_camera_tracks(), 1);
    assert!(h.controller.is_polling());

    h.controller.teardown();
    let state = h.controller.snapshot();
    assert_eq!(state.phase, Phase::Idle);
    assert_eq!(state.rep_count, 0);
    assert_released(&h);

    sleep(Duration::from_millis(10)).await;
    let polls = h.backend.poll_calls.load(SeqCst);
    sleep(Duration::from_millis(80)).await;
    assert_eq!(h.backend.poll_calls.load(SeqCst), polls, "no ticks after teardown");
}

#[tokio::test]
async fn teardown_from_stopped() {
    let h = harness(test_config());
    start_active(&h).await;
    h.controller.stop();
    h.controller.teardown();
    assert_eq!(h.controller.phase(), Phase::Idle);
    assert_released(&h);
}

#[tokio::test]
async fn dropping_controller_tears_down() {
    let h = harness(test_config());
    start_active(&h).await;
    assert_eq!(h.camera.live(), 1);

    let Harness {
        controller, camera, ..
    } = h;
    drop(controller);
    assert_eq!(camera.live(), 0);
}
