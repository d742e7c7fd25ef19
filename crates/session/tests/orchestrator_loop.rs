//! End-to-end tests of the detection state machine against a scripted
//! backend, a synthetic camera surface, and a fake recorder. Time is
//! tokio's paused clock, so every schedule is driven deterministically.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use liveproof_capture::{CameraStream, FrameSampler, RawFrame, VideoSurface};
use liveproof_common::error::{LiveproofError, LiveproofResult};
use liveproof_recorder::{Recorder, RecordingArtifact};
use liveproof_session::{
    CaptureAttempt, DetectionConfig, DetectionState, FrameOutcome, FrameReply, LivenessBackend,
    LivenessDecision, LivenessOrchestrator, SessionHandle,
};

// ── Fakes ───────────────────────────────────────────────────────────

/// Camera surface producing deterministic noise frames (large enough to
/// clear the sampler's blank-frame threshold).
struct NoiseSurface;

impl VideoSurface for NoiseSurface {
    fn current_frame(&self) -> Option<RawFrame> {
        let (width, height) = (320, 240);
        let mut state: u32 = 0x2545f491;
        let mut rgb = Vec::with_capacity(width * height * 3);
        for _ in 0..width * height * 3 {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            rgb.push((state >> 24) as u8);
        }
        Some(RawFrame {
            width: width as u32,
            height: height as u32,
            rgb,
        })
    }
}

/// A camera that never becomes ready.
struct BlindSurface;

impl VideoSurface for BlindSurface {
    fn current_frame(&self) -> Option<RawFrame> {
        None
    }
}

#[derive(Default)]
struct RecorderProbe {
    cycles_finalized: AtomicU32,
    last_audio: Mutex<Option<bool>>,
}

struct FakeRecorder {
    probe: Arc<RecorderProbe>,
    recording: bool,
    cycles: u32,
}

impl FakeRecorder {
    fn new(probe: Arc<RecorderProbe>) -> Self {
        Self {
            probe,
            recording: false,
            cycles: 0,
        }
    }
}

impl Recorder for FakeRecorder {
    fn start(&mut self) -> LiveproofResult<()> {
        if self.recording {
            return Err(LiveproofError::recording("Recording already in progress"));
        }
        self.recording = true;
        self.cycles += 1;
        Ok(())
    }

    fn stop(&mut self) -> LiveproofResult<Option<RecordingArtifact>> {
        if !self.recording {
            return Ok(None);
        }
        self.recording = false;
        self.probe.cycles_finalized.fetch_add(1, Ordering::SeqCst);
        Ok(Some(RecordingArtifact {
            id: format!("rec-{}", self.cycles),
            path: PathBuf::from(format!("/tmp/rec-{}.mkv", self.cycles)),
            duration_secs: 0,
            size_bytes: 1024,
        }))
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn elapsed_secs(&self) -> u64 {
        0
    }

    fn set_audio_enabled(&mut self, enabled: bool) {
        *self.probe.last_audio.lock().unwrap() = Some(enabled);
    }
}

/// Backend serving a scripted reply sequence; once the script runs dry it
/// keeps answering with a counted soft error so every session terminates.
struct ScriptedBackend {
    create_fails: bool,
    sessions: AtomicU32,
    replies: Mutex<VecDeque<FrameReply>>,
    submit_times: Mutex<Vec<Instant>>,
    attempts: Vec<CaptureAttempt>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<FrameReply>) -> Arc<Self> {
        Arc::new(Self {
            create_fails: false,
            sessions: AtomicU32::new(0),
            replies: Mutex::new(replies.into()),
            submit_times: Mutex::new(Vec::new()),
            attempts: vec![
                attempt(2, "failed"),
                attempt(1, "failed"),
            ],
            gate: None,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            create_fails: true,
            sessions: AtomicU32::new(0),
            replies: Mutex::new(VecDeque::new()),
            submit_times: Mutex::new(Vec::new()),
            attempts: Vec::new(),
            gate: None,
        })
    }

    fn gated(replies: Vec<FrameReply>, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            create_fails: false,
            sessions: AtomicU32::new(0),
            replies: Mutex::new(replies.into()),
            submit_times: Mutex::new(Vec::new()),
            attempts: Vec::new(),
            gate: Some(gate),
        })
    }

    fn submit_count(&self) -> usize {
        self.submit_times.lock().unwrap().len()
    }

    fn submit_times(&self) -> Vec<Instant> {
        self.submit_times.lock().unwrap().clone()
    }
}

#[async_trait]
impl LivenessBackend for ScriptedBackend {
    async fn create_session(&self) -> LiveproofResult<SessionHandle> {
        if self.create_fails {
            return Err(LiveproofError::session(
                "Session creation failed (500 Internal Server Error)",
            ));
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionHandle {
            session_id: format!("sess-{n}"),
            auth_token: format!("token-{n}"),
            model_version: "2024-11-15".to_string(),
        })
    }

    async fn submit_frame(&self, _session: &SessionHandle, image: &str) -> FrameReply {
        assert!(image.starts_with("data:image/jpeg;base64,"));
        self.submit_times.lock().unwrap().push(Instant::now());
        if let Some(gate) = &self.gate {
            let _ = gate.acquire().await;
        }
        self.replies.lock().unwrap().pop_front().unwrap_or_else(|| {
            FrameReply::outcome(FrameOutcome::SoftError {
                code: "FaceNotDetected".to_string(),
                message: "No face found in the frame".to_string(),
            })
        })
    }

    async fn fetch_attempts(&self, _session_id: &str) -> LiveproofResult<Vec<CaptureAttempt>> {
        Ok(self.attempts.clone())
    }
}

fn attempt(id: u64, status: &str) -> CaptureAttempt {
    CaptureAttempt {
        attempt_id: id,
        status: status.to_string(),
        error: None,
        result: None,
    }
}

fn real_face(score: f64) -> FrameReply {
    FrameReply::outcome(FrameOutcome::Decision {
        kind: LivenessDecision::RealFace,
        score: Some(score),
        raw: serde_json::json!({"livenessDecision": "realface", "livenessScore": score}),
    })
}

fn spoof_face() -> FrameReply {
    FrameReply::outcome(FrameOutcome::Decision {
        kind: LivenessDecision::SpoofFace,
        score: None,
        raw: serde_json::json!({"livenessDecision": "spoofface"}),
    })
}

fn soft_error(code: &str) -> FrameReply {
    FrameReply::outcome(FrameOutcome::SoftError {
        code: code.to_string(),
        message: String::new(),
    })
}

fn rate_limited(ms: u64) -> FrameReply {
    FrameReply::outcome(FrameOutcome::RateLimited {
        retry_after: Some(Duration::from_millis(ms)),
    })
}

struct Fixture {
    orch: LivenessOrchestrator,
    backend: Arc<ScriptedBackend>,
    probe: Arc<RecorderProbe>,
    stream: CameraStream,
}

fn fixture(backend: Arc<ScriptedBackend>, config: DetectionConfig) -> Fixture {
    fixture_on(backend, config, Arc::new(NoiseSurface))
}

fn fixture_on(
    backend: Arc<ScriptedBackend>,
    config: DetectionConfig,
    surface: Arc<dyn VideoSurface>,
) -> Fixture {
    let probe = Arc::new(RecorderProbe::default());
    let stream = CameraStream::new("/dev/video9".to_string(), true);
    let orch = LivenessOrchestrator::new(
        config,
        backend.clone(),
        stream.clone(),
        surface,
        FrameSampler::with_defaults(),
        Box::new(FakeRecorder::new(probe.clone())),
    );
    Fixture {
        orch,
        backend,
        probe,
        stream,
    }
}

/// Let virtual time pass; the paused clock auto-advances through every
/// pending timer, waking the capture loop along the way.
async fn drive(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn realface_decision_completes_with_success() {
    let f = fixture(
        ScriptedBackend::new(vec![real_face(0.97)]),
        DetectionConfig::default(),
    );

    f.orch.start_detection().await.unwrap();
    drive(10).await;

    assert_eq!(f.orch.state(), DetectionState::Success);
    assert_eq!(f.orch.decision(), Some(LivenessDecision::RealFace));
    assert_eq!(f.orch.liveness_score(), Some(0.97));
    assert!(f.orch.recording_artifact().is_some());
    assert!(!f.orch.is_recording());
    assert_eq!(f.probe.cycles_finalized.load(Ordering::SeqCst), 1);
    // history enrichment arrived, newest first
    let history = f.orch.attempt_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].attempt_id, 2);

    // terminal state is quiescent: no further submissions, ever
    drive(120_000).await;
    assert_eq!(f.backend.submit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn spoofface_decision_fails_but_keeps_the_recording() {
    let f = fixture(
        ScriptedBackend::new(vec![spoof_face()]),
        DetectionConfig::default(),
    );

    f.orch.start_detection().await.unwrap();
    drive(10).await;

    assert_eq!(f.orch.state(), DetectionState::Failed);
    assert_eq!(f.orch.decision(), Some(LivenessDecision::SpoofFace));
    assert!(f.orch.recording_artifact().is_some());
}

#[tokio::test(start_paused = true)]
async fn soft_errors_exhaust_the_frame_budget() {
    let config = DetectionConfig {
        max_frames: 5,
        ..DetectionConfig::default()
    };
    let f = fixture(
        ScriptedBackend::new(vec![soft_error("FaceTooDark"); 5]),
        config,
    );

    f.orch.start_detection().await.unwrap();
    drive(120_000).await;

    assert_eq!(f.orch.state(), DetectionState::Failed);
    assert_eq!(f.orch.decision(), None);
    assert_eq!(f.orch.frame_count(), 5);
    // the 5th counted reply is terminal; no 6th call is ever issued
    assert_eq!(f.backend.submit_count(), 5);
    assert!(f.orch.recording_artifact().is_some());
}

#[tokio::test(start_paused = true)]
async fn rate_limited_replies_never_count_and_respect_the_delay() {
    let f = fixture(
        ScriptedBackend::new(vec![rate_limited(8000), real_face(0.9)]),
        DetectionConfig::default(),
    );

    f.orch.start_detection().await.unwrap();
    drive(10).await;

    // throttled: no budget burned, countdown exposed for display
    assert_eq!(f.orch.state(), DetectionState::Capturing);
    assert_eq!(f.orch.frame_count(), 0);
    assert_eq!(f.backend.submit_count(), 1);
    assert!(f.orch.rate_limit_countdown() >= 1);

    drive(60_000).await;
    assert_eq!(f.orch.state(), DetectionState::Success);
    assert_eq!(f.backend.submit_count(), 2);

    let times = f.backend.submit_times();
    let gap = times[1] - times[0];
    assert!(
        gap >= Duration::from_millis(8000),
        "second submission fired after {gap:?}, before the retry delay"
    );
}

#[tokio::test(start_paused = true)]
async fn transport_errors_retry_on_the_standard_cadence_without_counting() {
    let f = fixture(
        ScriptedBackend::new(vec![
            FrameReply::outcome(FrameOutcome::TransportError {
                message: "connection reset".to_string(),
            }),
            real_face(0.9),
        ]),
        DetectionConfig::default(),
    );

    f.orch.start_detection().await.unwrap();
    drive(10).await;
    assert_eq!(f.orch.state(), DetectionState::Capturing);
    assert_eq!(f.orch.frame_count(), 0);

    drive(60_000).await;
    assert_eq!(f.orch.state(), DetectionState::Success);
    assert_eq!(f.backend.submit_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn session_exhausted_fails_immediately() {
    let f = fixture(
        ScriptedBackend::new(vec![FrameReply::outcome(FrameOutcome::SessionExhausted)]),
        DetectionConfig::default(),
    );

    f.orch.start_detection().await.unwrap();
    drive(10).await;

    assert_eq!(f.orch.state(), DetectionState::Failed);
    assert_eq!(f.backend.submit_count(), 1);
    assert!(f.orch.recording_artifact().is_some());
}

#[tokio::test(start_paused = true)]
async fn confirmed_frame_numbers_override_the_local_count() {
    // Backend says this was frame 3; the local counter must follow.
    let reply = FrameReply {
        outcome: FrameOutcome::SoftError {
            code: "FaceNotFrontal".to_string(),
            message: String::new(),
        },
        confirmed_frame: Some(3),
    };
    let f = fixture(
        ScriptedBackend::new(vec![reply, real_face(0.8)]),
        DetectionConfig::default(),
    );

    f.orch.start_detection().await.unwrap();
    drive(10).await;
    assert_eq!(f.orch.frame_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn stop_mid_flight_discards_the_late_reply() {
    let gate = Arc::new(Semaphore::new(0));
    // The gated reply would be terminal success if it were ever applied.
    let f = fixture(
        ScriptedBackend::gated(vec![real_face(0.99)], gate.clone()),
        DetectionConfig::default(),
    );

    f.orch.start_detection().await.unwrap();
    drive(10).await;
    assert_eq!(f.backend.submit_count(), 1);

    // Stop while the submission is in flight; scheduling dies now.
    f.orch.stop_detection();
    assert_eq!(f.orch.state(), DetectionState::Idle);
    assert!(f.orch.recording_artifact().is_some());

    // The response arrives after the stop and must change nothing.
    gate.add_permits(1);
    drive(10).await;
    assert_eq!(f.orch.state(), DetectionState::Idle);
    assert_eq!(f.orch.decision(), None);

    drive(120_000).await;
    assert_eq!(f.backend.submit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_before_any_frame_still_finalizes_the_recording() {
    let f = fixture_on(
        ScriptedBackend::new(Vec::new()),
        DetectionConfig::default(),
        Arc::new(BlindSurface),
    );

    f.orch.start_detection().await.unwrap();
    drive(10).await;
    assert_eq!(f.backend.submit_count(), 0);
    assert!(f.orch.is_recording());

    f.orch.stop_detection();
    assert_eq!(f.orch.state(), DetectionState::Idle);
    let artifact = f.orch.recording_artifact().expect("artifact from empty attempt");
    assert_eq!(artifact.id, "rec-1");
    assert_eq!(f.probe.cycles_finalized.load(Ordering::SeqCst), 1);

    // stop is idempotent; the cycle finalized exactly once
    f.orch.stop_detection();
    assert_eq!(f.probe.cycles_finalized.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_session_create_never_schedules_anything() {
    let f = fixture(ScriptedBackend::failing(), DetectionConfig::default());

    let err = f.orch.start_detection().await.unwrap_err();
    assert!(err.to_string().contains("Session"));
    assert_eq!(f.orch.state(), DetectionState::Failed);
    assert_eq!(f.orch.session_id(), None);

    drive(120_000).await;
    assert_eq!(f.backend.submit_count(), 0);
    assert_eq!(f.probe.cycles_finalized.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn reset_clears_result_history_and_recording() {
    let f = fixture(
        ScriptedBackend::new(vec![real_face(0.97)]),
        DetectionConfig::default(),
    );

    f.orch.start_detection().await.unwrap();
    drive(10).await;
    assert_eq!(f.orch.state(), DetectionState::Success);

    f.orch.reset_detection();
    assert_eq!(f.orch.state(), DetectionState::Idle);
    assert_eq!(f.orch.decision(), None);
    assert_eq!(f.orch.session_id(), None);
    assert!(f.orch.attempt_history().is_empty());
    assert_eq!(f.orch.frame_count(), 0);
    assert_eq!(f.orch.rate_limit_countdown(), 0);
    assert!(f.orch.recording_artifact().is_none());
}

#[tokio::test(start_paused = true)]
async fn stop_keeps_the_session_id_for_display() {
    let f = fixture(
        ScriptedBackend::new(vec![soft_error("FaceTooDark"); 3]),
        DetectionConfig::default(),
    );

    f.orch.start_detection().await.unwrap();
    drive(10).await;
    assert_eq!(f.orch.session_id().as_deref(), Some("sess-1"));

    f.orch.stop_detection();
    assert_eq!(f.orch.session_id().as_deref(), Some("sess-1"));
    assert_eq!(f.orch.frame_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn restarting_supersedes_the_previous_session() {
    let gate = Arc::new(Semaphore::new(0));
    // First reply belongs to session 1 and is stale by the time it lands;
    // second reply resolves session 2.
    let f = fixture(
        ScriptedBackend::gated(vec![spoof_face(), real_face(0.91)], gate.clone()),
        DetectionConfig::default(),
    );

    f.orch.start_detection().await.unwrap();
    drive(10).await;
    assert_eq!(f.backend.submit_count(), 1);

    // Start over while session 1's submission is still in flight.
    f.orch.start_detection().await.unwrap();
    assert_eq!(f.orch.session_id().as_deref(), Some("sess-2"));
    drive(10).await;

    gate.add_permits(1);
    drive(60_000).await;

    // Session 1's spoof verdict was discarded; session 2's success applied.
    assert_eq!(f.orch.state(), DetectionState::Success);
    assert_eq!(f.orch.decision(), Some(LivenessDecision::RealFace));
    assert_eq!(f.backend.submit_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn toggle_audio_reaches_the_live_recording() {
    let f = fixture(
        ScriptedBackend::new(vec![soft_error("FaceTooDark"); 2]),
        DetectionConfig::default(),
    );

    f.orch.start_detection().await.unwrap();
    drive(10).await;

    assert!(f.stream.audio_enabled());
    assert!(!f.orch.toggle_audio());
    assert!(!f.stream.audio_enabled());
    assert_eq!(*f.probe.last_audio.lock().unwrap(), Some(false));

    assert!(f.orch.toggle_audio());
    assert_eq!(*f.probe.last_audio.lock().unwrap(), Some(true));
}

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(24))]

    /// Over any mix of counted (soft error, unknown) and uncounted
    /// (rate-limited, transport) replies, the counter rises by exactly one
    /// per counted reply, never exceeds the budget, and the attempt fails
    /// exactly at exhaustion with no extra submissions.
    #[test]
    fn frame_budget_accounting_is_exact(tokens in proptest::collection::vec(0u8..4u8, 0..12)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async {
            let max_frames = 4u32;
            let replies: Vec<FrameReply> = tokens
                .iter()
                .map(|t| match *t {
                    0 => soft_error("FaceTooDark"),
                    1 => FrameReply::outcome(FrameOutcome::Unknown {
                        raw: serde_json::json!({"processing": true}),
                    }),
                    2 => rate_limited(100),
                    _ => FrameReply::outcome(FrameOutcome::TransportError {
                        message: "connection reset".to_string(),
                    }),
                })
                .collect();

            // Counted tokens burn budget until exhaustion; the scripted
            // backend fills in counted soft errors once the script runs dry.
            let mut counted = 0u32;
            let mut expected_submits = 0usize;
            for t in &tokens {
                expected_submits += 1;
                if *t <= 1 {
                    counted += 1;
                    if counted == max_frames {
                        break;
                    }
                }
            }
            if counted < max_frames {
                expected_submits += (max_frames - counted) as usize;
            }

            let config = DetectionConfig {
                max_frames,
                frame_interval: Duration::from_millis(500),
                ..DetectionConfig::default()
            };
            let f = fixture(ScriptedBackend::new(replies), config);
            f.orch.start_detection().await.unwrap();
            drive(600_000).await;

            assert_eq!(f.orch.state(), DetectionState::Failed);
            assert_eq!(f.orch.frame_count(), max_frames);
            assert_eq!(f.backend.submit_count(), expected_submits);
        });
    }
}

#[tokio::test(start_paused = true)]
async fn not_ready_frames_burn_no_budget() {
    let f = fixture_on(
        ScriptedBackend::new(vec![real_face(0.9)]),
        DetectionConfig::default(),
        Arc::new(BlindSurface),
    );

    f.orch.start_detection().await.unwrap();
    drive(60_000).await;

    // the surface never produced a frame: nothing submitted, nothing counted
    assert_eq!(f.backend.submit_count(), 0);
    assert_eq!(f.orch.frame_count(), 0);
    assert_eq!(f.orch.state(), DetectionState::Capturing);
}
