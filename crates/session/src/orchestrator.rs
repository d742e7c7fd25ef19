//! The liveness-session orchestrator.
//!
//! A timer-driven state machine (`Idle -> Starting -> Capturing ->
//! {Success | Failed}`) that creates a detection session, samples and
//! submits frames at a throttled cadence, interprets the backend's
//! heterogeneous replies, and records audio/video concurrently for the
//! later comparison step.
//!
//! Scheduling is an explicit loop in a single task, so frame submissions
//! are strictly sequential: the next frame is never scheduled until the
//! previous reply has been fully processed. Stop and reset cancel pending
//! sleeps synchronously; an in-flight submission cannot be recalled, so the
//! loop re-checks a capturing guard and its run generation after every
//! await and discards late replies instead of applying them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use liveproof_capture::{CameraStream, FrameSampler, VideoSurface};
use liveproof_common::error::LiveproofResult;
use liveproof_recorder::{Recorder, RecordingArtifact};

use crate::client::LivenessBackend;
use crate::types::{
    CaptureAttempt, DetectionConfig, DetectionState, FrameOutcome, LivenessDecision,
    SessionHandle, Severity, StatusMessage,
};

/// State shared between the public surface and the capture loop.
struct Inner {
    state: DetectionState,
    status: StatusMessage,
    decision: Option<LivenessDecision>,
    score: Option<f64>,
    attempts: Vec<CaptureAttempt>,
    frame_count: u32,
    /// The single mutable credentials slot. The loop reads it fresh on
    /// every tick; nothing captures a copy at schedule time.
    session: Option<SessionHandle>,
    countdown_deadline: Option<Instant>,
    artifact: Option<RecordingArtifact>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: DetectionState::Idle,
            status: StatusMessage::info("Camera ready. Start to begin liveness detection."),
            decision: None,
            score: None,
            attempts: Vec::new(),
            frame_count: 0,
            session: None,
            countdown_deadline: None,
            artifact: None,
        }
    }
}

/// Owns one detection attempt at a time and the recording that runs
/// alongside it.
pub struct LivenessOrchestrator {
    config: DetectionConfig,
    backend: Arc<dyn LivenessBackend>,
    stream: CameraStream,
    surface: Arc<dyn VideoSurface>,
    sampler: Arc<FrameSampler>,
    recorder: Arc<Mutex<Box<dyn Recorder>>>,
    inner: Arc<Mutex<Inner>>,
    capturing: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    cancel: Arc<Notify>,
}

impl LivenessOrchestrator {
    pub fn new(
        config: DetectionConfig,
        backend: Arc<dyn LivenessBackend>,
        stream: CameraStream,
        surface: Arc<dyn VideoSurface>,
        sampler: FrameSampler,
        recorder: Box<dyn Recorder>,
    ) -> Self {
        Self {
            config,
            backend,
            stream,
            surface,
            sampler: Arc::new(sampler),
            recorder: Arc::new(Mutex::new(recorder)),
            inner: Arc::new(Mutex::new(Inner::new())),
            capturing: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            cancel: Arc::new(Notify::new()),
        }
    }

    // ── Public surface ──────────────────────────────────────────────

    pub fn state(&self) -> DetectionState {
        self.lock().state
    }

    pub fn status_message(&self) -> StatusMessage {
        self.lock().status.clone()
    }

    pub fn decision(&self) -> Option<LivenessDecision> {
        self.lock().decision
    }

    pub fn liveness_score(&self) -> Option<f64> {
        self.lock().score
    }

    /// Attempt history, newest first.
    pub fn attempt_history(&self) -> Vec<CaptureAttempt> {
        self.lock().attempts.clone()
    }

    pub fn frame_count(&self) -> u32 {
        self.lock().frame_count
    }

    /// Identifier of the most recent session, kept for display after stop.
    pub fn session_id(&self) -> Option<String> {
        self.lock().session.as_ref().map(|s| s.session_id.clone())
    }

    /// Whole seconds until the next scheduled submission; 0 when nothing
    /// is scheduled.
    pub fn rate_limit_countdown(&self) -> u64 {
        match self.lock().countdown_deadline {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    0
                } else {
                    (deadline - now).as_secs_f64().ceil() as u64
                }
            }
            None => 0,
        }
    }

    /// The finalized recording of the current or previous attempt.
    pub fn recording_artifact(&self) -> Option<RecordingArtifact> {
        self.lock().artifact.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.lock_recorder().is_recording()
    }

    /// Elapsed recording time, whole seconds.
    pub fn recording_elapsed_secs(&self) -> u64 {
        self.lock_recorder().elapsed_secs()
    }

    /// Elapsed recording time as `MM:SS` for display.
    pub fn recording_label(&self) -> String {
        liveproof_common::clock::format_duration(self.recording_elapsed_secs())
    }

    /// The live video surface bound to the acquired camera.
    pub fn video_surface(&self) -> Arc<dyn VideoSurface> {
        Arc::clone(&self.surface)
    }

    /// Flip the microphone track; returns the new state. Applies to the
    /// running recording immediately, without renegotiating the stream.
    pub fn toggle_audio(&self) -> bool {
        let enabled = !self.stream.audio_enabled();
        self.stream.set_audio_enabled(enabled);
        self.lock_recorder().set_audio_enabled(enabled);
        enabled
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// `Idle -> Starting -> Capturing`: create a session, start recording,
    /// then enter the capture loop. A session-create failure is fatal to
    /// the attempt: state goes to `Failed` and no scheduling happens.
    ///
    /// Calling this while a previous attempt is capturing halts that
    /// attempt's scheduling first; two sessions' frame streams never
    /// interleave.
    pub async fn start_detection(&self) -> LiveproofResult<()> {
        self.halt_scheduling();
        // Only one recorder cycle may exist at a time; a cycle left over
        // from a superseded attempt is finalized and its artifact dropped,
        // like the rest of the prior attempt's results.
        self.finalize_recording(false);
        let run = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut inner = self.lock();
            inner.state = DetectionState::Starting;
            inner.status = StatusMessage::info("Creating liveness session...");
            inner.decision = None;
            inner.score = None;
            inner.attempts.clear();
            inner.frame_count = 0;
            inner.countdown_deadline = None;
            inner.artifact = None;
            inner.session = None;
        }

        let session = match self.backend.create_session().await {
            Ok(session) => session,
            Err(e) => {
                let mut inner = self.lock();
                inner.state = DetectionState::Failed;
                inner.status = StatusMessage::error(format!("Session creation failed: {e}"));
                return Err(e);
            }
        };

        tracing::info!(
            session = %session.session_id,
            model = %session.model_version,
            "Liveness session ready"
        );

        {
            let mut inner = self.lock();
            inner.status = StatusMessage::info(format!(
                "Session {} active ({}). Starting recording...",
                session.session_id, session.model_version
            ));
            inner.session = Some(session);
        }

        // Recording begins before the first frame goes out.
        if let Err(e) = self.lock_recorder().start() {
            let mut inner = self.lock();
            inner.state = DetectionState::Failed;
            inner.status = StatusMessage::error(format!("Recording failed to start: {e}"));
            return Err(e);
        }

        self.lock().state = DetectionState::Capturing;
        self.capturing.store(true, Ordering::SeqCst);

        let ctx = LoopCtx {
            config: self.config.clone(),
            backend: Arc::clone(&self.backend),
            surface: Arc::clone(&self.surface),
            sampler: Arc::clone(&self.sampler),
            recorder: Arc::clone(&self.recorder),
            inner: Arc::clone(&self.inner),
            capturing: Arc::clone(&self.capturing),
            generation: Arc::clone(&self.generation),
            run,
            cancel: Arc::clone(&self.cancel),
        };
        tokio::spawn(capture_loop(ctx));
        Ok(())
    }

    /// `Capturing -> Idle`. Cancels the pending schedule synchronously and
    /// finalizes the recording, keeping the artifact for comparison. The
    /// session identifier is retained for display. Idempotent.
    pub fn stop_detection(&self) {
        self.halt_scheduling();
        self.finalize_recording(true);

        let mut inner = self.lock();
        inner.state = DetectionState::Idle;
        inner.frame_count = 0;
        inner.countdown_deadline = None;
        inner.status = StatusMessage::info(
            "Stopped. The recording is kept — compare it now or start again to retry.",
        );
    }

    /// `{Success | Failed | *} -> Idle`. Clears session credentials,
    /// decision, attempt history, countdown, and discards the recording
    /// artifact. Idempotent.
    pub fn reset_detection(&self) {
        self.halt_scheduling();
        self.finalize_recording(false);

        let mut inner = self.lock();
        inner.state = DetectionState::Idle;
        inner.status = StatusMessage::info("Camera ready. Start to begin liveness detection.");
        inner.decision = None;
        inner.score = None;
        inner.attempts.clear();
        inner.frame_count = 0;
        inner.session = None;
        inner.countdown_deadline = None;
        inner.artifact = None;
    }

    // ── Internals ───────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_recorder(&self) -> MutexGuard<'_, Box<dyn Recorder>> {
        self.recorder.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop the guard and wake any pending sleep. In-flight submissions
    /// cannot be recalled; the loop discards their replies on resume.
    fn halt_scheduling(&self) {
        self.capturing.store(false, Ordering::SeqCst);
        self.cancel.notify_waiters();
    }

    /// Stop the recorder. A finalized cycle replaces the held artifact
    /// (`keep`), or is discarded on reset.
    fn finalize_recording(&self, keep: bool) {
        match self.lock_recorder().stop() {
            Ok(Some(artifact)) if keep => {
                tracing::info!(id = %artifact.id, "Recording kept");
                self.lock().artifact = Some(artifact);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to finalize recording"),
        }
    }
}

impl Drop for LivenessOrchestrator {
    fn drop(&mut self) {
        self.halt_scheduling();
    }
}

/// Everything the capture loop needs, detached from the orchestrator so
/// the loop owns no lock on the public surface.
struct LoopCtx {
    config: DetectionConfig,
    backend: Arc<dyn LivenessBackend>,
    surface: Arc<dyn VideoSurface>,
    sampler: Arc<FrameSampler>,
    recorder: Arc<Mutex<Box<dyn Recorder>>>,
    inner: Arc<Mutex<Inner>>,
    capturing: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    run: u64,
    cancel: Arc<Notify>,
}

impl LoopCtx {
    /// The guard check: still capturing, and still this run. Checked at
    /// the top of every tick and after every await.
    fn live(&self) -> bool {
        self.capturing.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == self.run
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, severity: Severity, text: impl Into<String>) {
        self.lock().status = StatusMessage {
            severity,
            text: text.into(),
        };
    }

    fn set_countdown(&self, delay: Duration) {
        self.lock().countdown_deadline = Some(Instant::now() + delay);
    }

    /// Sleep until the next tick. Returns false when the schedule was
    /// cancelled (or superseded) in the meantime.
    async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => self.live(),
            _ = self.cancel.notified() => false,
        }
    }

    /// Count one frame against the budget, adopting the backend's echoed
    /// number when present. Monotonic, capped at `max_frames`.
    fn count_frame(&self, confirmed: Option<u32>) -> u32 {
        let mut inner = self.lock();
        let candidate = confirmed.unwrap_or(inner.frame_count + 1);
        inner.frame_count = inner
            .frame_count
            .max(candidate)
            .min(self.config.max_frames);
        inner.frame_count
    }

    /// Best-effort history refresh; failures are logged and swallowed.
    async fn refresh_attempts(&self, session: &SessionHandle) {
        match self.backend.fetch_attempts(&session.session_id).await {
            Ok(attempts) if !attempts.is_empty() => {
                self.lock().attempts = attempts;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Attempt history fetch failed"),
        }
    }

    /// Terminal transition: stop scheduling, record the outcome, finalize
    /// the recording (artifact kept), and fetch the final history.
    async fn finish(
        &self,
        state: DetectionState,
        decision: Option<LivenessDecision>,
        score: Option<f64>,
        status: StatusMessage,
        session: &SessionHandle,
    ) {
        self.capturing.store(false, Ordering::SeqCst);
        {
            let mut inner = self.lock();
            inner.state = state;
            inner.decision = decision;
            inner.score = score;
            inner.status = status;
            inner.countdown_deadline = None;
        }

        let stopped = {
            let mut recorder = self.recorder.lock().unwrap_or_else(|e| e.into_inner());
            recorder.stop()
        };
        match stopped {
            Ok(Some(artifact)) => {
                tracing::info!(id = %artifact.id, "Recording finalized with the attempt");
                self.lock().artifact = Some(artifact);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to finalize recording"),
        }

        self.refresh_attempts(session).await;
    }
}

/// The scheduling loop. One iteration per tick; every branch either
/// terminates the session or waits out its delay before the next
/// submission, so submissions are strictly sequential.
async fn capture_loop(ctx: LoopCtx) {
    let interval = ctx.config.frame_interval;
    let interval_secs = interval.as_secs().max(1);
    let max_frames = ctx.config.max_frames;

    loop {
        if !ctx.live() {
            return;
        }

        // Credentials come from the live slot, never from a copy captured
        // at schedule time.
        let Some(session) = ctx.lock().session.clone() else {
            return;
        };

        let frame_no = ctx.lock().frame_count + 1;
        ctx.set_status(
            Severity::Info,
            format!("Sending frame {frame_no}/{max_frames}..."),
        );

        let Some(image) = ctx.sampler.capture(ctx.surface.as_ref()) else {
            // Feed not ready; retry without burning a frame slot.
            tracing::debug!("No usable frame from the surface");
            ctx.set_status(
                Severity::Warning,
                "Camera not ready — make sure your face is visible",
            );
            ctx.set_countdown(interval);
            if !ctx.wait(interval).await {
                return;
            }
            continue;
        };

        let reply = ctx.backend.submit_frame(&session, &image.to_data_url()).await;

        // A stop or reset issued while the submission was in flight wins:
        // the late reply is discarded, never applied.
        if !ctx.live() {
            tracing::debug!(session = %session.session_id, "Discarding late frame reply");
            return;
        }

        match reply.outcome {
            FrameOutcome::Decision { kind, score, .. } => {
                let (state, status) = match kind {
                    LivenessDecision::RealFace => {
                        let confidence = score
                            .map(|s| format!(" | confidence: {:.2}%", s * 100.0))
                            .unwrap_or_default();
                        (
                            DetectionState::Success,
                            StatusMessage::success(format!(
                                "livenessDecision: realface{confidence}"
                            )),
                        )
                    }
                    LivenessDecision::SpoofFace => (
                        DetectionState::Failed,
                        StatusMessage::error("livenessDecision: spoofface"),
                    ),
                };
                tracing::info!(decision = kind.as_str(), ?score, "Liveness decision received");
                ctx.finish(state, Some(kind), score, status, &session).await;
                return;
            }

            FrameOutcome::RateLimited { retry_after } => {
                let delay = retry_after.unwrap_or(interval) + ctx.config.rate_limit_margin;
                tracing::warn!(delay_ms = delay.as_millis() as u64, "Rate limited");
                ctx.set_status(
                    Severity::Warning,
                    format!("Rate limited — next frame in {}s", delay.as_secs().max(1)),
                );
                ctx.set_countdown(delay);
                if !ctx.wait(delay).await {
                    return;
                }
            }

            FrameOutcome::SessionExhausted => {
                tracing::warn!(session = %session.session_id, "Session out of attempts");
                ctx.finish(
                    DetectionState::Failed,
                    None,
                    None,
                    StatusMessage::error(
                        "No liveness decision and the session is out of attempts. Reset to start a new session.",
                    ),
                    &session,
                )
                .await;
                return;
            }

            FrameOutcome::SoftError { code, message } => {
                let count = ctx.count_frame(reply.confirmed_frame);
                if count >= max_frames {
                    ctx.finish(
                        DetectionState::Failed,
                        None,
                        None,
                        StatusMessage::warning(format!(
                            "All {max_frames} frames sent — no decision received. Reset to try again.",
                        )),
                        &session,
                    )
                    .await;
                    return;
                }
                // The user may fix framing/lighting before the next scan.
                ctx.refresh_attempts(&session).await;
                if !ctx.live() {
                    return;
                }
                ctx.set_status(
                    Severity::Info,
                    format!(
                        "error.code: {code} | {message} — frame {count}/{max_frames} done. Next scan in {interval_secs}s, keep still..."
                    ),
                );
                ctx.set_countdown(interval);
                if !ctx.wait(interval).await {
                    return;
                }
            }

            FrameOutcome::Unknown { .. } => {
                let count = ctx.count_frame(reply.confirmed_frame);
                if count >= max_frames {
                    ctx.finish(
                        DetectionState::Failed,
                        None,
                        None,
                        StatusMessage::warning(format!(
                            "All {max_frames} frames sent — no decision received. Reset to try again.",
                        )),
                        &session,
                    )
                    .await;
                    return;
                }
                ctx.set_status(
                    Severity::Info,
                    format!(
                        "Frame {count}/{max_frames} done. Next scan in {interval_secs}s — keep still..."
                    ),
                );
                ctx.set_countdown(interval);
                if !ctx.wait(interval).await {
                    return;
                }
            }

            FrameOutcome::TransportError { message } => {
                // Transient by policy: retried on the standard cadence,
                // never counted, never escalated directly to failure.
                tracing::warn!(error = %message, "Frame submission failed; retrying");
                ctx.set_status(
                    Severity::Warning,
                    format!("Network error: {message} — retrying..."),
                );
                if !ctx.wait(interval).await {
                    return;
                }
            }
        }
    }
}
