//! Session types shared by the client and the orchestrator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use liveproof_common::config::DetectionDefaults;

/// Credentials for one remote liveness session. Held only in process
/// memory and only in the orchestrator's active-session slot.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub auth_token: String,
    pub model_version: String,
}

/// The remote service's verdict on a face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessDecision {
    RealFace,
    SpoofFace,
}

impl LivenessDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RealFace => "realface",
            Self::SpoofFace => "spoofface",
        }
    }
}

/// Outcome of one frame submission, as interpreted at the client boundary.
/// Every remote-call failure is folded into a variant here; the
/// orchestrator never sees a raw transport error.
#[derive(Debug, Clone)]
pub enum FrameOutcome {
    /// Terminal decision from the detector.
    Decision {
        kind: LivenessDecision,
        score: Option<f64>,
        raw: serde_json::Value,
    },

    /// The backend throttled this submission. Never counted against the
    /// frame budget; `None` means the backend gave no retry hint.
    RateLimited { retry_after: Option<Duration> },

    /// Face-quality or positioning issue (too dark, not frontal, masked).
    /// Counted against the frame budget.
    SoftError { code: String, message: String },

    /// The session has no attempts left; terminal failure.
    SessionExhausted,

    /// Recognizable response with no decision yet; counted.
    Unknown { raw: serde_json::Value },

    /// Transport-level failure. Retried on the standard cadence, never
    /// counted.
    TransportError { message: String },
}

/// A frame outcome plus the frame number the backend confirmed, when the
/// reply echoes one. The orchestrator adopts the echo over its local count.
#[derive(Debug, Clone)]
pub struct FrameReply {
    pub outcome: FrameOutcome,
    pub confirmed_frame: Option<u32>,
}

impl FrameReply {
    pub fn outcome(outcome: FrameOutcome) -> Self {
        Self {
            outcome,
            confirmed_frame: None,
        }
    }
}

/// One submitted frame and its outcome, as reported by the backend's
/// result endpoint. Display order is newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureAttempt {
    #[serde(rename = "attemptId")]
    pub attempt_id: u64,

    #[serde(rename = "attemptStatus", default)]
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Orchestrator state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionState {
    Idle,
    Starting,
    Capturing,
    Success,
    Failed,
}

/// Severity of a user-facing status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// A user-facing status line mirroring the raw backend output.
#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub severity: Severity,
    pub text: String,
}

impl StatusMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Success,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            text: text.into(),
        }
    }
}

/// Orchestrator tuning.
///
/// `frame_interval` sits deliberately above the backend's per-session rate
/// limit so throttled replies are the exception; `max_frames` bounds the
/// cost and latency of a single attempt.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Fixed interval between frame submissions.
    pub frame_interval: Duration,

    /// Frame budget per session.
    pub max_frames: u32,

    /// Safety margin added on top of a backend retry hint.
    pub rate_limit_margin: Duration,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(8000),
            max_frames: 5,
            rate_limit_margin: Duration::from_millis(250),
        }
    }
}

impl DetectionConfig {
    pub fn from_defaults(defaults: &DetectionDefaults) -> Self {
        Self {
            frame_interval: Duration::from_millis(defaults.frame_interval_ms),
            max_frames: defaults.max_frames,
            ..Self::default()
        }
    }
}
