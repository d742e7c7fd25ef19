//! Request layer for the remote liveness backend.
//!
//! Three endpoints: session creation, frame submission, and the
//! best-effort attempt-history fetch. Every transport failure on the frame
//! path is absorbed into a `FrameOutcome` so the orchestrator's state
//! machine never handles raw errors mid-loop.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use liveproof_common::error::{LiveproofError, LiveproofResult};

use crate::types::{
    CaptureAttempt, FrameOutcome, FrameReply, LivenessDecision, SessionHandle,
};

/// The remote detection service, from the orchestrator's point of view.
#[async_trait]
pub trait LivenessBackend: Send + Sync {
    /// Create a fresh session. Failure here is fatal to the attempt.
    async fn create_session(&self) -> LiveproofResult<SessionHandle>;

    /// Submit one frame. Infallible by construction: transport failures
    /// come back as `FrameOutcome::TransportError`.
    async fn submit_frame(&self, session: &SessionHandle, image_data_url: &str) -> FrameReply;

    /// Fetch the session's attempt history, newest first. Best-effort
    /// display enrichment; callers swallow failures.
    async fn fetch_attempts(&self, session_id: &str) -> LiveproofResult<Vec<CaptureAttempt>>;
}

/// HTTP implementation of the backend contract.
pub struct HttpLivenessClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpLivenessClient {
    pub fn new(base_url: impl Into<String>) -> LiveproofResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| LiveproofError::session(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl LivenessBackend for HttpLivenessClient {
    async fn create_session(&self) -> LiveproofResult<SessionHandle> {
        let url = format!("{}/liveness/start", self.base_url);
        let res = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(|e| LiveproofError::session(format!("Session create request failed: {e}")))?;

        let status = res.status();
        let body: Value = res.json().await.unwrap_or(Value::Null);

        if !status.is_success() {
            return Err(LiveproofError::session(format!(
                "Session creation failed ({status}): {body}"
            )));
        }

        let session_id = body.get("sessionId").and_then(Value::as_str);
        let auth_token = body.get("authToken").and_then(Value::as_str);
        match (session_id, auth_token) {
            (Some(session_id), Some(auth_token)) => Ok(SessionHandle {
                session_id: session_id.to_string(),
                auth_token: auth_token.to_string(),
                model_version: body
                    .get("modelVersion")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            }),
            _ => Err(LiveproofError::session(format!(
                "Session create response missing sessionId/authToken: {body}"
            ))),
        }
    }

    async fn submit_frame(&self, session: &SessionHandle, image_data_url: &str) -> FrameReply {
        let url = format!("{}/liveness/frame/{}", self.base_url, session.session_id);
        let body = serde_json::json!({
            "image": image_data_url,
            "authToken": session.auth_token,
        });

        let res = match self.http.post(&url).json(&body).send().await {
            Ok(res) => res,
            Err(e) => {
                return FrameReply::outcome(FrameOutcome::TransportError {
                    message: e.to_string(),
                })
            }
        };

        let status = res.status();
        let payload: Value = match res.json().await {
            Ok(payload) => payload,
            Err(e) => {
                return FrameReply::outcome(FrameOutcome::TransportError {
                    message: format!("Undecodable frame response: {e}"),
                })
            }
        };

        interpret_frame_response(status, payload)
    }

    async fn fetch_attempts(&self, session_id: &str) -> LiveproofResult<Vec<CaptureAttempt>> {
        let url = format!("{}/liveness/result/{session_id}", self.base_url);
        let res = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| LiveproofError::session(format!("Result fetch failed: {e}")))?;
        let body: Value = res
            .json()
            .await
            .map_err(|e| LiveproofError::session(format!("Undecodable result response: {e}")))?;

        let mut attempts: Vec<CaptureAttempt> = body
            .pointer("/results/attempts")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        attempts.sort_by(|a, b| b.attempt_id.cmp(&a.attempt_id));
        Ok(attempts)
    }
}

/// Discriminate the frame-submission response into the tagged outcome.
///
/// The contract: HTTP 429 with a `code` of `CLIENT_RATE_LIMITED` (throttle,
/// carries `retryAfterMs`) or `MAX_FRAMES_REACHED` (session exhausted);
/// otherwise a JSON body carrying `livenessDecision`, an
/// `errorCode`/`errorMessage` pair, or nothing recognizable.
fn interpret_frame_response(status: reqwest::StatusCode, payload: Value) -> FrameReply {
    let confirmed_frame = payload
        .get("frameNumber")
        .and_then(Value::as_u64)
        .map(|n| n as u32);

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        match payload.get("code").and_then(Value::as_str) {
            Some("CLIENT_RATE_LIMITED") => {
                let retry_after = payload
                    .get("retryAfterMs")
                    .and_then(Value::as_u64)
                    .map(Duration::from_millis);
                return FrameReply::outcome(FrameOutcome::RateLimited { retry_after });
            }
            Some("MAX_FRAMES_REACHED") => {
                return FrameReply::outcome(FrameOutcome::SessionExhausted);
            }
            _ => {}
        }
    }

    // Some deployments nest the decision payload under `data`.
    let decision_holder = if payload.get("livenessDecision").is_some() {
        Some(&payload)
    } else {
        payload
            .get("data")
            .filter(|d| d.get("livenessDecision").is_some())
    };

    if let Some(holder) = decision_holder {
        let kind = match holder.get("livenessDecision").and_then(Value::as_str) {
            Some("realface") => Some(LivenessDecision::RealFace),
            Some("spoofface") => Some(LivenessDecision::SpoofFace),
            _ => None,
        };
        if let Some(kind) = kind {
            let score = holder.get("livenessScore").and_then(Value::as_f64);
            return FrameReply {
                outcome: FrameOutcome::Decision {
                    kind,
                    score,
                    raw: payload.clone(),
                },
                confirmed_frame,
            };
        }
    }

    if let Some(code) = payload.get("errorCode").and_then(Value::as_str) {
        let message = payload
            .get("errorMessage")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return FrameReply {
            outcome: FrameOutcome::SoftError {
                code: code.to_string(),
                message,
            },
            confirmed_frame,
        };
    }

    FrameReply {
        outcome: FrameOutcome::Unknown { raw: payload },
        confirmed_frame,
    }
}
