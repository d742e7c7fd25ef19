//! Comparison submission: a reference image plus the finalized recording.
//!
//! One endpoint of the comparison service matters here: the one the
//! recording artifact feeds. The verdict comes back as raw JSON for the
//! caller to display.

use std::path::Path;
use std::time::Duration;

use liveproof_common::error::{LiveproofError, LiveproofResult};
use liveproof_recorder::RecordingArtifact;

/// Comparisons run the whole video through the backend's face pipeline,
/// so the request timeout is minutes, not seconds.
const COMPARISON_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub struct ComparisonClient {
    base_url: String,
    http: reqwest::Client,
}

impl ComparisonClient {
    pub fn new(base_url: impl Into<String>) -> LiveproofResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(COMPARISON_TIMEOUT)
            .build()
            .map_err(|e| LiveproofError::comparison(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Submit the recording against a reference image and return the
    /// backend's comparison verdict.
    pub async fn verify_video(
        &self,
        reference_image: &Path,
        recording: &RecordingArtifact,
    ) -> LiveproofResult<serde_json::Value> {
        let reference = tokio::fs::read(reference_image).await.map_err(|e| {
            LiveproofError::comparison(format!(
                "Cannot read reference image {}: {e}",
                reference_image.display()
            ))
        })?;
        let video = tokio::fs::read(&recording.path).await.map_err(|e| {
            LiveproofError::comparison(format!(
                "Cannot read recording {}: {e}",
                recording.path.display()
            ))
        })?;

        let reference_name = reference_image
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("reference.jpg")
            .to_string();

        let form = reqwest::multipart::Form::new()
            .part(
                "reference_image",
                reqwest::multipart::Part::bytes(reference)
                    .file_name(reference_name)
                    .mime_str("image/jpeg")
                    .map_err(|e| LiveproofError::comparison(e.to_string()))?,
            )
            .part(
                "video",
                reqwest::multipart::Part::bytes(video)
                    .file_name(format!("{}.mkv", recording.id))
                    .mime_str("video/x-matroska")
                    .map_err(|e| LiveproofError::comparison(e.to_string()))?,
            );

        let url = format!("{}/verify-video", self.base_url);
        tracing::info!(recording = %recording.id, "Submitting comparison");

        let res = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| LiveproofError::comparison(format!("Comparison request failed: {e}")))?;

        let status = res.status();
        let body: serde_json::Value = res.json().await.map_err(|e| {
            LiveproofError::comparison(format!("Undecodable comparison response: {e}"))
        })?;

        if !status.is_success() {
            return Err(LiveproofError::comparison(format!(
                "Comparison failed ({status}): {body}"
            )));
        }
        Ok(body)
    }
}
