//! Submit a recording and reference image for comparison.

use std::path::PathBuf;

use liveproof_common::config::AppConfig;
use liveproof_recorder::RecordingArtifact;
use liveproof_session::ComparisonClient;

pub async fn run(
    reference: PathBuf,
    recording: PathBuf,
    backend: Option<String>,
) -> anyhow::Result<()> {
    let app = AppConfig::load();
    let base_url = backend.unwrap_or(app.backend_base_url);

    let metadata = std::fs::metadata(&recording)?;
    let artifact = RecordingArtifact {
        id: recording
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("recording")
            .to_string(),
        path: recording.clone(),
        duration_secs: 0,
        size_bytes: metadata.len(),
    };

    println!("Submitting comparison");
    println!("  Reference: {}", reference.display());
    println!(
        "  Recording: {} ({} bytes)",
        recording.display(),
        metadata.len()
    );
    println!();

    let client = ComparisonClient::new(&base_url)?;
    let verdict = client.verify_video(&reference, &artifact).await?;

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}
