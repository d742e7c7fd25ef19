//! Run a liveness detection attempt.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use liveproof_capture::{CameraDevice, FrameSampler, SamplerConfig, StreamConstraints};
use liveproof_common::config::AppConfig;
use liveproof_recorder::GstRecorder;
use liveproof_session::{
    DetectionConfig, DetectionState, HttpLivenessClient, LivenessOrchestrator, Severity,
};

pub async fn run(
    backend: Option<String>,
    interval_ms: Option<u64>,
    max_frames: Option<u32>,
    output: Option<PathBuf>,
    no_audio: bool,
) -> anyhow::Result<()> {
    let app = AppConfig::load();
    let base_url = backend.unwrap_or_else(|| app.backend_base_url.clone());
    let output_dir = output.unwrap_or_else(|| app.recordings_dir.clone());

    let mut detection = DetectionConfig::from_defaults(&app.detection);
    if let Some(ms) = interval_ms {
        detection.frame_interval = Duration::from_millis(ms);
    }
    if let Some(frames) = max_frames {
        detection.max_frames = frames;
    }

    println!("Starting liveness detection");
    println!("  Backend: {base_url}");
    println!("  Frame interval: {}ms", detection.frame_interval.as_millis());
    println!("  Frame budget: {}", detection.max_frames);
    println!("  Recordings: {}", output_dir.display());
    println!();

    let mut device = CameraDevice::new();
    let constraints = StreamConstraints {
        audio: !no_audio,
        ..StreamConstraints::default()
    };
    let stream = device.acquire(&constraints)?;
    let surface = device
        .surface()
        .ok_or_else(|| anyhow::anyhow!("Camera surface unavailable after acquisition"))?;

    let sampler = FrameSampler::new(SamplerConfig {
        max_long_edge: app.detection.frame_long_edge,
        jpeg_quality: app.detection.jpeg_quality,
        ..SamplerConfig::default()
    });
    let recorder = Box::new(GstRecorder::new(
        stream.clone(),
        output_dir,
        constraints.framerate,
    ));
    let client = Arc::new(HttpLivenessClient::new(&base_url)?);

    let orchestrator =
        LivenessOrchestrator::new(detection, client, stream, surface, sampler, recorder);

    orchestrator.start_detection().await?;
    println!("Capturing... press Ctrl+C to stop");
    println!();

    let mut last_status = String::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                orchestrator.stop_detection();
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                let status = orchestrator.status_message();
                if status.text != last_status {
                    println!("{} {}", severity_tag(status.severity), status.text);
                    last_status = status.text;
                }
                if matches!(
                    orchestrator.state(),
                    DetectionState::Success | DetectionState::Failed
                ) {
                    break;
                }
            }
        }
    }

    println!();
    match orchestrator.state() {
        DetectionState::Success => {
            let confidence = orchestrator
                .liveness_score()
                .map(|s| format!(" (confidence {:.2}%)", s * 100.0))
                .unwrap_or_default();
            println!("Liveness confirmed{confidence}");
        }
        DetectionState::Failed => {
            println!("Liveness failed: {}", orchestrator.status_message().text);
        }
        _ => println!("Stopped."),
    }

    let history = orchestrator.attempt_history();
    if !history.is_empty() {
        println!();
        println!("Attempts (newest first):");
        for attempt in &history {
            println!("  #{} {}", attempt.attempt_id, attempt.status);
        }
    }

    if let Some(artifact) = orchestrator.recording_artifact() {
        println!();
        println!(
            "Recording saved: {} ({}s, {} bytes)",
            artifact.path.display(),
            artifact.duration_secs,
            artifact.size_bytes
        );
        println!(
            "Compare it with: liveproof compare <reference.jpg> {}",
            artifact.path.display()
        );
    }

    device.release();
    Ok(())
}

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "[INFO]",
        Severity::Success => "[OK]",
        Severity::Warning => "[WARN]",
        Severity::Error => "[ERR]",
    }
}
