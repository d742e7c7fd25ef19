//! Liveproof Recorder
//!
//! Continuous audio/video capture running alongside the frame-submission
//! loop. One finalized `RecordingArtifact` is produced per start/stop
//! cycle, including cycles stopped before any frame was ever submitted, so
//! a recording is available for comparison even when the attempt fails or
//! is aborted early.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use gst::prelude::*;
use gstreamer as gst;

use liveproof_capture::CameraStream;
use liveproof_common::clock::RecordingClock;
use liveproof_common::error::{LiveproofError, LiveproofResult};

/// A finalized recording, keyed by a timestamp-derived identifier.
#[derive(Debug, Clone)]
pub struct RecordingArtifact {
    /// Identifier derived from the recording start time.
    pub id: String,

    /// Location of the finalized container file.
    pub path: PathBuf,

    /// Recorded duration, whole seconds.
    pub duration_secs: u64,

    /// Size of the finalized file in bytes.
    pub size_bytes: u64,
}

/// Recording control surface.
///
/// The orchestrator drives recording through this trait so the state
/// machine stays independent of the capture stack.
pub trait Recorder: Send {
    /// Begin continuous capture. Errors if a cycle is already running.
    fn start(&mut self) -> LiveproofResult<()>;

    /// Finalize the current cycle, if any. Idempotent: returns
    /// `Some(artifact)` exactly once per completed start/stop cycle and
    /// `None` otherwise. Always safe to call.
    fn stop(&mut self) -> LiveproofResult<Option<RecordingArtifact>>;

    /// Whether a cycle is currently capturing.
    fn is_recording(&self) -> bool;

    /// Elapsed capture time of the running cycle, whole seconds.
    fn elapsed_secs(&self) -> u64;

    /// Mute/unmute the microphone track of the running cycle without
    /// renegotiating the stream.
    fn set_audio_enabled(&mut self, enabled: bool);
}

/// GStreamer-backed recorder: camera video (x264, Matroska) with the
/// microphone routed through a named `volume` element so muting is a
/// property flip, never a pipeline rebuild.
pub struct GstRecorder {
    stream: CameraStream,
    output_dir: PathBuf,
    framerate: u32,
    pipeline: Option<gst::Pipeline>,
    clock: Option<RecordingClock>,
    current: Option<(String, PathBuf)>,
}

impl GstRecorder {
    pub fn new(stream: CameraStream, output_dir: PathBuf, framerate: u32) -> Self {
        Self {
            stream,
            output_dir,
            framerate: framerate.clamp(1, 30),
            pipeline: None,
            clock: None,
            current: None,
        }
    }

    fn build_launch(&self, path: &std::path::Path) -> String {
        let device = self.stream.video_device();
        let fps = self.framerate;
        let keyint = fps.saturating_mul(2).max(2);
        let location = escape_path(path);

        let mut launch = format!(
            "v4l2src device=\"{device}\" do-timestamp=true ! queue max-size-buffers=8 leaky=downstream ! \
             videoconvert ! videorate ! video/x-raw,framerate={fps}/1 ! \
             x264enc tune=zerolatency speed-preset=veryfast bitrate=2500 key-int-max={keyint} ! \
             h264parse ! queue max-size-buffers=8 ! matroskamux name=mux ! filesink location=\"{location}\""
        );

        if self.stream.has_audio() {
            let muted = !self.stream.audio_enabled();
            launch.push_str(&format!(
                " pulsesrc do-timestamp=true ! volume name=micvol mute={muted} ! \
                 audioconvert ! audioresample ! audio/x-raw,rate=48000 ! \
                 vorbisenc ! queue max-size-buffers=8 ! mux."
            ));
        }

        launch
    }
}

impl Recorder for GstRecorder {
    fn start(&mut self) -> LiveproofResult<()> {
        if self.pipeline.is_some() {
            return Err(LiveproofError::recording("Recording already in progress"));
        }
        init_gstreamer()?;

        std::fs::create_dir_all(&self.output_dir)?;
        let id = format!("rec-{}", chrono::Utc::now().format("%Y%m%d%H%M%S%3f"));
        let path = self.output_dir.join(format!("{id}.mkv"));

        let launch = self.build_launch(&path);
        let element = gst::parse::launch(&launch).map_err(|e| {
            LiveproofError::recording(format!("Failed to build recording pipeline: {e}"))
        })?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| LiveproofError::recording("Launch string did not produce a pipeline"))?;

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            LiveproofError::recording(format!("Failed to start recording pipeline: {e:?}"))
        })?;

        tracing::info!(id = %id, path = %path.display(), "Recording started");
        self.clock = Some(RecordingClock::start());
        self.current = Some((id, path));
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn stop(&mut self) -> LiveproofResult<Option<RecordingArtifact>> {
        let Some(pipeline) = self.pipeline.take() else {
            return Ok(None);
        };

        // EOS lets the encoder and muxer flush; without it the tail of the
        // recording is truncated or the container left unreadable.
        if !pipeline.send_event(gst::event::Eos::new()) {
            tracing::warn!("Failed to send EOS; recording tail may be truncated");
        } else if let Some(bus) = pipeline.bus() {
            let deadline = Duration::from_secs(10);
            let started = std::time::Instant::now();
            loop {
                let elapsed = started.elapsed();
                if elapsed >= deadline {
                    tracing::warn!("EOS drain timed out after 10s");
                    break;
                }
                let remaining = deadline - elapsed;
                match bus.timed_pop(gst::ClockTime::from_nseconds(remaining.as_nanos() as u64)) {
                    Some(msg) => match msg.view() {
                        gst::MessageView::Eos(_) => {
                            tracing::debug!("EOS received; recording pipeline drained");
                            break;
                        }
                        gst::MessageView::Error(e) => {
                            tracing::warn!(error = %e.error(), "Pipeline error during EOS drain");
                            break;
                        }
                        _ => {}
                    },
                    None => {
                        tracing::warn!("EOS drain timed out after 10s");
                        break;
                    }
                }
            }
        }

        pipeline.set_state(gst::State::Null).map_err(|e| {
            LiveproofError::recording(format!("Failed to stop recording pipeline: {e:?}"))
        })?;

        let duration_secs = self
            .clock
            .take()
            .map(|c| c.elapsed_whole_secs())
            .unwrap_or(0);
        let (id, path) = self
            .current
            .take()
            .ok_or_else(|| LiveproofError::recording("Recording cycle lost its output path"))?;
        let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        tracing::info!(id = %id, duration_secs, size_bytes, "Recording finalized");
        Ok(Some(RecordingArtifact {
            id,
            path,
            duration_secs,
            size_bytes,
        }))
    }

    fn is_recording(&self) -> bool {
        self.pipeline.is_some()
    }

    fn elapsed_secs(&self) -> u64 {
        self.clock
            .as_ref()
            .map(|c| c.elapsed_whole_secs())
            .unwrap_or(0)
    }

    fn set_audio_enabled(&mut self, enabled: bool) {
        if !self.stream.has_audio() {
            return;
        }
        if let Some(pipeline) = &self.pipeline {
            if let Some(volume) = pipeline.by_name("micvol") {
                volume.set_property("mute", !enabled);
            }
        }
    }
}

fn init_gstreamer() -> LiveproofResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(LiveproofError::recording(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

fn escape_path(path: &std::path::Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_without_start_is_a_safe_noop() {
        let stream = test_stream();
        let mut recorder = GstRecorder::new(stream, PathBuf::from("/tmp/liveproof-test"), 30);
        assert!(!recorder.is_recording());
        assert!(recorder.stop().unwrap().is_none());
        assert!(recorder.stop().unwrap().is_none());
        assert_eq!(recorder.elapsed_secs(), 0);
    }

    #[test]
    fn launch_string_includes_mic_branch_only_with_audio() {
        let with_audio = GstRecorder::new(test_stream(), PathBuf::from("/tmp"), 30);
        let launch = with_audio.build_launch(std::path::Path::new("/tmp/out.mkv"));
        assert!(launch.contains("matroskamux"));
        assert!(launch.contains("volume name=micvol"));

        let silent = GstRecorder::new(test_stream_video_only(), PathBuf::from("/tmp"), 30);
        let launch = silent.build_launch(std::path::Path::new("/tmp/out.mkv"));
        assert!(!launch.contains("micvol"));
    }

    #[test]
    fn muted_streams_start_with_mute_set() {
        let stream = test_stream();
        stream.set_audio_enabled(false);
        let recorder = GstRecorder::new(stream, PathBuf::from("/tmp"), 30);
        let launch = recorder.build_launch(std::path::Path::new("/tmp/out.mkv"));
        assert!(launch.contains("mute=true"));
    }

    fn test_stream() -> CameraStream {
        CameraStream::new("/dev/video0".to_string(), true)
    }

    fn test_stream_video_only() -> CameraStream {
        CameraStream::new("/dev/video0".to_string(), false)
    }
}
