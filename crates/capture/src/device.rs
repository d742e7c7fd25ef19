//! Camera device acquisition and the live sampling pipeline.
//!
//! The device adapter opens the camera, keeps a single live pipeline whose
//! appsink always holds the latest frame, and hands out a `CameraStream`
//! handle plus a `VideoSurface` view. No retry logic lives here; a failed
//! acquisition is terminal for the attempt and surfaced to the caller.

use std::sync::{Arc, OnceLock};

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;

use liveproof_common::error::{LiveproofError, LiveproofResult};

use crate::{CameraStream, RawFrame, StreamConstraints, VideoSurface};

/// How long a single appsink pull waits for a frame before reporting
/// "not ready".
const SAMPLE_TIMEOUT_MS: u64 = 100;

/// The capture device adapter. Owns the camera stream exclusively.
pub struct CameraDevice {
    stream: Option<CameraStream>,
    pipeline: Option<gst::Pipeline>,
    surface: Option<Arc<GstVideoSurface>>,
}

impl CameraDevice {
    pub fn new() -> Self {
        Self {
            stream: None,
            pipeline: None,
            surface: None,
        }
    }

    /// Acquire the camera and start the live sampling pipeline.
    ///
    /// Fails with `PermissionDenied` when the device node is not readable
    /// and `DeviceUnavailable` when no usable camera exists.
    pub fn acquire(&mut self, constraints: &StreamConstraints) -> LiveproofResult<CameraStream> {
        self.release();
        init_gstreamer()?;

        let device = detect_default_camera_device().ok_or_else(|| {
            LiveproofError::device_unavailable(
                "No camera device found (expected /dev/video0 or another /dev/video* node)",
            )
        })?;
        check_device_access(&device)?;

        let launch = format!(
            "v4l2src device=\"{device}\" do-timestamp=true ! videoconvert ! videoscale ! \
             video/x-raw,format=RGB,width={w},height={h} ! \
             appsink name=frames max-buffers=1 drop=true sync=false",
            w = constraints.ideal_width,
            h = constraints.ideal_height,
        );

        let element = gst::parse::launch(&launch).map_err(|e| {
            LiveproofError::capture(format!("Failed to build camera pipeline: {e}"))
        })?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| LiveproofError::capture("Launch string did not produce a pipeline"))?;

        let appsink = pipeline
            .by_name("frames")
            .and_then(|e| e.dynamic_cast::<gst_app::AppSink>().ok())
            .ok_or_else(|| LiveproofError::capture("Camera pipeline is missing its appsink"))?;

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            LiveproofError::capture(format!("Failed to start camera pipeline: {e:?}"))
        })?;

        tracing::info!(device = %device, "Camera acquired");

        let stream = CameraStream::new(device, constraints.audio);
        self.surface = Some(Arc::new(GstVideoSurface { appsink }));
        self.pipeline = Some(pipeline);
        self.stream = Some(stream.clone());
        Ok(stream)
    }

    /// The live video surface, available while a stream is acquired.
    pub fn surface(&self) -> Option<Arc<dyn VideoSurface>> {
        self.surface
            .as_ref()
            .map(|s| Arc::clone(s) as Arc<dyn VideoSurface>)
    }

    /// The acquired stream handle.
    pub fn stream(&self) -> Option<&CameraStream> {
        self.stream.as_ref()
    }

    /// Toggle the microphone track without renegotiating the stream.
    pub fn set_audio_enabled(&self, enabled: bool) {
        if let Some(stream) = &self.stream {
            stream.set_audio_enabled(enabled);
        }
    }

    /// Stop all tracks and unbind the surface. Idempotent; safe with no
    /// active stream.
    pub fn release(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gst::State::Null) {
                tracing::warn!(error = ?e, "Failed to stop camera pipeline");
            }
            tracing::info!("Camera released");
        }
        self.surface = None;
        self.stream = None;
    }
}

impl Default for CameraDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CameraDevice {
    fn drop(&mut self) {
        self.release();
    }
}

/// Surface view backed by the sampling appsink. Pulls the most recent
/// sample on demand; the camera frames arrive unmirrored, so the encoded
/// image keeps the true orientation even when a preview mirrors them.
struct GstVideoSurface {
    appsink: gst_app::AppSink,
}

impl VideoSurface for GstVideoSurface {
    fn current_frame(&self) -> Option<RawFrame> {
        let sample = self
            .appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(SAMPLE_TIMEOUT_MS))?;

        let caps = sample.caps()?;
        let structure = caps.structure(0)?;
        let width = structure.get::<i32>("width").ok()?;
        let height = structure.get::<i32>("height").ok()?;
        if width <= 0 || height <= 0 {
            return None;
        }
        let (width, height) = (width as u32, height as u32);

        let buffer = sample.buffer()?;
        let map = buffer.map_readable().ok()?;
        let data = map.as_slice();

        let row_bytes = width as usize * 3;
        if data.len() < row_bytes * height as usize {
            return None;
        }

        // Rows may carry alignment padding; the stride is uniform per frame.
        let stride = data.len() / height as usize;
        let mut rgb = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            rgb.extend_from_slice(&data[start..start + row_bytes]);
        }

        Some(RawFrame { width, height, rgb })
    }
}

fn init_gstreamer() -> LiveproofResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(LiveproofError::capture(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Map a failed open of the device node to the adapter's error taxonomy.
fn check_device_access(dev_path: &str) -> LiveproofResult<()> {
    match std::fs::OpenOptions::new().read(true).open(dev_path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(LiveproofError::permission_denied(format!(
                "Cannot open {dev_path}; allow camera access and try again"
            )))
        }
        Err(e) => Err(LiveproofError::device_unavailable(format!(
            "Cannot open {dev_path}: {e}"
        ))),
    }
}

/// A V4L2 node scored as a face-camera candidate.
#[derive(Debug, Clone)]
pub struct CameraCandidate {
    pub path: String,
    pub priority: u32,
}

/// Enumerate `/dev/video0`–`/dev/video15` and score each node from its
/// sysfs name and (when `v4l2-ctl` is present) its reported capabilities.
/// Sorted best first.
pub fn available_cameras() -> Vec<CameraCandidate> {
    let mut candidates: Vec<CameraCandidate> = Vec::new();

    for idx in 0..16u32 {
        let dev_path = format!("/dev/video{idx}");
        if !std::path::Path::new(&dev_path).exists() {
            continue;
        }
        candidates.push(CameraCandidate {
            priority: camera_device_priority(idx, &dev_path),
            path: dev_path,
        });
    }

    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
    candidates
}

/// Whether GStreamer can be initialized on this system.
pub fn gstreamer_available() -> bool {
    init_gstreamer().is_ok()
}

/// Detect the best camera for face capture. Falls back to the first
/// existing node when nothing can be scored.
fn detect_default_camera_device() -> Option<String> {
    let candidates = available_cameras();
    let best = candidates.first()?;

    if best.priority > 0 {
        tracing::info!(device = %best.path, priority = best.priority, "Selected camera device");
    }
    Some(best.path.clone())
}

/// Score a V4L2 device as a face-camera candidate (higher = better).
/// Returns 0 when the device is definitely not a camera.
fn camera_device_priority(idx: u32, dev_path: &str) -> u32 {
    let sysfs_name_path = format!("/sys/class/video4linux/video{idx}/name");
    let device_name = std::fs::read_to_string(&sysfs_name_path)
        .unwrap_or_default()
        .to_lowercase();

    // User-facing cameras the liveness flow expects
    let camera_keywords = [
        "webcam",
        "camera",
        "cam",
        "facetime",
        "integrated",
        "front",
        "uvc",
        "logitech",
        "virtual",
        "v4l2loopback",
    ];
    // Capture cards, tuners, and codec nodes are never face cameras
    let non_camera_keywords = [
        "tuner",
        "tv",
        "dvb",
        "hdmi",
        "encoder",
        "decoder",
        "metadata",
        "hauppauge",
        "blackmagic",
        "magewell",
    ];

    if non_camera_keywords.iter().any(|kw| device_name.contains(kw)) {
        tracing::debug!(device = dev_path, name = %device_name, "Skipping non-camera V4L2 device");
        return 0;
    }

    let named_camera = camera_keywords.iter().any(|kw| device_name.contains(kw));
    let supports_capture = probe_v4l2_capture_capability(dev_path);

    match (named_camera, supports_capture) {
        (true, Some(true)) => 100,
        (true, _) => 80,
        (false, Some(true)) => 50,
        (false, Some(false)) => 0,
        (false, None) => 10,
    }
}

/// Use `v4l2-ctl` to check if a device reports Video Capture capability.
/// Returns `None` if v4l2-ctl is not available.
fn probe_v4l2_capture_capability(dev_path: &str) -> Option<bool> {
    let output = std::process::Command::new("v4l2-ctl")
        .args(["--device", dev_path, "--info"])
        .output()
        .ok()?;

    if !output.status.success() {
        return Some(false);
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_lowercase();
    Some(stdout.contains("video capture"))
}
