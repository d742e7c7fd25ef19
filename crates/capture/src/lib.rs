//! Liveproof Capture
//!
//! Camera acquisition and still-frame sampling. The device adapter owns the
//! camera/microphone stream exclusively; the sampler and the recorder only
//! read from it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               CameraDevice                    │
//! │  v4l2src ─ videoconvert ─ appsink (latest)    │
//! │       │                      │                │
//! │  CameraStream handle    VideoSurface          │
//! │  (recorder reads)       (sampler reads)       │
//! └──────────────────────────────────────────────┘
//! ```

pub mod device;
pub mod sampler;

pub use device::CameraDevice;
pub use sampler::{EncodedFrame, FrameSampler, SamplerConfig};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Requested stream parameters, in the spirit of `getUserMedia` constraints.
/// The device may negotiate something close but not identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConstraints {
    /// Ideal capture width in pixels.
    pub ideal_width: u32,

    /// Ideal capture height in pixels.
    pub ideal_height: u32,

    /// Capture frame rate.
    pub framerate: u32,

    /// Whether to capture microphone audio alongside video.
    pub audio: bool,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
            framerate: 30,
            audio: true,
        }
    }
}

/// A single decoded video frame, tightly packed RGB.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Read-only view of the live video feed.
///
/// `current_frame` returns the most recent frame, or `None` when the feed
/// is not yet producing decodable frames.
pub trait VideoSurface: Send + Sync {
    fn current_frame(&self) -> Option<RawFrame>;
}

/// Handle to an acquired camera/microphone stream.
///
/// Cheap to clone; the recorder builds its own capture pipeline from this
/// handle, the same way multiple pipelines read concurrently from shared
/// audio/video nodes. The audio-enabled flag is shared so muting never
/// renegotiates the stream.
#[derive(Debug, Clone)]
pub struct CameraStream {
    video_device: String,
    capture_audio: bool,
    audio_enabled: Arc<AtomicBool>,
}

impl CameraStream {
    /// Normally produced by `CameraDevice::acquire`; public so alternative
    /// device adapters (and tests) can hand out stream handles.
    pub fn new(video_device: String, capture_audio: bool) -> Self {
        Self {
            video_device,
            capture_audio,
            audio_enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Path of the V4L2 device backing this stream.
    pub fn video_device(&self) -> &str {
        &self.video_device
    }

    /// Whether the stream carries a microphone track at all.
    pub fn has_audio(&self) -> bool {
        self.capture_audio
    }

    /// Current microphone state.
    pub fn audio_enabled(&self) -> bool {
        self.capture_audio && self.audio_enabled.load(Ordering::SeqCst)
    }

    /// Toggle the microphone track. Readers (the recorder's mute element)
    /// observe the shared flag; the stream itself is untouched.
    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::SeqCst);
    }
}
