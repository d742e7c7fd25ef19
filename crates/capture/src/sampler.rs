//! On-demand still-frame sampling from the live surface.
//!
//! The sampler is stateless: it reads the current frame, bounds its
//! resolution, and encodes a JPEG small enough for frame submission.
//! A `None` result means "nothing usable right now" (feed not ready, zero
//! dimensions, or an implausibly small encoding that indicates a blank
//! frame) and is never an error.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::VideoSurface;

/// Bounds applied to every sampled frame.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Cap on the longer image edge, in pixels.
    pub max_long_edge: u32,

    /// JPEG quality (1-100).
    pub jpeg_quality: u8,

    /// Encodings smaller than this are treated as blank/black frames.
    pub min_encoded_bytes: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_long_edge: 720,
            jpeg_quality: 85,
            min_encoded_bytes: 4096,
        }
    }
}

/// A single still image ready for submission.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    width: u32,
    height: u32,
    jpeg: Vec<u8>,
}

impl EncodedFrame {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn jpeg_bytes(&self) -> &[u8] {
        &self.jpeg
    }

    /// Wire form the liveness backend accepts.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.jpeg)
        )
    }
}

/// Stateless frame sampler.
pub struct FrameSampler {
    config: SamplerConfig,
}

impl FrameSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(SamplerConfig::default())
    }

    /// Capture one still image from the surface.
    pub fn capture(&self, surface: &dyn VideoSurface) -> Option<EncodedFrame> {
        let frame = surface.current_frame()?;
        if frame.width == 0 || frame.height == 0 {
            tracing::debug!("Surface not ready (zero dimensions)");
            return None;
        }

        let rgb = image::RgbImage::from_raw(frame.width, frame.height, frame.rgb)?;
        let mut img = image::DynamicImage::ImageRgb8(rgb);

        let long_edge = frame.width.max(frame.height);
        if long_edge > self.config.max_long_edge {
            img = img.resize(
                self.config.max_long_edge,
                self.config.max_long_edge,
                FilterType::Triangle,
            );
        }

        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, self.config.jpeg_quality);
        if let Err(e) = img.write_with_encoder(encoder) {
            tracing::warn!(error = %e, "Frame encoding failed");
            return None;
        }

        if jpeg.len() < self.config.min_encoded_bytes {
            tracing::debug!(bytes = jpeg.len(), "Discarding blank frame");
            return None;
        }

        Some(EncodedFrame {
            width: img.width(),
            height: img.height(),
            jpeg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawFrame;

    struct FixedSurface {
        frame: Option<RawFrame>,
    }

    impl VideoSurface for FixedSurface {
        fn current_frame(&self) -> Option<RawFrame> {
            self.frame.clone()
        }
    }

    fn noise_frame(width: u32, height: u32) -> RawFrame {
        // Deterministic LCG noise so the JPEG cannot collapse to a few bytes
        let mut state: u32 = 0x12345678;
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..width * height * 3 {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            rgb.push((state >> 24) as u8);
        }
        RawFrame { width, height, rgb }
    }

    #[test]
    fn not_ready_surface_yields_none() {
        let sampler = FrameSampler::with_defaults();
        let surface = FixedSurface { frame: None };
        assert!(sampler.capture(&surface).is_none());
    }

    #[test]
    fn zero_dimension_frame_yields_none() {
        let sampler = FrameSampler::with_defaults();
        let surface = FixedSurface {
            frame: Some(RawFrame {
                width: 0,
                height: 0,
                rgb: Vec::new(),
            }),
        };
        assert!(sampler.capture(&surface).is_none());
    }

    #[test]
    fn tiny_blank_frame_is_discarded() {
        let sampler = FrameSampler::with_defaults();
        let surface = FixedSurface {
            frame: Some(RawFrame {
                width: 16,
                height: 16,
                rgb: vec![0; 16 * 16 * 3],
            }),
        };
        assert!(sampler.capture(&surface).is_none());
    }

    #[test]
    fn noisy_frame_encodes_with_data_url() {
        let sampler = FrameSampler::with_defaults();
        let surface = FixedSurface {
            frame: Some(noise_frame(640, 480)),
        };
        let encoded = sampler.capture(&surface).expect("noise frame should encode");
        assert_eq!(encoded.width(), 640);
        assert_eq!(encoded.height(), 480);
        assert!(encoded.jpeg_bytes().len() >= 4096);
        assert!(encoded.to_data_url().starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn oversized_frames_are_bounded_to_the_long_edge() {
        let sampler = FrameSampler::with_defaults();
        let surface = FixedSurface {
            frame: Some(noise_frame(1440, 810)),
        };
        let encoded = sampler.capture(&surface).expect("frame should encode");
        assert_eq!(encoded.width(), 720);
        assert_eq!(encoded.height(), 405);
    }
}
