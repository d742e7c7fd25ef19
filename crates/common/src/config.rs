//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the liveness/comparison backend (e.g. "http://localhost:5000/api").
    pub backend_base_url: String,

    /// Directory where finalized recordings are stored.
    pub recordings_dir: PathBuf,

    /// Default detection settings.
    pub detection: DetectionDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default detection parameters.
///
/// The backend enforces a per-session rate limit; `frame_interval_ms` is
/// deliberately above it so rate-limit replies are the exception.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionDefaults {
    /// Fixed interval between frame submissions, in milliseconds.
    pub frame_interval_ms: u64,

    /// Maximum frames submitted per session before the attempt fails.
    pub max_frames: u32,

    /// Long-edge cap for submitted frames, in pixels.
    pub frame_long_edge: u32,

    /// JPEG quality for submitted frames (1-100).
    pub jpeg_quality: u8,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "liveproof=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_base_url: "http://localhost:5000/api".to_string(),
            recordings_dir: dirs_default_recordings(),
            detection: DetectionDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DetectionDefaults {
    fn default() -> Self {
        Self {
            frame_interval_ms: 8000,
            max_frames: 5,
            frame_long_edge: 720,
            jpeg_quality: 85,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("liveproof").join("config.json")
}

/// Default recordings directory.
fn dirs_default_recordings() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("liveproof").join("recordings")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_defaults_match_backend_rate_limit_headroom() {
        let defaults = DetectionDefaults::default();
        assert_eq!(defaults.frame_interval_ms, 8000);
        assert_eq!(defaults.max_frames, 5);
        assert!(defaults.frame_long_edge >= 640 && defaults.frame_long_edge <= 720);
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.backend_base_url, config.backend_base_url);
        assert_eq!(back.detection.max_frames, config.detection.max_frames);
    }
}
