//! Application configuration.
//!
//! Loaded from an optional JSON file; every field has a default, so a
//! partial file only overrides what it names. Command-line flags are
//! applied on top by `main`.

use std::path::Path;

use rgbd_capture::{CaptureSettings, SyntheticDriver};
use rgbd_data::StreamConfig;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub enable_tracy: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_tracy: false,
        }
    }
}

/// Software devices used when no hardware driver is linked in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub device_count: u32,
    pub serial_prefix: String,
    /// Deliver captures at the stream's frame rate instead of every poll.
    pub frame_pacing: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            serial_prefix: "SYNTH-".to_string(),
            frame_pacing: true,
        }
    }
}

impl SyntheticConfig {
    pub fn driver(&self) -> SyntheticDriver {
        SyntheticDriver::new(self.device_count)
            .with_serial_prefix(self.serial_prefix.clone())
            .with_frame_pacing(self.frame_pacing)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub capture: CaptureSettings,
    pub logging: LoggingConfig,
    pub synthetic: SyntheticConfig,
}

impl AppConfig {
    /// Read `path`, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        match path {
            Some(path) => Self::from_json(&std::fs::read_to_string(path)?),
            None => Ok(Self::default()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, AppError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgbd_capture::DepthDriver;
    use rgbd_data::{ColorResolution, DepthMode, Fps};

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.capture.poll_interval_ms, 10);
        assert_eq!(config.stream.depth_mode, DepthMode::NfovUnbinned);
    }

    #[test]
    fn test_partial_config() {
        let json = r#"{
            "stream": { "color_resolution": "720p", "fps": "15" },
            "capture": { "template_depth_mm": 1500 },
            "logging": { "level": "debug" },
            "synthetic": { "device_count": 3 }
        }"#;
        let config = AppConfig::from_json(json).unwrap();
        assert_eq!(config.stream.color_resolution, ColorResolution::R720p);
        assert_eq!(config.stream.fps, Fps::Fps15);
        assert_eq!(config.capture.template_depth_mm, 1500);
        assert_eq!(config.capture.poll_interval_ms, 10);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.synthetic.driver().installed_count(), 3);
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(matches!(
            AppConfig::from_json(r#"{"stream": {"fps": "60"}}"#),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let path = std::env::temp_dir().join("rgbd-missing-config.json");
        assert!(matches!(AppConfig::load(Some(&path)), Err(AppError::Io(_))));
        assert!(AppConfig::load(None).is_ok());
    }
}
