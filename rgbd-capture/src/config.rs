//! Capture loop tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings shared by every capture loop a registry starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Sleep between loop iterations. Bounds CPU use and stop latency.
    pub poll_interval_ms: u64,
    /// Wait passed to the driver's capture poll. Zero keeps the poll non-blocking.
    pub capture_timeout_ms: u64,
    /// Synthetic depth used for the point-cloud template.
    pub template_depth_mm: u16,
}

impl CaptureSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            capture_timeout_ms: 0,
            template_depth_mm: rgbd_data::TEMPLATE_DEPTH_MM,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.poll_interval(), Duration::from_millis(10));
        assert_eq!(settings.capture_timeout(), Duration::ZERO);
        assert_eq!(settings.template_depth_mm, 1000);
    }

    #[test]
    fn test_partial_json() {
        let settings: CaptureSettings = serde_json::from_str(r#"{"poll_interval_ms": 2}"#).unwrap();
        assert_eq!(settings.poll_interval_ms, 2);
        assert_eq!(settings.template_depth_mm, 1000);
    }
}
