//! Error types for capture operations.

use rgbd_data::DataError;
use thiserror::Error;

/// Failures reported by a device driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Failed to open device {0}")]
    OpenFailed(u32),

    #[error("Failed to start cameras: {0}")]
    StartFailed(String),

    #[error("Failed to read calibration: {0}")]
    CalibrationFailed(String),

    #[error("Failed to create transformation: {0}")]
    TransformationFailed(String),

    #[error("Failed to read serial number: {0}")]
    SerialNumberFailed(String),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
}

/// Errors surfaced by the capture crate.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Device index {index} out of range ({count} installed)")]
    IndexOutOfRange { index: u32, count: u32 },

    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(#[from] DataError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Output too small for {what}: need {needed}, have {available}")]
    Capacity {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Device {0} is not streaming")]
    NotStreaming(u32),

    #[error("Failed to spawn capture thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("Task {0} panicked")]
    TaskPanicked(String),
}

impl CaptureError {
    /// Whether the error stems from the caller's request rather than the device.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CaptureError::IndexOutOfRange { .. } | CaptureError::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CaptureError::IndexOutOfRange { index: 3, count: 1 };
        assert_eq!(err.to_string(), "Device index 3 out of range (1 installed)");
        assert!(err.is_configuration());

        let err = CaptureError::Capacity {
            what: "color intrinsics",
            needed: 14,
            available: 4,
        };
        assert!(err.to_string().contains("need 14, have 4"));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_driver_error_converts() {
        let err: CaptureError = DriverError::OpenFailed(2).into();
        assert!(matches!(err, CaptureError::Driver(DriverError::OpenFailed(2))));
    }
}
