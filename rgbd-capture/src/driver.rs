//! Device driver seam.
//!
//! The capture pipeline only talks to hardware through these traits. Every
//! native resource is an owned value whose `Drop` releases it, so captures,
//! images and transformations are freed when they go out of scope on every
//! path, including early returns.

use std::time::Duration;

use rgbd_data::{Calibration, ColorResolution, DepthMode, Image, ImageFormat, StreamConfig};

use crate::error::DriverError;

/// Outcome of a bounded wait on the device.
#[derive(Debug)]
pub enum WaitResult<T> {
    Succeeded(T),
    TimedOut,
    Failed,
}

impl<T> WaitResult<T> {
    pub fn succeeded(self) -> Option<T> {
        match self {
            WaitResult::Succeeded(value) => Some(value),
            WaitResult::TimedOut | WaitResult::Failed => None,
        }
    }
}

/// A single image owned by a capture.
pub trait DeviceImage {
    fn format(&self) -> ImageFormat;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Row pitch in bytes.
    fn stride(&self) -> usize;
    fn buffer(&self) -> &[u8];

    fn size(&self) -> usize {
        self.buffer().len()
    }
}

impl DeviceImage for Image {
    fn format(&self) -> ImageFormat {
        Image::format(self)
    }

    fn width(&self) -> u32 {
        Image::width(self)
    }

    fn height(&self) -> u32 {
        Image::height(self)
    }

    fn stride(&self) -> usize {
        Image::stride(self)
    }

    fn buffer(&self) -> &[u8] {
        Image::buffer(self)
    }
}

/// A synchronized set of images from one exposure.
pub trait DeviceCapture: Send {
    type Image: DeviceImage;

    fn color_image(&self) -> Option<Self::Image>;
    fn depth_image(&self) -> Option<Self::Image>;
}

/// Reprojects color into the depth camera's geometry.
pub trait Transformation: Send {
    /// Write the color image as seen from the depth camera into `out`, which
    /// must be a BGRA image at depth resolution.
    fn color_image_to_depth_camera(
        &mut self,
        depth: &dyn DeviceImage,
        color: &dyn DeviceImage,
        out: &mut Image,
    ) -> Result<(), DriverError>;
}

/// An open device. Dropping the handle closes it.
pub trait DeviceHandle: Send + Sync + 'static {
    type Capture: DeviceCapture;
    type Transformation: Transformation + 'static;

    fn start_cameras(&self, config: &StreamConfig) -> Result<(), DriverError>;
    fn stop_cameras(&self);
    fn serial_number(&self) -> Result<String, DriverError>;
    fn calibration(
        &self,
        depth_mode: DepthMode,
        color_resolution: ColorResolution,
    ) -> Result<Calibration, DriverError>;
    /// Poll for the next capture, waiting at most `timeout`.
    fn get_capture(&self, timeout: Duration) -> WaitResult<Self::Capture>;
    fn create_transformation(
        &self,
        calibration: &Calibration,
    ) -> Result<Self::Transformation, DriverError>;
}

/// Entry point into a device family.
pub trait DepthDriver: Send + Sync + 'static {
    type Device: DeviceHandle;

    /// Number of devices currently attached.
    fn installed_count(&self) -> u32;
    fn open(&self, index: u32) -> Result<Self::Device, DriverError>;
}
