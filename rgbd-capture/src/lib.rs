//! RGBD Capture - Multi-device depth camera streaming
//!
//! Each started device gets a background capture loop that polls the driver,
//! registers color into the depth camera's geometry and publishes color,
//! depth and a point-cloud template into a per-device [`FrameBuffer`].
//! Consumers read those buffers without ever blocking the loop.
//!
//! Hardware is reached through the [`DepthDriver`] traits; [`SyntheticDriver`]
//! implements them in software.
//!
//! ## Example
//!
//! ```ignore
//! use rgbd_capture::{CaptureSettings, DeviceRegistry, SyntheticDriver};
//! use rgbd_data::{ImageChannel, StreamConfig};
//!
//! let registry = DeviceRegistry::new(SyntheticDriver::new(1), CaptureSettings::default());
//! registry.try_start_streams(0, StreamConfig::default())?;
//! if let Some(reader) = registry.frame(0).as_deref().and_then(|f| f.try_begin_reading()) {
//!     let depth = reader.frame_buffer(ImageChannel::Depth);
//! }
//! registry.stop_streaming(0);
//! ```

mod capture_loop;
mod color_cache;
mod config;
mod driver;
mod error;
mod frame;
mod registry;
mod session;
mod synthetic;
mod task;

pub use capture_loop::{
    CaptureContext, CaptureResources, CaptureStats, CaptureStatsSnapshot, IterationOutcome,
    capture_once, run_capture_loop,
};
pub use color_cache::{CachedImageInfo, ColorCache};
pub use config::CaptureSettings;
pub use driver::{DepthDriver, DeviceCapture, DeviceHandle, DeviceImage, Transformation, WaitResult};
pub use error::{CaptureError, DriverError};
pub use frame::{FrameBuffer, FrameReader, FrameWriter};
pub use registry::{CalibrationSummary, CameraSummary, DeviceRegistry};
pub use session::DeviceSession;
pub use synthetic::{
    ScriptedOutcome, SyntheticCapture, SyntheticCounters, SyntheticDevice, SyntheticDriver,
    SyntheticImage, SyntheticTransformation,
};
pub use task::{CancellationToken, SupervisedTask};
