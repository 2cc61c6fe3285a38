//! RGBD Data Crate
//!
//! Stream configuration, calibration math, image buffers and point-cloud
//! projection for depth cameras. This crate is GPU-agnostic and device-agnostic;
//! the capture crate drives it and the GPU crate uploads its output.

pub mod calibration;
pub mod image;
pub mod projection;
pub mod registration;
pub mod snapshot;
pub mod types;

pub use calibration::{
    BROWN_CONRADY_PARAMETER_COUNT, Calibration, CameraCalibration, Extrinsics,
    INTRINSICS_PARAMETER_SLOTS, Intrinsics,
};
pub use image::Image;
pub use projection::{
    PaddedPoint, PointCloud, TEMPLATE_DEPTH_MM, XyTable, build_lookup_table,
    build_point_cloud_template, generate_point_cloud,
};
pub use registration::register_color_to_depth;
pub use snapshot::FrameSnapshot;
pub use types::{
    ColorResolution, DepthMode, Fps, FrameDimensions, ImageChannel, ImageFormat, StreamConfig,
};

/// Errors produced by data validation and snapshot I/O.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(&'static str),
    #[error("{what} buffer is {actual} bytes, expected {expected}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}
