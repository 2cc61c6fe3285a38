use rgbd_data::DataError;
use rgbd_gpu::{BridgeError, GpuError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Image export failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Bridge(#[from] BridgeError),

    #[error("{0}")]
    Data(#[from] DataError),

    #[error("GPU unavailable: {0}")]
    Gpu(#[from] GpuError),

    #[error("No surface backend could be initialized")]
    NotInitialized,

    #[error("No devices attached")]
    NoDevices,

    #[error("Device {0} failed to start")]
    StartFailed(u32),
}
