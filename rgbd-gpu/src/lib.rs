//! RGBD GPU - Surfaces fed from captured frames
//!
//! [`DepthBridge`] is what a host renderer drives: it starts and stops
//! devices, refreshes one surface per published channel on each
//! [`DepthBridge::try_update`], and hands out surface views. Surfaces are
//! created through a [`SurfaceBackend`]; [`WgpuSurfaceBackend`] uploads to
//! wgpu textures and [`CpuSurfaceBackend`] keeps them in memory.

mod bridge;
mod cpu;
mod registry;
mod surface;
mod wgpu_backend;

pub use bridge::{BridgeError, DepthBridge, DeviceViews, SurfaceView};
pub use cpu::{CpuSurface, CpuSurfaceBackend};
pub use registry::{SurfaceHandle, SurfaceRegistry};
pub use surface::{PixelFormat, SurfaceBackend, SurfaceError, validate_upload};
pub use wgpu_backend::{GpuContext, GpuError, WgpuSurface, WgpuSurfaceBackend};

pub use wgpu;
