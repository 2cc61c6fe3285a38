//! wgpu texture surfaces.

use tracing::{debug, info};
use wgpu::util::DeviceExt;

use rgbd_data::FrameDimensions;

use crate::surface::{PixelFormat, SurfaceBackend, SurfaceError, validate_upload};

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("Request Adapter Error: {0}")]
    RequestAdapterError(#[from] wgpu::RequestAdapterError),
    #[error("Request Device Error: {0}")]
    RequestDeviceError(#[from] wgpu::RequestDeviceError),
}

/// Device and queue the surfaces live on.
#[derive(Debug, Clone)]
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuContext {
    /// Wrap a device owned by the host renderer.
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    /// Request a device of our own, without a presentation surface.
    pub async fn headless() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::from_env_or_default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await?;
        info!(adapter = %adapter.get_info().name, "Using GPU adapter");

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("rgbd"),
                ..Default::default()
            })
            .await?;
        Ok(Self { device, queue })
    }

    pub fn headless_blocking() -> Result<Self, GpuError> {
        pollster::block_on(Self::headless())
    }
}

/// A sampled 2D texture and its default view.
#[derive(Debug)]
pub struct WgpuSurface {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    dimensions: FrameDimensions,
    format: PixelFormat,
}

impl WgpuSurface {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn dimensions(&self) -> FrameDimensions {
        self.dimensions
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }
}

pub struct WgpuSurfaceBackend {
    context: GpuContext,
}

impl WgpuSurfaceBackend {
    pub fn new(context: GpuContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::R16Uint => wgpu::TextureFormat::R16Uint,
        PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

fn extent(dimensions: FrameDimensions) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: dimensions.width,
        height: dimensions.height,
        depth_or_array_layers: 1,
    }
}

impl SurfaceBackend for WgpuSurfaceBackend {
    type Surface = WgpuSurface;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_surface(
        &mut self,
        label: &str,
        bytes: &[u8],
        dimensions: FrameDimensions,
        format: PixelFormat,
    ) -> Result<WgpuSurface, SurfaceError> {
        validate_upload(dimensions, format, bytes, dimensions.stride())?;

        let texture = self.context.device.create_texture_with_data(
            &self.context.queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: extent(dimensions),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format(format),
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &bytes[..dimensions.byte_len()],
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        debug!(
            label,
            width = dimensions.width,
            height = dimensions.height,
            ?format,
            "Created texture"
        );

        Ok(WgpuSurface {
            texture,
            view,
            dimensions,
            format,
        })
    }

    fn update_surface(
        &mut self,
        surface: &mut WgpuSurface,
        bytes: &[u8],
        row_stride: usize,
    ) -> Result<(), SurfaceError> {
        validate_upload(surface.dimensions, surface.format, bytes, row_stride)?;
        let bytes_per_row =
            u32::try_from(row_stride).map_err(|_| SurfaceError::StrideTooLarge(row_stride))?;

        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &surface.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(surface.dimensions.height),
            },
            extent(surface.dimensions),
        );
        Ok(())
    }
}
