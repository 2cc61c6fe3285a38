//! In-memory surfaces for tests and headless runs without a GPU.

use bytemuck::Pod;
use rgbd_data::FrameDimensions;

use crate::surface::{PixelFormat, SurfaceBackend, SurfaceError, validate_upload};

#[derive(Debug, Clone)]
pub struct CpuSurface {
    label: String,
    dimensions: FrameDimensions,
    format: PixelFormat,
    pixels: Vec<u8>,
    uploads: u64,
}

impl CpuSurface {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dimensions(&self) -> FrameDimensions {
        self.dimensions
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Tightly packed contents.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Number of updates since creation.
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    /// Read one texel as `T`, which must match the format's texel size.
    pub fn texel<T: Pod>(&self, x: u32, y: u32) -> Option<T> {
        let bpp = self.dimensions.bytes_per_pixel as usize;
        if x >= self.dimensions.width || y >= self.dimensions.height || size_of::<T>() != bpp {
            return None;
        }
        let start = y as usize * self.dimensions.stride() + x as usize * bpp;
        Some(bytemuck::pod_read_unaligned(&self.pixels[start..start + bpp]))
    }
}

#[derive(Debug, Default)]
pub struct CpuSurfaceBackend {
    surfaces_created: usize,
}

impl CpuSurfaceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surfaces_created(&self) -> usize {
        self.surfaces_created
    }
}

impl SurfaceBackend for CpuSurfaceBackend {
    type Surface = CpuSurface;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn create_surface(
        &mut self,
        label: &str,
        bytes: &[u8],
        dimensions: FrameDimensions,
        format: PixelFormat,
    ) -> Result<CpuSurface, SurfaceError> {
        validate_upload(dimensions, format, bytes, dimensions.stride())?;
        self.surfaces_created += 1;
        Ok(CpuSurface {
            label: label.to_string(),
            dimensions,
            format,
            pixels: bytes[..dimensions.byte_len()].to_vec(),
            uploads: 0,
        })
    }

    fn update_surface(
        &mut self,
        surface: &mut CpuSurface,
        bytes: &[u8],
        row_stride: usize,
    ) -> Result<(), SurfaceError> {
        validate_upload(surface.dimensions, surface.format, bytes, row_stride)?;
        let row_bytes = surface.dimensions.stride();
        for (dst, src) in surface
            .pixels
            .chunks_exact_mut(row_bytes)
            .zip(bytes.chunks(row_stride))
        {
            dst.copy_from_slice(&src[..row_bytes]);
        }
        surface.uploads += 1;
        Ok(())
    }
}
