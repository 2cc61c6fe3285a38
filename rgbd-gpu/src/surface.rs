//! Surface backend abstraction.
//!
//! A surface is a 2D GPU-visible image the host samples from. The bridge
//! creates one per published channel and refreshes it in place from frame
//! bytes.

use rgbd_data::{FrameDimensions, ImageChannel};

/// Texel layout of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Bgra8Unorm,
    R16Uint,
    Rgba32Float,
}

impl PixelFormat {
    pub fn for_channel(channel: ImageChannel) -> Self {
        match channel {
            ImageChannel::Color => PixelFormat::Bgra8Unorm,
            ImageChannel::Depth => PixelFormat::R16Uint,
            ImageChannel::PointCloud => PixelFormat::Rgba32Float,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Bgra8Unorm => 4,
            PixelFormat::R16Uint => 2,
            PixelFormat::Rgba32Float => 16,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("Surface has zero size")]
    Empty,
    #[error("{format:?} surfaces need {expected} bytes per pixel, got {actual}")]
    FormatMismatch {
        format: PixelFormat,
        expected: u32,
        actual: u32,
    },
    #[error("Row stride {stride} is smaller than a {row_bytes}-byte row")]
    StrideTooSmall { stride: usize, row_bytes: usize },
    #[error("Row stride {0} does not fit the device's copy layout")]
    StrideTooLarge(usize),
    #[error("Surface data is {actual} bytes, expected at least {expected}")]
    DataTooShort { expected: usize, actual: usize },
}

/// Creates and refreshes surfaces on some device.
pub trait SurfaceBackend {
    type Surface;

    fn name(&self) -> &'static str;

    /// Create a surface holding `bytes`, which must be tightly packed.
    fn create_surface(
        &mut self,
        label: &str,
        bytes: &[u8],
        dimensions: FrameDimensions,
        format: PixelFormat,
    ) -> Result<Self::Surface, SurfaceError>;

    /// Overwrite a surface's contents. Rows in `bytes` are `row_stride` apart.
    fn update_surface(
        &mut self,
        surface: &mut Self::Surface,
        bytes: &[u8],
        row_stride: usize,
    ) -> Result<(), SurfaceError>;
}

/// Check `bytes` against a surface layout before handing it to a device.
pub fn validate_upload(
    dimensions: FrameDimensions,
    format: PixelFormat,
    bytes: &[u8],
    row_stride: usize,
) -> Result<(), SurfaceError> {
    if dimensions.width == 0 || dimensions.height == 0 {
        return Err(SurfaceError::Empty);
    }
    if dimensions.bytes_per_pixel != format.bytes_per_pixel() {
        return Err(SurfaceError::FormatMismatch {
            format,
            expected: format.bytes_per_pixel(),
            actual: dimensions.bytes_per_pixel,
        });
    }
    let row_bytes = dimensions.stride();
    if row_stride < row_bytes {
        return Err(SurfaceError::StrideTooSmall {
            stride: row_stride,
            row_bytes,
        });
    }
    let expected = row_stride * (dimensions.height as usize - 1) + row_bytes;
    if bytes.len() < expected {
        return Err(SurfaceError::DataTooShort {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_formats() {
        for channel in ImageChannel::ALL {
            assert_eq!(
                PixelFormat::for_channel(channel).bytes_per_pixel(),
                channel.bytes_per_pixel()
            );
        }
    }

    #[test]
    fn test_validate_upload() {
        let dims = FrameDimensions::new(4, 2, 2);
        assert!(validate_upload(dims, PixelFormat::R16Uint, &[0; 16], 8).is_ok());
        // Padded rows; the last row need not carry padding.
        assert!(validate_upload(dims, PixelFormat::R16Uint, &[0; 18], 10).is_ok());
        assert!(matches!(
            validate_upload(dims, PixelFormat::R16Uint, &[0; 15], 8),
            Err(SurfaceError::DataTooShort { expected: 16, actual: 15 })
        ));
        assert!(matches!(
            validate_upload(dims, PixelFormat::R16Uint, &[0; 16], 6),
            Err(SurfaceError::StrideTooSmall { .. })
        ));
        assert!(matches!(
            validate_upload(dims, PixelFormat::Bgra8Unorm, &[0; 16], 8),
            Err(SurfaceError::FormatMismatch { .. })
        ));
        assert!(matches!(
            validate_upload(FrameDimensions::new(0, 2, 2), PixelFormat::R16Uint, &[], 0),
            Err(SurfaceError::Empty)
        ));
    }
}
