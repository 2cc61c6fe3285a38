//! Owned image buffers.

use crate::types::{FrameDimensions, ImageFormat};

/// An image that owns its pixel storage.
///
/// Used for scratch targets (registered color) and for images produced by
/// software devices. Rows may be padded: `stride` is the row pitch in bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    format: ImageFormat,
    width: u32,
    height: u32,
    stride: usize,
    data: Vec<u8>,
}

impl Image {
    /// Allocate a zeroed image.
    pub fn new(format: ImageFormat, width: u32, height: u32, stride: usize) -> Self {
        Self {
            format,
            width,
            height,
            stride,
            data: vec![0; stride * height as usize],
        }
    }

    /// Allocate a zeroed, tightly packed image for a packed format.
    pub fn packed(format: ImageFormat, width: u32, height: u32) -> Option<Self> {
        let bpp = format.bytes_per_pixel()? as usize;
        Some(Self::new(format, width, height, width as usize * bpp))
    }

    /// Wrap existing bytes. Returns `None` when `data` is not `stride * height` long.
    pub fn from_data(
        format: ImageFormat,
        width: u32,
        height: u32,
        stride: usize,
        data: Vec<u8>,
    ) -> Option<Self> {
        (data.len() == stride * height as usize).then_some(Self {
            format,
            width,
            height,
            stride,
            data,
        })
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Buffer size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.data
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Layout as a frame channel, deriving bytes per pixel from the stride.
    pub fn dimensions(&self) -> FrameDimensions {
        let bpp = if self.width == 0 {
            0
        } else {
            (self.stride / self.width as usize) as u32
        };
        FrameDimensions::new(self.width, self.height, bpp)
    }
}

/// Read a little-endian u16 pixel from a 16-bit image buffer.
pub fn read_u16(buffer: &[u8], pixel: usize) -> u16 {
    let offset = pixel * 2;
    u16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_sizes() {
        let image = Image::packed(ImageFormat::ColorBgra32, 4, 3).unwrap();
        assert_eq!(image.size(), 48);
        assert_eq!(image.stride(), 16);
        assert_eq!(image.dimensions(), FrameDimensions::new(4, 3, 4));
        assert!(Image::packed(ImageFormat::ColorMjpg, 4, 3).is_none());
    }

    #[test]
    fn test_from_data_checks_length() {
        assert!(Image::from_data(ImageFormat::Depth16, 2, 2, 4, vec![0; 8]).is_some());
        assert!(Image::from_data(ImageFormat::Depth16, 2, 2, 4, vec![0; 7]).is_none());
    }

    #[test]
    fn test_read_u16_little_endian() {
        let buffer = [0x34, 0x12, 0xe8, 0x03];
        assert_eq!(read_u16(&buffer, 0), 0x1234);
        assert_eq!(read_u16(&buffer, 1), 1000);
    }
}
