//! Frame-set snapshots.
//!
//! A snapshot holds the three published channels of one device at depth
//! resolution. The binary layout is: little-endian i32 width, i32 height,
//! then the BGRA32 color, R16 depth and RGBA f32 point-cloud buffers back to
//! back with no padding.

use std::io::{self, Read, Write};

use crate::DataError;
use crate::types::{FrameDimensions, ImageChannel};

/// Largest channel accepted when decoding: a 16k x 16k point cloud.
const MAX_CHANNEL_BYTES: u64 = 16384 * 16384 * 16;

#[derive(Debug, Clone, PartialEq)]
pub struct FrameSnapshot {
    pub width: u32,
    pub height: u32,
    pub color: Vec<u8>,
    pub depth: Vec<u8>,
    pub point_cloud: Vec<u8>,
}

impl FrameSnapshot {
    /// Build a snapshot, checking every buffer against the channel layout.
    pub fn new(
        width: u32,
        height: u32,
        color: Vec<u8>,
        depth: Vec<u8>,
        point_cloud: Vec<u8>,
    ) -> Result<Self, DataError> {
        let snapshot = Self {
            width,
            height,
            color,
            depth,
            point_cloud,
        };
        for channel in ImageChannel::ALL {
            let expected = snapshot.dimensions(channel).byte_len();
            let actual = snapshot.channel(channel).len();
            if actual != expected {
                return Err(DataError::SizeMismatch {
                    what: channel.name(),
                    expected,
                    actual,
                });
            }
        }
        Ok(snapshot)
    }

    pub fn dimensions(&self, channel: ImageChannel) -> FrameDimensions {
        FrameDimensions::new(self.width, self.height, channel.bytes_per_pixel())
    }

    pub fn channel(&self, channel: ImageChannel) -> &[u8] {
        match channel {
            ImageChannel::Color => &self.color,
            ImageChannel::Depth => &self.depth,
            ImageChannel::PointCloud => &self.point_cloud,
        }
    }

    /// Serialized size in bytes.
    pub fn encoded_len(&self) -> usize {
        8 + self.color.len() + self.depth.len() + self.point_cloud.len()
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), DataError> {
        let width = i32::try_from(self.width).map_err(|_| DataError::InvalidSnapshot("width overflows i32"))?;
        let height =
            i32::try_from(self.height).map_err(|_| DataError::InvalidSnapshot("height overflows i32"))?;
        writer.write_all(&width.to_le_bytes())?;
        writer.write_all(&height.to_le_bytes())?;
        writer.write_all(&self.color)?;
        writer.write_all(&self.depth)?;
        writer.write_all(&self.point_cloud)?;
        writer.flush()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(&self.width.to_le_bytes());
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.extend_from_slice(&self.color);
        bytes.extend_from_slice(&self.depth);
        bytes.extend_from_slice(&self.point_cloud);
        bytes
    }

    /// Decode a snapshot. Buffers grow with the data actually read, so a
    /// corrupt header fails instead of allocating its claimed size.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, DataError> {
        let mut word = [0u8; 4];
        reader.read_exact(&mut word)?;
        let width = i32::from_le_bytes(word);
        reader.read_exact(&mut word)?;
        let height = i32::from_le_bytes(word);
        if width <= 0 || height <= 0 {
            return Err(DataError::InvalidSnapshot("non-positive dimensions"));
        }
        let (width, height) = (width as u32, height as u32);

        let mut read_channel = |channel: ImageChannel| -> Result<Vec<u8>, DataError> {
            let len = (width as u64)
                .checked_mul(height as u64)
                .and_then(|pixels| pixels.checked_mul(channel.bytes_per_pixel() as u64))
                .filter(|&len| len <= MAX_CHANNEL_BYTES)
                .ok_or(DataError::InvalidSnapshot("dimensions too large"))?;
            let mut buffer = Vec::new();
            (&mut reader).take(len).read_to_end(&mut buffer)?;
            if buffer.len() as u64 != len {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            Ok(buffer)
        };
        let color = read_channel(ImageChannel::Color)?;
        let depth = read_channel(ImageChannel::Depth)?;
        let point_cloud = read_channel(ImageChannel::PointCloud)?;

        Self::new(width, height, color, depth, point_cloud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn snapshot() -> FrameSnapshot {
        FrameSnapshot::new(
            2,
            2,
            (0..16).collect(),
            vec![0xe8, 0x03, 0, 0, 1, 0, 2, 0],
            vec![0u8; 64],
        )
        .unwrap()
    }

    #[test]
    fn test_header_layout() {
        let bytes = snapshot().to_bytes();
        assert_eq!(bytes.len(), 8 + 16 + 8 + 64);
        assert_eq!(&bytes[0..4], &2i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2i32.to_le_bytes());
        assert_eq!(bytes[8], 0);
        assert_eq!(&bytes[24..26], &[0xe8, 0x03]);
    }

    #[test]
    fn test_read_back() {
        let original = snapshot();
        let decoded = FrameSnapshot::read_from(Cursor::new(original.to_bytes())).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_truncated_input_fails() {
        let mut bytes = snapshot().to_bytes();
        bytes.truncate(40);
        assert!(matches!(
            FrameSnapshot::read_from(Cursor::new(bytes)),
            Err(DataError::Io(_))
        ));
    }

    #[test]
    fn test_mismatched_channel_rejected() {
        let result = FrameSnapshot::new(2, 2, vec![0; 15], vec![0; 8], vec![0; 64]);
        assert!(matches!(result, Err(DataError::SizeMismatch { what: "color", .. })));
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(
            FrameSnapshot::read_from(Cursor::new(bytes)),
            Err(DataError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_large_header_on_short_input_fails() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4096i32.to_le_bytes());
        bytes.extend_from_slice(&4096i32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 32]);
        assert!(matches!(
            FrameSnapshot::read_from(Cursor::new(bytes)),
            Err(DataError::Io(_))
        ));
    }

    #[test]
    fn test_negative_dimensions_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(-1i32).to_le_bytes());
        bytes.extend_from_slice(&2i32.to_le_bytes());
        assert!(matches!(
            FrameSnapshot::read_from(Cursor::new(bytes)),
            Err(DataError::InvalidSnapshot(_))
        ));
    }
}
