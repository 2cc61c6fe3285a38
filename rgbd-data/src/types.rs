//! Stream configuration and frame layout types.
//!
//! These are CPU-side descriptions shared by the capture and GPU crates.
//! The enum orderings follow the device driver's numbering so values can be
//! passed straight through from a host.

use serde::{Deserialize, Serialize};

use crate::DataError;

/// Pixel layout of an image produced or consumed by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    ColorMjpg,
    ColorNv12,
    ColorYuy2,
    ColorBgra32,
    Depth16,
    Ir16,
    Custom8,
    Custom16,
    Custom,
}

impl ImageFormat {
    /// Bytes per pixel for packed formats, `None` for compressed or planar ones.
    pub fn bytes_per_pixel(&self) -> Option<u32> {
        match self {
            ImageFormat::ColorBgra32 => Some(4),
            ImageFormat::ColorYuy2 => Some(2),
            ImageFormat::Depth16 | ImageFormat::Ir16 | ImageFormat::Custom16 => Some(2),
            ImageFormat::Custom8 => Some(1),
            ImageFormat::ColorMjpg | ImageFormat::ColorNv12 | ImageFormat::Custom => None,
        }
    }

    /// Driver ordinal for this format.
    pub fn from_index(index: i32) -> Option<Self> {
        Some(match index {
            0 => ImageFormat::ColorMjpg,
            1 => ImageFormat::ColorNv12,
            2 => ImageFormat::ColorYuy2,
            3 => ImageFormat::ColorBgra32,
            4 => ImageFormat::Depth16,
            5 => ImageFormat::Ir16,
            6 => ImageFormat::Custom8,
            7 => ImageFormat::Custom16,
            8 => ImageFormat::Custom,
            _ => return None,
        })
    }
}

/// Color camera resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorResolution {
    Off,
    #[serde(rename = "720p")]
    R720p,
    #[serde(rename = "1080p")]
    R1080p,
    #[serde(rename = "1440p")]
    R1440p,
    #[serde(rename = "1536p")]
    R1536p,
    #[serde(rename = "2160p")]
    R2160p,
    #[serde(rename = "3072p")]
    R3072p,
}

impl ColorResolution {
    /// Sensor output size (width, height). `None` when the camera is off.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            ColorResolution::Off => None,
            ColorResolution::R720p => Some((1280, 720)),
            ColorResolution::R1080p => Some((1920, 1080)),
            ColorResolution::R1440p => Some((2560, 1440)),
            ColorResolution::R1536p => Some((2048, 1536)),
            ColorResolution::R2160p => Some((3840, 2160)),
            ColorResolution::R3072p => Some((4096, 3072)),
        }
    }

    pub fn from_index(index: i32) -> Option<Self> {
        Some(match index {
            0 => ColorResolution::Off,
            1 => ColorResolution::R720p,
            2 => ColorResolution::R1080p,
            3 => ColorResolution::R1440p,
            4 => ColorResolution::R1536p,
            5 => ColorResolution::R2160p,
            6 => ColorResolution::R3072p,
            _ => return None,
        })
    }
}

/// Depth sensor operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthMode {
    Off,
    NfovBinned,
    NfovUnbinned,
    WfovBinned,
    WfovUnbinned,
    PassiveIr,
}

impl DepthMode {
    /// Depth image size (width, height). `None` when the sensor is off.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            DepthMode::Off => None,
            DepthMode::NfovBinned => Some((320, 288)),
            DepthMode::NfovUnbinned => Some((640, 576)),
            DepthMode::WfovBinned => Some((512, 512)),
            DepthMode::WfovUnbinned | DepthMode::PassiveIr => Some((1024, 1024)),
        }
    }

    /// Nominal horizontal and vertical field of view in degrees.
    pub fn field_of_view(&self) -> Option<(f32, f32)> {
        match self {
            DepthMode::Off => None,
            DepthMode::NfovBinned | DepthMode::NfovUnbinned => Some((75.0, 65.0)),
            DepthMode::WfovBinned | DepthMode::WfovUnbinned | DepthMode::PassiveIr => {
                Some((120.0, 120.0))
            }
        }
    }

    pub fn from_index(index: i32) -> Option<Self> {
        Some(match index {
            0 => DepthMode::Off,
            1 => DepthMode::NfovBinned,
            2 => DepthMode::NfovUnbinned,
            3 => DepthMode::WfovBinned,
            4 => DepthMode::WfovUnbinned,
            5 => DepthMode::PassiveIr,
            _ => return None,
        })
    }
}

/// Camera frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fps {
    #[serde(rename = "5")]
    Fps5,
    #[serde(rename = "15")]
    Fps15,
    #[serde(rename = "30")]
    Fps30,
}

impl Fps {
    pub fn hz(&self) -> u32 {
        match self {
            Fps::Fps5 => 5,
            Fps::Fps15 => 15,
            Fps::Fps30 => 30,
        }
    }

    pub fn from_index(index: i32) -> Option<Self> {
        Some(match index {
            0 => Fps::Fps5,
            1 => Fps::Fps15,
            2 => Fps::Fps30,
            _ => return None,
        })
    }
}

/// Requested camera configuration for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub color_format: ImageFormat,
    pub color_resolution: ColorResolution,
    pub depth_mode: DepthMode,
    pub fps: Fps,
}

impl StreamConfig {
    /// Check the combination against what the hardware can stream.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.color_resolution == ColorResolution::Off && self.depth_mode == DepthMode::Off {
            return Err(DataError::InvalidConfig(
                "color and depth cameras are both off".to_string(),
            ));
        }
        if self.fps == Fps::Fps30 {
            if self.depth_mode == DepthMode::WfovUnbinned {
                return Err(DataError::InvalidConfig(
                    "wfov_unbinned depth does not support 30 fps".to_string(),
                ));
            }
            if self.color_resolution == ColorResolution::R3072p {
                return Err(DataError::InvalidConfig(
                    "3072p color does not support 30 fps".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            color_format: ImageFormat::ColorBgra32,
            color_resolution: ColorResolution::R1080p,
            depth_mode: DepthMode::NfovUnbinned,
            fps: Fps::Fps30,
        }
    }
}

/// Size of one image channel. Fixed for the lifetime of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
}

impl FrameDimensions {
    pub fn new(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel,
        }
    }

    /// Row pitch in bytes.
    pub fn stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel as usize
    }

    /// Total buffer size in bytes.
    pub fn byte_len(&self) -> usize {
        self.stride() * self.height as usize
    }
}

/// The three images published per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageChannel {
    /// BGRA color registered into the depth camera's viewpoint.
    Color = 0,
    /// Raw 16-bit depth in millimetres.
    Depth = 1,
    /// Padded xyzw float point-cloud template.
    PointCloud = 2,
}

impl ImageChannel {
    pub const COUNT: usize = 3;
    pub const ALL: [ImageChannel; Self::COUNT] = [
        ImageChannel::Color,
        ImageChannel::Depth,
        ImageChannel::PointCloud,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Bytes per pixel of the published layout.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            ImageChannel::Color => 4,
            ImageChannel::Depth => 2,
            ImageChannel::PointCloud => 4 * std::mem::size_of::<f32>() as u32,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ImageChannel::Color => "color",
            ImageChannel::Depth => "depth",
            ImageChannel::PointCloud => "point_cloud",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stream_config() {
        let config = StreamConfig::default();
        assert_eq!(config.color_format, ImageFormat::ColorBgra32);
        assert_eq!(config.color_resolution, ColorResolution::R1080p);
        assert_eq!(config.depth_mode, DepthMode::NfovUnbinned);
        assert_eq!(config.fps, Fps::Fps30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unsupported_frame_rates_rejected() {
        let config = StreamConfig {
            depth_mode: DepthMode::WfovUnbinned,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StreamConfig {
            color_resolution: ColorResolution::R3072p,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StreamConfig {
            color_resolution: ColorResolution::R3072p,
            fps: Fps::Fps15,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_both_cameras_off_rejected() {
        let config = StreamConfig {
            color_resolution: ColorResolution::Off,
            depth_mode: DepthMode::Off,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_driver_ordinals() {
        assert_eq!(ImageFormat::from_index(3), Some(ImageFormat::ColorBgra32));
        assert_eq!(ColorResolution::from_index(2), Some(ColorResolution::R1080p));
        assert_eq!(DepthMode::from_index(2), Some(DepthMode::NfovUnbinned));
        assert_eq!(Fps::from_index(2), Some(Fps::Fps30));
        assert_eq!(Fps::from_index(3), None);
    }

    #[test]
    fn test_frame_dimensions() {
        let dims = FrameDimensions::new(640, 576, 2);
        assert_eq!(dims.stride(), 1280);
        assert_eq!(dims.byte_len(), 640 * 576 * 2);
    }

    #[test]
    fn test_channel_layout() {
        assert_eq!(ImageChannel::ALL.len(), ImageChannel::COUNT);
        assert_eq!(ImageChannel::PointCloud.bytes_per_pixel(), 16);
        assert_eq!(ImageChannel::Depth.index(), 1);
    }

    #[test]
    fn test_stream_config_json() {
        let json = r#"{"color_resolution":"720p","depth_mode":"wfov_binned","fps":"15"}"#;
        let config: StreamConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.color_resolution, ColorResolution::R720p);
        assert_eq!(config.depth_mode, DepthMode::WfovBinned);
        assert_eq!(config.fps, Fps::Fps15);
        assert_eq!(config.color_format, ImageFormat::ColorBgra32);
    }
}
