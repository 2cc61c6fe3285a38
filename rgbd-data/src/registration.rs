//! Software color-to-depth registration.
//!
//! Reprojects a BGRA color image into the depth camera's viewpoint so that
//! color and depth pixels correspond one to one.

use glam::Vec2;

use crate::DataError;
use crate::calibration::Calibration;
use crate::image::read_u16;

const BGRA_BYTES: usize = 4;

/// Fill `out` (depth resolution, BGRA, tightly packed) with the color sample
/// seen by each depth pixel. Pixels without depth or outside the color frame
/// are zeroed.
pub fn register_color_to_depth(
    calibration: &Calibration,
    depth: &[u8],
    color: &[u8],
    color_stride: usize,
    out: &mut [u8],
) -> Result<(), DataError> {
    let (depth_width, depth_height) = calibration.depth_camera.resolution();
    let (color_width, color_height) = calibration.color_camera.resolution();
    let pixel_count = depth_width as usize * depth_height as usize;

    check_len("depth", depth.len(), pixel_count * 2)?;
    check_len("registered color", out.len(), pixel_count * BGRA_BYTES)?;
    if color_stride < color_width as usize * BGRA_BYTES {
        return Err(DataError::SizeMismatch {
            what: "color stride",
            expected: color_width as usize * BGRA_BYTES,
            actual: color_stride,
        });
    }
    check_len("color", color.len(), color_stride * color_height as usize)?;

    for (i, target) in out.chunks_exact_mut(BGRA_BYTES).enumerate() {
        let d = read_u16(depth, i);
        let x = (i % depth_width as usize) as f32;
        let y = (i / depth_width as usize) as f32;

        let sample = (d != 0)
            .then(|| calibration.depth_pixel_to_color(Vec2::new(x, y), d as f32))
            .flatten()
            .map(|p| p.round())
            .filter(|p| {
                p.x >= 0.0 && p.y >= 0.0 && p.x < color_width as f32 && p.y < color_height as f32
            });

        match sample {
            Some(p) => {
                let offset = p.y as usize * color_stride + p.x as usize * BGRA_BYTES;
                target.copy_from_slice(&color[offset..offset + BGRA_BYTES]);
            }
            None => target.fill(0),
        }
    }

    Ok(())
}

fn check_len(what: &'static str, actual: usize, expected: usize) -> Result<(), DataError> {
    if actual < expected {
        return Err(DataError::SizeMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Extrinsics;
    use crate::types::{ColorResolution, DepthMode};

    fn setup() -> (Calibration, Vec<u8>, usize) {
        let calibration = Calibration::from_pinhole(
            DepthMode::NfovBinned,
            ColorResolution::R720p,
            Extrinsics::IDENTITY,
        )
        .unwrap();
        let stride = 1280 * 4;
        let mut color = vec![0u8; stride * 720];
        for px in color.chunks_exact_mut(4) {
            px.copy_from_slice(&[10, 20, 30, 255]);
        }
        (calibration, color, stride)
    }

    #[test]
    fn test_registered_pixels_take_color() {
        let (calibration, color, stride) = setup();
        let depth: Vec<u8> = std::iter::repeat_n(1200u16.to_le_bytes(), 320 * 288)
            .flatten()
            .collect();
        let mut out = vec![0u8; 320 * 288 * 4];
        register_color_to_depth(&calibration, &depth, &color, stride, &mut out).unwrap();

        let center = (144 * 320 + 160) * 4;
        assert_eq!(&out[center..center + 4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_zero_depth_is_black() {
        let (calibration, color, stride) = setup();
        let depth = vec![0u8; 320 * 288 * 2];
        let mut out = vec![7u8; 320 * 288 * 4];
        register_color_to_depth(&calibration, &depth, &color, stride, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_short_buffers_rejected() {
        let (calibration, color, stride) = setup();
        let depth = vec![0u8; 10];
        let mut out = vec![0u8; 320 * 288 * 4];
        let result = register_color_to_depth(&calibration, &depth, &color, stride, &mut out);
        assert!(matches!(result, Err(DataError::SizeMismatch { what: "depth", .. })));
    }
}
