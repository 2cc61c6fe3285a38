//! Depth-to-3D projection through a precomputed per-pixel ray table.
//!
//! The lookup table stores, for every depth pixel, the undistorted ray at
//! unit depth. Multiplying a ray by a depth value yields the 3D point in the
//! depth camera's frame, which keeps per-frame projection to a multiply.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use tracing::debug;

use crate::calibration::Calibration;
use crate::image::read_u16;
use crate::types::{FrameDimensions, ImageChannel};

/// Synthetic depth used for the point-cloud template, in millimetres.
pub const TEMPLATE_DEPTH_MM: u16 = 1000;

/// Per-pixel unit-depth rays for the depth camera. Invalid pixels hold NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct XyTable {
    width: u32,
    height: u32,
    rays: Vec<Vec2>,
}

impl XyTable {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rays(&self) -> &[Vec2] {
        &self.rays
    }

    /// Ray for pixel (x, y), `None` if the pixel does not unproject.
    pub fn ray(&self, x: u32, y: u32) -> Option<Vec2> {
        let ray = *self.rays.get((y * self.width + x) as usize)?;
        ray.is_finite().then_some(ray)
    }

    pub fn valid_count(&self) -> usize {
        self.rays.iter().filter(|r| r.is_finite()).count()
    }
}

/// xyzw point in the layout the GPU surface expects.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct PaddedPoint {
    pub position: [f32; 3],
    /// Always 1.0.
    pub w: f32,
}

impl From<Vec3> for PaddedPoint {
    fn from(position: Vec3) -> Self {
        Self {
            position: position.to_array(),
            w: 1.0,
        }
    }
}

/// An organized point cloud: one point per depth pixel, NaN where invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    width: u32,
    height: u32,
    points: Vec<Vec3>,
    valid_count: usize,
}

impl PointCloud {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    /// Number of points with a finite position.
    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    /// Published layout of this cloud as a frame channel.
    pub fn dimensions(&self) -> FrameDimensions {
        FrameDimensions::new(
            self.width,
            self.height,
            ImageChannel::PointCloud.bytes_per_pixel(),
        )
    }

    /// Pad every point to four floats (w = 1.0) and return the raw bytes.
    pub fn to_padded_bytes(&self) -> Vec<u8> {
        let padded: Vec<PaddedPoint> = self.points.iter().copied().map(PaddedPoint::from).collect();
        bytemuck::cast_slice(&padded).to_vec()
    }
}

/// Compute the unit-depth ray for every depth-camera pixel.
pub fn build_lookup_table(calibration: &Calibration) -> XyTable {
    let camera = &calibration.depth_camera;
    let (width, height) = camera.resolution();
    let mut rays = Vec::with_capacity(camera.pixel_count());

    for y in 0..height {
        for x in 0..width {
            let pixel = Vec2::new(x as f32, y as f32);
            let ray = camera
                .intrinsics
                .unproject(pixel, 1.0)
                .map(|p| Vec2::new(p.x, p.y))
                .unwrap_or(Vec2::NAN);
            rays.push(ray);
        }
    }

    let table = XyTable {
        width,
        height,
        rays,
    };
    debug!(
        width,
        height,
        valid = table.valid_count(),
        "Built depth lookup table"
    );
    table
}

/// Project a 16-bit depth image (millimetres, little endian) through the table.
///
/// Zero depth and invalid rays produce NaN points. `depth` must hold at least
/// one u16 per table entry.
pub fn generate_point_cloud(table: &XyTable, depth: &[u8]) -> PointCloud {
    let pixel_count = table.rays.len().min(depth.len() / 2);
    let mut points = Vec::with_capacity(table.rays.len());
    let mut valid_count = 0;

    for (i, ray) in table.rays.iter().enumerate() {
        let d = if i < pixel_count { read_u16(depth, i) } else { 0 };
        if d != 0 && ray.is_finite() {
            let d = d as f32;
            points.push(Vec3::new(ray.x * d, ray.y * d, d));
            valid_count += 1;
        } else {
            points.push(Vec3::NAN);
        }
    }

    PointCloud {
        width: table.width,
        height: table.height,
        points,
        valid_count,
    }
}

/// Project a constant synthetic depth through the table.
///
/// The result is a static per-device template, not a live cloud: a consumer
/// scales each point by the live depth sample to recover the real position.
pub fn build_point_cloud_template(table: &XyTable, depth_mm: u16) -> PointCloud {
    let pixel_count = table.rays.len();
    let depth: Vec<u8> = std::iter::repeat_n(depth_mm.to_le_bytes(), pixel_count)
        .flatten()
        .collect();
    generate_point_cloud(table, &depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Extrinsics;
    use crate::types::{ColorResolution, DepthMode};

    fn calibration() -> Calibration {
        Calibration::from_pinhole(
            DepthMode::NfovBinned,
            ColorResolution::R720p,
            Extrinsics::IDENTITY,
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_table_matches_resolution() {
        let table = build_lookup_table(&calibration());
        assert_eq!(table.width(), 320);
        assert_eq!(table.height(), 288);
        assert_eq!(table.rays().len(), 320 * 288);
        assert_eq!(table.valid_count(), 320 * 288);
    }

    #[test]
    fn test_lookup_table_center_ray_is_axis() {
        let calibration = calibration();
        let table = build_lookup_table(&calibration);
        let intrinsics = &calibration.depth_camera.intrinsics;
        let ray = table.ray(160, 144).unwrap();
        assert!((ray.x - (160.0 - intrinsics.cx()) / intrinsics.fx()).abs() < 1e-6);
        assert!((ray.y - (144.0 - intrinsics.cy()) / intrinsics.fy()).abs() < 1e-6);
    }

    #[test]
    fn test_template_is_one_meter_plane() {
        let table = build_lookup_table(&calibration());
        let cloud = build_point_cloud_template(&table, TEMPLATE_DEPTH_MM);
        assert_eq!(cloud.valid_count(), 320 * 288);
        assert!(cloud.points().iter().all(|p| p.z == 1000.0));
    }

    #[test]
    fn test_zero_depth_yields_nan() {
        let table = build_lookup_table(&calibration());
        let mut depth = vec![0u8; 320 * 288 * 2];
        depth[0..2].copy_from_slice(&500u16.to_le_bytes());
        let cloud = generate_point_cloud(&table, &depth);
        assert_eq!(cloud.valid_count(), 1);
        assert_eq!(cloud.points()[0].z, 500.0);
        assert!(cloud.points()[1].is_nan());
    }

    #[test]
    fn test_padded_bytes_layout() {
        let table = build_lookup_table(&calibration());
        let cloud = build_point_cloud_template(&table, TEMPLATE_DEPTH_MM);
        let bytes = cloud.to_padded_bytes();
        assert_eq!(bytes.len(), cloud.dimensions().byte_len());

        let first: [f32; 4] = bytemuck::pod_read_unaligned(&bytes[..16]);
        assert_eq!(first[2], 1000.0);
        assert_eq!(first[3], 1.0);
        assert_eq!(first[0], cloud.points()[0].x);
    }

    #[test]
    fn test_invalid_rays_propagate() {
        let table = XyTable {
            width: 2,
            height: 1,
            rays: vec![Vec2::new(0.1, 0.2), Vec2::NAN],
        };
        assert!(table.ray(1, 0).is_none());
        let cloud = build_point_cloud_template(&table, 1000);
        assert_eq!(cloud.valid_count(), 1);
        assert!((cloud.points()[0] - Vec3::new(100.0, 200.0, 1000.0)).length() < 1e-3);
    }
}
