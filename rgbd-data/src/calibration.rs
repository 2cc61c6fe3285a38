//! Camera calibration and the projection math built on it.
//!
//! Intrinsics use the Brown–Conrady model with six radial terms (rational
//! form), a centre of distortion and two tangential terms. All distances are
//! in millimetres; the depth camera is the reference frame.

use glam::{Mat3, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::types::{ColorResolution, DepthMode};

/// Number of float slots in an intrinsics parameter block.
pub const INTRINSICS_PARAMETER_SLOTS: usize = 15;

/// Parameter count reported for the Brown–Conrady model.
pub const BROWN_CONRADY_PARAMETER_COUNT: u32 = 14;

const UNDISTORT_ITERATIONS: usize = 20;
const UNDISTORT_TOLERANCE: f32 = 1e-6;

/// Intrinsic parameters of one camera.
///
/// Slot order: cx, cy, fx, fy, k1, k2, k3, k4, k5, k6, codx, cody, p2, p1,
/// metric_radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub parameters: [f32; INTRINSICS_PARAMETER_SLOTS],
    pub parameter_count: u32,
}

impl Intrinsics {
    /// Distortion-free intrinsics.
    pub fn pinhole(fx: f32, fy: f32, cx: f32, cy: f32) -> Self {
        let mut parameters = [0.0; INTRINSICS_PARAMETER_SLOTS];
        parameters[0] = cx;
        parameters[1] = cy;
        parameters[2] = fx;
        parameters[3] = fy;
        Self {
            parameters,
            parameter_count: BROWN_CONRADY_PARAMETER_COUNT,
        }
    }

    pub fn cx(&self) -> f32 {
        self.parameters[0]
    }

    pub fn cy(&self) -> f32 {
        self.parameters[1]
    }

    pub fn fx(&self) -> f32 {
        self.parameters[2]
    }

    pub fn fy(&self) -> f32 {
        self.parameters[3]
    }

    /// Radial coefficients k1..k6.
    pub fn radial(&self) -> [f32; 6] {
        let mut k = [0.0; 6];
        k.copy_from_slice(&self.parameters[4..10]);
        k
    }

    /// Centre of distortion.
    pub fn center_of_distortion(&self) -> Vec2 {
        Vec2::new(self.parameters[10], self.parameters[11])
    }

    pub fn p1(&self) -> f32 {
        self.parameters[13]
    }

    pub fn p2(&self) -> f32 {
        self.parameters[12]
    }

    /// Radius in normalized image space past which the model is invalid.
    /// Zero means unbounded.
    pub fn metric_radius(&self) -> f32 {
        self.parameters[14]
    }

    /// The parameters that are meaningful for the model.
    pub fn active_parameters(&self) -> &[f32] {
        let count = (self.parameter_count as usize).min(INTRINSICS_PARAMETER_SLOTS);
        &self.parameters[..count]
    }

    fn within_metric_radius(&self, rs: f32) -> bool {
        let radius = self.metric_radius();
        radius <= 0.0 || rs <= radius * radius
    }

    /// Apply lens distortion to a centred normalized coordinate.
    fn distort(&self, p: Vec2) -> Option<Vec2> {
        let [k1, k2, k3, k4, k5, k6] = self.radial();
        let xp2 = p.x * p.x;
        let yp2 = p.y * p.y;
        let xyp = p.x * p.y;
        let rs = xp2 + yp2;
        if !self.within_metric_radius(rs) {
            return None;
        }
        let rss = rs * rs;
        let rsc = rss * rs;
        let a = 1.0 + k1 * rs + k2 * rss + k3 * rsc;
        let b = 1.0 + k4 * rs + k5 * rss + k6 * rsc;
        if b == 0.0 {
            return None;
        }
        let d = a / b;
        let x = p.x * d + (rs + 2.0 * xp2) * self.p2() + 2.0 * xyp * self.p1();
        let y = p.y * d + (rs + 2.0 * yp2) * self.p1() + 2.0 * xyp * self.p2();
        Some(Vec2::new(x, y))
    }

    /// Project a camera-space point to pixel coordinates.
    pub fn project(&self, point: Vec3) -> Option<Vec2> {
        if point.z <= 0.0 {
            return None;
        }
        let cod = self.center_of_distortion();
        let normalized = Vec2::new(point.x / point.z, point.y / point.z) - cod;
        let distorted = self.distort(normalized)? + cod;
        Some(Vec2::new(
            distorted.x * self.fx() + self.cx(),
            distorted.y * self.fy() + self.cy(),
        ))
    }

    /// Unproject a pixel at `depth` millimetres to a camera-space point.
    ///
    /// Distortion is inverted by fixed-point iteration; pixels that do not
    /// converge or fall outside the metric radius yield `None`.
    pub fn unproject(&self, pixel: Vec2, depth: f32) -> Option<Vec3> {
        if self.fx() == 0.0 || self.fy() == 0.0 {
            return None;
        }
        let cod = self.center_of_distortion();
        let distorted = Vec2::new(
            (pixel.x - self.cx()) / self.fx(),
            (pixel.y - self.cy()) / self.fy(),
        ) - cod;

        let mut estimate = distorted;
        for _ in 0..UNDISTORT_ITERATIONS {
            let applied = self.distort(estimate)?;
            let error = applied - distorted;
            if error.length_squared() < UNDISTORT_TOLERANCE * UNDISTORT_TOLERANCE {
                break;
            }
            estimate -= error;
        }

        let residual = self.distort(estimate)? - distorted;
        if !residual.is_finite() || residual.length() > UNDISTORT_TOLERANCE * 100.0 {
            return None;
        }
        let ray = estimate + cod;
        Some(Vec3::new(ray.x * depth, ray.y * depth, depth))
    }
}

/// Rigid transform from the depth camera into a camera's frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    /// Row-major 3x3 rotation.
    pub rotation: [f32; 9],
    /// Translation in millimetres.
    pub translation: [f32; 3],
}

impl Extrinsics {
    pub const IDENTITY: Extrinsics = Extrinsics {
        rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        translation: [0.0; 3],
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation: translation.to_array(),
            ..Self::IDENTITY
        }
    }

    pub fn rotation_matrix(&self) -> Mat3 {
        Mat3::from_cols_array(&self.rotation).transpose()
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation_matrix() * point + Vec3::from_array(self.translation)
    }
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Calibration of a single camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub intrinsics: Intrinsics,
    pub extrinsics: Extrinsics,
    pub resolution_width: u32,
    pub resolution_height: u32,
}

impl CameraCalibration {
    /// A distortion-free camera with the given horizontal field of view and
    /// square pixels.
    pub fn pinhole(width: u32, height: u32, horizontal_fov_degrees: f32, extrinsics: Extrinsics) -> Self {
        let fx = width as f32 / (2.0 * (horizontal_fov_degrees.to_radians() / 2.0).tan());
        let cx = (width as f32 - 1.0) / 2.0;
        let cy = (height as f32 - 1.0) / 2.0;
        Self {
            intrinsics: Intrinsics::pinhole(fx, fx, cx, cy),
            extrinsics,
            resolution_width: width,
            resolution_height: height,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.resolution_width, self.resolution_height)
    }

    pub fn pixel_count(&self) -> usize {
        self.resolution_width as usize * self.resolution_height as usize
    }
}

/// Full device calibration for one stream configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub depth_camera: CameraCalibration,
    pub color_camera: CameraCalibration,
    pub depth_mode: DepthMode,
    pub color_resolution: ColorResolution,
}

impl Calibration {
    /// Build a distortion-free calibration for a mode pair, with the color
    /// camera offset from the depth camera by `color_extrinsics`.
    ///
    /// Returns `None` when either camera is off.
    pub fn from_pinhole(
        depth_mode: DepthMode,
        color_resolution: ColorResolution,
        color_extrinsics: Extrinsics,
    ) -> Option<Self> {
        let (depth_width, depth_height) = depth_mode.dimensions()?;
        let (depth_fov, _) = depth_mode.field_of_view()?;
        let (color_width, color_height) = color_resolution.dimensions()?;
        let color_fov = if color_width * 3 == color_height * 4 { 75.0 } else { 90.0 };

        Some(Self {
            depth_camera: CameraCalibration::pinhole(
                depth_width,
                depth_height,
                depth_fov.min(90.0),
                Extrinsics::IDENTITY,
            ),
            color_camera: CameraCalibration::pinhole(
                color_width,
                color_height,
                color_fov,
                color_extrinsics,
            ),
            depth_mode,
            color_resolution,
        })
    }

    /// Map a depth-camera pixel at `depth` millimetres into color-camera pixels.
    pub fn depth_pixel_to_color(&self, pixel: Vec2, depth: f32) -> Option<Vec2> {
        let point = self.depth_camera.intrinsics.unproject(pixel, depth)?;
        let in_color = self.color_camera.extrinsics.transform_point(point);
        self.color_camera.intrinsics.project(in_color)
    }
}
