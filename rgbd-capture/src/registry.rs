//! Index-keyed set of streaming devices.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rgbd_data::{Calibration, CameraCalibration, FrameDimensions, ImageChannel, StreamConfig};
use tracing::{debug, info};

use crate::capture_loop::CaptureStatsSnapshot;
use crate::color_cache::CachedImageInfo;
use crate::config::CaptureSettings;
use crate::driver::{DepthDriver, DeviceHandle};
use crate::error::CaptureError;
use crate::frame::FrameBuffer;
use crate::session::DeviceSession;

/// Geometry of one camera as copied out by [`DeviceRegistry::copy_calibration`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSummary {
    pub width: u32,
    pub height: u32,
    /// Row-major 3x3 rotation into the depth camera's frame.
    pub rotation: [f32; 9],
    /// Millimetres.
    pub translation: [f32; 3],
    /// Number of intrinsics parameters written to the caller's buffer.
    pub intrinsics_count: usize,
}

impl CameraSummary {
    /// Caller has checked `intrinsics_out` holds the active parameters.
    fn copy_from(camera: &CameraCalibration, intrinsics_out: &mut [f32]) -> Self {
        let parameters = camera.intrinsics.active_parameters();
        intrinsics_out[..parameters.len()].copy_from_slice(parameters);
        Self {
            width: camera.resolution_width,
            height: camera.resolution_height,
            rotation: camera.extrinsics.rotation,
            translation: camera.extrinsics.translation,
            intrinsics_count: parameters.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSummary {
    pub color: CameraSummary,
    pub depth: CameraSummary,
}

type SessionMap<D> = HashMap<u32, DeviceSession<<D as DepthDriver>::Device>>;

/// Owns every active [`DeviceSession`], keyed by device index.
///
/// All methods take `&self` and may be called from any thread. The map lock
/// is never held across device I/O or a thread join.
pub struct DeviceRegistry<D: DepthDriver> {
    driver: Arc<D>,
    settings: CaptureSettings,
    sessions: Mutex<SessionMap<D>>,
}

impl<D: DepthDriver> DeviceRegistry<D> {
    pub fn new(driver: D, settings: CaptureSettings) -> Self {
        Self {
            driver: Arc::new(driver),
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Number of attached devices.
    pub fn device_count(&self) -> u32 {
        self.driver.installed_count()
    }

    /// Start streaming device `index`. A no-op if it is already streaming.
    pub fn try_start_streams(&self, index: u32, config: StreamConfig) -> Result<(), CaptureError> {
        if self.is_streaming(index) {
            debug!(device = index, "Already streaming");
            return Ok(());
        }

        let session = DeviceSession::start(&*self.driver, index, config, self.settings)?;

        let mut sessions = self.lock();
        if sessions.contains_key(&index) {
            drop(sessions);
            debug!(device = index, "Lost start race, discarding duplicate session");
            session.stop();
            return Ok(());
        }
        sessions.insert(index, session);
        Ok(())
    }

    /// Stop device `index`. Unknown indices are ignored.
    pub fn stop_streaming(&self, index: u32) {
        let session = self.lock().remove(&index);
        match session {
            Some(session) => session.stop(),
            None => debug!(device = index, "Not streaming, nothing to stop"),
        }
    }

    /// Stop every streaming device.
    pub fn stop_streaming_all(&self) {
        let sessions: Vec<_> = self.lock().drain().collect();
        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), "Stopping all devices");
        for (_, session) in sessions {
            session.stop();
        }
    }

    pub fn is_streaming(&self, index: u32) -> bool {
        self.lock().contains_key(&index)
    }

    /// Indices of streaming devices, ascending.
    pub fn active_indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = self.lock().keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Serial number of device `index`, opening it briefly if it is not streaming.
    pub fn serial_number(&self, index: u32) -> Result<String, CaptureError> {
        self.check_index(index)?;
        let device = self.lock().get(&index).map(|s| s.device().clone());
        match device {
            Some(device) => Ok(device.serial_number()?),
            None => {
                let device = self.driver.open(index)?;
                Ok(device.serial_number()?)
            }
        }
    }

    /// Calibration captured when device `index` started.
    pub fn calibration(&self, index: u32) -> Result<Calibration, CaptureError> {
        self.with_session(index, |s| *s.calibration())
    }

    /// Copy both cameras' intrinsics into the caller's buffers.
    ///
    /// Both capacities are checked before anything is written.
    pub fn copy_calibration(
        &self,
        index: u32,
        color_intrinsics: &mut [f32],
        depth_intrinsics: &mut [f32],
    ) -> Result<CalibrationSummary, CaptureError> {
        let calibration = self.calibration(index)?;
        for (what, camera, available) in [
            ("color intrinsics", &calibration.color_camera, color_intrinsics.len()),
            ("depth intrinsics", &calibration.depth_camera, depth_intrinsics.len()),
        ] {
            let needed = camera.intrinsics.active_parameters().len();
            if available < needed {
                return Err(CaptureError::Capacity {
                    what,
                    needed,
                    available,
                });
            }
        }
        Ok(CalibrationSummary {
            color: CameraSummary::copy_from(&calibration.color_camera, color_intrinsics),
            depth: CameraSummary::copy_from(&calibration.depth_camera, depth_intrinsics),
        })
    }

    /// Copy the latest raw color image of device `index` into `out`.
    pub fn copy_cached_color_image(
        &self,
        index: u32,
        out: &mut [u8],
    ) -> Result<CachedImageInfo, CaptureError> {
        let cache = self.with_session(index, |s| s.color_cache().clone())?;
        cache.copy_to(out)
    }

    /// Frame buffer of device `index`.
    pub fn frame(&self, index: u32) -> Option<Arc<FrameBuffer>> {
        self.lock().get(&index).map(|s| s.frame().clone())
    }

    pub fn channel_dimensions(&self, index: u32) -> Option<[FrameDimensions; ImageChannel::COUNT]> {
        self.lock().get(&index).map(|s| s.frame().all_dimensions())
    }

    pub fn stats(&self, index: u32) -> Option<CaptureStatsSnapshot> {
        self.lock().get(&index).map(DeviceSession::stats)
    }

    fn with_session<R>(
        &self,
        index: u32,
        f: impl FnOnce(&DeviceSession<D::Device>) -> R,
    ) -> Result<R, CaptureError> {
        self.check_index(index)?;
        self.lock()
            .get(&index)
            .map(f)
            .ok_or(CaptureError::NotStreaming(index))
    }

    fn check_index(&self, index: u32) -> Result<(), CaptureError> {
        let count = self.device_count();
        if index >= count {
            return Err(CaptureError::IndexOutOfRange { index, count });
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, SessionMap<D>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<D: DepthDriver> Drop for DeviceRegistry<D> {
    fn drop(&mut self) {
        self.stop_streaming_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticDriver;
    use rgbd_data::{ColorResolution, DepthMode, Fps};

    fn config() -> StreamConfig {
        StreamConfig {
            color_resolution: ColorResolution::R720p,
            depth_mode: DepthMode::NfovBinned,
            fps: Fps::Fps30,
            ..Default::default()
        }
    }

    #[test]
    fn test_out_of_range_start_rejected() {
        let driver = SyntheticDriver::new(1);
        let registry = DeviceRegistry::new(driver.clone(), CaptureSettings::default());
        let err = registry.try_start_streams(1, config()).unwrap_err();
        assert!(matches!(err, CaptureError::IndexOutOfRange { index: 1, count: 1 }));
        assert_eq!(driver.counters().opened(), 0);
    }

    #[test]
    fn test_failed_start_releases_device() {
        let driver = SyntheticDriver::new(1).with_failing_start(0);
        let registry = DeviceRegistry::new(driver.clone(), CaptureSettings::default());
        assert!(registry.try_start_streams(0, config()).is_err());
        assert!(!registry.is_streaming(0));
        assert_eq!(driver.counters().opened(), 1);
        assert_eq!(driver.counters().open_handles(), 0);
    }

    #[test]
    fn test_serial_number_without_streaming() {
        let driver = SyntheticDriver::new(2).with_serial_prefix("AB");
        let registry = DeviceRegistry::new(driver.clone(), CaptureSettings::default());
        assert_eq!(registry.serial_number(1).unwrap(), "AB000001");
        assert_eq!(driver.counters().open_handles(), 0);
        assert!(registry.serial_number(2).is_err());
    }

    #[test]
    fn test_queries_on_idle_device() {
        let registry = DeviceRegistry::new(SyntheticDriver::new(1), CaptureSettings::default());
        assert!(matches!(registry.calibration(0), Err(CaptureError::NotStreaming(0))));
        assert!(registry.frame(0).is_none());
        assert!(registry.stats(0).is_none());
        let mut out = vec![0; 16];
        assert!(registry.copy_cached_color_image(0, &mut out).is_err());
        registry.stop_streaming(0);
    }

    #[test]
    fn test_copy_calibration() {
        let registry = DeviceRegistry::new(SyntheticDriver::new(1), CaptureSettings::default());
        registry.try_start_streams(0, config()).unwrap();

        let mut color = [0.0f32; 15];
        let mut depth = [0.0f32; 14];
        let summary = registry.copy_calibration(0, &mut color, &mut depth).unwrap();
        assert_eq!((summary.depth.width, summary.depth.height), (320, 288));
        assert_eq!((summary.color.width, summary.color.height), (1280, 720));
        assert_eq!(summary.color.translation, [-32.0, -2.0, 4.0]);
        assert_eq!(summary.color.intrinsics_count, 14);
        assert!(color[2] > 0.0);
        assert_eq!(color[14], 0.0);
        assert!(depth[2] > 0.0);
    }

    #[test]
    fn test_copy_calibration_follows_reported_parameter_count() {
        let driver = SyntheticDriver::new(1).with_parameter_count(8);
        let registry = DeviceRegistry::new(driver, CaptureSettings::default());
        registry.try_start_streams(0, config()).unwrap();

        let mut color = [-1.0f32; 8];
        let mut depth = [-1.0f32; 8];
        let summary = registry.copy_calibration(0, &mut color, &mut depth).unwrap();
        assert_eq!(summary.color.intrinsics_count, 8);
        assert_eq!(summary.depth.intrinsics_count, 8);
        assert!(color[2] > 0.0);
        assert!(depth[3] > 0.0);
        registry.stop_streaming(0);
    }

    #[test]
    fn test_copy_calibration_refuses_truncation() {
        let driver = SyntheticDriver::new(1).with_parameter_count(15);
        let registry = DeviceRegistry::new(driver, CaptureSettings::default());
        registry.try_start_streams(0, config()).unwrap();

        let mut color = [-1.0f32; 15];
        let mut depth = [-1.0f32; 14];
        let err = registry.copy_calibration(0, &mut color, &mut depth).unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Capacity {
                what: "depth intrinsics",
                needed: 15,
                available: 14,
            }
        ));
        assert!(color.iter().all(|&v| v == -1.0));
        registry.stop_streaming(0);
    }
}
