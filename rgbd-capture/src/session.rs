//! One streaming device: its handle, capture loop and published buffers.

use std::sync::Arc;

use rgbd_data::{Calibration, DataError, FrameDimensions, ImageChannel, StreamConfig};
use tracing::{info, warn};

use crate::capture_loop::{
    CaptureContext, CaptureResources, CaptureStats, CaptureStatsSnapshot, run_capture_loop,
};
use crate::color_cache::ColorCache;
use crate::config::CaptureSettings;
use crate::driver::{DepthDriver, DeviceHandle};
use crate::error::{CaptureError, DriverError};
use crate::frame::FrameBuffer;
use crate::task::SupervisedTask;

/// A started device.
///
/// Stopping cancels and joins the capture thread first, then releases the
/// loop's transformation and scratch buffers, then stops the cameras. The
/// device handle closes when the last reference to it drops.
pub struct DeviceSession<D: DeviceHandle> {
    index: u32,
    config: StreamConfig,
    calibration: Calibration,
    device: Arc<D>,
    frame: Arc<FrameBuffer>,
    color_cache: Arc<ColorCache>,
    stats: Arc<CaptureStats>,
    task: Option<SupervisedTask<CaptureResources<D>>>,
}

impl<D: DeviceHandle> DeviceSession<D> {
    /// Open device `index`, start its cameras and launch its capture loop.
    ///
    /// Anything acquired before a failure is released before returning.
    pub fn start<Drv>(
        driver: &Drv,
        index: u32,
        config: StreamConfig,
        settings: CaptureSettings,
    ) -> Result<Self, CaptureError>
    where
        Drv: DepthDriver<Device = D>,
    {
        config.validate()?;
        if config.color_resolution.dimensions().is_none() || config.depth_mode.dimensions().is_none() {
            return Err(DataError::InvalidConfig(
                "streaming needs both color and depth cameras".to_string(),
            )
            .into());
        }

        let count = driver.installed_count();
        if index >= count {
            return Err(CaptureError::IndexOutOfRange { index, count });
        }

        let device = driver.open(index)?;
        device.start_cameras(&config)?;

        Self::launch(Arc::new(device), index, config, settings).inspect_err(|e| {
            warn!(device = index, error = %e, "Failed to start capture, rolling back");
        })
    }

    fn launch(
        device: Arc<D>,
        index: u32,
        config: StreamConfig,
        settings: CaptureSettings,
    ) -> Result<Self, CaptureError> {
        let prepared = device
            .calibration(config.depth_mode, config.color_resolution)
            .and_then(|calibration| {
                let transformation = device.create_transformation(&calibration)?;
                let resources = CaptureResources::<D>::new(transformation, &calibration)
                    .ok_or_else(|| {
                        DriverError::TransformationFailed("depth camera has no resolution".to_string())
                    })?;
                Ok((calibration, resources))
            });
        let (calibration, resources) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                device.stop_cameras();
                return Err(e.into());
            }
        };

        let (depth_width, depth_height) = calibration.depth_camera.resolution();
        let (color_width, color_height) = calibration.color_camera.resolution();
        let channel = |c: ImageChannel| FrameDimensions::new(depth_width, depth_height, c.bytes_per_pixel());
        let frame = Arc::new(FrameBuffer::new(
            channel(ImageChannel::Color),
            channel(ImageChannel::Depth),
            channel(ImageChannel::PointCloud),
        ));
        let color_cache = Arc::new(ColorCache::new(FrameDimensions::new(
            color_width,
            color_height,
            ImageChannel::Color.bytes_per_pixel(),
        )));
        let stats = Arc::new(CaptureStats::default());

        let context = CaptureContext {
            index,
            device: device.clone(),
            frame: frame.clone(),
            color_cache: color_cache.clone(),
            stats: stats.clone(),
            settings,
        };
        let task = match SupervisedTask::spawn(format!("capture-{index}"), move |token| {
            run_capture_loop(context, resources, token)
        }) {
            Ok(task) => task,
            Err(e) => {
                device.stop_cameras();
                return Err(e);
            }
        };

        info!(
            device = index,
            depth = %format!("{depth_width}x{depth_height}"),
            color = %format!("{color_width}x{color_height}"),
            fps = config.fps.hz(),
            "Streaming started"
        );
        Ok(Self {
            index,
            config,
            calibration,
            device,
            frame,
            color_cache,
            stats,
            task: Some(task),
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn frame(&self) -> &Arc<FrameBuffer> {
        &self.frame
    }

    pub fn color_cache(&self) -> &Arc<ColorCache> {
        &self.color_cache
    }

    pub fn stats(&self) -> CaptureStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the capture thread is still running.
    pub fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop capturing and release everything the session owns.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        match task.cancel_and_join() {
            Ok(resources) => {
                let CaptureResources {
                    transformation,
                    registered_color,
                    xy_table,
                    point_cloud_template,
                } = resources;
                drop(transformation);
                drop(registered_color);
                drop(xy_table);
                drop(point_cloud_template);
            }
            Err(e) => warn!(device = self.index, error = %e, "Capture loop did not exit cleanly"),
        }
        self.device.stop_cameras();
        info!(device = self.index, "Streaming stopped");
    }
}

impl<D: DeviceHandle> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
