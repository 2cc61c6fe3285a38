//! Per-device capture loop.
//!
//! Each iteration polls the device once, registers color into the depth
//! camera's geometry and publishes whatever it got into the device's
//! [`FrameBuffer`]. Iterations never wait on the consumer: when the frame is
//! busy the capture is released and counted as dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use rgbd_data::{Calibration, Image, ImageChannel, PointCloud, XyTable, build_point_cloud_template};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::color_cache::ColorCache;
use crate::config::CaptureSettings;
use crate::driver::{DeviceCapture, DeviceHandle, DeviceImage, Transformation, WaitResult};
use crate::frame::FrameBuffer;
use crate::task::CancellationToken;

/// Log every n-th consecutive failure so an unplugged device doesn't flood the log.
const FAILURE_LOG_INTERVAL: u64 = 100;

/// Native resources owned by the loop while it runs.
///
/// Returned from the thread on exit so that the session releases them only
/// after the loop can no longer touch them.
pub struct CaptureResources<D: DeviceHandle> {
    pub transformation: D::Transformation,
    pub registered_color: Image,
    pub xy_table: XyTable,
    pub point_cloud_template: Option<PointCloud>,
}

/// Shared handles the loop reads and writes.
pub struct CaptureContext<D: DeviceHandle> {
    pub index: u32,
    pub device: Arc<D>,
    pub frame: Arc<FrameBuffer>,
    pub color_cache: Arc<ColorCache>,
    pub stats: Arc<CaptureStats>,
    pub settings: CaptureSettings,
}

/// Running counters for one capture loop.
#[derive(Debug, Default)]
pub struct CaptureStats {
    captures: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
    frames_written: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Point-in-time copy of [`CaptureStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStatsSnapshot {
    pub captures: u64,
    pub timeouts: u64,
    pub failures: u64,
    pub frames_written: u64,
    pub frames_dropped: u64,
}

impl CaptureStats {
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            captures: self.captures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// What a single iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    TimedOut,
    Failed,
    /// The consumer held the frame; the capture was discarded.
    Dropped,
    Written,
}

impl<D: DeviceHandle> CaptureResources<D> {
    pub fn new(transformation: D::Transformation, calibration: &Calibration) -> Option<Self> {
        let (width, height) = calibration.depth_camera.resolution();
        Some(Self {
            transformation,
            registered_color: Image::packed(rgbd_data::ImageFormat::ColorBgra32, width, height)?,
            xy_table: rgbd_data::build_lookup_table(calibration),
            point_cloud_template: None,
        })
    }
}

/// Loop until `token` is cancelled, then hand the resources back.
pub fn run_capture_loop<D: DeviceHandle>(
    context: CaptureContext<D>,
    mut resources: CaptureResources<D>,
    token: CancellationToken,
) -> CaptureResources<D> {
    info!(device = context.index, "Capture loop started");
    while !token.is_cancelled() {
        capture_once(&context, &mut resources);
        thread::sleep(context.settings.poll_interval());
    }
    let stats = context.stats.snapshot();
    info!(
        device = context.index,
        captures = stats.captures,
        written = stats.frames_written,
        dropped = stats.frames_dropped,
        failures = stats.failures,
        "Capture loop stopped"
    );
    resources
}

/// Poll the device once and publish the result.
pub fn capture_once<D: DeviceHandle>(
    context: &CaptureContext<D>,
    resources: &mut CaptureResources<D>,
) -> IterationOutcome {
    let stats = &context.stats;
    let capture = match context.device.get_capture(context.settings.capture_timeout()) {
        WaitResult::Succeeded(capture) => capture,
        WaitResult::TimedOut => {
            CaptureStats::bump(&stats.timeouts);
            return IterationOutcome::TimedOut;
        }
        WaitResult::Failed => {
            let failures = CaptureStats::bump(&stats.failures);
            if failures % FAILURE_LOG_INTERVAL == 1 {
                warn!(device = context.index, failures, "Failed to get capture");
            }
            return IterationOutcome::Failed;
        }
    };
    CaptureStats::bump(&stats.captures);

    let color = capture.color_image();
    let depth = capture.depth_image();

    let mut registered = false;
    if let (Some(color), Some(depth)) = (&color, &depth) {
        if !context.color_cache.store(color.buffer()) {
            trace!(device = context.index, size = color.size(), "Color image not cached");
        }
        match resources.transformation.color_image_to_depth_camera(
            depth,
            color,
            &mut resources.registered_color,
        ) {
            Ok(()) => registered = true,
            Err(e) => debug!(device = context.index, error = %e, "Color registration failed"),
        }
    }

    let Some(mut writer) = context.frame.try_begin_writing() else {
        CaptureStats::bump(&stats.frames_dropped);
        trace!(device = context.index, "Frame busy, dropping capture");
        return IterationOutcome::Dropped;
    };

    if registered {
        writer.write_image(ImageChannel::Color, resources.registered_color.buffer());
    }
    if let Some(depth) = &depth {
        writer.write_image(ImageChannel::Depth, depth.buffer());

        if resources.point_cloud_template.is_none() {
            let template =
                build_point_cloud_template(&resources.xy_table, context.settings.template_depth_mm);
            writer.write_image(ImageChannel::PointCloud, &template.to_padded_bytes());
            debug!(
                device = context.index,
                valid = template.valid_count(),
                "Published point cloud template"
            );
            resources.point_cloud_template = Some(template);
        }
    }
    writer.end();

    CaptureStats::bump(&stats.frames_written);
    IterationOutcome::Written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DepthDriver;
    use crate::synthetic::{ScriptedOutcome, SyntheticDriver};
    use rgbd_data::{ColorResolution, DepthMode, Fps, FrameDimensions, StreamConfig};

    fn small_config() -> StreamConfig {
        StreamConfig {
            color_resolution: ColorResolution::R720p,
            depth_mode: DepthMode::NfovBinned,
            fps: Fps::Fps30,
            ..Default::default()
        }
    }

    fn setup(
        driver: &SyntheticDriver,
    ) -> (CaptureContext<crate::synthetic::SyntheticDevice>, CaptureResources<crate::synthetic::SyntheticDevice>) {
        let config = small_config();
        let device = driver.open(0).unwrap();
        device.start_cameras(&config).unwrap();
        let calibration = device
            .calibration(config.depth_mode, config.color_resolution)
            .unwrap();
        let transformation = device.create_transformation(&calibration).unwrap();
        let resources = CaptureResources::new(transformation, &calibration).unwrap();
        let (dw, dh) = calibration.depth_camera.resolution();
        let (cw, ch) = calibration.color_camera.resolution();
        let context = CaptureContext {
            index: 0,
            device: Arc::new(device),
            frame: Arc::new(FrameBuffer::new(
                FrameDimensions::new(dw, dh, 4),
                FrameDimensions::new(dw, dh, 2),
                FrameDimensions::new(dw, dh, 16),
            )),
            color_cache: Arc::new(ColorCache::new(FrameDimensions::new(cw, ch, 4))),
            stats: Arc::new(CaptureStats::default()),
            settings: CaptureSettings::default(),
        };
        (context, resources)
    }

    #[test]
    fn test_iteration_publishes_all_channels() {
        let driver = SyntheticDriver::new(1).with_script(vec![ScriptedOutcome::Capture]);
        let (context, mut resources) = setup(&driver);

        assert_eq!(capture_once(&context, &mut resources), IterationOutcome::Written);
        assert!(resources.point_cloud_template.is_some());

        let reader = context.frame.try_begin_reading().unwrap();
        for channel in ImageChannel::ALL {
            assert_eq!(reader.channel_version(channel), 1, "{}", channel.name());
        }
        let depth = reader.frame_buffer(ImageChannel::Depth);
        assert!(depth.iter().any(|&b| b != 0));
        drop(reader);

        let stats = context.stats.snapshot();
        assert_eq!(stats.captures, 1);
        assert_eq!(stats.frames_written, 1);
    }

    #[test]
    fn test_template_written_once() {
        let driver = SyntheticDriver::new(1).with_script(vec![ScriptedOutcome::Capture]);
        let (context, mut resources) = setup(&driver);

        capture_once(&context, &mut resources);
        capture_once(&context, &mut resources);

        let reader = context.frame.try_begin_reading().unwrap();
        assert_eq!(reader.channel_version(ImageChannel::Depth), 2);
        assert_eq!(reader.channel_version(ImageChannel::PointCloud), 1);
    }

    #[test]
    fn test_busy_frame_drops_capture() {
        let driver = SyntheticDriver::new(1).with_script(vec![ScriptedOutcome::Capture]);
        let (context, mut resources) = setup(&driver);

        let reader = context.frame.try_begin_reading().unwrap();
        assert_eq!(capture_once(&context, &mut resources), IterationOutcome::Dropped);
        assert_eq!(reader.channel_version(ImageChannel::Depth), 0);
        drop(reader);

        assert_eq!(context.stats.snapshot().frames_dropped, 1);
        assert_eq!(driver.counters().live_captures(), 0);
    }

    #[test]
    fn test_timeouts_and_failures_counted() {
        let driver = SyntheticDriver::new(1).with_script(vec![
            ScriptedOutcome::TimedOut,
            ScriptedOutcome::Failed,
        ]);
        let (context, mut resources) = setup(&driver);

        assert_eq!(capture_once(&context, &mut resources), IterationOutcome::TimedOut);
        assert_eq!(capture_once(&context, &mut resources), IterationOutcome::Failed);

        let stats = context.stats.snapshot();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.frames_written, 0);
    }

    #[test]
    fn test_depth_only_capture_skips_color() {
        let driver = SyntheticDriver::new(1).with_script(vec![ScriptedOutcome::DepthOnly]);
        let (context, mut resources) = setup(&driver);

        assert_eq!(capture_once(&context, &mut resources), IterationOutcome::Written);
        let reader = context.frame.try_begin_reading().unwrap();
        assert_eq!(reader.channel_version(ImageChannel::Color), 0);
        assert_eq!(reader.channel_version(ImageChannel::Depth), 1);
    }

    #[test]
    fn test_loop_exits_on_cancel() {
        let driver = SyntheticDriver::new(1);
        let (context, resources) = setup(&driver);
        let stats = context.stats.clone();
        let token = CancellationToken::new();
        token.cancel();

        let resources = run_capture_loop(context, resources, token);
        assert!(resources.point_cloud_template.is_none());
        assert_eq!(stats.snapshot(), CaptureStatsSnapshot::default());
    }
}
