//! Software depth camera.
//!
//! Produces a fixed BGRA gradient and a tilted depth plane through the same
//! driver traits as real hardware. Captures can be scripted to time out or
//! fail, and every open/close/start/stop and live capture is counted so
//! resource release can be checked from tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use glam::Vec3;
use rgbd_data::{
    BROWN_CONRADY_PARAMETER_COUNT, Calibration, ColorResolution, DepthMode, Extrinsics, Image, ImageFormat, StreamConfig,
    register_color_to_depth,
};
use tracing::debug;

use crate::driver::{DepthDriver, DeviceCapture, DeviceHandle, DeviceImage, Transformation, WaitResult};
use crate::error::DriverError;

/// Columns at the left edge that report no depth.
const INVALID_DEPTH_COLUMNS: u32 = 4;

/// What the next capture poll returns. Scripts repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedOutcome {
    Capture,
    DepthOnly,
    ColorOnly,
    TimedOut,
    Failed,
}

/// Lifecycle counters shared by a driver and all devices it opened.
#[derive(Debug, Default)]
pub struct SyntheticCounters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    cameras_started: AtomicUsize,
    cameras_stopped: AtomicUsize,
    captures_created: AtomicUsize,
    captures_released: AtomicUsize,
}

impl SyntheticCounters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }

    pub fn cameras_started(&self) -> usize {
        self.cameras_started.load(Ordering::SeqCst)
    }

    pub fn cameras_stopped(&self) -> usize {
        self.cameras_stopped.load(Ordering::SeqCst)
    }

    pub fn live_captures(&self) -> usize {
        self.captures_created
            .load(Ordering::SeqCst)
            .saturating_sub(self.captures_released.load(Ordering::SeqCst))
    }
}

#[derive(Debug)]
struct DriverShared {
    installed: AtomicU32,
    serial_prefix: String,
    script: Vec<ScriptedOutcome>,
    frame_pacing: bool,
    color_extrinsics: Extrinsics,
    parameter_count: u32,
    failing_open: HashSet<u32>,
    failing_start: HashSet<u32>,
    counters: Arc<SyntheticCounters>,
}

/// A driver exposing `count` software devices.
#[derive(Debug, Clone)]
pub struct SyntheticDriver {
    shared: Arc<DriverShared>,
}

impl SyntheticDriver {
    pub fn new(count: u32) -> Self {
        Self {
            shared: Arc::new(DriverShared {
                installed: AtomicU32::new(count),
                serial_prefix: "SYNTH-".to_string(),
                script: vec![ScriptedOutcome::Capture],
                frame_pacing: false,
                color_extrinsics: Extrinsics::from_translation(Vec3::new(-32.0, -2.0, 4.0)),
                parameter_count: BROWN_CONRADY_PARAMETER_COUNT,
                failing_open: HashSet::new(),
                failing_start: HashSet::new(),
                counters: Arc::new(SyntheticCounters::default()),
            }),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut DriverShared)) -> Self {
        // Builders run before the driver is shared.
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            f(shared);
        }
        self
    }

    pub fn with_serial_prefix(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.configure(|s| s.serial_prefix = prefix)
    }

    /// Outcomes returned by successive capture polls, cycled. Empty scripts
    /// are ignored.
    pub fn with_script(self, script: Vec<ScriptedOutcome>) -> Self {
        self.configure(|s| {
            if !script.is_empty() {
                s.script = script;
            }
        })
    }

    /// Deliver captures no faster than the configured frame rate.
    pub fn with_frame_pacing(self, enabled: bool) -> Self {
        self.configure(|s| s.frame_pacing = enabled)
    }

    pub fn with_color_extrinsics(self, extrinsics: Extrinsics) -> Self {
        self.configure(|s| s.color_extrinsics = extrinsics)
    }

    /// Intrinsics parameter count reported for both cameras.
    pub fn with_parameter_count(self, count: u32) -> Self {
        self.configure(|s| s.parameter_count = count)
    }

    pub fn with_failing_open(self, index: u32) -> Self {
        self.configure(|s| {
            s.failing_open.insert(index);
        })
    }

    pub fn with_failing_start(self, index: u32) -> Self {
        self.configure(|s| {
            s.failing_start.insert(index);
        })
    }

    /// Simulate devices being plugged or unplugged.
    pub fn set_installed_count(&self, count: u32) {
        self.shared.installed.store(count, Ordering::SeqCst);
    }

    pub fn counters(&self) -> &SyntheticCounters {
        &self.shared.counters
    }

    pub fn serial_for(&self, index: u32) -> String {
        format!("{}{:06}", self.shared.serial_prefix, index)
    }
}

impl DepthDriver for SyntheticDriver {
    type Device = SyntheticDevice;

    fn installed_count(&self) -> u32 {
        self.shared.installed.load(Ordering::SeqCst)
    }

    fn open(&self, index: u32) -> Result<SyntheticDevice, DriverError> {
        if index >= self.installed_count() || self.shared.failing_open.contains(&index) {
            return Err(DriverError::OpenFailed(index));
        }
        self.shared.counters.opened.fetch_add(1, Ordering::SeqCst);
        debug!(device = index, "Opened synthetic device");
        Ok(SyntheticDevice {
            index,
            serial: self.serial_for(index),
            driver: self.shared.clone(),
            stream: Mutex::new(None),
        })
    }
}

#[derive(Debug)]
struct StreamState {
    config: StreamConfig,
    color: Arc<Image>,
    depth: Arc<Image>,
    sequence: usize,
    last_capture: Option<Instant>,
}

/// An open software device. Dropping it closes the device.
#[derive(Debug)]
pub struct SyntheticDevice {
    index: u32,
    serial: String,
    driver: Arc<DriverShared>,
    stream: Mutex<Option<StreamState>>,
}

impl SyntheticDevice {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn is_streaming(&self) -> bool {
        self.lock_stream().is_some()
    }

    fn lock_stream(&self) -> std::sync::MutexGuard<'_, Option<StreamState>> {
        self.stream.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn new_capture(&self, color: Option<Arc<Image>>, depth: Option<Arc<Image>>) -> SyntheticCapture {
        self.driver
            .counters
            .captures_created
            .fetch_add(1, Ordering::SeqCst);
        SyntheticCapture {
            color,
            depth,
            counters: self.driver.counters.clone(),
        }
    }
}

impl DeviceHandle for SyntheticDevice {
    type Capture = SyntheticCapture;
    type Transformation = SyntheticTransformation;

    fn start_cameras(&self, config: &StreamConfig) -> Result<(), DriverError> {
        config
            .validate()
            .map_err(|e| DriverError::StartFailed(e.to_string()))?;
        if config.color_format != ImageFormat::ColorBgra32 {
            return Err(DriverError::UnsupportedFormat(format!(
                "synthetic devices stream BGRA32 color, not {:?}",
                config.color_format
            )));
        }
        if self.driver.failing_start.contains(&self.index) {
            return Err(DriverError::StartFailed(format!(
                "device {} refused to start",
                self.index
            )));
        }
        let (Some((color_width, color_height)), Some((depth_width, depth_height))) =
            (config.color_resolution.dimensions(), config.depth_mode.dimensions())
        else {
            return Err(DriverError::StartFailed(
                "synthetic devices need both color and depth".to_string(),
            ));
        };

        let mut stream = self.lock_stream();
        if stream.is_some() {
            return Err(DriverError::StartFailed("cameras already started".to_string()));
        }
        *stream = Some(StreamState {
            config: *config,
            color: Arc::new(gradient_image(color_width, color_height, self.index)),
            depth: Arc::new(depth_plane(depth_width, depth_height)),
            sequence: 0,
            last_capture: None,
        });
        self.driver
            .counters
            .cameras_started
            .fetch_add(1, Ordering::SeqCst);
        debug!(device = self.index, ?config, "Started synthetic cameras");
        Ok(())
    }

    fn stop_cameras(&self) {
        if self.lock_stream().take().is_some() {
            self.driver
                .counters
                .cameras_stopped
                .fetch_add(1, Ordering::SeqCst);
            debug!(device = self.index, "Stopped synthetic cameras");
        }
    }

    fn serial_number(&self) -> Result<String, DriverError> {
        Ok(self.serial.clone())
    }

    fn calibration(
        &self,
        depth_mode: DepthMode,
        color_resolution: ColorResolution,
    ) -> Result<Calibration, DriverError> {
        let mut calibration =
            Calibration::from_pinhole(depth_mode, color_resolution, self.driver.color_extrinsics)
                .ok_or_else(|| {
                    DriverError::CalibrationFailed(format!(
                        "no calibration for {depth_mode:?} with {color_resolution:?}"
                    ))
                })?;
        calibration.depth_camera.intrinsics.parameter_count = self.driver.parameter_count;
        calibration.color_camera.intrinsics.parameter_count = self.driver.parameter_count;
        Ok(calibration)
    }

    fn get_capture(&self, timeout: Duration) -> WaitResult<SyntheticCapture> {
        let mut guard = self.lock_stream();
        let Some(stream) = guard.as_mut() else {
            return WaitResult::Failed;
        };

        if self.driver.frame_pacing {
            let period = Duration::from_secs(1) / stream.config.fps.hz();
            if let Some(last) = stream.last_capture {
                let remaining = period.saturating_sub(last.elapsed());
                if remaining > timeout {
                    return WaitResult::TimedOut;
                }
                thread::sleep(remaining);
            }
            stream.last_capture = Some(Instant::now());
        }

        let outcome = self.driver.script[stream.sequence % self.driver.script.len()];
        stream.sequence += 1;
        let (color, depth) = (stream.color.clone(), stream.depth.clone());
        drop(guard);

        match outcome {
            ScriptedOutcome::Capture => WaitResult::Succeeded(self.new_capture(Some(color), Some(depth))),
            ScriptedOutcome::DepthOnly => WaitResult::Succeeded(self.new_capture(None, Some(depth))),
            ScriptedOutcome::ColorOnly => WaitResult::Succeeded(self.new_capture(Some(color), None)),
            ScriptedOutcome::TimedOut => WaitResult::TimedOut,
            ScriptedOutcome::Failed => WaitResult::Failed,
        }
    }

    fn create_transformation(
        &self,
        calibration: &Calibration,
    ) -> Result<SyntheticTransformation, DriverError> {
        Ok(SyntheticTransformation {
            calibration: *calibration,
        })
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.stop_cameras();
        self.driver.counters.closed.fetch_add(1, Ordering::SeqCst);
        debug!(device = self.index, "Closed synthetic device");
    }
}

/// One synthetic exposure. Images are shared with the device's stream.
#[derive(Debug)]
pub struct SyntheticCapture {
    color: Option<Arc<Image>>,
    depth: Option<Arc<Image>>,
    counters: Arc<SyntheticCounters>,
}

impl DeviceCapture for SyntheticCapture {
    type Image = SyntheticImage;

    fn color_image(&self) -> Option<SyntheticImage> {
        self.color.clone().map(SyntheticImage)
    }

    fn depth_image(&self) -> Option<SyntheticImage> {
        self.depth.clone().map(SyntheticImage)
    }
}

impl Drop for SyntheticCapture {
    fn drop(&mut self) {
        self.counters
            .captures_released
            .fetch_add(1, Ordering::SeqCst);
    }
}

/// Reference to an image inside a synthetic capture.
#[derive(Debug, Clone)]
pub struct SyntheticImage(Arc<Image>);

impl DeviceImage for SyntheticImage {
    fn format(&self) -> ImageFormat {
        self.0.format()
    }

    fn width(&self) -> u32 {
        self.0.width()
    }

    fn height(&self) -> u32 {
        self.0.height()
    }

    fn stride(&self) -> usize {
        self.0.stride()
    }

    fn buffer(&self) -> &[u8] {
        self.0.buffer()
    }
}

/// Software color-to-depth registration for one calibration.
#[derive(Debug)]
pub struct SyntheticTransformation {
    calibration: Calibration,
}

impl Transformation for SyntheticTransformation {
    fn color_image_to_depth_camera(
        &mut self,
        depth: &dyn DeviceImage,
        color: &dyn DeviceImage,
        out: &mut Image,
    ) -> Result<(), DriverError> {
        if depth.format() != ImageFormat::Depth16 || color.format() != ImageFormat::ColorBgra32 {
            return Err(DriverError::UnsupportedFormat(format!(
                "{:?} depth with {:?} color",
                depth.format(),
                color.format()
            )));
        }
        register_color_to_depth(
            &self.calibration,
            depth.buffer(),
            color.buffer(),
            color.stride(),
            out.buffer_mut(),
        )
        .map_err(|e| DriverError::TransformationFailed(e.to_string()))
    }
}

fn gradient_image(width: u32, height: u32, index: u32) -> Image {
    let mut image = Image::new(ImageFormat::ColorBgra32, width, height, width as usize * 4);
    let red = (128 + index * 40) as u8;
    for (i, pixel) in image.buffer_mut().chunks_exact_mut(4).enumerate() {
        let x = (i % width as usize) as u32;
        let y = (i / width as usize) as u32;
        pixel.copy_from_slice(&[
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            red,
            255,
        ]);
    }
    image
}

fn depth_plane(width: u32, height: u32) -> Image {
    let mut image = Image::new(ImageFormat::Depth16, width, height, width as usize * 2);
    for (i, pixel) in image.buffer_mut().chunks_exact_mut(2).enumerate() {
        let x = (i % width as usize) as u32;
        let y = (i / width as usize) as u32;
        let depth = if x < INVALID_DEPTH_COLUMNS {
            0
        } else {
            (1000 + x * 2 + y) as u16
        };
        pixel.copy_from_slice(&depth.to_le_bytes());
    }
    image
}
