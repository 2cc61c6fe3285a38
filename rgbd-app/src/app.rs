//! Streaming run driven from the command line.

use std::ffi::CStr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use rgbd_capture::DepthDriver;
use rgbd_data::FrameSnapshot;
use rgbd_gpu::{
    BridgeError, CpuSurfaceBackend, DepthBridge, GpuContext, SurfaceBackend, WgpuSurfaceBackend,
};
use tracing::{debug, info};

use crate::config::{AppConfig, LoggingConfig};
use crate::error::AppError;
use crate::export::export_snapshot;

const SERIAL_CAPACITY: usize = 64;
const SNAPSHOT_ATTEMPTS: u32 = 50;

/// Where surfaces live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    Wgpu,
    Cpu,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Devices to stream; all attached devices when empty.
    pub devices: Vec<u32>,
    pub frames: u32,
    pub backend: Backend,
    pub snapshot_dir: Option<PathBuf>,
}

pub fn init_logging(logging: &LoggingConfig) {
    #[cfg(feature = "tracy")]
    {
        if logging.enable_tracy {
            use tracing_subscriber::Layer;
            use tracing_subscriber::layer::SubscriberExt;
            use tracing_subscriber::util::SubscriberInitExt;
            tracing_subscriber::registry()
                .with(tracing_tracy::TracyLayer::default())
                .with(
                    tracing_subscriber::fmt::layer().with_filter(
                        tracing_subscriber::EnvFilter::try_from_default_env()
                            .unwrap_or_else(|_| logging.level.clone().into()),
                    ),
                )
                .init();
            return;
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level)),
        )
        .with_target(false)
        .init();
}

pub fn run(config: AppConfig, options: RunOptions) -> Result<(), AppError> {
    match options.backend {
        Backend::Cpu => stream(&config, &options, CpuSurfaceBackend::new()),
        Backend::Wgpu => {
            let context = GpuContext::headless_blocking()?;
            stream(&config, &options, WgpuSurfaceBackend::new(context))
        }
    }
}

fn stream<B: SurfaceBackend>(
    config: &AppConfig,
    options: &RunOptions,
    backend: B,
) -> Result<(), AppError> {
    let mut bridge = DepthBridge::new(config.synthetic.driver(), config.capture);
    if !bridge.initialize(Some(backend)) {
        return Err(AppError::NotInitialized);
    }

    let count = bridge.device_count();
    if count == 0 {
        return Err(AppError::NoDevices);
    }
    let indices: Vec<u32> = if options.devices.is_empty() {
        (0..count).collect()
    } else {
        options.devices.clone()
    };

    for &index in &indices {
        start_device(&bridge, index, config)?;
    }

    let period = Duration::from_secs(1) / config.stream.fps.hz();
    let mut updates = 0u32;
    for _ in 0..options.frames {
        if bridge.try_update() {
            updates += 1;
        }
        thread::sleep(period);
    }
    info!(frames = options.frames, updates, "Finished streaming");

    for &index in &indices {
        report_device(&bridge, index);
        if let Some(dir) = &options.snapshot_dir {
            let snapshot = capture_snapshot(&bridge, index)?;
            export_snapshot(dir, &format!("device{index}"), &snapshot)?;
        }
    }

    for &index in &indices {
        bridge.stop_streaming(index);
    }
    Ok(())
}

fn start_device<D: DepthDriver, B: SurfaceBackend>(
    bridge: &DepthBridge<D, B>,
    index: u32,
    config: &AppConfig,
) -> Result<(), AppError> {
    let mut serial = [0u8; SERIAL_CAPACITY];
    if bridge.try_get_device_serial_number(index, &mut serial) {
        let serial = CStr::from_bytes_until_nul(&serial)
            .ok()
            .and_then(|s| s.to_str().ok())
            .unwrap_or_default();
        info!(device = index, serial, "Found device");
    }

    if !bridge.try_start_streams(index, config.stream) {
        return Err(AppError::StartFailed(index));
    }

    let mut color = [0.0f32; rgbd_data::INTRINSICS_PARAMETER_SLOTS];
    let mut depth = [0.0f32; rgbd_data::INTRINSICS_PARAMETER_SLOTS];
    if let Some(summary) = bridge.try_get_calibration(index, &mut color, &mut depth) {
        info!(
            device = index,
            depth = %format!("{}x{}", summary.depth.width, summary.depth.height),
            color = %format!("{}x{}", summary.color.width, summary.color.height),
            baseline_mm = ?summary.color.translation,
            "Calibration"
        );
    }
    Ok(())
}

fn report_device<D: DepthDriver, B: SurfaceBackend>(bridge: &DepthBridge<D, B>, index: u32) {
    if let Some(stats) = bridge.registry().stats(index) {
        info!(
            device = index,
            captures = stats.captures,
            written = stats.frames_written,
            dropped = stats.frames_dropped,
            timeouts = stats.timeouts,
            failures = stats.failures,
            "Capture stats"
        );
    }
    if let Some(views) = bridge.try_get_shader_resource_views(index) {
        debug!(
            device = index,
            color = views.color.handle.id(),
            depth = views.depth.handle.id(),
            point_cloud = views.point_cloud.handle.id(),
            "Surfaces"
        );
    }
}

/// The frame may be mid-write; retry briefly.
fn capture_snapshot<D: DepthDriver, B: SurfaceBackend>(
    bridge: &DepthBridge<D, B>,
    index: u32,
) -> Result<FrameSnapshot, AppError> {
    for _ in 0..SNAPSHOT_ATTEMPTS {
        match bridge.capture_snapshot(index) {
            Ok(snapshot) => return Ok(snapshot),
            Err(BridgeError::FrameBusy(_)) => thread::sleep(Duration::from_millis(1)),
            Err(e) => return Err(e.into()),
        }
    }
    Err(BridgeError::FrameBusy(index).into())
}
