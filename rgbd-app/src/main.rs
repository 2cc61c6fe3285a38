//! rgbd
//!
//! Streams depth cameras through the capture pipeline, refreshes one surface
//! per channel each frame, and optionally exports a snapshot of every device
//! at the end.

mod app;
mod config;
mod error;
mod export;

use clap::Parser;
use rgbd_data::{ColorResolution, DepthMode, Fps};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

use crate::app::{Backend, RunOptions};
use crate::config::AppConfig;
use crate::error::AppError;

/// rgbd - Multi-device depth camera capture
#[derive(Parser, Debug)]
#[command(name = "rgbd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device index to stream; repeat for several (default: all attached)
    #[arg(short, long = "device")]
    devices: Vec<u32>,

    /// Number of synthetic devices to attach
    #[arg(long)]
    synthetic_devices: Option<u32>,

    /// Color resolution (720p, 1080p, 1440p, 1536p, 2160p, 3072p)
    #[arg(long, value_parser = parse_setting::<ColorResolution>)]
    color_resolution: Option<ColorResolution>,

    /// Depth mode (nfov_binned, nfov_unbinned, wfov_binned, wfov_unbinned)
    #[arg(long, value_parser = parse_setting::<DepthMode>)]
    depth_mode: Option<DepthMode>,

    /// Frame rate (5, 15, 30)
    #[arg(long, value_parser = parse_setting::<Fps>)]
    fps: Option<Fps>,

    /// Number of host frames to run before stopping
    #[arg(short, long, default_value_t = 90)]
    frames: u32,

    /// Surface backend
    #[arg(long, value_enum, default_value_t = Backend::Wgpu)]
    backend: Backend,

    /// Directory to write snapshots and PNG previews into
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

/// Parse a flag using the same spelling as the config file.
fn parse_setting<T: DeserializeOwned>(value: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| format!("unrecognised value '{value}'"))
}

fn load_config(args: &Args) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(count) = args.synthetic_devices {
        config.synthetic.device_count = count;
    }
    if let Some(resolution) = args.color_resolution {
        config.stream.color_resolution = resolution;
    }
    if let Some(mode) = args.depth_mode {
        config.stream.depth_mode = mode;
    }
    if let Some(fps) = args.fps {
        config.stream.fps = fps;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.stream.validate()?;
    Ok(config)
}

fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    app::init_logging(&config.logging);

    let options = RunOptions {
        devices: args.devices,
        frames: args.frames,
        backend: args.backend,
        snapshot_dir: args.snapshot,
    };
    if let Err(e) = app::run(config, options) {
        tracing::error!(error = %e, "Run failed");
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::try_parse_from([
            "rgbd",
            "--color-resolution",
            "720p",
            "--depth-mode",
            "wfov_binned",
            "--fps",
            "15",
            "--synthetic-devices",
            "2",
            "-d",
            "1",
            "--backend",
            "cpu",
        ])
        .unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.stream.color_resolution, ColorResolution::R720p);
        assert_eq!(config.stream.depth_mode, DepthMode::WfovBinned);
        assert_eq!(config.stream.fps, Fps::Fps15);
        assert_eq!(config.synthetic.device_count, 2);
        assert_eq!(args.devices, vec![1]);
        assert_eq!(args.backend, Backend::Cpu);
    }

    #[test]
    fn test_unknown_setting_rejected() {
        assert!(Args::try_parse_from(["rgbd", "--fps", "60"]).is_err());
    }

    #[test]
    fn test_unsupported_combination_rejected() {
        let args = Args::try_parse_from(["rgbd", "--depth-mode", "wfov_unbinned"]).unwrap();
        assert!(matches!(load_config(&args), Err(AppError::Data(_))));
    }
}
