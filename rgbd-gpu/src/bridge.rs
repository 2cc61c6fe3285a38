//! Host-facing control surface.
//!
//! [`DepthBridge`] owns a [`DeviceRegistry`] and a surface backend, and turns
//! every failure into a `bool` or `None` for the host, logging the cause.
//! [`DepthBridge::try_update`] is meant to be called once per host frame: it
//! copies whatever each device has published into its three surfaces and
//! skips any device whose frame is currently being written.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use rgbd_capture::{
    CachedImageInfo, CalibrationSummary, CaptureError, CaptureSettings, DepthDriver,
    DeviceRegistry, FrameBuffer,
};
use rgbd_data::{DataError, FrameDimensions, FrameSnapshot, ImageChannel, StreamConfig};
use tracing::{debug, info, trace, warn};

use crate::registry::{SurfaceHandle, SurfaceRegistry};
use crate::surface::{PixelFormat, SurfaceBackend, SurfaceError};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("No surface backend, call initialize first")]
    NotInitialized,
    #[error("Device {0} has no surfaces")]
    NoSurfaces(u32),
    #[error("Frame of device {0} is busy")]
    FrameBusy(u32),
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),
    #[error("Data error: {0}")]
    Data(#[from] DataError),
}

/// One published channel as the host sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceView {
    pub handle: SurfaceHandle,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
}

/// The three surfaces of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceViews {
    pub color: SurfaceView,
    pub depth: SurfaceView,
    pub point_cloud: SurfaceView,
}

impl DeviceViews {
    pub fn get(&self, channel: ImageChannel) -> SurfaceView {
        match channel {
            ImageChannel::Color => self.color,
            ImageChannel::Depth => self.depth,
            ImageChannel::PointCloud => self.point_cloud,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ChannelSurface {
    handle: SurfaceHandle,
    dimensions: FrameDimensions,
    /// Frame version last copied into the surface.
    version: u64,
}

impl ChannelSurface {
    fn view(&self) -> SurfaceView {
        SurfaceView {
            handle: self.handle,
            width: self.dimensions.width,
            height: self.dimensions.height,
            bytes_per_pixel: self.dimensions.bytes_per_pixel,
        }
    }
}

#[derive(Debug)]
struct DeviceSurfaces {
    frame: Weak<FrameBuffer>,
    channels: [ChannelSurface; ImageChannel::COUNT],
}

impl DeviceSurfaces {
    fn dimensions(&self) -> [FrameDimensions; ImageChannel::COUNT] {
        self.channels.map(|c| c.dimensions)
    }

    /// Point at a new frame. Its versions start over, so ours do too.
    fn attach(&mut self, frame: &Arc<FrameBuffer>) {
        if !Weak::ptr_eq(&self.frame, &Arc::downgrade(frame)) {
            self.frame = Arc::downgrade(frame);
            for channel in &mut self.channels {
                channel.version = 0;
            }
        }
    }
}

/// Device registry plus GPU surfaces, driven by the host.
pub struct DepthBridge<D: DepthDriver, B: SurfaceBackend> {
    registry: DeviceRegistry<D>,
    backend: Option<B>,
    surfaces: SurfaceRegistry<B::Surface>,
    devices: HashMap<u32, DeviceSurfaces>,
}

impl<D: DepthDriver, B: SurfaceBackend> DepthBridge<D, B> {
    pub fn new(driver: D, settings: CaptureSettings) -> Self {
        Self {
            registry: DeviceRegistry::new(driver, settings),
            backend: None,
            surfaces: SurfaceRegistry::new(),
            devices: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry<D> {
        &self.registry
    }

    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    pub fn device_count(&self) -> u32 {
        self.registry.device_count()
    }

    /// Attach the surface backend. `None` means no GPU context is available.
    ///
    /// Replacing a backend discards surfaces created on the previous one.
    pub fn initialize(&mut self, backend: Option<B>) -> bool {
        let Some(backend) = backend else {
            warn!("No GPU context available, bridge not initialized");
            return false;
        };
        if self.backend.is_some() {
            debug!(surfaces = self.surfaces.len(), "Replacing surface backend");
            self.devices.clear();
            self.surfaces = SurfaceRegistry::new();
        }
        info!(backend = backend.name(), "Bridge initialized");
        self.backend = Some(backend);
        true
    }

    pub fn try_start_streams(&self, index: u32, config: StreamConfig) -> bool {
        match self.registry.try_start_streams(index, config) {
            Ok(()) => true,
            Err(e) => {
                warn!(device = index, error = %e, "Failed to start streams");
                false
            }
        }
    }

    pub fn stop_streaming(&self, index: u32) {
        self.registry.stop_streaming(index);
    }

    /// Refresh every streaming device's surfaces from its latest frame.
    ///
    /// Returns `false` when uninitialized, when nothing is streaming, or when
    /// a device's surfaces could not be created or updated. A device whose
    /// frame is busy is skipped and does not count as a failure.
    pub fn try_update(&mut self) -> bool {
        let Some(backend) = self.backend.as_mut() else {
            trace!("Update before initialize");
            return false;
        };
        let indices = self.registry.active_indices();
        if indices.is_empty() {
            trace!("No streaming devices to update");
            return false;
        }

        let mut all_ok = true;
        for index in indices {
            // Stopped since the index list was taken.
            let Some(frame) = self.registry.frame(index) else {
                continue;
            };
            if let Err(e) =
                update_device(backend, &mut self.surfaces, &mut self.devices, index, &frame)
            {
                warn!(device = index, error = %e, "Failed to update surfaces");
                all_ok = false;
            }
        }
        all_ok
    }

    pub fn try_get_calibration(
        &self,
        index: u32,
        color_intrinsics: &mut [f32],
        depth_intrinsics: &mut [f32],
    ) -> Option<CalibrationSummary> {
        self.registry
            .copy_calibration(index, color_intrinsics, depth_intrinsics)
            .inspect_err(|e| warn!(device = index, error = %e, "Calibration unavailable"))
            .ok()
    }

    pub fn try_get_cached_color_image(&self, index: u32, out: &mut [u8]) -> Option<CachedImageInfo> {
        self.registry
            .copy_cached_color_image(index, out)
            .inspect_err(|e| warn!(device = index, error = %e, "Cached color image unavailable"))
            .ok()
    }

    /// Write the serial number into `out` followed by a NUL byte.
    pub fn try_get_device_serial_number(&self, index: u32, out: &mut [u8]) -> bool {
        let serial = match self.registry.serial_number(index) {
            Ok(serial) => serial,
            Err(e) => {
                warn!(device = index, error = %e, "Serial number unavailable");
                return false;
            }
        };
        let bytes = serial.as_bytes();
        if bytes.len() >= out.len() {
            warn!(
                device = index,
                needed = bytes.len() + 1,
                available = out.len(),
                "Serial number buffer too small"
            );
            return false;
        }
        out[..bytes.len()].copy_from_slice(bytes);
        out[bytes.len()] = 0;
        true
    }

    /// Views of a device's surfaces. Surfaces outlive the stream that fed
    /// them, so a stopped device still reports its last content.
    pub fn try_get_shader_resource_views(&self, index: u32) -> Option<DeviceViews> {
        let Some(device) = self.devices.get(&index) else {
            debug!(device = index, "No surfaces created for device");
            return None;
        };
        let [color, depth, point_cloud] = device.channels.map(|c| c.view());
        Some(DeviceViews {
            color,
            depth,
            point_cloud,
        })
    }

    pub fn surface(&self, handle: SurfaceHandle) -> Option<&B::Surface> {
        self.surfaces.get(handle)
    }

    /// Copy the device's current frame out as a snapshot.
    pub fn capture_snapshot(&self, index: u32) -> Result<FrameSnapshot, BridgeError> {
        let frame = self
            .registry
            .frame(index)
            .ok_or(CaptureError::NotStreaming(index))?;
        let reader = frame
            .try_begin_reading()
            .ok_or(BridgeError::FrameBusy(index))?;
        let dims = reader.dimensions(ImageChannel::Depth);
        let snapshot = FrameSnapshot::new(
            dims.width,
            dims.height,
            reader.frame_buffer(ImageChannel::Color),
            reader.frame_buffer(ImageChannel::Depth),
            reader.frame_buffer(ImageChannel::PointCloud),
        )?;
        Ok(snapshot)
    }
}

impl<D: DepthDriver, B: SurfaceBackend> Drop for DepthBridge<D, B> {
    fn drop(&mut self) {
        self.registry.stop_streaming_all();
    }
}

fn update_device<B: SurfaceBackend>(
    backend: &mut B,
    surfaces: &mut SurfaceRegistry<B::Surface>,
    devices: &mut HashMap<u32, DeviceSurfaces>,
    index: u32,
    frame: &Arc<FrameBuffer>,
) -> Result<(), BridgeError> {
    let dimensions = frame.all_dimensions();
    if devices.get(&index).is_none_or(|d| d.dimensions() != dimensions) {
        let created = create_device_surfaces(backend, surfaces, index, frame)?;
        if let Some(old) = devices.insert(index, created) {
            for channel in old.channels {
                surfaces.remove(channel.handle);
            }
        }
    }
    let device = devices.get_mut(&index).ok_or(BridgeError::NoSurfaces(index))?;
    device.attach(frame);

    let Some(reader) = frame.try_begin_reading() else {
        trace!(device = index, "Frame busy, skipping update");
        return Ok(());
    };
    for (channel, slot) in ImageChannel::ALL.into_iter().zip(device.channels.iter_mut()) {
        let version = reader.channel_version(channel);
        if version == slot.version {
            continue;
        }
        let surface = surfaces
            .get_mut(slot.handle)
            .ok_or(BridgeError::NoSurfaces(index))?;
        reader.read_image(channel, |bytes, dims| {
            backend.update_surface(surface, bytes, dims.stride())
        })?;
        slot.version = version;
    }
    Ok(())
}

fn create_device_surfaces<B: SurfaceBackend>(
    backend: &mut B,
    surfaces: &mut SurfaceRegistry<B::Surface>,
    index: u32,
    frame: &Arc<FrameBuffer>,
) -> Result<DeviceSurfaces, BridgeError> {
    let [color, depth, point_cloud] = ImageChannel::ALL.map(|channel| {
        let dimensions = frame.dimensions(channel);
        backend.create_surface(
            &format!("device-{index}-{}", channel.name()),
            &vec![0; dimensions.byte_len()],
            dimensions,
            PixelFormat::for_channel(channel),
        )
    });
    let (color, depth, point_cloud) = (color?, depth?, point_cloud?);
    debug!(device = index, "Created device surfaces");

    let mut register = |channel: ImageChannel, surface: B::Surface| ChannelSurface {
        handle: surfaces.insert(surface),
        dimensions: frame.dimensions(channel),
        version: 0,
    };
    Ok(DeviceSurfaces {
        frame: Arc::downgrade(frame),
        channels: [
            register(ImageChannel::Color, color),
            register(ImageChannel::Depth, depth),
            register(ImageChannel::PointCloud, point_cloud),
        ],
    })
}
