//! Latest unregistered color image, kept at color-camera resolution.

use std::sync::Mutex;

use rgbd_data::FrameDimensions;

use crate::error::CaptureError;

#[derive(Debug)]
struct CachedColor {
    data: Vec<u8>,
    updates: u64,
}

/// Copy of the most recent raw BGRA color image.
///
/// Written by the capture loop and read by consumers under its own lock, so
/// it does not take part in the frame hand-off.
#[derive(Debug)]
pub struct ColorCache {
    dimensions: FrameDimensions,
    inner: Mutex<CachedColor>,
}

/// Layout of a color image copied out of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedImageInfo {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    pub stride: usize,
    pub size: usize,
    /// Number of images stored so far. Zero means the bytes are still blank.
    pub updates: u64,
}

impl ColorCache {
    pub fn new(dimensions: FrameDimensions) -> Self {
        Self {
            dimensions,
            inner: Mutex::new(CachedColor {
                data: vec![0; dimensions.byte_len()],
                updates: 0,
            }),
        }
    }

    pub fn dimensions(&self) -> FrameDimensions {
        self.dimensions
    }

    /// Replace the cached bytes. Images of the wrong size are ignored.
    pub fn store(&self, bytes: &[u8]) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if bytes.len() != inner.data.len() {
            return false;
        }
        inner.data.copy_from_slice(bytes);
        inner.updates += 1;
        true
    }

    /// Copy the cached image into the front of `out`.
    pub fn copy_to(&self, out: &mut [u8]) -> Result<CachedImageInfo, CaptureError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let size = inner.data.len();
        if out.len() < size {
            return Err(CaptureError::Capacity {
                what: "cached color image",
                needed: size,
                available: out.len(),
            });
        }
        out[..size].copy_from_slice(&inner.data);
        Ok(CachedImageInfo {
            width: self.dimensions.width,
            height: self.dimensions.height,
            bytes_per_pixel: self.dimensions.bytes_per_pixel,
            stride: self.dimensions.stride(),
            size,
            updates: inner.updates,
        })
    }
}
