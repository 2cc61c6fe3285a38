//! Single-slot frame hand-off between a capture loop and a consumer.
//!
//! A [`FrameBuffer`] holds the latest color, depth and point-cloud images for
//! one device. Access is phased: the producer takes a [`FrameWriter`], the
//! consumer takes a [`FrameReader`], and at most one of them exists at a
//! time. Neither side ever waits for the other; a failed `try_begin_*` means
//! "skip this round".

use std::sync::{Mutex, MutexGuard, TryLockError};

use rgbd_data::{FrameDimensions, ImageChannel};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStatus {
    Ready,
    Writing,
    Reading,
}

#[derive(Debug)]
struct FrameState {
    status: FrameStatus,
    images: [Vec<u8>; ImageChannel::COUNT],
    versions: [u64; ImageChannel::COUNT],
}

/// Latest published images for one device.
#[derive(Debug)]
pub struct FrameBuffer {
    dimensions: [FrameDimensions; ImageChannel::COUNT],
    state: Mutex<FrameState>,
}

impl FrameBuffer {
    /// Allocate zeroed storage for each channel.
    pub fn new(color: FrameDimensions, depth: FrameDimensions, point_cloud: FrameDimensions) -> Self {
        let dimensions = [color, depth, point_cloud];
        Self {
            dimensions,
            state: Mutex::new(FrameState {
                status: FrameStatus::Ready,
                images: dimensions.map(|d| vec![0; d.byte_len()]),
                versions: [0; ImageChannel::COUNT],
            }),
        }
    }

    pub fn dimensions(&self, channel: ImageChannel) -> FrameDimensions {
        self.dimensions[channel.index()]
    }

    pub fn all_dimensions(&self) -> [FrameDimensions; ImageChannel::COUNT] {
        self.dimensions
    }

    /// Enter the writing phase if the buffer is idle.
    pub fn try_begin_writing(&self) -> Option<FrameWriter<'_>> {
        self.try_transition(FrameStatus::Writing)
            .then_some(FrameWriter { frame: self })
    }

    /// Enter the reading phase if the buffer is idle.
    pub fn try_begin_reading(&self) -> Option<FrameReader<'_>> {
        self.try_transition(FrameStatus::Reading)
            .then_some(FrameReader { frame: self })
    }

    /// Whether a writer or reader currently holds the buffer.
    pub fn is_busy(&self) -> bool {
        self.lock().status != FrameStatus::Ready
    }

    fn try_transition(&self, to: FrameStatus) -> bool {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        if state.status != FrameStatus::Ready {
            return false;
        }
        state.status = to;
        true
    }

    fn finish(&self, from: FrameStatus) {
        let mut state = self.lock();
        if state.status == from {
            state.status = FrameStatus::Ready;
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrameState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive write access. Dropping it returns the buffer to idle.
#[derive(Debug)]
pub struct FrameWriter<'a> {
    frame: &'a FrameBuffer,
}

impl FrameWriter<'_> {
    /// Copy `data` into a channel. Returns `false`, leaving the channel
    /// untouched, when the length does not match the channel's size.
    pub fn write_image(&mut self, channel: ImageChannel, data: &[u8]) -> bool {
        let expected = self.frame.dimensions(channel).byte_len();
        if data.len() != expected {
            trace!(
                channel = channel.name(),
                expected,
                actual = data.len(),
                "Dropping image with mismatched size"
            );
            return false;
        }
        let mut state = self.frame.lock();
        state.images[channel.index()].copy_from_slice(data);
        state.versions[channel.index()] += 1;
        true
    }

    pub fn end(self) {}
}

impl Drop for FrameWriter<'_> {
    fn drop(&mut self) {
        self.frame.finish(FrameStatus::Writing);
    }
}

/// Shared read access. Dropping it returns the buffer to idle.
#[derive(Debug)]
pub struct FrameReader<'a> {
    frame: &'a FrameBuffer,
}

impl FrameReader<'_> {
    pub fn dimensions(&self, channel: ImageChannel) -> FrameDimensions {
        self.frame.dimensions(channel)
    }

    /// Run `sink` over a channel's bytes without copying them out.
    pub fn read_image<R>(
        &self,
        channel: ImageChannel,
        sink: impl FnOnce(&[u8], FrameDimensions) -> R,
    ) -> R {
        let state = self.frame.lock();
        sink(&state.images[channel.index()], self.frame.dimensions(channel))
    }

    /// Copy of a channel's bytes.
    pub fn frame_buffer(&self, channel: ImageChannel) -> Vec<u8> {
        self.read_image(channel, |bytes, _| bytes.to_vec())
    }

    /// Number of successful writes to a channel since allocation.
    pub fn channel_version(&self, channel: ImageChannel) -> u64 {
        self.frame.lock().versions[channel.index()]
    }

    pub fn end(self) {}
}

impl Drop for FrameReader<'_> {
    fn drop(&mut self) {
        self.frame.finish(FrameStatus::Reading);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn small_frame() -> FrameBuffer {
        FrameBuffer::new(
            FrameDimensions::new(4, 2, 4),
            FrameDimensions::new(4, 2, 2),
            FrameDimensions::new(4, 2, 16),
        )
    }

    #[test]
    fn test_starts_zeroed_and_idle() {
        let frame = small_frame();
        assert!(!frame.is_busy());
        let reader = frame.try_begin_reading().unwrap();
        assert_eq!(reader.frame_buffer(ImageChannel::Color), vec![0; 32]);
        assert_eq!(reader.channel_version(ImageChannel::Depth), 0);
    }

    #[test]
    fn test_phases_are_exclusive() {
        let frame = small_frame();
        let writer = frame.try_begin_writing().unwrap();
        assert!(frame.try_begin_writing().is_none());
        assert!(frame.try_begin_reading().is_none());
        drop(writer);

        let reader = frame.try_begin_reading().unwrap();
        assert!(frame.try_begin_reading().is_none());
        assert!(frame.try_begin_writing().is_none());
        reader.end();

        assert!(frame.try_begin_writing().is_some());
    }

    #[test]
    fn test_write_then_read() {
        let frame = small_frame();
        let mut writer = frame.try_begin_writing().unwrap();
        assert!(writer.write_image(ImageChannel::Depth, &[7; 16]));
        writer.end();

        let reader = frame.try_begin_reading().unwrap();
        assert_eq!(reader.frame_buffer(ImageChannel::Depth), vec![7; 16]);
        assert_eq!(reader.channel_version(ImageChannel::Depth), 1);
        assert_eq!(reader.channel_version(ImageChannel::Color), 0);
        let sum: u32 = reader.read_image(ImageChannel::Depth, |bytes, dims| {
            assert_eq!(dims.stride(), 8);
            bytes.iter().map(|&b| b as u32).sum()
        });
        assert_eq!(sum, 7 * 16);
    }

    #[test]
    fn test_size_mismatch_is_dropped() {
        let frame = small_frame();
        let mut writer = frame.try_begin_writing().unwrap();
        assert!(!writer.write_image(ImageChannel::Color, &[1; 31]));
        assert!(!writer.write_image(ImageChannel::Color, &[1; 33]));
        writer.end();

        let reader = frame.try_begin_reading().unwrap();
        assert_eq!(reader.frame_buffer(ImageChannel::Color), vec![0; 32]);
        assert_eq!(reader.channel_version(ImageChannel::Color), 0);
    }

    #[test]
    fn test_no_torn_reads_under_contention() {
        let frame = Arc::new(FrameBuffer::new(
            FrameDimensions::new(64, 64, 4),
            FrameDimensions::new(64, 64, 2),
            FrameDimensions::new(64, 64, 16),
        ));
        let done = Arc::new(AtomicBool::new(false));

        let writer_frame = frame.clone();
        let writer_done = done.clone();
        let writer = thread::spawn(move || {
            let mut round = 1u8;
            for _ in 0..2000 {
                if let Some(mut writer) = writer_frame.try_begin_writing() {
                    for channel in ImageChannel::ALL {
                        let len = writer_frame.dimensions(channel).byte_len();
                        assert!(writer.write_image(channel, &vec![round; len]));
                    }
                    round = round.wrapping_add(1).max(1);
                }
                thread::yield_now();
            }
            writer_done.store(true, Ordering::SeqCst);
        });

        let mut reads = 0;
        loop {
            let finished = done.load(Ordering::SeqCst);
            let Some(reader) = frame.try_begin_reading() else {
                thread::yield_now();
                continue;
            };
            let color = reader.frame_buffer(ImageChannel::Color);
            let depth = reader.frame_buffer(ImageChannel::Depth);
            let cloud = reader.frame_buffer(ImageChannel::PointCloud);
            let first = color[0];
            assert!(color.iter().all(|&b| b == first));
            assert!(depth.iter().all(|&b| b == first));
            assert!(cloud.iter().all(|&b| b == first));
            reads += 1;
            drop(reader);
            if finished {
                break;
            }
        }
        writer.join().unwrap();
        assert!(reads > 0);
    }
}
