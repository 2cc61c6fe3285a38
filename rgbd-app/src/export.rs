//! Snapshot files and PNG previews.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma, Rgba};
use rgbd_data::FrameSnapshot;
use rgbd_data::image::read_u16;
use tracing::info;

use crate::error::AppError;

/// Paths written for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFiles {
    pub snapshot: PathBuf,
    pub color_png: PathBuf,
    pub depth_png: PathBuf,
}

/// Write `<stem>.rgbd`, `<stem>_color.png` and `<stem>_depth.png` into `dir`.
pub fn export_snapshot(
    dir: &Path,
    stem: &str,
    snapshot: &FrameSnapshot,
) -> Result<ExportedFiles, AppError> {
    std::fs::create_dir_all(dir)?;
    let files = ExportedFiles {
        snapshot: dir.join(format!("{stem}.rgbd")),
        color_png: dir.join(format!("{stem}_color.png")),
        depth_png: dir.join(format!("{stem}_depth.png")),
    };

    let mut writer = BufWriter::new(File::create(&files.snapshot)?);
    snapshot.write_to(&mut writer)?;
    writer.flush()?;
    color_image(snapshot).save(&files.color_png)?;
    depth_image(snapshot).save(&files.depth_png)?;

    info!(
        path = %files.snapshot.display(),
        width = snapshot.width,
        height = snapshot.height,
        "Saved snapshot"
    );
    Ok(files)
}

/// Registered color, BGRA swizzled to RGBA.
pub fn color_image(snapshot: &FrameSnapshot) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
    ImageBuffer::from_fn(snapshot.width, snapshot.height, |x, y| {
        let i = (y as usize * snapshot.width as usize + x as usize) * 4;
        let bgra = &snapshot.color[i..i + 4];
        Rgba([bgra[2], bgra[1], bgra[0], bgra[3]])
    })
}

/// Raw 16-bit depth in millimetres.
pub fn depth_image(snapshot: &FrameSnapshot) -> ImageBuffer<Luma<u16>, Vec<u16>> {
    ImageBuffer::from_fn(snapshot.width, snapshot.height, |x, y| {
        Luma([read_u16(
            &snapshot.depth,
            y as usize * snapshot.width as usize + x as usize,
        )])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> FrameSnapshot {
        let color = vec![10, 20, 30, 255, 1, 2, 3, 4];
        let depth = vec![0xe8, 0x03, 0, 0];
        FrameSnapshot::new(2, 1, color, depth, vec![0; 32]).unwrap()
    }

    #[test]
    fn test_color_swizzle() {
        let image = color_image(&snapshot());
        assert_eq!(image.get_pixel(0, 0), &Rgba([30, 20, 10, 255]));
        assert_eq!(image.get_pixel(1, 0), &Rgba([3, 2, 1, 4]));
    }

    #[test]
    fn test_depth_values() {
        let image = depth_image(&snapshot());
        assert_eq!(image.get_pixel(0, 0), &Luma([1000]));
        assert_eq!(image.get_pixel(1, 0), &Luma([0]));
    }

    #[test]
    fn test_export_writes_files() {
        let dir = std::env::temp_dir().join(format!("rgbd-export-{}", std::process::id()));
        let files = export_snapshot(&dir, "device0", &snapshot()).unwrap();

        let reloaded = FrameSnapshot::read_from(File::open(&files.snapshot).unwrap()).unwrap();
        assert_eq!(reloaded, snapshot());
        let depth = image::open(&files.depth_png).unwrap().into_luma16();
        assert_eq!(depth.get_pixel(0, 0), &Luma([1000]));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
