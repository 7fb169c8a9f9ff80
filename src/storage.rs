//! Motion frame persistence.
//!
//! Motion frames are written as `<frame_dir>/motion_<timestamp>.jpg`, where the timestamp
//! is the ISO-8601 capture time with `:` replaced by `-`. The `motion_` prefix is what
//! downstream consumers use to tell motion frames from any other file in the directory.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::path::{Path, PathBuf};

use crate::frame::{iso_timestamp, Frame};

pub const MOTION_FRAME_PREFIX: &str = "motion_";
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Writes frames to storage. Failures are returned, never swallowed.
pub trait FrameStore: Send {
    fn write(&self, frame: &Frame, path: &Path) -> Result<()>;
}

/// JPEG files on the local filesystem.
#[derive(Clone, Debug)]
pub struct JpegFrameStore {
    quality: u8,
}

impl JpegFrameStore {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for JpegFrameStore {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameStore for JpegFrameStore {
    fn write(&self, frame: &Frame, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create frame directory {}", parent.display()))?;
        }
        let jpeg = encode_jpeg(frame, self.quality)?;
        std::fs::write(path, jpeg).with_context(|| format!("write frame {}", path.display()))?;
        Ok(())
    }
}

/// Encode a frame as JPEG in memory.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .write_image(
            frame.pixels(),
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| anyhow!("jpeg encode failed: {}", e))?;
    Ok(out)
}

/// `motion_<timestamp>.jpg` for a capture time.
pub fn motion_frame_name(captured_at: &DateTime<Local>) -> String {
    format!(
        "{}{}.jpg",
        MOTION_FRAME_PREFIX,
        iso_timestamp(captured_at).replace(':', "-")
    )
}

pub fn motion_frame_path(frame_dir: &Path, captured_at: &DateTime<Local>) -> PathBuf {
    frame_dir.join(motion_frame_name(captured_at))
}

pub fn is_motion_frame_name(name: &str) -> bool {
    name.starts_with(MOTION_FRAME_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn motion_frame_names_have_no_colons() {
        let at = Local.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let name = motion_frame_name(&at);
        assert_eq!(name, "motion_2024-05-06T07-08-09.000000.jpg");
        assert!(is_motion_frame_name(&name));
        assert!(!is_motion_frame_name("snapshot_1.jpg"));
    }

    #[test]
    fn jpeg_store_creates_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested/frames/motion_x.jpg");
        let frame = Frame::filled(8, 8, [200, 10, 10]);
        JpegFrameStore::default().write(&frame, &path)?;

        let decoded = image::open(&path)?.to_rgb8();
        assert_eq!(decoded.dimensions(), (8, 8));
        Ok(())
    }

    #[test]
    fn jpeg_store_reports_write_failures() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory")?;
        let frame = Frame::filled(2, 2, [0, 0, 0]);
        assert!(JpegFrameStore::default()
            .write(&frame, &blocker.join("motion_x.jpg"))
            .is_err());
        Ok(())
    }
}
