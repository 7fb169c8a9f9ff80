//! Capture devices.
//!
//! A `CaptureBackend` knows how to open a device; the opened `CaptureDevice` yields frames
//! on demand. Dropping the device releases it, so a device handle is released exactly once.
//!
//! Supported device specs:
//! - `stub://<name>`: synthetic camera (static scene, periodic bright square)
//! - a directory: image sequence (sorted JPEG/PNG files), exhausted after the last file
//! - `/dev/videoN` or a bare camera index (feature: ingest-v4l2)

use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::frame::Frame;

/// An opened capture device.
pub trait CaptureDevice: Send {
    /// Read the next frame. Any error means the device is no longer usable.
    fn read(&mut self) -> Result<Frame>;
}

/// Opens capture devices. Called again after every device failure.
pub trait CaptureBackend: Send + Sync {
    /// Human-readable device description for logs.
    fn describe(&self) -> String;

    fn open(&self) -> Result<Box<dyn CaptureDevice>>;

    /// The same backend aimed at another device spec, if it can be re-targeted.
    fn with_device(&self, _device: &str) -> Option<Arc<dyn CaptureBackend>> {
        None
    }
}

/// V4L2 node for a numeric camera index.
pub fn video_device(index: u32) -> String {
    format!("/dev/video{}", index)
}

/// Configuration for a capture device.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    /// Device spec (`stub://...`, directory path, `/dev/videoN` or camera index).
    pub device: String,
    /// Target frame rate. Synthetic devices pace themselves to this rate.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

impl DeviceConfig {
    pub fn from_camera_index(index: u32) -> Self {
        Self {
            device: video_device(index),
            ..Self::default()
        }
    }

    pub fn with_device(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Self::default()
        }
    }
}

impl CaptureBackend for DeviceConfig {
    fn describe(&self) -> String {
        self.device.clone()
    }

    fn open(&self) -> Result<Box<dyn CaptureDevice>> {
        open_device(self)
    }

    fn with_device(&self, device: &str) -> Option<Arc<dyn CaptureBackend>> {
        Some(Arc::new(DeviceConfig {
            device: device.to_string(),
            ..self.clone()
        }))
    }
}

/// Open the device named by `config.device`.
pub fn open_device(config: &DeviceConfig) -> Result<Box<dyn CaptureDevice>> {
    let spec = config.device.trim();
    if spec.is_empty() {
        bail!("capture device spec is empty");
    }
    if spec.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::new(config.clone())));
    }
    if is_v4l2_spec(spec) {
        #[cfg(feature = "ingest-v4l2")]
        {
            let mut config = config.clone();
            if spec.chars().all(|c| c.is_ascii_digit()) {
                config.device = format!("/dev/video{}", spec);
            }
            return Ok(Box::new(super::v4l2::V4l2Camera::open(config)?));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            bail!("camera device {} requires the ingest-v4l2 feature", spec)
        }
    }
    if spec.contains("://") {
        bail!("unsupported capture device scheme: {}", spec);
    }
    let path = Path::new(spec);
    if path.is_dir() {
        return Ok(Box::new(ImageSequence::open(path)?));
    }
    Err(anyhow!("capture device {} does not exist", spec))
}

fn is_v4l2_spec(spec: &str) -> bool {
    spec.starts_with("/dev/video") || spec.chars().all(|c| c.is_ascii_digit())
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://)
// ----------------------------------------------------------------------------

/// Frames per synthetic scene phase.
const SYNTHETIC_PHASE_FRAMES: u64 = 30;
/// Background shade of the synthetic scene.
const SYNTHETIC_BACKGROUND: [u8; 3] = [64, 64, 64];

/// Synthetic camera for demos and tests.
///
/// Mostly a static scene. Every fourth phase a bright square drifts across the frame,
/// which is enough to exercise the whole motion pipeline without hardware.
pub struct SyntheticCamera {
    config: DeviceConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(config: DeviceConfig) -> Self {
        log::info!("SyntheticCamera: opened {}", config.device);
        Self {
            config,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn frame_interval(&self) -> Duration {
        if self.config.target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(1000 / self.config.target_fps as u64)
        }
    }

    fn render(&self) -> Result<Frame> {
        let mut frame = Frame::filled(self.config.width, self.config.height, SYNTHETIC_BACKGROUND);
        let phase = self.frame_count / SYNTHETIC_PHASE_FRAMES;
        if phase % 4 == 3 {
            let side = (self.config.width.min(self.config.height) / 6).max(1);
            let step = self.frame_count % SYNTHETIC_PHASE_FRAMES;
            let travel = self.config.width.saturating_sub(side) as u64;
            let x = (travel * step / SYNTHETIC_PHASE_FRAMES) as u32;
            let y = self.config.height.saturating_sub(side) / 2;
            frame.fill_rect(x, y, side, side, [240, 240, 240]);
        }
        Ok(frame)
    }
}

impl CaptureDevice for SyntheticCamera {
    fn read(&mut self) -> Result<Frame> {
        let interval = self.frame_interval();
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
        let frame = self.render()?;
        self.frame_count += 1;
        Ok(frame)
    }
}

// ----------------------------------------------------------------------------
// Image sequence (directory replay)
// ----------------------------------------------------------------------------

/// Replays the images of a directory in file-name order.
pub struct ImageSequence {
    dir: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("read image directory {}", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                files.push(path);
            }
        }
        files.sort();
        log::info!(
            "ImageSequence: {} images in {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            position: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.files.len() - self.position
    }
}

impl CaptureDevice for ImageSequence {
    fn read(&mut self) -> Result<Frame> {
        let path = self
            .files
            .get(self.position)
            .ok_or_else(|| anyhow!("image sequence {} exhausted", self.dir.display()))?;
        self.position += 1;
        let image = image::open(path)
            .with_context(|| format!("decode {}", path.display()))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        Frame::new(image.into_raw(), width, height)
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            matches!(
                ext.to_ascii_lowercase().as_str(),
                "jpg" | "jpeg" | "png"
            )
        })
        .unwrap_or(false)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> DeviceConfig {
        DeviceConfig {
            device: "stub://test".to_string(),
            target_fps: 0,
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn synthetic_camera_produces_frames() -> Result<()> {
        let mut device = open_device(&stub_config())?;
        let frame = device.read()?;
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        Ok(())
    }

    #[test]
    fn retargeting_keeps_geometry() -> Result<()> {
        let moved = stub_config()
            .with_device("stub://other")
            .expect("device configs can be retargeted");
        assert_eq!(moved.describe(), "stub://other");
        let frame = moved.open()?.read()?;
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(video_device(2), "/dev/video2");
        Ok(())
    }

    #[test]
    fn synthetic_camera_shows_square_in_fourth_phase() -> Result<()> {
        let mut camera = SyntheticCamera::new(stub_config());
        let quiet = camera.read()?;
        for _ in 1..(SYNTHETIC_PHASE_FRAMES * 3) {
            camera.read()?;
        }
        let busy = camera.read()?;
        assert!(quiet.pixels().iter().all(|&p| p == 64));
        assert!(busy.pixels().iter().any(|&p| p == 240));
        Ok(())
    }

    #[test]
    fn image_sequence_reads_in_order_then_exhausts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for (name, shade) in [("b.png", 20u8), ("a.png", 10u8)] {
            let img = image::RgbImage::from_pixel(4, 4, image::Rgb([shade, shade, shade]));
            img.save(dir.path().join(name))?;
        }
        std::fs::write(dir.path().join("notes.txt"), b"ignored")?;

        let mut seq = ImageSequence::open(dir.path())?;
        assert_eq!(seq.remaining(), 2);
        assert_eq!(seq.read()?.pixels()[0], 10);
        assert_eq!(seq.read()?.pixels()[0], 20);
        assert!(seq.read().is_err());
        Ok(())
    }

    #[test]
    fn unknown_specs_are_rejected() {
        assert!(open_device(&DeviceConfig::with_device("")).is_err());
        assert!(open_device(&DeviceConfig::with_device("rtsp://camera")).is_err());
        assert!(open_device(&DeviceConfig::with_device("/definitely/not/here")).is_err());
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn camera_index_requires_v4l2_feature() {
        let err = open_device(&DeviceConfig::from_camera_index(0)).err().unwrap();
        assert!(err.to_string().contains("ingest-v4l2"));
    }
}
