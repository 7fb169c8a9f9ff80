//! Frame feeds: the one capability the motion evaluator needs from a frame source.

use anyhow::{bail, Result};
use std::sync::Arc;

use super::device::{open_device, CaptureDevice, DeviceConfig};
use super::producer::FrameSource;
use crate::frame::Frame;

/// Outcome of asking a feed for its next frame.
#[derive(Debug)]
pub enum NextFrame {
    Ready(Frame),
    /// No new frame yet; ask again later.
    Pending,
    /// The feed will never produce another frame.
    Exhausted,
}

/// Pull-based frame feed.
pub trait FrameFeed: Send {
    fn describe(&self) -> String;

    fn next_frame(&mut self) -> Result<NextFrame>;
}

impl<F: FrameFeed + ?Sized> FrameFeed for Box<F> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn next_frame(&mut self) -> Result<NextFrame> {
        (**self).next_frame()
    }
}

/// Non-blocking poll of a running `FrameSource`.
///
/// Each captured frame is delivered at most once. Exhausted once the source stops.
pub struct ProducerFeed {
    source: Arc<FrameSource>,
    last_sequence: u64,
}

impl ProducerFeed {
    pub fn new(source: Arc<FrameSource>) -> Self {
        Self {
            source,
            last_sequence: 0,
        }
    }
}

impl FrameFeed for ProducerFeed {
    fn describe(&self) -> String {
        format!("producer:{}", self.source.stats().device)
    }

    fn next_frame(&mut self) -> Result<NextFrame> {
        if !self.source.is_running() {
            return Ok(NextFrame::Exhausted);
        }
        if self.source.latest_sequence() == self.last_sequence {
            return Ok(NextFrame::Pending);
        }
        match self.source.get_latest() {
            Some(frame) if frame.sequence != self.last_sequence => {
                self.last_sequence = frame.sequence;
                Ok(NextFrame::Ready(frame))
            }
            _ => Ok(NextFrame::Pending),
        }
    }
}

/// Blocking reads from a capture device. The first read failure ends the feed.
pub struct SequentialFeed {
    name: String,
    device: Option<Box<dyn CaptureDevice>>,
}

impl SequentialFeed {
    pub fn new(name: impl Into<String>, device: Box<dyn CaptureDevice>) -> Self {
        Self {
            name: name.into(),
            device: Some(device),
        }
    }
}

impl FrameFeed for SequentialFeed {
    fn describe(&self) -> String {
        format!("sequential:{}", self.name)
    }

    fn next_frame(&mut self) -> Result<NextFrame> {
        let Some(device) = self.device.as_mut() else {
            return Ok(NextFrame::Exhausted);
        };
        match device.read() {
            Ok(frame) => Ok(NextFrame::Ready(frame)),
            Err(err) => {
                log::info!("SequentialFeed: {} ended: {:#}", self.name, err);
                // Release the device as soon as the stream ends.
                self.device = None;
                Ok(NextFrame::Exhausted)
            }
        }
    }
}

/// Selects the feed the evaluator runs on.
///
/// A running producer takes precedence over a device; supplying neither is a
/// configuration error.
#[derive(Default)]
pub struct FeedBuilder {
    producer: Option<Arc<FrameSource>>,
    device: Option<DeviceConfig>,
}

impl FeedBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn producer(mut self, source: Arc<FrameSource>) -> Self {
        self.producer = Some(source);
        self
    }

    pub fn device(mut self, config: DeviceConfig) -> Self {
        self.device = Some(config);
        self
    }

    pub fn build(self) -> Result<Box<dyn FrameFeed>> {
        if let Some(source) = self.producer {
            return Ok(Box::new(ProducerFeed::new(source)));
        }
        if let Some(config) = self.device {
            let device = open_device(&config)?;
            return Ok(Box::new(SequentialFeed::new(config.device, device)));
        }
        bail!("no frame source configured: supply a frame producer or a capture device")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::producer::ProducerConfig;
    use std::time::{Duration, Instant};

    #[test]
    fn builder_without_source_fails_fast() {
        let err = FeedBuilder::new().build().err().unwrap();
        assert!(err.to_string().contains("no frame source configured"));
    }

    #[test]
    fn builder_prefers_producer() -> Result<()> {
        let source = Arc::new(FrameSource::new(
            DeviceConfig::with_device("stub://producer"),
            ProducerConfig::default(),
        ));
        let feed = FeedBuilder::new()
            .device(DeviceConfig::with_device("stub://device"))
            .producer(source)
            .build()?;
        assert!(feed.describe().starts_with("producer:"));
        Ok(())
    }

    #[test]
    fn sequential_feed_exhausts_on_read_failure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        image::RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3])).save(dir.path().join("0.png"))?;
        let mut feed = FeedBuilder::new()
            .device(DeviceConfig::with_device(dir.path().to_string_lossy()))
            .build()?;
        assert!(matches!(feed.next_frame()?, NextFrame::Ready(_)));
        assert!(matches!(feed.next_frame()?, NextFrame::Exhausted));
        assert!(matches!(feed.next_frame()?, NextFrame::Exhausted));
        Ok(())
    }

    #[test]
    fn producer_feed_delivers_each_frame_once() -> Result<()> {
        let source = Arc::new(FrameSource::new(
            DeviceConfig {
                device: "stub://feed".to_string(),
                target_fps: 20,
                width: 8,
                height: 8,
            },
            ProducerConfig::default(),
        ));
        let mut feed = ProducerFeed::new(source.clone());
        assert!(matches!(feed.next_frame()?, NextFrame::Exhausted));

        source.start()?;
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut sequences = Vec::new();
        while sequences.len() < 3 && Instant::now() < deadline {
            match feed.next_frame()? {
                NextFrame::Ready(frame) => sequences.push(frame.sequence),
                NextFrame::Pending => std::thread::sleep(Duration::from_millis(5)),
                NextFrame::Exhausted => break,
            }
        }
        source.stop();

        assert_eq!(sequences.len(), 3);
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        assert!(matches!(feed.next_frame()?, NextFrame::Exhausted));
        Ok(())
    }
}
