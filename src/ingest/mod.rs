//! Frame ingestion.
//!
//! - `device`: capture devices (synthetic, image sequence, V4L2 behind `ingest-v4l2`)
//! - `producer`: `FrameSource`, the resilient background acquisition loop
//! - `feed`: the `FrameFeed` capability the evaluator pulls frames through
//!
//! Every source produces packed RGB24 `Frame`s. Ingestion never writes frames to disk;
//! persisting motion frames is the evaluator's and distributor's job.

pub mod device;
pub mod feed;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod producer;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use device::{
    open_device, video_device, CaptureBackend, CaptureDevice, DeviceConfig, ImageSequence,
    SyntheticCamera,
};
pub use feed::{FeedBuilder, FrameFeed, NextFrame, ProducerFeed, SequentialFeed};
pub use producer::{FrameSource, ProducerConfig, SourceStats};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;
