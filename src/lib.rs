//! Motion Watch
//!
//! Watches a live video feed, detects meaningful motion while suppressing noise and
//! lighting drift, and emits a rate-limited stream of motion events to downstream
//! consumers.
//!
//! # Architecture
//!
//! The pipeline has three stages, each on its own side of a narrow seam:
//!
//! 1. **Acquisition** (`ingest`): a `FrameSource` owns the capture device and runs on a
//!    dedicated thread, surviving device failures with a bounded retry. It publishes the
//!    latest frame into a single-slot `LatestFrame` cell that any number of readers copy.
//! 2. **Evaluation** (`detect`): a `MotionEvaluator` pulls frames through a `FrameFeed`,
//!    keeps a decaying background model and turns the stream into sparse, debounced,
//!    cooldown-limited `MotionEvent`s.
//! 3. **Distribution** (`dispatch`): an `EventDistributor` persists, classifies, notifies
//!    and records each event, isolating every consumer from the others' failures.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and the `LatestFrame` hand-off cell
//! - `ingest`: capture devices, `FrameSource`, frame feeds
//! - `detect`: mask operations, background model, evaluator, event stream
//! - `storage`: motion frame naming and JPEG persistence
//! - `dispatch`: distributor, notifiers, event history
//! - `api`: dashboard HTTP API
//! - `config`: daemon configuration and hot-swappable live settings

pub mod api;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod frame;
pub mod ingest;
pub mod storage;

pub use config::{DetectorConfig, LiveSettings, SharedSettings, WatchConfig};
pub use detect::{EventPayload, MotionEvaluator, MotionEvent, MotionEvents};
pub use dispatch::{
    Broadcaster, Classifier, Detection, DispatchReport, EventDistributor, EventHistory,
    EventSummary, Notifier,
};
pub use frame::{Frame, LatestFrame};
pub use ingest::{
    CaptureBackend, CaptureDevice, DeviceConfig, FeedBuilder, FrameFeed, FrameSource, NextFrame,
};
pub use storage::{FrameStore, JpegFrameStore};

/// Totals from one run of the event pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub events: u64,
    pub dispatched: u64,
    pub dropped: u64,
}

/// Drain `events` into `distributor` until the feed is exhausted.
///
/// Only the feed ending stops the loop; dropped events are counted and skipped.
pub fn run_pipeline<F: FrameFeed>(
    events: MotionEvents<F>,
    distributor: &EventDistributor,
) -> PipelineStats {
    let mut stats = PipelineStats::default();
    for event in events {
        stats.events += 1;
        match distributor.dispatch(&event) {
            Some(report) => {
                stats.dispatched += 1;
                log::info!(
                    "pipeline: event {} -> {} (notified: {:?}, failed: {:?})",
                    event.iso_timestamp(),
                    report.frame_path.display(),
                    report.notified,
                    report.failed
                );
            }
            None => stats.dropped += 1,
        }
    }
    stats
}
