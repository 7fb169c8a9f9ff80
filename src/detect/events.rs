use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::evaluator::MotionEvaluator;
use crate::frame::{iso_timestamp, Frame};
use crate::ingest::{FrameFeed, NextFrame};

/// Idle sleep between polls when the feed has no new frame.
pub const DEFAULT_IDLE: Duration = Duration::from_millis(10);

/// What a motion event carries: exactly one of a saved file or the raw frame.
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    /// Persist mode: the frame was written here before the event was emitted.
    Saved(PathBuf),
    /// In-memory mode: the raw frame, for the distributor to persist.
    Frame(Frame),
}

/// A single emitted motion event. Immutable once created.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionEvent {
    /// Capture time of the frame that triggered the event.
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl MotionEvent {
    pub fn iso_timestamp(&self) -> String {
        iso_timestamp(&self.timestamp)
    }

    pub fn frame_path(&self) -> Option<&Path> {
        match &self.payload {
            EventPayload::Saved(path) => Some(path),
            EventPayload::Frame(_) => None,
        }
    }

    pub fn frame(&self) -> Option<&Frame> {
        match &self.payload {
            EventPayload::Saved(_) => None,
            EventPayload::Frame(frame) => Some(frame),
        }
    }
}

/// Pull-based stream of motion events over a frame feed.
///
/// Ends when the feed is exhausted. Feed and evaluation errors are logged and skipped.
pub struct MotionEvents<F: FrameFeed> {
    feed: F,
    evaluator: MotionEvaluator,
    idle: Duration,
    frames_seen: u64,
}

impl<F: FrameFeed> MotionEvents<F> {
    pub fn new(feed: F, evaluator: MotionEvaluator) -> Self {
        Self {
            feed,
            evaluator,
            idle: DEFAULT_IDLE,
            frames_seen: 0,
        }
    }

    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    pub fn evaluator(&self) -> &MotionEvaluator {
        &self.evaluator
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn into_parts(self) -> (F, MotionEvaluator) {
        (self.feed, self.evaluator)
    }
}

impl<F: FrameFeed> Iterator for MotionEvents<F> {
    type Item = MotionEvent;

    fn next(&mut self) -> Option<MotionEvent> {
        loop {
            let frame = match self.feed.next_frame() {
                Ok(NextFrame::Ready(frame)) => frame,
                Ok(NextFrame::Pending) => {
                    std::thread::sleep(self.idle);
                    continue;
                }
                Ok(NextFrame::Exhausted) => {
                    log::info!(
                        "MotionEvents: feed {} exhausted after {} frame(s)",
                        self.feed.describe(),
                        self.frames_seen
                    );
                    return None;
                }
                Err(err) => {
                    log::warn!("MotionEvents: feed error: {:#}", err);
                    std::thread::sleep(self.idle);
                    continue;
                }
            };
            self.frames_seen += 1;
            match self.evaluator.evaluate(frame) {
                Ok(Some(event)) => return Some(event),
                Ok(None) => {}
                Err(err) => log::warn!("MotionEvents: evaluation failed: {:#}", err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LiveSettings, SharedSettings};
    use crate::storage::FrameStore;
    use anyhow::{anyhow, Result};
    use std::collections::VecDeque;

    struct ScriptedFeed {
        script: VecDeque<Result<NextFrame>>,
    }

    impl FrameFeed for ScriptedFeed {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn next_frame(&mut self) -> Result<NextFrame> {
            self.script
                .pop_front()
                .unwrap_or(Ok(NextFrame::Exhausted))
        }
    }

    struct NullStore;

    impl FrameStore for NullStore {
        fn write(&self, _frame: &Frame, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn pending_and_errors_are_skipped() {
        let mut live = LiveSettings::default();
        live.detector.min_motion_frames = 1;
        live.detector.cooldown_seconds = 0.0;
        live.detector.persist_mode = false;
        live.detector.sensitivity = 10;
        live.detector.min_area = 50;
        let evaluator =
            MotionEvaluator::new(SharedSettings::new(live), "frames", Box::new(NullStore));

        let plain = Frame::filled(40, 40, [10, 10, 10]);
        let mut bright = plain.clone();
        bright.fill_rect(10, 10, 20, 20, [250, 250, 250]);

        let feed = ScriptedFeed {
            script: VecDeque::from(vec![
                Ok(NextFrame::Ready(plain)),
                Ok(NextFrame::Pending),
                Err(anyhow!("transient")),
                Ok(NextFrame::Ready(bright)),
            ]),
        };
        let mut events = MotionEvents::new(feed, evaluator).with_idle(Duration::from_millis(1));
        let event = events.next().expect("motion event");
        assert!(event.frame().is_some());
        assert!(event.frame_path().is_none());
        assert!(events.next().is_none());
        assert_eq!(events.frames_seen(), 2);
    }
}
