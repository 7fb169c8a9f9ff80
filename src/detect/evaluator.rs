use anyhow::Result;
use image::GrayImage;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::background::BackgroundModel;
use super::events::{EventPayload, MotionEvent};
use super::mask::{difference_mask, grow, luma, regions, smooth};
use crate::config::{DetectorConfig, SharedSettings};
use crate::frame::Frame;
use crate::storage::{motion_frame_path, FrameStore};

/// Per-frame classification once the background is seeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activity {
    /// The frame seeded (or re-seeded) the background.
    Seeded,
    Motion,
    Quiet,
}

/// Turns a frame stream into a sparse, debounced, cooldown-limited event stream.
///
/// The evaluator is `UNSEEDED` until its first frame, then `ARMED`. Each armed frame is
/// classified as motion or quiet against a decaying background; `min_motion_frames`
/// consecutive motion frames arm the emission gate, and at most one event is emitted per
/// cooldown window. Configuration is snapshotted at the start of every cycle.
pub struct MotionEvaluator {
    settings: SharedSettings,
    frame_dir: PathBuf,
    store: Box<dyn FrameStore>,
    background: BackgroundModel,
    motion_counter: u32,
    last_emitted: Option<Instant>,
    last_activity: Option<Activity>,
}

impl MotionEvaluator {
    pub fn new(
        settings: SharedSettings,
        frame_dir: impl Into<PathBuf>,
        store: Box<dyn FrameStore>,
    ) -> Self {
        Self {
            settings,
            frame_dir: frame_dir.into(),
            store,
            background: BackgroundModel::new(),
            motion_counter: 0,
            last_emitted: None,
            last_activity: None,
        }
    }

    pub fn frame_dir(&self) -> &Path {
        &self.frame_dir
    }

    pub fn motion_counter(&self) -> u32 {
        self.motion_counter
    }

    pub fn is_armed(&self) -> bool {
        self.background.is_seeded()
    }

    pub fn last_activity(&self) -> Option<Activity> {
        self.last_activity
    }

    /// Evaluate one frame against the current monotonic clock.
    pub fn evaluate(&mut self, frame: Frame) -> Result<Option<MotionEvent>> {
        self.evaluate_at(frame, Instant::now())
    }

    /// Evaluate one frame, treating `now` as the current instant for cooldown purposes.
    ///
    /// Returns `Ok(None)` for seed frames, quiet frames, debounced or cooled-down motion,
    /// and for events dropped because the frame could not be persisted.
    pub fn evaluate_at(&mut self, frame: Frame, now: Instant) -> Result<Option<MotionEvent>> {
        let cfg = self.settings.detector();

        let activity = self.classify(&frame, &cfg)?;
        self.last_activity = Some(activity);
        match activity {
            Activity::Seeded => return Ok(None),
            Activity::Quiet => {
                self.motion_counter = 0;
                return Ok(None);
            }
            Activity::Motion => {
                self.motion_counter = self.motion_counter.saturating_add(1);
            }
        }

        if self.motion_counter < cfg.min_motion_frames {
            return Ok(None);
        }
        if let Some(last) = self.last_emitted {
            if now.saturating_duration_since(last) < cfg.cooldown() {
                return Ok(None);
            }
        }

        let timestamp = frame.captured_at;
        let payload = if cfg.persist_mode {
            let path = motion_frame_path(&self.frame_dir, &timestamp);
            if let Err(err) = self.store.write(&frame, &path) {
                log::error!(
                    "MotionEvaluator: failed to save {}: {:#}; dropping event",
                    path.display(),
                    err
                );
                return Ok(None);
            }
            EventPayload::Saved(path)
        } else {
            EventPayload::Frame(frame)
        };

        self.last_emitted = Some(now);
        log::info!(
            "MotionEvaluator: motion event at {} after {} frame(s)",
            crate::frame::iso_timestamp(&timestamp),
            self.motion_counter
        );
        Ok(Some(MotionEvent { timestamp, payload }))
    }

    fn classify(&mut self, frame: &Frame, cfg: &DetectorConfig) -> Result<Activity> {
        let blurred = smooth(&luma(frame)?, cfg.blur_kernel);

        if !self.background.accepts(&blurred) {
            if self.background.is_seeded() {
                log::warn!(
                    "MotionEvaluator: frame geometry changed to {}x{}; re-seeding background",
                    frame.width,
                    frame.height
                );
                self.motion_counter = 0;
            }
            self.background.seed(&blurred);
            return Ok(Activity::Seeded);
        }

        self.background.accumulate(&blurred, cfg.background_weight);
        if has_motion(&blurred, &self.background, cfg)? {
            Ok(Activity::Motion)
        } else {
            Ok(Activity::Quiet)
        }
    }
}

fn has_motion(current: &GrayImage, background: &BackgroundModel, cfg: &DetectorConfig) -> Result<bool> {
    let Some(mean) = background.mean() else {
        return Ok(false);
    };
    let mask = grow(
        &difference_mask(current, mean, cfg.sensitivity)?,
        cfg.dilate_iterations,
    );
    Ok(regions(&mask)
        .iter()
        .any(|region| region.area >= cfg.min_area))
}
