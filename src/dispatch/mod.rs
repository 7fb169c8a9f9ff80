//! Event distribution: everything that happens to a `MotionEvent` after it is emitted.
//!
//! For each event the distributor resolves a saved frame, optionally classifies it,
//! notifies on a target-label match, records a dashboard summary and broadcasts it.
//! Every consumer is isolated: a failure is logged and the remaining consumers still run.

pub mod history;
pub mod notify;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::SharedSettings;
use crate::detect::{EventPayload, MotionEvent};
use crate::storage::{motion_frame_path, FrameStore};

pub use history::{EventHistory, EventSummary, JsonLinesBroadcaster, DEFAULT_HISTORY_CAPACITY};
pub use notify::{DiscordNotifier, TelegramNotifier};

/// A single classifier hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    /// `[x, y, w, h]` in pixels.
    pub bbox: [f32; 4],
}

/// Labels objects in a saved frame.
pub trait Classifier: Send {
    fn classify(&self, image: &Path) -> Result<Vec<Detection>>;
}

/// Delivers a photo with a caption to some external channel.
pub trait Notifier: Send {
    fn name(&self) -> &str;

    /// False when credentials are missing; unconfigured notifiers are skipped.
    fn is_configured(&self) -> bool;

    fn send(&self, photo: &Path, caption: &str) -> Result<()>;
}

/// Receives every recorded event summary.
pub trait Broadcaster: Send {
    fn name(&self) -> &str;

    fn broadcast(&self, summary: &EventSummary) -> Result<()>;
}

/// Outcome of dispatching one event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DispatchReport {
    pub frame_path: PathBuf,
    /// Target labels the classifier found (lowercase).
    pub matched_labels: Vec<String>,
    /// Whether notifiers were offered the event.
    pub eligible: bool,
    /// Notifiers that delivered successfully.
    pub notified: Vec<String>,
    /// Consumers that failed, as `kind:name`.
    pub failed: Vec<String>,
}

pub struct EventDistributor {
    settings: SharedSettings,
    frame_dir: PathBuf,
    store: Box<dyn FrameStore>,
    history: EventHistory,
    classifier: Option<Box<dyn Classifier>>,
    notifiers: Vec<Box<dyn Notifier>>,
    broadcasters: Vec<Box<dyn Broadcaster>>,
}

impl EventDistributor {
    pub fn new(
        settings: SharedSettings,
        frame_dir: impl Into<PathBuf>,
        store: Box<dyn FrameStore>,
        history: EventHistory,
    ) -> Self {
        Self {
            settings,
            frame_dir: frame_dir.into(),
            store,
            history,
            classifier: None,
            notifiers: Vec::new(),
            broadcasters: Vec::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: Box<dyn Broadcaster>) -> Self {
        self.broadcasters.push(broadcaster);
        self
    }

    pub fn history(&self) -> &EventHistory {
        &self.history
    }

    /// Run every consumer for one event. `None` when the event had to be dropped because
    /// its frame could not be saved.
    pub fn dispatch(&self, event: &MotionEvent) -> Option<DispatchReport> {
        let timestamp = event.iso_timestamp();
        let frame_path = match self.resolve_frame(event) {
            Ok(path) => path,
            Err(err) => {
                log::error!(
                    "EventDistributor: failed to save frame for {}: {:#}; dropping event",
                    timestamp,
                    err
                );
                return None;
            }
        };

        let mut report = DispatchReport {
            frame_path: frame_path.clone(),
            ..DispatchReport::default()
        };

        match &self.classifier {
            Some(classifier) => {
                let targets = self.settings.target_objects();
                match classifier.classify(&frame_path) {
                    Ok(detections) => {
                        report.matched_labels = matching_labels(&detections, &targets);
                    }
                    Err(err) => {
                        log::warn!("EventDistributor: classifier failed: {:#}", err);
                        report.failed.push("classifier".to_string());
                    }
                }
                report.eligible = !report.matched_labels.is_empty();
            }
            None => report.eligible = true,
        }

        if report.eligible {
            let caption = caption(&timestamp, &report.matched_labels);
            for notifier in &self.notifiers {
                if !notifier.is_configured() {
                    log::debug!("EventDistributor: notifier {} not configured", notifier.name());
                    continue;
                }
                match notifier.send(&frame_path, &caption) {
                    Ok(()) => report.notified.push(notifier.name().to_string()),
                    Err(err) => {
                        log::warn!(
                            "EventDistributor: notifier {} failed: {:#}",
                            notifier.name(),
                            err
                        );
                        report.failed.push(format!("notifier:{}", notifier.name()));
                    }
                }
            }
        }

        let summary = EventSummary::new(timestamp, &frame_path);
        self.history.push(summary.clone());
        for broadcaster in &self.broadcasters {
            if let Err(err) = broadcaster.broadcast(&summary) {
                log::warn!(
                    "EventDistributor: broadcaster {} failed: {:#}",
                    broadcaster.name(),
                    err
                );
                report.failed.push(format!("broadcaster:{}", broadcaster.name()));
            }
        }

        Some(report)
    }

    fn resolve_frame(&self, event: &MotionEvent) -> Result<PathBuf> {
        match &event.payload {
            EventPayload::Saved(path) => Ok(path.clone()),
            EventPayload::Frame(frame) => {
                let path = motion_frame_path(&self.frame_dir, &event.timestamp);
                self.store.write(frame, &path)?;
                Ok(path)
            }
        }
    }
}

fn matching_labels(detections: &[Detection], targets: &[String]) -> Vec<String> {
    let mut matched: Vec<String> = Vec::new();
    for detection in detections {
        let label = detection.label.trim().to_lowercase();
        if targets.iter().any(|t| t.eq_ignore_ascii_case(&label)) && !matched.contains(&label) {
            matched.push(label);
        }
    }
    matched
}

fn caption(timestamp: &str, labels: &[String]) -> String {
    if labels.is_empty() {
        format!("Motion detected at {}", timestamp)
    } else {
        format!("Motion detected at {} ({})", timestamp, labels.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use anyhow::anyhow;
    use chrono::Local;

    struct FixedClassifier(Result<Vec<&'static str>, &'static str>);

    impl Classifier for FixedClassifier {
        fn classify(&self, _image: &Path) -> Result<Vec<Detection>> {
            match &self.0 {
                Ok(labels) => Ok(labels
                    .iter()
                    .map(|label| Detection {
                        label: label.to_string(),
                        confidence: 0.9,
                        bbox: [0.0, 0.0, 1.0, 1.0],
                    })
                    .collect()),
                Err(msg) => Err(anyhow!(*msg)),
            }
        }
    }

    struct NoStore;

    impl FrameStore for NoStore {
        fn write(&self, _frame: &Frame, _path: &Path) -> Result<()> {
            Err(anyhow!("read-only"))
        }
    }

    fn saved_event() -> MotionEvent {
        MotionEvent {
            timestamp: Local::now(),
            payload: EventPayload::Saved(PathBuf::from("frames/motion_a.jpg")),
        }
    }

    fn distributor() -> EventDistributor {
        EventDistributor::new(
            SharedSettings::default(),
            "frames",
            Box::new(NoStore),
            EventHistory::default(),
        )
    }

    #[test]
    fn labels_match_case_insensitively() {
        let dist = distributor().with_classifier(Box::new(FixedClassifier(Ok(vec![
            "Cat", "car", "CAT",
        ]))));
        let report = dist.dispatch(&saved_event()).unwrap();
        assert_eq!(report.matched_labels, vec!["cat"]);
        assert!(report.eligible);
    }

    #[test]
    fn classifier_failure_counts_as_no_match() {
        let dist = distributor().with_classifier(Box::new(FixedClassifier(Err("model missing"))));
        let report = dist.dispatch(&saved_event()).unwrap();
        assert!(!report.eligible);
        assert_eq!(report.failed, vec!["classifier"]);
        assert_eq!(dist.history().len(), 1);
    }

    #[test]
    fn no_classifier_means_every_event_is_eligible() {
        let report = distributor().dispatch(&saved_event()).unwrap();
        assert!(report.eligible);
        assert!(report.matched_labels.is_empty());
    }

    #[test]
    fn unsaved_in_memory_frame_drops_event() {
        let dist = distributor();
        let event = MotionEvent {
            timestamp: Local::now(),
            payload: EventPayload::Frame(Frame::filled(4, 4, [1, 2, 3])),
        };
        assert!(dist.dispatch(&event).is_none());
        assert!(dist.history().is_empty());
    }

    #[test]
    fn captions_name_matched_labels() {
        assert_eq!(caption("t", &[]), "Motion detected at t");
        assert_eq!(
            caption("t", &["cat".to_string(), "person".to_string()]),
            "Motion detected at t (cat, person)"
        );
    }
}
