use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::Broadcaster;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Dashboard view of one dispatched event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub timestamp: String,
    pub frame_path: String,
    /// Path the dashboard serves the frame under: `/frames/<basename>`.
    pub image_url: String,
}

impl EventSummary {
    pub fn new(timestamp: impl Into<String>, frame_path: &Path) -> Self {
        let basename = frame_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            timestamp: timestamp.into(),
            frame_path: frame_path.display().to_string(),
            image_url: format!("/frames/{}", basename),
        }
    }
}

/// Bounded, newest-first ring of recent events, shared between the distributor and the
/// dashboard.
#[derive(Clone, Debug)]
pub struct EventHistory {
    inner: Arc<Mutex<VecDeque<EventSummary>>>,
    capacity: usize,
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl EventHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, summary: EventSummary) {
        let mut ring = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        ring.push_front(summary);
        ring.truncate(self.capacity);
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<EventSummary> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Appends each summary as one JSON line.
#[derive(Debug)]
pub struct JsonLinesBroadcaster {
    path: PathBuf,
}

impl JsonLinesBroadcaster {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Broadcaster for JsonLinesBroadcaster {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn broadcast(&self, summary: &EventSummary) -> Result<()> {
        let mut line = serde_json::to_string(summary)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open events log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append to events log {}", self.path.display()))?;
        Ok(())
    }
}
