//! Captured frames and the single-slot hand-off cell.
//!
//! - `Frame`: packed RGB24 pixels plus capture metadata. Readers always get their own copy.
//! - `LatestFrame`: lock-guarded cell holding at most one frame. The acquisition thread is
//!   the only writer; any number of readers may copy the current frame concurrently.
//!
//! The cell lock is held only across the swap (writer) or the copy (reader). No I/O,
//! encoding or classification ever happens while it is held.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Bytes per pixel of every frame flowing through the pipeline (packed RGB).
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A single captured frame.
///
/// Pixel data is private so the length invariant (`width * height * 3`) always holds.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time.
    pub captured_at: DateTime<Local>,
    /// Publish sequence assigned by `LatestFrame`; 0 for frames never published.
    pub sequence: u64,
}

impl Frame {
    /// Wrap an RGB24 buffer captured now.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::captured(data, width, height, Local::now())
    }

    /// Wrap an RGB24 buffer with an explicit capture time.
    pub fn captured(
        data: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: DateTime<Local>,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at,
            sequence: 0,
        })
    }

    /// Uniformly filled frame. Mostly useful for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixel_count = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixel_count * CHANNELS);
        for _ in 0..pixel_count {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
            captured_at: Local::now(),
            sequence: 0,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Paint an axis-aligned rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, rgb: [u8; 3]) {
        let x_end = x.saturating_add(w).min(self.width) as usize;
        let y_end = y.saturating_add(h).min(self.height) as usize;
        let stride = self.width as usize * CHANNELS;
        for row in (y as usize)..y_end {
            for col in (x as usize)..x_end {
                let offset = row * stride + col * CHANNELS;
                self.data[offset..offset + CHANNELS].copy_from_slice(&rgb);
            }
        }
    }

    /// ISO-8601 capture time with microseconds, local time, no offset.
    pub fn iso_timestamp(&self) -> String {
        iso_timestamp(&self.captured_at)
    }
}

pub fn iso_timestamp(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

// ----------------------------------------------------------------------------
// LatestFrame: single-slot hand-off
// ----------------------------------------------------------------------------

/// Single-slot cell holding the most recently captured frame.
///
/// Owned by exactly one `FrameSource`; never a process-wide singleton.
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Option<Frame>>,
    published: AtomicU64,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame. Stamps the frame with the next publish sequence.
    pub fn publish(&self, mut frame: Frame) {
        let sequence = self.published.fetch_add(1, Ordering::SeqCst) + 1;
        frame.sequence = sequence;
        let previous = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.replace(frame)
        };
        // Old buffer is freed outside the lock.
        drop(previous);
    }

    /// Copy of the current frame, or `None` before the first publish.
    pub fn snapshot(&self) -> Option<Frame> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().cloned()
    }

    /// Sequence of the most recent publish (0 if nothing was published yet).
    pub fn latest_sequence(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        let previous = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.take()
        };
        drop(previous);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn frame_rejects_wrong_length() {
        assert!(Frame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn fill_rect_is_clipped() {
        let mut frame = Frame::filled(4, 4, [0, 0, 0]);
        frame.fill_rect(2, 2, 10, 10, [255, 255, 255]);
        let lit = frame.pixels().iter().filter(|&&p| p == 255).count();
        assert_eq!(lit, 2 * 2 * CHANNELS);
    }

    #[test]
    fn empty_cell_returns_none() {
        let cell = LatestFrame::new();
        assert!(cell.snapshot().is_none());
        assert_eq!(cell.latest_sequence(), 0);
    }

    #[test]
    fn publish_assigns_increasing_sequences() {
        let cell = LatestFrame::new();
        cell.publish(Frame::filled(2, 2, [1, 1, 1]));
        let first = cell.snapshot().unwrap();
        cell.publish(Frame::filled(2, 2, [2, 2, 2]));
        let second = cell.snapshot().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.pixels()[0], 2);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let cell = LatestFrame::new();
        cell.publish(Frame::filled(2, 2, [9, 9, 9]));
        let mut copy = cell.snapshot().unwrap();
        copy.fill_rect(0, 0, 2, 2, [0, 0, 0]);
        assert_eq!(cell.snapshot().unwrap().pixels()[0], 9);
    }

    #[test]
    fn concurrent_readers_never_observe_torn_frames() {
        let cell = Arc::new(LatestFrame::new());
        let writer_cell = cell.clone();
        let writer = std::thread::spawn(move || {
            for value in 0..200u32 {
                let shade = (value % 256) as u8;
                writer_cell.publish(Frame::filled(32, 32, [shade, shade, shade]));
            }
        });

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(frame) = cell.snapshot() {
                            let first = frame.pixels()[0];
                            assert!(frame.pixels().iter().all(|&p| p == first));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(cell.latest_sequence(), 200);
    }
}
