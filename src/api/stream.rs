//! Live MJPEG stream (`multipart/x-mixed-replace`).
//!
//! Each viewer gets its own thread so the accept loop keeps serving other routes. A part
//! is written whenever the source publishes a new frame.

use anyhow::{anyhow, Result};
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::FrameSource;
use crate::storage::{encode_jpeg, DEFAULT_JPEG_QUALITY};

/// Concurrent viewers allowed at once.
pub const MAX_STREAMS: usize = 4;

const BOUNDARY: &str = "frame";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Viewer slots shared between the accept loop and stream threads.
#[derive(Clone, Debug, Default)]
pub(crate) struct StreamSlots {
    active: Arc<AtomicUsize>,
}

impl StreamSlots {
    fn claim(&self) -> Option<SlotGuard> {
        let claimed = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < MAX_STREAMS).then_some(n + 1)
            })
            .is_ok();
        claimed.then(|| SlotGuard {
            active: self.active.clone(),
        })
    }
}

struct SlotGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Start streaming `source` to `stream` on a new thread. Returns `Ok(false)` when every
/// slot is taken; the caller answers the request itself in that case.
pub(crate) fn spawn_stream(
    stream: TcpStream,
    source: Arc<FrameSource>,
    slots: &StreamSlots,
    shutdown: Arc<AtomicBool>,
) -> Result<bool> {
    let Some(slot) = slots.claim() else {
        return Ok(false);
    };
    let peer = stream.peer_addr()?;
    std::thread::Builder::new()
        .name("dashboard-stream".to_string())
        .spawn(move || {
            let _slot = slot;
            log::info!("dashboard stream: viewer {} connected", peer);
            match pump_frames(stream, &source, &shutdown) {
                Ok(()) => log::info!("dashboard stream: viewer {} finished", peer),
                Err(err) => log::info!("dashboard stream: viewer {} left: {}", peer, err),
            }
        })
        .map_err(|e| anyhow!("failed to spawn stream thread: {}", e))?;
    Ok(true)
}

fn pump_frames(mut stream: TcpStream, source: &FrameSource, shutdown: &AtomicBool) -> Result<()> {
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        BOUNDARY
    );
    stream.write_all(header.as_bytes())?;

    let mut sent = 0;
    while !shutdown.load(Ordering::SeqCst) {
        if source.latest_sequence() == sent {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }
        let Some(frame) = source.get_latest() else {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        };
        sent = frame.sequence;
        let jpeg = encode_jpeg(&frame, DEFAULT_JPEG_QUALITY)?;
        write_part(&mut stream, &jpeg)?;
    }
    Ok(())
}

fn write_part(stream: &mut TcpStream, jpeg: &[u8]) -> Result<()> {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(jpeg)?;
    stream.write_all(b"\r\n")?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_bounded_and_released() {
        let slots = StreamSlots::default();
        let held: Vec<SlotGuard> = (0..MAX_STREAMS).filter_map(|_| slots.claim()).collect();
        assert_eq!(held.len(), MAX_STREAMS);
        assert!(slots.claim().is_none());
        drop(held);
        assert_eq!(slots.active.load(Ordering::SeqCst), 0);
        assert!(slots.claim().is_some());
    }
}
