//! Background frame acquisition.
//!
//! `FrameSource` owns a capture backend and a dedicated acquisition thread. The thread is
//! the sole writer of the source's `LatestFrame` cell; `get_latest()` hands readers a copy.
//!
//! Device failures never stop acquisition: open and read errors are logged and retried
//! after `retry_delay` for as long as the source is running. Cancellation is cooperative:
//! the running flag is checked at loop boundaries and retry sleeps wake early on `stop()`.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use super::device::CaptureBackend;
use crate::frame::{Frame, LatestFrame};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Timing knobs for a `FrameSource`.
#[derive(Clone, Debug)]
pub struct ProducerConfig {
    /// Delay before reopening the device after an open or read failure.
    pub retry_delay: Duration,
    /// Upper bound on how long `stop()` waits for the acquisition thread.
    pub stop_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Acquisition statistics.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub reconnects: u64,
    pub device: String,
}

#[derive(Default)]
struct Counters {
    frames_captured: AtomicU64,
    reconnects: AtomicU64,
}

/// Running flag with an interruptible sleep. One per acquisition thread, so an abandoned
/// thread can never be revived by a later `start()`.
struct RunSignal {
    running: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl RunSignal {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.wake.notify_all();
    }

    /// Sleep for `delay` or until stopped, whichever comes first.
    fn sleep(&self, delay: Duration) {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .wake
            .wait_timeout_while(guard, delay, |_| self.is_running())
            .unwrap_or_else(PoisonError::into_inner);
    }
}

struct Worker {
    signal: Arc<RunSignal>,
    handle: JoinHandle<()>,
    /// Disconnects when the acquisition thread exits (normally or by panic).
    done: mpsc::Receiver<()>,
}

/// Continuously captures frames on a dedicated thread.
pub struct FrameSource {
    backend: RwLock<Arc<dyn CaptureBackend>>,
    config: ProducerConfig,
    latest: Arc<LatestFrame>,
    counters: Arc<Counters>,
    worker: Mutex<Option<Worker>>,
}

impl FrameSource {
    pub fn new(backend: impl CaptureBackend + 'static, config: ProducerConfig) -> Self {
        Self::from_backend(Arc::new(backend), config)
    }

    pub fn from_backend(backend: Arc<dyn CaptureBackend>, config: ProducerConfig) -> Self {
        Self {
            backend: RwLock::new(backend),
            config,
            latest: Arc::new(LatestFrame::new()),
            counters: Arc::new(Counters::default()),
            worker: Mutex::new(None),
        }
    }

    fn backend(&self) -> Arc<dyn CaptureBackend> {
        self.backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Description of the current capture device.
    pub fn describe(&self) -> String {
        self.backend().describe()
    }

    /// The current backend aimed at `device`, or `None` if it cannot be re-targeted.
    pub fn backend_for_device(&self, device: &str) -> Option<Arc<dyn CaptureBackend>> {
        self.backend().with_device(device)
    }

    /// Swap the capture backend. A running source is stopped (bounded by `stop_timeout`)
    /// and started again on the new backend; the latest-frame cell is kept.
    pub fn replace_backend(&self, backend: Arc<dyn CaptureBackend>) -> Result<()> {
        let was_running = self.is_running();
        self.stop();
        let previous = std::mem::replace(
            &mut *self.backend.write().unwrap_or_else(PoisonError::into_inner),
            backend,
        );
        log::info!(
            "FrameSource: switching from {} to {}",
            previous.describe(),
            self.describe()
        );
        if was_running {
            self.start()?;
        }
        Ok(())
    }

    /// Spawn the acquisition thread. Returns without waiting for a first frame.
    ///
    /// Calling `start()` on a running source only logs a warning.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker
            .as_ref()
            .is_some_and(|worker| worker.signal.is_running())
        {
            log::warn!("FrameSource: already running for {}", self.describe());
            return Ok(());
        }

        let signal = Arc::new(RunSignal::new());
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let backend = self.backend();
        let latest = self.latest.clone();
        let counters = self.counters.clone();
        let thread_signal = signal.clone();
        let retry_delay = self.config.retry_delay;
        let handle = std::thread::Builder::new()
            .name("frame-source".to_string())
            .spawn(move || {
                let _done = done_tx;
                capture_loop(
                    backend.as_ref(),
                    &latest,
                    &counters,
                    &thread_signal,
                    retry_delay,
                );
            })
            .map_err(|e| anyhow!("failed to spawn acquisition thread: {}", e))?;

        *worker = Some(Worker {
            signal,
            handle,
            done: done_rx,
        });
        log::info!("FrameSource: started for {}", self.describe());
        Ok(())
    }

    /// Stop acquisition and wait up to `stop_timeout` for the thread to exit.
    ///
    /// Safe to call repeatedly. A thread that does not exit in time is abandoned, not
    /// killed; it releases its device whenever its current read returns.
    pub fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        worker.signal.stop();
        match worker.done.recv_timeout(self.config.stop_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "FrameSource: acquisition thread for {} did not exit within {:?}; abandoning it",
                    self.describe(),
                    self.config.stop_timeout
                );
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    log::error!("FrameSource: acquisition thread panicked");
                }
            }
        }
        log::info!("FrameSource: stopped {}", self.describe());
    }

    /// Copy of the most recent frame, or `None` if nothing was captured yet.
    pub fn get_latest(&self) -> Option<Frame> {
        self.latest.snapshot()
    }

    /// Sequence number of the most recent frame (0 before the first capture).
    pub fn latest_sequence(&self) -> u64 {
        self.latest.latest_sequence()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|worker| worker.signal.is_running())
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.counters.frames_captured.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
            device: self.describe(),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    backend: &dyn CaptureBackend,
    latest: &LatestFrame,
    counters: &Counters,
    signal: &RunSignal,
    retry_delay: Duration,
) {
    let device_name = backend.describe();
    while signal.is_running() {
        let mut device = match backend.open() {
            Ok(device) => {
                log::info!("FrameSource: opened {}", device_name);
                device
            }
            Err(err) => {
                log::error!(
                    "FrameSource: failed to open {}: {:#}; retrying in {:?}",
                    device_name,
                    err,
                    retry_delay
                );
                signal.sleep(retry_delay);
                continue;
            }
        };

        while signal.is_running() {
            match device.read() {
                Ok(frame) => {
                    latest.publish(frame);
                    counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    log::warn!("FrameSource: failed to read from {}: {:#}", device_name, err);
                    break;
                }
            }
        }

        drop(device);
        if signal.is_running() {
            counters.reconnects.fetch_add(1, Ordering::Relaxed);
            log::info!(
                "FrameSource: reconnecting to {} in {:?}",
                device_name,
                retry_delay
            );
            signal.sleep(retry_delay);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
