//! Camera capture worker.
//!
//! A dedicated thread polls a [`FrameSource`] and publishes the newest
//! frame into a [`LatestFrame`] slot. Readers never wait for capture;
//! they get whatever frame is newest, which may be stale.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{info, warn};
use zebracut_vision::Frame;

use crate::devices::{Camera, DeviceError, FrameSource};

/// Single-slot mailbox holding the newest frame.
///
/// Publishing replaces the whole frame; readers always see a complete one.
#[derive(Debug, Clone, Default)]
pub struct LatestFrame {
    slot: Arc<RwLock<Option<Arc<Frame>>>>,
}

impl LatestFrame {
    /// An empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame.
    pub fn publish(&self, frame: Frame) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(frame));
    }

    /// The newest frame, if one has been published.
    #[must_use]
    pub fn get(&self) -> Option<Frame> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            .cloned()
    }
}

/// Polling cadence of the capture thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// How long one `grab` may wait for a frame.
    pub grab_timeout: Duration,
    /// Pause between polls, and while capture is paused.
    pub poll_interval: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            grab_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Runs a [`FrameSource`] on its own thread and serves it as a [`Camera`].
#[derive(Debug)]
pub struct CaptureWorker {
    latest: LatestFrame,
    active: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    /// Start capturing from `source`.
    pub fn spawn<S: FrameSource + 'static>(mut source: S, settings: CaptureSettings) -> Self {
        let latest = LatestFrame::new();
        let active = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = {
            let latest = latest.clone();
            let active = Arc::clone(&active);
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || {
                info!("capture worker started");
                let mut sequence = 0_u64;
                while !shutdown.load(Ordering::SeqCst) {
                    if active.load(Ordering::SeqCst) {
                        match source.grab(settings.grab_timeout) {
                            Ok(Some(image)) => {
                                latest.publish(Frame::new(image, sequence));
                                sequence += 1;
                            }
                            Ok(None) => {}
                            Err(DeviceError::Disconnected) => {
                                warn!("camera disconnected, capture stopped");
                                break;
                            }
                            Err(e) => warn!("frame grab failed: {e}"),
                        }
                    }
                    std::thread::sleep(settings.poll_interval);
                }
                info!("capture worker shutting down after {sequence} frames");
            })
        };

        Self {
            latest,
            active,
            shutdown,
            thread: Some(thread),
        }
    }

    /// A reader handle onto the newest frame.
    #[must_use]
    pub fn latest(&self) -> LatestFrame {
        self.latest.clone()
    }

    /// Stop the thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take()
            && let Err(e) = handle.join()
        {
            warn!("capture worker panicked: {e:?}");
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

impl Camera for CaptureWorker {
    fn latest_frame(&self) -> Option<Frame> {
        self.latest.get()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn stop_capture(&self) -> Result<(), DeviceError> {
        self.active.store(false, Ordering::SeqCst);
        info!("capture paused");
        Ok(())
    }

    fn start_capture(&self) -> Result<(), DeviceError> {
        self.active.store(true, Ordering::SeqCst);
        info!("capture resumed");
        Ok(())
    }
}
