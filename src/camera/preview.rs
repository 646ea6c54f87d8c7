// preview.rs - Live camera preview on a dedicated background thread.
//
// Each tick reads one frame, fits it to the display bound and hands it to
// the `CameraEvents` sink. Reads never overlap, so frames arrive in capture
// order. Stopping is cooperative: the loop checks the `active` flag once per
// cadence period, a read already in progress finishes first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{CameraError, CameraEvents, CameraSource, FrameSource, SourceOpener};
use crate::images::{self, DisplayFrame};

/// Pause after a failed network fetch before the next attempt.
pub const NETWORK_BACKOFF: Duration = Duration::from_secs(1);

/// How long `stop` waits for the loop thread to exit.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewState {
    Stopped,
    Running,
}

/// A running preview session.
pub struct PreviewLoop {
    active: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    source: CameraSource,
}

impl PreviewLoop {
    /// Open `source` and start ticking. Returns as soon as the thread is up.
    ///
    /// Fails with `SourceUnavailable` when the source cannot be opened.
    pub fn start<E: CameraEvents>(
        opener: &SourceOpener,
        source: &CameraSource,
        events: E,
    ) -> Result<Self, CameraError> {
        let frame_source = opener
            .open(source)
            .map_err(|e| CameraError::SourceUnavailable(e.to_string()))?;
        Ok(Self::spawn(frame_source, events))
    }

    /// Start ticking on an already opened source.
    pub fn spawn<E: CameraEvents>(frame_source: FrameSource, events: E) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&active);
        let source = frame_source.source();

        let worker = thread::Builder::new()
            .name("camera-preview".into())
            .spawn(move || run_preview(frame_source, flag, events));

        match worker {
            Ok(handle) => Self {
                active,
                worker: Some(handle),
                source,
            },
            Err(e) => {
                log::error!("Failed to spawn preview thread: {}", e);
                active.store(false, Ordering::SeqCst);
                Self {
                    active,
                    worker: None,
                    source,
                }
            }
        }
    }

    pub fn source(&self) -> &CameraSource {
        &self.source
    }

    pub fn state(&self) -> PreviewState {
        let finished = self.worker.as_ref().map_or(true, |w| w.is_finished());
        if self.active.load(Ordering::SeqCst) && !finished {
            PreviewState::Running
        } else {
            PreviewState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == PreviewState::Running
    }

    /// Ask the loop to stop without waiting for it.
    pub fn signal_stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Wait up to `timeout` for the loop thread to exit. Returns false if it
    /// is still inside a blocking read; the thread is then left to finish on
    /// its own.
    pub fn join(&mut self, timeout: Duration) -> bool {
        let Some(worker) = self.worker.take() else {
            return true;
        };
        if join_with_timeout(worker, timeout) {
            true
        } else {
            log::warn!("Preview thread for {} did not stop within {:?}", self.source, timeout);
            false
        }
    }

    /// Signal and join with `STOP_TIMEOUT`.
    pub fn stop(&mut self) -> bool {
        self.signal_stop();
        self.join(STOP_TIMEOUT)
    }
}

impl Drop for PreviewLoop {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

/// Join `worker`, giving up after `timeout`.
pub(crate) fn join_with_timeout(worker: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !worker.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if worker.join().is_err() {
        log::error!("Background thread panicked");
    }
    true
}

/// Sleep for `total`, waking every `step` to check the flag. Returns false
/// if the flag was cleared.
pub(crate) fn sleep_while_active(active: &AtomicBool, total: Duration, step: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if !active.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(step.min(deadline - now));
    }
}

fn run_preview<E: CameraEvents>(source: FrameSource, active: Arc<AtomicBool>, events: E) {
    let cadence = source.cadence();
    let label = source.source();
    log::info!("Preview started on {} (cadence={:?})", label, cadence);

    while active.load(Ordering::SeqCst) {
        let tick = Instant::now();

        match source.read_frame() {
            Ok(frame) => {
                // stop() may have landed during the read
                if !active.load(Ordering::SeqCst) {
                    break;
                }
                let display = DisplayFrame::from_image(&images::fit_within(
                    &frame.image,
                    images::DISPLAY_MAX_WIDTH,
                    images::DISPLAY_MAX_HEIGHT,
                ));
                log::debug!("Preview frame {}x{}", display.width, display.height);
                events.frame(display);
            }
            Err(e) if source.is_local() => {
                log::error!("Preview on {} stopped: {}", label, e);
                active.store(false, Ordering::SeqCst);
                events.status(format!("Camera error: {}", e));
                events.preview_stopped(e.to_string());
                break;
            }
            Err(e) => {
                log::warn!("Preview fetch from {} failed: {}", label, e);
                events.status(format!("Network camera error: {} (retrying)", e));
                if !sleep_while_active(&active, NETWORK_BACKOFF, cadence) {
                    break;
                }
                continue;
            }
        }

        // No catch-up: a slow tick is followed directly by the next one.
        if let Some(rest) = cadence.checked_sub(tick.elapsed()) {
            thread::sleep(rest);
        }
    }

    log::info!("Preview on {} stopped", label);
}
