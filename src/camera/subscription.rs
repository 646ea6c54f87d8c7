// subscription.rs - Polls a network camera for newly taken pictures.
//
// Independent of the preview loop. Every `interval` the endpoint is asked
// whether it has a new image; if so the base64 payload is downloaded,
// decoded, written to disk twice (encoded text and decoded image) and handed
// to the sink, then the endpoint's flag is reset. A payload that does not
// decode also resets the flag, otherwise the camera would offer it forever.
// A failed cycle is reported and the next cycle runs as usual.

use chrono::Local;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::capture::{target_path, TIMESTAMP_FORMAT};
use super::network::{decode_base64_body, CameraEndpoint};
use super::preview::{join_with_timeout, sleep_while_active};
use super::{CameraError, CameraEvents};
use crate::images;
use crate::store::ImageRecord;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Granularity of the stop-flag check while waiting between polls.
pub const POLL_STEP: Duration = Duration::from_millis(100);
pub const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where downloaded images are written.
#[derive(Debug, Clone)]
pub struct SubscriptionDirs {
    /// Decoded images (`esp32_<timestamp>.jpg`).
    pub images: PathBuf,
    /// Raw base64 payloads (`esp32_<timestamp>.b64`).
    pub base64: PathBuf,
    /// Add a counter instead of overwriting files from the same second.
    pub disambiguate: bool,
}

impl Default for SubscriptionDirs {
    fn default() -> Self {
        Self {
            images: PathBuf::from("esp32_images"),
            base64: PathBuf::from("esp32_base64"),
            disambiguate: false,
        }
    }
}

/// An active subscription. Dropping it signals the poll thread to stop.
pub struct Subscription {
    active: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    endpoint: String,
    interval: Duration,
}

impl Subscription {
    /// Probe `endpoint` once and, if it answers, start polling it.
    ///
    /// Fails with `EndpointUnreachable` (and starts nothing) when the probe
    /// fails.
    pub fn subscribe<E: CameraEvents>(
        endpoint: Arc<dyn CameraEndpoint>,
        dirs: SubscriptionDirs,
        interval: Duration,
        events: E,
    ) -> Result<Self, CameraError> {
        endpoint.probe().map_err(|e| match e {
            CameraError::EndpointUnreachable(msg) => CameraError::EndpointUnreachable(msg),
            other => CameraError::EndpointUnreachable(other.to_string()),
        })?;

        let active = Arc::new(AtomicBool::new(true));
        let base_url = endpoint.base_url().to_string();

        let worker = {
            let active = Arc::clone(&active);
            thread::Builder::new()
                .name("camera-subscription".into())
                .spawn(move || run_poll_loop(endpoint, dirs, interval, active, events))
                .map_err(CameraError::Io)?
        };

        log::info!("Subscribed to {} (interval={:?})", base_url, interval);
        Ok(Self {
            active,
            worker: Some(worker),
            endpoint: base_url,
            interval,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_subscribed(&self) -> bool {
        self.active.load(Ordering::SeqCst)
            && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn signal_stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Stop polling and wait up to `UNSUBSCRIBE_TIMEOUT` for the thread.
    /// Safe to call more than once.
    pub fn unsubscribe(&mut self) -> bool {
        self.signal_stop();
        let Some(worker) = self.worker.take() else {
            return true;
        };
        let joined = join_with_timeout(worker, UNSUBSCRIBE_TIMEOUT);
        if joined {
            log::info!("Unsubscribed from {}", self.endpoint);
        } else {
            log::warn!("Poll thread for {} still busy after unsubscribe", self.endpoint);
        }
        joined
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

fn run_poll_loop<E: CameraEvents>(
    endpoint: Arc<dyn CameraEndpoint>,
    dirs: SubscriptionDirs,
    interval: Duration,
    active: Arc<AtomicBool>,
    events: E,
) {
    while active.load(Ordering::SeqCst) {
        match poll_once(endpoint.as_ref(), &dirs) {
            Ok(Some(record)) => {
                events.status(format!("New image received: {}", record.display_name()));
                events.remote_image(record);
                if let Err(e) = endpoint.reset_new_image() {
                    log::warn!("Failed to reset new-image flag on {}: {}", endpoint.base_url(), e);
                    events.status(format!("Failed to reset camera flag: {}", e));
                }
            }
            Ok(None) => log::debug!("No new image on {}", endpoint.base_url()),
            Err(e) => {
                log::warn!("Poll of {} failed: {}", endpoint.base_url(), e);
                events.status(format!("Polling error: {}", e));
            }
        }

        if !sleep_while_active(&active, interval, POLL_STEP) {
            break;
        }
    }
    log::info!("Poll loop for {} exited", endpoint.base_url());
}

/// One poll cycle: check, download, decode, persist. `Ok(None)` when there
/// is nothing new.
pub fn poll_once(
    endpoint: &dyn CameraEndpoint,
    dirs: &SubscriptionDirs,
) -> Result<Option<ImageRecord>, CameraError> {
    if !endpoint.has_new_image()? {
        return Ok(None);
    }

    let body = endpoint.fetch_base64()?;
    let decoded = decode_base64_body(&body)
        .and_then(|encoded| images::decode_image(&encoded).map(|image| (encoded, image)));
    let (encoded, image) = match decoded {
        Ok(decoded) => decoded,
        Err(e) => {
            if let Err(reset) = endpoint.reset_new_image() {
                log::warn!(
                    "Failed to reset new-image flag on {} after bad payload: {}",
                    endpoint.base_url(),
                    reset
                );
            }
            return Err(e);
        }
    };

    let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    fs::create_dir_all(&dirs.base64)?;
    fs::create_dir_all(&dirs.images)?;

    let image_path = target_path(
        &dirs.images,
        &format!("esp32_{}.jpg", stamp),
        dirs.disambiguate,
    );
    let name = image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.trim_end_matches(".jpg");
    let base64_path = target_path(&dirs.base64, &format!("{}.b64", stem), dirs.disambiguate);

    fs::write(&base64_path, body.trim())?;
    fs::write(&image_path, &encoded)?;
    log::info!(
        "Saved {} ({}x{}) and {}",
        image_path.display(),
        image.width(),
        image.height(),
        base64_path.display()
    );

    Ok(Some(ImageRecord::new(Some(image_path), name, image)))
}
