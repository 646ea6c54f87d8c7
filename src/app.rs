// app.rs - Single-threaded owner of all user-facing state.
//
// The image list, the selection, status and results text and the analyze
// flag are only ever written by `App::handle_event`, on the thread that runs
// the event loop. Background work (preview loop, subscription poll loop,
// capture/load workers, analysis tasks) posts `AppEvent`s through an
// `AppHandle` instead of touching that state.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::ai::dispatch::is_error_text;
use crate::ai::ProviderDispatch;
use crate::camera::local::default_backend;
use crate::camera::network::normalize_base_url;
use crate::camera::{
    self, CameraError, CameraEvents, CameraSource, CaptureOptions, DeviceBackend, DeviceSlot,
    EndpointConnector, HttpConnector, PreviewLoop, PreviewState, SourceOpener, Subscription,
    SubscriptionDirs,
};
use crate::images::{self, DisplayFrame};
use crate::settings::{Settings, SettingsError, MAX_TOKENS_RANGE, TEMPERATURE_RANGE};
use crate::store::{ImageRecord, ImageRecordStore};

pub const EVENT_QUEUE_CAPACITY: usize = 64;
/// Bound on each join during shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Sinks ───────────────────────────────────────────────────────────────
/// Renders images. Only called from the event-loop thread.
pub trait DisplaySink {
    fn show(&mut self, frame: &DisplayFrame);
    fn clear(&mut self);
}

/// Shows status lines and analysis results. Only called from the event-loop thread.
pub trait StatusSink {
    fn set_status(&mut self, text: &str);
    fn set_results(&mut self, _text: &str) {}
    fn set_analyze_enabled(&mut self, _enabled: bool) {}
}

// ── Events ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeParams {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl AnalyzeParams {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            provider: settings.provider.clone(),
            model: settings.model.clone(),
            prompt: settings.prompt.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }
}

/// Everything the event loop reacts to: user commands first, then results
/// posted by background work.
pub enum AppEvent {
    ToggleCamera,
    SwitchDevice(u32),
    UseNetworkCamera(String),
    Capture,
    Subscribe(String),
    Unsubscribe,
    Select(usize),
    Clear,
    OpenImages(Vec<PathBuf>),
    RandomImages,
    Analyze(AnalyzeParams),
    /// Persist the analysis parameters to the settings file.
    SaveSettings(AnalyzeParams),
    Shutdown,

    PreviewStarted {
        session: u64,
        result: Result<PreviewLoop, CameraError>,
    },
    PreviewFrame {
        session: u64,
        frame: DisplayFrame,
    },
    PreviewStopped {
        session: u64,
        reason: String,
    },
    Status(String),
    CaptureFinished {
        source: CameraSource,
        result: Result<ImageRecord, CameraError>,
    },
    SubscribeFinished(Result<Subscription, CameraError>),
    RemoteImage(ImageRecord),
    ImagesLoaded {
        records: Vec<ImageRecord>,
        random: bool,
    },
    AnalysisFinished(String),
}

/// Cloneable sender into the event loop.
#[derive(Clone)]
pub struct AppHandle {
    tx: mpsc::Sender<AppEvent>,
}

impl AppHandle {
    /// Post from a plain thread, waiting while the queue is full.
    /// Must not be called from inside the async runtime.
    pub fn post(&self, event: AppEvent) -> bool {
        self.tx.blocking_send(event).is_ok()
    }

    /// Post without waiting; the event is dropped when the queue is full.
    pub fn try_post(&self, event: AppEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }

    pub async fn post_async(&self, event: AppEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Routes camera loop output into the event queue, tagged with the preview
/// session it belongs to so stale frames can be ignored.
struct SessionEvents {
    session: u64,
    handle: AppHandle,
}

impl CameraEvents for SessionEvents {
    fn frame(&self, frame: DisplayFrame) {
        let event = AppEvent::PreviewFrame {
            session: self.session,
            frame,
        };
        if !self.handle.try_post(event) {
            log::debug!("Event queue full, preview frame dropped");
        }
    }

    fn status(&self, message: String) {
        self.handle.post(AppEvent::Status(message));
    }

    fn preview_stopped(&self, reason: String) {
        self.handle.post(AppEvent::PreviewStopped {
            session: self.session,
            reason,
        });
    }

    fn remote_image(&self, record: ImageRecord) {
        self.handle.post(AppEvent::RemoteImage(record));
    }
}

/// Payload appended to the analysis log when `TRASH_ANALYZER_EVENT_LOG` is set.
#[derive(Clone, Serialize)]
pub struct AnalysisPayload {
    pub provider: String,
    pub model: String,
    pub text: String,
    pub is_error: bool,
    pub timestamp: String,
}

fn apply_params(settings: &mut Settings, params: &AnalyzeParams) {
    settings.provider = params.provider.clone();
    settings.model = params.model.clone();
    settings.prompt = params.prompt.clone();
    settings.temperature = params.temperature;
    settings.max_tokens = params.max_tokens;
}

// ── Collaborators ───────────────────────────────────────────────────────
/// The outside world the app talks to; swapped for mocks in tests.
pub struct Collaborators {
    pub devices: Arc<dyn DeviceBackend>,
    pub endpoints: Arc<dyn EndpointConnector>,
    pub providers: ProviderDispatch,
    /// Where `SaveSettings` writes; `None` when the platform has no config dir.
    pub settings_path: Option<PathBuf>,
}

impl Collaborators {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            devices: default_backend(),
            endpoints: Arc::new(HttpConnector),
            providers: ProviderDispatch::from_settings(settings),
            settings_path: Settings::default_path()
                .map_err(|e| log::warn!("Settings cannot be saved: {}", e))
                .ok(),
        }
    }
}

// ── App ─────────────────────────────────────────────────────────────────
pub struct App {
    settings: Settings,
    settings_path: Option<PathBuf>,
    store: ImageRecordStore,
    status: String,
    results: String,
    analyze_enabled: bool,
    display: Box<dyn DisplaySink>,
    status_sink: Box<dyn StatusSink>,

    opener: SourceOpener,
    source: Option<CameraSource>,
    preview: Option<PreviewLoop>,
    /// Counter for preview sessions; `wanted_session` is the one the user
    /// currently wants running (starting or started).
    session: u64,
    wanted_session: Option<u64>,

    subscription: Option<Subscription>,
    subscribe_pending: bool,
    cancel_pending_subscribe: bool,

    dispatch: Arc<ProviderDispatch>,
    runtime: tokio::runtime::Runtime,
    handle: AppHandle,
    events: mpsc::Receiver<AppEvent>,
    running: bool,
}

impl App {
    pub fn new(
        settings: Settings,
        collaborators: Collaborators,
        display: Box<dyn DisplaySink>,
        status_sink: Box<dyn StatusSink>,
    ) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("analysis")
            .enable_all()
            .build()?;
        let (tx, events) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let opener = SourceOpener::new(
            DeviceSlot::new(collaborators.devices),
            collaborators.endpoints,
        );
        let source = Some(CameraSource::Local {
            device_id: settings.device_id,
        });

        let mut app = Self {
            settings,
            settings_path: collaborators.settings_path,
            store: ImageRecordStore::new(),
            status: String::new(),
            results: String::new(),
            analyze_enabled: true,
            display,
            status_sink,
            opener,
            source,
            preview: None,
            session: 0,
            wanted_session: None,
            subscription: None,
            subscribe_pending: false,
            cancel_pending_subscribe: false,
            dispatch: Arc::new(collaborators.providers),
            runtime,
            handle: AppHandle { tx },
            events,
            running: true,
        };
        app.set_status("Ready");
        Ok(app)
    }

    pub fn handle(&self) -> AppHandle {
        self.handle.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &ImageRecordStore {
        &self.store
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn results(&self) -> &str {
        &self.results
    }

    pub fn is_analyze_enabled(&self) -> bool {
        self.analyze_enabled
    }

    pub fn source(&self) -> Option<&CameraSource> {
        self.source.as_ref()
    }

    pub fn preview_state(&self) -> PreviewState {
        match &self.preview {
            Some(p) if self.wanted_session.is_some() => p.state(),
            _ => PreviewState::Stopped,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.as_ref().is_some_and(|s| s.is_subscribed())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Block on the queue until `Shutdown`.
    pub fn run(mut self) {
        while self.running {
            match self.events.blocking_recv() {
                Some(event) => self.handle_event(event),
                None => self.shutdown(),
            }
        }
    }

    /// Apply every queued event without blocking. Returns how many ran.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Pump until `done` holds or `timeout` passes.
    pub fn pump_until(&mut self, timeout: Duration, mut done: impl FnMut(&App) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if done(&*self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        if !self.running {
            return;
        }
        match event {
            AppEvent::ToggleCamera => self.toggle_camera(),
            AppEvent::SwitchDevice(device_id) => {
                self.settings.device_id = device_id;
                self.switch_source(CameraSource::Local { device_id });
            }
            AppEvent::UseNetworkCamera(url) => self.switch_source(CameraSource::Network {
                base_url: normalize_base_url(&url),
            }),
            AppEvent::Capture => self.capture(),
            AppEvent::Subscribe(url) => self.subscribe(&url),
            AppEvent::Unsubscribe => self.unsubscribe(),
            AppEvent::Select(index) => self.select(index),
            AppEvent::Clear => self.clear(),
            AppEvent::OpenImages(paths) => self.load_images(paths),
            AppEvent::RandomImages => self.load_random_images(),
            AppEvent::Analyze(params) => self.analyze(params),
            AppEvent::SaveSettings(params) => self.save_settings(params),
            AppEvent::Shutdown => self.shutdown(),

            AppEvent::PreviewStarted { session, result } => self.on_preview_started(session, result),
            AppEvent::PreviewFrame { session, frame } => {
                if self.wanted_session == Some(session) && self.preview.is_some() {
                    self.display.show(&frame);
                }
            }
            AppEvent::PreviewStopped { session, reason } => self.on_preview_stopped(session, &reason),
            AppEvent::Status(text) => self.set_status(text),
            AppEvent::CaptureFinished { source, result } => {
                self.on_capture_finished(&source, result)
            }
            AppEvent::SubscribeFinished(result) => self.on_subscribe_finished(result),
            AppEvent::RemoteImage(record) => self.on_remote_image(record),
            AppEvent::ImagesLoaded { records, random } => self.on_images_loaded(records, random),
            AppEvent::AnalysisFinished(text) => self.on_analysis_finished(text),
        }
    }

    // ── UI state writers ────────────────────────────────────────────────

    fn set_status(&mut self, text: impl Into<String>) {
        let text = text.into();
        log::debug!("status: {}", text);
        self.status_sink.set_status(&text);
        self.status = text;
    }

    fn set_results(&mut self, text: &str) {
        self.status_sink.set_results(text);
        self.results = text.to_string();
    }

    fn set_analyze_enabled(&mut self, enabled: bool) {
        self.status_sink.set_analyze_enabled(enabled);
        self.analyze_enabled = enabled;
    }

    fn show_current(&mut self) {
        let Some(record) = self.store.current() else {
            return;
        };
        let fitted = images::fit_within(
            record.raw_pixels(),
            images::DISPLAY_MAX_WIDTH,
            images::DISPLAY_MAX_HEIGHT,
        );
        self.display.show(&DisplayFrame::from_image(&fitted));
    }

    fn spawn_worker(&mut self, name: &str, work: impl FnOnce() + Send + 'static) {
        if let Err(e) = thread::Builder::new().name(name.to_string()).spawn(work) {
            log::error!("Failed to spawn {} worker: {}", name, e);
            self.set_status(format!("Internal error: {}", e));
        }
    }

    fn preview_active(&self) -> bool {
        self.wanted_session.is_some()
    }

    fn source_is_local(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.is_local())
    }

    // ── Preview ─────────────────────────────────────────────────────────

    fn toggle_camera(&mut self) {
        if self.preview_active() {
            self.stop_preview(true);
            self.set_status("Camera stopped");
        } else {
            self.start_preview();
        }
    }

    fn start_preview(&mut self) {
        let Some(source) = self.source.clone() else {
            self.set_status(CameraError::NoSourceConfigured.to_string());
            return;
        };
        self.session += 1;
        let session = self.session;
        self.wanted_session = Some(session);
        self.set_status(format!("Opening {}...", source));

        let opener = self.opener.clone();
        let handle = self.handle.clone();
        let events = SessionEvents {
            session,
            handle: handle.clone(),
        };
        self.spawn_worker("preview-start", move || {
            let result = PreviewLoop::start(&opener, &source, events);
            handle.post(AppEvent::PreviewStarted { session, result });
        });
    }

    /// Stop the preview. With `release`, also close the local device.
    fn stop_preview(&mut self, release: bool) {
        self.wanted_session = None;
        if let Some(mut preview) = self.preview.take() {
            preview.stop();
        }
        if release && self.source_is_local() {
            self.opener.slot().close();
        }
    }

    fn on_preview_started(&mut self, session: u64, result: Result<PreviewLoop, CameraError>) {
        let wanted = self.wanted_session == Some(session);
        match result {
            Ok(preview) if wanted => {
                self.set_status(format!("Camera running: {}", preview.source()));
                self.preview = Some(preview);
            }
            Ok(mut preview) => {
                // stopped or switched while it was opening
                preview.stop();
                if !self.preview_active() && preview.source().is_local() {
                    self.opener.slot().close();
                }
            }
            Err(e) if wanted => {
                self.wanted_session = None;
                self.set_status(format!("Could not start camera: {}", e));
            }
            Err(e) => log::debug!("Stale preview start failed: {}", e),
        }
    }

    fn on_preview_stopped(&mut self, session: u64, reason: &str) {
        if self.wanted_session != Some(session) {
            return;
        }
        self.wanted_session = None;
        if let Some(mut preview) = self.preview.take() {
            preview.join(SHUTDOWN_TIMEOUT);
        }
        if self.source_is_local() {
            self.opener.slot().close();
        }
        self.set_status(format!("Camera stopped: {}", reason));
    }

    fn switch_source(&mut self, source: CameraSource) {
        if self.source.as_ref() == Some(&source) {
            return;
        }
        let was_running = self.preview_active();
        let old_local = self.source_is_local();

        // The slot closes the old local device itself before opening a new
        // one, so a running local preview keeps its handle until then.
        self.stop_preview(false);
        if old_local && (!was_running || !source.is_local()) {
            self.opener.slot().close();
        }

        self.source = Some(source.clone());
        self.set_status(format!("Camera source: {}", source));
        if was_running {
            self.start_preview();
        }
    }

    // ── Capture ─────────────────────────────────────────────────────────

    fn capture(&mut self) {
        let Some(source) = self.source.clone() else {
            self.set_status(CameraError::NoSourceConfigured.to_string());
            return;
        };
        self.set_status("Capturing image...");

        let opener = self.opener.clone();
        let options = CaptureOptions {
            dir: self.settings.captured_dir.clone(),
            disambiguate: self.settings.disambiguate_filenames,
        };
        let handle = self.handle.clone();
        self.spawn_worker("capture", move || {
            let result = camera::capture(&opener, Some(&source), &options);
            handle.post(AppEvent::CaptureFinished { source, result });
        });
    }

    fn on_capture_finished(
        &mut self,
        source: &CameraSource,
        result: Result<ImageRecord, CameraError>,
    ) {
        let previewing = self.preview_active();
        // the device the capture opened stays only while a local preview holds it
        if source.is_local() && !(previewing && self.source_is_local()) {
            self.opener.slot().close();
        }
        match result {
            Ok(record) => {
                let name = record.display_name().to_string();
                let index = self.store.append(record);
                let _ = self.store.select(index);
                if !previewing {
                    self.show_current();
                }
                self.set_status(format!("Image captured from camera: {}", name));
            }
            Err(e) => self.set_status(format!("Camera capture failed: {}", e)),
        }
    }

    // ── Subscription ────────────────────────────────────────────────────

    fn subscribe(&mut self, url: &str) {
        if self.subscription.is_some() || self.subscribe_pending {
            self.set_status("Already subscribed");
            return;
        }
        let url = normalize_base_url(url);
        if url.is_empty() {
            self.set_status("Please enter the camera address");
            return;
        }
        self.subscribe_pending = true;
        self.cancel_pending_subscribe = false;
        self.set_status(format!("Connecting to {}...", url));

        let connector = Arc::clone(self.opener.connector());
        let dirs = SubscriptionDirs {
            images: self.settings.esp32_image_dir.clone(),
            base64: self.settings.esp32_base64_dir.clone(),
            disambiguate: self.settings.disambiguate_filenames,
        };
        let interval = self.settings.poll_interval();
        let handle = self.handle.clone();
        let events = SessionEvents {
            session: 0,
            handle: handle.clone(),
        };
        self.spawn_worker("subscribe", move || {
            let result = connector
                .connect(&url)
                .and_then(|endpoint| Subscription::subscribe(endpoint, dirs, interval, events));
            handle.post(AppEvent::SubscribeFinished(result));
        });
    }

    fn on_subscribe_finished(&mut self, result: Result<Subscription, CameraError>) {
        self.subscribe_pending = false;
        match result {
            Ok(mut subscription) if self.cancel_pending_subscribe => {
                subscription.unsubscribe();
                self.set_status("Unsubscribed");
            }
            Ok(subscription) => {
                self.set_status(format!("Subscribed to {}", subscription.endpoint()));
                self.subscription = Some(subscription);
            }
            Err(e) => self.set_status(format!("Subscribe failed: {}", e)),
        }
        self.cancel_pending_subscribe = false;
    }

    /// No-op when nothing is subscribed.
    fn unsubscribe(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
            self.set_status("Unsubscribed");
        } else if self.subscribe_pending {
            self.cancel_pending_subscribe = true;
        }
    }

    fn on_remote_image(&mut self, record: ImageRecord) {
        let index = self.store.append(record);
        if self.store.current_index().is_none() {
            let _ = self.store.select(index);
            if !self.preview_active() {
                self.show_current();
            }
        }
    }

    // ── Image list ──────────────────────────────────────────────────────

    fn select(&mut self, index: usize) {
        if self.store.get(index).is_none() {
            log::debug!("Ignoring selection of index {}", index);
            return;
        }
        self.stop_preview(true);
        match self.store.select(index) {
            Ok(()) => self.show_current(),
            Err(e) => log::debug!("Ignoring selection: {}", e),
        }
    }

    fn clear(&mut self) {
        self.store.clear();
        self.display.clear();
        self.set_results("");
        self.set_status("All images cleared");
    }

    fn load_images(&mut self, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        self.set_status(format!("Loading {} images...", paths.len()));
        let handle = self.handle.clone();
        self.spawn_worker("load-images", move || {
            let records = images::load_images(&paths);
            handle.post(AppEvent::ImagesLoaded {
                records,
                random: false,
            });
        });
    }

    fn load_random_images(&mut self) {
        let dirs = self.settings.dataset_dirs.clone();
        let handle = self.handle.clone();
        self.spawn_worker("random-images", move || {
            let paths = images::sample_paths(
                images::find_dataset_images(&dirs),
                images::RANDOM_SAMPLE_SIZE,
            );
            let records = images::load_images(&paths);
            handle.post(AppEvent::ImagesLoaded {
                records,
                random: true,
            });
        });
    }

    fn on_images_loaded(&mut self, records: Vec<ImageRecord>, random: bool) {
        if random && records.is_empty() {
            self.set_status(
                "No images found in the dataset directories. Please upload images manually.",
            );
            return;
        }
        self.stop_preview(true);
        self.store.clear();
        self.display.clear();
        let count = records.len();
        for record in records {
            self.store.append(record);
        }
        if count > 0 {
            let _ = self.store.select(0);
            self.show_current();
        }
        if random {
            self.set_status(format!("Loaded {} random images", count));
        } else {
            self.set_status(format!("Loaded {} images", count));
        }
    }

    // ── Analysis ────────────────────────────────────────────────────────

    fn analyze(&mut self, params: AnalyzeParams) {
        if !self.analyze_enabled {
            self.set_status("Analysis already running");
            return;
        }
        let Some(record) = self.store.current() else {
            self.set_status("Please select an image first.");
            return;
        };
        let pixels = record.raw_shared();
        let prompt = params.prompt.trim().to_string();
        if prompt.is_empty() {
            self.set_status("Please enter a prompt.");
            return;
        }
        if params.provider.trim().is_empty() || params.model.trim().is_empty() {
            self.set_status("Please select a provider and model.");
            return;
        }
        let temperature = params
            .temperature
            .clamp(*TEMPERATURE_RANGE.start(), *TEMPERATURE_RANGE.end());
        let max_tokens = params
            .max_tokens
            .clamp(*MAX_TOKENS_RANGE.start(), *MAX_TOKENS_RANGE.end());

        self.set_analyze_enabled(false);
        self.set_results("");
        self.set_status("Analyzing image...");

        let dispatch = Arc::clone(&self.dispatch);
        let handle = self.handle.clone();
        self.runtime.spawn(async move {
            let text = dispatch
                .analyze(
                    &params.provider,
                    &params.model,
                    &prompt,
                    &pixels,
                    temperature,
                    max_tokens,
                )
                .await;
            log_event_for_testing(&AnalysisPayload {
                provider: params.provider.clone(),
                model: params.model.clone(),
                is_error: is_error_text(&text),
                text: text.clone(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            });
            handle.post_async(AppEvent::AnalysisFinished(text)).await;
        });
    }

    /// Write the edited parameters over the settings file. The file is
    /// re-read first so keys taken from the environment are not persisted.
    fn save_settings(&mut self, params: AnalyzeParams) {
        apply_params(&mut self.settings, &params);
        let Some(path) = self.settings_path.clone() else {
            self.set_status(format!("Could not save settings: {}", SettingsError::NoConfigDir));
            return;
        };
        let saved = Settings::load_from(&path).and_then(|mut on_disk| {
            apply_params(&mut on_disk, &params);
            on_disk.clamped().save_to(&path)
        });
        match saved {
            Ok(()) => self.set_status(format!("Settings saved to {}", path.display())),
            Err(e) => self.set_status(format!("Could not save settings: {}", e)),
        }
    }

    fn on_analysis_finished(&mut self, text: String) {
        self.set_results(&text);
        if is_error_text(&text) {
            self.set_status("Error during analysis");
        } else {
            self.set_status("Analysis complete");
        }
        self.set_analyze_enabled(true);
    }

    // ── Shutdown ────────────────────────────────────────────────────────

    /// Signal every loop, join each with a bounded wait, then release the
    /// device. In that order, so the device is never closed under a read.
    fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        log::info!("Shutting down");

        self.wanted_session = None;
        if let Some(preview) = &self.preview {
            preview.signal_stop();
        }
        if let Some(subscription) = &self.subscription {
            subscription.signal_stop();
        }

        if let Some(mut preview) = self.preview.take() {
            preview.join(SHUTDOWN_TIMEOUT);
        }
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }

        self.opener.slot().close();
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// When `TRASH_ANALYZER_EVENT_LOG` is set, append the result as a JSONL line
/// to that file. No-op otherwise.
fn log_event_for_testing(payload: &AnalysisPayload) {
    if let Ok(path) = std::env::var("TRASH_ANALYZER_EVENT_LOG") {
        use std::io::Write;
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            let json = serde_json::to_string(payload).unwrap_or_default();
            let _ = writeln!(
                file,
                r#"{{"event":"analysis:finished","timestamp":"{}","payload":{}}}"#,
                payload.timestamp, json
            );
        }
    }
}
