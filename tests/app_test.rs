//! Integration tests for the event loop with mock cameras and providers.
//! Fully deterministic: no camera hardware, no network, no provider API.
//!
//! Run: cargo test --test app_test

mod common;

use async_trait::async_trait;
use common::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use trash_analyzer_lib::ai::{AiError, AnalysisRequest, ProviderDispatch, ProviderKind, VisionProvider};
use trash_analyzer_lib::app::{AnalyzeParams, App, AppEvent, Collaborators, DisplaySink, StatusSink};
use trash_analyzer_lib::camera::{CameraSource, PreviewState};
use trash_analyzer_lib::images::DisplayFrame;
use trash_analyzer_lib::settings::Settings;

const WAIT: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Mock implementations
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Screen {
    shown: Arc<AtomicUsize>,
    cleared: Arc<AtomicUsize>,
}

impl DisplaySink for Screen {
    fn show(&mut self, _frame: &DisplayFrame) {
        self.shown.fetch_add(1, Ordering::SeqCst);
    }

    fn clear(&mut self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct StatusLog {
    lines: Arc<Mutex<Vec<String>>>,
    analyze_toggles: Arc<Mutex<Vec<bool>>>,
}

impl StatusSink for StatusLog {
    fn set_status(&mut self, text: &str) {
        self.lines.lock().unwrap().push(text.to_string());
    }

    fn set_analyze_enabled(&mut self, enabled: bool) {
        self.analyze_toggles.lock().unwrap().push(enabled);
    }
}

struct CannedProvider {
    reply: Result<String, String>,
    calls: AtomicUsize,
}

#[async_trait]
impl VisionProvider for CannedProvider {
    async fn analyze(&self, _request: &AnalysisRequest) -> Result<String, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.reply.clone().map_err(AiError::ModelError)
    }

    fn name(&self) -> &str {
        "canned"
    }
}

struct Harness {
    app: App,
    backend: MockBackend,
    endpoint: MockEndpoint,
    screen: Screen,
    status: StatusLog,
    provider: Arc<CannedProvider>,
    root: PathBuf,
    // declared last so the app shuts down before the directory goes
    _tmp: TempDir,
}

fn harness(name: &str, reply: Result<&str, &str>) -> Harness {
    let tmp = scratch_dir(name);
    let root = tmp.path().to_path_buf();
    let settings = Settings {
        captured_dir: root.join("captured_images"),
        esp32_image_dir: root.join("esp32_images"),
        esp32_base64_dir: root.join("esp32_base64"),
        dataset_dirs: vec![root.join("dataset")],
        poll_interval_secs: 1,
        ..Settings::default()
    };
    let backend = MockBackend::new();
    let endpoint = MockEndpoint::new("http://cam");
    let provider = Arc::new(CannedProvider {
        reply: reply.map(String::from).map_err(String::from),
        calls: AtomicUsize::new(0),
    });
    let mut providers = ProviderDispatch::new();
    providers.register(ProviderKind::Gemini, provider.clone());

    let screen = Screen::default();
    let status = StatusLog::default();
    let app = App::new(
        settings,
        Collaborators {
            devices: Arc::new(backend.clone()),
            endpoints: Arc::new(MockConnector {
                endpoint: endpoint.clone(),
            }),
            providers,
            settings_path: Some(root.join("config").join("settings.toml")),
        },
        Box::new(screen.clone()),
        Box::new(status.clone()),
    )
    .expect("app");

    Harness {
        app,
        backend,
        endpoint,
        screen,
        status,
        provider,
        root,
        _tmp: tmp,
    }
}

fn write_fixture(dir: &std::path::Path, name: &str) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, jpeg_fixture(80, 60, [90, 90, 90])).unwrap();
    path
}

fn params(prompt: &str) -> AnalyzeParams {
    AnalyzeParams {
        provider: "Gemini".into(),
        model: "gemini-2.0-flash".into(),
        prompt: prompt.into(),
        temperature: 0.7,
        max_tokens: 100,
    }
}

fn load_one(h: &mut Harness) {
    let path = write_fixture(&h.root.join("uploads"), "bottle.jpg");
    h.app.handle_event(AppEvent::OpenImages(vec![path]));
    assert!(h.app.pump_until(WAIT, |app| app.store().len() == 1));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Opening files replaces the list, selects the first and displays it.
#[test]
fn open_images_selects_first() {
    let mut h = harness("app-open", Ok("Plastic"));
    load_one(&mut h);

    assert_eq!(h.app.status(), "Loaded 1 images");
    assert_eq!(h.app.store().current_index(), Some(0));
    assert_eq!(h.app.store().current().unwrap().display_name(), "bottle.jpg");
    assert!(h.screen.shown.load(Ordering::SeqCst) >= 1);
}

/// Analyze validates its inputs before any provider call.
#[test]
fn analyze_requires_image_and_prompt() {
    let mut h = harness("app-validate", Ok("Plastic"));

    h.app.handle_event(AppEvent::Analyze(params("Classify")));
    assert_eq!(h.app.status(), "Please select an image first.");

    load_one(&mut h);
    h.app.handle_event(AppEvent::Analyze(params("   ")));
    assert_eq!(h.app.status(), "Please enter a prompt.");
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
    assert!(h.app.is_analyze_enabled());
}

/// A successful call fills the results and re-enables the action.
#[test]
fn analysis_completes() {
    let mut h = harness("app-analyze", Ok("Plastic bottle"));
    load_one(&mut h);

    h.app.handle_event(AppEvent::Analyze(params("What kind of trash is this?")));
    assert_eq!(h.app.status(), "Analyzing image...");
    assert!(!h.app.is_analyze_enabled());

    assert!(h.app.pump_until(WAIT, |app| app.is_analyze_enabled()));
    assert_eq!(h.app.results(), "Plastic bottle");
    assert_eq!(h.app.status(), "Analysis complete");
    assert_eq!(*h.status.analyze_toggles.lock().unwrap(), vec![false, true]);
}

/// Provider failures come back as `ERROR:` text.
#[test]
fn analysis_error_is_shown_as_text() {
    let mut h = harness("app-analyze-error", Err("quota exceeded"));
    load_one(&mut h);

    h.app.handle_event(AppEvent::Analyze(params("Classify")));
    assert!(h.app.pump_until(WAIT, |app| app.is_analyze_enabled()));
    assert!(h.app.results().starts_with("ERROR:"));
    assert!(h.app.results().contains("quota exceeded"));
    assert_eq!(h.app.status(), "Error during analysis");
}

/// Clear empties the list, the display and the results.
#[test]
fn clear_removes_everything() {
    let mut h = harness("app-clear", Ok("Paper"));
    load_one(&mut h);

    h.app.handle_event(AppEvent::Clear);
    assert!(h.app.store().is_empty());
    assert_eq!(h.app.store().current_index(), None);
    assert_eq!(h.app.results(), "");
    assert_eq!(h.app.status(), "All images cleared");
    assert!(h.screen.cleared.load(Ordering::SeqCst) >= 1);
}

/// Remote images are appended; only the first is auto-selected.
#[test]
fn remote_images_auto_select_first() {
    let mut h = harness("app-remote", Ok("Glass"));
    h.endpoint.queue_new_image(&jpeg_fixture(30, 20, [5, 5, 5]));

    h.app.handle_event(AppEvent::Subscribe("cam.local".into()));
    assert!(h.app.pump_until(WAIT, |app| app.store().len() == 1));
    assert!(h.app.is_subscribed());
    assert_eq!(h.app.store().current_index(), Some(0));

    h.endpoint.queue_new_image(&jpeg_fixture(30, 20, [9, 9, 9]));
    assert!(h.app.pump_until(WAIT, |app| app.store().len() == 2));
    assert_eq!(h.app.store().current_index(), Some(0));
}

/// Unsubscribing twice is harmless.
#[test]
fn double_unsubscribe_is_a_noop() {
    let mut h = harness("app-unsubscribe", Ok("Metal"));
    h.app.handle_event(AppEvent::Subscribe("cam.local".into()));
    assert!(h.app.pump_until(WAIT, |app| app.is_subscribed()));

    h.app.handle_event(AppEvent::Unsubscribe);
    assert!(!h.app.is_subscribed());
    assert_eq!(h.app.status(), "Unsubscribed");

    h.app.handle_event(AppEvent::Unsubscribe);
    assert!(!h.app.is_subscribed());
    assert_eq!(h.app.status(), "Unsubscribed");
}

/// A failed probe leaves nothing subscribed.
#[test]
fn subscribe_to_unreachable_camera_fails() {
    let mut h = harness("app-unreachable", Ok("Metal"));
    h.endpoint.state.lock().unwrap().reachable = false;

    h.app.handle_event(AppEvent::Subscribe("cam.local".into()));
    assert!(h
        .app
        .pump_until(WAIT, |app| app.status().starts_with("Subscribe failed")));
    assert!(!h.app.is_subscribed());
}

/// Preview frames reach the display; stopping releases the device.
#[test]
fn toggle_camera_starts_and_stops_preview() {
    let mut h = harness("app-preview", Ok("Organic"));

    h.app.handle_event(AppEvent::ToggleCamera);
    assert!(h
        .app
        .pump_until(WAIT, |app| app.preview_state() == PreviewState::Running));
    let shown = h.screen.shown.load(Ordering::SeqCst);
    assert!(h
        .app
        .pump_until(WAIT, |_| h.screen.shown.load(Ordering::SeqCst) > shown + 2));

    h.app.handle_event(AppEvent::ToggleCamera);
    assert_eq!(h.app.preview_state(), PreviewState::Stopped);
    assert_eq!(h.backend.journal(), vec!["open 0", "close 0"]);
}

/// Selecting a number past the end of the list leaves the preview alone.
#[test]
fn out_of_range_select_keeps_preview() {
    let mut h = harness("app-select-range", Ok("Organic"));

    h.app.handle_event(AppEvent::ToggleCamera);
    assert!(h
        .app
        .pump_until(WAIT, |app| app.preview_state() == PreviewState::Running));

    h.app.handle_event(AppEvent::Select(99));
    h.app.pump();
    assert_eq!(h.app.preview_state(), PreviewState::Running);
    assert_eq!(h.backend.journal(), vec!["open 0"]);
}

/// Switching devices mid-preview closes the old device before opening the new.
#[test]
fn switch_device_while_previewing() {
    let mut h = harness("app-switch", Ok("Organic"));

    h.app.handle_event(AppEvent::ToggleCamera);
    assert!(h
        .app
        .pump_until(WAIT, |app| app.preview_state() == PreviewState::Running));

    h.app.handle_event(AppEvent::SwitchDevice(1));
    assert_eq!(h.app.source(), Some(&CameraSource::Local { device_id: 1 }));
    assert!(h.app.pump_until(WAIT, |_| h.backend.journal().len() == 3));
    assert_eq!(h.backend.journal(), vec!["open 0", "close 0", "open 1"]);
    assert!(h
        .app
        .pump_until(WAIT, |app| app.preview_state() == PreviewState::Running));
}

/// Capture with no preview selects the new image and releases the device.
#[test]
fn capture_selects_new_image() {
    let mut h = harness("app-capture", Ok("Paper"));

    h.app.handle_event(AppEvent::Capture);
    assert!(h.app.pump_until(WAIT, |app| app.store().len() == 1));
    assert_eq!(h.app.store().current_index(), Some(0));
    assert!(h.app.status().starts_with("Image captured from camera: camera_"));
    assert_eq!(h.backend.journal(), vec!["open 0", "close 0"]);
    assert_eq!(files_in(&h.root.join("captured_images")).len(), 1);
}

/// A local capture that finishes after the user moved to a network camera
/// still releases the device it opened.
#[test]
fn capture_then_switch_to_network_releases_device() {
    let mut h = harness("app-capture-switch", Ok("Paper"));

    h.app.handle_event(AppEvent::Capture);
    h.app.handle_event(AppEvent::UseNetworkCamera("cam.local".into()));
    assert!(h.app.pump_until(WAIT, |app| {
        app.status().starts_with("Image captured")
            || app.status().starts_with("Camera capture failed")
    }));

    let journal = h.backend.journal();
    let opens = journal.iter().filter(|e| e.starts_with("open")).count();
    let closes = journal.iter().filter(|e| e.starts_with("close")).count();
    assert_eq!(opens, closes, "journal: {:?}", journal);
    assert_eq!(journal.last().map(String::as_str), Some("close 0"));
}

/// Saving writes the edited parameters over the settings file and keeps
/// the fields it does not edit.
#[test]
fn save_settings_persists_params() {
    let mut h = harness("app-save", Ok("Paper"));
    let path = h.root.join("config").join("settings.toml");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "ollamaEndpoint = \"http://gpu-box:11434\"\n").unwrap();

    h.app.handle_event(AppEvent::SaveSettings(AnalyzeParams {
        provider: "OpenAI".into(),
        model: "gpt-4o-mini".into(),
        temperature: 0.2,
        ..params("Which bin does this go in?")
    }));
    assert_eq!(h.app.status(), format!("Settings saved to {}", path.display()));
    assert_eq!(h.app.settings().prompt, "Which bin does this go in?");

    let saved = Settings::load_from(&path).unwrap();
    assert_eq!(saved.provider, "OpenAI");
    assert_eq!(saved.model, "gpt-4o-mini");
    assert_eq!(saved.prompt, "Which bin does this go in?");
    assert!((saved.temperature - 0.2).abs() < 1e-6);
    assert_eq!(saved.ollama_endpoint, "http://gpu-box:11434");
}

/// Shutdown stops the loops and releases the device; later events are ignored.
#[test]
fn shutdown_releases_everything() {
    let mut h = harness("app-shutdown", Ok("Paper"));
    h.app.handle_event(AppEvent::ToggleCamera);
    assert!(h
        .app
        .pump_until(WAIT, |app| app.preview_state() == PreviewState::Running));
    h.app.handle_event(AppEvent::Subscribe("cam.local".into()));
    assert!(h.app.pump_until(WAIT, |app| app.is_subscribed()));

    h.app.handle_event(AppEvent::Shutdown);
    assert!(!h.app.is_running());
    assert!(!h.app.is_subscribed());
    assert_eq!(h.backend.journal().last().map(String::as_str), Some("close 0"));

    h.app.handle_event(AppEvent::Clear);
    assert_ne!(h.app.status(), "All images cleared");
}
