//! Mock camera devices, network endpoints and event recorders shared by the
//! integration tests. Nothing here touches real hardware or the network.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{Rgb, RgbImage};
use tempfile::TempDir;
use trash_analyzer_lib::camera::{
    CameraEndpoint, CameraError, CameraEvents, DeviceBackend, EndpointConnector, LocalDevice,
};
use trash_analyzer_lib::images::{self, DisplayFrame};
use trash_analyzer_lib::store::ImageRecord;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A small solid-colour JPEG.
pub fn jpeg_fixture(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    images::encode_jpeg(&img, 90).expect("encode fixture")
}

/// Fresh empty directory, removed when the guard drops.
pub fn scratch_dir(name: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("trash-analyzer-{}-", name))
        .tempdir()
        .expect("create scratch dir")
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}

/// Poll `cond` every 10 ms until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

// ---------------------------------------------------------------------------
// Local devices
// ---------------------------------------------------------------------------

/// Shared journal of device lifecycle events: "open 0", "close 0", ...
pub type Journal = Arc<Mutex<Vec<String>>>;

pub struct MockDevice {
    id: u32,
    journal: Journal,
    reads: Arc<AtomicUsize>,
    /// Reads after this many succeed fail with `DeviceReadFailed`.
    fail_after: Option<usize>,
    frame: Vec<u8>,
}

impl LocalDevice for MockDevice {
    fn read_jpeg(&mut self) -> Result<Vec<u8>, CameraError> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| n >= limit) {
            return Err(CameraError::DeviceReadFailed("device unplugged".into()));
        }
        std::thread::sleep(Duration::from_millis(1));
        Ok(self.frame.clone())
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.journal.lock().unwrap().push(format!("close {}", self.id));
    }
}

#[derive(Clone)]
pub struct MockBackend {
    pub journal: Journal,
    pub reads: Arc<AtomicUsize>,
    pub fail_after: Option<usize>,
    pub missing: Vec<u32>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            journal: Arc::new(Mutex::new(Vec::new())),
            reads: Arc::new(AtomicUsize::new(0)),
            fail_after: None,
            missing: Vec::new(),
        }
    }

    pub fn failing_after(reads: usize) -> Self {
        Self {
            fail_after: Some(reads),
            ..Self::new()
        }
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl DeviceBackend for MockBackend {
    fn open(&self, device_id: u32) -> Result<Box<dyn LocalDevice>, CameraError> {
        if self.missing.contains(&device_id) {
            return Err(CameraError::DeviceUnavailable {
                device_id,
                reason: "no such device".into(),
            });
        }
        self.journal.lock().unwrap().push(format!("open {}", device_id));
        Ok(Box::new(MockDevice {
            id: device_id,
            journal: Arc::clone(&self.journal),
            reads: Arc::clone(&self.reads),
            fail_after: self.fail_after,
            frame: jpeg_fixture(64, 48, [200, 40, 40]),
        }))
    }
}

// ---------------------------------------------------------------------------
// Network endpoints
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct EndpointState {
    pub reachable: bool,
    /// Responses for `fetch_frame`, consumed in order; empty means fail.
    pub frames: VecDeque<Result<Vec<u8>, String>>,
    /// Responses for `has_new_image`, consumed in order; empty means `false`.
    pub checks: VecDeque<Result<bool, String>>,
    pub base64_body: String,
    pub resets: usize,
    pub base64_fetches: usize,
}

#[derive(Clone)]
pub struct MockEndpoint {
    pub url: String,
    pub state: Arc<Mutex<EndpointState>>,
}

impl MockEndpoint {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            state: Arc::new(Mutex::new(EndpointState {
                reachable: true,
                ..EndpointState::default()
            })),
        }
    }

    pub fn unreachable(url: &str) -> Self {
        let endpoint = Self::new(url);
        endpoint.state.lock().unwrap().reachable = false;
        endpoint
    }

    /// Serve one new image as base64 of `jpeg` on the next check.
    pub fn queue_new_image(&self, jpeg: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.checks.push_back(Ok(true));
        state.base64_body = base64_body(jpeg);
    }

    pub fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }
}

impl CameraEndpoint for MockEndpoint {
    fn base_url(&self) -> &str {
        &self.url
    }

    fn probe(&self) -> Result<(), CameraError> {
        if self.state.lock().unwrap().reachable {
            Ok(())
        } else {
            Err(CameraError::EndpointUnreachable("connection refused".into()))
        }
    }

    fn fetch_frame(&self) -> Result<Vec<u8>, CameraError> {
        match self.state.lock().unwrap().frames.pop_front() {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(msg)) => Err(CameraError::RemoteFetchFailed(msg)),
            None => Err(CameraError::RemoteFetchFailed("timed out".into())),
        }
    }

    fn has_new_image(&self) -> Result<bool, CameraError> {
        match self.state.lock().unwrap().checks.pop_front() {
            Some(Ok(flag)) => Ok(flag),
            Some(Err(msg)) => Err(CameraError::RemoteFetchFailed(msg)),
            None => Ok(false),
        }
    }

    fn fetch_base64(&self) -> Result<String, CameraError> {
        let mut state = self.state.lock().unwrap();
        state.base64_fetches += 1;
        Ok(state.base64_body.clone())
    }

    fn reset_new_image(&self) -> Result<(), CameraError> {
        self.state.lock().unwrap().resets += 1;
        Ok(())
    }
}

/// Hands out the same mock endpoint whatever the address.
pub struct MockConnector {
    pub endpoint: MockEndpoint,
}

impl EndpointConnector for MockConnector {
    fn connect(&self, _base_url: &str) -> Result<Arc<dyn CameraEndpoint>, CameraError> {
        Ok(Arc::new(self.endpoint.clone()))
    }
}

// ---------------------------------------------------------------------------
// HTTP camera server
// ---------------------------------------------------------------------------

type Routes = Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>>;

/// A tiny HTTP/1.1 server on a loopback port answering GETs from a route
/// table. Unknown paths get 404. Every request path is recorded.
pub struct CameraServer {
    url: String,
    routes: Routes,
    requests: Arc<Mutex<Vec<String>>>,
}

impl CameraServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind camera server");
        let url = format!("http://{}", listener.local_addr().unwrap());
        let routes: Routes = Arc::default();
        let requests: Arc<Mutex<Vec<String>>> = Arc::default();

        let (r, q) = (Arc::clone(&routes), Arc::clone(&requests));
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                serve_one(stream, &r, &q);
            }
        });
        Self {
            url,
            routes,
            requests,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Answer `path` with `status` and `body` from now on.
    pub fn route(&self, path: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.into()));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn hits(&self, path: &str) -> usize {
        self.requests().iter().filter(|p| *p == path).count()
    }
}

fn serve_one(mut stream: TcpStream, routes: &Routes, requests: &Arc<Mutex<Vec<String>>>) {
    stream.set_read_timeout(Some(Duration::from_secs(2))).ok();
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    // drain headers; GETs carry no body
    let mut header = String::new();
    while reader.read_line(&mut header).map(|n| n > 0).unwrap_or(false) {
        if header == "\r\n" || header == "\n" {
            break;
        }
        header.clear();
    }

    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();
    requests.lock().unwrap().push(path.clone());

    let (status, body) = routes
        .lock()
        .unwrap()
        .get(&path)
        .cloned()
        .unwrap_or((404, b"not found".to_vec()));
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Error",
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

/// Base64 body the way the camera serves it: one line, trailing newline.
pub fn base64_body(jpeg: &[u8]) -> String {
    format!("{}\n", BASE64.encode(jpeg))
}

// ---------------------------------------------------------------------------
// Event recorder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Recorded {
    Frame(u32, u32),
    Status(String),
    Stopped(String),
    Remote(String),
}

#[derive(Clone, Default)]
pub struct Recorder {
    pub events: Arc<Mutex<Vec<Recorded>>>,
    pub records: Arc<Mutex<Vec<ImageRecord>>>,
}

impl Recorder {
    pub fn snapshot(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn frames(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|e| matches!(e, Recorded::Frame(..)))
            .count()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn stopped(&self) -> bool {
        self.snapshot()
            .iter()
            .any(|e| matches!(e, Recorded::Stopped(_)))
    }
}

impl CameraEvents for Recorder {
    fn frame(&self, frame: DisplayFrame) {
        self.events
            .lock()
            .unwrap()
            .push(Recorded::Frame(frame.width, frame.height));
    }

    fn status(&self, message: String) {
        self.events.lock().unwrap().push(Recorded::Status(message));
    }

    fn preview_stopped(&self, reason: String) {
        self.events.lock().unwrap().push(Recorded::Stopped(reason));
    }

    fn remote_image(&self, record: ImageRecord) {
        self.events
            .lock()
            .unwrap()
            .push(Recorded::Remote(record.display_name().to_string()));
        self.records.lock().unwrap().push(record);
    }
}
