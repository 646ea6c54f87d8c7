// network.rs - HTTP client for ESP32-style network cameras.
//
// Peer contract (not ours to change):
//   GET /            liveness probe
//   GET /cam-lo.jpg  low resolution JPEG
//   GET /check       {"newImage": bool}
//   GET /base64      base64 text of the latest image
//   GET /reset       clears the new-image flag

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::CameraError;

pub const FRAME_PATH: &str = "cam-lo.jpg";
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A network camera endpoint. All calls block the calling thread.
pub trait CameraEndpoint: Send + Sync {
    fn base_url(&self) -> &str;
    fn probe(&self) -> Result<(), CameraError>;
    fn fetch_frame(&self) -> Result<Vec<u8>, CameraError>;
    fn has_new_image(&self) -> Result<bool, CameraError>;
    fn fetch_base64(&self) -> Result<String, CameraError>;
    fn reset_new_image(&self) -> Result<(), CameraError>;
}

/// Builds endpoints from user-entered base URLs.
pub trait EndpointConnector: Send + Sync {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn CameraEndpoint>, CameraError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckResponse {
    new_image: bool,
}

pub struct HttpCameraEndpoint {
    base_url: String,
    client: Client,
}

impl HttpCameraEndpoint {
    pub fn new(base_url: &str) -> Result<Self, CameraError> {
        let base_url = normalize_base_url(base_url);
        if base_url.is_empty() {
            return Err(CameraError::NoSourceConfigured);
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CameraError::SourceUnavailable(e.to_string()))?;
        Ok(Self { base_url, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> Result<reqwest::blocking::Response, CameraError> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| CameraError::RemoteFetchFailed(format!("GET {}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CameraError::RemoteFetchFailed(format!(
                "GET {}: HTTP {}",
                url, status
            )));
        }
        Ok(response)
    }

    fn get_text(&self, path: &str) -> Result<String, CameraError> {
        self.get(path)?
            .text()
            .map_err(|e| CameraError::RemoteFetchFailed(e.to_string()))
    }
}

impl CameraEndpoint for HttpCameraEndpoint {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn probe(&self) -> Result<(), CameraError> {
        let response = self
            .client
            .get(self.url(""))
            .timeout(PROBE_TIMEOUT)
            .send()
            .map_err(|e| CameraError::EndpointUnreachable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CameraError::EndpointUnreachable(format!(
                "probe returned HTTP {}",
                response.status()
            )))
        }
    }

    fn fetch_frame(&self) -> Result<Vec<u8>, CameraError> {
        let bytes = self
            .get(FRAME_PATH)?
            .bytes()
            .map_err(|e| CameraError::RemoteFetchFailed(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn has_new_image(&self) -> Result<bool, CameraError> {
        parse_check_body(&self.get_text("check")?)
    }

    fn fetch_base64(&self) -> Result<String, CameraError> {
        self.get_text("base64")
    }

    fn reset_new_image(&self) -> Result<(), CameraError> {
        self.get("reset").map(|_| ())
    }
}

/// Connector producing `HttpCameraEndpoint`s.
pub struct HttpConnector;

impl EndpointConnector for HttpConnector {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn CameraEndpoint>, CameraError> {
        Ok(Arc::new(HttpCameraEndpoint::new(base_url)?))
    }
}

/// `192.168.1.20` -> `http://192.168.1.20`; trailing slashes dropped.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

pub fn parse_check_body(body: &str) -> Result<bool, CameraError> {
    serde_json::from_str::<CheckResponse>(body)
        .map(|r| r.new_image)
        .map_err(|e| CameraError::RemoteFetchFailed(format!("invalid /check response: {}", e)))
}

/// Decode the `/base64` body into the encoded image bytes.
pub fn decode_base64_body(body: &str) -> Result<Vec<u8>, CameraError> {
    let compact: String = body.split_whitespace().collect();
    if compact.is_empty() {
        return Err(CameraError::DecodeFailed("empty base64 body".into()));
    }
    BASE64
        .decode(compact.as_bytes())
        .map_err(|e| CameraError::DecodeFailed(format!("invalid base64: {}", e)))
}
