use image::RgbImage;
use std::time::Duration;

use crate::images;
use crate::store::ImageRecord;

/// Error type for camera, network camera and image decoding operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Camera {device_id} unavailable: {reason}")]
    DeviceUnavailable { device_id: u32, reason: String },
    #[error("Camera read failed: {0}")]
    DeviceReadFailed(String),
    #[error("Network camera fetch failed: {0}")]
    RemoteFetchFailed(String),
    #[error("Endpoint unreachable: {0}")]
    EndpointUnreachable(String),
    #[error("Could not decode image: {0}")]
    DecodeFailed(String),
    #[error("No camera source configured")]
    NoSourceConfigured,
    #[error("Camera source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which physical camera frames come from. Exactly one is active at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSource {
    Local { device_id: u32 },
    Network { base_url: String },
}

impl CameraSource {
    pub fn is_local(&self) -> bool {
        matches!(self, CameraSource::Local { .. })
    }

    /// Advisory preview cadence: 30 fps for local devices, 10 fps for network cameras.
    pub fn cadence(&self) -> Duration {
        match self {
            CameraSource::Local { .. } => Duration::from_millis(1000 / 30),
            CameraSource::Network { .. } => Duration::from_millis(1000 / 10),
        }
    }
}

impl std::fmt::Display for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraSource::Local { device_id } => write!(f, "camera {}", device_id),
            CameraSource::Network { base_url } => write!(f, "{}", base_url),
        }
    }
}

/// One frame off a camera: the JPEG bytes as delivered plus the decoded pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub image: RgbImage,
}

impl Frame {
    pub fn decode(jpeg: Vec<u8>) -> Result<Self, CameraError> {
        let image = images::decode_image(&jpeg)?;
        Ok(Self { jpeg, image })
    }
}

/// Receiver for everything the background camera loops produce.
///
/// Implementations must only hand values off (post to a queue); they are
/// called from the loop's own thread and must never touch UI state.
pub trait CameraEvents: Send + 'static {
    /// A preview frame, already fitted to the display bound.
    fn frame(&self, frame: images::DisplayFrame);
    /// A human-readable status line.
    fn status(&self, message: String);
    /// The preview loop ended on its own (terminal device failure).
    fn preview_stopped(&self, reason: String);
    /// The subscription loop downloaded a new image.
    fn remote_image(&self, record: ImageRecord);
}
