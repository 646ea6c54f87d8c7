/// The `camera` module covers frame acquisition for the analyzer: local
/// devices, ESP32-style network cameras, the live preview loop, one-shot
/// capture and the new-image subscription.
pub mod capture;
pub mod local;
pub mod network;
pub mod preview;
pub mod source;
pub mod subscription;
pub mod types;

pub use capture::{capture, CaptureOptions};
pub use local::{DeviceBackend, DeviceSlot, LocalDevice};
pub use network::{CameraEndpoint, EndpointConnector, HttpCameraEndpoint, HttpConnector};
pub use preview::{PreviewLoop, PreviewState};
pub use source::{FrameSource, SourceOpener};
pub use subscription::{Subscription, SubscriptionDirs};
pub use types::*;
