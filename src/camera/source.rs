use std::sync::Arc;
use std::time::Duration;

use super::local::DeviceSlot;
use super::network::{CameraEndpoint, EndpointConnector};
use super::{CameraError, CameraSource, Frame};

/// An opened camera: either the shared local device or a network endpoint.
///
/// Network sources hold no connection; every read is an independent GET.
#[derive(Clone)]
pub enum FrameSource {
    Local { slot: DeviceSlot, device_id: u32 },
    Network { endpoint: Arc<dyn CameraEndpoint> },
}

impl FrameSource {
    /// Open (or reuse) the local device, closing any other open device first.
    pub fn open_local(slot: &DeviceSlot, device_id: u32) -> Result<Self, CameraError> {
        slot.open(device_id)?;
        Ok(FrameSource::Local {
            slot: slot.clone(),
            device_id,
        })
    }

    /// Wrap a network endpoint. Only validates; nothing is fetched.
    pub fn open_network(endpoint: Arc<dyn CameraEndpoint>) -> Result<Self, CameraError> {
        if endpoint.base_url().is_empty() {
            return Err(CameraError::NoSourceConfigured);
        }
        Ok(FrameSource::Network { endpoint })
    }

    /// Blocking read of the next frame.
    ///
    /// Local failures come back as `DeviceReadFailed`, network failures
    /// (including undecodable bodies) as `RemoteFetchFailed`.
    pub fn read_frame(&self) -> Result<Frame, CameraError> {
        match self {
            FrameSource::Local { slot, device_id } => slot.read_frame(*device_id),
            FrameSource::Network { endpoint } => {
                let jpeg = endpoint.fetch_frame()?;
                Frame::decode(jpeg).map_err(|e| CameraError::RemoteFetchFailed(e.to_string()))
            }
        }
    }

    /// Release the local device if this source still owns it.
    pub fn close(self) {
        if let FrameSource::Local { slot, device_id } = self {
            if slot.open_device() == Some(device_id) {
                slot.close();
            }
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, FrameSource::Local { .. })
    }

    pub fn source(&self) -> CameraSource {
        match self {
            FrameSource::Local { device_id, .. } => CameraSource::Local {
                device_id: *device_id,
            },
            FrameSource::Network { endpoint } => CameraSource::Network {
                base_url: endpoint.base_url().to_string(),
            },
        }
    }

    pub fn cadence(&self) -> Duration {
        self.source().cadence()
    }
}

/// Everything needed to turn a `CameraSource` into a `FrameSource`.
#[derive(Clone)]
pub struct SourceOpener {
    slot: DeviceSlot,
    connector: Arc<dyn EndpointConnector>,
}

impl SourceOpener {
    pub fn new(slot: DeviceSlot, connector: Arc<dyn EndpointConnector>) -> Self {
        Self { slot, connector }
    }

    pub fn slot(&self) -> &DeviceSlot {
        &self.slot
    }

    pub fn connector(&self) -> &Arc<dyn EndpointConnector> {
        &self.connector
    }

    pub fn open(&self, source: &CameraSource) -> Result<FrameSource, CameraError> {
        match source {
            CameraSource::Local { device_id } => FrameSource::open_local(&self.slot, *device_id),
            CameraSource::Network { base_url } => {
                FrameSource::open_network(self.connector.connect(base_url)?)
            }
        }
    }
}
