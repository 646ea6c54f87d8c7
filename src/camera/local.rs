// local.rs - Local camera devices and the single process-wide device slot.
//
// Only one local device handle may be open at a time. `DeviceSlot` owns it
// behind a mutex and is cloned into the preview loop and capture workers,
// so both share the same handle instead of opening a second one.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{CameraError, Frame};

/// Frames discarded right after opening a device; the first frames off most
/// webcams are under-exposed.
pub const WARMUP_FRAMES: usize = 5;

/// An open local camera.
pub trait LocalDevice: Send {
    /// Blocking read of the next JPEG-encoded frame.
    fn read_jpeg(&mut self) -> Result<Vec<u8>, CameraError>;
}

/// Opens local cameras by numeric id. Dropping the returned device closes it.
pub trait DeviceBackend: Send + Sync {
    fn open(&self, device_id: u32) -> Result<Box<dyn LocalDevice>, CameraError>;
}

struct OpenDevice {
    device_id: u32,
    device: Box<dyn LocalDevice>,
}

/// Owner of the one local device handle.
#[derive(Clone)]
pub struct DeviceSlot {
    backend: Arc<dyn DeviceBackend>,
    inner: Arc<Mutex<Option<OpenDevice>>>,
}

impl DeviceSlot {
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self {
            backend,
            inner: Arc::new(Mutex::new(None)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<OpenDevice>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make `device_id` the open device.
    ///
    /// Already open with the same id: no-op, the handle is reused. Otherwise
    /// the previously open device is closed before the new one is opened,
    /// then `WARMUP_FRAMES` frames are read and thrown away.
    pub fn open(&self, device_id: u32) -> Result<(), CameraError> {
        let mut slot = self.lock();
        if let Some(open) = slot.as_ref() {
            if open.device_id == device_id {
                return Ok(());
            }
        }
        if let Some(old) = slot.take() {
            log::info!("Closing camera {} before opening camera {}", old.device_id, device_id);
            drop(old);
        }

        let mut device = self.backend.open(device_id)?;
        for i in 0..WARMUP_FRAMES {
            if let Err(e) = device.read_jpeg() {
                log::debug!("Warm-up frame {} from camera {} failed: {}", i, device_id, e);
            }
        }
        log::info!("Camera {} opened", device_id);
        *slot = Some(OpenDevice { device_id, device });
        Ok(())
    }

    /// Read one frame from `device_id`, which must be the open device.
    pub fn read_frame(&self, device_id: u32) -> Result<Frame, CameraError> {
        self.read_fresh_frame(device_id, 0)
    }

    /// Read one frame after discarding `discard` buffered ones. The lock is
    /// held across all reads so a running preview cannot interleave.
    ///
    /// Fails when another device has taken the slot since `device_id` was
    /// opened.
    pub fn read_fresh_frame(&self, device_id: u32, discard: usize) -> Result<Frame, CameraError> {
        let mut slot = self.lock();
        let open = slot
            .as_mut()
            .ok_or_else(|| CameraError::DeviceReadFailed("camera not opened".into()))?;
        if open.device_id != device_id {
            return Err(CameraError::DeviceReadFailed(format!(
                "camera {} no longer open",
                device_id
            )));
        }
        for _ in 0..discard {
            open.device.read_jpeg()?;
        }
        let jpeg = open.device.read_jpeg()?;
        Frame::decode(jpeg).map_err(|e| CameraError::DeviceReadFailed(e.to_string()))
    }

    /// Release the device handle, if any.
    pub fn close(&self) {
        if let Some(old) = self.lock().take() {
            log::info!("Camera {} released", old.device_id);
        }
    }

    pub fn open_device(&self) -> Option<u32> {
        self.lock().as_ref().map(|open| open.device_id)
    }

    pub fn is_open(&self) -> bool {
        self.open_device().is_some()
    }
}

/// Backend used when no local camera support is compiled in.
pub struct UnavailableBackend;

impl DeviceBackend for UnavailableBackend {
    fn open(&self, device_id: u32) -> Result<Box<dyn LocalDevice>, CameraError> {
        Err(CameraError::DeviceUnavailable {
            device_id,
            reason: "built without local camera support (enable the `v4l` feature)".into(),
        })
    }
}

/// The local camera backend for this build.
pub fn default_backend() -> Arc<dyn DeviceBackend> {
    #[cfg(all(target_os = "linux", feature = "v4l"))]
    {
        Arc::new(v4l_backend::V4lBackend)
    }
    #[cfg(not(all(target_os = "linux", feature = "v4l")))]
    {
        Arc::new(UnavailableBackend)
    }
}

#[cfg(all(target_os = "linux", feature = "v4l"))]
mod v4l_backend {
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream;
    use v4l::io::traits::CaptureStream;
    use v4l::video::Capture;
    use v4l::{Device, FourCC};

    use super::{CameraError, LocalDevice};

    const BUFFER_COUNT: u32 = 4;

    pub struct V4lBackend;

    // Field order matters: the stream is dropped before the device.
    struct V4lDevice {
        stream: Stream<'static>,
        _device: Device,
    }

    impl super::DeviceBackend for V4lBackend {
        fn open(&self, device_id: u32) -> Result<Box<dyn LocalDevice>, CameraError> {
            let unavailable = |reason: String| CameraError::DeviceUnavailable { device_id, reason };

            let device = Device::new(device_id as usize).map_err(|e| unavailable(e.to_string()))?;
            let mut format = device.format().map_err(|e| unavailable(e.to_string()))?;
            format.fourcc = FourCC::new(b"MJPG");
            let format = device
                .set_format(&format)
                .map_err(|e| unavailable(e.to_string()))?;
            if format.fourcc != FourCC::new(b"MJPG") {
                return Err(unavailable(format!(
                    "device does not deliver MJPG (got {})",
                    format.fourcc
                )));
            }

            let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
                .map_err(|e| unavailable(format!("failed to create capture stream: {e}")))?;
            log::debug!(
                "V4L2 device {} streaming {}x{} MJPG",
                device_id,
                format.width,
                format.height
            );
            Ok(Box::new(V4lDevice {
                stream,
                _device: device,
            }))
        }
    }

    impl LocalDevice for V4lDevice {
        fn read_jpeg(&mut self) -> Result<Vec<u8>, CameraError> {
            let (data, _meta) = self
                .stream
                .next()
                .map_err(|e| CameraError::DeviceReadFailed(e.to_string()))?;
            Ok(data.to_vec())
        }
    }
}
