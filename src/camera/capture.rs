use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};

use super::{CameraError, CameraSource, Frame, SourceOpener};
use crate::store::ImageRecord;

/// Frames thrown away before a local capture so a stale buffered frame is
/// not returned.
pub const CAPTURE_DISCARD_FRAMES: usize = 3;

/// Filename format for captures. One-second resolution: two captures in the
/// same second share a name unless `disambiguate` is set.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub dir: PathBuf,
    /// Append `_1`, `_2`, ... instead of overwriting a same-second capture.
    pub disambiguate: bool,
}

impl CaptureOptions {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            disambiguate: false,
        }
    }
}

pub fn capture_filename(now: &DateTime<Local>) -> String {
    format!("camera_{}.jpg", now.format(TIMESTAMP_FORMAT))
}

/// Grab one frame from `source`, write it under `options.dir` and return the
/// new record.
///
/// A local source reuses the shared device handle if it is already open
/// (for example by a running preview) and does not close it afterwards;
/// releasing an idle handle is the caller's decision.
pub fn capture(
    opener: &SourceOpener,
    source: Option<&CameraSource>,
    options: &CaptureOptions,
) -> Result<ImageRecord, CameraError> {
    let source = source.ok_or(CameraError::NoSourceConfigured)?;

    let frame = match source {
        CameraSource::Local { device_id } => {
            opener.slot().open(*device_id)?;
            opener.slot().read_fresh_frame(*device_id, CAPTURE_DISCARD_FRAMES)?
        }
        CameraSource::Network { .. } => opener.open(source)?.read_frame()?,
    };

    persist(frame, options, source)
}

fn persist(frame: Frame, options: &CaptureOptions, source: &CameraSource) -> Result<ImageRecord, CameraError> {
    fs::create_dir_all(&options.dir)?;
    let path = target_path(&options.dir, &capture_filename(&Local::now()), options.disambiguate);
    fs::write(&path, &frame.jpeg)?;
    log::info!("Captured {} from {}", path.display(), source);

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ImageRecord::new(Some(path), name, frame.image))
}

pub(crate) fn target_path(dir: &Path, file_name: &str, disambiguate: bool) -> PathBuf {
    let path = dir.join(file_name);
    if !disambiguate || !path.exists() {
        return path;
    }
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{}", ext)),
        None => (file_name, String::new()),
    };
    (1u32..)
        .map(|n| dir.join(format!("{}_{}{}", stem, n, ext)))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}
