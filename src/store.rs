use image::{RgbImage, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::images;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Image index {index} out of range (have {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// One loaded or captured image.
///
/// Only the provider-order pixels are stored; the display pixels are always
/// derived from them, so the two cannot diverge.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    source_path: Option<PathBuf>,
    display_name: String,
    raw: Arc<RgbImage>,
}

impl ImageRecord {
    pub fn new(source_path: Option<PathBuf>, display_name: impl Into<String>, raw: RgbImage) -> Self {
        Self {
            source_path,
            display_name: display_name.into(),
            raw: Arc::new(raw),
        }
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Pixels in provider order (RGB).
    pub fn raw_pixels(&self) -> &RgbImage {
        &self.raw
    }

    /// Shared handle on the raw pixels, for handing to a worker thread.
    pub fn raw_shared(&self) -> Arc<RgbImage> {
        Arc::clone(&self.raw)
    }

    /// Pixels in display order (RGBA).
    pub fn display_pixels(&self) -> RgbaImage {
        images::to_display_pixels(&self.raw)
    }
}

/// Ordered, append/clear-only list of images with one optional selection.
#[derive(Debug, Default)]
pub struct ImageRecordStore {
    records: Vec<ImageRecord>,
    current: Option<usize>,
}

impl ImageRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its index. The selection is unchanged.
    pub fn append(&mut self, record: ImageRecord) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.current = None;
    }

    /// Select `index`. Out of range leaves the selection untouched.
    pub fn select(&mut self, index: usize) -> Result<(), StoreError> {
        if index >= self.records.len() {
            return Err(StoreError::IndexOutOfRange {
                index,
                len: self.records.len(),
            });
        }
        self.current = Some(index);
        Ok(())
    }

    pub fn current(&self) -> Option<&ImageRecord> {
        self.current.and_then(|i| self.records.get(i))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn get(&self, index: usize) -> Option<&ImageRecord> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.iter()
    }
}
