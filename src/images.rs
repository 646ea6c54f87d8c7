// images.rs - Decoding, fitting, JPEG/base64 encoding and file loading.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage, RgbaImage};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::camera::CameraError;
use crate::store::ImageRecord;

/// Display bound for previews and selected images.
pub const DISPLAY_MAX_WIDTH: u32 = 500;
pub const DISPLAY_MAX_HEIGHT: u32 = 400;

/// JPEG quality used when sending images to a provider.
pub const PROVIDER_JPEG_QUALITY: u8 = 90;

/// Maximum number of images picked by a random dataset load.
pub const RANDOM_SAMPLE_SIZE: usize = 20;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

// ── Display frames ──────────────────────────────────────────────────────
/// A decoded image ready for the display sink.
#[derive(Debug, Clone)]
pub struct DisplayFrame {
    pub pixels: RgbaImage,
    pub width: u32,
    pub height: u32,
}

impl DisplayFrame {
    pub fn from_image(image: &RgbImage) -> Self {
        let pixels = to_display_pixels(image);
        let (width, height) = pixels.dimensions();
        Self {
            pixels,
            width,
            height,
        }
    }
}

/// The one fixed transform from provider order (RGB) to display order
/// (RGBA, opaque).
pub fn to_display_pixels(raw: &RgbImage) -> RgbaImage {
    RgbaImage::from_fn(raw.width(), raw.height(), |x, y| {
        let [r, g, b] = raw.get_pixel(x, y).0;
        image::Rgba([r, g, b, 255])
    })
}

/// Downscale to fit within `max_w` x `max_h`, keeping the aspect ratio.
/// Images already inside the bound are returned unchanged.
pub fn fit_within(img: &RgbImage, max_w: u32, max_h: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    if w <= max_w && h <= max_h {
        return img.clone();
    }
    let scale = (max_w as f64 / w as f64).min(max_h as f64 / h as f64);
    let new_w = ((w as f64 * scale) as u32).max(1);
    let new_h = ((h as f64 * scale) as u32).max(1);
    imageops::resize(img, new_w, new_h, imageops::FilterType::Triangle)
}

// ── Encoding ────────────────────────────────────────────────────────────
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, CameraError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| CameraError::DecodeFailed(e.to_string()))
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut jpeg_buf: Vec<u8> = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg_buf, quality);
    encoder.encode(
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg_buf)
}

/// JPEG (quality 90) then base64, the form every provider accepts.
pub fn encode_for_provider(img: &RgbImage) -> Result<String, image::ImageError> {
    Ok(BASE64.encode(encode_jpeg(img, PROVIDER_JPEG_QUALITY)?))
}

// ── Files ───────────────────────────────────────────────────────────────
pub fn load_image(path: &Path) -> Result<ImageRecord, CameraError> {
    let bytes = std::fs::read(path)?;
    let image = decode_image(&bytes)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(ImageRecord::new(Some(path.to_path_buf()), name, image))
}

/// Load every readable image; failures are logged and skipped.
pub fn load_images(paths: &[PathBuf]) -> Vec<ImageRecord> {
    paths
        .iter()
        .filter_map(|path| match load_image(path) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// All image files below the given directories. Missing directories are ignored.
pub fn find_dataset_images(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = dirs
        .iter()
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(Result::ok))
        .filter(|entry| entry.file_type().is_file() && has_image_extension(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    // nested dataset dirs are walked twice
    found.sort();
    found.dedup();
    found
}

/// Up to `max` paths picked at random.
pub fn sample_paths(paths: Vec<PathBuf>, max: usize) -> Vec<PathBuf> {
    if paths.len() <= max {
        return paths;
    }
    fastrand::choose_multiple(paths, max)
}
