use crate::error::AppError;
use base64::Engine;
use image::codecs::png::{CompressionType, PngEncoder};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageEncoder, ImageReader};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Extensions offered by the file picker and accepted by `select_image`.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub const THUMBNAIL_SIZE: u32 = 150;

const CROP_PCT: f32 = 0.875;

// ImageNet normalization constants
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMode {
    /// Resize straight to `size` x `size`, ignoring aspect ratio
    Stretch,
    /// Resize the shortest edge to `size / 0.875`, then center crop
    CenterCrop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `(x / 255 - mean) / std` with the ImageNet statistics
    ImageNet,
    /// `x / 127.5 - 1`, the Keras MobileNetV2 convention
    MobileNetV2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    Nchw,
    Nhwc,
}

/// Shape and value range the classification model expects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(default = "default_size")]
    pub size: u32,
    #[serde(default = "default_resize")]
    pub resize: ResizeMode,
    #[serde(default = "default_normalization")]
    pub normalization: Normalization,
    #[serde(default = "default_layout")]
    pub layout: TensorLayout,
}

fn default_size() -> u32 {
    224
}
fn default_resize() -> ResizeMode {
    ResizeMode::Stretch
}
fn default_normalization() -> Normalization {
    Normalization::ImageNet
}
fn default_layout() -> TensorLayout {
    TensorLayout::Nchw
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            size: default_size(),
            resize: default_resize(),
            normalization: default_normalization(),
            layout: default_layout(),
        }
    }
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn decode(path: &Path) -> Result<DynamicImage, AppError> {
    ImageReader::open(path)
        .map_err(|e| AppError::image(format!("Failed to open image {}: {}", path.display(), e)))?
        .with_guessed_format()
        .map_err(|e| AppError::image(format!("Failed to read image {}: {}", path.display(), e)))?
        .decode()
        .map_err(|e| AppError::image(format!("Failed to decode image {}: {}", path.display(), e)))
}

/// Decodes `path` and turns it into a batch-of-one tensor matching `spec`.
pub fn load_model_input(path: &Path, spec: &InputSpec) -> Result<Array4<f32>, AppError> {
    let img = decode(path)?;
    debug!(
        "Loaded {} ({}x{}) for classification",
        path.display(),
        img.width(),
        img.height()
    );
    image_to_tensor(&img, spec)
}

pub fn image_to_tensor(img: &DynamicImage, spec: &InputSpec) -> Result<Array4<f32>, AppError> {
    let size = spec.size;
    let square = match spec.resize {
        ResizeMode::Stretch => img.resize_exact(size, size, FilterType::Triangle),
        ResizeMode::CenterCrop => center_crop(img, size),
    };
    let rgb = square.to_rgb8();

    // Pass 1: normalize pixels sequentially, keeping HWC order.
    let raw = rgb.into_raw();
    let hw = (size * size) as usize;
    let mut interleaved = vec![0f32; 3 * hw];
    for (i, pixel) in raw.chunks_exact(3).enumerate() {
        let off = i * 3;
        for c in 0..3 {
            interleaved[off + c] = normalize(pixel[c], c, spec.normalization);
        }
    }

    let side = size as usize;
    let tensor = match spec.layout {
        TensorLayout::Nhwc => Array4::from_shape_vec((1, side, side, 3), interleaved),
        TensorLayout::Nchw => {
            // Pass 2: transpose HWC -> CHW in tiles so the source and all three
            // destination planes stay in L1.
            let mut data = vec![0f32; 3 * hw];
            const TILE: usize = 1024;
            for base in (0..hw).step_by(TILE) {
                let end = (base + TILE).min(hw);
                for i in base..end {
                    let src = i * 3;
                    data[i] = interleaved[src];
                    data[hw + i] = interleaved[src + 1];
                    data[2 * hw + i] = interleaved[src + 2];
                }
            }
            Array4::from_shape_vec((1, 3, side, side), data)
        }
    }
    .map_err(|e| AppError::image(format!("Failed to create tensor: {}", e)))?;

    Ok(tensor)
}

fn center_crop(img: &DynamicImage, crop_size: u32) -> DynamicImage {
    let resize_size = (crop_size as f32 / CROP_PCT).ceil() as u32;
    let (w, h) = (img.width().max(1), img.height().max(1));
    let (new_w, new_h) = if w < h {
        (resize_size, ((h as f32 / w as f32) * resize_size as f32).round() as u32)
    } else {
        (((w as f32 / h as f32) * resize_size as f32).round() as u32, resize_size)
    };
    let resized = img.resize_exact(new_w, new_h, FilterType::Triangle);

    let crop_x = (new_w.saturating_sub(crop_size)) / 2;
    let crop_y = (new_h.saturating_sub(crop_size)) / 2;
    resized.crop_imm(crop_x, crop_y, crop_size, crop_size)
}

#[inline]
fn normalize(value: u8, channel: usize, normalization: Normalization) -> f32 {
    match normalization {
        Normalization::ImageNet => (value as f32 / 255.0 - MEAN[channel]) / STD[channel],
        Normalization::MobileNetV2 => value as f32 / 127.5 - 1.0,
    }
}

/// Thumbnail for the "Selected Image" panel as a PNG data URL. Aspect ratio is kept.
pub fn thumbnail_data_url(path: &Path, max_edge: u32) -> Result<String, AppError> {
    let img = decode(path)?;
    let thumb = img.thumbnail(max_edge, max_edge).to_rgba8();

    let mut png_bytes = Vec::new();
    PngEncoder::new_with_quality(
        &mut png_bytes,
        CompressionType::Fast,
        image::codecs::png::FilterType::NoFilter,
    )
    .write_image(thumb.as_raw(), thumb.width(), thumb.height(), ColorType::Rgba8.into())
    .map_err(|e| AppError::image(e.to_string()))?;

    Ok(to_data_url("image/png", &png_bytes))
}

/// Reads a decorative asset. Anything short of a readable image is logged and skipped.
pub fn load_asset(dir: &Path, file_name: &str) -> Option<String> {
    let path = dir.join(file_name);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Image file '{}' not found.", file_name);
            return None;
        }
        Err(e) => {
            warn!("An error occurred while loading '{}': {}", file_name, e);
            return None;
        }
    };

    match image::guess_format(&bytes) {
        Ok(format) => Some(to_data_url(format.to_mime_type(), &bytes)),
        Err(e) => {
            warn!("'{}' is not a recognised image: {}", file_name, e);
            None
        }
    }
}

fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{};base64,{}", mime, b64)
}
