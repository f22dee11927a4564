use docscan_core::PreprocessConfig;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageBuffer, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;
use thiserror::Error;

/// Largest working surface the binarizer will allocate (RGBA bytes).
pub const MAX_SURFACE_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Cannot allocate a {width}x{height} drawing surface")]
    Surface { width: u32, height: u32 },
    #[error("Failed to encode processed image: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressOptions {
    pub max_dimension: u32,
    pub max_bytes: usize,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self { max_dimension: 500, max_bytes: 2 * 1024 * 1024 }
    }
}

/// Which optional steps run before OCR. `None` disables a step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreprocessOptions {
    pub threshold: Option<f64>,
    pub compress: Option<CompressOptions>,
}

impl PreprocessOptions {
    pub fn is_passthrough(&self) -> bool {
        self.threshold.is_none() && self.compress.is_none()
    }
}

impl From<&PreprocessConfig> for PreprocessOptions {
    fn from(cfg: &PreprocessConfig) -> Self {
        Self {
            threshold: cfg.binarize.then_some(cfg.threshold),
            compress: cfg.compress.then_some(CompressOptions {
                max_dimension: cfg.max_dimension,
                max_bytes: cfg.max_bytes,
            }),
        }
    }
}

// ── Binarization ──────────────────────────────────────────────────────────────

/// Weighted luminance `0.30 R + 0.59 G + 0.11 B` in hundredths, computed exactly.
fn luminance_hundredths(r: u8, g: u8, b: u8) -> u32 {
    30 * u32::from(r) + 59 * u32::from(g) + 11 * u32::from(b)
}

pub fn luminance(r: u8, g: u8, b: u8) -> f64 {
    f64::from(luminance_hundredths(r, g, b)) / 100.0
}

fn binarize_pixel(Rgba([r, g, b, a]): Rgba<u8>, threshold: f64) -> Rgba<u8> {
    let v = if f64::from(luminance_hundredths(r, g, b)) >= threshold * 100.0 { 255 } else { 0 };
    Rgba([v, v, v, a])
}

/// Two-tone copy of `image`: white where luminance >= `threshold`, black elsewhere.
/// Alpha is copied unchanged.
pub fn binarize_rgba(image: &RgbaImage, threshold: f64) -> RgbaImage {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        binarize_pixel(*image.get_pixel(x, y), threshold)
    })
}

/// Binarize any decoded image onto a freshly allocated RGBA surface.
pub fn binarize(image: &DynamicImage, threshold: f64) -> Result<RgbaImage, PreprocessError> {
    let (width, height) = image.dimensions();
    let mut surface = allocate_surface(width, height)?;
    for (x, y, px) in image.pixels() {
        surface.put_pixel(x, y, binarize_pixel(px, threshold));
    }
    Ok(surface)
}

/// Decode, binarize and re-encode as PNG.
pub fn binarize_bytes(data: &[u8], threshold: f64) -> Result<Vec<u8>, PreprocessError> {
    let img = image::load_from_memory(data)?;
    let binary = binarize(&img, threshold)?;
    encode_as_png(&DynamicImage::ImageRgba8(binary))
}

fn allocate_surface(width: u32, height: u32) -> Result<RgbaImage, PreprocessError> {
    let err = || PreprocessError::Surface { width, height };
    let bytes = u64::from(width) * u64::from(height) * 4;
    if bytes > MAX_SURFACE_BYTES {
        return Err(err());
    }
    let len = usize::try_from(bytes).map_err(|_| err())?;
    RgbaImage::from_raw(width, height, vec![0u8; len]).ok_or_else(err)
}

// ── Compression ───────────────────────────────────────────────────────────────

/// Shrink so neither side exceeds `max_dimension`, keeping the aspect ratio.
pub fn downscale(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    if max_dimension == 0 || (image.width() <= max_dimension && image.height() <= max_dimension) {
        return image;
    }
    image.resize(max_dimension, max_dimension, FilterType::Lanczos3)
}

/// Downscale, then encode under `max_bytes`: PNG if it fits, otherwise JPEG at
/// falling quality. Returns the last attempt when nothing fits.
pub fn compress(image: &DynamicImage, opts: &CompressOptions) -> Result<Vec<u8>, PreprocessError> {
    let resized = downscale(image.clone(), opts.max_dimension);
    let png = encode_as_png(&resized)?;
    if png.len() <= opts.max_bytes {
        return Ok(png);
    }

    let rgb = resized.to_rgb8();
    let mut last = png;
    for quality in (30..=90u8).rev().step_by(10) {
        let jpeg = encode_as_jpeg(&rgb, quality)?;
        tracing::debug!(quality, size = jpeg.len(), "JPEG compression attempt");
        if jpeg.len() <= opts.max_bytes {
            return Ok(jpeg);
        }
        last = jpeg;
    }
    tracing::warn!(max_bytes = opts.max_bytes, size = last.len(), "Image still above size cap");
    Ok(last)
}

// ── Composition ───────────────────────────────────────────────────────────────

/// Apply the enabled steps (compress, then binarize) and return image bytes for
/// OCR. With every step disabled the input is returned untouched.
pub fn prepare_for_ocr(data: &[u8], opts: &PreprocessOptions) -> Result<Vec<u8>, PreprocessError> {
    if opts.is_passthrough() {
        return Ok(data.to_vec());
    }

    let compressed = match &opts.compress {
        Some(c) => Some(compress(&image::load_from_memory(data)?, c)?),
        None => None,
    };

    match opts.threshold {
        Some(threshold) => binarize_bytes(compressed.as_deref().unwrap_or(data), threshold),
        None => Ok(compressed.unwrap_or_else(|| data.to_vec())),
    }
}

fn encode_as_png(img: &DynamicImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}

fn encode_as_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(img)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}
