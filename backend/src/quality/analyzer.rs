use image::{DynamicImage, RgbImage};
use shared::ImageQualityResult;

pub const MIN_WIDTH: u32 = 640;
pub const MIN_HEIGHT: u32 = 480;
pub const MIN_FOCUS_SCORE: f32 = 0.5;
pub const MIN_BRIGHTNESS: f32 = 0.3;
pub const MAX_BRIGHTNESS: f32 = 0.85;

/// Every `SAMPLE_STRIDE`-th pixel in both axes is inspected.
const SAMPLE_STRIDE: usize = 2;
const BYTES_PER_PIXEL: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum PixelAccessError {
    #[error("pixel buffer holds {actual} bytes, expected {expected} for {width}x{height} RGB")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("image has no pixels")]
    Empty,
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

struct PixelStats {
    focus_score: f32,
    brightness: f32,
}

pub fn is_resolution_ok(width: u32, height: u32) -> bool {
    width >= MIN_WIDTH && height >= MIN_HEIGHT
}

pub fn is_brightness_ok(brightness: f32) -> bool {
    (MIN_BRIGHTNESS..=MAX_BRIGHTNESS).contains(&brightness)
}

pub fn is_focus_ok(focus_score: f32) -> bool {
    focus_score >= MIN_FOCUS_SCORE
}

/// Scores a packed RGB8 buffer. Never fails: pixel access problems come back
/// as a rejected result carrying `error_message`.
pub fn analyze(pixels: &[u8], width: u32, height: u32) -> ImageQualityResult {
    match sample_stats(pixels, width, height) {
        Ok(stats) => {
            let is_resolution_ok = is_resolution_ok(width, height);
            let is_focused = is_focus_ok(stats.focus_score);
            let is_bright_enough = is_brightness_ok(stats.brightness);
            ImageQualityResult {
                is_acceptable: is_resolution_ok && is_focused && is_bright_enough,
                is_resolution_ok,
                is_focused,
                is_bright_enough,
                focus_score: stats.focus_score,
                brightness: stats.brightness,
                error_message: None,
            }
        }
        Err(e) => {
            log::warn!("Image quality analysis failed: {}", e);
            ImageQualityResult::failed(format!("Could not analyze image: {}", e))
        }
    }
}

pub fn analyze_image(image: &DynamicImage) -> ImageQualityResult {
    let rgb: RgbImage = image.to_rgb8();
    analyze(rgb.as_raw(), rgb.width(), rgb.height())
}

/// Decodes an encoded photo (JPEG, PNG, ...) and scores it.
pub fn analyze_encoded(bytes: &[u8]) -> ImageQualityResult {
    match image::load_from_memory(bytes) {
        Ok(image) => analyze_image(&image),
        Err(e) => {
            let err = PixelAccessError::from(e);
            log::warn!("Image quality analysis failed: {}", err);
            ImageQualityResult::failed(format!("Could not analyze image: {}", err))
        }
    }
}

fn sample_stats(pixels: &[u8], width: u32, height: u32) -> Result<PixelStats, PixelAccessError> {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return Err(PixelAccessError::Empty);
    }
    let expected = w
        .checked_mul(h)
        .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
        .ok_or(PixelAccessError::Empty)?;
    if pixels.len() < expected {
        return Err(PixelAccessError::BufferSize {
            width,
            height,
            expected,
            actual: pixels.len(),
        });
    }

    let mut grays = Vec::with_capacity(w.div_ceil(SAMPLE_STRIDE) * h.div_ceil(SAMPLE_STRIDE));
    for y in (0..h).step_by(SAMPLE_STRIDE) {
        let row = y * w * BYTES_PER_PIXEL;
        for x in (0..w).step_by(SAMPLE_STRIDE) {
            let i = row + x * BYTES_PER_PIXEL;
            let sum = pixels[i] as f64 + pixels[i + 1] as f64 + pixels[i + 2] as f64;
            grays.push(sum / 3.0);
        }
    }

    let n = grays.len() as f64;
    let mean = grays.iter().sum::<f64>() / n;
    let variance = grays.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / n;

    Ok(PixelStats {
        focus_score: (variance.sqrt() / 255.0) as f32,
        brightness: (mean / 255.0) as f32,
    })
}
