use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use shared::ImageSource;
use tempfile::NamedTempFile;

use super::s3_service::StorageError;

pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSettings {
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// JPEG written to a temporary file. The file is removed when this value is
/// dropped, whichever way the owning pipeline run ends.
#[derive(Debug)]
pub struct CompressedImage {
    file: NamedTempFile,
    pub width: u32,
    pub height: u32,
    pub byte_len: u64,
}

impl CompressedImage {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

pub fn compress(
    source: &ImageSource,
    settings: CompressionSettings,
) -> Result<CompressedImage, StorageError> {
    let image = match source {
        ImageSource::Bytes(bytes) => image::load_from_memory(bytes),
        ImageSource::Reference(path) => image::open(path),
    }
    .map_err(|e| StorageError::InvalidImage(e.to_string()))?;

    let resized = fit_within(image, settings.max_dimension).to_rgb8();
    let (width, height) = resized.dimensions();

    let mut file = tempfile::Builder::new()
        .prefix("cropdoc-")
        .suffix(".jpg")
        .tempfile()?;
    {
        let mut writer = BufWriter::new(file.as_file_mut());
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, settings.jpeg_quality.clamp(1, 100));
        encoder
            .encode_image(&resized)
            .map_err(|e| StorageError::InvalidImage(e.to_string()))?;
        writer.flush()?;
    }
    let byte_len = file.as_file().metadata()?.len();

    log::debug!(
        "Compressed image to {}x{} ({} bytes) at {}",
        width,
        height,
        byte_len,
        file.path().display()
    );

    Ok(CompressedImage {
        file,
        width,
        height,
        byte_len,
    })
}

fn fit_within(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    if image.width() <= max_dimension && image.height() <= max_dimension {
        return image;
    }
    image.resize(max_dimension, max_dimension, FilterType::Triangle)
}
