pub mod analyzer;

use shared::ImageQualityResult;

/// Runs the pixel analysis on the blocking pool so callers on the async
/// runtime are never stalled by per-pixel work.
pub async fn analyze_quality(image_bytes: Vec<u8>) -> ImageQualityResult {
    match tokio::task::spawn_blocking(move || analyzer::analyze_encoded(&image_bytes)).await {
        Ok(result) => result,
        Err(e) => {
            log::error!("Quality analysis task failed: {}", e);
            ImageQualityResult::failed("Image analysis was interrupted")
        }
    }
}
