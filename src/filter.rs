//! Confidence filtering of raw backend output.

use crate::detect::Detection;
use crate::error::OverlayError;

/// Keep detections scoring at least `threshold`, in their original order.
pub fn filter_by_confidence(detections: &[Detection], threshold: f32) -> Vec<Detection> {
    detections
        .iter()
        .filter(|det| det.score >= threshold)
        .cloned()
        .collect()
}

/// Accept thresholds in `0.0..=1.0`; NaN is rejected.
pub fn check_threshold(threshold: f32) -> Result<f32, OverlayError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(OverlayError::InvalidThreshold(threshold))
    }
}
