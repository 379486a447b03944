//! Inference capability abstraction
//!
//! The model-based segmenter does not know how masks are computed. It asks an
//! [`InferenceCapability`] for per-label score maps and decides which of them
//! form the subject. Backends live in [`crate::backends`].

use crate::error::Result;
use async_trait::async_trait;
use image::RgbaImage;
use ndarray::Array2;
use std::sync::Arc;

/// Per-label score map produced by a semantic segmentation model
///
/// Scores are in `[0, 1]` with shape `(height, width)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMask {
    pub label: String,
    pub scores: Array2<f32>,
}

impl LabeledMask {
    #[must_use]
    pub fn new<S: Into<String>>(label: S, scores: Array2<f32>) -> Self {
        Self {
            label: label.into(),
            scores,
        }
    }

    /// Score map dimensions as `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        let (rows, cols) = self.scores.dim();
        #[allow(clippy::cast_possible_truncation)]
        (cols as u32, rows as u32)
    }
}

/// Trait for semantic segmentation backends
#[async_trait]
pub trait InferenceCapability: Send + Sync {
    /// Backend name used in logs
    fn name(&self) -> &str;

    /// Run segmentation on an RGBA raster
    ///
    /// Returned score maps may have any resolution; the caller resamples
    /// them to the image size.
    ///
    /// # Errors
    /// - Model loading or download failures
    /// - Tensor conversion or inference failures
    async fn infer(&self, image: Arc<RgbaImage>) -> Result<Vec<LabeledMask>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labeled_mask_dimensions() {
        let mask = LabeledMask::new("person", Array2::zeros((3, 5)));
        assert_eq!(mask.dimensions(), (5, 3));
        assert_eq!(mask.label, "person");
    }
}
