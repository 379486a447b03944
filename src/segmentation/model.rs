//! Model-based segmentation
//!
//! Wraps an [`InferenceCapability`] and turns its per-label score maps into
//! a single foreground mask at source resolution. Every failure mode
//! (missing backend, inference error, malformed output) is reported as
//! [`PhotoError::SegmentationUnavailable`]; a partial mask is never returned.

use super::{SegmentationStrategy, StrategyKind};
use crate::{
    config::{EdgeMode, ModelConfig},
    error::{PhotoError, Result},
    inference::{InferenceCapability, LabeledMask},
    types::{ForegroundMask, Segmentation, SourceImage},
};
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use instant::Instant;
use ndarray::Array2;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Learned semantic segmentation strategy
#[derive(Clone)]
pub struct ModelSegmenter {
    inference: Option<Arc<dyn InferenceCapability>>,
    config: ModelConfig,
}

impl std::fmt::Debug for ModelSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSegmenter")
            .field("inference", &self.inference.as_ref().map(|i| i.name().to_string()))
            .field("config", &self.config)
            .finish()
    }
}

impl ModelSegmenter {
    #[must_use]
    pub fn new(inference: Arc<dyn InferenceCapability>, config: ModelConfig) -> Self {
        Self {
            inference: Some(inference),
            config,
        }
    }

    /// Segmenter without a backend; every call reports the model unavailable
    #[must_use]
    pub fn unavailable(config: ModelConfig) -> Self {
        Self {
            inference: None,
            config,
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inference.is_some()
    }

    async fn run(&self, image: &SourceImage) -> Result<ForegroundMask> {
        let inference = self.inference.as_ref().ok_or_else(|| {
            PhotoError::segmentation_unavailable("No inference capability configured")
        })?;

        let (width, height) = image.dimensions();
        let input = match inference_dimensions(width, height, self.config.max_inference_dim) {
            Some((w, h)) => {
                debug!(
                    from = ?(width, height),
                    to = ?(w, h),
                    "Downscaling input before inference"
                );
                Arc::new(imageops::resize(image.pixels(), w, h, FilterType::Triangle))
            },
            None => image.shared_pixels(),
        };

        let start = Instant::now();
        let masks = inference.infer(input).await.map_err(|e| {
            PhotoError::segmentation_unavailable(format!(
                "{} inference failed: {}",
                inference.name(),
                e
            ))
        })?;
        debug!(
            backend = inference.name(),
            masks = masks.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Inference returned"
        );

        let scores = select_foreground(&masks, &self.config.foreground_labels)?;
        let upscaled = resample_bilinear(&scores, width, height);
        threshold(&upscaled, width, height, self.config.edge_mode)
    }
}

#[async_trait]
impl SegmentationStrategy for ModelSegmenter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Model
    }

    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    async fn segment(&self, image: &SourceImage) -> Result<Segmentation> {
        match self.run(image).await {
            Ok(mask) => {
                info!(
                    foreground_ratio = mask.statistics().foreground_ratio,
                    "Model segmentation complete"
                );
                Ok(Segmentation::Mask(mask))
            },
            Err(PhotoError::SegmentationUnavailable(msg)) => {
                warn!("Model segmentation unavailable: {}", msg);
                Err(PhotoError::SegmentationUnavailable(msg))
            },
            Err(other) => {
                warn!("Model segmentation failed: {}", other);
                Err(PhotoError::segmentation_unavailable(other.to_string()))
            },
        }
    }
}

/// Target size when either side exceeds `cap`, preserving aspect ratio
#[must_use]
pub fn inference_dimensions(width: u32, height: u32, cap: u32) -> Option<(u32, u32)> {
    let longest = width.max(height);
    if longest <= cap || cap == 0 {
        return None;
    }
    let scale = f64::from(cap) / f64::from(longest);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let fit = |side: u32| ((f64::from(side) * scale).round() as u32).clamp(1, cap);
    Some((fit(width), fit(height)))
}

/// Merge the score maps of every foreground label
///
/// Labels are matched case-insensitively. When nothing matches but the
/// backend returned exactly one map, that map is taken as the foreground.
fn select_foreground(masks: &[LabeledMask], labels: &[String]) -> Result<Array2<f32>> {
    let mut selected: Vec<&LabeledMask> = masks
        .iter()
        .filter(|m| labels.iter().any(|l| l.eq_ignore_ascii_case(&m.label)))
        .collect();

    if selected.is_empty() {
        match masks {
            [only] => selected.push(only),
            [] => {
                return Err(PhotoError::segmentation_unavailable(
                    "Inference returned no masks",
                ))
            },
            _ => {
                return Err(PhotoError::segmentation_unavailable(format!(
                    "No mask for labels {:?} among {} results",
                    labels,
                    masks.len()
                )))
            },
        }
    }

    let first = &selected[0].scores;
    let shape = first.dim();
    if shape.0 == 0 || shape.1 == 0 {
        return Err(PhotoError::segmentation_unavailable("Empty score map"));
    }

    let mut merged = first.clone();
    for mask in &selected[1..] {
        if mask.scores.dim() != shape {
            return Err(PhotoError::segmentation_unavailable(format!(
                "Score maps disagree on shape: {:?} vs {:?}",
                shape,
                mask.scores.dim()
            )));
        }
        merged.zip_mut_with(&mask.scores, |a, &b| *a = a.max(b));
    }

    if merged.iter().any(|v| !v.is_finite()) {
        return Err(PhotoError::segmentation_unavailable(
            "Score map contains non-finite values",
        ));
    }
    Ok(merged)
}

/// Bilinear resample with pixel-center alignment
///
/// Source coordinate for output pixel `x` is `(x + 0.5) * src_w / dst_w - 0.5`,
/// which keeps the resampled map within half a source pixel of the original.
fn resample_bilinear(scores: &Array2<f32>, width: u32, height: u32) -> Array2<f32> {
    let (src_h, src_w) = scores.dim();
    if (src_w, src_h) == (width as usize, height as usize) {
        return scores.clone();
    }

    let axis = |dst: usize, src: usize| -> Vec<(usize, usize, f32)> {
        let ratio = src as f32 / dst as f32;
        (0..dst)
            .map(|i| {
                let pos = ((i as f32 + 0.5) * ratio - 0.5).clamp(0.0, (src - 1) as f32);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let lo = pos.floor() as usize;
                let hi = (lo + 1).min(src - 1);
                (lo, hi, pos - lo as f32)
            })
            .collect()
    };
    let xs = axis(width as usize, src_w);
    let ys = axis(height as usize, src_h);

    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        let (y0, y1, ty) = ys[y];
        let (x0, x1, tx) = xs[x];
        let top = scores[[y0, x0]] * (1.0 - tx) + scores[[y0, x1]] * tx;
        let bottom = scores[[y1, x0]] * (1.0 - tx) + scores[[y1, x1]] * tx;
        top * (1.0 - ty) + bottom * ty
    })
}

fn threshold(scores: &Array2<f32>, width: u32, height: u32, mode: EdgeMode) -> Result<ForegroundMask> {
    let data = scores
        .iter()
        .map(|&score| match mode {
            EdgeMode::Hard => {
                if score >= 0.5 {
                    255
                } else {
                    0
                }
            },
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            EdgeMode::Soft => (score.clamp(0.0, 1.0) * 255.0).round() as u8,
        })
        .collect();
    ForegroundMask::new(data, width, height)
}
