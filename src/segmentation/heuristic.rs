//! Edge-color heuristic segmentation
//!
//! Assumes the photo was taken against a roughly uniform backdrop that
//! touches the image border. The backdrop color is estimated from a band
//! around the border, then every pixel is classified by its RGB distance to
//! that color on a lightly blurred working copy.

use super::{SegmentationStrategy, StrategyKind};
use crate::{
    config::{BackgroundEstimator, HeuristicConfig},
    error::{PhotoError, Result},
    types::{ForegroundMask, Segmentation, SourceImage},
};
use async_trait::async_trait;
use image::{imageops, RgbaImage};
use std::collections::HashMap;
use tracing::{debug, instrument};

const SKIN_LOWER: [u8; 3] = [60, 30, 20];
const SKIN_UPPER: [u8; 3] = [255, 220, 180];

/// Border-sampling segmenter
#[derive(Debug, Clone, Default)]
pub struct HeuristicSegmenter {
    config: HeuristicConfig,
}

impl HeuristicSegmenter {
    #[must_use]
    pub fn new(config: HeuristicConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &HeuristicConfig {
        &self.config
    }

    /// Run the full heuristic on a raster
    ///
    /// A border with no opaque pixels carries no backdrop color; the mask
    /// then follows alpha alone.
    ///
    /// # Errors
    /// - Internal mask construction failure
    pub fn segment_pixels(&self, pixels: &RgbaImage) -> Result<ForegroundMask> {
        let (width, height) = pixels.dimensions();
        let band = border_width(width, height, &self.config);
        let samples = sample_border(pixels, band);
        if samples.is_empty() {
            debug!(band, "Border is fully transparent, masking by alpha");
            return alpha_mask(pixels);
        }
        let backdrop = estimate_background(&samples, self.config.estimator)?;
        debug!(
            band,
            samples = samples.len(),
            backdrop = ?backdrop,
            "Estimated backdrop color"
        );
        classify(pixels, &backdrop, &self.config)
    }
}

#[async_trait]
impl SegmentationStrategy for HeuristicSegmenter {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Heuristic
    }

    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    async fn segment(&self, image: &SourceImage) -> Result<Segmentation> {
        let pixels = image.shared_pixels();
        let segmenter = self.clone();
        let mask = tokio::task::spawn_blocking(move || segmenter.segment_pixels(&pixels))
            .await
            .map_err(|e| PhotoError::heuristic_failed(format!("Worker task failed: {}", e)))??;
        Ok(Segmentation::Mask(mask))
    }
}

/// Width of the sampled border band in pixels
///
/// `max(min_border_px, floor(min_dim * border_fraction))`, clamped so the
/// band never exceeds half of the smaller dimension.
#[must_use]
pub fn border_width(width: u32, height: u32, config: &HeuristicConfig) -> u32 {
    let min_dim = width.min(height);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let proportional = (min_dim as f32 * config.border_fraction).floor() as u32;
    proportional
        .max(config.min_border_px)
        .min((min_dim / 2).max(1))
}

/// Collect border pixels: top and bottom bands, then the side bands
/// excluding the corners already covered
///
/// Fully transparent pixels carry no color information and are skipped.
#[must_use]
pub fn sample_border(pixels: &RgbaImage, band: u32) -> Vec<[u8; 3]> {
    let (width, height) = pixels.dimensions();
    if width == 0 || height == 0 || band == 0 {
        return Vec::new();
    }
    let band_y = band.min(height);
    let band_x = band.min(width);
    let bottom_start = height.saturating_sub(band_y).max(band_y);
    let right_start = width.saturating_sub(band_x).max(band_x);

    let mut samples = Vec::new();
    let mut push = |x: u32, y: u32| {
        let p = pixels.get_pixel(x, y);
        if p[3] > 0 {
            samples.push([p[0], p[1], p[2]]);
        }
    };

    for y in (0..band_y).chain(bottom_start..height) {
        for x in 0..width {
            push(x, y);
        }
    }
    for y in band_y..bottom_start {
        for x in (0..band_x).chain(right_start..width) {
            push(x, y);
        }
    }
    samples
}

/// Estimate backdrop colors from border samples
///
/// # Errors
/// - Empty sample set
pub fn estimate_background(
    samples: &[[u8; 3]],
    estimator: BackgroundEstimator,
) -> Result<Vec<[u8; 3]>> {
    if samples.is_empty() {
        return Err(PhotoError::heuristic_failed(
            "No border samples available to estimate the backdrop",
        ));
    }

    match estimator {
        BackgroundEstimator::Mean => {
            let mut sums = [0u64; 3];
            for sample in samples {
                for (sum, &c) in sums.iter_mut().zip(sample) {
                    *sum += u64::from(c);
                }
            }
            let n = samples.len() as u64;
            #[allow(clippy::cast_possible_truncation)]
            let mean = sums.map(|s| ((s + n / 2) / n) as u8);
            Ok(vec![mean])
        },
        BackgroundEstimator::DominantBucket { step, top_k } => {
            if step == 0 || top_k == 0 {
                return Err(PhotoError::heuristic_failed(
                    "Dominant bucket estimation needs a nonzero step and bucket count",
                ));
            }
            let mut histogram: HashMap<[u8; 3], usize> = HashMap::new();
            for sample in samples {
                *histogram.entry(sample.map(|c| quantize(c, step))).or_insert(0) += 1;
            }
            let mut buckets: Vec<([u8; 3], usize)> = histogram.into_iter().collect();
            // Ties resolve by color so the result is deterministic
            buckets.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            Ok(buckets
                .into_iter()
                .take(top_k)
                .map(|(color, _)| color)
                .collect())
        },
    }
}

/// Round a channel to the nearest multiple of `step`, saturating at 255
fn quantize(channel: u8, step: u8) -> u8 {
    let step = f32::from(step);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let value = ((f32::from(channel) / step).round() * step).min(255.0) as u8;
    value
}

fn is_skin([r, g, b]: [u8; 3]) -> bool {
    (SKIN_LOWER[0]..=SKIN_UPPER[0]).contains(&r)
        && (SKIN_LOWER[1]..=SKIN_UPPER[1]).contains(&g)
        && (SKIN_LOWER[2]..=SKIN_UPPER[2]).contains(&b)
        && r > g
        && g > b
}

fn distance(a: [u8; 3], b: [u8; 3]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = f32::from(x) - f32::from(y);
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// HSV saturation in [0, 1]
fn saturation([r, g, b]: [u8; 3]) -> f32 {
    let max = r.max(g).max(b);
    if max == 0 {
        return 0.0;
    }
    let min = r.min(g).min(b);
    f32::from(max - min) / f32::from(max)
}

/// Keep every pixel with any opacity
fn alpha_mask(pixels: &RgbaImage) -> Result<ForegroundMask> {
    let (width, height) = pixels.dimensions();
    let data = pixels
        .pixels()
        .map(|p| if p[3] == 0 { 0 } else { 255 })
        .collect();
    ForegroundMask::new(data, width, height)
        .map_err(|e| PhotoError::heuristic_failed(e.to_string()))
}

/// Produce a hard mask: 255 keeps the pixel, 0 replaces it with backdrop
///
/// Colors are read from the blurred working copy; alpha is read from the
/// untouched original.
fn classify(
    pixels: &RgbaImage,
    backdrop: &[[u8; 3]],
    config: &HeuristicConfig,
) -> Result<ForegroundMask> {
    if backdrop.is_empty() {
        return Err(PhotoError::heuristic_failed("Backdrop estimate is empty"));
    }
    let (width, height) = pixels.dimensions();
    let working = if config.blur_sigma > 0.0 {
        imageops::blur(pixels, config.blur_sigma)
    } else {
        pixels.clone()
    };
    if working.dimensions() != (width, height) {
        return Err(PhotoError::heuristic_failed(
            "Working copy dimensions differ from the source",
        ));
    }

    let backdrop_neutral = config.saturation_guard.map(|guard| {
        backdrop
            .iter()
            .all(|&color| saturation(color) <= guard)
    });

    let data: Vec<u8> = pixels
        .pixels()
        .zip(working.pixels())
        .map(|(original, blurred)| {
            if original[3] == 0 {
                return 0;
            }
            let rgb = [blurred[0], blurred[1], blurred[2]];
            if config.skin_override && is_skin(rgb) {
                return 255;
            }
            let nearest = backdrop
                .iter()
                .map(|&color| distance(rgb, color))
                .fold(f32::INFINITY, f32::min);
            if nearest >= config.tolerance {
                return 255;
            }
            match (config.saturation_guard, backdrop_neutral) {
                (Some(guard), Some(true)) if saturation(rgb) > guard => 255,
                _ => 0,
            }
        })
        .collect();

    ForegroundMask::new(data, width, height)
        .map_err(|e| PhotoError::heuristic_failed(e.to_string()))
}
