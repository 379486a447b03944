//! Configuration types for ID-photo preparation
//!
//! [`PhotoRequirements`] is the read-only compliance record shared with the
//! uploader UI. [`PipelineConfig`] carries every tunable the orchestrator
//! needs and is passed in at construction time; nothing here is read from
//! ambient process state.

use crate::capability::CapabilityTier;
use crate::error::{PhotoError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Opaque RGB color used for the replacement backdrop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundColor(pub [u8; 3]);

impl BackgroundColor {
    pub const WHITE: Self = Self([255, 255, 255]);

    /// Parse a `#RRGGBB` hex string
    ///
    /// # Errors
    /// - Missing `#` prefix, wrong length or non-hex digits
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex
            .strip_prefix('#')
            .filter(|d| d.len() == 6)
            .ok_or_else(|| {
                PhotoError::invalid_config(format!("Expected #RRGGBB color, got '{}'", hex))
            })?;

        let channel = |range: std::ops::Range<usize>| {
            digits
                .get(range)
                .and_then(|d| u8::from_str_radix(d, 16).ok())
                .ok_or_else(|| PhotoError::invalid_config(format!("Invalid hex color '{}'", hex)))
        };

        Ok(Self([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
    }

    #[must_use]
    pub fn to_hex(self) -> String {
        let [r, g, b] = self.0;
        format!("#{:02X}{:02X}{:02X}", r, g, b)
    }

    /// Fully opaque RGBA pixel for this color
    #[must_use]
    pub fn rgba(self) -> image::Rgba<u8> {
        let [r, g, b] = self.0;
        image::Rgba([r, g, b, 255])
    }
}

/// Fixed compliance requirements for the output photo
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhotoRequirements {
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Minimum acceptable head height in pixels
    pub min_head_height: u32,
    /// Maximum acceptable head height in pixels
    pub max_head_height: u32,
    /// Backdrop color written for every background pixel
    pub background_color: BackgroundColor,
    /// Maximum accepted input size in kilobytes
    pub max_file_size_kb: u64,
    /// Accepted input MIME types
    pub allowed_file_types: &'static [&'static str],
}

/// 2x2 inches at 300 DPI on a pure white backdrop
pub const PHOTO_REQUIREMENTS: PhotoRequirements = PhotoRequirements {
    width: 600,
    height: 600,
    min_head_height: 300,
    max_head_height: 414,
    background_color: BackgroundColor::WHITE,
    max_file_size_kb: 4048,
    allowed_file_types: &["image/jpeg", "image/png", "image/jpg"],
};

impl PhotoRequirements {
    #[must_use]
    pub fn is_allowed_mime(&self, mime_type: &str) -> bool {
        self.allowed_file_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
    }

    #[must_use]
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_kb * 1024
    }

    /// Head height bounds as whole percentages of the output height
    #[must_use]
    pub fn head_height_percent_range(&self) -> (u32, u32) {
        let height = f64::from(self.height.max(1));
        let pct = |px: u32| (f64::from(px) / height * 100.0).round() as u32;
        (pct(self.min_head_height), pct(self.max_head_height))
    }
}

impl Default for PhotoRequirements {
    fn default() -> Self {
        PHOTO_REQUIREMENTS
    }
}

/// How the heuristic segmenter estimates the backdrop color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackgroundEstimator {
    /// Arithmetic mean of all border samples
    Mean,
    /// Most frequent quantized color buckets among border samples
    DominantBucket {
        /// Channel quantization step
        step: u8,
        /// Number of highest-frequency buckets kept as backdrop colors
        top_k: usize,
    },
}

impl Default for BackgroundEstimator {
    fn default() -> Self {
        Self::DominantBucket { step: 10, top_k: 1 }
    }
}

/// Tunables for the edge-color segmenter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicConfig {
    /// RGB distance below which a pixel counts as backdrop
    pub tolerance: f32,
    /// Border band as a fraction of the smaller image dimension
    pub border_fraction: f32,
    /// Lower bound for the border band in pixels
    pub min_border_px: u32,
    pub estimator: BackgroundEstimator,
    /// Keep skin-toned pixels regardless of backdrop distance
    pub skin_override: bool,
    /// Keep pixels more saturated than this when the backdrop is neutral
    pub saturation_guard: Option<f32>,
    /// Gaussian sigma for the classification working copy (0 disables)
    pub blur_sigma: f32,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            tolerance: 30.0,
            border_fraction: 0.05,
            min_border_px: 10,
            estimator: BackgroundEstimator::default(),
            skin_override: true,
            saturation_guard: Some(0.2),
            blur_sigma: 1.0,
        }
    }
}

/// Mask edge scheme used by the model-based segmenter for the whole image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EdgeMode {
    /// Binary mask thresholded at 0.5
    #[default]
    Hard,
    /// Alpha proportional to the foreground score
    Soft,
}

/// Settings for the model-based segmenter and its inference capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hugging Face repository identifier
    pub model_id: String,
    /// ONNX weights path inside the repository
    pub weights_file: String,
    /// Inputs larger than this on either side are downscaled before inference
    pub max_inference_dim: u32,
    pub edge_mode: EdgeMode,
    /// Labels whose masks count as subject
    pub foreground_labels: Vec<String>,
    /// Square model input resolution
    pub input_size: u32,
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
    /// Keep downloaded model files between runs
    pub cache_enabled: bool,
    /// Cache location override
    pub cache_dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: "Xenova/segformer-b0-finetuned-ade-512-512".to_string(),
            weights_file: "onnx/model.onnx".to_string(),
            max_inference_dim: 1024,
            edge_mode: EdgeMode::Hard,
            foreground_labels: vec!["person".to_string()],
            input_size: 512,
            normalization_mean: [0.485, 0.456, 0.406],
            normalization_std: [0.229, 0.224, 0.225],
            cache_enabled: true,
            cache_dir: None,
        }
    }
}

/// Thresholds used by the capability prober
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeThresholds {
    /// Iterations of the synthetic CPU benchmark
    pub benchmark_iterations: u32,
    /// Benchmark durations above this degrade the tier
    pub max_benchmark_ms: u64,
    /// Reported memory below this degrades the tier
    pub min_memory_gb: f64,
}

impl Default for ProbeThresholds {
    fn default() -> Self {
        Self {
            benchmark_iterations: 1_000_000,
            max_benchmark_ms: 100,
            min_memory_gb: 4.0,
        }
    }
}

/// Configuration handed to the pipeline at construction time
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Explicit tier override; skips every environment signal when set
    pub force_tier: Option<CapabilityTier>,
    /// Disable the model-based strategy entirely
    pub disable_model: bool,
    pub probe: ProbeThresholds,
    pub heuristic: HeuristicConfig,
    pub model: ModelConfig,
}

impl PipelineConfig {
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Heuristic tolerance outside 1-255
    /// - Border fraction outside (0, 0.5]
    /// - Quantization step of zero or empty bucket selection
    /// - Negative blur sigma or saturation guard outside [0, 1]
    /// - Model input size or downscale cap of zero
    pub fn validate(&self) -> Result<()> {
        let h = &self.heuristic;
        if !(1.0..=255.0).contains(&h.tolerance) {
            return Err(PhotoError::config_value_error(
                "heuristic tolerance",
                h.tolerance,
                "1-255",
                Some(30.0),
            ));
        }
        if !(h.border_fraction > 0.0 && h.border_fraction <= 0.5) {
            return Err(PhotoError::config_value_error(
                "border fraction",
                h.border_fraction,
                "0-0.5",
                Some(0.05),
            ));
        }
        if let BackgroundEstimator::DominantBucket { step, top_k } = h.estimator {
            if step == 0 {
                return Err(PhotoError::config_value_error(
                    "quantization step",
                    step,
                    "1-255",
                    Some(10),
                ));
            }
            if top_k == 0 {
                return Err(PhotoError::config_value_error(
                    "dominant bucket count",
                    top_k,
                    ">= 1",
                    Some(1),
                ));
            }
        }
        if h.blur_sigma < 0.0 {
            return Err(PhotoError::config_value_error(
                "blur sigma",
                h.blur_sigma,
                ">= 0",
                Some(1.0),
            ));
        }
        if let Some(guard) = h.saturation_guard {
            if !(0.0..=1.0).contains(&guard) {
                return Err(PhotoError::config_value_error(
                    "saturation guard",
                    guard,
                    "0-1",
                    Some(0.2),
                ));
            }
        }

        let m = &self.model;
        if m.input_size == 0 {
            return Err(PhotoError::config_value_error(
                "model input size",
                m.input_size,
                ">= 1",
                Some(512),
            ));
        }
        if m.max_inference_dim == 0 {
            return Err(PhotoError::config_value_error(
                "max inference dimension",
                m.max_inference_dim,
                ">= 1",
                Some(1024),
            ));
        }
        if m.model_id.trim().is_empty() {
            return Err(PhotoError::invalid_config("Model identifier must not be empty"));
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn force_tier(mut self, tier: CapabilityTier) -> Self {
        self.config.force_tier = Some(tier);
        self
    }

    #[must_use]
    pub fn disable_model(mut self, disable: bool) -> Self {
        self.config.disable_model = disable;
        self
    }

    #[must_use]
    pub fn probe_thresholds(mut self, thresholds: ProbeThresholds) -> Self {
        self.config.probe = thresholds;
        self
    }

    #[must_use]
    pub fn heuristic(mut self, heuristic: HeuristicConfig) -> Self {
        self.config.heuristic = heuristic;
        self
    }

    #[must_use]
    pub fn tolerance(mut self, tolerance: f32) -> Self {
        self.config.heuristic.tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn estimator(mut self, estimator: BackgroundEstimator) -> Self {
        self.config.heuristic.estimator = estimator;
        self
    }

    #[must_use]
    pub fn model(mut self, model: ModelConfig) -> Self {
        self.config.model = model;
        self
    }

    #[must_use]
    pub fn model_id<S: Into<String>>(mut self, model_id: S) -> Self {
        self.config.model.model_id = model_id.into();
        self
    }

    #[must_use]
    pub fn edge_mode(mut self, mode: EdgeMode) -> Self {
        self.config.model.edge_mode = mode;
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.model.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.model.cache_enabled = enabled;
        self
    }

    /// Build the pipeline configuration
    ///
    /// # Errors
    /// - Any parameter rejected by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_constants() {
        assert_eq!(PHOTO_REQUIREMENTS.width, 600);
        assert_eq!(PHOTO_REQUIREMENTS.height, 600);
        assert_eq!(PHOTO_REQUIREMENTS.max_file_size_bytes(), 4048 * 1024);
        assert_eq!(PHOTO_REQUIREMENTS.head_height_percent_range(), (50, 69));
        assert_eq!(PHOTO_REQUIREMENTS.background_color.to_hex(), "#FFFFFF");
    }

    #[test]
    fn test_allowed_mime_types() {
        assert!(PHOTO_REQUIREMENTS.is_allowed_mime("image/jpeg"));
        assert!(PHOTO_REQUIREMENTS.is_allowed_mime("image/jpg"));
        assert!(PHOTO_REQUIREMENTS.is_allowed_mime("IMAGE/PNG"));
        assert!(!PHOTO_REQUIREMENTS.is_allowed_mime("image/gif"));
        assert!(!PHOTO_REQUIREMENTS.is_allowed_mime(""));
    }

    #[test]
    fn test_background_color_hex_parsing() {
        assert_eq!(
            BackgroundColor::from_hex("#FFFFFF").unwrap(),
            BackgroundColor::WHITE
        );
        assert_eq!(
            BackgroundColor::from_hex("#1a2B3c").unwrap(),
            BackgroundColor([0x1a, 0x2b, 0x3c])
        );
        assert!(BackgroundColor::from_hex("FFFFFF").is_err());
        assert!(BackgroundColor::from_hex("#FFF").is_err());
        assert!(BackgroundColor::from_hex("#GGGGGG").is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.force_tier, None);
        assert_eq!(config.model.edge_mode, EdgeMode::Hard);
        assert_eq!(config.model.max_inference_dim, 1024);
        assert!(config.model.cache_enabled);
    }

    #[test]
    fn test_builder_rejects_out_of_range_tolerance() {
        let err = PipelineConfig::builder().tolerance(0.0).build().unwrap_err();
        assert!(err.to_string().contains("heuristic tolerance"));

        let err = PipelineConfig::builder()
            .tolerance(400.0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("1-255"));
    }

    #[test]
    fn test_builder_rejects_degenerate_estimator() {
        let result = PipelineConfig::builder()
            .estimator(BackgroundEstimator::DominantBucket { step: 0, top_k: 1 })
            .build();
        assert!(result.is_err());

        let result = PipelineConfig::builder()
            .estimator(BackgroundEstimator::DominantBucket { step: 5, top_k: 0 })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_chain() {
        let config = PipelineConfig::builder()
            .force_tier(CapabilityTier::Constrained)
            .tolerance(45.0)
            .estimator(BackgroundEstimator::Mean)
            .edge_mode(EdgeMode::Soft)
            .cache_enabled(false)
            .build()
            .unwrap();

        assert_eq!(config.force_tier, Some(CapabilityTier::Constrained));
        assert_eq!(config.heuristic.tolerance, 45.0);
        assert_eq!(config.heuristic.estimator, BackgroundEstimator::Mean);
        assert_eq!(config.model.edge_mode, EdgeMode::Soft);
        assert!(!config.model.cache_enabled);
    }
}
