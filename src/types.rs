//! Core types for the preparation pipeline

use crate::{
    capability::CapabilityTier,
    config::BackgroundColor,
    error::{PhotoError, Result},
    segmentation::StrategyKind,
};
use chrono::{DateTime, Utc};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Decoded raster owned by one pipeline run
///
/// Pixels are RGBA, row-major, 4 bytes per pixel. The buffer is shared
/// behind an `Arc` so strategies can move it onto blocking threads without
/// copying; it is never mutated after decoding.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pixels: Arc<RgbaImage>,
}

impl SourceImage {
    /// Wrap an RGBA buffer
    ///
    /// # Errors
    /// - Zero width or height
    pub fn new(pixels: RgbaImage) -> Result<Self> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(PhotoError::decode("Image has zero width or height"));
        }
        Ok(Self {
            pixels: Arc::new(pixels),
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    #[must_use]
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Cheap handle clone for moving into blocking tasks
    #[must_use]
    pub fn shared_pixels(&self) -> Arc<RgbaImage> {
        Arc::clone(&self.pixels)
    }
}

/// Per-pixel foreground decision
///
/// Values are stored as 0-255 where 0 is definite background and 255 is
/// definite foreground. Hard masks only contain 0 and 255.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForegroundMask {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl ForegroundMask {
    /// Create a mask from raw values
    ///
    /// # Errors
    /// - Data length differs from `width * height`
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(PhotoError::internal(format!(
                "Mask holds {} values, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Mask that keeps every pixel
    #[must_use]
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            data: vec![255; width as usize * height as usize],
            width,
            height,
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mask value at a pixel, background when out of bounds
    #[must_use]
    pub fn value(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_background(&self, x: u32, y: u32) -> bool {
        self.value(x, y) == 0
    }

    /// Whether the mask was computed for an image of these dimensions
    #[must_use]
    pub fn matches(&self, image: &SourceImage) -> bool {
        self.dimensions() == image.dimensions()
    }

    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let foreground_pixels = self.data.iter().filter(|&&v| v > 127).count();
        let ratio = if total_pixels == 0 {
            0.0
        } else {
            foreground_pixels as f32 / total_pixels as f32
        };
        MaskStatistics {
            total_pixels,
            foreground_pixels,
            background_pixels: total_pixels - foreground_pixels,
            foreground_ratio: ratio,
        }
    }
}

/// Statistics about a foreground mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub background_pixels: usize,
    pub foreground_ratio: f32,
}

/// Outcome of a segmentation strategy
#[derive(Debug, Clone, PartialEq)]
pub enum Segmentation {
    /// Dense per-pixel decision matching the source dimensions
    Mask(ForegroundMask),
    /// No segmentation: the whole image is foreground
    NoOp,
}

/// Fixed-size, fully opaque output raster
#[derive(Debug, Clone)]
pub struct CompositeCanvas {
    image: RgbaImage,
    background: BackgroundColor,
}

impl CompositeCanvas {
    /// Allocate a canvas filled with the backdrop color
    ///
    /// # Errors
    /// - Zero-sized canvas
    /// - Pixel buffer size overflow
    pub fn filled(width: u32, height: u32, background: BackgroundColor) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PhotoError::composition(format!(
                "Cannot allocate a {}x{} canvas",
                width, height
            )));
        }
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| {
                PhotoError::composition(format!("Canvas {}x{} exceeds addressable memory", width, height))
            })?;

        Ok(Self {
            image: RgbaImage::from_pixel(width, height, background.rgba()),
            background,
        })
    }

    pub(crate) fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    #[must_use]
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn background(&self) -> BackgroundColor {
        self.background
    }

    /// Encode as lossless PNG
    ///
    /// # Errors
    /// - PNG encoder failure
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buffer);
        self.image.write_to(&mut cursor, image::ImageFormat::Png)?;
        Ok(buffer)
    }

    /// Save as PNG
    ///
    /// # Errors
    /// - File creation or encoder failure
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

/// Severity of a validation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
    Warning,
    Info,
}

impl Severity {
    /// Display rank: errors, then warnings, then successes, then info
    #[must_use]
    pub fn display_rank(self) -> u8 {
        match self {
            Self::Error => 0,
            Self::Warning => 1,
            Self::Success => 2,
            Self::Info => 3,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// One entry of a validation report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub message: String,
    #[serde(rename = "type")]
    pub severity: Severity,
}

impl ValidationResult {
    pub fn success<S: Into<String>>(message: S) -> Self {
        Self {
            valid: true,
            message: message.into(),
            severity: Severity::Success,
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self {
            valid: false,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning<S: Into<String>>(message: S) -> Self {
        Self {
            valid: false,
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn info<S: Into<String>>(message: S) -> Self {
        Self {
            valid: true,
            message: message.into(),
            severity: Severity::Info,
        }
    }
}

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineState {
    Idle,
    Validating,
    Decoding,
    Segmenting,
    Compositing,
    ValidatingOutput,
    Done,
    Failed,
}

/// Record of one segmentation strategy attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: StrategyKind,
    pub succeeded: bool,
    /// Failure description when the attempt fell through
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Per-stage timing breakdown for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    pub decode_ms: u64,
    pub probe_ms: u64,
    pub segmentation_ms: u64,
    pub composition_ms: u64,
    pub encode_ms: u64,
    pub total_ms: u64,
}

/// Output image of a successful run
#[derive(Debug, Clone)]
pub struct ProcessedOutput {
    pub canvas: CompositeCanvas,
    /// PNG encoding of `canvas`
    pub png: Vec<u8>,
    /// Strategy whose segmentation was composited
    pub strategy: StrategyKind,
    /// True when composition fell back to scale-and-center only
    pub degraded: bool,
}

/// Aggregate returned to the caller of a pipeline run
///
/// Owns everything it references; dropping it releases the decoded
/// original bytes and the output canvas.
#[derive(Debug, Clone)]
pub struct ProcessedImageResult {
    /// Identifier callers use to discard results of superseded runs
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Original upload
    pub original: crate::services::InputFile,
    /// Absent when validation or decoding ended the run
    pub processed: Option<ProcessedOutput>,
    /// Decoded source width, 0 when not decoded
    pub width: u32,
    /// Decoded source height, 0 when not decoded
    pub height: u32,
    /// Not measured; face detection is not performed
    pub head_height: Option<u32>,
    pub head_height_percentage: Option<f32>,
    pub validations: Vec<ValidationResult>,
    pub tier: Option<CapabilityTier>,
    pub strategy_attempts: Vec<StrategyAttempt>,
    pub final_state: PipelineState,
    pub timings: ProcessingTimings,
}

impl ProcessedImageResult {
    #[must_use]
    pub fn new(original: crate::services::InputFile) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            original,
            processed: None,
            width: 0,
            height: 0,
            head_height: None,
            head_height_percentage: None,
            validations: Vec::new(),
            tier: None,
            strategy_attempts: Vec::new(),
            final_state: PipelineState::Idle,
            timings: ProcessingTimings::default(),
        }
    }

    #[must_use]
    pub fn processed_png(&self) -> Option<&[u8]> {
        self.processed.as_ref().map(|p| p.png.as_slice())
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.validations
            .iter()
            .any(|v| v.severity == Severity::Error)
    }

    /// Strategies in the order they were attempted
    #[must_use]
    pub fn attempted_strategies(&self) -> Vec<StrategyKind> {
        self.strategy_attempts.iter().map(|a| a.strategy).collect()
    }

    /// Serializable view for reports
    #[must_use]
    pub fn report(&self) -> ProcessingReport {
        ProcessingReport {
            run_id: self.run_id,
            started_at: self.started_at,
            file_name: self.original.name.clone(),
            processed: self.processed.is_some(),
            strategy: self.processed.as_ref().map(|p| p.strategy),
            degraded: self.processed.as_ref().is_some_and(|p| p.degraded),
            width: self.width,
            height: self.height,
            tier: self.tier,
            final_state: self.final_state,
            strategy_attempts: self.strategy_attempts.clone(),
            validations: self.validations.clone(),
            timings: self.timings.clone(),
        }
    }
}

/// JSON-friendly summary of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub file_name: String,
    pub processed: bool,
    pub strategy: Option<StrategyKind>,
    pub degraded: bool,
    pub width: u32,
    pub height: u32,
    pub tier: Option<CapabilityTier>,
    pub final_state: PipelineState,
    pub strategy_attempts: Vec<StrategyAttempt>,
    pub validations: Vec<ValidationResult>,
    pub timings: ProcessingTimings,
}
