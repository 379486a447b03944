#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # ID Photo Preparation Library
//!
//! Turns an uploaded portrait into a compliant passport-style photo: a fixed
//! 600x600 canvas with the subject scaled and centered on a uniform white
//! backdrop, plus a list of validation results describing how well the
//! output meets the requirements.
//!
//! ## Features
//!
//! - **Capability probing**: GPU presence, a CPU benchmark and device memory
//!   decide whether model-based segmentation is attempted
//! - **Segmentation with fallback**: model-based (Tract, pure Rust), then an
//!   edge-color heuristic, then no segmentation at all
//! - **Compositing**: uniform scale, centered placement, always opaque
//! - **Validation**: file type and size checks up front, output checks after
//! - **Model management**: Hugging Face download with an on-disk cache
//! - **CLI Integration**: Optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use idphoto_prep::{CapabilityTier, InputFile, PhotoPipeline, PipelineConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::builder()
//!     .force_tier(CapabilityTier::Constrained)
//!     .build()?;
//! let pipeline = PhotoPipeline::new(config)?;
//!
//! let file = InputFile::from_path("portrait.jpg").await?;
//! let result = pipeline.process_image(file).await;
//! if let Some(output) = &result.processed {
//!     output.canvas.save_png("portrait_idphoto.png")?;
//! }
//! for validation in &result.validations {
//!     println!("{:?}: {}", validation.severity, validation.message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `tract` (default): model-based segmentation with the Tract ONNX engine
//! - `cli` (default): command-line interface and tracing subscriber setup
//! - `tracing-json`: JSON log output for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! idphoto-prep = { version = "0.1", default-features = false, features = ["tract"] }
//! ```

pub mod backends;
pub mod capability;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod inference;
pub mod models;
pub mod pipeline;
pub mod segmentation;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod validator;

// Public API exports
pub use capability::{
    CapabilityAssessment, CapabilityProber, CapabilityTier, DegradationSignal, EnvironmentProbe,
    StaticProbe, SystemProbe,
};
pub use compositor::{composite, resize_and_center, FitGeometry};
pub use config::{
    BackgroundColor, BackgroundEstimator, EdgeMode, HeuristicConfig, ModelConfig,
    PhotoRequirements, PipelineConfig, PipelineConfigBuilder, ProbeThresholds, PHOTO_REQUIREMENTS,
};
pub use error::{PhotoError, Result};
pub use inference::{InferenceCapability, LabeledMask};
pub use models::{ModelFiles, ModelStore};
pub use pipeline::{PhotoPipeline, PhotoPipelineBuilder};
pub use segmentation::{
    BasicFallback, HeuristicSegmenter, ModelSegmenter, SegmentationStrategy, StrategyKind,
};
pub use services::{
    ConsoleProgressReporter, DownloadProgress, ImageIOService, InputFile, NoOpProgressReporter,
    PipelineStage, ProgressReporter, ProgressTracker, ProgressUpdate,
};
pub use types::{
    CompositeCanvas, ForegroundMask, PipelineState, ProcessedImageResult, ProcessedOutput,
    ProcessingReport, ProcessingTimings, Segmentation, Severity, SourceImage, StrategyAttempt,
    ValidationResult,
};
pub use validator::{sort_for_display, validate_file, validate_output};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};

/// Prepare an ID photo with a default pipeline
///
/// Builds a [`PhotoPipeline`] from `config` for a single run. Reuse a
/// pipeline when processing several files so the model is loaded once.
///
/// # Examples
///
/// ```rust,no_run
/// use idphoto_prep::{prepare_id_photo, InputFile, PipelineConfig};
///
/// # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
/// let file = InputFile::from_bytes("upload.png", "image/png", upload);
/// let result = prepare_id_photo(file, PipelineConfig::default()).await?;
/// let png: Option<&[u8]> = result.processed_png();
/// # Ok(())
/// # }
/// ```
pub async fn prepare_id_photo(
    file: InputFile,
    config: PipelineConfig,
) -> Result<ProcessedImageResult> {
    let pipeline = PhotoPipeline::new(config)?;
    Ok(pipeline.process_image(file).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prepare_rejects_wrong_type_without_decoding() {
        let config = PipelineConfig::builder()
            .force_tier(CapabilityTier::Forced)
            .build()
            .unwrap();
        let file = InputFile::from_bytes("anim.gif", "image/gif", vec![0; 16]);
        let result = prepare_id_photo(file, config).await.unwrap();
        assert_eq!(result.final_state, PipelineState::Done);
        assert!(result.processed.is_none());
        assert!(result.has_errors());
    }
}
