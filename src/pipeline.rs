//! Pipeline orchestrator
//!
//! Drives one upload through validation, decoding, capability probing,
//! segmentation with fallback, compositing and output validation. Expected
//! failures never escape as errors: they become [`ValidationResult`] entries
//! on the returned [`ProcessedImageResult`].
//!
//! ```text
//! Idle -> Validating -> Decoding -> Segmenting -> Compositing -> ValidatingOutput -> Done
//!             |             |                           |
//!             v             v                           v
//!           Done         Failed               scale-and-center fallback
//! ```

use crate::{
    capability::{CapabilityProber, CapabilityTier, EnvironmentProbe, SystemProbe},
    compositor,
    config::{PhotoRequirements, PipelineConfig, PHOTO_REQUIREMENTS},
    error::{PhotoError, Result},
    inference::InferenceCapability,
    segmentation::{
        BasicFallback, HeuristicSegmenter, ModelSegmenter, SegmentationStrategy, StrategyKind,
    },
    services::{
        ImageIOService, InputFile, NoOpProgressReporter, PipelineStage, ProgressReporter,
        ProgressTracker,
    },
    types::{
        CompositeCanvas, PipelineState, ProcessedImageResult, ProcessedOutput, Segmentation,
        Severity, SourceImage, StrategyAttempt, ValidationResult,
    },
    validator,
};
use instant::Instant;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Warning appended when the output was produced without background removal
pub const RESIZE_ONLY_WARNING: &str =
    "The background could not be processed automatically. Only resizing was applied.";

/// Error appended when a run could not produce any image
pub const PROCESSING_ERROR: &str = "Error processing the image. Please try again.";

/// ID-photo preparation pipeline
///
/// Holds no per-run state; concurrent runs on one pipeline are independent.
pub struct PhotoPipeline {
    config: PipelineConfig,
    requirements: PhotoRequirements,
    probe: Arc<dyn EnvironmentProbe>,
    reporter: Arc<dyn ProgressReporter>,
    model: Arc<dyn SegmentationStrategy>,
    heuristic: Arc<dyn SegmentationStrategy>,
    basic: BasicFallback,
}

impl std::fmt::Debug for PhotoPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoPipeline")
            .field("config", &self.config)
            .field("requirements", &self.requirements)
            .finish_non_exhaustive()
    }
}

impl PhotoPipeline {
    /// Create a pipeline with default collaborators
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    #[must_use]
    pub fn builder() -> PhotoPipelineBuilder {
        PhotoPipelineBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn requirements(&self) -> &PhotoRequirements {
        &self.requirements
    }

    fn strategy(&self, kind: StrategyKind) -> &dyn SegmentationStrategy {
        match kind {
            StrategyKind::Model => self.model.as_ref(),
            StrategyKind::Heuristic => self.heuristic.as_ref(),
            StrategyKind::Basic => &self.basic,
        }
    }

    /// Process one upload into a compliant photo and its validation report
    ///
    /// Wrong type or size ends the run in `Done` without output; undecodable
    /// data ends it in `Failed`. Every other failure degrades and still
    /// yields an image.
    pub async fn process_image(&self, file: InputFile) -> ProcessedImageResult {
        let mut result = ProcessedImageResult::new(file);
        let span = info_span!(
            "process_image",
            run_id = %result.run_id,
            file = %result.original.name
        );

        async {
            let start = Instant::now();
            let mut tracker = ProgressTracker::new(self.reporter.as_ref());

            if let Err(e) = self.run(&mut result, &mut tracker).await {
                warn!("Unexpected error while processing image: {}", e);
                tracker.report_error(&e.to_string());
                result.processed = None;
                result
                    .validations
                    .push(ValidationResult::error(PROCESSING_ERROR));
                transition(&mut result, PipelineState::Failed);
            }

            result.timings.total_ms = start.elapsed().as_millis() as u64;
            tracker.report_stage(PipelineStage::Completed);
            tracker.report_completion(&result.timings);
            info!(
                state = ?result.final_state,
                total_ms = result.timings.total_ms,
                "Run finished"
            );
        }
        .instrument(span)
        .await;

        result
    }

    async fn run(
        &self,
        result: &mut ProcessedImageResult,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<()> {
        let source = match self.admit(result, tracker).await {
            Ok(source) => source,
            Err(e) if e.is_fatal() => {
                reject(result, tracker, &e);
                return Ok(());
            },
            Err(e) => return Err(e),
        };
        (result.width, result.height) = source.dimensions();
        debug!(width = result.width, height = result.height, "Decoded source");

        // Probing happens once per run, before segmentation
        tracker.report_stage(PipelineStage::Probing);
        let probe_start = Instant::now();
        let assessment = CapabilityProber::new(self.probe.as_ref(), self.config.probe)
            .assess_environment(self.config.force_tier);
        result.timings.probe_ms = probe_start.elapsed().as_millis() as u64;
        result.tier = Some(assessment.tier);

        // Segmenting
        transition(result, PipelineState::Segmenting);
        tracker.report_stage(PipelineStage::Segmentation);
        let segmentation_start = Instant::now();
        let (strategy, segmentation) = self
            .segment(&source, assessment.tier, result, tracker)
            .await;
        result.timings.segmentation_ms = segmentation_start.elapsed().as_millis() as u64;

        // Compositing
        transition(result, PipelineState::Compositing);
        tracker.report_stage(PipelineStage::Composition);
        let composition_start = Instant::now();
        let (canvas, degraded) = match self.composite(&source, segmentation).await {
            Ok(canvas) => (canvas, false),
            Err(e) => {
                warn!("Compositing failed, falling back to scale-and-center: {}", e);
                tracker.report_error(&e.to_string());
                match self.resize_and_center(&source).await {
                    Ok(canvas) => (canvas, true),
                    Err(fallback_err) => {
                        tracker.report_error(&fallback_err.to_string());
                        result.validations.push(ValidationResult::error(format!(
                            "{} ({})",
                            PROCESSING_ERROR, fallback_err
                        )));
                        transition(result, PipelineState::Failed);
                        return Ok(());
                    },
                }
            },
        };
        result.timings.composition_ms = composition_start.elapsed().as_millis() as u64;

        tracker.report_stage(PipelineStage::Encoding);
        let encode_start = Instant::now();
        let png = canvas.to_png_bytes()?;
        result.timings.encode_ms = encode_start.elapsed().as_millis() as u64;

        // Validating output; failing checks never discard the image
        transition(result, PipelineState::ValidatingOutput);
        tracker.report_stage(PipelineStage::OutputValidation);
        result
            .validations
            .extend(validator::validate_output(&canvas, &self.requirements));
        if degraded || strategy == StrategyKind::Basic {
            tracker.notify(Severity::Warning, RESIZE_ONLY_WARNING);
            result
                .validations
                .push(ValidationResult::warning(RESIZE_ONLY_WARNING));
        }

        result.processed = Some(ProcessedOutput {
            canvas,
            png,
            strategy,
            degraded,
        });
        transition(result, PipelineState::Done);
        Ok(())
    }

    /// Validate and decode the upload
    ///
    /// # Errors
    /// - `InvalidInput` when the type or size check fails
    /// - `Decode` when the data is not a readable image
    async fn admit(
        &self,
        result: &mut ProcessedImageResult,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<SourceImage> {
        transition(result, PipelineState::Validating);
        tracker.report_stage(PipelineStage::Validation);
        let file_check = validator::validate_file(&result.original, &self.requirements);
        if !file_check.valid {
            return Err(PhotoError::invalid_input(file_check.message));
        }
        result.validations.push(file_check);

        transition(result, PipelineState::Decoding);
        tracker.report_stage(PipelineStage::Decoding);
        let decode_start = Instant::now();
        let source = ImageIOService::decode_source(&result.original).await?;
        result.timings.decode_ms = decode_start.elapsed().as_millis() as u64;
        Ok(source)
    }

    /// Walk the strategy chain until one succeeds
    async fn segment(
        &self,
        source: &SourceImage,
        tier: CapabilityTier,
        result: &mut ProcessedImageResult,
        tracker: &mut ProgressTracker<'_>,
    ) -> (StrategyKind, Segmentation) {
        for kind in StrategyKind::chain_for(tier, !self.config.disable_model) {
            tracker.report_stage_with_description(
                PipelineStage::Segmentation,
                format!("Segmenting subject ({kind})"),
            );
            let start = Instant::now();
            let outcome = self.strategy(kind).segment(source).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Ok(segmentation) => {
                    info!(strategy = %kind, duration_ms, "Segmentation strategy succeeded");
                    result.strategy_attempts.push(StrategyAttempt {
                        strategy: kind,
                        succeeded: true,
                        error: None,
                        duration_ms,
                    });
                    return (kind, segmentation);
                },
                Err(e) => {
                    warn!(strategy = %kind, "Segmentation strategy failed, falling through: {}", e);
                    result.strategy_attempts.push(StrategyAttempt {
                        strategy: kind,
                        succeeded: false,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                },
            }
        }

        warn!("Every segmentation strategy failed; keeping the whole image");
        (StrategyKind::Basic, Segmentation::NoOp)
    }

    async fn composite(
        &self,
        source: &SourceImage,
        segmentation: Segmentation,
    ) -> Result<CompositeCanvas> {
        let source = source.clone();
        let requirements = self.requirements;
        tokio::task::spawn_blocking(move || {
            compositor::composite(&source, &segmentation, &requirements)
        })
        .await
        .map_err(|e| PhotoError::composition(format!("Compositing task failed: {}", e)))?
    }

    async fn resize_and_center(&self, source: &SourceImage) -> Result<CompositeCanvas> {
        let source = source.clone();
        let requirements = self.requirements;
        tokio::task::spawn_blocking(move || compositor::resize_and_center(&source, &requirements))
            .await
            .map_err(|e| PhotoError::composition(format!("Resize task failed: {}", e)))?
    }
}

/// End a run on a fatal error without producing an image
///
/// A rejected upload is a normal outcome and ends in `Done`; unreadable data
/// ends in `Failed`.
fn reject(
    result: &mut ProcessedImageResult,
    tracker: &mut ProgressTracker<'_>,
    err: &PhotoError,
) {
    result.processed = None;
    if let PhotoError::InvalidInput(message) = err {
        tracker.notify(Severity::Error, message);
        result.validations.push(ValidationResult::error(message.clone()));
        transition(result, PipelineState::Done);
    } else {
        tracker.report_error(&err.to_string());
        result.validations.push(ValidationResult::error(format!(
            "{} ({})",
            PROCESSING_ERROR, err
        )));
        transition(result, PipelineState::Failed);
    }
}

fn transition(result: &mut ProcessedImageResult, next: PipelineState) {
    debug!(from = ?result.final_state, to = ?next, "Pipeline state transition");
    result.final_state = next;
}

/// Builder for `PhotoPipeline`
#[derive(Default)]
pub struct PhotoPipelineBuilder {
    config: PipelineConfig,
    requirements: Option<PhotoRequirements>,
    probe: Option<Arc<dyn EnvironmentProbe>>,
    reporter: Option<Arc<dyn ProgressReporter>>,
    inference: Option<Arc<dyn InferenceCapability>>,
    model_strategy: Option<Arc<dyn SegmentationStrategy>>,
    heuristic_strategy: Option<Arc<dyn SegmentationStrategy>>,
}

impl PhotoPipelineBuilder {
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the output requirements, `PHOTO_REQUIREMENTS` by default
    #[must_use]
    pub fn requirements(mut self, requirements: PhotoRequirements) -> Self {
        self.requirements = Some(requirements);
        self
    }

    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn EnvironmentProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    #[must_use]
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Inference capability for the model-based strategy
    #[must_use]
    pub fn inference(mut self, inference: Arc<dyn InferenceCapability>) -> Self {
        self.inference = Some(inference);
        self
    }

    /// Replace the model-based strategy entirely
    #[must_use]
    pub fn model_strategy(mut self, strategy: Arc<dyn SegmentationStrategy>) -> Self {
        self.model_strategy = Some(strategy);
        self
    }

    /// Replace the heuristic strategy
    #[must_use]
    pub fn heuristic_strategy(mut self, strategy: Arc<dyn SegmentationStrategy>) -> Self {
        self.heuristic_strategy = Some(strategy);
        self
    }

    /// Build the pipeline
    ///
    /// Without an explicit inference capability the Tract backend is used
    /// when compiled in; otherwise the model strategy reports itself
    /// unavailable and the chain starts at the heuristic.
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn build(self) -> Result<PhotoPipeline> {
        self.config.validate()?;

        let reporter = self
            .reporter
            .unwrap_or_else(|| Arc::new(NoOpProgressReporter));
        let model = match (self.model_strategy, self.inference) {
            (Some(strategy), _) => strategy,
            (None, Some(inference)) => {
                Arc::new(ModelSegmenter::new(inference, self.config.model.clone()))
            },
            (None, None) => default_model_strategy(&self.config, &reporter),
        };
        let heuristic = self.heuristic_strategy.unwrap_or_else(|| {
            Arc::new(HeuristicSegmenter::new(self.config.heuristic.clone()))
        });

        Ok(PhotoPipeline {
            requirements: self.requirements.unwrap_or(PHOTO_REQUIREMENTS),
            probe: self.probe.unwrap_or_else(|| Arc::new(SystemProbe::new())),
            reporter,
            model,
            heuristic,
            basic: BasicFallback,
            config: self.config,
        })
    }
}

#[cfg(feature = "tract")]
fn default_model_strategy(
    config: &PipelineConfig,
    reporter: &Arc<dyn ProgressReporter>,
) -> Arc<dyn SegmentationStrategy> {
    if config.disable_model {
        return Arc::new(ModelSegmenter::unavailable(config.model.clone()));
    }
    match crate::backends::TractInference::new(config.model.clone(), Arc::clone(reporter)) {
        Ok(backend) => Arc::new(ModelSegmenter::new(Arc::new(backend), config.model.clone())),
        Err(e) => {
            warn!("Model backend unavailable: {}", e);
            Arc::new(ModelSegmenter::unavailable(config.model.clone()))
        },
    }
}

#[cfg(not(feature = "tract"))]
fn default_model_strategy(
    config: &PipelineConfig,
    _reporter: &Arc<dyn ProgressReporter>,
) -> Arc<dyn SegmentationStrategy> {
    Arc::new(ModelSegmenter::unavailable(config.model.clone()))
}
