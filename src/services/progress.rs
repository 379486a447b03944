//! Progress reporting service
//!
//! Separates progress reporting from pipeline logic so frontends can plug
//! in their own sink. Reporting is fire-and-forget: nothing here returns a
//! value the pipeline waits on or branches on.

use crate::types::{ProcessingTimings, Severity};
use instant::Instant;

/// Stages of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Checking file type and size
    Validation,
    /// Decoding the upload into pixels
    Decoding,
    /// Classifying the runtime capability tier
    Probing,
    /// Running segmentation strategies
    Segmentation,
    /// Drawing the fixed-size output canvas
    Composition,
    /// Encoding the canvas as PNG
    Encoding,
    /// Checking the output against requirements
    OutputValidation,
    /// Run finished
    Completed,
}

impl PipelineStage {
    /// Human-readable description of the stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            PipelineStage::Validation => "Validating file",
            PipelineStage::Decoding => "Decoding image",
            PipelineStage::Probing => "Assessing capability",
            PipelineStage::Segmentation => "Segmenting subject",
            PipelineStage::Composition => "Compositing on backdrop",
            PipelineStage::Encoding => "Encoding output",
            PipelineStage::OutputValidation => "Validating output",
            PipelineStage::Completed => "Processing completed",
        }
    }

    /// Typical progress percentage for this stage
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            PipelineStage::Validation => 5,
            PipelineStage::Decoding => 15,
            PipelineStage::Probing => 20,
            PipelineStage::Segmentation => 70,
            PipelineStage::Composition => 85,
            PipelineStage::Encoding => 92,
            PipelineStage::OutputValidation => 97,
            PipelineStage::Completed => 100,
        }
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub stage: PipelineStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    pub description: String,
    /// Elapsed time since the run started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: PipelineStage, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }

    /// Create a progress update with custom description
    #[must_use]
    pub fn with_description(stage: PipelineStage, description: String, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
            description,
        }
    }
}

/// Byte progress of a model file download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    /// File being downloaded
    pub file_name: String,
    /// Bytes downloaded
    pub downloaded: u64,
    /// Total file size (if known)
    pub total: Option<u64>,
    pub completed: bool,
}

/// Sink for pipeline progress and user-facing notifications
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report run completion with final timings
    fn report_completion(&self, timings: &ProcessingTimings);

    /// Report an error at a stage
    fn report_error(&self, stage: PipelineStage, error: &str);

    /// Surface a notification to the user
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Error => log::error!("{}", message),
            Severity::Warning => log::warn!("{}", message),
            Severity::Success | Severity::Info => log::info!("{}", message),
        }
    }

    /// Report model download progress
    fn report_download(&self, progress: &DownloadProgress) {
        drop(progress);
    }
}

/// Reporter that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: &ProcessingTimings) {}

    fn report_error(&self, _stage: PipelineStage, _error: &str) {}

    fn notify(&self, _severity: Severity, _message: &str) {}
}

/// Reporter that writes progress through the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: &ProcessingTimings) {
        log::info!("✅ ID photo prepared in {}ms", timings.total_ms);

        if self.verbose {
            log::info!("  📊 Detailed timings:");
            log::info!("    • Decode: {}ms", timings.decode_ms);
            log::info!("    • Capability probe: {}ms", timings.probe_ms);
            log::info!("    • Segmentation: {}ms", timings.segmentation_ms);
            log::info!("    • Composition: {}ms", timings.composition_ms);
            log::info!("    • Encoding: {}ms", timings.encode_ms);
        }
    }

    fn report_error(&self, stage: PipelineStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }

    fn report_download(&self, progress: &DownloadProgress) {
        if progress.completed {
            log::info!("📥 Downloaded {} ({} bytes)", progress.file_name, progress.downloaded);
        } else if self.verbose {
            match progress.total {
                Some(total) if total > 0 => log::debug!(
                    "📥 {}: {}%",
                    progress.file_name,
                    progress.downloaded * 100 / total
                ),
                _ => log::debug!(
                    "📥 {}: {:.1} MB",
                    progress.file_name,
                    progress.downloaded as f64 / 1_048_576.0
                ),
            }
        }
    }
}

/// Tracks the current stage and start time of one run
pub struct ProgressTracker<'a> {
    reporter: &'a dyn ProgressReporter,
    start_time: Instant,
    current_stage: Option<PipelineStage>,
}

impl<'a> ProgressTracker<'a> {
    #[must_use]
    pub fn new(reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    pub fn report_stage(&mut self, stage: PipelineStage) {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    pub fn report_stage_with_description(&mut self, stage: PipelineStage, description: String) {
        self.current_stage = Some(stage);
        self.reporter.report_progress(ProgressUpdate::with_description(
            stage,
            description,
            self.start_time,
        ));
    }

    pub fn report_completion(&self, timings: &ProcessingTimings) {
        self.reporter.report_completion(timings);
    }

    /// Report an error against the current stage
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(PipelineStage::Validation);
        self.reporter.report_error(stage, error);
    }

    pub fn notify(&self, severity: Severity, message: &str) {
        self.reporter.notify(severity, message);
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<PipelineStage> {
        self.current_stage
    }
}
