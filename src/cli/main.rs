//! ID photo preparation CLI
//!
//! Prepares one upload and writes the compliant PNG plus a validation report.

use super::config::CliConfigBuilder;
use crate::{
    capability::CapabilityTier,
    pipeline::PhotoPipeline,
    services::{
        ConsoleProgressReporter, DownloadProgress, ImageIOService, InputFile, PipelineStage,
        ProgressReporter, ProgressUpdate,
    },
    tracing_config::{init_cli_tracing, TracingFormat},
    types::{ProcessedImageResult, ProcessingTimings, Severity},
    validator,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Prepare a passport-style ID photo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "idphoto-prep")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image (JPEG or PNG)
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output PNG path [default: <INPUT stem>_idphoto.png]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Force a capability tier instead of probing the environment
    #[arg(long, env = "IDPHOTO_FORCE_TIER", value_name = "TIER")]
    pub force_tier: Option<CapabilityTier>,

    /// Use the alternative (non-model) background removal path
    #[arg(long, env = "USE_ALTERNATIVE_BACKGROUND_REMOVAL")]
    pub use_alternative: bool,

    /// Force the alternative background removal method
    #[arg(long, env = "FORCE_ALTERNATIVE_METHOD")]
    pub force_alternative: bool,

    /// Color distance below which a pixel counts as background (1-255)
    #[arg(long)]
    pub tolerance: Option<f32>,

    /// Backdrop color estimator for the heuristic segmenter
    #[arg(long, value_enum)]
    pub estimator: Option<CliEstimator>,

    /// Keep soft model mask edges instead of a hard threshold
    #[arg(long)]
    pub soft_edges: bool,

    /// Never attempt model-based segmentation
    #[arg(long)]
    pub no_model: bool,

    /// Hugging Face model id for model-based segmentation
    #[arg(short, long)]
    pub model: Option<String>,

    /// Use custom model cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Download model files into a temporary directory instead of the cache
    #[arg(long)]
    pub no_cache: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub report: ReportFormat,

    /// Plain log output without colors
    #[arg(long)]
    pub plain: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliEstimator {
    Mean,
    Dominant,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum ReportFormat {
    Text,
    Json,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.plain {
        TracingFormat::Compact
    } else {
        TracingFormat::Console
    };
    init_cli_tracing(cli.verbose, format).context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::from_cli(&cli)?;
    let output_path = CliConfigBuilder::output_path(&cli);
    debug!(?config, "Resolved pipeline configuration");

    info!("📷 Input: {}", cli.input.display());
    if let Some(tier) = config.force_tier {
        info!("🔒 Capability tier forced to {}", tier);
    }

    let file = InputFile::from_path(&cli.input)
        .await
        .with_context(|| format!("Failed to load {}", cli.input.display()))?;

    let reporter: Arc<dyn ProgressReporter> = if cli.verbose > 0 {
        Arc::new(ConsoleProgressReporter::new(true))
    } else {
        Arc::new(SpinnerReporter::new())
    };
    let pipeline = PhotoPipeline::builder()
        .config(config)
        .progress_reporter(reporter)
        .build()
        .context("Failed to create pipeline")?;

    let result = pipeline.process_image(file).await;

    if let Some(output) = &result.processed {
        ImageIOService::save_png(&output.canvas, &output_path)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
    }

    match cli.report {
        ReportFormat::Text => print_text_report(&result, &output_path),
        ReportFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&result.report()).context("Failed to serialize report")?
        ),
    }

    if result.processed.is_none() {
        anyhow::bail!("No ID photo was produced for {}", cli.input.display());
    }
    Ok(())
}

fn print_text_report(result: &ProcessedImageResult, output_path: &std::path::Path) {
    println!("📋 {}", result.original.name);
    if result.width > 0 {
        println!("  └─ Source: {}x{}", result.width, result.height);
    }
    if let Some(tier) = result.tier {
        println!("  └─ Capability tier: {}", tier);
    }
    for attempt in &result.strategy_attempts {
        match &attempt.error {
            None => println!("  └─ {}: used ({}ms)", attempt.strategy, attempt.duration_ms),
            Some(error) => println!("  └─ {}: failed ({})", attempt.strategy, error),
        }
    }
    if let Some(output) = &result.processed {
        println!("  └─ Output: {}", output_path.display());
        if output.degraded {
            println!("  └─ Composition fell back to resizing only");
        }
    }

    let mut validations = result.validations.clone();
    validator::sort_for_display(&mut validations);
    println!();
    for validation in &validations {
        let marker = match validation.severity {
            Severity::Error => "❌",
            Severity::Warning => "⚠️ ",
            Severity::Success => "✅",
            Severity::Info => "ℹ️ ",
        };
        println!("{} {}", marker, validation.message);
    }
}

/// Spinner-backed reporter for non-verbose runs
struct SpinnerReporter {
    bar: ProgressBar,
}

impl SpinnerReporter {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl ProgressReporter for SpinnerReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.bar
            .set_message(format!("[{}%] {}", update.progress, update.description));
    }

    fn report_completion(&self, timings: &ProcessingTimings) {
        self.bar
            .finish_with_message(format!("✅ Done in {}ms", timings.total_ms));
    }

    fn report_error(&self, stage: PipelineStage, error: &str) {
        self.bar
            .println(format!("❌ {}: {}", stage.description(), error));
    }

    fn notify(&self, severity: Severity, message: &str) {
        if severity == Severity::Error || severity == Severity::Warning {
            self.bar.println(message);
        }
    }

    fn report_download(&self, progress: &DownloadProgress) {
        let message = match progress.total {
            Some(total) if total > 0 => format!(
                "📥 {} {}%",
                progress.file_name,
                progress.downloaded * 100 / total
            ),
            _ => format!("📥 {} {} bytes", progress.file_name, progress.downloaded),
        };
        self.bar.set_message(message);
    }
}
