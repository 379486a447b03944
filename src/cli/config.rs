//! Conversion from CLI arguments to `PipelineConfig`
//!
//! Environment override flags are read here, at the process boundary, and
//! never by the library itself.

use crate::capability::CapabilityTier;
use crate::cli::main_impl::{Cli, CliEstimator};
use crate::config::{BackgroundEstimator, EdgeMode, PipelineConfig};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the pipeline configuration from parsed arguments
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let mut builder = PipelineConfig::builder().disable_model(cli.no_model);

        if let Some(tier) = Self::resolve_tier(cli) {
            builder = builder.force_tier(tier);
        }
        if let Some(tolerance) = cli.tolerance {
            builder = builder.tolerance(tolerance);
        }
        if let Some(estimator) = cli.estimator {
            builder = builder.estimator(match estimator {
                CliEstimator::Mean => BackgroundEstimator::Mean,
                CliEstimator::Dominant => BackgroundEstimator::default(),
            });
        }
        if cli.soft_edges {
            builder = builder.edge_mode(EdgeMode::Soft);
        }
        if let Some(model) = &cli.model {
            builder = builder.model_id(model.clone());
        }
        if let Some(dir) = &cli.cache_dir {
            builder = builder.cache_dir(dir.clone());
        }
        if cli.no_cache {
            builder = builder.cache_enabled(false);
        }

        builder.build().context("Invalid pipeline configuration")
    }

    /// Explicit `--force-tier` wins; the alternative-method flags force `Forced`
    pub(crate) fn resolve_tier(cli: &Cli) -> Option<CapabilityTier> {
        cli.force_tier.or_else(|| {
            (cli.use_alternative || cli.force_alternative).then_some(CapabilityTier::Forced)
        })
    }

    /// Output path, defaulting to `<stem>_idphoto.png` next to the input
    pub(crate) fn output_path(cli: &Cli) -> PathBuf {
        cli.output
            .clone()
            .unwrap_or_else(|| default_output_path(&cli.input))
    }
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "photo".into(), |s| s.to_string_lossy());
    input.with_file_name(format!("{stem}_idphoto.png"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["idphoto-prep"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_map_to_default_config() {
        let cli = parse(&["face.jpg"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.force_tier, None);
        assert!(!config.disable_model);
        assert_eq!(
            CliConfigBuilder::output_path(&cli),
            PathBuf::from("face_idphoto.png")
        );
    }

    #[test]
    fn test_flags_map_into_config() {
        let cli = parse(&[
            "in/face.png",
            "--force-tier",
            "forced",
            "--tolerance",
            "45",
            "--estimator",
            "mean",
            "--soft-edges",
            "--no-model",
            "-o",
            "out.png",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.force_tier, Some(CapabilityTier::Forced));
        assert!((config.heuristic.tolerance - 45.0).abs() < f32::EPSILON);
        assert_eq!(config.heuristic.estimator, BackgroundEstimator::Mean);
        assert_eq!(config.model.edge_mode, EdgeMode::Soft);
        assert!(config.disable_model);
        assert_eq!(CliConfigBuilder::output_path(&cli), PathBuf::from("out.png"));
    }

    #[test]
    fn test_alternative_method_flags_force_cheaper_path() {
        for flag in ["--force-alternative", "--use-alternative"] {
            let cli = parse(&["face.jpg", flag]);
            assert_eq!(
                CliConfigBuilder::resolve_tier(&cli),
                Some(CapabilityTier::Forced),
                "{flag}"
            );
        }

        let cli = parse(&["face.jpg", "--force-alternative", "--force-tier", "full"]);
        assert_eq!(CliConfigBuilder::resolve_tier(&cli), Some(CapabilityTier::Full));
    }

    #[test]
    fn test_invalid_tolerance_is_rejected() {
        let cli = parse(&["face.jpg", "--tolerance", "0"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }
}
