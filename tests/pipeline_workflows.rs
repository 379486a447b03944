//! End-to-end pipeline workflows
//!
//! Every test pins the capability signals with `StaticProbe` or a forced
//! tier, so no test touches the network or the real model.

mod common;

use common::{
    jpeg_upload, pixel_agreement, png_upload, portrait, BrokenInference, FailingStrategy,
    MismatchedMaskStrategy, PersonInference, RecordingReporter, BACKDROP, SUBJECT,
};
use idphoto_prep::{
    capability::{CapabilityTier, StaticProbe},
    config::PipelineConfig,
    pipeline::{PhotoPipeline, RESIZE_ONLY_WARNING},
    segmentation::{
        heuristic::border_width, HeuristicSegmenter, SegmentationStrategy, StrategyKind,
    },
    services::PipelineStage,
    types::{PipelineState, ProcessedImageResult, Segmentation, Severity, SourceImage},
};
use image::{Rgba, RgbaImage};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const WHITE: [u8; 4] = [255, 255, 255, 255];

fn forced(tier: CapabilityTier) -> PipelineConfig {
    PipelineConfig::builder().force_tier(tier).build().unwrap()
}

fn constrained_pipeline() -> PhotoPipeline {
    PhotoPipeline::builder()
        .config(forced(CapabilityTier::Constrained))
        .probe(Arc::new(StaticProbe::capable()))
        .inference(Arc::new(BrokenInference::default()))
        .build()
        .unwrap()
}

fn full_pipeline(inference: Arc<dyn idphoto_prep::InferenceCapability>) -> PhotoPipeline {
    PhotoPipeline::builder()
        .probe(Arc::new(StaticProbe::capable()))
        .inference(inference)
        .build()
        .unwrap()
}

fn canvas_pixel(result: &ProcessedImageResult, x: u32, y: u32) -> [u8; 4] {
    result
        .processed
        .as_ref()
        .unwrap()
        .canvas
        .image()
        .get_pixel(x, y)
        .0
}

#[tokio::test]
async fn test_landscape_png_on_constrained_host() {
    let result = constrained_pipeline()
        .process_image(png_upload(&portrait(2000, 1000)))
        .await;

    assert_eq!(result.final_state, PipelineState::Done);
    assert_eq!((result.width, result.height), (2000, 1000));
    assert_eq!(result.tier, Some(CapabilityTier::Constrained));
    assert_eq!(result.attempted_strategies(), vec![StrategyKind::Heuristic]);

    let output = result.processed.as_ref().unwrap();
    assert_eq!(output.canvas.dimensions(), (600, 600));
    assert_eq!(output.strategy, StrategyKind::Heuristic);
    assert!(!output.degraded);
    assert!(output.canvas.image().pixels().all(|p| p[3] == 255));

    // scaled to 600x300 and centered vertically
    assert_eq!(canvas_pixel(&result, 300, 10), WHITE);
    assert_eq!(canvas_pixel(&result, 300, 590), WHITE);
    // backdrop inside the placed image is replaced
    assert_eq!(canvas_pixel(&result, 30, 300), WHITE);
    // subject is kept
    assert_eq!(canvas_pixel(&result, 300, 300), SUBJECT);

    let severities: Vec<_> = result.validations.iter().map(|v| v.severity).collect();
    assert_eq!(
        severities,
        vec![
            Severity::Success,
            Severity::Success,
            Severity::Success,
            Severity::Info
        ]
    );
    assert!(result.head_height.is_none());
    assert!(result.head_height_percentage.is_none());
}

#[tokio::test]
async fn test_png_output_decodes_to_canvas() {
    let result = constrained_pipeline()
        .process_image(png_upload(&portrait(300, 400)))
        .await;
    let png = result.processed_png().unwrap();
    let decoded = image::load_from_memory(png).unwrap().to_rgba8();
    assert_eq!(&decoded, result.processed.as_ref().unwrap().canvas.image());
}

#[tokio::test]
async fn test_jpeg_upload() {
    let result = constrained_pipeline()
        .process_image(jpeg_upload(&portrait(800, 1000)))
        .await;
    assert_eq!(result.final_state, PipelineState::Done);
    assert!(!result.has_errors());
    assert_eq!(canvas_pixel(&result, 5, 300), WHITE);
}

#[tokio::test]
async fn test_model_strategy_used_on_full_tier() {
    let inference = Arc::new(PersonInference::default());
    let result = full_pipeline(inference.clone())
        .process_image(png_upload(&portrait(2000, 1000)))
        .await;

    assert_eq!(result.tier, Some(CapabilityTier::Full));
    assert_eq!(result.attempted_strategies(), vec![StrategyKind::Model]);
    assert_eq!(inference.calls(), 1);
    // the whole frame counts as person, so the backdrop survives
    assert_eq!(canvas_pixel(&result, 30, 300), BACKDROP);
    assert_eq!(canvas_pixel(&result, 300, 10), WHITE);
}

#[tokio::test]
async fn test_model_failure_falls_through_to_heuristic() {
    let inference = Arc::new(BrokenInference::default());
    let result = full_pipeline(inference.clone())
        .process_image(png_upload(&portrait(400, 400)))
        .await;

    assert_eq!(inference.calls(), 1);
    assert_eq!(
        result.attempted_strategies(),
        vec![StrategyKind::Model, StrategyKind::Heuristic]
    );
    assert!(!result.strategy_attempts[0].succeeded);
    assert!(result.strategy_attempts[0].error.is_some());
    assert!(result.strategy_attempts[1].succeeded);
    assert_eq!(
        result.processed.as_ref().unwrap().strategy,
        StrategyKind::Heuristic
    );
    assert!(!result
        .validations
        .iter()
        .any(|v| v.severity == Severity::Warning));
}

#[tokio::test]
async fn test_forced_tier_never_attempts_model() {
    for tier in [CapabilityTier::Constrained, CapabilityTier::Forced] {
        let inference = Arc::new(PersonInference::default());
        let pipeline = PhotoPipeline::builder()
            .config(forced(tier))
            .probe(Arc::new(StaticProbe::capable()))
            .inference(inference.clone())
            .build()
            .unwrap();
        let result = pipeline.process_image(png_upload(&portrait(200, 200))).await;

        assert_eq!(result.tier, Some(tier));
        assert_eq!(inference.calls(), 0);
        assert!(!result.attempted_strategies().contains(&StrategyKind::Model));
    }
}

#[tokio::test]
async fn test_weak_host_degrades_without_override() {
    let inference = Arc::new(PersonInference::default());
    let probe = StaticProbe {
        gpu: true,
        benchmark: Duration::from_secs(5),
        memory_gb: Some(16.0),
    };
    let pipeline = PhotoPipeline::builder()
        .probe(Arc::new(probe))
        .inference(inference.clone())
        .build()
        .unwrap();
    let result = pipeline.process_image(png_upload(&portrait(200, 200))).await;

    assert_eq!(result.tier, Some(CapabilityTier::Constrained));
    assert_eq!(inference.calls(), 0);
}

#[tokio::test]
async fn test_mismatched_mask_falls_back_to_resize_only() {
    let pipeline = PhotoPipeline::builder()
        .probe(Arc::new(StaticProbe::capable()))
        .model_strategy(Arc::new(MismatchedMaskStrategy))
        .build()
        .unwrap();
    let result = pipeline.process_image(png_upload(&portrait(600, 600))).await;

    assert_eq!(result.final_state, PipelineState::Done);
    let output = result.processed.as_ref().unwrap();
    assert!(output.degraded);
    assert_eq!(output.strategy, StrategyKind::Model);
    assert_eq!(output.canvas.dimensions(), (600, 600));
    // no segmentation was applied
    assert_eq!(canvas_pixel(&result, 5, 5), BACKDROP);
    assert!(result
        .validations
        .iter()
        .any(|v| v.severity == Severity::Warning && v.message == RESIZE_ONLY_WARNING));
}

#[tokio::test]
async fn test_every_strategy_failing_still_produces_output() {
    let pipeline = PhotoPipeline::builder()
        .probe(Arc::new(StaticProbe::capable()))
        .model_strategy(Arc::new(FailingStrategy(StrategyKind::Model)))
        .heuristic_strategy(Arc::new(FailingStrategy(StrategyKind::Heuristic)))
        .build()
        .unwrap();
    let result = pipeline.process_image(png_upload(&portrait(300, 300))).await;

    assert_eq!(
        result.attempted_strategies(),
        vec![
            StrategyKind::Model,
            StrategyKind::Heuristic,
            StrategyKind::Basic
        ]
    );
    assert_eq!(
        result.processed.as_ref().unwrap().strategy,
        StrategyKind::Basic
    );
    let warnings = result
        .validations
        .iter()
        .filter(|v| v.severity == Severity::Warning)
        .count();
    assert_eq!(warnings, 1);
}

#[tokio::test]
async fn test_transparent_upload_is_segmented_by_heuristic() {
    let image = RgbaImage::from_pixel(120, 80, Rgba([0, 0, 0, 0]));
    let result = constrained_pipeline().process_image(png_upload(&image)).await;

    assert_eq!(result.attempted_strategies(), vec![StrategyKind::Heuristic]);
    let output = result.processed.as_ref().unwrap();
    assert_eq!(output.strategy, StrategyKind::Heuristic);
    assert!(output.canvas.image().pixels().all(|p| p.0 == WHITE));
    assert!(!result
        .validations
        .iter()
        .any(|v| v.severity == Severity::Warning));
}

#[tokio::test]
async fn test_cutout_on_transparent_canvas_keeps_subject() {
    let image = RgbaImage::from_fn(200, 200, |x, y| {
        if (60..140).contains(&x) && (60..140).contains(&y) {
            Rgba(SUBJECT)
        } else {
            Rgba([0, 0, 0, 0])
        }
    });
    let result = constrained_pipeline().process_image(png_upload(&image)).await;

    assert_eq!(result.attempted_strategies(), vec![StrategyKind::Heuristic]);
    // 200x200 scales by 3 onto the 600x600 canvas
    assert_eq!(canvas_pixel(&result, 300, 300), SUBJECT);
    assert_eq!(canvas_pixel(&result, 30, 30), WHITE);
}

#[tokio::test]
async fn test_uniform_upload_becomes_blank_backdrop() {
    let image = RgbaImage::from_pixel(300, 300, Rgba(BACKDROP));
    let result = constrained_pipeline().process_image(png_upload(&image)).await;

    let output = result.processed.as_ref().unwrap();
    assert_eq!(output.strategy, StrategyKind::Heuristic);
    assert!(output.canvas.image().pixels().all(|p| p.0 == WHITE));
}

#[tokio::test]
async fn test_heuristic_reclassifies_own_output_border_as_background() {
    let result = constrained_pipeline()
        .process_image(jpeg_upload(&portrait(2000, 1000)))
        .await;
    let canvas = result.processed.as_ref().unwrap().canvas.image().clone();

    let segmenter = HeuristicSegmenter::default();
    let source = SourceImage::new(canvas).unwrap();
    let mask = match segmenter.segment(&source).await.unwrap() {
        Segmentation::Mask(mask) => mask,
        Segmentation::NoOp => panic!("heuristic should produce a mask"),
    };

    let (width, height) = mask.dimensions();
    let band = border_width(width, height, segmenter.config());
    let (mut border, mut background) = (0usize, 0usize);
    for y in 0..height {
        for x in 0..width {
            let in_band = x < band || y < band || x >= width - band || y >= height - band;
            if in_band {
                border += 1;
                if mask.is_background(x, y) {
                    background += 1;
                }
            }
        }
    }
    let ratio = background as f64 / border as f64;
    assert!(ratio >= 0.99, "border background ratio {ratio}");
}

#[tokio::test]
async fn test_repeated_runs_are_stable() {
    let pipeline = constrained_pipeline();
    let upload = png_upload(&portrait(900, 1200));

    let first = pipeline.process_image(upload.clone()).await;
    let second = pipeline.process_image(upload).await;

    assert_ne!(first.run_id, second.run_id);
    let a = first.processed.as_ref().unwrap().canvas.image();
    let b = second.processed.as_ref().unwrap().canvas.image();
    assert!(pixel_agreement(a, b) >= 0.99);
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let pipeline = constrained_pipeline();
    let (a, b) = tokio::join!(
        pipeline.process_image(png_upload(&portrait(400, 300))),
        pipeline.process_image(png_upload(&portrait(300, 400)))
    );

    assert_ne!(a.run_id, b.run_id);
    assert_eq!((a.width, a.height), (400, 300));
    assert_eq!((b.width, b.height), (300, 400));
    assert_eq!(a.final_state, PipelineState::Done);
    assert_eq!(b.final_state, PipelineState::Done);
}

#[tokio::test]
async fn test_progress_is_reported_in_order() {
    let reporter = Arc::new(RecordingReporter::default());
    let pipeline = PhotoPipeline::builder()
        .config(forced(CapabilityTier::Constrained))
        .probe(Arc::new(StaticProbe::capable()))
        .progress_reporter(reporter.clone())
        .build()
        .unwrap();
    pipeline.process_image(png_upload(&portrait(200, 200))).await;

    let progress = reporter.progress.lock().unwrap().clone();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    let stages = reporter.stages.lock().unwrap().clone();
    assert_eq!(stages.first(), Some(&PipelineStage::Validation));
    assert_eq!(stages.last(), Some(&PipelineStage::Completed));
    assert_eq!(reporter.completions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_report_serializes_run_summary() {
    let result = constrained_pipeline()
        .process_image(png_upload(&portrait(200, 200)))
        .await;
    let json = serde_json::to_value(result.report()).unwrap();

    assert_eq!(json["processed"], true);
    assert_eq!(json["strategy"], "heuristic");
    assert_eq!(json["tier"], "constrained");
    assert_eq!(json["final_state"], "done");
    assert_eq!(json["validations"][0]["type"], "success");
    assert_eq!(json["strategy_attempts"].as_array().unwrap().len(), 1);
}
