//! Shared fixtures and test doubles for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use idphoto_prep::{
    error::{PhotoError, Result},
    inference::{InferenceCapability, LabeledMask},
    segmentation::{SegmentationStrategy, StrategyKind},
    services::{InputFile, PipelineStage, ProgressReporter, ProgressUpdate},
    types::{ForegroundMask, ProcessingTimings, Segmentation, Severity, SourceImage},
};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use ndarray::Array2;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const BACKDROP: [u8; 4] = [240, 240, 240, 255];
pub const SUBJECT: [u8; 4] = [70, 50, 140, 255];

/// Light uniform backdrop with a centered elliptical subject
pub fn portrait(width: u32, height: u32) -> RgbaImage {
    let (cx, cy) = (f64::from(width) / 2.0, f64::from(height) / 2.0);
    let (rx, ry) = (f64::from(width) / 5.0, f64::from(height) / 3.0);
    RgbaImage::from_fn(width, height, |x, y| {
        let dx = (f64::from(x) + 0.5 - cx) / rx;
        let dy = (f64::from(y) + 0.5 - cy) / ry;
        if dx * dx + dy * dy <= 1.0 {
            Rgba(SUBJECT)
        } else {
            Rgba(BACKDROP)
        }
    })
}

pub fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn encode_jpeg(image: &RgbaImage) -> Vec<u8> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut bytes = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .unwrap();
    bytes
}

pub fn png_upload(image: &RgbaImage) -> InputFile {
    InputFile::from_bytes("portrait.png", "image/png", encode_png(image))
}

pub fn jpeg_upload(image: &RgbaImage) -> InputFile {
    InputFile::from_bytes("portrait.jpg", "image/jpeg", encode_jpeg(image))
}

/// Inference that reports the whole frame as a person and counts calls
#[derive(Default)]
pub struct PersonInference {
    calls: AtomicUsize,
}

impl PersonInference {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceCapability for PersonInference {
    fn name(&self) -> &str {
        "person"
    }

    async fn infer(&self, image: std::sync::Arc<RgbaImage>) -> Result<Vec<LabeledMask>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (width, height) = image.dimensions();
        Ok(vec![
            LabeledMask::new(
                "wall",
                Array2::zeros((height as usize, width as usize)),
            ),
            LabeledMask::new(
                "person",
                Array2::ones((height as usize, width as usize)),
            ),
        ])
    }
}

/// Inference that always fails, as when the model cannot be loaded
#[derive(Default)]
pub struct BrokenInference {
    calls: AtomicUsize,
}

impl BrokenInference {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceCapability for BrokenInference {
    fn name(&self) -> &str {
        "broken"
    }

    async fn infer(&self, _image: std::sync::Arc<RgbaImage>) -> Result<Vec<LabeledMask>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PhotoError::model("weights could not be loaded"))
    }
}

/// Strategy returning a mask that does not match the source size
pub struct MismatchedMaskStrategy;

#[async_trait]
impl SegmentationStrategy for MismatchedMaskStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Model
    }

    async fn segment(&self, image: &SourceImage) -> Result<Segmentation> {
        Ok(Segmentation::Mask(ForegroundMask::full(
            image.width() + 1,
            image.height(),
        )))
    }
}

/// Strategy that always fails
pub struct FailingStrategy(pub StrategyKind);

#[async_trait]
impl SegmentationStrategy for FailingStrategy {
    fn kind(&self) -> StrategyKind {
        self.0
    }

    async fn segment(&self, _image: &SourceImage) -> Result<Segmentation> {
        Err(PhotoError::heuristic_failed("forced failure"))
    }
}

/// Reporter that records everything it receives
#[derive(Default)]
pub struct RecordingReporter {
    pub stages: Mutex<Vec<PipelineStage>>,
    pub progress: Mutex<Vec<u8>>,
    pub notifications: Mutex<Vec<(Severity, String)>>,
    pub completions: AtomicUsize,
}

impl ProgressReporter for RecordingReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.stages.lock().unwrap().push(update.stage);
        self.progress.lock().unwrap().push(update.progress);
    }

    fn report_completion(&self, _timings: &ProcessingTimings) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }

    fn report_error(&self, _stage: PipelineStage, _error: &str) {}

    fn notify(&self, severity: Severity, message: &str) {
        self.notifications
            .lock()
            .unwrap()
            .push((severity, message.to_string()));
    }
}

/// Fraction of identical pixels between two equally sized images
pub fn pixel_agreement(a: &RgbaImage, b: &RgbaImage) -> f64 {
    assert_eq!(a.dimensions(), b.dimensions());
    let same = a.pixels().zip(b.pixels()).filter(|(p, q)| p == q).count();
    same as f64 / f64::from(a.width() * a.height())
}
