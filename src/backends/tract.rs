//! Tract inference backend for semantic segmentation models
//!
//! Runs an ONNX SegFormer-style model with Tract, a pure Rust inference
//! engine. The model is fetched through [`ModelStore`] and compiled lazily
//! on the first call; later calls reuse the compiled plan.
//!
//! Output logits `[1, classes, h, w]` are turned into per-pixel softmax
//! probabilities. Only labels that win the per-pixel argmax somewhere are
//! returned, mirroring how semantic segmentation pipelines report the
//! segments present in an image.

use crate::{
    config::ModelConfig,
    error::{PhotoError, Result},
    inference::{InferenceCapability, LabeledMask},
    models::ModelStore,
    services::progress::ProgressReporter,
};
use async_trait::async_trait;
use image::{imageops, RgbaImage};
use instant::Instant;
use ndarray::Array2;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

struct LoadedModel {
    plan: TractModel,
    labels: Vec<String>,
}

/// Tract-backed inference capability
pub struct TractInference {
    config: ModelConfig,
    store: ModelStore,
    reporter: Arc<dyn ProgressReporter>,
    loaded: OnceCell<Arc<LoadedModel>>,
}

impl std::fmt::Debug for TractInference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TractInference")
            .field("model_id", &self.config.model_id)
            .field("loaded", &self.loaded.initialized())
            .finish()
    }
}

impl TractInference {
    /// Create a backend; nothing is downloaded until the first inference
    ///
    /// # Errors
    /// - Cache directory or HTTP client setup failures
    pub fn new(config: ModelConfig, reporter: Arc<dyn ProgressReporter>) -> Result<Self> {
        Ok(Self {
            store: ModelStore::new(&config)?,
            config,
            reporter,
            loaded: OnceCell::new(),
        })
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    async fn model(&self) -> Result<Arc<LoadedModel>> {
        self.loaded
            .get_or_try_init(|| self.load())
            .await
            .map(Arc::clone)
    }

    async fn load(&self) -> Result<Arc<LoadedModel>> {
        let start = Instant::now();
        let files = self.store.ensure_model(self.reporter.as_ref()).await?;
        let metadata = files.metadata()?;
        let weights = files.read_weights()?;

        log::info!("🚀 Initializing Tract backend");
        log::info!("🧠 Model: {}", self.config.model_id);
        #[allow(clippy::cast_precision_loss)]
        let size_mb = weights.len() as f64 / (1024.0 * 1024.0);
        log::info!("📏 Model size: {size_mb:.2} MB, {} labels", metadata.labels.len());

        let size = self.config.input_size as usize;
        let plan = tokio::task::spawn_blocking(move || compile(weights, size))
            .await
            .map_err(|e| PhotoError::internal(format!("Model compile task failed: {}", e)))??;

        log::info!(
            "✅ Tract backend initialized in {}ms",
            start.elapsed().as_millis()
        );
        Ok(Arc::new(LoadedModel {
            plan,
            labels: metadata.labels,
        }))
    }
}

fn compile(weights: Vec<u8>, size: usize) -> Result<TractModel> {
    onnx()
        .model_for_read(&mut std::io::Cursor::new(weights))
        .map_err(|e| PhotoError::model(format!("Failed to load ONNX model: {e}")))?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
        )
        .map_err(|e| PhotoError::model(format!("Failed to set input shape: {e}")))?
        .into_optimized()
        .map_err(|e| PhotoError::model(format!("Failed to optimize model: {e}")))?
        .into_runnable()
        .map_err(|e| PhotoError::model(format!("Failed to create runnable model: {e}")))
}

#[async_trait]
impl InferenceCapability for TractInference {
    fn name(&self) -> &str {
        "tract"
    }

    async fn infer(&self, image: Arc<RgbaImage>) -> Result<Vec<LabeledMask>> {
        let model = self.model().await?;
        let size = self.config.input_size;
        let mean = self.config.normalization_mean;
        let std_dev = self.config.normalization_std;

        tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let input = preprocess(&image, size, mean, std_dev);
            let side = size as usize;
            let tensor = Tensor::from_shape(&[1, 3, side, side], &input)
                .map_err(|e| PhotoError::model(format!("Failed to build input tensor: {e}")))?;

            let outputs = model
                .plan
                .run(tvec![tensor.into()])
                .map_err(|e| PhotoError::model(format!("Tract inference failed: {e}")))?;
            let logits = outputs
                .into_iter()
                .next()
                .ok_or_else(|| PhotoError::model("No output tensor found"))?;
            let data = logits
                .as_slice::<f32>()
                .map_err(|e| PhotoError::model(format!("Failed to read output tensor: {e}")))?;

            log::debug!(
                "Tract inference completed in {}ms, output {:?}",
                start.elapsed().as_millis(),
                logits.shape()
            );
            logits_to_masks(data, logits.shape(), &model.labels)
        })
        .await
        .map_err(|e| PhotoError::internal(format!("Inference task failed: {}", e)))?
    }
}

/// Stretch to `size`x`size` and normalize into NCHW order
fn preprocess(image: &RgbaImage, size: u32, mean: [f32; 3], std_dev: [f32; 3]) -> Vec<f32> {
    let resized = imageops::resize(image, size, size, imageops::FilterType::Triangle);
    let plane = (size as usize) * (size as usize);
    let mut data = vec![0.0f32; plane * 3];
    for (i, pixel) in resized.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = (f32::from(pixel[c]) / 255.0 - mean[c]) / std_dev[c];
        }
    }
    data
}

/// Convert `[1, classes, h, w]` logits into softmax score maps
fn logits_to_masks(data: &[f32], shape: &[usize], labels: &[String]) -> Result<Vec<LabeledMask>> {
    let &[batch, classes, height, width] = shape else {
        return Err(PhotoError::model(format!(
            "Expected 4D logits, got shape {:?}",
            shape
        )));
    };
    if batch != 1 || classes == 0 || height == 0 || width == 0 {
        return Err(PhotoError::model(format!("Unexpected logits shape {:?}", shape)));
    }
    if classes != labels.len() {
        return Err(PhotoError::model(format!(
            "Model produced {} classes but config lists {} labels",
            classes,
            labels.len()
        )));
    }
    let plane = height * width;
    if data.len() != classes * plane {
        return Err(PhotoError::model("Logits buffer does not match its shape"));
    }

    let mut probabilities = vec![0.0f32; classes * plane];
    let mut winners = vec![false; classes];
    for i in 0..plane {
        let logit = |c: usize| data[c * plane + i];
        let max = (0..classes).map(logit).fold(f32::NEG_INFINITY, f32::max);
        let sum: f32 = (0..classes).map(|c| (logit(c) - max).exp()).sum();
        let mut best = 0;
        for c in 0..classes {
            let p = (logit(c) - max).exp() / sum;
            probabilities[c * plane + i] = p;
            if p > probabilities[best * plane + i] {
                best = c;
            }
        }
        winners[best] = true;
    }

    winners
        .iter()
        .enumerate()
        .filter(|&(_, &won)| won)
        .map(|(c, _)| {
            let scores = Array2::from_shape_vec(
                (height, width),
                probabilities[c * plane..(c + 1) * plane].to_vec(),
            )
            .map_err(|e| PhotoError::model(format!("Failed to reshape scores: {e}")))?;
            Ok(LabeledMask::new(labels[c].clone(), scores))
        })
        .collect()
}
