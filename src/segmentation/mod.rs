//! Foreground segmentation strategies
//!
//! Three interchangeable strategies share the [`SegmentationStrategy`]
//! trait. The pipeline walks them in a fixed preference order and falls
//! through on failure:
//!
//! 1. [`ModelSegmenter`] - learned semantic segmentation
//! 2. [`HeuristicSegmenter`] - border color sampling
//! 3. [`BasicFallback`] - no segmentation at all, never fails

pub mod basic;
pub mod heuristic;
pub mod model;

pub use basic::BasicFallback;
pub use heuristic::{estimate_background, sample_border, HeuristicSegmenter};
pub use model::ModelSegmenter;

use crate::{
    capability::CapabilityTier,
    error::Result,
    types::{Segmentation, SourceImage},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identifies a segmentation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Model,
    Heuristic,
    Basic,
}

impl StrategyKind {
    /// Strategies eligible for a tier, in preference order
    ///
    /// The model strategy is only eligible on the `Full` tier and when not
    /// disabled; the basic fallback always terminates the chain.
    #[must_use]
    pub fn chain_for(tier: CapabilityTier, model_enabled: bool) -> Vec<Self> {
        let mut chain = Vec::with_capacity(3);
        if tier.allows_model() && model_enabled {
            chain.push(Self::Model);
        }
        chain.push(Self::Heuristic);
        chain.push(Self::Basic);
        chain
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::Heuristic => write!(f, "heuristic"),
            Self::Basic => write!(f, "basic"),
        }
    }
}

/// A way of deciding which pixels belong to the subject
///
/// Implementations must not mutate the source image. A returned mask must
/// match the source dimensions exactly.
#[async_trait]
pub trait SegmentationStrategy: Send + Sync {
    /// Which strategy this is
    fn kind(&self) -> StrategyKind;

    /// Segment the subject from its backdrop
    ///
    /// # Errors
    /// - Strategy-specific failures; the caller falls through to the next
    ///   strategy in the chain
    async fn segment(&self, image: &SourceImage) -> Result<Segmentation>;
}
