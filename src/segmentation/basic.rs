//! Terminal no-op strategy

use super::{SegmentationStrategy, StrategyKind};
use crate::{
    error::Result,
    types::{Segmentation, SourceImage},
};
use async_trait::async_trait;

/// Performs no segmentation; the compositor only scales and centers
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicFallback;

#[async_trait]
impl SegmentationStrategy for BasicFallback {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Basic
    }

    async fn segment(&self, image: &SourceImage) -> Result<Segmentation> {
        log::debug!(
            "Basic fallback: keeping all {}x{} pixels",
            image.width(),
            image.height()
        );
        Ok(Segmentation::NoOp)
    }
}
