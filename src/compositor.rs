//! Compositing onto the fixed-size output canvas
//!
//! The mask is applied at source resolution first: background pixels take
//! the backdrop color, soft mask values blend, and transparent source pixels
//! are flattened onto the backdrop. The flattened image is then scaled with a
//! single uniform factor and centered on a canvas pre-filled with the
//! backdrop color, so the output never has transparent pixels.

use crate::{
    config::{BackgroundColor, PhotoRequirements},
    error::{PhotoError, Result},
    types::{CompositeCanvas, ForegroundMask, Segmentation, SourceImage},
};
use image::{imageops, Rgba, RgbaImage};
use tracing::{debug, instrument};

/// Aspect-preserving placement of a source inside the target canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitGeometry {
    /// Uniform scale, `min(target_w / source_w, target_h / source_h)`
    pub scale: f64,
    pub scaled_width: u32,
    pub scaled_height: u32,
    /// Left edge on the canvas; negative values clip symmetrically
    pub offset_x: i64,
    /// Top edge on the canvas; negative values clip symmetrically
    pub offset_y: i64,
}

impl FitGeometry {
    /// Compute placement for a source of the given size
    ///
    /// # Errors
    /// - Zero-sized source or target
    pub fn compute(
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Self> {
        if source_width == 0 || source_height == 0 || target_width == 0 || target_height == 0 {
            return Err(PhotoError::composition(format!(
                "Cannot fit {}x{} into {}x{}",
                source_width, source_height, target_width, target_height
            )));
        }

        let scale = (f64::from(target_width) / f64::from(source_width))
            .min(f64::from(target_height) / f64::from(source_height));
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).max(1);
        let scaled_width = scaled(source_width).min(target_width);
        let scaled_height = scaled(source_height).min(target_height);

        Ok(Self {
            scale,
            scaled_width,
            scaled_height,
            offset_x: (i64::from(target_width) - i64::from(scaled_width)) / 2,
            offset_y: (i64::from(target_height) - i64::from(scaled_height)) / 2,
        })
    }
}

/// Composite a segmented source onto the requirement-sized canvas
///
/// # Errors
/// - Mask dimensions differ from the source
/// - Canvas allocation failure
#[instrument(skip_all, fields(source = ?image.dimensions()))]
pub fn composite(
    image: &SourceImage,
    segmentation: &Segmentation,
    requirements: &PhotoRequirements,
) -> Result<CompositeCanvas> {
    let mask = match segmentation {
        Segmentation::Mask(mask) => {
            if !mask.matches(image) {
                return Err(PhotoError::composition(format!(
                    "Mask is {:?} but source is {:?}",
                    mask.dimensions(),
                    image.dimensions()
                )));
            }
            Some(mask)
        },
        Segmentation::NoOp => None,
    };

    let flattened = flatten(image.pixels(), mask, requirements.background_color);
    place(&flattened, requirements)
}

/// Scale and center the source without any segmentation
///
/// Used when compositing a segmented image failed; transparent source
/// pixels are still flattened onto the backdrop.
///
/// # Errors
/// - Canvas allocation failure
pub fn resize_and_center(
    image: &SourceImage,
    requirements: &PhotoRequirements,
) -> Result<CompositeCanvas> {
    let flattened = flatten(image.pixels(), None, requirements.background_color);
    place(&flattened, requirements)
}

fn place(flattened: &RgbaImage, requirements: &PhotoRequirements) -> Result<CompositeCanvas> {
    let (width, height) = flattened.dimensions();
    let geometry = FitGeometry::compute(width, height, requirements.width, requirements.height)?;
    debug!(?geometry, "Placing source on canvas");

    let mut canvas = CompositeCanvas::filled(
        requirements.width,
        requirements.height,
        requirements.background_color,
    )?;

    let scaled = if (geometry.scaled_width, geometry.scaled_height) == (width, height) {
        flattened.clone()
    } else {
        imageops::resize(
            flattened,
            geometry.scaled_width,
            geometry.scaled_height,
            imageops::FilterType::Triangle,
        )
    };
    imageops::overlay(
        canvas.image_mut(),
        &scaled,
        geometry.offset_x,
        geometry.offset_y,
    );

    if canvas.dimensions() != (requirements.width, requirements.height) {
        return Err(PhotoError::composition("Canvas size changed while drawing"));
    }
    Ok(canvas)
}

/// Apply the mask and source alpha against the backdrop, producing opaque pixels
fn flatten(pixels: &RgbaImage, mask: Option<&ForegroundMask>, background: BackgroundColor) -> RgbaImage {
    let [br, bg, bb] = background.0;
    let mut out = RgbaImage::new(pixels.width(), pixels.height());
    for (x, y, pixel) in pixels.enumerate_pixels() {
        let keep = mask.map_or(255, |m| m.value(x, y));
        let alpha = u32::from(keep) * u32::from(pixel[3]) / 255;
        let blend = |src: u8, back: u8| -> u8 {
            let value = (u32::from(src) * alpha + u32::from(back) * (255 - alpha) + 127) / 255;
            #[allow(clippy::cast_possible_truncation)]
            let value = value.min(255) as u8;
            value
        };
        out.put_pixel(
            x,
            y,
            Rgba([
                blend(pixel[0], br),
                blend(pixel[1], bg),
                blend(pixel[2], bb),
                255,
            ]),
        );
    }
    out
}
