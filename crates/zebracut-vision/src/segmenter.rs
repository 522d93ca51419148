//! Boundary to the external segmentation network.
//!
//! The learned embryo strategy hands a fixed-size square raster to a
//! [`Segmenter`] and receives a per-pixel foreground probability map of
//! the same size. Inference itself happens elsewhere.

use crate::types::{GrayImage, ProbabilityMap};

/// Errors reported by a segmentation backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmenterError {
    /// The model is not loaded or its runtime is unavailable.
    #[error("segmentation model unavailable: {0}")]
    Unavailable(String),

    /// The model ran but returned a map of the wrong size.
    #[error("segmentation output is {got_width}x{got_height}, expected {width}x{height}")]
    ShapeMismatch {
        /// Expected width.
        width: u32,
        /// Expected height.
        height: u32,
        /// Returned width.
        got_width: u32,
        /// Returned height.
        got_height: u32,
    },

    /// Inference failed.
    #[error("segmentation failed: {0}")]
    Inference(String),
}

/// Produces a foreground probability map for a square input raster.
///
/// Calls are synchronous and may be slow. Implementations must be
/// shareable with the automation worker thread.
pub trait Segmenter: Send + Sync {
    /// Segment `image`, returning probabilities in `0.0..=1.0` with the
    /// same dimensions as the input.
    ///
    /// # Errors
    ///
    /// Returns a [`SegmenterError`] when inference cannot run or returns
    /// malformed output.
    fn segment(&self, image: &GrayImage) -> Result<ProbabilityMap, SegmenterError>;
}

/// Stand-in segmenter scoring darker pixels as more likely foreground.
///
/// Useful for dry runs and tests where no network is available: pixels
/// at or below `cutoff` map linearly onto `1.0..=0.5`, brighter ones
/// onto `0.5..=0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntensitySegmenter {
    /// Gray level that maps to probability 0.5.
    pub cutoff: u8,
}

impl Default for IntensitySegmenter {
    fn default() -> Self {
        Self { cutoff: 180 }
    }
}

impl Segmenter for IntensitySegmenter {
    fn segment(&self, image: &GrayImage) -> Result<ProbabilityMap, SegmenterError> {
        let cutoff = f32::from(self.cutoff);
        Ok(ProbabilityMap::from_fn(image.width(), image.height(), |x, y| {
            let v = f32::from(image.get_pixel(x, y).0[0]);
            let p = if v <= cutoff {
                1.0 - 0.5 * v / cutoff.max(1.0)
            } else {
                0.5 * (255.0 - v) / (255.0 - cutoff).max(1.0)
            };
            image::Luma([p.clamp(0.0, 1.0)])
        }))
    }
}

/// Check a backend's output against the input size.
///
/// # Errors
///
/// Returns [`SegmenterError::ShapeMismatch`] when the sizes differ.
pub fn check_shape(input: &GrayImage, output: &ProbabilityMap) -> Result<(), SegmenterError> {
    if input.dimensions() == output.dimensions() {
        return Ok(());
    }
    Err(SegmenterError::ShapeMismatch {
        width: input.width(),
        height: input.height(),
        got_width: output.width(),
        got_height: output.height(),
    })
}
