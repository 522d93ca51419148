//! zebracut-vision: keypoint extraction for embryo dissection (sans-IO).
//!
//! Turns one grayscale camera frame into tagged keypoints through:
//! normalize -> blur -> gray-band threshold -> largest component ->
//! crop -> morphology -> edges -> Hough circle/line detection ->
//! centroids / line intersection.
//!
//! Two locators implement the [`Locator`] contract:
//!
//! - [`EmbryoLocator`] finds the anatomical target, either classically
//!   or through an external [`Segmenter`].
//! - [`ScissorLocator`] finds the tool tip.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! rasters and returns structured data. Devices, threads and the
//! dissection state machine live in `zebracut-automation`.

pub mod blur;
pub mod canny;
pub mod centroid;
pub mod circles;
pub mod components;
pub mod embryo;
pub mod geometry;
pub mod lines;
pub mod locator;
pub mod morphology;
pub mod params;
pub mod scissor;
pub mod segmenter;
pub mod target;
pub mod threshold;
pub mod types;

/// Stateless raster primitives the locators are built from.
///
/// None of these mutate their input.
pub mod ops {
    pub use crate::blur::gaussian_blur;
    pub use crate::canny::canny;
    pub use crate::centroid::centroid;
    pub use crate::circles::{Circle, detect_circles, mean_centre};
    pub use crate::components::{Components, components, largest_component};
    pub use crate::geometry::{
        BoundingBox, Crop, bounding_box, crop_columns, crop_rows, crop_to_box, intersect, resize,
        resize_probability,
    };
    pub use crate::lines::{LineSegment, Point, detect_line};
    pub use crate::morphology::{close, fill_holes, open};
    pub use crate::threshold::{count_foreground, in_range, normalize, threshold_probability};
}

pub use embryo::EmbryoLocator;
pub use locator::Locator;
pub use params::{
    CircleParams, EmbryoStrategy, KernelShape, LearnedParams, LineParams, MorphKernel,
    TunableParameters,
};
pub use scissor::ScissorLocator;
pub use segmenter::{IntensitySegmenter, Segmenter, SegmenterError};
pub use target::select_target;
pub use types::{
    Dimensions, Frame, GrayImage, Keypoint, KeypointTag, Located, LocatorError, PixelPoint,
    ProbabilityMap, Region, Side, StageImage,
};

