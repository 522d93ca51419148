//! The keypoint locator contract and shared foreground extraction.
//!
//! # Strategy pattern
//!
//! Each locator consumes one frame and the current parameter set and
//! returns either keypoints in full-frame coordinates or a typed
//! [`LocatorError`]. The embryo locator picks its strategy from
//! [`TunableParameters::embryo_strategy`] on every call, so operators
//! can switch strategies between specimens without rebuilding anything.

use image::GrayImage;

use crate::blur::gaussian_blur;
use crate::components::largest_component;
use crate::geometry::{BoundingBox, bounding_box};
use crate::params::TunableParameters;
use crate::threshold::{in_range, normalize};
use crate::types::{Frame, Located, LocatorError, Trace};

/// Locates keypoints of one object class in a camera frame.
pub trait Locator {
    /// Run the pipeline on `frame`.
    ///
    /// # Errors
    ///
    /// Returns a [`LocatorError`] describing the first stage that failed.
    /// Every error is recoverable at the specimen level.
    fn locate(&self, frame: &Frame, params: &TunableParameters) -> Result<Located, LocatorError>;
}

/// The largest object inside one gray-level band.
#[derive(Debug)]
pub(crate) struct Foreground {
    /// Contrast-stretched frame.
    pub normalized: GrayImage,
    /// Blurred frame, the source for later gray-level sampling.
    pub blurred: GrayImage,
    /// Mask of the selected component.
    pub mask: GrayImage,
    /// Tight box around `mask`.
    pub bbox: BoundingBox,
}

/// Normalize, blur, threshold to `lower..=upper` and keep the largest
/// component of at least `params.min_area` pixels.
pub(crate) fn extract_foreground(
    image: &GrayImage,
    lower: u8,
    upper: u8,
    params: &TunableParameters,
    trace: &mut Trace,
) -> Result<Foreground, LocatorError> {
    let normalized = normalize(image);
    let blurred = gaussian_blur(&normalized, params.blur_sigma);
    trace.record("blur", &blurred);

    let thresholded = in_range(&blurred, lower, upper);
    trace.record("threshold", &thresholded);

    let mask =
        largest_component(&thresholded, params.min_area).ok_or(LocatorError::NoForegroundArea)?;
    trace.record("component", &mask);

    // A selected component always has at least one pixel.
    let bbox = bounding_box(&mask).ok_or(LocatorError::NoForegroundArea)?;
    tracing::debug!(
        x = bbox.x0,
        y = bbox.y0,
        width = bbox.width(),
        height = bbox.height(),
        "foreground extracted"
    );

    Ok(Foreground {
        normalized,
        blurred,
        mask,
        bbox,
    })
}
