//! Embryo localization: the anatomical target keypoints.
//!
//! Two strategies share the same foreground extraction (the embryo is the
//! largest object in the band between the scissor gray level and
//! `embryo_gray_high`):
//!
//! - **Classical**: crop, fill, close, find the circular landmark, then
//!   centroid the dark tissue in the upper third and lower half of a
//!   vertical strip through the circle centre.
//! - **Learned**: crop, run the external segmenter, and sample the
//!   segmented body axis every somite height from the bottom up.

use std::sync::Arc;

use image::GrayImage;

use crate::canny::canny;
use crate::centroid::centroid;
use crate::circles::{detect_circles, mean_centre};
use crate::geometry::{crop_columns, crop_rows, crop_to_box, resize, resize_probability};
use crate::locator::{Locator, extract_foreground};
use crate::morphology::{close, fill_holes, open};
use crate::params::{EmbryoStrategy, TunableParameters};
use crate::segmenter::{Segmenter, check_shape};
use crate::threshold::{count_foreground, in_range, threshold_probability};
use crate::types::{
    Frame, Keypoint, KeypointTag, Located, LocatorError, PixelPoint, Region, Trace,
};

/// Locates the embryo's target keypoints.
///
/// The segmenter is only consulted by the learned strategy; without one,
/// that strategy fails with [`LocatorError::SegmenterUnavailable`].
#[derive(Clone, Default)]
pub struct EmbryoLocator {
    segmenter: Option<Arc<dyn Segmenter>>,
}

impl std::fmt::Debug for EmbryoLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbryoLocator")
            .field("segmenter", &self.segmenter.is_some())
            .finish()
    }
}

impl EmbryoLocator {
    /// Locator for the classical strategy only.
    #[must_use]
    pub const fn new() -> Self {
        Self { segmenter: None }
    }

    /// Locator that can also run the learned strategy.
    #[must_use]
    pub fn with_segmenter(segmenter: Arc<dyn Segmenter>) -> Self {
        Self {
            segmenter: Some(segmenter),
        }
    }
}

impl Locator for EmbryoLocator {
    fn locate(&self, frame: &Frame, params: &TunableParameters) -> Result<Located, LocatorError> {
        match params.embryo_strategy {
            EmbryoStrategy::Classical => locate_classical(frame.image(), params),
            EmbryoStrategy::Learned => {
                let segmenter = self.segmenter.as_deref().ok_or_else(|| {
                    LocatorError::SegmenterUnavailable("no segmenter configured".to_owned())
                })?;
                locate_learned(frame.image(), params, segmenter)
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn locate_classical(image: &GrayImage, params: &TunableParameters) -> Result<Located, LocatorError> {
    let mut trace = Trace::new(params.keep_intermediates);
    let fg = extract_foreground(
        image,
        params.scissor_gray_level,
        params.embryo_gray_high,
        params,
        &mut trace,
    )?;

    let mask_crop = crop_to_box(&fg.mask, fg.bbox, params.embryo_crop_margin);
    let blur_crop = crop_to_box(&fg.blurred, fg.bbox, params.embryo_crop_margin);

    let filled = fill_holes(&mask_crop.image);
    trace.record("filled", &filled);
    let closed = close(&filled, params.closing);
    trace.record("closed", &closed);

    let shape_centre = centroid(&closed).ok_or(LocatorError::NoCentroid(Region::Shape))?;
    tracing::debug!(x = shape_centre.x, y = shape_centre.y, "embryo shape centroid");

    let edges = canny(&closed, params.canny_low, params.canny_high);
    trace.record("edges", &edges);

    let circles = detect_circles(&closed, &edges, &params.circle);
    let (circle_x, circle_y) = mean_centre(&circles).ok_or(LocatorError::NoCircleDetected)?;
    tracing::debug!(x = circle_x, y = circle_y, count = circles.len(), "landmark circle");

    let cx = circle_x.max(0.0) as u32;
    let strip = crop_columns(
        &blur_crop.image,
        cx.saturating_sub(params.strip_half_width),
        cx.saturating_add(params.strip_half_width),
    );
    let strip_mask = in_range(&strip.image, 0, params.embryo_gray_low);
    trace.record("strip", &strip_mask);

    let height = strip_mask.height();
    let upper = crop_rows(&strip_mask, 0, height / 3);
    let lower = crop_rows(&strip_mask, height / 2, height);

    let upper_open = open(&upper.image, params.opening);
    trace.record("upper", &upper_open);
    let lower_open = open(&lower.image, params.opening);
    trace.record("lower", &lower_open);

    // Crop chain: frame -> embryo crop -> strip -> sub-region.
    let to_frame = |sub_offset: PixelPoint, p: PixelPoint| {
        blur_crop.to_source(strip.to_source(p.offset(sub_offset.x, sub_offset.y)))
    };
    let lower_pt = centroid(&lower_open)
        .map(|p| to_frame(lower.offset, p))
        .ok_or(LocatorError::NoCentroid(Region::Lower))?;
    let upper_pt = centroid(&upper_open)
        .map(|p| to_frame(upper.offset, p))
        .ok_or(LocatorError::NoCentroid(Region::Upper))?;

    let midpoint = PixelPoint::new((lower_pt.x + upper_pt.x) / 2, lower_pt.y);
    let target = lower_pt.offset(params.target_bias_x, params.target_bias_y);

    let keypoints = vec![
        Keypoint::at(lower_pt, KeypointTag::Reference),
        Keypoint::at(upper_pt, KeypointTag::Reference),
        Keypoint::at(midpoint, KeypointTag::Reference),
        Keypoint::at(target, KeypointTag::Target),
    ];
    tracing::debug!(x = target.x, y = target.y, "embryo target located");
    Ok(trace.finish(keypoints))
}

fn locate_learned(
    image: &GrayImage,
    params: &TunableParameters,
    segmenter: &dyn Segmenter,
) -> Result<Located, LocatorError> {
    let mut trace = Trace::new(params.keep_intermediates);
    let fg = extract_foreground(
        image,
        params.scissor_gray_level,
        params.embryo_gray_high,
        params,
        &mut trace,
    )?;

    let crop = crop_to_box(&fg.normalized, fg.bbox, params.embryo_crop_margin);
    let (crop_w, crop_h) = crop.image.dimensions();
    let side = params.learned.input_size.max(1);
    let input = resize(&crop.image, side, side);

    let output = segmenter
        .segment(&input)
        .and_then(|map| check_shape(&input, &map).map(|()| map))
        .map_err(|e| LocatorError::SegmenterUnavailable(e.to_string()))?;
    let probability = resize_probability(&output, crop_w, crop_h);
    let mask = threshold_probability(&probability, params.learned.threshold);
    trace.record("segmented", &mask);
    let foreground = count_foreground(&mask);
    tracing::debug!(foreground, "segmentation thresholded");
    if foreground == 0 {
        return Err(LocatorError::EmptyMask);
    }

    let step = params.somite_step_px();
    let keypoints: Vec<Keypoint> = sample_body_axis(&mask, step)
        .ok_or(LocatorError::EmptyMask)?
        .into_iter()
        .map(|p| Keypoint::at(crop.to_source(p), KeypointTag::Target))
        .collect();
    tracing::debug!(count = keypoints.len(), step, "body-axis keypoints");
    Ok(trace.finish(keypoints))
}

/// Mean foreground column every `step` rows, from the bottom-most
/// foreground row upwards. The top-most row is an exclusive bound, so a
/// body spanning `n * step` rows yields `n` samples and a single-row
/// mask yields none.
///
/// Returns `None` for an empty mask.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn sample_body_axis(mask: &GrayImage, step: u32) -> Option<Vec<PixelPoint>> {
    let (width, height) = mask.dimensions();
    // Per-row foreground column sums, only for rows that have any.
    let rows: Vec<(u32, u64, u64)> = (0..height)
        .filter_map(|y| {
            let (count, sum) = (0..width)
                .filter(|&x| mask.get_pixel(x, y).0[0] > 0)
                .fold((0u64, 0u64), |(n, s), x| (n + 1, s + u64::from(x)));
            (count > 0).then_some((y, count, sum))
        })
        .collect();
    let (&(top, ..), &(bottom, ..)) = (rows.first()?, rows.last()?);

    let step = step.max(1);
    let mut samples = Vec::new();
    let mut y = bottom;
    while y > top {
        // Closest foreground row; ties go to the lower (larger y) row.
        if let Some(&(_, count, sum)) = rows
            .iter()
            .min_by_key(|(row, ..)| (row.abs_diff(y), u32::MAX - row))
        {
            samples.push(PixelPoint::new((sum / count) as i32, y as i32));
        }
        match y.checked_sub(step) {
            Some(next) => y = next,
            None => break,
        }
    }
    Some(samples)
}
