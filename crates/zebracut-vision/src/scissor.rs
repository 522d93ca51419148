//! Scissor localization: the tool tip keypoint.
//!
//! The scissor is the darkest object in the frame. Its two blades show
//! up as long steep edges on either side of the body centroid; the tip
//! is where the two blade lines cross, after each line is pulled
//! `line_inset` pixels towards the centre so the keypoint lands between
//! the blades rather than on their outer edges.

use crate::canny::canny;
use crate::centroid::centroid;
use crate::geometry::{crop_columns, crop_to_box, intersect};
use crate::lines::detect_line;
use crate::locator::{Locator, extract_foreground};
use crate::morphology::close;
use crate::params::TunableParameters;
use crate::types::{Frame, Keypoint, KeypointTag, Located, LocatorError, Region, Side, Trace};

/// Locates the scissor tip.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScissorLocator;

impl Locator for ScissorLocator {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn locate(&self, frame: &Frame, params: &TunableParameters) -> Result<Located, LocatorError> {
        let mut trace = Trace::new(params.keep_intermediates);
        let fg = extract_foreground(frame.image(), 0, params.scissor_gray_level, params, &mut trace)?;

        let crop = crop_to_box(&fg.mask, fg.bbox, params.scissor_crop_margin);
        let closed = close(&crop.image, params.closing);
        trace.record("closed", &closed);

        let body = centroid(&closed).ok_or(LocatorError::NoCentroid(Region::Shape))?;
        let split = body.x.max(0) as u32;

        let edges = canny(&closed, params.canny_low, params.canny_high);
        trace.record("edges", &edges);

        let left = crop_columns(&edges, 0, split);
        let right = crop_columns(&edges, split, edges.width());
        let left_line =
            detect_line(&left.image, &params.line).ok_or(LocatorError::NoLineDetected(Side::Left))?;
        let right_line = detect_line(&right.image, &params.line)
            .ok_or(LocatorError::NoLineDetected(Side::Right))?;

        let inset = f64::from(params.line_inset);
        let (crop_x, crop_y) = (f64::from(crop.offset.x), f64::from(crop.offset.y));
        let left_line = left_line.translate(crop_x + inset, crop_y);
        let right_line = right_line.translate(crop_x + f64::from(right.offset.x) - inset, crop_y);
        tracing::debug!(
            left_slope = left_line.slope_degrees(),
            right_slope = right_line.slope_degrees(),
            "blade lines"
        );

        let tip = intersect(&left_line, &right_line)?;
        let (x, y) = (tip.x as i64, tip.y as i64);
        if !frame.dimensions().contains(x, y) {
            return Err(LocatorError::IntersectionOutOfBounds { x, y });
        }

        // In bounds, so both coordinates fit the frame's u32 range.
        let tool = Keypoint::new(x as i32, y as i32, KeypointTag::Tool);
        tracing::debug!(x = tool.x, y = tool.y, "scissor tip located");
        Ok(trace.finish(vec![tool]))
    }
}
