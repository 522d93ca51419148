//! Centre of mass of a binary mask via raw image moments.

use image::GrayImage;

use crate::types::PixelPoint;

/// Centroid of the foreground of `mask`, weighted by pixel value.
///
/// Returns `None` when the mask has no foreground, and also when every
/// pixel carries the same value: a uniform mask has no shape to localize
/// and its "centroid" would only be the geometric centre of the crop.
/// Coordinates are truncated towards zero, matching integer pixel
/// addressing.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::similar_names
)]
pub fn centroid(mask: &GrayImage) -> Option<PixelPoint> {
    let first = mask.pixels().next()?.0[0];
    if mask.pixels().all(|p| p.0[0] == first) {
        return None;
    }

    let (mut m00, mut m10, mut m01) = (0u64, 0u64, 0u64);
    for (x, y, p) in mask.enumerate_pixels() {
        let v = u64::from(p.0[0]);
        m00 += v;
        m10 += v * u64::from(x);
        m01 += v * u64::from(y);
    }
    if m00 == 0 {
        return None;
    }
    Some(PixelPoint::new(
        (m10 as f64 / m00 as f64) as i32,
        (m01 as f64 / m00 as f64) as i32,
    ))
}
