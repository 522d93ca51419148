//! Bounding boxes, clamped crops, resizing and line intersection.
//!
//! Crops always report the offset of their top-left corner in the
//! source image so that keypoints found inside a crop can be shifted
//! back into full-frame coordinates.

use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::lines::{LineSegment, Point};
use crate::types::{LocatorError, PixelPoint, ProbabilityMap};

/// Determinants smaller than this are treated as parallel lines.
pub const PARALLEL_EPSILON: f64 = 1e-9;

/// Axis-aligned box in pixel coordinates, `x1`/`y1` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    /// Left column (inclusive).
    pub x0: u32,
    /// Top row (inclusive).
    pub y0: u32,
    /// Right column (exclusive).
    pub x1: u32,
    /// Bottom row (exclusive).
    pub y1: u32,
}

impl BoundingBox {
    /// Box width.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    /// Box height.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    /// Grow by `margin` on every side, clamped to a `width x height` frame.
    #[must_use]
    pub fn expand(self, margin: u32, width: u32, height: u32) -> Self {
        Self {
            x0: self.x0.saturating_sub(margin),
            y0: self.y0.saturating_sub(margin),
            x1: self.x1.saturating_add(margin).min(width),
            y1: self.y1.saturating_add(margin).min(height),
        }
    }
}

/// A cropped raster with the position of its top-left corner.
#[derive(Debug, Clone)]
pub struct Crop {
    /// The cropped pixels.
    pub image: GrayImage,
    /// Top-left corner in the source image.
    pub offset: PixelPoint,
}

impl Crop {
    /// Map a point inside the crop back to source coordinates.
    #[must_use]
    pub const fn to_source(&self, point: PixelPoint) -> PixelPoint {
        point.offset(self.offset.x, self.offset.y)
    }
}

/// Tight bounding box of the non-zero pixels, or `None` for an empty mask.
#[must_use]
pub fn bounding_box(mask: &GrayImage) -> Option<BoundingBox> {
    let mut bbox: Option<BoundingBox> = None;
    for (x, y, p) in mask.enumerate_pixels() {
        if p.0[0] == 0 {
            continue;
        }
        bbox = Some(match bbox {
            None => BoundingBox {
                x0: x,
                y0: y,
                x1: x + 1,
                y1: y + 1,
            },
            Some(b) => BoundingBox {
                x0: b.x0.min(x),
                y0: b.y0.min(y),
                x1: b.x1.max(x + 1),
                y1: b.y1.max(y + 1),
            },
        });
    }
    bbox
}

#[allow(clippy::cast_possible_wrap)]
fn crop_raw(image: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) -> Crop {
    let x1 = x1.min(image.width());
    let y1 = y1.min(image.height());
    let x0 = x0.min(x1);
    let y0 = y0.min(y1);
    Crop {
        image: imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image(),
        offset: PixelPoint::new(x0 as i32, y0 as i32),
    }
}

/// Crop `image` to `bbox` grown by `margin`, clamped to the image.
#[must_use = "returns the crop"]
pub fn crop_to_box(image: &GrayImage, bbox: BoundingBox, margin: u32) -> Crop {
    let b = bbox.expand(margin, image.width(), image.height());
    crop_raw(image, b.x0, b.y0, b.x1, b.y1)
}

/// Columns `x0..x1` of `image` (full height), clamped.
#[must_use = "returns the crop"]
pub fn crop_columns(image: &GrayImage, x0: u32, x1: u32) -> Crop {
    crop_raw(image, x0, 0, x1, image.height())
}

/// Rows `y0..y1` of `image` (full width), clamped.
#[must_use = "returns the crop"]
pub fn crop_rows(image: &GrayImage, y0: u32, y1: u32) -> Crop {
    crop_raw(image, 0, y0, image.width(), y1)
}

/// Resample a grayscale raster to `width x height` (bilinear).
#[must_use = "returns the resized image"]
pub fn resize(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Resample a probability map to `width x height` (bilinear).
#[must_use = "returns the resized map"]
pub fn resize_probability(map: &ProbabilityMap, width: u32, height: u32) -> ProbabilityMap {
    if map.dimensions() == (width, height) {
        return map.clone();
    }
    imageops::resize(map, width, height, FilterType::Triangle)
}

/// Intersection of the infinite lines through two segments.
///
/// Uses the two-line determinant formula.
///
/// # Errors
///
/// Returns [`LocatorError::ParallelLines`] when the determinant is below
/// [`PARALLEL_EPSILON`] in magnitude.
pub fn intersect(a: &LineSegment, b: &LineSegment) -> Result<Point, LocatorError> {
    let (x1, y1, x2, y2) = (a.start.x, a.start.y, a.end.x, a.end.y);
    let (x3, y3, x4, y4) = (b.start.x, b.start.y, b.end.x, b.end.y);
    let det = (x1 - x2) * (y3 - y4) - (y1 - y2) * (x3 - x4);
    if det.abs() < PARALLEL_EPSILON {
        return Err(LocatorError::ParallelLines);
    }
    let cross_a = x1 * y2 - y1 * x2;
    let cross_b = x3 * y4 - y3 * x4;
    Ok(Point::new(
        (cross_a * (x3 - x4) - (x1 - x2) * cross_b) / det,
        (cross_a * (y3 - y4) - (y1 - y2) * cross_b) / det,
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Luma;

    fn seg(x1: f64, y1: f64, x2: f64, y2: f64) -> LineSegment {
        LineSegment::new(Point::new(x1, y1), Point::new(x2, y2))
    }

    #[test]
    fn bounding_box_of_empty_mask_is_none() {
        assert_eq!(bounding_box(&GrayImage::new(5, 5)), None);
    }

    #[test]
    fn bounding_box_is_tight_and_exclusive() {
        let mut mask = GrayImage::new(20, 20);
        mask.put_pixel(3, 7, Luma([255]));
        mask.put_pixel(12, 4, Luma([255]));
        let b = bounding_box(&mask).unwrap();
        assert_eq!(
            b,
            BoundingBox {
                x0: 3,
                y0: 4,
                x1: 13,
                y1: 8
            }
        );
        assert_eq!((b.width(), b.height()), (10, 4));
    }

    #[test]
    fn crop_margin_is_clamped_to_frame() {
        let img = GrayImage::new(50, 40);
        let bbox = BoundingBox {
            x0: 2,
            y0: 30,
            x1: 20,
            y1: 38,
        };
        let crop = crop_to_box(&img, bbox, 10);
        assert_eq!(crop.offset, PixelPoint::new(0, 20));
        assert_eq!(crop.image.dimensions(), (30, 20));
    }

    #[test]
    fn crop_maps_points_back_to_source() {
        let mut img = GrayImage::new(30, 30);
        img.put_pixel(17, 9, Luma([200]));
        let crop = crop_columns(&img, 10, 25);
        assert_eq!(crop.image.get_pixel(7, 9).0[0], 200);
        assert_eq!(crop.to_source(PixelPoint::new(7, 9)), PixelPoint::new(17, 9));
    }

    #[test]
    fn crop_rows_and_columns_clamp() {
        let img = GrayImage::new(10, 10);
        assert_eq!(crop_rows(&img, 4, 99).image.dimensions(), (10, 6));
        assert_eq!(crop_columns(&img, 12, 20).image.dimensions(), (0, 10));
    }

    #[test]
    fn resize_changes_dimensions() {
        let img = GrayImage::from_pixel(30, 10, Luma([90]));
        let out = resize(&img, 12, 12);
        assert_eq!(out.dimensions(), (12, 12));
        assert_eq!(out.get_pixel(5, 5).0[0], 90);
        let map = ProbabilityMap::from_pixel(8, 8, Luma([0.75]));
        let back = resize_probability(&map, 20, 16);
        assert_eq!(back.dimensions(), (20, 16));
        assert!((back.get_pixel(10, 8).0[0] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn known_intersection() {
        // y = x and y = -x + 10 meet at (5, 5).
        let p = intersect(&seg(0.0, 0.0, 2.0, 2.0), &seg(0.0, 10.0, 1.0, 9.0)).unwrap();
        assert!((p.x - 5.0).abs() < 1e-9);
        assert!((p.y - 5.0).abs() < 1e-9);
    }

    #[test]
    fn steep_blades_meet_below_both() {
        // Blades converging on (60, 100) from the upper left and right.
        let left = seg(20.0, 0.0, 40.0, 50.0);
        let right = seg(100.0, 0.0, 80.0, 50.0);
        let p = intersect(&left, &right).unwrap();
        assert!((p.x - 60.0).abs() < 1e-9);
        assert!((p.y - 100.0).abs() < 1e-9);
    }

    #[test]
    fn parallel_lines_are_rejected() {
        let a = seg(0.0, 0.0, 10.0, 30.0);
        let b = seg(5.0, 0.0, 15.0, 30.0);
        assert_eq!(intersect(&a, &b), Err(LocatorError::ParallelLines));
        assert_eq!(intersect(&a, &a), Err(LocatorError::ParallelLines));
    }
}
