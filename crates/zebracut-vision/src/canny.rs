//! Canny edge detection on already-smoothed rasters.
//!
//! Derived from `imageproc::edges::canny`, with three differences:
//!
//! 1. No internal Gaussian blur. The locators run Canny on closed binary
//!    masks or on frames that were blurred earlier in the pipeline, and a
//!    second blur rounds off the blade corners the line detector needs.
//!
//! 2. Hysteresis checks all 8 neighbours and bounds-checks each one, so
//!    tracing that reaches the image border never underflows a `u32`
//!    coordinate (upstream issue image-rs/imageproc#705).
//!
//! 3. Thresholds are clamped to [`MIN_THRESHOLD`] and `low <= high`
//!    instead of asserting.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::filter_clamped;
use imageproc::kernel;

/// Minimum allowed Canny threshold.
///
/// A low threshold of zero marks every pixel with any gradient as a
/// candidate edge, flooding the Hough accumulators downstream.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

type Magnitude = ImageBuffer<Luma<f32>, Vec<f32>>;
type Gradient = ImageBuffer<Luma<i16>, Vec<i16>>;

/// Detect edges using the Canny algorithm.
///
/// Returns a binary image: 255 for edge pixels, 0 for non-edge. Pixels
/// with L2 gradient magnitude at or above `high_threshold` are definite
/// edges; those at or above `low_threshold` are edges only if connected
/// to a definite edge.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    let high = high_threshold.max(MIN_THRESHOLD);
    let low = low_threshold.max(MIN_THRESHOLD).min(high);

    let (w, h) = image.dimensions();
    if w < 3 || h < 3 {
        return GrayImage::new(w, h);
    }

    let gx: Gradient = filter_clamped(image, kernel::SOBEL_HORIZONTAL_3X3);
    let gy: Gradient = filter_clamped(image, kernel::SOBEL_VERTICAL_3X3);
    let magnitude = Magnitude::from_fn(w, h, |x, y| {
        let dx = f32::from(gx.get_pixel(x, y).0[0]);
        let dy = f32::from(gy.get_pixel(x, y).0[0]);
        Luma([dx.hypot(dy)])
    });

    let thinned = non_maximum_suppression(&magnitude, &gx, &gy);
    hysteresis(&thinned, low, high)
}

/// Keep only pixels that are maximal along their gradient direction.
fn non_maximum_suppression(g: &Magnitude, gx: &Gradient, gy: &Gradient) -> Magnitude {
    let (w, h) = g.dimensions();
    let mut out = Magnitude::new(w, h);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let here = g.get_pixel(x, y).0[0];
            if here == 0.0 {
                continue;
            }
            let dx = f32::from(gx.get_pixel(x, y).0[0]);
            let dy = f32::from(gy.get_pixel(x, y).0[0]);
            let mut angle = dy.atan2(dx).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            let (a, b) = if !(22.5..157.5).contains(&angle) {
                ((x - 1, y), (x + 1, y))
            } else if angle < 67.5 {
                ((x + 1, y + 1), (x - 1, y - 1))
            } else if angle < 112.5 {
                ((x, y - 1), (x, y + 1))
            } else {
                ((x - 1, y + 1), (x + 1, y - 1))
            };
            if here >= g.get_pixel(a.0, a.1).0[0] && here >= g.get_pixel(b.0, b.1).0[0] {
                out.put_pixel(x, y, Luma([here]));
            }
        }
    }
    out
}

/// Depth-first edge tracking from strong pixels through weak ones.
fn hysteresis(input: &Magnitude, low: f32, high: f32) -> GrayImage {
    const NEIGHBOURS: [(i64, i64); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (-1, 0),
        (1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ];

    let (w, h) = input.dimensions();
    let mut out = GrayImage::new(w, h);
    let mut stack = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if input.get_pixel(x, y).0[0] < high || out.get_pixel(x, y).0[0] != 0 {
                continue;
            }
            out.put_pixel(x, y, Luma([255]));
            stack.push((x, y));
            while let Some((cx, cy)) = stack.pop() {
                for (dx, dy) in NEIGHBOURS {
                    let (Ok(nx), Ok(ny)) = (
                        u32::try_from(i64::from(cx) + dx),
                        u32::try_from(i64::from(cy) + dy),
                    ) else {
                        continue;
                    };
                    if nx >= w || ny >= h {
                        continue;
                    }
                    if input.get_pixel(nx, ny).0[0] >= low && out.get_pixel(nx, ny).0[0] == 0 {
                        out.put_pixel(nx, ny, Luma([255]));
                        stack.push((nx, ny));
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::count_foreground;

    /// 20x20 image with a sharp vertical boundary at x = 10.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(20, 20, |x, _y| if x < 10 { Luma([0]) } else { Luma([255]) })
    }

    #[test]
    fn blank_image_produces_no_edges() {
        let edges = canny(&GrayImage::from_pixel(20, 20, Luma([128])), 50.0, 150.0);
        assert_eq!(count_foreground(&edges), 0);
    }

    #[test]
    fn sharp_edge_detected_near_boundary() {
        let edges = canny(&sharp_edge_image(), 127.0, 255.0);
        assert!(count_foreground(&edges) > 0);
        for (x, _, p) in edges.enumerate_pixels() {
            if p.0[0] > 0 {
                assert!((8..=11).contains(&x), "edge pixel at x={x}");
            }
        }
    }

    #[test]
    fn border_edge_does_not_panic() {
        let img = GrayImage::from_fn(10, 10, |x, _| Luma([if x == 1 { 255 } else { 0 }]));
        let _edges = canny(&img, 1.0, 2.0);
    }

    #[test]
    fn output_dimensions_match_input() {
        assert_eq!(canny(&GrayImage::new(17, 31), 50.0, 150.0).dimensions(), (17, 31));
        assert_eq!(canny(&GrayImage::new(2, 9), 50.0, 150.0).dimensions(), (2, 9));
    }

    #[test]
    fn zero_low_threshold_is_clamped_to_min() {
        let img = sharp_edge_image();
        assert_eq!(canny(&img, 0.0, 150.0), canny(&img, MIN_THRESHOLD, 150.0));
    }

    #[test]
    fn low_above_high_is_clamped() {
        let img = sharp_edge_image();
        assert_eq!(canny(&img, 200.0, 100.0), canny(&img, 100.0, 100.0));
    }

    #[test]
    fn edges_of_a_filled_disk_form_a_ring() {
        let disk = GrayImage::from_fn(40, 40, |x, y| {
            let dx = i64::from(x) - 20;
            let dy = i64::from(y) - 20;
            Luma([if dx * dx + dy * dy <= 100 { 255 } else { 0 }])
        });
        let edges = canny(&disk, 127.0, 255.0);
        assert_eq!(edges.get_pixel(20, 20).0[0], 0);
        assert!(count_foreground(&edges) > 30);
    }
}
