//! Gray-level thresholding and contrast normalization.

use image::{GrayImage, Luma};

use crate::types::ProbabilityMap;

/// Foreground value written into binary masks.
pub const FOREGROUND: u8 = 255;

/// Binary mask of pixels whose value lies in `lower..=upper`.
///
/// Inside pixels become [`FOREGROUND`], everything else 0. An inverted
/// band (`lower > upper`) selects nothing.
#[must_use = "returns the binary mask"]
pub fn in_range(image: &GrayImage, lower: u8, upper: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0];
        Luma([if (lower..=upper).contains(&v) {
            FOREGROUND
        } else {
            0
        }])
    })
}

/// Stretch the gray levels linearly so the darkest pixel maps to 0 and
/// the brightest to 255.
///
/// Camera exposure drifts between specimens; normalizing first keeps the
/// fixed gray-level bands meaningful. A uniform image is returned as-is.
#[must_use = "returns the normalized image"]
pub fn normalize(image: &GrayImage) -> GrayImage {
    let (min, max) = image
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if min >= max {
        return image.clone();
    }
    let span = u32::from(max - min);
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let shifted = u32::from(pixel.0[0] - min) * 255;
        // (v - min) * 255 / span <= 255 by construction.
        pixel.0[0] = u8::try_from(shifted / span).unwrap_or(u8::MAX);
    }
    out
}

/// Binary mask of probability-map pixels strictly above `threshold`.
#[must_use = "returns the binary mask"]
pub fn threshold_probability(map: &ProbabilityMap, threshold: f32) -> GrayImage {
    GrayImage::from_fn(map.width(), map.height(), |x, y| {
        Luma([if map.get_pixel(x, y).0[0] > threshold {
            FOREGROUND
        } else {
            0
        }])
    })
}

/// Number of foreground (non-zero) pixels in a mask.
#[must_use]
pub fn count_foreground(mask: &GrayImage) -> u64 {
    mask.pixels().map(|p| u64::from(p.0[0] > 0)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> GrayImage {
        GrayImage::from_fn(256, 1, |x, _| Luma([u8::try_from(x).unwrap_or(255)]))
    }

    #[test]
    fn in_range_is_inclusive() {
        let mask = in_range(&ramp(), 40, 180);
        assert_eq!(mask.get_pixel(39, 0).0[0], 0);
        assert_eq!(mask.get_pixel(40, 0).0[0], FOREGROUND);
        assert_eq!(mask.get_pixel(180, 0).0[0], FOREGROUND);
        assert_eq!(mask.get_pixel(181, 0).0[0], 0);
        assert_eq!(count_foreground(&mask), 141);
    }

    #[test]
    fn inverted_band_selects_nothing() {
        let mask = in_range(&ramp(), 200, 100);
        assert_eq!(count_foreground(&mask), 0);
    }

    #[test]
    fn normalize_stretches_to_full_range() {
        let img = GrayImage::from_fn(3, 1, |x, _| Luma([[50, 100, 150][x as usize]]));
        let out = normalize(&img);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(1, 0).0[0], 127);
        assert_eq!(out.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn normalize_leaves_uniform_image() {
        let img = GrayImage::from_pixel(4, 4, Luma([77]));
        assert_eq!(normalize(&img), img);
    }

    #[test]
    fn probability_threshold_is_strict() {
        let map = ProbabilityMap::from_fn(3, 1, |x, _| Luma([[0.2, 0.5, 0.9][x as usize]]));
        let mask = threshold_probability(&map, 0.5);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(1, 0).0[0], 0);
        assert_eq!(mask.get_pixel(2, 0).0[0], FOREGROUND);
    }
}
