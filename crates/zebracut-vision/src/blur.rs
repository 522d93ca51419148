//! Gaussian blur for noise reduction before thresholding.
//!
//! Wraps [`imageproc::filter::gaussian_blur_f32`]. Thresholding a raw
//! camera frame picks up sensor noise as speckle components; a light blur
//! first keeps the connected-component stage from fragmenting the embryo.

use image::GrayImage;

/// Apply Gaussian blur to a grayscale image.
///
/// Non-positive sigma values return the image unchanged, since
/// `imageproc`'s underlying function panics on `sigma <= 0.0`.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return image.clone();
    }

    imageproc::filter::gaussian_blur_f32(image, sigma)
}
