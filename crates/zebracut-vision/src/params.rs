//! Tunable parameters consulted by the locator pipelines.
//!
//! All values have defaults matching the instrument calibration (4x
//! objective, 1200x1200 frame). The operator edits them between runs;
//! locators read them by value and never mutate them.

use serde::{Deserialize, Serialize};

/// Which embryo localization strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmbryoStrategy {
    /// Threshold, morphology, Hough circle and strip centroids.
    #[default]
    Classical,
    /// External segmentation network followed by body-axis sampling.
    Learned,
}

/// Structuring element shape for morphology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KernelShape {
    /// Euclidean disk (closest to an elliptical kernel).
    #[default]
    Disk,
    /// L1 diamond.
    Diamond,
    /// Chebyshev square.
    Square,
}

/// Morphological structuring element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MorphKernel {
    /// Kernel diameter in pixels.
    pub size: u32,
    /// How many times the operation is repeated.
    pub iterations: u32,
    /// Kernel shape.
    pub shape: KernelShape,
}

impl MorphKernel {
    /// Effective radius after all iterations.
    ///
    /// Repeating an erosion `n` times with radius `r` equals one erosion
    /// with radius `n * r`, which is how the repeated kernel is applied.
    #[must_use]
    pub fn effective_radius(self) -> u8 {
        let radius = (self.size / 2).saturating_mul(self.iterations);
        u8::try_from(radius).unwrap_or(u8::MAX)
    }
}

impl Default for MorphKernel {
    fn default() -> Self {
        Self {
            size: 7,
            iterations: 3,
            shape: KernelShape::Disk,
        }
    }
}

/// Hough circle detector settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircleParams {
    /// Inverse accumulator resolution (accumulator cell = `dp` pixels).
    pub dp: u32,
    /// Minimum distance between detected centres, as a fraction of the
    /// image half-width.
    pub min_dist_frac: f32,
    /// Minimum radius as a fraction of the image half-width.
    pub min_radius_frac: f32,
    /// Maximum radius as a fraction of the image half-width.
    pub max_radius_frac: f32,
    /// Minimum accumulator votes for a centre.
    pub vote_threshold: u32,
}

impl Default for CircleParams {
    fn default() -> Self {
        Self {
            dp: 5,
            min_dist_frac: 0.5,
            min_radius_frac: 0.9,
            max_radius_frac: 1.0,
            vote_threshold: 220,
        }
    }
}

/// Hough line-segment detector settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineParams {
    /// Minimum Hough votes for a candidate line.
    pub vote_threshold: u32,
    /// Non-maximum suppression radius in (r, angle) space.
    pub suppression_radius: u32,
    /// Minimum segment length in pixels.
    pub min_length: u32,
    /// Largest gap bridged when walking along a line, in pixels.
    pub max_gap: u32,
    /// Lower bound of the accepted slope, degrees from horizontal.
    pub slope_min_deg: f32,
    /// Upper bound of the accepted slope, degrees from horizontal.
    pub slope_max_deg: f32,
}

impl Default for LineParams {
    fn default() -> Self {
        Self {
            vote_threshold: 60,
            suppression_radius: 8,
            min_length: 120,
            max_gap: 50,
            slope_min_deg: 60.0,
            slope_max_deg: 80.0,
        }
    }
}

/// Settings for the segmentation-network strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnedParams {
    /// Side of the square network input, in pixels.
    pub input_size: u32,
    /// Probability above which an output pixel is foreground.
    pub threshold: f32,
    /// Spacing between emitted body-axis keypoints, in millimetres.
    pub somite_height_mm: f64,
    /// 1-based index of the keypoint used as the cutting target.
    pub target_somite: usize,
}

impl Default for LearnedParams {
    fn default() -> Self {
        Self {
            input_size: 240,
            threshold: 0.5,
            somite_height_mm: 0.05,
            target_somite: 5,
        }
    }
}

/// Every tunable setting used by the embryo and scissor locators.
///
/// # Gray-level bands
///
/// The scissor is the darkest object in the frame, so the embryo band is
/// `[scissor_gray_level, embryo_gray_high]` and the scissor band is
/// `[0, scissor_gray_level]`. The landmark strip is thresholded with
/// `[0, embryo_gray_low]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunableParameters {
    /// Incremented whenever the operator edits the parameter set.
    pub version: u32,
    /// Embryo strategy selector.
    pub embryo_strategy: EmbryoStrategy,
    /// Gaussian blur sigma applied before thresholding.
    pub blur_sigma: f32,
    /// Upper gray level of the scissor band.
    pub scissor_gray_level: u8,
    /// Upper gray level of the embryo band.
    pub embryo_gray_high: u8,
    /// Upper gray level of the landmark strip band.
    pub embryo_gray_low: u8,
    /// Minimum component area in pixels for a foreground object.
    pub min_area: u32,
    /// Bounding-box margin for the embryo crop, in pixels.
    pub embryo_crop_margin: u32,
    /// Bounding-box margin for the scissor crop, in pixels.
    pub scissor_crop_margin: u32,
    /// Closing kernel applied to foreground crops.
    pub closing: MorphKernel,
    /// Opening kernel applied to the strip sub-regions.
    pub opening: MorphKernel,
    /// Canny low threshold.
    pub canny_low: f32,
    /// Canny high threshold.
    pub canny_high: f32,
    /// Landmark circle detector.
    pub circle: CircleParams,
    /// Half-width of the vertical strip centred on the circle, in pixels.
    pub strip_half_width: u32,
    /// Column bias added to the lower centroid to form the target.
    pub target_bias_x: i32,
    /// Row bias added to the lower centroid to form the target.
    pub target_bias_y: i32,
    /// Blade line detector.
    pub line: LineParams,
    /// Inset applied to each blade line towards the centre, in pixels.
    pub line_inset: i32,
    /// Learned strategy settings.
    pub learned: LearnedParams,
    /// Camera calibration: millimetres per pixel.
    pub mm_per_pixel: f64,
    /// Keep intermediate rasters in [`Located::trace`](crate::Located::trace).
    pub keep_intermediates: bool,
}

impl TunableParameters {
    /// Default blur sigma (kernel `6σ + 1 = 7`).
    pub const DEFAULT_BLUR_SIGMA: f32 = 1.0;
    /// Default Canny low threshold.
    pub const DEFAULT_CANNY_LOW: f32 = 127.0;
    /// Default Canny high threshold.
    pub const DEFAULT_CANNY_HIGH: f32 = 255.0;
    /// Default calibration, 690 px/mm with the 4x objective.
    pub const DEFAULT_MM_PER_PIXEL: f64 = 1.0 / 690.0;

    /// Body-axis sampling step for the learned strategy, in whole pixels
    /// (never below one).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn somite_step_px(&self) -> u32 {
        if self.mm_per_pixel <= 0.0 {
            return 1;
        }
        let px = self.learned.somite_height_mm / self.mm_per_pixel;
        if px.is_finite() && px >= 1.0 {
            px as u32
        } else {
            1
        }
    }
}

impl Default for TunableParameters {
    fn default() -> Self {
        Self {
            version: 1,
            embryo_strategy: EmbryoStrategy::default(),
            blur_sigma: Self::DEFAULT_BLUR_SIGMA,
            scissor_gray_level: 40,
            embryo_gray_high: 180,
            embryo_gray_low: 120,
            min_area: 20_000,
            embryo_crop_margin: 10,
            scissor_crop_margin: 0,
            closing: MorphKernel::default(),
            opening: MorphKernel::default(),
            canny_low: Self::DEFAULT_CANNY_LOW,
            canny_high: Self::DEFAULT_CANNY_HIGH,
            circle: CircleParams::default(),
            strip_half_width: 80,
            target_bias_x: 0,
            target_bias_y: 0,
            line: LineParams::default(),
            line_inset: 20,
            learned: LearnedParams::default(),
            mm_per_pixel: Self::DEFAULT_MM_PER_PIXEL,
            keep_intermediates: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_calibration() {
        let params = TunableParameters::default();
        assert_eq!(params.embryo_strategy, EmbryoStrategy::Classical);
        assert_eq!(params.scissor_gray_level, 40);
        assert_eq!(params.min_area, 20_000);
        assert_eq!(params.learned.target_somite, 5);
    }

    #[test]
    fn somite_step_uses_calibration() {
        // 0.05 mm at 690 px/mm is 34.5 px, truncated.
        assert_eq!(TunableParameters::default().somite_step_px(), 34);
    }

    #[test]
    fn somite_step_never_zero() {
        let params = TunableParameters {
            learned: LearnedParams {
                somite_height_mm: 0.0,
                ..LearnedParams::default()
            },
            ..TunableParameters::default()
        };
        assert_eq!(params.somite_step_px(), 1);
    }

    #[test]
    fn effective_radius_scales_with_iterations() {
        let kernel = MorphKernel {
            size: 7,
            iterations: 3,
            shape: KernelShape::Disk,
        };
        assert_eq!(kernel.effective_radius(), 9);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let params: TunableParameters =
            serde_json::from_str(r#"{"min_area": 500, "embryo_strategy": "Learned"}"#).unwrap();
        assert_eq!(params.min_area, 500);
        assert_eq!(params.embryo_strategy, EmbryoStrategy::Learned);
        assert_eq!(params.strip_half_width, 80);
    }

    #[test]
    fn serde_roundtrip_preserves_everything() {
        let params = TunableParameters {
            keep_intermediates: true,
            target_bias_y: -100,
            ..TunableParameters::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: TunableParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }
}
