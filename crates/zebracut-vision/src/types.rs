//! Shared types for the zebracut keypoint pipeline.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference frames and
/// intermediate masks without depending on `image` directly.
pub use image::GrayImage;

/// Single-channel `f32` raster, used for segmentation probability maps.
pub type ProbabilityMap = image::ImageBuffer<image::Luma<f32>, Vec<f32>>;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Whether a (possibly negative) pixel coordinate lies inside the
    /// image, edges included.
    #[must_use]
    pub fn contains(self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && x <= i64::from(self.width) && y <= i64::from(self.height)
    }
}

/// One captured camera frame.
///
/// The raster is shared behind an [`Arc`] so publishing the latest frame
/// to several readers never copies pixels. A frame is never mutated after
/// capture.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<GrayImage>,
    sequence: u64,
}

impl Frame {
    /// Wrap a freshly captured raster.
    #[must_use]
    pub fn new(image: GrayImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
        }
    }

    /// The grayscale raster.
    #[must_use]
    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    /// Monotonic capture counter assigned by the capture worker.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Frame size in pixels.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.image.width(),
            height: self.image.height(),
        }
    }
}

/// An integer pixel location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelPoint {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl PixelPoint {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Translate by a crop offset.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// What a keypoint marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeypointTag {
    /// Anatomical location the tool must reach.
    Target,
    /// Scissor tip.
    Tool,
    /// Auxiliary landmark, shown to the operator only.
    Reference,
}

impl fmt::Display for KeypointTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target => f.write_str("target"),
            Self::Tool => f.write_str("tool"),
            Self::Reference => f.write_str("reference"),
        }
    }
}

/// A tagged pixel location, always in full-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Keypoint {
    /// Column in the original (uncropped) frame.
    pub x: i32,
    /// Row in the original (uncropped) frame.
    pub y: i32,
    /// Role of this keypoint.
    pub tag: KeypointTag,
}

impl Keypoint {
    /// Create a keypoint.
    #[must_use]
    pub const fn new(x: i32, y: i32, tag: KeypointTag) -> Self {
        Self { x, y, tag }
    }

    /// Create a keypoint from a pixel point.
    #[must_use]
    pub const fn at(point: PixelPoint, tag: KeypointTag) -> Self {
        Self::new(point.x, point.y, tag)
    }

    /// Location without the tag.
    #[must_use]
    pub const fn point(self) -> PixelPoint {
        PixelPoint::new(self.x, self.y)
    }
}

/// A named intermediate raster kept for inspection.
#[derive(Debug, Clone)]
pub struct StageImage {
    /// Short stage label (e.g. `"threshold"`), used in snapshot file names.
    pub name: &'static str,
    /// The raster produced by that stage.
    pub image: GrayImage,
}

/// Output of one locator invocation.
#[derive(Debug, Clone, Default)]
pub struct Located {
    /// Emitted keypoints, in locator-defined order.
    pub keypoints: Vec<Keypoint>,
    /// Intermediate rasters, populated only when
    /// [`TunableParameters::keep_intermediates`](crate::TunableParameters::keep_intermediates)
    /// is set.
    pub trace: Vec<StageImage>,
}

/// Collects intermediate rasters when enabled, otherwise does nothing.
#[derive(Debug)]
pub(crate) struct Trace {
    enabled: bool,
    stages: Vec<StageImage>,
}

impl Trace {
    pub(crate) const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stages: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, name: &'static str, image: &GrayImage) {
        if self.enabled {
            self.stages.push(StageImage {
                name,
                image: image.clone(),
            });
        }
    }

    pub(crate) fn finish(self, keypoints: Vec<Keypoint>) -> Located {
        Located {
            keypoints,
            trace: self.stages,
        }
    }
}

/// Sub-region whose centroid could not be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    /// The whole foreground shape.
    Shape,
    /// Upper third of the landmark strip.
    Upper,
    /// Lower half of the landmark strip.
    Lower,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shape => f.write_str("shape"),
            Self::Upper => f.write_str("upper"),
            Self::Lower => f.write_str("lower"),
        }
    }
}

/// Half of the scissor edge map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// Columns left of the scissor centroid.
    Left,
    /// Columns from the scissor centroid rightwards.
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => f.write_str("left"),
            Self::Right => f.write_str("right"),
        }
    }
}

/// Why a locator could not produce keypoints.
///
/// Every variant is recoverable at the specimen level: the run skips the
/// specimen and continues.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum LocatorError {
    /// No connected component reached the minimum area.
    #[error("no foreground area found")]
    NoForegroundArea,

    /// A centroid was requested from an empty or uniform mask.
    #[error("no centroid found in {0} region")]
    NoCentroid(Region),

    /// Hough circle detection found no landmark circle.
    #[error("no circle detected")]
    NoCircleDetected,

    /// The thresholded segmentation output has no foreground pixels.
    #[error("segmentation mask is empty")]
    EmptyMask,

    /// The segmentation model failed to run.
    #[error("segmenter unavailable: {0}")]
    SegmenterUnavailable(String),

    /// No blade line within the slope window on one side.
    #[error("no line detected on the {0} side")]
    NoLineDetected(Side),

    /// The two blade lines are (nearly) parallel.
    #[error("blade lines are parallel")]
    ParallelLines,

    /// The blade intersection lies outside the frame.
    #[error("intersection ({x}, {y}) is outside the field of view")]
    IntersectionOutOfBounds {
        /// Computed column.
        x: i64,
        /// Computed row.
        y: i64,
    },

    /// The configured target ordinal exceeds the emitted keypoints.
    #[error("target keypoint {index} requested but only {available} located")]
    TargetOutOfRange {
        /// 1-based ordinal that was requested.
        index: usize,
        /// Number of keypoints available.
        available: usize,
    },
}

impl LocatorError {
    /// Stable short name of the variant, for tallies and JSON reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoForegroundArea => "no_foreground_area",
            Self::NoCentroid(_) => "no_centroid",
            Self::NoCircleDetected => "no_circle_detected",
            Self::EmptyMask => "empty_mask",
            Self::SegmenterUnavailable(_) => "segmenter_unavailable",
            Self::NoLineDetected(_) => "no_line_detected",
            Self::ParallelLines => "parallel_lines",
            Self::IntersectionOutOfBounds { .. } => "intersection_out_of_bounds",
            Self::TargetOutOfRange { .. } => "target_out_of_range",
        }
    }
}
