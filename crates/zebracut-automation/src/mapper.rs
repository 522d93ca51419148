//! Pixel offset to stage displacement.

use serde::{Deserialize, Serialize};
use zebracut_vision::Keypoint;

/// Relative move of the horizontal stage axes, in axis units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Displacement {
    /// Move along x (image columns).
    pub dx: f64,
    /// Move along y (image rows).
    pub dy: f64,
}

/// Stage displacement that brings `tool` onto `target`.
///
/// The stage carries the specimen, so it moves opposite to the pixel
/// offset: `d = -(target - tool) * pixel_scale`.
#[must_use]
pub fn map(target: &Keypoint, tool: &Keypoint, pixel_scale: f64) -> Displacement {
    Displacement {
        dx: -f64::from(target.x - tool.x) * pixel_scale,
        dy: -f64::from(target.y - tool.y) * pixel_scale,
    }
}
