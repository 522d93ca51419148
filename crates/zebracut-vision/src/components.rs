//! Connected-component labelling and largest-object selection.
//!
//! Wraps [`imageproc::region_labelling::connected_components`] with
//! 8-connectivity. Labels start at 1; label 0 is background.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::threshold::FOREGROUND;

/// Labelled components of a binary mask.
#[derive(Debug, Clone)]
pub struct Components {
    /// Per-pixel label, 0 for background.
    pub labels: ImageBuffer<Luma<u32>, Vec<u32>>,
    /// Pixel area of each label; `areas[i]` belongs to label `i + 1`.
    pub areas: Vec<u64>,
}

impl Components {
    /// Label and area of the largest component, if there is one.
    ///
    /// Ties go to the lower label.
    #[must_use]
    pub fn largest(&self) -> Option<(u32, u64)> {
        self.areas
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, u64)>, (i, &area)| match best {
                Some((_, best_area)) if best_area >= area => best,
                _ => Some((i, area)),
            })
            .and_then(|(i, area)| u32::try_from(i + 1).ok().map(|label| (label, area)))
    }

    /// Binary mask containing only `label`.
    #[must_use]
    pub fn mask_of(&self, label: u32) -> GrayImage {
        GrayImage::from_fn(self.labels.width(), self.labels.height(), |x, y| {
            Luma([if self.labels.get_pixel(x, y).0[0] == label {
                FOREGROUND
            } else {
                0
            }])
        })
    }
}

/// Label the 8-connected foreground components of `mask`.
#[must_use]
pub fn components(mask: &GrayImage) -> Components {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let count = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0);
    let mut areas = vec![0u64; count as usize];
    for p in labels.pixels() {
        let label = p.0[0];
        if label > 0 {
            areas[label as usize - 1] += 1;
        }
    }
    Components { labels, areas }
}

/// Mask of the largest component whose area is at least `min_area`.
///
/// Returns `None` both when the mask has no components and when the
/// largest one falls below the floor; callers treat the two alike.
#[must_use]
pub fn largest_component(mask: &GrayImage, min_area: u32) -> Option<GrayImage> {
    let comps = components(mask);
    let (label, area) = comps.largest()?;
    if area < u64::from(min_area) {
        tracing::debug!(area, min_area, "largest component below area floor");
        return None;
    }
    Some(comps.mask_of(label))
}
