//! Morphological open/close and hole filling on binary masks.
//!
//! Open and close delegate to [`imageproc::morphology`], which applies a
//! distance-based structuring element; the kernel shape selects the
//! distance norm.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::params::{KernelShape, MorphKernel};
use crate::threshold::FOREGROUND;

const fn norm_for(shape: KernelShape) -> Norm {
    match shape {
        KernelShape::Disk => Norm::L2,
        KernelShape::Diamond => Norm::L1,
        KernelShape::Square => Norm::LInf,
    }
}

/// Erode then dilate: removes specks smaller than the kernel.
#[must_use = "returns the opened mask"]
pub fn open(mask: &GrayImage, kernel: MorphKernel) -> GrayImage {
    let radius = kernel.effective_radius();
    if radius == 0 {
        return mask.clone();
    }
    imageproc::morphology::open(mask, norm_for(kernel.shape), radius)
}

/// Dilate then erode: bridges gaps narrower than the kernel.
#[must_use = "returns the closed mask"]
pub fn close(mask: &GrayImage, kernel: MorphKernel) -> GrayImage {
    let radius = kernel.effective_radius();
    if radius == 0 {
        return mask.clone();
    }
    imageproc::morphology::close(mask, norm_for(kernel.shape), radius)
}

/// Fill background regions that are fully enclosed by foreground.
///
/// Background is labelled with 4-connectivity (the dual of the
/// 8-connected foreground); any background component that touches the
/// image border is exterior, every other one is a hole.
#[must_use = "returns the filled mask"]
pub fn fill_holes(mask: &GrayImage) -> GrayImage {
    let (w, h) = mask.dimensions();
    if w == 0 || h == 0 {
        return mask.clone();
    }
    let background = GrayImage::from_fn(w, h, |x, y| {
        Luma([if mask.get_pixel(x, y).0[0] == 0 {
            FOREGROUND
        } else {
            0
        }])
    });
    let labels = connected_components(&background, Connectivity::Four, Luma([0u8]));

    let count = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;
    let mut exterior = vec![false; count + 1];
    for x in 0..w {
        exterior[labels.get_pixel(x, 0).0[0] as usize] = true;
        exterior[labels.get_pixel(x, h - 1).0[0] as usize] = true;
    }
    for y in 0..h {
        exterior[labels.get_pixel(0, y).0[0] as usize] = true;
        exterior[labels.get_pixel(w - 1, y).0[0] as usize] = true;
    }

    GrayImage::from_fn(w, h, |x, y| {
        let label = labels.get_pixel(x, y).0[0] as usize;
        if label == 0 || !exterior[label] {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::count_foreground;

    fn kernel(size: u32) -> MorphKernel {
        MorphKernel {
            size,
            iterations: 1,
            shape: KernelShape::Square,
        }
    }

    /// 30x30 ring: square outline 8..22 with a 2 px wall.
    fn square_ring() -> GrayImage {
        GrayImage::from_fn(30, 30, |x, y| {
            let outer = (8..22).contains(&x) && (8..22).contains(&y);
            let inner = (10..20).contains(&x) && (10..20).contains(&y);
            Luma([if outer && !inner { 255 } else { 0 }])
        })
    }

    #[test]
    fn fill_holes_fills_enclosed_region() {
        let filled = fill_holes(&square_ring());
        assert_eq!(count_foreground(&filled), 14 * 14);
        assert_eq!(filled.get_pixel(15, 15).0[0], FOREGROUND);
        assert_eq!(filled.get_pixel(2, 2).0[0], 0);
    }

    #[test]
    fn fill_holes_keeps_open_regions_open() {
        // Cut the wall on the left: the interior now reaches the border.
        let mut ring = square_ring();
        for y in 12..14 {
            for x in 0..10 {
                ring.put_pixel(x, y, Luma([0]));
            }
        }
        let filled = fill_holes(&ring);
        assert_eq!(filled.get_pixel(15, 15).0[0], 0);
    }

    #[test]
    fn open_removes_small_specks() {
        let mut mask = GrayImage::new(30, 30);
        mask.put_pixel(3, 3, Luma([255]));
        for y in 10..25 {
            for x in 10..25 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let opened = open(&mask, kernel(3));
        assert_eq!(opened.get_pixel(3, 3).0[0], 0);
        assert_eq!(opened.get_pixel(17, 17).0[0], 255);
    }

    #[test]
    fn close_bridges_narrow_gap() {
        let mask = GrayImage::from_fn(30, 10, |x, _| {
            Luma([if (5..14).contains(&x) || (15..25).contains(&x) {
                255
            } else {
                0
            }])
        });
        let closed = close(&mask, kernel(3));
        assert_eq!(closed.get_pixel(14, 5).0[0], 255);
    }

    #[test]
    fn zero_radius_is_identity() {
        let ring = square_ring();
        assert_eq!(open(&ring, kernel(1)), ring);
        assert_eq!(close(&ring, kernel(0)), ring);
    }
}
