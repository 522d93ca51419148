//! Circle detection by gradient-direction voting.
//!
//! Every edge pixel votes along its gradient direction (both senses) at
//! each integer radius in the configured window. Votes land in an
//! accumulator downsampled by `dp`, so one cell covers a `dp x dp` block
//! of candidate centres. Cells at or above the vote threshold that are
//! local maxima become centres, strongest first, skipping any closer
//! than the minimum centre distance to one already accepted.
//!
//! Radii and distances are given as fractions of the image half-width:
//! the landmark circle spans nearly the whole cropped embryo.

use image::GrayImage;
use imageproc::gradients::{horizontal_scharr, vertical_scharr};

use crate::params::CircleParams;

/// A detected circle in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    /// Centre column.
    pub x: f64,
    /// Centre row.
    pub y: f64,
    /// Best-supported radius.
    pub radius: f64,
    /// Accumulator votes at the centre cell.
    pub votes: u32,
}

/// Radius window and centre spacing in pixels for an image of `width`.
fn pixel_window(width: u32, params: &CircleParams) -> (f64, f64, f64) {
    let half = f64::from(width) / 2.0;
    (
        f64::from(params.min_radius_frac) * half,
        f64::from(params.max_radius_frac) * half,
        f64::from(params.min_dist_frac) * half,
    )
}

/// Detect circles whose boundary appears in `edges`.
///
/// `shape` supplies gradient directions and must have the same size as
/// `edges`; it is normally the closed mask that `edges` was derived
/// from. Circles are returned strongest first.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn detect_circles(shape: &GrayImage, edges: &GrayImage, params: &CircleParams) -> Vec<Circle> {
    let (w, h) = edges.dimensions();
    if w < 4 || h < 4 || shape.dimensions() != (w, h) {
        return Vec::new();
    }
    let (r_min, r_max, min_dist) = pixel_window(w, params);
    if r_max < 1.0 || r_min > r_max {
        return Vec::new();
    }

    let dp = params.dp.max(1);
    let (aw, ah) = (w.div_ceil(dp), h.div_ceil(dp));
    let mut accum = vec![0u32; (aw * ah) as usize];

    let gx = horizontal_scharr(shape);
    let gy = vertical_scharr(shape);

    let radii: Vec<f64> = (r_min.ceil() as u32..=r_max.floor() as u32)
        .map(f64::from)
        .collect();

    for (x, y, p) in edges.enumerate_pixels() {
        if p.0[0] == 0 {
            continue;
        }
        let gxv = f64::from(gx.get_pixel(x, y).0[0]);
        let gyv = f64::from(gy.get_pixel(x, y).0[0]);
        let mag = gxv.hypot(gyv);
        if mag < 1e-6 {
            continue;
        }
        let (dx, dy) = (gxv / mag, gyv / mag);
        for sign in [-1.0, 1.0] {
            for &r in &radii {
                let vx = f64::from(x) + sign * dx * r;
                let vy = f64::from(y) + sign * dy * r;
                if vx < 0.0 || vy < 0.0 || vx >= f64::from(w) || vy >= f64::from(h) {
                    continue;
                }
                let cx = vx as u32 / dp;
                let cy = vy as u32 / dp;
                accum[(cy * aw + cx) as usize] += 1;
            }
        }
    }

    let at = |cx: u32, cy: u32| accum[(cy * aw + cx) as usize];
    let mut peaks: Vec<(u32, u32, u32)> = Vec::new();
    for cy in 0..ah {
        for cx in 0..aw {
            let votes = at(cx, cy);
            if votes < params.vote_threshold || votes == 0 {
                continue;
            }
            let is_max = (cy.saturating_sub(1)..=(cy + 1).min(ah - 1)).all(|ny| {
                (cx.saturating_sub(1)..=(cx + 1).min(aw - 1)).all(|nx| {
                    let other = at(nx, ny);
                    // Plateau ties go to the earliest cell in raster order.
                    other < votes || (other == votes && (ny, nx) >= (cy, cx))
                })
            });
            if is_max {
                peaks.push((cx, cy, votes));
            }
        }
    }
    peaks.sort_by(|a, b| b.2.cmp(&a.2).then((a.1, a.0).cmp(&(b.1, b.0))));

    let cell = f64::from(dp);
    let mut circles: Vec<Circle> = Vec::new();
    for (cx, cy, votes) in peaks {
        let x = (f64::from(cx) + 0.5) * cell;
        let y = (f64::from(cy) + 0.5) * cell;
        if circles
            .iter()
            .any(|c| (c.x - x).hypot(c.y - y) < min_dist)
        {
            continue;
        }
        let radius = best_radius(edges, x, y, &radii).unwrap_or((r_min + r_max) / 2.0);
        circles.push(Circle {
            x,
            y,
            radius,
            votes,
        });
    }
    tracing::debug!(found = circles.len(), r_min, r_max, "circle detection");
    circles
}

/// Radius in `radii` with the most edge pixels at that rounded distance.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn best_radius(edges: &GrayImage, cx: f64, cy: f64, radii: &[f64]) -> Option<f64> {
    let first = *radii.first()?;
    let mut histogram = vec![0u32; radii.len()];
    for (x, y, p) in edges.enumerate_pixels() {
        if p.0[0] == 0 {
            continue;
        }
        let d = (f64::from(x) - cx).hypot(f64::from(y) - cy).round();
        if d < first {
            continue;
        }
        if let Some(slot) = histogram.get_mut((d - first) as usize) {
            *slot += 1;
        }
    }
    let (index, _) = histogram
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))?;
    radii.get(index).copied()
}

/// Mean centre of a set of circles, or `None` for an empty set.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_centre(circles: &[Circle]) -> Option<(f64, f64)> {
    if circles.is_empty() {
        return None;
    }
    let n = circles.len() as f64;
    let (sx, sy) = circles
        .iter()
        .fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
    Some((sx / n, sy / n))
}
