//! Line-segment detection: Hough voting followed by segment extraction.
//!
//! [`imageproc::hough::detect_lines`] returns infinite lines in polar
//! form, `x cos θ + y sin θ = r`. Each candidate inside the slope window
//! is then walked pixel by pixel and split into segments wherever the
//! edge support has a gap longer than `max_gap`. The longest segment
//! of at least `min_length` across all candidates wins.

use image::GrayImage;
use imageproc::hough::{LineDetectionOptions, PolarLine, detect_lines as hough_lines};

use crate::params::LineParams;

/// A floating-point point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Column.
    pub x: f64,
    /// Row.
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A finite line segment between two edge pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    /// First endpoint.
    pub start: Point,
    /// Second endpoint.
    pub end: Point,
}

impl LineSegment {
    /// Create a segment.
    #[must_use]
    pub const fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(&self) -> f64 {
        (self.end.x - self.start.x).hypot(self.end.y - self.start.y)
    }

    /// Angle of the segment from horizontal, in `[0, 90]` degrees,
    /// regardless of endpoint order.
    #[must_use]
    pub fn slope_degrees(&self) -> f64 {
        let dx = (self.end.x - self.start.x).abs();
        let dy = (self.end.y - self.start.y).abs();
        dy.atan2(dx).to_degrees()
    }

    /// Translate both endpoints.
    #[must_use]
    pub fn translate(self, dx: f64, dy: f64) -> Self {
        Self {
            start: Point::new(self.start.x + dx, self.start.y + dy),
            end: Point::new(self.end.x + dx, self.end.y + dy),
        }
    }
}

/// Angle of a polar line from horizontal, in `[0, 90]` degrees.
///
/// The polar angle is that of the line's normal, so a normal at 0°
/// describes a vertical line.
fn polar_slope_degrees(line: &PolarLine) -> f64 {
    (f64::from(line.angle_in_degrees) - 90.0).abs()
}

fn is_edge(edges: &GrayImage, x: i64, y: i64) -> bool {
    match (u32::try_from(x), u32::try_from(y)) {
        (Ok(x), Ok(y)) if x < edges.width() && y < edges.height() => {
            edges.get_pixel(x, y).0[0] > 0
        }
        _ => false,
    }
}

/// Split one polar line into segments of contiguous edge support.
///
/// A sample counts as supported when an edge pixel lies on the rounded
/// line position or one pixel either side of it across the line.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn segments_along(edges: &GrayImage, line: &PolarLine, max_gap: u32) -> Vec<LineSegment> {
    let theta = f64::from(line.angle_in_degrees).to_radians();
    let (sin, cos) = theta.sin_cos();
    let r = f64::from(line.r);
    let origin = Point::new(r * cos, r * sin);
    let direction = (-sin, cos);
    let normal = (cos, sin);
    let reach = f64::from(edges.width()).hypot(f64::from(edges.height()));

    let at = |t: f64| Point::new(origin.x + t * direction.0, origin.y + t * direction.1);
    let supported = |t: f64| {
        let p = at(t);
        [-1.0, 0.0, 1.0].iter().any(|&n: &f64| {
            is_edge(
                edges,
                (p.x + n * normal.0).round() as i64,
                (p.y + n * normal.1).round() as i64,
            )
        })
    };

    let mut segments = Vec::new();
    let mut run: Option<(f64, f64)> = None;
    let gap = f64::from(max_gap);
    let steps = (2.0 * reach).ceil() as i64;
    for i in 0..=steps {
        let t = -reach + i as f64;
        if !supported(t) {
            continue;
        }
        run = match run {
            Some((first, last)) if t - last <= gap + 1.0 => Some((first, t)),
            Some((first, last)) => {
                segments.push(LineSegment::new(at(first), at(last)));
                Some((t, t))
            }
            None => Some((t, t)),
        };
    }
    if let Some((first, last)) = run {
        segments.push(LineSegment::new(at(first), at(last)));
    }
    segments
}

/// Find the longest edge segment whose slope lies inside the window.
///
/// Returns `None` when no Hough candidate inside the slope window
/// yields a segment of at least `params.min_length` pixels.
#[must_use]
pub fn detect_line(edges: &GrayImage, params: &LineParams) -> Option<LineSegment> {
    let options = LineDetectionOptions {
        vote_threshold: params.vote_threshold,
        suppression_radius: params.suppression_radius,
    };
    let slope_window = f64::from(params.slope_min_deg)..=f64::from(params.slope_max_deg);
    let min_length = f64::from(params.min_length);

    let candidates = hough_lines(edges, options);
    tracing::debug!(candidates = candidates.len(), "hough line candidates");

    candidates
        .iter()
        .filter(|line| slope_window.contains(&polar_slope_degrees(line)))
        .flat_map(|line| segments_along(edges, line, params.max_gap))
        .filter(|segment| segment.length() >= min_length)
        .filter(|segment| slope_window.contains(&segment.slope_degrees()))
        .max_by(|a, b| a.length().total_cmp(&b.length()))
}
