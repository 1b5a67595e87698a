//! Contour extraction and geometric acceptance.

use image::imageops::replace;
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::convex_hull;
use imageproc::point::Point;

use super::result::CandidateBox;

/// Outer border of one connected foreground blob.
#[derive(Clone, Debug)]
pub struct Outline {
    pub points: Vec<Point<i32>>,
}

/// Axis-aligned rectangle, inclusive of border pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Outermost borders only; holes and blobs nested inside holes are skipped.
///
/// The mask is traced inside a 1 px empty margin: a blob touching the image
/// edge is otherwise reported as a hole and lost. Points are shifted back
/// into mask coordinates.
pub fn outer_contours(mask: &GrayImage) -> Vec<Outline> {
    let mut padded = GrayImage::new(mask.width() + 2, mask.height() + 2);
    replace(&mut padded, mask, 1, 1);
    find_contours::<i32>(&padded)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| Outline {
            points: c
                .points
                .into_iter()
                .map(|p| Point::new(p.x - 1, p.y - 1))
                .collect(),
        })
        .collect()
}

/// Shoelace area of a closed polygon.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += i64::from(p.x) * i64::from(q.y) - i64::from(q.x) * i64::from(p.y);
    }
    (twice.abs() as f64) / 2.0
}

pub fn bounding_rect(points: &[Point<i32>]) -> Option<Rect> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    if min_x < 0 || min_y < 0 {
        return None;
    }
    Some(Rect {
        x: min_x as u32,
        y: min_y as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
    })
}

pub fn hull_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    polygon_area(&convex_hull(points))
}

/// Acceptance thresholds resolved for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Acceptance {
    pub min_area: f64,
    pub max_area: f64,
    pub min_aspect: f64,
    pub max_aspect: f64,
    pub min_dimension: u32,
    pub min_solidity: f64,
    pub min_convexity: f64,
}

/// Why a contour was not accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    Degenerate,
    Area,
    Aspect,
    Dimension,
    Solidity,
    Convexity,
}

impl Acceptance {
    /// Run every filter, rejecting on the first failure.
    ///
    /// Ratios with a zero denominator reject instead of dividing.
    pub fn evaluate(&self, outline: &Outline) -> Result<CandidateBox, Rejection> {
        let area = polygon_area(&outline.points);
        if area < self.min_area || area > self.max_area {
            return Err(Rejection::Area);
        }

        let rect = bounding_rect(&outline.points).ok_or(Rejection::Degenerate)?;
        if rect.width == 0 || rect.height == 0 {
            return Err(Rejection::Degenerate);
        }

        let aspect = f64::from(rect.width) / f64::from(rect.height);
        if aspect < self.min_aspect || aspect > self.max_aspect {
            return Err(Rejection::Aspect);
        }

        if rect.width < self.min_dimension || rect.height < self.min_dimension {
            return Err(Rejection::Dimension);
        }

        let solidity = (area / rect.area() as f64).min(1.0);
        if solidity < self.min_solidity {
            return Err(Rejection::Solidity);
        }

        let hull = hull_area(&outline.points);
        if hull <= 0.0 {
            return Err(Rejection::Degenerate);
        }
        let convexity = (area / hull).min(1.0);
        if convexity < self.min_convexity {
            return Err(Rejection::Convexity);
        }

        Ok(CandidateBox {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            area,
            solidity,
            convexity,
            confidence: 1.0,
        })
    }
}
