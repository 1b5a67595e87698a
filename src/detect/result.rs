use serde::Serialize;

use crate::smoother::Decision;

/// Result of running a detector on one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionResult {
    /// Accepted boxes in discovery order.
    pub candidates: Vec<CandidateBox>,
    /// Raw decision for this frame's count. `Red` until classified.
    pub raw_decision: Decision,
}

impl DetectionResult {
    pub fn new(candidates: Vec<CandidateBox>) -> Self {
        Self {
            candidates,
            raw_decision: Decision::Red,
        }
    }

    /// Safe fallback: nothing detected, signal stays red.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn count(&self) -> usize {
        self.candidates.len()
    }
}

impl Default for DetectionResult {
    fn default() -> Self {
        Self::empty()
    }
}

/// One accepted object, pixel coordinates with top-left origin.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CandidateBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Contour area in pixels².
    pub area: f64,
    /// Contour area over bounding box area, in `[0, 1]`.
    pub solidity: f64,
    /// Contour area over convex hull area, in `[0, 1]`.
    pub convexity: f64,
    /// Detector score; geometric detections report `1.0`.
    pub confidence: f32,
}

impl CandidateBox {
    /// Box from a learned detector: metrics are those of a filled rectangle.
    pub fn from_scored(x: u32, y: u32, width: u32, height: u32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            area: f64::from(width) * f64::from(height),
            solidity: 1.0,
            convexity: 1.0,
            confidence,
        }
    }
}
