use anyhow::Result;
use image::GrayImage;

use crate::config::EngineConfig;
use crate::detect::backend::DetectorBackend;
use crate::detect::mask::{clean, coverage, in_range, subtract, to_hsv};
use crate::detect::result::DetectionResult;
use crate::detect::shape::{outer_contours, Rejection};
use crate::frame::Frame;

/// Color segmentation plus contour geometry.
///
/// Stages: HSV derivation, target inclusion mask minus lane-marking and
/// background masks, opening then closing, outer contours, acceptance filter.
/// Stateless: every call depends only on the frame and the config.
#[derive(Clone, Copy, Debug, Default)]
pub struct GeometricBackend;

impl GeometricBackend {
    pub fn new() -> Self {
        Self
    }

    /// Binary object mask before morphological cleanup.
    pub fn material_mask(frame: &Frame, config: &EngineConfig) -> GrayImage {
        let hsv = to_hsv(frame.as_image());
        let mut mask = in_range(&hsv, &config.target);
        subtract(&mut mask, &in_range(&hsv, &config.lane_marking));
        subtract(&mut mask, &in_range(&hsv, &config.background));
        mask
    }

    /// Object mask after opening and closing.
    pub fn cleaned_mask(frame: &Frame, config: &EngineConfig) -> GrayImage {
        clean(&Self::material_mask(frame, config), &config.morphology())
    }
}

impl DetectorBackend for GeometricBackend {
    fn name(&self) -> &'static str {
        "geometric"
    }

    fn detect(&self, frame: &Frame, config: &EngineConfig) -> Result<DetectionResult> {
        let mask = Self::cleaned_mask(frame, config);
        let acceptance = config.acceptance(frame.area());
        let outlines = outer_contours(&mask);

        let mut candidates = Vec::new();
        let mut rejected = [0usize; 6];
        for outline in &outlines {
            match acceptance.evaluate(outline) {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => rejected[reason_index(reason)] += 1,
            }
        }

        log::debug!(
            "geometric: mask={}px contours={} accepted={} rejected(degenerate/area/aspect/dim/solidity/convexity)={:?}",
            coverage(&mask),
            outlines.len(),
            candidates.len(),
            rejected
        );
        Ok(DetectionResult::new(candidates))
    }
}

fn reason_index(reason: Rejection) -> usize {
    match reason {
        Rejection::Degenerate => 0,
        Rejection::Area => 1,
        Rejection::Aspect => 2,
        Rejection::Dimension => 3,
        Rejection::Solidity => 4,
        Rejection::Convexity => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::mask::MASK_ON;
    use image::{Rgb, RgbImage};

    fn frame_with(fill: [u8; 3], rects: &[(u32, u32, u32, u32, [u8; 3])]) -> Frame {
        let mut img = RgbImage::from_pixel(320, 240, Rgb(fill));
        for &(x0, y0, w, h, color) in rects {
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    img.put_pixel(x, y, Rgb(color));
                }
            }
        }
        Frame::from_rgb_image(img).unwrap()
    }

    #[test]
    fn uniform_frames_yield_nothing() {
        let backend = GeometricBackend::new();
        let cfg = EngineConfig::default();
        for fill in [[0, 0, 0], [255, 255, 255], [30, 30, 30]] {
            let result = backend.detect(&frame_with(fill, &[]), &cfg).unwrap();
            assert_eq!(result.count(), 0, "fill {:?}", fill);
        }
    }

    #[test]
    fn masks_exclude_white_and_dark_and_colored() {
        let cfg = EngineConfig::default();
        let frame = frame_with(
            [20, 20, 20],
            &[
                (10, 10, 20, 20, [128, 128, 128]),
                (50, 10, 20, 20, [240, 240, 240]),
                (90, 10, 20, 20, [200, 30, 30]),
            ],
        );
        let mask = GeometricBackend::material_mask(&frame, &cfg);
        assert_eq!(mask.get_pixel(15, 15)[0], MASK_ON);
        assert_eq!(mask.get_pixel(55, 15)[0], 0);
        assert_eq!(mask.get_pixel(95, 15)[0], 0);
        assert_eq!(mask.get_pixel(200, 200)[0], 0);
    }

    #[test]
    fn grey_rectangle_becomes_one_candidate() {
        let backend = GeometricBackend::new();
        let cfg = EngineConfig::default();
        let frame = frame_with([15, 15, 15], &[(100, 80, 60, 40, [128, 128, 128])]);

        let result = backend.detect(&frame, &cfg).unwrap();
        assert_eq!(result.count(), 1);
        let car = result.candidates[0];
        assert_eq!((car.x, car.y, car.width, car.height), (100, 80, 60, 40));
        assert!(car.solidity > 0.9 && car.solidity <= 1.0);
        assert!(car.convexity > 0.99 && car.convexity <= 1.0);
        assert_eq!(car.confidence, 1.0);
    }

    #[test]
    fn cars_touching_the_left_edge_are_counted() {
        let backend = GeometricBackend::new();
        let cfg = EngineConfig::default();
        let grey = [128, 128, 128];
        let frame = frame_with(
            [15, 15, 15],
            &[
                (0, 0, 60, 40, grey),
                (0, 100, 60, 40, grey),
                // Closing fills the 5 px gap to the frame edge.
                (5, 180, 60, 40, grey),
                (200, 100, 60, 40, grey),
            ],
        );

        let result = backend.detect(&frame, &cfg).unwrap();
        assert_eq!(result.count(), 4);
        let mut origins: Vec<_> = result.candidates.iter().map(|c| (c.x, c.y)).collect();
        origins.sort();
        assert_eq!(origins, vec![(0, 0), (0, 100), (0, 180), (200, 100)]);
    }

    #[test]
    fn rejects_slivers_and_specks() {
        let backend = GeometricBackend::new();
        let cfg = EngineConfig::default();
        let frame = frame_with(
            [15, 15, 15],
            &[
                // 4:1 sliver fails the aspect band.
                (20, 20, 120, 30, [128, 128, 128]),
                // Too small for the area floor.
                (200, 200, 8, 8, [128, 128, 128]),
            ],
        );
        let result = backend.detect(&frame, &cfg).unwrap();
        assert_eq!(result.count(), 0);
    }

    #[test]
    fn detection_is_deterministic() {
        let backend = GeometricBackend::new();
        let cfg = EngineConfig::default();
        let frame = frame_with(
            [15, 15, 15],
            &[
                (20, 20, 40, 30, [120, 120, 125]),
                (150, 100, 35, 35, [150, 150, 150]),
            ],
        );
        let first = backend.detect(&frame, &cfg).unwrap();
        let second = backend.detect(&frame, &cfg).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.count(), 2);
    }
}
