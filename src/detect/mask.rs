//! Color-space derivation and binary mask construction.
//!
//! HSV uses the 8-bit hue-halved scale common to camera tooling:
//! H in 0..=179, S and V in 0..=255. Range tests are inclusive on both ends.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use serde::{Deserialize, Serialize};

pub const MASK_ON: u8 = 255;
pub const MASK_OFF: u8 = 0;

/// Inclusive box range over (H, S, V).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| hsv[c] >= self.lower[c] && hsv[c] <= self.upper[c])
    }
}

/// Convert one RGB pixel to 8-bit HSV.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(i32::from);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;

    let s = if v == 0 {
        0
    } else {
        (255 * diff + v / 2) / v
    };

    let h = if diff == 0 {
        0.0
    } else {
        let diff = diff as f32;
        let mut h = if v == r {
            60.0 * (g - b) as f32 / diff
        } else if v == g {
            120.0 + 60.0 * (b - r) as f32 / diff
        } else {
            240.0 + 60.0 * (r - g) as f32 / diff
        };
        if h < 0.0 {
            h += 360.0;
        }
        h
    };
    // Halve into 0..=180 and wrap 180 back to 0.
    let h = ((h / 2.0).round() as u32 % 180) as u8;
    [h, s.clamp(0, 255) as u8, v as u8]
}

/// Per-pixel HSV representation of an RGB frame (channels hold H, S, V).
pub fn to_hsv(image: &RgbImage) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (src, dst) in image.pixels().zip(out.pixels_mut()) {
        *dst = Rgb(rgb_to_hsv(src.0));
    }
    out
}

/// Binary mask of pixels whose HSV value falls inside `range`.
pub fn in_range(hsv: &RgbImage, range: &HsvRange) -> GrayImage {
    let mut mask = GrayImage::new(hsv.width(), hsv.height());
    for (src, dst) in hsv.pixels().zip(mask.pixels_mut()) {
        if range.contains(src.0) {
            *dst = Luma([MASK_ON]);
        }
    }
    mask
}

/// `mask &= !other`.
pub fn subtract(mask: &mut GrayImage, other: &GrayImage) {
    debug_assert_eq!(mask.dimensions(), other.dimensions());
    for (dst, src) in mask.pixels_mut().zip(other.pixels()) {
        if src[0] != MASK_OFF {
            *dst = Luma([MASK_OFF]);
        }
    }
}

/// Structuring parameters for the cleanup pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Morphology {
    pub open_kernel: u32,
    pub open_iterations: u32,
    pub close_kernel: u32,
    pub close_iterations: u32,
}

/// Opening (noise removal) followed by closing (gap filling), square elements.
///
/// `n` iterations of a `k×k` square erosion equal one erosion by a square of
/// radius `n * (k / 2)`, so each operation runs as a single pass.
pub fn clean(mask: &GrayImage, morph: &Morphology) -> GrayImage {
    let opened = open(mask, Norm::LInf, radius(morph.open_kernel, morph.open_iterations));
    close(&opened, Norm::LInf, radius(morph.close_kernel, morph.close_iterations))
}

fn radius(kernel: u32, iterations: u32) -> u8 {
    (kernel / 2)
        .saturating_mul(iterations)
        .min(u32::from(u8::MAX)) as u8
}

/// Count of set pixels, used for stage logging.
pub fn coverage(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p[0] != MASK_OFF).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grey_has_zero_saturation() {
        assert_eq!(rgb_to_hsv([128, 128, 128]), [0, 0, 128]);
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
        assert_eq!(rgb_to_hsv([255, 255, 255]), [0, 0, 255]);
    }

    #[test]
    fn primary_hues_use_halved_scale() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
    }

    #[test]
    fn range_is_inclusive() {
        let range = HsvRange::new([0, 0, 70], [180, 50, 200]);
        assert!(range.contains([0, 50, 70]));
        assert!(range.contains([179, 0, 200]));
        assert!(!range.contains([0, 51, 100]));
        assert!(!range.contains([0, 0, 69]));
        assert!(!range.contains([0, 0, 201]));
    }

    #[test]
    fn subtract_clears_overlap() {
        let mut a = GrayImage::from_pixel(2, 1, Luma([MASK_ON]));
        let mut b = GrayImage::new(2, 1);
        b.put_pixel(1, 0, Luma([MASK_ON]));
        subtract(&mut a, &b);
        assert_eq!(a.get_pixel(0, 0)[0], MASK_ON);
        assert_eq!(a.get_pixel(1, 0)[0], MASK_OFF);
    }

    #[test]
    fn opening_removes_speckles_and_keeps_blocks() {
        let mut mask = GrayImage::new(60, 60);
        mask.put_pixel(5, 5, Luma([MASK_ON]));
        for y in 20..40 {
            for x in 20..40 {
                mask.put_pixel(x, y, Luma([MASK_ON]));
            }
        }
        let morph = Morphology {
            open_kernel: 3,
            open_iterations: 2,
            close_kernel: 7,
            close_iterations: 2,
        };
        let cleaned = clean(&mask, &morph);
        assert_eq!(cleaned.get_pixel(5, 5)[0], MASK_OFF);
        assert_eq!(cleaned.get_pixel(30, 30)[0], MASK_ON);
        assert_eq!(coverage(&cleaned), 400);
    }

    #[test]
    fn radius_folds_iterations() {
        assert_eq!(radius(3, 2), 2);
        assert_eq!(radius(7, 2), 6);
        assert_eq!(radius(1, 5), 0);
    }
}
