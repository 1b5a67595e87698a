#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{resize, FilterType};
use tract_onnx::prelude::*;

use crate::config::EngineConfig;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{CandidateBox, DetectionResult};
use crate::frame::Frame;

/// Tract-based learned detector for single-stage ONNX box models.
///
/// Expects a square `1x3xSxS` float input (RGB, 0..1) and a `[1, 4 + classes, N]`
/// (or transposed `[1, N, 4 + classes]`) output of centre-format boxes in input
/// pixels. Boxes below `confidence_floor` are dropped, overlaps are suppressed
/// with `nms_iou`, and survivors are mapped back into frame coordinates.
///
/// This backend loads a local model file and performs no other I/O.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_side: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_side: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_side as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_side,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_side;
        let resized = resize(frame.as_image(), side, side, FilterType::Triangle);
        let side = side as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn extract_boxes(&self, outputs: TVec<TValue>, floor: f32) -> Result<Vec<ScoredBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let view = view
            .into_dimensionality::<tract_ndarray::Ix3>()
            .map_err(|_| anyhow!("unexpected model output shape {:?}", shape))?;
        if shape[0] != 1 {
            return Err(anyhow!("unexpected model output batch {:?}", shape));
        }
        // Channels-first output has far fewer attributes than anchors.
        let channels_first = shape[1] < shape[2];
        let (attrs, anchors) = if channels_first {
            (shape[1], shape[2])
        } else {
            (shape[2], shape[1])
        };
        if attrs < 5 {
            return Err(anyhow!("model output has {} attributes, need >= 5", attrs));
        }
        let at = |attr: usize, anchor: usize| -> f32 {
            if channels_first {
                view[[0, attr, anchor]]
            } else {
                view[[0, anchor, attr]]
            }
        };

        let mut boxes = Vec::new();
        for anchor in 0..anchors {
            let score = (4..attrs)
                .map(|attr| at(attr, anchor))
                .fold(f32::NEG_INFINITY, f32::max);
            if !score.is_finite() || score < floor {
                continue;
            }
            let (cx, cy, w, h) = (
                at(0, anchor),
                at(1, anchor),
                at(2, anchor),
                at(3, anchor),
            );
            boxes.push(ScoredBox {
                x: cx - w / 2.0,
                y: cy - h / 2.0,
                w,
                h,
                score,
            });
        }
        Ok(boxes)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, frame: &Frame, config: &EngineConfig) -> Result<DetectionResult> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let boxes = self.extract_boxes(outputs, config.confidence_floor)?;
        let kept = suppress_overlaps(boxes, config.nms_iou);

        let sx = frame.width() as f32 / self.input_side as f32;
        let sy = frame.height() as f32 / self.input_side as f32;
        let candidates = kept
            .into_iter()
            .filter_map(|b| b.to_candidate(sx, sy, frame.width(), frame.height()))
            .collect();
        Ok(DetectionResult::new(candidates))
    }

    fn warm_up(&self) -> Result<()> {
        let side = self.input_side as usize;
        let input = Tensor::zero::<f32>(&[1, 3, side, side])?;
        self.model
            .run(tvec!(input.into()))
            .context("ONNX warm-up failed")?;
        Ok(())
    }
}

/// Box in model input pixels, top-left format.
#[derive(Clone, Copy, Debug, PartialEq)]
struct ScoredBox {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    score: f32,
}

impl ScoredBox {
    fn iou(&self, other: &ScoredBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);
        if x1 >= x2 || y1 >= y2 {
            return 0.0;
        }
        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.w * self.h + other.w * other.h - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Scale into frame pixels and clip; degenerate boxes are dropped.
    fn to_candidate(self, sx: f32, sy: f32, width: u32, height: u32) -> Option<CandidateBox> {
        let x1 = (self.x * sx).clamp(0.0, width as f32);
        let y1 = (self.y * sy).clamp(0.0, height as f32);
        let x2 = ((self.x + self.w) * sx).clamp(0.0, width as f32);
        let y2 = ((self.y + self.h) * sy).clamp(0.0, height as f32);
        let w = (x2 - x1).round() as u32;
        let h = (y2 - y1).round() as u32;
        if w == 0 || h == 0 {
            return None;
        }
        Some(CandidateBox::from_scored(
            x1.round() as u32,
            y1.round() as u32,
            w,
            h,
            self.score,
        ))
    }
}

/// Greedy non-maximum suppression, highest score first.
fn suppress_overlaps(mut boxes: Vec<ScoredBox>, iou_threshold: f32) -> Vec<ScoredBox> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<ScoredBox> = Vec::new();
    for candidate in boxes {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
