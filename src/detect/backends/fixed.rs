use anyhow::Result;

use crate::config::EngineConfig;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{CandidateBox, DetectionResult};
use crate::frame::Frame;

/// Backend returning a preset candidate list for every frame.
///
/// Used for dry runs of the decision path and in tests.
#[derive(Clone, Debug, Default)]
pub struct FixedBackend {
    candidates: Vec<CandidateBox>,
}

impl FixedBackend {
    pub fn new(candidates: Vec<CandidateBox>) -> Self {
        Self { candidates }
    }

    /// `count` identical 20×20 boxes laid out left to right.
    pub fn with_count(count: usize) -> Self {
        let candidates = (0..count)
            .map(|i| CandidateBox::from_scored(i as u32 * 25, 0, 20, 20, 1.0))
            .collect();
        Self { candidates }
    }
}

impl DetectorBackend for FixedBackend {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn detect(&self, _frame: &Frame, config: &EngineConfig) -> Result<DetectionResult> {
        let candidates = self
            .candidates
            .iter()
            .filter(|c| c.confidence >= config.confidence_floor)
            .copied()
            .collect();
        Ok(DetectionResult::new(candidates))
    }
}
