//! Detection-and-decision engine.
//!
//! `Engine` owns everything that outlives a single frame:
//!
//! - the detector backend (stateless, shared)
//! - the current `EngineConfig`, swapped atomically as a whole
//! - the decision history behind one mutex
//! - a monotonically increasing frame sequence number
//!
//! Every analysis call takes one config snapshot and uses it for both
//! detection and decision, so a concurrent update is observed entirely or not
//! at all. History appends are serialized in lock-acquisition order, which is
//! the order decisions are voted on; arrival order at the transport is not
//! preserved across concurrent callers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::config::{ConfigUpdate, EngineConfig};
use crate::detect::{CandidateBox, DetectionResult, DetectorBackend};
use crate::frame::Frame;
use crate::smoother::{Decision, DecisionSmoother, Verdict};

/// Outcome of one `Engine::analyze` call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Analysis {
    /// 1-based sequence number of this frame within the engine.
    pub sequence: u64,
    pub candidates: Vec<CandidateBox>,
    pub cars: usize,
    pub raw_decision: Decision,
    /// Smoothed decision; the one to act on.
    pub decision: Decision,
}

pub struct Engine {
    detector: Arc<dyn DetectorBackend>,
    config: RwLock<Arc<EngineConfig>>,
    smoother: Mutex<DecisionSmoother>,
    sequence: AtomicU64,
}

impl Engine {
    pub fn new(detector: Arc<dyn DetectorBackend>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let smoother = DecisionSmoother::new(config.history_capacity);
        Ok(Self {
            detector,
            config: RwLock::new(Arc::new(config)),
            smoother: Mutex::new(smoother),
            sequence: AtomicU64::new(0),
        })
    }

    pub fn with_backend<B: DetectorBackend + 'static>(
        backend: B,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::new(Arc::new(backend), config)
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Result<Arc<EngineConfig>> {
        let guard = self
            .config
            .read()
            .map_err(|_| anyhow!("engine config lock poisoned"))?;
        Ok(guard.clone())
    }

    /// Apply a partial update atomically. Invalid updates are rejected whole
    /// and leave the previous configuration in place.
    pub fn update_config(&self, update: &ConfigUpdate) -> Result<Arc<EngineConfig>> {
        let mut guard = self
            .config
            .write()
            .map_err(|_| anyhow!("engine config lock poisoned"))?;
        let next = Arc::new(guard.with_update(update)?);
        if next.history_capacity != guard.history_capacity {
            self.lock_smoother()?.set_capacity(next.history_capacity);
        }
        *guard = next.clone();
        log::info!(
            "config updated: traffic={} history_capacity={}",
            next.traffic_rule().describe(),
            next.history_capacity
        );
        Ok(next)
    }

    /// Run the detector only. Pure with respect to engine state.
    ///
    /// Detector failures degrade to an empty, red result.
    pub fn detect(&self, frame: &Frame) -> Result<DetectionResult> {
        let config = self.config()?;
        Ok(self.detect_with(frame, &config))
    }

    /// Classify a count and fold it into the decision history.
    pub fn decide(&self, candidate_count: usize) -> Result<Verdict> {
        let config = self.config()?;
        self.decide_with(candidate_count, &config)
    }

    /// Detect, decide and number one frame against a single config snapshot.
    pub fn analyze(&self, frame: &Frame) -> Result<Analysis> {
        let config = self.config()?;
        let detection = self.detect_with(frame, &config);
        let cars = detection.count();
        let verdict = self.decide_with(cars, &config)?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        log::info!(
            "frame #{} {}x{}: cars={} raw={} final={}",
            sequence,
            frame.width(),
            frame.height(),
            cars,
            verdict.raw,
            verdict.stable
        );
        Ok(Analysis {
            sequence,
            candidates: detection.candidates,
            cars,
            raw_decision: verdict.raw,
            decision: verdict.stable,
        })
    }

    /// Clear the decision history.
    pub fn reset_history(&self) -> Result<()> {
        self.lock_smoother()?.reset();
        log::info!("decision history cleared");
        Ok(())
    }

    pub fn history_len(&self) -> Result<usize> {
        Ok(self.lock_smoother()?.history().len())
    }

    /// Frames analyzed so far.
    pub fn frames_processed(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn detect_with(&self, frame: &Frame, config: &EngineConfig) -> DetectionResult {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.detector.detect(frame, config)));
        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                log::warn!("detector '{}' failed: {:#}", self.detector.name(), err);
                DetectionResult::empty()
            }
            Err(_) => {
                log::error!("detector '{}' panicked", self.detector.name());
                DetectionResult::empty()
            }
        };
        result.raw_decision = config.traffic_rule().classify(result.count());
        result
    }

    fn decide_with(&self, candidate_count: usize, config: &EngineConfig) -> Result<Verdict> {
        let rule = config.traffic_rule();
        Ok(self.lock_smoother()?.evaluate(candidate_count, &rule))
    }

    fn lock_smoother(&self) -> Result<MutexGuard<'_, DecisionSmoother>> {
        self.smoother
            .lock()
            .map_err(|_| anyhow!("decision history lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FixedBackend;

    struct FailingBackend;

    impl DetectorBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&self, _frame: &Frame, _config: &EngineConfig) -> Result<DetectionResult> {
            Err(anyhow!("model exploded"))
        }
    }

    struct PanickingBackend;

    impl DetectorBackend for PanickingBackend {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn detect(&self, _frame: &Frame, _config: &EngineConfig) -> Result<DetectionResult> {
            panic!("index out of bounds")
        }
    }

    fn blank_frame() -> Frame {
        Frame::new(vec![0u8; 4 * 4 * 3], 4, 4).unwrap()
    }

    #[test]
    fn analyze_counts_and_numbers_frames() {
        let engine = Engine::with_backend(FixedBackend::with_count(4), EngineConfig::default())
            .unwrap();
        let first = engine.analyze(&blank_frame()).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.cars, 4);
        assert_eq!(first.raw_decision, Decision::Green);
        assert_eq!(first.decision, Decision::Green);
        let second = engine.analyze(&blank_frame()).unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(engine.frames_processed(), 2);
        assert_eq!(engine.history_len().unwrap(), 2);
    }

    #[test]
    fn detect_does_not_touch_history() {
        let engine = Engine::with_backend(FixedBackend::with_count(5), EngineConfig::default())
            .unwrap();
        let result = engine.detect(&blank_frame()).unwrap();
        assert_eq!(result.count(), 5);
        assert_eq!(result.raw_decision, Decision::Green);
        assert_eq!(engine.history_len().unwrap(), 0);
        assert_eq!(engine.frames_processed(), 0);
    }

    #[test]
    fn detector_failure_degrades_to_red() {
        for engine in [
            Engine::with_backend(FailingBackend, EngineConfig::default()).unwrap(),
            Engine::with_backend(PanickingBackend, EngineConfig::default()).unwrap(),
        ] {
            let analysis = engine.analyze(&blank_frame()).unwrap();
            assert_eq!(analysis.cars, 0);
            assert_eq!(analysis.raw_decision, Decision::Red);
            assert_eq!(analysis.decision, Decision::Red);
        }
    }

    #[test]
    fn rejected_update_keeps_previous_config() {
        let engine = Engine::with_backend(FixedBackend::default(), EngineConfig::default())
            .unwrap();
        let bad = ConfigUpdate {
            min_threshold: Some(9),
            max_threshold: Some(2),
            ..ConfigUpdate::default()
        };
        assert!(engine.update_config(&bad).is_err());
        let cfg = engine.config().unwrap();
        assert_eq!((cfg.min_threshold, cfg.max_threshold), (4, 5));
    }

    #[test]
    fn shrinking_capacity_trims_live_history() {
        let engine = Engine::with_backend(FixedBackend::default(), EngineConfig::default())
            .unwrap();
        for _ in 0..5 {
            engine.decide(0).unwrap();
        }
        assert_eq!(engine.history_len().unwrap(), 5);
        engine
            .update_config(&ConfigUpdate {
                history_capacity: Some(2),
                ..ConfigUpdate::default()
            })
            .unwrap();
        assert_eq!(engine.history_len().unwrap(), 2);
    }

    #[test]
    fn invalid_initial_config_is_rejected() {
        let cfg = EngineConfig {
            history_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(Engine::with_backend(FixedBackend::default(), cfg).is_err());
    }
}
