use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::detect::mask::{HsvRange, Morphology};
use crate::detect::shape::Acceptance;
use crate::smoother::{DecisionPolicy, TrafficRule};

const DEFAULT_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_DETECTOR: &str = "geometric";
const DEFAULT_MODEL_INPUT: u32 = 640;
const MAX_HISTORY_CAPACITY: usize = 64;

// ----------------------------------------------------------------------------
// EngineConfig: tunable thresholds
// ----------------------------------------------------------------------------

/// Tunable thresholds for detection and decision.
///
/// Immutable once handed to the engine; updates go through `ConfigUpdate`
/// and replace the whole value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Inclusion range for silver/grey object material.
    pub target: HsvRange,
    /// Exclusion range for bright lane markings.
    pub lane_marking: HsvRange,
    /// Exclusion range for dark track surface and shadow.
    pub background: HsvRange,
    pub open_kernel: u32,
    pub open_iterations: u32,
    pub close_kernel: u32,
    pub close_iterations: u32,
    /// Minimum contour area as a fraction of frame area.
    pub min_area_fraction: f64,
    /// Maximum contour area as a fraction of frame area.
    pub max_area_fraction: f64,
    /// Absolute floor (pixels²) applied to both area bounds.
    pub area_floor_px: u32,
    pub min_aspect: f64,
    pub max_aspect: f64,
    pub min_dimension_px: u32,
    pub min_solidity: f64,
    pub min_convexity: f64,
    /// Learned detector score floor.
    pub confidence_floor: f32,
    /// Learned detector overlap suppression threshold.
    pub nms_iou: f32,
    pub policy: DecisionPolicy,
    pub min_threshold: u32,
    pub max_threshold: u32,
    pub history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target: HsvRange::new([0, 0, 70], [180, 50, 200]),
            lane_marking: HsvRange::new([0, 0, 200], [180, 30, 255]),
            background: HsvRange::new([0, 0, 0], [180, 255, 60]),
            open_kernel: 3,
            open_iterations: 2,
            close_kernel: 7,
            close_iterations: 2,
            min_area_fraction: 0.001,
            max_area_fraction: 0.15,
            area_floor_px: 200,
            min_aspect: 0.4,
            max_aspect: 2.5,
            min_dimension_px: 15,
            min_solidity: 0.45,
            min_convexity: 0.6,
            confidence_floor: 0.3,
            nms_iou: 0.45,
            policy: DecisionPolicy::Band,
            min_threshold: 4,
            max_threshold: 5,
            history_capacity: 5,
        }
    }
}

impl EngineConfig {
    /// Reject nonsensical values. Nothing is clamped.
    pub fn validate(&self) -> Result<()> {
        for (name, range) in [
            ("target", &self.target),
            ("lane_marking", &self.lane_marking),
            ("background", &self.background),
        ] {
            if range.upper[0] > 180 {
                return Err(anyhow!("{} hue upper bound must be <= 180", name));
            }
            if (0..3).any(|c| range.lower[c] > range.upper[c]) {
                return Err(anyhow!("{} lower bound exceeds upper bound", name));
            }
        }
        for (name, kernel, iterations) in [
            ("open", self.open_kernel, self.open_iterations),
            ("close", self.close_kernel, self.close_iterations),
        ] {
            if kernel == 0 || kernel % 2 == 0 {
                return Err(anyhow!("{}_kernel must be odd and positive", name));
            }
            if iterations == 0 {
                return Err(anyhow!("{}_iterations must be at least 1", name));
            }
        }
        check_fraction("min_area_fraction", self.min_area_fraction)?;
        check_fraction("max_area_fraction", self.max_area_fraction)?;
        if self.min_area_fraction >= self.max_area_fraction {
            return Err(anyhow!("min_area_fraction must be below max_area_fraction"));
        }
        if !(self.min_aspect.is_finite() && self.min_aspect > 0.0) {
            return Err(anyhow!("min_aspect must be positive"));
        }
        if !self.max_aspect.is_finite() || self.max_aspect < self.min_aspect {
            return Err(anyhow!("max_aspect must be >= min_aspect"));
        }
        check_unit("min_solidity", self.min_solidity)?;
        check_unit("min_convexity", self.min_convexity)?;
        check_unit("confidence_floor", f64::from(self.confidence_floor))?;
        check_unit("nms_iou", f64::from(self.nms_iou))?;
        if self.policy == DecisionPolicy::Band && self.min_threshold > self.max_threshold {
            return Err(anyhow!("min_threshold must be <= max_threshold"));
        }
        if self.history_capacity == 0 || self.history_capacity > MAX_HISTORY_CAPACITY {
            return Err(anyhow!(
                "history_capacity must be between 1 and {}",
                MAX_HISTORY_CAPACITY
            ));
        }
        Ok(())
    }

    pub fn traffic_rule(&self) -> TrafficRule {
        TrafficRule {
            policy: self.policy,
            min_threshold: self.min_threshold,
            max_threshold: self.max_threshold,
        }
    }

    pub fn morphology(&self) -> Morphology {
        Morphology {
            open_kernel: self.open_kernel,
            open_iterations: self.open_iterations,
            close_kernel: self.close_kernel,
            close_iterations: self.close_iterations,
        }
    }

    /// Area bounds scale with the frame; both are floored at `area_floor_px`.
    pub fn acceptance(&self, frame_area: u64) -> Acceptance {
        let frame_area = frame_area as f64;
        let floor = f64::from(self.area_floor_px);
        Acceptance {
            min_area: (frame_area * self.min_area_fraction).floor().max(floor),
            max_area: (frame_area * self.max_area_fraction).floor().max(floor),
            min_aspect: self.min_aspect,
            max_aspect: self.max_aspect,
            min_dimension: self.min_dimension_px,
            min_solidity: self.min_solidity,
            min_convexity: self.min_convexity,
        }
    }

    /// Apply a partial update to a copy and validate the result.
    pub fn with_update(&self, update: &ConfigUpdate) -> Result<Self> {
        let mut next = self.clone();
        update.apply_to(&mut next);
        next.validate().context("invalid configuration update")?;
        Ok(next)
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0 && value <= 1.0) {
        return Err(anyhow!("{} must be in (0, 1]", name));
    }
    Ok(())
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
        return Err(anyhow!("{} must be in [0, 1]", name));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// ConfigUpdate: partial replacement
// ----------------------------------------------------------------------------

/// Partial configuration. Unspecified fields keep their prior values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigUpdate {
    pub target: Option<HsvRange>,
    pub lane_marking: Option<HsvRange>,
    pub background: Option<HsvRange>,
    pub open_kernel: Option<u32>,
    pub open_iterations: Option<u32>,
    pub close_kernel: Option<u32>,
    pub close_iterations: Option<u32>,
    pub min_area_fraction: Option<f64>,
    pub max_area_fraction: Option<f64>,
    pub area_floor_px: Option<u32>,
    pub min_aspect: Option<f64>,
    pub max_aspect: Option<f64>,
    pub min_dimension_px: Option<u32>,
    pub min_solidity: Option<f64>,
    pub min_convexity: Option<f64>,
    pub confidence_floor: Option<f32>,
    pub nms_iou: Option<f32>,
    pub policy: Option<DecisionPolicy>,
    pub min_threshold: Option<u32>,
    pub max_threshold: Option<u32>,
    pub history_capacity: Option<usize>,
}

macro_rules! apply_fields {
    ($update:expr, $cfg:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $update.$field {
                $cfg.$field = value;
            }
        )+
    };
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self == &ConfigUpdate::default()
    }

    fn apply_to(&self, cfg: &mut EngineConfig) {
        apply_fields!(
            self,
            cfg,
            target,
            lane_marking,
            background,
            open_kernel,
            open_iterations,
            close_kernel,
            close_iterations,
            min_area_fraction,
            max_area_fraction,
            area_floor_px,
            min_aspect,
            max_aspect,
            min_dimension_px,
            min_solidity,
            min_convexity,
            confidence_floor,
            nms_iou,
            policy,
            min_threshold,
            max_threshold,
            history_capacity,
        );
    }
}

// ----------------------------------------------------------------------------
// ServiceConfig: daemon settings (file + env)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ServiceConfigFile {
    addr: Option<String>,
    detector: Option<String>,
    model_path: Option<PathBuf>,
    model_input: Option<u32>,
    recording: Option<RecordingConfigFile>,
    engine: Option<ConfigUpdate>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RecordingConfigFile {
    logs_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub addr: String,
    pub detector: String,
    pub model_path: Option<PathBuf>,
    /// Square input side of the learned model.
    pub model_input: u32,
    pub logs_dir: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl ServiceConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRAFFIC_GATE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Result<Self> {
        let engine = match &file.engine {
            Some(update) => EngineConfig::default()
                .with_update(update)
                .context("invalid [engine] section")?,
            None => EngineConfig::default(),
        };
        Ok(Self {
            addr: file.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            detector: file
                .detector
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            model_path: file.model_path,
            model_input: file.model_input.unwrap_or(DEFAULT_MODEL_INPUT),
            logs_dir: file.recording.and_then(|recording| recording.logs_dir),
            engine,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("TRAFFIC_GATE_ADDR") {
            if !addr.trim().is_empty() {
                self.addr = addr;
            }
        }
        if let Ok(detector) = std::env::var("TRAFFIC_GATE_DETECTOR") {
            if !detector.trim().is_empty() {
                self.detector = detector.trim().to_lowercase();
            }
        }
        if let Ok(path) = std::env::var("TRAFFIC_GATE_MODEL") {
            if !path.trim().is_empty() {
                self.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(dir) = std::env::var("TRAFFIC_GATE_LOGS_DIR") {
            if !dir.trim().is_empty() {
                self.logs_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow!("invalid listen address '{}': {}", self.addr, e))?;
        if self.model_input == 0 {
            return Err(anyhow!("model_input must be positive"));
        }
        self.engine.validate()
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn area_bounds_scale_with_frame() {
        let cfg = EngineConfig::default();
        let large = cfg.acceptance(640 * 480);
        assert_eq!(large.min_area, 307.0);
        assert_eq!(large.max_area, 46080.0);

        let small = cfg.acceptance(100 * 100);
        assert_eq!(small.min_area, 200.0);
        assert_eq!(small.max_area, 1500.0);

        let tiny = cfg.acceptance(30 * 30);
        assert_eq!(tiny.max_area, 200.0);
    }

    #[test]
    fn partial_update_keeps_other_fields() {
        let cfg = EngineConfig::default();
        let update = ConfigUpdate {
            min_threshold: Some(2),
            max_threshold: Some(8),
            ..ConfigUpdate::default()
        };
        let next = cfg.with_update(&update).unwrap();
        assert_eq!(next.min_threshold, 2);
        assert_eq!(next.max_threshold, 8);
        assert_eq!(next.min_solidity, cfg.min_solidity);
        assert_eq!(next.history_capacity, cfg.history_capacity);
    }

    #[test]
    fn rejects_inverted_band() {
        let update = ConfigUpdate {
            min_threshold: Some(6),
            ..ConfigUpdate::default()
        };
        assert!(EngineConfig::default().with_update(&update).is_err());

        // The same thresholds are fine once the upper cap is not used.
        let update = ConfigUpdate {
            min_threshold: Some(6),
            policy: Some(DecisionPolicy::AtLeast),
            ..ConfigUpdate::default()
        };
        assert!(EngineConfig::default().with_update(&update).is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let cases = [
            ConfigUpdate {
                min_solidity: Some(1.5),
                ..ConfigUpdate::default()
            },
            ConfigUpdate {
                min_aspect: Some(-0.1),
                ..ConfigUpdate::default()
            },
            ConfigUpdate {
                open_kernel: Some(4),
                ..ConfigUpdate::default()
            },
            ConfigUpdate {
                history_capacity: Some(0),
                ..ConfigUpdate::default()
            },
            ConfigUpdate {
                max_area_fraction: Some(0.0005),
                ..ConfigUpdate::default()
            },
            ConfigUpdate {
                target: Some(HsvRange::new([0, 60, 0], [180, 50, 255])),
                ..ConfigUpdate::default()
            },
        ];
        for update in cases {
            assert!(
                EngineConfig::default().with_update(&update).is_err(),
                "accepted {:?}",
                update
            );
        }
    }

    #[test]
    fn update_json_rejects_unknown_and_negative_fields() {
        assert!(serde_json::from_str::<ConfigUpdate>(r#"{"min_treshold": 3}"#).is_err());
        assert!(serde_json::from_str::<ConfigUpdate>(r#"{"min_threshold": -3}"#).is_err());
        let update: ConfigUpdate = serde_json::from_str(r#"{"policy": "at_least"}"#).unwrap();
        assert_eq!(update.policy, Some(DecisionPolicy::AtLeast));
        assert!(ConfigUpdate::default().is_empty());
    }
}
