//! Traffic gate
//!
//! Counts toy cars on a mat from single camera frames and turns the count into
//! a stable GREEN/RED signal.
//!
//! # Pipeline
//!
//! 1. **Detect**: a `DetectorBackend` turns a `Frame` into candidate boxes.
//!    The built-in geometric backend segments car-coloured material by HSV
//!    range, cleans the mask morphologically and filters contours by shape.
//! 2. **Decide**: the candidate count is classified against a `TrafficRule`.
//! 3. **Smooth**: the raw decision is appended to a bounded history and the
//!    majority of that history is the decision to act on.
//!
//! # Module Structure
//!
//! - `frame`: decoded RGB frames
//! - `detect`: backend trait, registry, geometric/fixed/tract backends
//! - `smoother`: decisions, traffic rules, majority history
//! - `config`: engine thresholds and service configuration
//! - `engine`: thread-safe orchestration of detect + decide
//! - `recorder`: optional annotated frame dumps
//! - `api`: HTTP transport

pub mod api;
pub mod config;
pub mod detect;
pub mod engine;
pub mod frame;
pub mod recorder;
pub mod smoother;

pub use config::{ConfigUpdate, EngineConfig, ServiceConfig};
pub use detect::{
    BackendRegistry, CandidateBox, DetectionResult, DetectorBackend, FixedBackend,
    GeometricBackend,
};
pub use engine::{Analysis, Engine};
pub use frame::Frame;
pub use recorder::Recorder;
pub use smoother::{Decision, DecisionPolicy, TrafficRule, Verdict};
