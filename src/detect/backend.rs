use anyhow::Result;

use crate::config::EngineConfig;
use crate::detect::result::DetectionResult;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Both the geometric extractor and learned detectors implement this, and
/// everything downstream only sees the returned candidate list.
///
/// Implementations must:
/// - Treat the frame as read-only and not retain it past `detect`
/// - Be deterministic for a fixed frame and config
/// - Keep no per-call mutable state (`detect` takes `&self` and may run
///   concurrently on different frames)
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&self, frame: &Frame, config: &EngineConfig) -> Result<DetectionResult>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
