mod backend;
pub mod backends;
pub mod mask;
mod registry;
mod result;
pub mod shape;

pub use backend::DetectorBackend;
pub use backends::{FixedBackend, GeometricBackend};
pub use registry::BackendRegistry;
pub use result::{CandidateBox, DetectionResult};
