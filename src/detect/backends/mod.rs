pub mod fixed;
pub mod geometric;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use fixed::FixedBackend;
pub use geometric::GeometricBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
