use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use crate::config::ServiceConfig;

/// Registry of detector backends, keyed by `DetectorBackend::name`.
///
/// Backends are shared as `Arc` because `DetectorBackend::detect` takes `&self`.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn DetectorBackend>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with the built-in backends that need no external model.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(super::backends::GeometricBackend::new());
        registry
    }

    /// Built-in backends plus the learned detector when a model is configured,
    /// with `cfg.detector` as the default.
    pub fn for_service(cfg: &ServiceConfig) -> Result<Self> {
        let mut registry = Self::with_builtin();
        registry.register(super::backends::FixedBackend::default());
        #[cfg(feature = "backend-tract")]
        {
            if let Some(path) = &cfg.model_path {
                registry.register(super::backends::TractBackend::new(path, cfg.model_input)?);
            }
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            if cfg.model_path.is_some() {
                log::warn!("model_path set but built without backend-tract; ignoring");
            }
        }
        registry.set_default(&cfg.detector)?;
        Ok(registry)
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(backend));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn DetectorBackend>> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<Arc<dyn DetectorBackend>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Resolve a backend by name, falling back to the default when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn DetectorBackend>> {
        match name {
            Some(name) => self.get(name).ok_or_else(|| {
                anyhow!(
                    "detector '{}' not registered (available: {})",
                    name,
                    self.list().join(", ")
                )
            }),
            None => self
                .default_backend()
                .ok_or_else(|| anyhow!("no detector backends registered")),
        }
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
