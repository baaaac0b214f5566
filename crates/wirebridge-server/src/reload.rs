//! Swapping in a rebuilt registry while serving.

use std::path::PathBuf;
use std::sync::Arc;
use wirebridge_core::codegen::{self, GenerateError};
use wirebridge_core::{BuildError, Registry, RegistryHandle};

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
}

#[derive(Debug, Clone)]
pub struct Reloader {
    registry: RegistryHandle,
    generate_ts: Option<PathBuf>,
}

impl Reloader {
    pub fn new(registry: RegistryHandle, generate_ts: Option<PathBuf>) -> Self {
        Self {
            registry,
            generate_ts,
        }
    }

    /// Build a new registry and publish it.
    ///
    /// The client file is regenerated before the swap, so a registry that
    /// cannot be rendered is never served. On error the old registry stays.
    /// Requests already running keep the snapshot they started with.
    pub fn reload<F>(&self, build: F) -> Result<Arc<Registry>, ReloadError>
    where
        F: FnOnce() -> Result<Registry, BuildError>,
    {
        let registry = build()?;
        if let Some(path) = &self.generate_ts {
            if codegen::write(&registry, path)? {
                tracing::info!("Regenerated {}", path.display());
            }
        } else {
            codegen::generate(&registry)?;
        }
        let count = registry.command_count();
        let previous = self.registry.replace(Arc::new(registry));
        tracing::info!("Registry reloaded ({} commands)", count);
        Ok(previous)
    }
}
