//! Application state
//!
//! One immutable context constructed by `AppState::build` at startup and
//! threaded by `Arc` into every component. There are no ambient globals:
//! the registry, load pool, and metrics all live here. The registry and
//! pool are read-only after construction and safe for unsynchronized
//! concurrent reads.

use crate::config::Config;
use crate::error::Result;
use crate::loader::ModuleLoadPool;
use crate::registry::{PluginDescriptor, PluginRegistry, RuntimeVersions};
use std::sync::Arc;

pub mod metrics;

pub use metrics::{Metrics, RequestTimer};

pub struct AppState {
    pub config: Config,
    pub registry: Arc<PluginRegistry>,
    pub load_pool: Arc<ModuleLoadPool>,
    pub metrics: Arc<Metrics>,
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Construct the server context: validate every plugin's requirements,
    /// seal the registry, and collect build handlers into the load pool.
    /// A requirement violation aborts here — the server never starts.
    pub fn build(
        config: Config,
        plugins: Vec<PluginDescriptor>,
    ) -> Result<(Arc<Self>, tokio::sync::broadcast::Receiver<()>)> {
        let versions = RuntimeVersions::from_config(&config)?;

        let mut builder = PluginRegistry::builder();
        for plugin in plugins {
            builder.register(plugin)?;
        }
        let registry = Arc::new(builder.build(&versions)?);

        let load_pool = Arc::new(ModuleLoadPool::from_registry(
            &registry,
            config.build.root_dir.clone(),
        )?);

        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(16);

        let state = Arc::new(Self {
            config,
            registry,
            load_pool,
            metrics: Arc::new(Metrics::new()),
            shutdown_tx,
        });

        Ok((state, shutdown_rx))
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RegistryError, ServerError};

    #[test]
    fn test_build_with_no_plugins() {
        let (state, _rx) = AppState::build(Config::default(), Vec::new()).unwrap();
        assert!(state.registry.is_empty());
        assert_eq!(state.load_pool.handler_count(), 0);
    }

    #[test]
    fn test_requirement_violation_aborts_startup() {
        let strict = PluginDescriptor::builder("strict", "1.0.0")
            .requires_framework(">=99".parse().unwrap())
            .build()
            .unwrap();
        let err = AppState::build(Config::default(), vec![strict]).unwrap_err();
        assert!(matches!(
            err,
            ServerError::Registry(RegistryError::Requirement(_))
        ));
    }
}
