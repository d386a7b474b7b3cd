//! Plugin registry
//!
//! The registry holds every plugin descriptor, priority-sorted, and is built
//! once at startup through `PluginRegistryBuilder`. After `build()` it is
//! immutable for the lifetime of the server and safe for unsynchronized
//! concurrent reads. Requirement ranges are validated at build time; a
//! violation is fatal and the server never starts.

pub mod descriptor;
pub mod requirement;

pub use descriptor::{
    BuildHandlerSpec, Capability, HtmlRewriteHandler, LifecycleHandler, PluginDescriptor,
    PluginDescriptorBuilder, PluginRequirement,
};
pub use requirement::RuntimeVersions;

use crate::error::RegistryError;
use crate::lifecycle::Phase;
use std::sync::Arc;

/// Immutable, priority-sorted collection of plugin descriptors with
/// capability-filtered views.
#[derive(Debug)]
pub struct PluginRegistry {
    plugins: Vec<Arc<PluginDescriptor>>,
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::new()
    }

    /// Descriptors carrying the capability tag, in priority order.
    pub fn by_capability(&self, capability: Capability) -> Vec<&PluginDescriptor> {
        self.plugins
            .iter()
            .filter(|p| p.has_capability(capability))
            .map(|p| p.as_ref())
            .collect()
    }

    /// Descriptors carrying a nested capability group, e.g. the
    /// `html_rewrite` handlers that implement `after`, or the `build`
    /// handlers registered under a given namespace.
    pub fn sub_capability(&self, capability: Capability, sub: &str) -> Vec<&PluginDescriptor> {
        self.plugins
            .iter()
            .filter(|p| p.has_sub_capability(capability, sub))
            .map(|p| p.as_ref())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.plugins.iter().find(|p| p.name() == name).map(|p| p.as_ref())
    }

    /// Lifecycle handlers for one phase, priority-ordered, paired with the
    /// owning plugin's name.
    pub fn lifecycle_handlers(&self, phase: Phase) -> Vec<(Arc<dyn LifecycleHandler>, String)> {
        self.plugins
            .iter()
            .filter_map(|p| {
                p.lifecycle_handler(phase)
                    .map(|h| (h, p.name().to_string()))
            })
            .collect()
    }

    /// HTML rewrite handlers, priority-ordered, paired with plugin names.
    pub fn html_rewriters(&self) -> Vec<(Arc<dyn HtmlRewriteHandler>, String)> {
        self.plugins
            .iter()
            .filter_map(|p| p.html_rewrite().map(|h| (h, p.name().to_string())))
            .collect()
    }

    /// Build-time load handlers across all plugins, in descriptor priority
    /// order. The load pool applies each spec's own priority on top.
    pub fn build_handlers(&self) -> Vec<(&PluginDescriptor, &BuildHandlerSpec)> {
        self.plugins
            .iter()
            .flat_map(|p| p.build_specs().iter().map(move |s| (p.as_ref(), s)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }
}

/// Startup-only mutable stage of the registry. `build()` seals it.
#[derive(Debug)]
pub struct PluginRegistryBuilder {
    plugins: Vec<PluginDescriptor>,
}

impl PluginRegistryBuilder {
    fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Register a descriptor. Names are unique keys; duplicates are
    /// rejected.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<&mut Self, RegistryError> {
        if self.plugins.iter().any(|p| p.name() == descriptor.name()) {
            return Err(RegistryError::DuplicateName(descriptor.name().to_string()));
        }
        self.plugins.push(descriptor);
        Ok(self)
    }

    /// Validate requirement ranges against the running host and framework
    /// versions and seal the registry. Any violation aborts startup.
    pub fn build(self, versions: &RuntimeVersions) -> Result<PluginRegistry, RegistryError> {
        requirement::validate_requirements(&self.plugins, versions)?;

        let mut indexed: Vec<(usize, PluginDescriptor)> =
            self.plugins.into_iter().enumerate().collect();
        // Stable: equal priorities keep registration order.
        indexed.sort_by_key(|(seq, p)| (p.priority(), *seq));

        let plugins: Vec<Arc<PluginDescriptor>> =
            indexed.into_iter().map(|(_, p)| Arc::new(p)).collect();

        tracing::info!(plugin_count = plugins.len(), "plugin registry sealed");

        Ok(PluginRegistry { plugins })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PluginError, PluginRequirementError};
    use crate::lifecycle::RequestContext;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl LifecycleHandler for Noop {
        async fn handle(&self, _ctx: &mut RequestContext) -> Result<(), PluginError> {
            Ok(())
        }
    }

    fn descriptor(name: &str, priority: i32) -> PluginDescriptor {
        PluginDescriptor::builder(name, "1.0.0")
            .priority(priority)
            .on_request(Arc::new(Noop))
            .build()
            .unwrap()
    }

    fn versions() -> RuntimeVersions {
        RuntimeVersions::current()
    }

    #[test]
    fn test_priority_order_independent_of_registration() {
        let mut builder = PluginRegistry::builder();
        builder.register(descriptor("late", 20)).unwrap();
        builder.register(descriptor("early", -5)).unwrap();
        builder.register(descriptor("middle", 0)).unwrap();
        let registry = builder.build(&versions()).unwrap();

        let names: Vec<_> = registry
            .lifecycle_handlers(Phase::Request)
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        assert_eq!(names, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_equal_priority_preserves_registration_order() {
        let mut builder = PluginRegistry::builder();
        builder.register(descriptor("first", 1)).unwrap();
        builder.register(descriptor("second", 1)).unwrap();
        builder.register(descriptor("third", 1)).unwrap();
        let registry = builder.build(&versions()).unwrap();

        assert_eq!(registry.plugin_names(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut builder = PluginRegistry::builder();
        builder.register(descriptor("dup", 0)).unwrap();
        let err = builder.register(descriptor("dup", 1)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "dup"));
    }

    #[test]
    fn test_capability_filtered_view() {
        let mut builder = PluginRegistry::builder();
        builder.register(descriptor("router", 0)).unwrap();
        let registry = builder.build(&versions()).unwrap();

        assert_eq!(registry.by_capability(Capability::Request).len(), 1);
        assert!(registry.by_capability(Capability::HtmlRewrite).is_empty());
        assert!(registry.lifecycle_handlers(Phase::BeforeRequest).is_empty());
    }

    #[test]
    fn test_missing_dependency_fails_build() {
        let dependent = PluginDescriptor::builder("needy", "1.0.0")
            .on_request(Arc::new(Noop))
            .requires_plugin("absent", ">=1.0".parse().unwrap())
            .build()
            .unwrap();

        let mut builder = PluginRegistry::builder();
        builder.register(dependent).unwrap();
        let err = builder.build(&versions()).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Requirement(PluginRequirementError::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_dependency_version_mismatch_fails_build() {
        let dep = descriptor("base", 0);
        let dependent = PluginDescriptor::builder("needy", "1.0.0")
            .on_request(Arc::new(Noop))
            .requires_plugin("base", ">=2.0".parse().unwrap())
            .build()
            .unwrap();

        let mut builder = PluginRegistry::builder();
        builder.register(dep).unwrap();
        builder.register(dependent).unwrap();
        let err = builder.build(&versions()).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Requirement(PluginRequirementError::DependencyVersion { .. })
        ));
    }
}
