//! Plugin descriptors and capability traits
//!
//! A descriptor carries a plugin's identity (name, semantic version,
//! priority) and an explicit set of capability tags, each with its handler
//! value. Dispatch is always a lookup by tag into the matching trait — the
//! engine never probes a plugin's shape at runtime.

use crate::error::{PluginError, RegistryError, RewriteError};
use crate::lifecycle::{Phase, RequestContext, RequestHead};
use crate::loader::ModuleLoader;
use crate::response::rewrite::ElementMutation;
use async_trait::async_trait;
use semver::{Version, VersionReq};
use std::collections::HashMap;
use std::sync::Arc;

/// Named extension points a plugin may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    BeforeRequest,
    Request,
    AfterRequest,
    HtmlRewrite,
    Build,
    Requirement,
}

/// A hook invoked during one lifecycle phase. Handlers run strictly
/// sequentially in priority order; the engine awaits each call before
/// invoking the next, so a later plugin reliably observes an earlier
/// plugin's context mutations. There is no timeout: a stalled handler
/// blocks its request indefinitely.
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), PluginError>;
}

/// A per-request HTML mutation contributor.
///
/// `init_context` produces a private context value for this request;
/// `mutations` returns the element mutations to register against the shared
/// streaming rewriter; `after` observes the transformed document once the
/// pass completes (`None` for streaming bodies, which are never buffered).
/// A handler overriding `after` should also override `has_after`.
pub trait HtmlRewriteHandler: Send + Sync {
    fn init_context(&self, request: &RequestHead) -> Result<serde_json::Value, RewriteError>;

    fn mutations(
        &self,
        context: &serde_json::Value,
        request: &RequestHead,
    ) -> Result<Vec<ElementMutation>, RewriteError>;

    fn after(&self, context: &serde_json::Value, request: &RequestHead, document: Option<&str>) {
        let _ = (context, request, document);
    }

    fn has_after(&self) -> bool {
        false
    }
}

/// One build-time load handler contributed by a plugin.
pub struct BuildHandlerSpec {
    pub priority: i32,
    pub filter: String,
    pub namespace: String,
    pub loader: Arc<dyn ModuleLoader>,
}

/// Version ranges a plugin demands of its environment, checked once at
/// startup.
#[derive(Debug, Clone, Default)]
pub struct PluginRequirement {
    pub host: Option<VersionReq>,
    pub framework: Option<VersionReq>,
    pub plugins: HashMap<String, VersionReq>,
}

impl PluginRequirement {
    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.framework.is_none() && self.plugins.is_empty()
    }
}

/// Immutable description of one registered plugin.
pub struct PluginDescriptor {
    name: String,
    version: Version,
    priority: i32,
    before_request: Option<Arc<dyn LifecycleHandler>>,
    request: Option<Arc<dyn LifecycleHandler>>,
    after_request: Option<Arc<dyn LifecycleHandler>>,
    html_rewrite: Option<Arc<dyn HtmlRewriteHandler>>,
    build: Vec<BuildHandlerSpec>,
    requirement: Option<PluginRequirement>,
}

impl PluginDescriptor {
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> PluginDescriptorBuilder {
        PluginDescriptorBuilder {
            name: name.into(),
            version: version.into(),
            priority: 0,
            before_request: None,
            request: None,
            after_request: None,
            html_rewrite: None,
            build: Vec::new(),
            requirement: PluginRequirement::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        match capability {
            Capability::BeforeRequest => self.before_request.is_some(),
            Capability::Request => self.request.is_some(),
            Capability::AfterRequest => self.after_request.is_some(),
            Capability::HtmlRewrite => self.html_rewrite.is_some(),
            Capability::Build => !self.build.is_empty(),
            Capability::Requirement => self.requirement.is_some(),
        }
    }

    /// Nested capability membership: `html_rewrite` exposes `rewrite` and
    /// `after`; `build` exposes its namespaces.
    pub fn has_sub_capability(&self, capability: Capability, sub: &str) -> bool {
        match capability {
            Capability::HtmlRewrite => match (&self.html_rewrite, sub) {
                (Some(_), "rewrite") => true,
                (Some(handler), "after") => handler.has_after(),
                _ => false,
            },
            Capability::Build => self.build.iter().any(|s| s.namespace == sub),
            _ => false,
        }
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        [
            Capability::BeforeRequest,
            Capability::Request,
            Capability::AfterRequest,
            Capability::HtmlRewrite,
            Capability::Build,
            Capability::Requirement,
        ]
        .into_iter()
        .filter(|c| self.has_capability(*c))
        .collect()
    }

    pub fn lifecycle_handler(&self, phase: Phase) -> Option<Arc<dyn LifecycleHandler>> {
        match phase {
            Phase::BeforeRequest => self.before_request.clone(),
            Phase::Request => self.request.clone(),
            Phase::AfterRequest => self.after_request.clone(),
            Phase::Done => None,
        }
    }

    pub fn html_rewrite(&self) -> Option<Arc<dyn HtmlRewriteHandler>> {
        self.html_rewrite.clone()
    }

    pub fn build_specs(&self) -> &[BuildHandlerSpec] {
        &self.build
    }

    pub fn requirement(&self) -> Option<&PluginRequirement> {
        self.requirement.as_ref()
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("priority", &self.priority)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Builder for `PluginDescriptor`. The version string is parsed at
/// `build()`; an invalid version is a registration error, not a panic.
pub struct PluginDescriptorBuilder {
    name: String,
    version: String,
    priority: i32,
    before_request: Option<Arc<dyn LifecycleHandler>>,
    request: Option<Arc<dyn LifecycleHandler>>,
    after_request: Option<Arc<dyn LifecycleHandler>>,
    html_rewrite: Option<Arc<dyn HtmlRewriteHandler>>,
    build: Vec<BuildHandlerSpec>,
    requirement: PluginRequirement,
}

impl PluginDescriptorBuilder {
    /// Lower priorities run earlier. Defaults to 0.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn on_before_request(mut self, handler: Arc<dyn LifecycleHandler>) -> Self {
        self.before_request = Some(handler);
        self
    }

    pub fn on_request(mut self, handler: Arc<dyn LifecycleHandler>) -> Self {
        self.request = Some(handler);
        self
    }

    pub fn on_after_request(mut self, handler: Arc<dyn LifecycleHandler>) -> Self {
        self.after_request = Some(handler);
        self
    }

    pub fn html_rewrite(mut self, handler: Arc<dyn HtmlRewriteHandler>) -> Self {
        self.html_rewrite = Some(handler);
        self
    }

    /// Contribute a build-time load handler. `namespace` of `None` lands in
    /// the default namespace.
    pub fn on_load(
        mut self,
        priority: i32,
        filter: impl Into<String>,
        namespace: Option<String>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        self.build.push(BuildHandlerSpec {
            priority,
            filter: filter.into(),
            namespace: namespace.unwrap_or_else(|| crate::loader::DEFAULT_NAMESPACE.to_string()),
            loader,
        });
        self
    }

    pub fn requires_host(mut self, range: VersionReq) -> Self {
        self.requirement.host = Some(range);
        self
    }

    pub fn requires_framework(mut self, range: VersionReq) -> Self {
        self.requirement.framework = Some(range);
        self
    }

    pub fn requires_plugin(mut self, name: impl Into<String>, range: VersionReq) -> Self {
        self.requirement.plugins.insert(name.into(), range);
        self
    }

    pub fn build(self) -> Result<PluginDescriptor, RegistryError> {
        let version =
            Version::parse(&self.version).map_err(|e| RegistryError::InvalidVersion {
                plugin: self.name.clone(),
                reason: e.to_string(),
            })?;

        let requirement = if self.requirement.is_empty() {
            None
        } else {
            Some(self.requirement)
        };

        Ok(PluginDescriptor {
            name: self.name,
            version,
            priority: self.priority,
            before_request: self.before_request,
            request: self.request,
            after_request: self.after_request,
            html_rewrite: self.html_rewrite,
            build: self.build,
            requirement,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_version_rejected() {
        let err = PluginDescriptor::builder("broken", "not-a-version")
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidVersion { .. }));
    }

    #[test]
    fn test_capability_tags_reflect_handlers() {
        let descriptor = PluginDescriptor::builder("bare", "0.1.0").build().unwrap();
        assert!(descriptor.capabilities().is_empty());
        assert!(!descriptor.has_capability(Capability::Request));
        assert!(!descriptor.has_sub_capability(Capability::HtmlRewrite, "rewrite"));
    }

    #[test]
    fn test_requirement_only_present_when_populated() {
        let bare = PluginDescriptor::builder("bare", "0.1.0").build().unwrap();
        assert!(bare.requirement().is_none());

        let constrained = PluginDescriptor::builder("constrained", "0.1.0")
            .requires_framework(">=0.1".parse().unwrap())
            .build()
            .unwrap();
        assert!(constrained.requirement().is_some());
        assert!(constrained.has_capability(Capability::Requirement));
    }
}
