//! Module-load handler pool
//!
//! Build-time content loaders are grouped by namespace; within a group,
//! handlers whose filter matches a path are chained in ascending priority
//! order (stable on ties by registration order). Each handler fully
//! replaces the running result — outputs are never merged implicitly — and
//! a `prevent_chaining` result halts the chain. A group registers exactly
//! one entry point with the external build tool, so the number of entry
//! points is bounded by namespace count rather than plugin count.

pub mod handler;
pub mod path;

pub use handler::{
    LoadMatch, LoadedModule, LoaderKind, ModuleLoadHandler, ModuleLoader, DEFAULT_NAMESPACE,
};

use crate::error::LoadError;
use crate::registry::PluginRegistry;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// Ordered handlers for one namespace plus the lazily-computed union of
/// their filters.
pub struct NamespaceGroup {
    handlers: Vec<ModuleLoadHandler>,
    combined_filter: OnceLock<String>,
}

impl NamespaceGroup {
    fn new() -> Self {
        Self {
            handlers: Vec::new(),
            combined_filter: OnceLock::new(),
        }
    }

    /// Union of member filters as one alternation pattern, computed once.
    pub fn combined_filter(&self) -> &str {
        self.combined_filter.get_or_init(|| {
            let parts: Vec<String> = self
                .handlers
                .iter()
                .map(|h| format!("(?:{})", h.filter_pattern()))
                .collect();
            parts.join("|")
        })
    }

    fn ordered(&self) -> Vec<&ModuleLoadHandler> {
        let mut handlers: Vec<&ModuleLoadHandler> = self.handlers.iter().collect();
        handlers.sort_by_key(|h| (h.priority, h.seq));
        handlers
    }
}

/// Introspection snapshot of one namespace group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDebugInfo {
    pub combined_filter: String,
    pub handlers: Vec<HandlerDebugInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerDebugInfo {
    pub plugin: String,
    pub priority: i32,
    pub filter: String,
}

/// The pool of build-time load handlers. Populated at startup, read-only
/// afterwards; concurrent loads of different paths share no mutable state.
pub struct ModuleLoadPool {
    base_dir: Option<PathBuf>,
    namespaces: HashMap<String, NamespaceGroup>,
    next_seq: u64,
}

impl ModuleLoadPool {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            namespaces: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Collect every build-capability handler from the registry.
    pub fn from_registry(
        registry: &PluginRegistry,
        base_dir: Option<PathBuf>,
    ) -> Result<Self, LoadError> {
        let mut pool = Self::new(base_dir);
        for (descriptor, spec) in registry.build_handlers() {
            pool.register(
                descriptor.name(),
                spec.priority,
                LoadMatch {
                    filter: spec.filter.clone(),
                    namespace: Some(spec.namespace.clone()),
                },
                spec.loader.clone(),
            )?;
        }
        Ok(pool)
    }

    pub fn register(
        &mut self,
        plugin: &str,
        priority: i32,
        load_match: LoadMatch,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<(), LoadError> {
        let filter = Regex::new(&load_match.filter).map_err(|e| LoadError::InvalidFilter {
            pattern: load_match.filter.clone(),
            reason: e.to_string(),
        })?;
        let namespace = load_match
            .namespace
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let seq = self.next_seq;
        self.next_seq += 1;

        self.namespaces
            .entry(namespace.clone())
            .or_insert_with(NamespaceGroup::new)
            .handlers
            .push(ModuleLoadHandler {
                plugin: plugin.to_string(),
                priority,
                filter,
                namespace,
                seq,
                loader,
            });
        Ok(())
    }

    /// The handlers whose filter matches `path` within `namespace`, in
    /// ascending priority order, stable on ties. Pure: no side effects,
    /// usable for diagnostics and tests.
    pub fn matching_handlers(
        &self,
        path: &str,
        namespace: Option<&str>,
    ) -> Vec<&ModuleLoadHandler> {
        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);
        let Some(group) = self.namespaces.get(namespace) else {
            return Vec::new();
        };
        group
            .ordered()
            .into_iter()
            .filter(|h| h.matches(path))
            .collect()
    }

    /// Run the handler chain for one path. Returns `None` when no handler
    /// matches (the external default loading applies). A handler failure is
    /// logged and skipped; the chain continues with the prior pooled result.
    pub async fn execute(
        &self,
        path: &str,
        namespace: Option<&str>,
    ) -> Result<Option<LoadedModule>, LoadError> {
        let matched = self.matching_handlers(path, namespace);
        if matched.is_empty() {
            return Ok(None);
        }

        let resolved = match &self.base_dir {
            Some(base) => path::resolve_within(base, path)?,
            None => PathBuf::from(path),
        };

        let mut pooled: Option<LoadedModule> = None;
        for handler in matched {
            match handler.loader.load(&resolved, pooled.as_ref()).await {
                Ok(result) => {
                    if result.prevent_chaining {
                        tracing::debug!(
                            plugin = handler.plugin(),
                            path,
                            "load chain halted by prevent_chaining"
                        );
                        return Ok(Some(result));
                    }
                    pooled = Some(result);
                }
                Err(err) => {
                    tracing::warn!(
                        plugin = handler.plugin(),
                        path,
                        %err,
                        "load handler failed, skipping"
                    );
                }
            }
        }
        Ok(pooled)
    }

    /// One external entry point per namespace group, each carrying the
    /// union filter and delegating back to `execute`.
    pub fn create_unified_plugin(self: &Arc<Self>, name: impl Into<String>) -> UnifiedPlugin {
        let mut entries: Vec<UnifiedEntry> = self
            .namespaces
            .iter()
            .map(|(namespace, group)| UnifiedEntry {
                namespace: namespace.clone(),
                filter: group.combined_filter().to_string(),
                pool: Arc::clone(self),
            })
            .collect();
        entries.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        UnifiedPlugin {
            name: name.into(),
            entries,
        }
    }

    pub fn debug_info(&self) -> BTreeMap<String, NamespaceDebugInfo> {
        self.namespaces
            .iter()
            .map(|(namespace, group)| {
                let handlers = group
                    .ordered()
                    .into_iter()
                    .map(|h| HandlerDebugInfo {
                        plugin: h.plugin.clone(),
                        priority: h.priority,
                        filter: h.filter_pattern().to_string(),
                    })
                    .collect();
                (
                    namespace.clone(),
                    NamespaceDebugInfo {
                        combined_filter: group.combined_filter().to_string(),
                        handlers,
                    },
                )
            })
            .collect()
    }

    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }

    pub fn handler_count(&self) -> usize {
        self.namespaces.values().map(|g| g.handlers.len()).sum()
    }
}

/// Sink the unified plugin registers its entry points into — the seam to
/// the external build tool.
pub trait BuildRegistrar {
    fn on_load(&mut self, plugin: &str, namespace: &str, filter: &str);
}

/// The single plugin registered with the external build tool on behalf of
/// every pooled handler.
pub struct UnifiedPlugin {
    name: String,
    entries: Vec<UnifiedEntry>,
}

impl UnifiedPlugin {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[UnifiedEntry] {
        &self.entries
    }

    pub fn register_with(&self, registrar: &mut dyn BuildRegistrar) {
        for entry in &self.entries {
            registrar.on_load(&self.name, &entry.namespace, &entry.filter);
        }
    }
}

/// One namespace's entry point: the union filter plus a delegate back into
/// the pool chain.
pub struct UnifiedEntry {
    namespace: String,
    filter: String,
    pool: Arc<ModuleLoadPool>,
}

impl UnifiedEntry {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub async fn load(&self, path: &str) -> Result<Option<LoadedModule>, LoadError> {
        self.pool.execute(path, Some(&self.namespace)).await
    }
}
