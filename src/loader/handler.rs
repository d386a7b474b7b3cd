//! Load handler types
//!
//! A load handler pairs a match filter with an async loader function. The
//! pooled result handed from one chained handler to the next is the
//! `{contents, loader kind}` pair; `prevent_chaining` marks a result final.

use crate::error::LoadError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const DEFAULT_NAMESPACE: &str = "default";

/// Source dialect a loader's output should be interpreted as by the
/// downstream build tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoaderKind {
    Js,
    Jsx,
    Ts,
    Tsx,
    Json,
    Css,
    Text,
}

impl fmt::Display for LoaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderKind::Js => "js",
            LoaderKind::Jsx => "jsx",
            LoaderKind::Ts => "ts",
            LoaderKind::Tsx => "tsx",
            LoaderKind::Json => "json",
            LoaderKind::Css => "css",
            LoaderKind::Text => "text",
        };
        write!(f, "{name}")
    }
}

/// Result produced by one load handler and pooled into the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub contents: String,
    pub loader: LoaderKind,
    /// Marks this result final: later handlers in the chain must not run.
    pub prevent_chaining: bool,
}

impl LoadedModule {
    pub fn new(contents: impl Into<String>, loader: LoaderKind) -> Self {
        Self {
            contents: contents.into(),
            loader,
            prevent_chaining: false,
        }
    }

    pub fn final_result(contents: impl Into<String>, loader: LoaderKind) -> Self {
        Self {
            contents: contents.into(),
            loader,
            prevent_chaining: true,
        }
    }
}

/// Filter and namespace a load handler registers under. Namespaces isolate
/// matching: a handler only sees paths loaded in its own namespace.
#[derive(Debug, Clone)]
pub struct LoadMatch {
    pub filter: String,
    pub namespace: Option<String>,
}

impl LoadMatch {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            namespace: None,
        }
    }

    pub fn in_namespace(filter: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            namespace: Some(namespace.into()),
        }
    }
}

/// The loader function a plugin contributes: transforms one source path,
/// optionally consuming the previous handler's pooled result.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(
        &self,
        path: &Path,
        pooled: Option<&LoadedModule>,
    ) -> Result<LoadedModule, LoadError>;
}

/// One registered handler inside a namespace group.
pub struct ModuleLoadHandler {
    pub(crate) plugin: String,
    pub(crate) priority: i32,
    pub(crate) filter: Regex,
    pub(crate) namespace: String,
    /// Registration sequence number, the tiebreaker for equal priorities.
    pub(crate) seq: u64,
    pub(crate) loader: std::sync::Arc<dyn ModuleLoader>,
}

impl ModuleLoadHandler {
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn filter_pattern(&self) -> &str {
        self.filter.as_str()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.filter.is_match(path)
    }
}

impl fmt::Debug for ModuleLoadHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoadHandler")
            .field("plugin", &self.plugin)
            .field("priority", &self.priority)
            .field("filter", &self.filter.as_str())
            .field("namespace", &self.namespace)
            .finish()
    }
}
