use crate::lifecycle::Phase;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Plugin execution error: {0}")]
    Execution(#[from] PluginExecutionError),

    #[error("Rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("Module load error: {0}")]
    Load(#[from] LoadError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Requirement check failed: {0}")]
    Requirement(#[from] PluginRequirementError),

    #[error("Duplicate plugin name: {0}")]
    DuplicateName(String),

    #[error("Invalid version for plugin '{plugin}': {reason}")]
    InvalidVersion { plugin: String, reason: String },
}

/// Fatal startup-time requirement violations. Never produced per request:
/// the registry validates every descriptor before the server starts serving.
#[derive(Error, Debug)]
pub enum PluginRequirementError {
    #[error("Plugin '{plugin}' requires host version {required}, found {found}")]
    HostVersion {
        plugin: String,
        required: semver::VersionReq,
        found: semver::Version,
    },

    #[error("Plugin '{plugin}' requires framework version {required}, found {found}")]
    FrameworkVersion {
        plugin: String,
        required: semver::VersionReq,
        found: semver::Version,
    },

    #[error("Plugin '{plugin}' depends on plugin '{dependency}' which is not registered")]
    MissingDependency { plugin: String, dependency: String },

    #[error("Plugin '{plugin}' requires '{dependency}' version {required}, found {found}")]
    DependencyVersion {
        plugin: String,
        dependency: String,
        required: semver::VersionReq,
        found: semver::Version,
    },
}

/// Misuse of the commit/send_now/phase contract. Returned to the offending
/// plugin's call site, not swallowed by the engine.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Response already set")]
    ResponseAlreadySet,

    #[error("Response not set")]
    ResponseNotSet,

    #[error("Invalid operation '{operation}' during {phase} phase")]
    StateViolation { phase: Phase, operation: String },
}

/// Errors a lifecycle handler may surface to the engine. Any of these aborts
/// the whole pipeline for the current request.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PluginError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// A handler failure annotated with the plugin and phase it occurred in.
#[derive(Error, Debug)]
#[error("Plugin '{plugin}' failed during {phase} phase: {source}")]
pub struct PluginExecutionError {
    pub plugin: String,
    pub phase: Phase,
    #[source]
    pub source: PluginError,
}

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("Invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    #[error("Rewrite context initialization failed: {0}")]
    Init(String),

    #[error("Document pass failed: {0}")]
    Pass(String),
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Path '{}' escapes base directory '{}'", .path.display(), .base.display())]
    PathEscape { path: PathBuf, base: PathBuf },

    #[error("Invalid load filter '{pattern}': {reason}")]
    InvalidFilter { pattern: String, reason: String },

    #[error("Loader '{plugin}' failed for '{}': {reason}", .path.display())]
    Loader {
        plugin: String,
        path: PathBuf,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ServerError>;

impl warp::reject::Reject for ServerError {}
