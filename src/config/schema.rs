use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub server: HttpConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub builtins: BuiltinsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Overrides the host version plugin requirements are checked against.
    /// Defaults to the framework's own version when unset.
    #[serde(default)]
    pub host_version: Option<String>,

    /// Environment variables with this prefix are exposed to the client
    /// through the injection snapshot.
    #[serde(default = "default_public_env_prefix")]
    pub public_env_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    /// Gzip-compress qualifying materialized bodies.
    #[serde(default = "default_true")]
    pub compress: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Base directory load paths are contained to. Unset disables the
    /// containment check (tests, in-memory loaders).
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltinsConfig {
    #[serde(default = "default_true")]
    pub request_logger: bool,
    #[serde(default = "default_true")]
    pub security_headers: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_public_env_prefix() -> String {
    "PUBLIC_".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host_version: None,
            public_env_prefix: default_public_env_prefix(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { compress: true }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { root_dir: None }
    }
}

impl Default for BuiltinsConfig {
    fn default() -> Self {
        Self {
            request_logger: true,
            security_headers: true,
        }
    }
}
