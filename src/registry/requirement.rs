//! Startup requirement validation
//!
//! Semantic-version ranges declared by plugins are evaluated exactly once,
//! against the host runtime, the framework, and named sibling plugins. Any
//! violation aborts startup; nothing here runs per request.

use crate::config::Config;
use crate::error::{ConfigError, PluginRequirementError};
use crate::registry::descriptor::PluginDescriptor;
use semver::Version;
use std::collections::HashMap;

/// Versions a plugin requirement is matched against.
#[derive(Debug, Clone)]
pub struct RuntimeVersions {
    pub host: Version,
    pub framework: Version,
}

impl RuntimeVersions {
    /// Framework version is this crate's own version; the host defaults to
    /// the same unless an embedding host overrides it via configuration.
    pub fn current() -> Self {
        let framework = Version::parse(env!("CARGO_PKG_VERSION"))
            .expect("crate version is valid semver");
        Self {
            host: framework.clone(),
            framework,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut versions = Self::current();
        if let Some(host) = &config.runtime.host_version {
            versions.host = Version::parse(host).map_err(|e| {
                ConfigError::Validation(format!("invalid runtime.hostVersion '{host}': {e}"))
            })?;
        }
        Ok(versions)
    }
}

pub fn validate_requirements(
    plugins: &[PluginDescriptor],
    versions: &RuntimeVersions,
) -> Result<(), PluginRequirementError> {
    let installed: HashMap<&str, &Version> =
        plugins.iter().map(|p| (p.name(), p.version())).collect();

    for plugin in plugins {
        let Some(requirement) = plugin.requirement() else {
            continue;
        };

        if let Some(range) = &requirement.host {
            if !range.matches(&versions.host) {
                return Err(PluginRequirementError::HostVersion {
                    plugin: plugin.name().to_string(),
                    required: range.clone(),
                    found: versions.host.clone(),
                });
            }
        }

        if let Some(range) = &requirement.framework {
            if !range.matches(&versions.framework) {
                return Err(PluginRequirementError::FrameworkVersion {
                    plugin: plugin.name().to_string(),
                    required: range.clone(),
                    found: versions.framework.clone(),
                });
            }
        }

        for (dependency, range) in &requirement.plugins {
            match installed.get(dependency.as_str()) {
                None => {
                    return Err(PluginRequirementError::MissingDependency {
                        plugin: plugin.name().to_string(),
                        dependency: dependency.clone(),
                    });
                }
                Some(found) if !range.matches(found) => {
                    return Err(PluginRequirementError::DependencyVersion {
                        plugin: plugin.name().to_string(),
                        dependency: dependency.clone(),
                        required: range.clone(),
                        found: (*found).clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PluginDescriptor;

    fn versions(host: &str, framework: &str) -> RuntimeVersions {
        RuntimeVersions {
            host: Version::parse(host).unwrap(),
            framework: Version::parse(framework).unwrap(),
        }
    }

    #[test]
    fn test_host_range_mismatch() {
        let plugin = PluginDescriptor::builder("strict", "1.0.0")
            .requires_host(">=2.0".parse().unwrap())
            .build()
            .unwrap();
        let err = validate_requirements(&[plugin], &versions("1.5.0", "1.5.0")).unwrap_err();
        assert!(matches!(err, PluginRequirementError::HostVersion { .. }));
    }

    #[test]
    fn test_framework_range_match() {
        let plugin = PluginDescriptor::builder("lenient", "1.0.0")
            .requires_framework(">=0.1, <2".parse().unwrap())
            .build()
            .unwrap();
        validate_requirements(&[plugin], &versions("1.0.0", "0.9.3")).unwrap();
    }

    #[test]
    fn test_sibling_version_satisfied() {
        let base = PluginDescriptor::builder("base", "1.4.2").build().unwrap();
        let dependent = PluginDescriptor::builder("needy", "0.1.0")
            .requires_plugin("base", "^1.2".parse().unwrap())
            .build()
            .unwrap();
        validate_requirements(&[base, dependent], &versions("1.0.0", "1.0.0")).unwrap();
    }
}
