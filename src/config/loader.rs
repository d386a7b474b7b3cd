use super::schema::Config;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use std::path::Path;

pub async fn load_from_env_or_file() -> Result<Config> {
    let config: Config = Figment::new()
        // Try to load from various config files
        .merge(Toml::file("trellis.toml"))
        .merge(Json::file("trellis.json"))
        .merge(Yaml::file("trellis.yaml"))
        .merge(Yaml::file("trellis.yml"))
        // Override with environment variables (TRELLIS_ prefix)
        .merge(Env::prefixed("TRELLIS_").split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    apply_env_substitutions(config)
}

pub async fn load_from_path(path: &Path) -> Result<Config> {
    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(format!(
                "unsupported config format: {}",
                path.display()
            ))
            .into())
        }
    };

    let config: Config = figment
        .merge(Env::prefixed("TRELLIS_").split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    apply_env_substitutions(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.server.host.is_empty() {
        return Err(ConfigError::Validation("server.host must not be empty".into()).into());
    }

    if config.runtime.public_env_prefix.is_empty() {
        return Err(ConfigError::Validation(
            "runtime.publicEnvPrefix must not be empty; an empty prefix would expose every environment variable".into(),
        )
        .into());
    }

    if let Some(host_version) = &config.runtime.host_version {
        semver::Version::parse(host_version).map_err(|e| {
            ConfigError::Validation(format!(
                "runtime.hostVersion '{host_version}' is not valid semver: {e}"
            ))
        })?;
    }

    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    if let Some(host_version) = &mut config.runtime.host_version {
        *host_version = substitute_env_vars(host_version)?;
    }
    if let Some(root_dir) = &config.build.root_dir {
        if let Some(raw) = root_dir.to_str() {
            config.build.root_dir = Some(substitute_env_vars(raw)?.into());
        }
    }
    Ok(config)
}

fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                // Support default values (e.g., ${VAR:-default})
                if let Some((name, default)) = var_name.split_once(":-") {
                    match std::env::var(name) {
                        Ok(value) => result = result.replace(&cap[0], &value),
                        Err(_) => result = result.replace(&cap[0], default),
                    }
                } else {
                    return Err(ConfigError::EnvVar(format!(
                        "environment variable '{var_name}' is not set"
                    ))
                    .into());
                }
            }
        }
    }

    Ok(result)
}
