use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// The file is not validated here: environment and command-line overrides
/// are applied on top of it first, then [`validate`] runs on the result.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

/// Loads the file if it exists, otherwise starts from defaults
pub fn load_config_or_default(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(
            "Config file {} not found, using defaults",
            path.display()
        );
        Ok(Config::default())
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so a store can be correlated with the config that
/// produced it.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Applies environment variable overrides from the process environment
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    apply_overrides_from(config, |key| std::env::var(key).ok())
}

/// Applies overrides read through `lookup`
///
/// Environment sits between the file and the command line in precedence.
pub fn apply_overrides_from<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("TOR_PROXY_HOST") {
        config.tor.proxy_host = host;
    }
    if let Some(port) = lookup("TOR_PROXY_PORT") {
        config.tor.proxy_port = parse_env("TOR_PROXY_PORT", &port)?;
    }
    if let Some(port) = lookup("TOR_CONTROL_PORT") {
        config.tor.control_port = parse_env("TOR_CONTROL_PORT", &port)?;
    }
    if let Some(password) = lookup("TOR_CONTROL_PASSWORD") {
        config.tor.control_password = Some(password);
    }
    if let Some(url) = lookup("START_URL") {
        config.crawler.start_url = url;
    }
    if let Some(depth) = lookup("MAX_DEPTH") {
        config.crawler.max_depth = parse_env("MAX_DEPTH", &depth)?;
    }
    if let Some(pages) = lookup("MAX_PAGES") {
        config.crawler.max_pages = parse_env("MAX_PAGES", &pages)?;
    }
    if let Some(storage) = lookup("STORAGE_TYPE") {
        config.storage.storage_type = storage.parse().map_err(ConfigError::Validation)?;
    }
    if let Some(level) = lookup("LOG_LEVEL") {
        config.log_level = level;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::Validation(format!("{} has an invalid value: '{}'", key, value))
    })
}

/// Loads the file, applies env overrides, then `overrides`, and validates
///
/// `overrides` is where command-line values land, so they win over both the
/// file and the environment. Returns the hash of the file when one exists.
pub fn load_config_with_hash<F>(
    path: &Path,
    overrides: F,
) -> Result<(Config, Option<String>), ConfigError>
where
    F: FnOnce(&mut Config) -> Result<(), ConfigError>,
{
    let mut config = load_config_or_default(path)?;
    apply_env_overrides(&mut config)?;
    overrides(&mut config)?;
    validate(&config)?;
    let hash = if path.exists() {
        Some(compute_config_hash(path)?)
    } else {
        None
    };
    Ok((config, hash))
}
