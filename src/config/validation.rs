use crate::config::types::{Config, CrawlerConfig, StorageConfig, TorConfig};
use crate::ConfigError;
use url::Url;

/// Validates the merged configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_tor_config(&config.tor)?;
    validate_crawler_config(&config.crawler)?;
    validate_storage_config(&config.storage)?;
    validate_log_level(&config.log_level)?;
    Ok(())
}

fn validate_tor_config(config: &TorConfig) -> Result<(), ConfigError> {
    if config.proxy_host.is_empty() {
        return Err(ConfigError::Validation(
            "proxy_host cannot be empty".to_string(),
        ));
    }

    if config.startup_attempts < 1 {
        return Err(ConfigError::Validation(
            "startup_attempts must be at least 1".to_string(),
        ));
    }

    if !config.startup_retry_delay.is_finite() || config.startup_retry_delay < 0.0 {
        return Err(ConfigError::Validation(format!(
            "startup_retry_delay cannot be negative, got {}",
            config.startup_retry_delay
        )));
    }

    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_start_url(&config.start_url)?;

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "max_pages must be at least 1".to_string(),
        ));
    }

    if config.max_pages_per_domain < 1 {
        return Err(ConfigError::Validation(
            "max_pages_per_domain must be at least 1".to_string(),
        ));
    }

    if !config.request_delay.is_finite() || config.request_delay < 0.0 {
        return Err(ConfigError::Validation(format!(
            "request_delay cannot be negative, got {}",
            config.request_delay
        )));
    }

    if !config.request_timeout.is_finite() || config.request_timeout <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "request_timeout must be positive, got {}",
            config.request_timeout
        )));
    }

    if !config.retry_backoff.is_finite() || config.retry_backoff < 0.0 {
        return Err(ConfigError::Validation(format!(
            "retry_backoff cannot be negative, got {}",
            config.retry_backoff
        )));
    }

    for domain in &config.allowed_domains {
        if domain.is_empty() || domain.contains('/') {
            return Err(ConfigError::Validation(format!(
                "allowed_domains entry '{}' must be a bare host name",
                domain
            )));
        }
    }

    Ok(())
}

/// The seed must be an absolute http(s) URL on a `.onion` host
fn validate_start_url(start_url: &str) -> Result<(), ConfigError> {
    if start_url.is_empty() {
        return Err(ConfigError::Validation(
            "start_url cannot be empty".to_string(),
        ));
    }

    let url = Url::parse(start_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid start_url '{}': {}", start_url, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "start_url '{}' must use http or https",
            start_url
        )));
    }

    if !crate::url::is_onion_url(&url) {
        return Err(ConfigError::Validation(format!(
            "start_url '{}' must be a .onion address",
            start_url
        )));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.output_dir.is_empty() {
        return Err(ConfigError::Validation(
            "output_dir cannot be empty".to_string(),
        ));
    }

    if config.json_filename.is_empty() || config.sqlite_filename.is_empty() {
        return Err(ConfigError::Validation(
            "storage file names cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_log_level(level: &str) -> Result<(), ConfigError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "warning" | "error" => Ok(()),
        other => Err(ConfigError::Validation(format!(
            "log_level must be one of trace, debug, info, warn, error; got '{}'",
            other
        ))),
    }
}
