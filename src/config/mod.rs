//! Configuration module for Onion-Ripple
//!
//! Settings come from a TOML file, then environment variables, then the
//! command line, each layer overriding the previous one.
//!
//! # Example
//!
//! ```no_run
//! use onion_ripple::config::{apply_env_overrides, load_config, validate};
//! use std::path::Path;
//!
//! let mut config = load_config(Path::new("config.toml")).unwrap();
//! apply_env_overrides(&mut config).unwrap();
//! validate(&config).unwrap();
//! println!("Crawler will use max depth: {}", config.crawler.max_depth);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{Config, CrawlerConfig, StorageConfig, StorageType, TorConfig};

pub use parser::{
    apply_env_overrides, apply_overrides_from, compute_config_hash, load_config,
    load_config_or_default, load_config_with_hash,
};
pub use validation::validate;
