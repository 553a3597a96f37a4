//! Onion-Ripple main entry point
//!
//! This is the command-line interface for the Onion-Ripple hidden-service
//! mapper.

use clap::Parser;
use onion_ripple::config::{load_config_with_hash, Config, StorageType};
use onion_ripple::crawler::run_crawl;
use onion_ripple::ConfigError;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Onion-Ripple: a breadth-first hidden-service mapper
///
/// Onion-Ripple crawls .onion sites through a Tor SOCKS proxy, recording
/// every visited page and its links. Re-running against the same store
/// resumes where the previous crawl stopped.
#[derive(Parser, Debug)]
#[command(name = "onion-ripple")]
#[command(version = "1.0.0")]
#[command(about = "A breadth-first hidden-service mapper", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (optional)
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Seed .onion URL
    #[arg(short = 'u', long)]
    start_url: Option<String>,

    /// Maximum link depth from the seed
    #[arg(short = 'd', long)]
    max_depth: Option<u32>,

    /// Maximum number of pages to record
    #[arg(short = 'p', long)]
    max_pages: Option<u64>,

    /// Storage backend
    #[arg(short = 's', long, value_parser = ["json", "sqlite"])]
    storage: Option<String>,

    /// Seconds between the starts of successive requests
    #[arg(long)]
    delay: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Suppress non-error output
    #[arg(short, long)]
    quiet: bool,

    /// Show statistics from the configured store and exit
    #[arg(long)]
    stats: bool,
}

impl Cli {
    /// Copies every flag that was given onto the configuration
    fn apply_to(&self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(url) = &self.start_url {
            config.crawler.start_url = url.clone();
        }
        if let Some(depth) = self.max_depth {
            config.crawler.max_depth = depth;
        }
        if let Some(pages) = self.max_pages {
            config.crawler.max_pages = pages;
        }
        if let Some(storage) = &self.storage {
            config.storage.storage_type = storage
                .parse::<StorageType>()
                .map_err(ConfigError::Validation)?;
        }
        if let Some(delay) = self.delay {
            config.crawler.request_delay = delay;
        }
        if let Some(timeout) = self.timeout {
            config.crawler.request_timeout = timeout;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (config, config_hash) = match load_config_with_hash(&cli.config, |c| cli.apply_to(c)) {
        Ok(loaded) => loaded,
        Err(e) => {
            // logging is not configured yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    setup_logging(&config.log_level, cli.quiet);

    match &config_hash {
        Some(hash) => tracing::info!(
            "Configuration loaded from {} (hash: {})",
            cli.config.display(),
            hash
        ),
        None => tracing::info!(
            "No config file at {}, using defaults and overrides",
            cli.config.display()
        ),
    }

    if cli.stats {
        handle_stats(&config)
    } else {
        handle_crawl(config).await
    }
}

/// Sets up the tracing subscriber for the configured level
fn setup_logging(level: &str, quiet: bool) {
    let level = match level.to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other => other.to_string(),
    };

    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::new(format!("onion_ripple={},warn", level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --stats mode: shows statistics from the configured store
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use onion_ripple::output::{load_statistics, print_statistics};
    use onion_ripple::storage::open_storage;

    let storage = open_storage(&config.storage)?;
    println!("Store: {}\n", storage.describe());

    let stats = load_statistics(storage.as_ref())?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        "Starting crawl at {} (max_depth {}, max_pages {}, {} storage)",
        config.crawler.start_url,
        config.crawler.max_depth,
        config.crawler.max_pages,
        config.storage.storage_type.as_str()
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping crawl");
            let _ = shutdown_tx.send(true);
        }
    });

    match run_crawl(config, shutdown_rx).await {
        Ok(report) => {
            tracing::info!(
                "Crawl {}: {} pages recorded, {} with errors, {} links queued",
                if report.interrupted { "interrupted" } else { "completed" },
                report.pages_recorded,
                report.pages_failed,
                report.links_offered
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
