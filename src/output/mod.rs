//! Output module for reporting on crawl results
//!
//! This module handles:
//! - Computing statistics from a store
//! - Printing them for the `--stats` mode

pub mod stats;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};
