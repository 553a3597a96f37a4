//! Statistics derived from a crawl store
//!
//! This module provides functionality for summarising stored records and
//! displaying them.

use crate::storage::{Storage, StorageResult, StoredPage};
use crate::url::extract_domain;
use std::collections::{BTreeMap, HashSet};
use url::Url;

/// Crawl statistics summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStatistics {
    /// Total number of recorded pages
    pub total_pages: u64,

    /// Pages recorded without an error
    pub successful: u64,

    /// Pages recorded with an error
    pub errors: u64,

    /// Total number of link edges
    pub total_links: u64,

    /// Number of unique domains among recorded pages
    pub unique_domains: u64,

    /// Recorded pages per BFS depth
    pub pages_by_depth: BTreeMap<u32, u64>,
}

impl CrawlStatistics {
    /// Computes statistics over a set of stored pages
    pub fn from_records(records: &[StoredPage]) -> Self {
        let mut stats = Self::default();
        let mut domains = HashSet::new();

        for record in records {
            stats.total_pages += 1;
            if record.page.is_success() {
                stats.successful += 1;
            } else {
                stats.errors += 1;
            }
            stats.total_links += record.links.len() as u64;
            *stats.pages_by_depth.entry(record.page.depth).or_insert(0) += 1;

            if let Some(domain) = Url::parse(&record.page.url)
                .ok()
                .as_ref()
                .and_then(extract_domain)
            {
                domains.insert(domain);
            }
        }

        stats.unique_domains = domains.len() as u64;
        stats
    }

    /// Percentage of recorded pages without an error
    pub fn success_rate(&self) -> f64 {
        if self.total_pages > 0 {
            (self.successful as f64 / self.total_pages as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Loads statistics from storage
pub fn load_statistics(storage: &dyn Storage) -> StorageResult<CrawlStatistics> {
    let records = storage.load_records()?;
    Ok(CrawlStatistics::from_records(&records))
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Total pages: {}", stats.total_pages);
    println!("  Successful: {}", stats.successful);
    println!("  Errors: {}", stats.errors);
    println!("  Unique domains: {}", stats.unique_domains);
    println!("  Total links found: {}", stats.total_links);
    println!();

    if !stats.pages_by_depth.is_empty() {
        println!("Pages by Depth:");
        for (depth, count) in &stats.pages_by_depth {
            println!("  {}: {}", depth, count);
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} pages)",
        stats.success_rate(),
        stats.successful,
        stats.total_pages
    );
}
