//! Breadth-first frontier for the crawl
//!
//! This module handles:
//! - The FIFO queue of URLs waiting to be fetched, with their depth
//! - The visited set that prevents any URL being dequeued twice
//! - Per-domain recorded-page counters
//! - Domain acceptance (onion only, allow-list, seed-domain restriction)
//! - Rebuilding all of the above from stored records on resume

use crate::config::CrawlerConfig;
use crate::storage::StoredPage;
use crate::url::{extract_domain, is_onion_url, normalize_url};
use std::collections::{HashMap, HashSet, VecDeque};
use url::Url;

/// A URL queued for fetching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Canonical URL to fetch
    pub url: Url,

    /// BFS distance from the seed
    pub depth: u32,

    /// Lowercase host of `url`
    pub domain: String,
}

/// Extra per-URL admission check, consulted after the built-in rules
///
/// This is where an exclusion policy such as robots rules plugs in.
pub trait UrlFilter: Send {
    fn allows(&self, url: &Url) -> bool;
}

impl<F> UrlFilter for F
where
    F: Fn(&Url) -> bool + Send,
{
    fn allows(&self, url: &Url) -> bool {
        self(url)
    }
}

/// Frontier manages the work queue and the limits that gate it
///
/// Entries are dequeued in insertion order. Children are only offered after
/// their parent was dequeued, so every depth-d entry leaves the queue before
/// any depth-(d+1) entry.
pub struct Frontier {
    queue: VecDeque<FrontierEntry>,

    /// URLs currently in `queue`
    queued: HashSet<String>,

    /// URLs dequeued or recorded, never offered again
    visited: HashSet<String>,

    /// Recorded pages per domain
    domain_counts: HashMap<String, u32>,

    /// Recorded pages across the whole (resumed) crawl
    recorded: u64,

    max_depth: u32,
    max_pages_per_domain: u32,
    allowed_domains: HashSet<String>,

    /// Only domain permitted when external onions are not followed
    seed_domain: Option<String>,

    filter: Option<Box<dyn UrlFilter>>,
}

impl Frontier {
    /// Creates an empty frontier for a crawl seeded at `seed`
    pub fn new(config: &CrawlerConfig, seed: &Url) -> Self {
        let seed_domain = if config.follow_external_onion {
            None
        } else {
            extract_domain(seed)
        };

        Self {
            queue: VecDeque::new(),
            queued: HashSet::new(),
            visited: HashSet::new(),
            domain_counts: HashMap::new(),
            recorded: 0,
            max_depth: config.max_depth,
            max_pages_per_domain: config.max_pages_per_domain,
            allowed_domains: config
                .allowed_domains
                .iter()
                .map(|d| d.trim().to_lowercase())
                .collect(),
            seed_domain,
            filter: None,
        }
    }

    /// Installs an additional admission check
    pub fn set_filter(&mut self, filter: Box<dyn UrlFilter>) {
        self.filter = Some(filter);
    }

    /// Marks URLs a previous run already recorded, so they are never offered
    pub fn mark_visited<I>(&mut self, urls: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.visited.extend(urls);
    }

    /// Rebuilds counters and queue from stored records
    ///
    /// The visited set comes from [`Frontier::mark_visited`], which must be
    /// called first. Stored links that were never recorded themselves are
    /// offered again at their parent's depth + 1, in stored order, under the
    /// usual acceptance rules.
    pub fn restore(&mut self, records: &[StoredPage]) {
        for record in records {
            if let Some(domain) = domain_of(&record.page.url) {
                *self.domain_counts.entry(domain).or_insert(0) += 1;
            }
            self.recorded += 1;
        }

        let mut requeued = 0;
        for record in records {
            for link in &record.links {
                match normalize_url(link) {
                    Ok(url) => {
                        if self.offer(url, record.page.depth + 1) {
                            requeued += 1;
                        }
                    }
                    Err(e) => tracing::debug!("Skipping stored link {}: {}", link, e),
                }
            }
        }

        tracing::info!(
            "Restored {} recorded pages across {} domains, {} URLs requeued",
            self.recorded,
            self.domain_counts.len(),
            requeued
        );
    }

    /// Whether the domain rules and the filter hook admit this URL at all
    ///
    /// This ignores depth, visited state and counters; it is the check used
    /// to decide which links of a page are worth recording.
    pub fn permits(&self, url: &Url) -> bool {
        if !is_onion_url(url) {
            return false;
        }

        let Some(domain) = extract_domain(url) else {
            return false;
        };

        if !self.allowed_domains.is_empty() && !self.allowed_domains.contains(&domain) {
            return false;
        }

        if let Some(seed_domain) = &self.seed_domain {
            if &domain != seed_domain {
                return false;
            }
        }

        self.filter.as_ref().map_or(true, |f| f.allows(url))
    }

    /// Offers a URL at the given depth
    ///
    /// Returns true if the URL was enqueued. Offering a URL that is visited,
    /// already queued, too deep, not permitted, or whose domain is at its cap
    /// is a no-op.
    pub fn offer(&mut self, url: Url, depth: u32) -> bool {
        let key = url.as_str();

        if self.visited.contains(key) || self.queued.contains(key) {
            return false;
        }

        if depth > self.max_depth {
            tracing::trace!("Not queueing {} at depth {}: too deep", url, depth);
            return false;
        }

        if !self.permits(&url) {
            tracing::trace!("Not queueing {}: domain not permitted", url);
            return false;
        }

        let Some(domain) = extract_domain(&url) else {
            return false;
        };

        if self.domain_full(&domain) {
            tracing::trace!("Not queueing {}: domain {} at page cap", url, domain);
            return false;
        }

        self.queued.insert(key.to_string());
        self.queue.push_back(FrontierEntry { url, depth, domain });
        true
    }

    /// Dequeues the next entry and marks it visited
    ///
    /// Entries whose domain filled up while they waited are dropped.
    pub fn next(&mut self) -> Option<FrontierEntry> {
        while let Some(entry) = self.queue.pop_front() {
            let key = entry.url.as_str().to_string();
            self.queued.remove(&key);
            self.visited.insert(key);

            if self.domain_full(&entry.domain) {
                tracing::debug!(
                    "Dropping {}: domain {} reached its page cap",
                    entry.url,
                    entry.domain
                );
                continue;
            }

            return Some(entry);
        }
        None
    }

    /// Counts a page as recorded against its domain
    pub fn record_page(&mut self, domain: &str) {
        *self.domain_counts.entry(domain.to_string()).or_insert(0) += 1;
        self.recorded += 1;
    }

    fn domain_full(&self, domain: &str) -> bool {
        self.domain_count(domain) >= self.max_pages_per_domain
    }

    pub fn domain_count(&self, domain: &str) -> u32 {
        self.domain_counts.get(domain).copied().unwrap_or(0)
    }

    /// Pages recorded so far, including those from before a resume
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited.contains(url)
    }

    /// Number of distinct domains with at least one recorded page
    pub fn domains_seen(&self) -> usize {
        self.domain_counts.len()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

fn domain_of(url: &str) -> Option<String> {
    Url::parse(url).ok().as_ref().and_then(extract_domain)
}
