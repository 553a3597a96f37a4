//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl loop that ties the components together:
//! - Restoring the frontier from whatever the store already holds
//! - Pacing fetch starts globally
//! - Fetching, extracting and recording one page at a time
//! - Offering permitted links back to the frontier
//! - Handling interrupts without writing partial records

use crate::config::{Config, CrawlerConfig};
use crate::crawler::fetcher::{probe_proxy, FetchResult, TorTransport, Transport};
use crate::crawler::frontier::{Frontier, FrontierEntry, UrlFilter};
use crate::crawler::parser::extract_response;
use crate::state::CrawlState;
use crate::storage::{open_storage, PageRecord, Storage};
use crate::url::{normalize_parsed, normalize_url};
use crate::{RippleError, StartupError};
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use url::Url;

/// Pages between progress log lines
const PROGRESS_INTERVAL: u64 = 10;

/// Summary of one call to [`Coordinator::run`]
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlReport {
    /// Pages recorded during this run (not counting resumed ones)
    pub pages_recorded: u64,

    /// Of those, pages recorded with an error
    pub pages_failed: u64,

    /// Links accepted into the frontier
    pub links_offered: u64,

    /// Whether the run ended because of an interrupt
    pub interrupted: bool,

    pub final_state: CrawlState,
}

/// Main crawler coordinator structure
///
/// Owns the only mutable crawl state (frontier and store handle); nothing
/// else touches them while a run is in progress.
pub struct Coordinator {
    seed: Url,
    max_pages: u64,
    request_delay: Duration,
    storage: Box<dyn Storage>,
    transport: Box<dyn Transport>,
    frontier: Frontier,
    state: CrawlState,
    last_fetch_started: Option<Instant>,
}

impl Coordinator {
    /// Creates a coordinator and restores the frontier from `storage`
    ///
    /// # Arguments
    ///
    /// * `config` - The crawler configuration
    /// * `storage` - An opened store, possibly holding a previous crawl
    /// * `transport` - The fetcher to use
    pub fn new(
        config: &CrawlerConfig,
        storage: Box<dyn Storage>,
        transport: Box<dyn Transport>,
    ) -> Result<Self, RippleError> {
        let seed = normalize_url(&config.start_url)?;

        let mut frontier = Frontier::new(config, &seed);
        frontier.mark_visited(storage.visited_urls()?);
        let records = storage.load_records()?;
        if !records.is_empty() {
            tracing::info!(
                "Resuming from {} pages already in {}",
                records.len(),
                storage.describe()
            );
            frontier.restore(&records);
        }

        Ok(Self {
            seed,
            max_pages: config.max_pages,
            request_delay: Duration::from_secs_f64(config.request_delay.max(0.0)),
            storage,
            transport,
            frontier,
            state: CrawlState::Idle,
            last_fetch_started: None,
        })
    }

    /// Adds an extra admission check for discovered URLs
    pub fn with_url_filter(mut self, filter: Box<dyn UrlFilter>) -> Self {
        self.frontier.set_filter(filter);
        self
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    fn transition(&mut self, to: CrawlState) -> Result<(), RippleError> {
        if !self.state.can_transition_to(to) {
            return Err(RippleError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!("Crawl state {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Runs the crawl loop until the frontier drains, `max_pages` is reached,
    /// or `shutdown` flips to true
    ///
    /// A store write failure aborts the run with an error; everything recorded
    /// before it stays in the store for a later resume.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<CrawlReport, RippleError> {
        self.transition(CrawlState::Running)?;

        if !self.frontier.offer(self.seed.clone(), 0) {
            tracing::info!("Seed {} not queued (already visited or capped)", self.seed);
        }

        let start_time = std::time::Instant::now();
        let mut report = CrawlReport {
            pages_recorded: 0,
            pages_failed: 0,
            links_offered: 0,
            interrupted: false,
            final_state: self.state,
        };

        while self.state.accepts_work() {
            if *shutdown.borrow() {
                report.interrupted = true;
                break;
            }

            if self.frontier.recorded() >= self.max_pages {
                tracing::info!("Reached max_pages ({})", self.max_pages);
                break;
            }

            let Some(entry) = self.frontier.next() else {
                tracing::info!("Frontier is empty, crawl complete");
                break;
            };

            tracing::debug!("Processing {} (depth {})", entry.url, entry.depth);

            let fetched = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => None,
                result = self.paced_fetch(&entry.url) => Some(result),
            };

            let Some(result) = fetched else {
                tracing::warn!("Interrupted while processing {}, not recorded", entry.url);
                report.interrupted = true;
                break;
            };

            let (failed, offered) = self.record_result(&entry, result)?;
            report.pages_recorded += 1;
            report.links_offered += offered;
            if failed {
                report.pages_failed += 1;
            }

            if report.pages_recorded % PROGRESS_INTERVAL == 0 {
                let elapsed = start_time.elapsed().as_secs_f64();
                tracing::info!(
                    "Progress: {}/{} pages recorded, {} in frontier, {} domains, {:.2} pages/sec",
                    self.frontier.recorded(),
                    self.max_pages,
                    self.frontier.len(),
                    self.frontier.domains_seen(),
                    report.pages_recorded as f64 / elapsed.max(f64::EPSILON)
                );
            }
        }

        if report.interrupted {
            self.transition(CrawlState::Draining)?;
        }
        self.transition(CrawlState::Stopped)?;
        report.final_state = self.state;

        tracing::info!(
            "Crawl stopped: {} pages recorded ({} failed), {} total in store, took {:?}",
            report.pages_recorded,
            report.pages_failed,
            self.frontier.recorded(),
            start_time.elapsed()
        );

        Ok(report)
    }

    /// Waits out the pacing delay since the previous fetch start, then fetches
    async fn paced_fetch(&mut self, url: &Url) -> FetchResult {
        if let Some(last) = self.last_fetch_started {
            tokio::time::sleep_until(last + self.request_delay).await;
        }
        self.last_fetch_started = Some(Instant::now());
        self.transport.fetch(url).await
    }

    /// Builds and stores the record for one fetch, then offers its links
    ///
    /// Returns whether the page carries an error and how many links were
    /// accepted into the frontier.
    fn record_result(
        &mut self,
        entry: &FrontierEntry,
        result: FetchResult,
    ) -> Result<(bool, u64), RippleError> {
        let (record, links) = self.build_record(entry, result);

        let link_strings: Vec<String> = links.iter().map(|l| l.to_string()).collect();
        self.storage.record(&record, &link_strings)?;
        self.frontier.record_page(&entry.domain);

        match &record.error {
            None => tracing::info!(
                "Recorded {} [{}] depth {}, {} links",
                record.url,
                record.status.map(|s| s.to_string()).unwrap_or_default(),
                record.depth,
                links.len()
            ),
            Some(error) => tracing::warn!("Recorded {} with error: {}", record.url, error),
        }

        let mut offered = 0;
        for link in links {
            if self.frontier.offer(link, entry.depth + 1) {
                offered += 1;
            }
        }

        Ok((record.error.is_some(), offered))
    }

    /// Turns a fetch result into a page record plus its permitted links
    fn build_record(&self, entry: &FrontierEntry, result: FetchResult) -> (PageRecord, Vec<Url>) {
        let mut record = PageRecord {
            url: entry.url.to_string(),
            status: None,
            title: None,
            depth: entry.depth,
            timestamp: Utc::now(),
            text_preview: String::new(),
            meta: BTreeMap::new(),
            error: None,
        };

        let links = match result {
            FetchResult::Success {
                final_url,
                status_code,
                body,
                content_type,
                ..
            } => {
                let extracted = extract_response(content_type.as_deref(), &body, &final_url);
                record.status = Some(status_code);
                record.error = extracted.error_descriptor();

                let page = extracted.into_page();
                record.title = page.title;
                record.text_preview = page.text_preview;
                record.meta = page.meta;

                page.links
                    .into_iter()
                    .filter(|link| self.frontier.permits(link))
                    .collect()
            }

            FetchResult::Redirect {
                status_code,
                location,
            } => {
                record.status = Some(status_code);
                tracing::debug!("{} redirects to {}", entry.url, location);
                normalize_parsed(location)
                    .ok()
                    .filter(|target| self.frontier.permits(target))
                    .into_iter()
                    .collect()
            }

            FetchResult::Failed { error, attempts } => {
                tracing::debug!("{} failed after {} attempts", entry.url, attempts);
                record.status = error.status();
                record.error = Some(error.to_string());
                Vec::new()
            }
        };

        (record, links)
    }
}

/// Resolves once the shutdown flag is true; never resolves if the sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Runs a complete crawl against the real Tor proxy
///
/// This function:
/// 1. Opens the configured store
/// 2. Waits for the Tor proxy to accept connections
/// 3. Builds the proxied transport
/// 4. Restores the frontier and runs the crawl loop
///
/// Failures in steps 1-3 are [`StartupError`]s and happen before any page is
/// fetched.
///
/// # Example
///
/// ```no_run
/// use onion_ripple::config::load_config_or_default;
/// use onion_ripple::crawler::run_crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config_or_default(Path::new("config.toml"))?;
/// let (_tx, rx) = tokio::sync::watch::channel(false);
/// let report = run_crawl(config, rx).await?;
/// println!("{} pages", report.pages_recorded);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(
    config: Config,
    shutdown: watch::Receiver<bool>,
) -> Result<CrawlReport, RippleError> {
    let storage = open_storage(&config.storage)
        .map_err(|e| StartupError::StorageUnopenable(e.to_string()))?;

    probe_proxy(
        &config.tor.proxy_addr(),
        config.tor.startup_attempts,
        Duration::from_secs_f64(config.tor.startup_retry_delay.max(0.0)),
    )
    .await?;

    if config.tor.use_stem {
        tracing::warn!("use_stem is set but circuit rotation is not available; ignoring");
    }

    let transport = TorTransport::new(&config.tor, &config.crawler)?;
    let mut coordinator = Coordinator::new(&config.crawler, storage, Box::new(transport))?;
    coordinator.run(shutdown).await
}
