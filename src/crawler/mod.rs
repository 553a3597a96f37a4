//! Crawler module: the crawl engine
//!
//! This module contains the core crawling logic, including:
//! - Proxied HTTP fetching with retry logic
//! - HTML extraction and link canonicalisation
//! - The breadth-first frontier and its limits
//! - Overall crawl coordination

mod coordinator;
mod fetcher;
mod frontier;
mod parser;

pub use coordinator::{run_crawl, Coordinator, CrawlReport};
pub use fetcher::{
    build_http_client, probe_proxy, FetchResult, RetryPolicy, TorTransport, Transport,
    TransportError,
};
pub use frontier::{Frontier, FrontierEntry, UrlFilter};
pub use parser::{extract, extract_response, is_html_content_type, ExtractResult, ExtractedPage};
