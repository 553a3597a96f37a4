//! State module for tracking crawl progress
//!
//! - `CrawlState`: lifecycle of a single crawl run (idle, running, draining, stopped)

mod crawl_state;

pub use crawl_state::CrawlState;
