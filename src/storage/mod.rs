//! Storage module for persisting crawl results
//!
//! Two interchangeable backends sit behind the [`Storage`] trait:
//! - [`JsonLinesStorage`]: one JSON object per line in an append-only file
//! - [`SqliteStorage`]: `pages` and `links` tables, one transaction per page
//!
//! Whatever a store holds is the only resume state; there is no separate
//! crawl-state file.

mod jsonl;
mod schema;
mod sqlite;
mod traits;

pub use jsonl::JsonLinesStorage;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::config::{StorageConfig, StorageType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opens the backend selected by the configuration
///
/// The output directory is created if needed.
pub fn open_storage(config: &StorageConfig) -> StorageResult<Box<dyn Storage>> {
    std::fs::create_dir_all(&config.output_dir)?;
    let path = config.store_path();

    let storage: Box<dyn Storage> = match config.storage_type {
        StorageType::Json => Box::new(JsonLinesStorage::new(&path)?),
        StorageType::Sqlite => Box::new(SqliteStorage::new(&path)?),
    };

    tracing::info!("Opened {} store at {}", config.storage_type.as_str(), storage.describe());
    Ok(storage)
}

/// The outcome of one fetch attempt, written exactly once per URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Canonical absolute URL, unique key
    pub url: String,

    /// HTTP status, absent when no response was received
    pub status: Option<u16>,

    pub title: Option<String>,

    /// BFS distance from the seed
    pub depth: u32,

    /// When the fetch attempt completed
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub text_preview: String,

    #[serde(default)]
    pub meta: BTreeMap<String, String>,

    /// Present iff the fetch or extraction failed
    pub error: Option<String>,
}

impl PageRecord {
    /// Returns true if the page was fetched and extracted without error
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A stored page with its outbound link targets
///
/// This is also the exact shape of one line in the line-oriented store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPage {
    #[serde(flatten)]
    pub page: PageRecord,

    #[serde(default)]
    pub links: Vec<String>,
}
