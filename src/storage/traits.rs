//! Storage traits and error types
//!
//! Both backends implement [`Storage`] and must produce the same logical
//! record set for the same crawl.

use crate::storage::{PageRecord, StoredPage};
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during storage operations
///
/// A `StorageError` raised while recording a page is fatal to the run.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Page already recorded: {0}")]
    DuplicatePage(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
pub trait Storage: Send {
    /// Durably records one page together with its outbound links
    ///
    /// The page and its links become visible together or not at all.
    /// Recording a URL that is already stored fails with
    /// [`StorageError::DuplicatePage`].
    fn record(&mut self, page: &PageRecord, links: &[String]) -> StorageResult<()>;

    /// Every URL already recorded, used to seed the visited set on resume
    fn visited_urls(&self) -> StorageResult<HashSet<String>>;

    /// Every stored page with its links, in the order they were recorded
    fn load_records(&self) -> StorageResult<Vec<StoredPage>>;

    /// Human readable location of the store, for logs
    fn describe(&self) -> String;
}
