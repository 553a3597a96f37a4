//! SQLite storage implementation

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{PageRecord, StoredPage};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
    location: PathBuf,
}

impl SqliteStorage {
    /// Opens or creates the database at `path` and ensures the schema exists
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn).map_err(|e| StorageError::Schema(e.to_string()))?;

        Ok(Self {
            conn,
            location: path.to_path_buf(),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn).map_err(|e| StorageError::Schema(e.to_string()))?;
        Ok(Self {
            conn,
            location: PathBuf::from(":memory:"),
        })
    }

    #[cfg(test)]
    fn count_links(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Outgoing link targets of one page, in discovery order
    #[cfg(test)]
    fn get_outgoing_links(&self, source_url: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT target_url FROM links WHERE source_url = ?1 ORDER BY id")?;
        let links = stmt
            .query_map(params![source_url], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(links)
    }

    fn load_pages(&self) -> StorageResult<Vec<PageRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, status, title, depth, timestamp, text_preview, error, meta
             FROM pages ORDER BY id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RawPageRow {
                    url: row.get(0)?,
                    status: row.get(1)?,
                    title: row.get(2)?,
                    depth: row.get(3)?,
                    timestamp: row.get(4)?,
                    text_preview: row.get(5)?,
                    error: row.get(6)?,
                    meta: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawPageRow::into_record).collect()
    }
}

/// Row as read from SQLite, before timestamp and meta are decoded
struct RawPageRow {
    url: String,
    status: Option<u16>,
    title: Option<String>,
    depth: u32,
    timestamp: String,
    text_preview: String,
    error: Option<String>,
    meta: String,
}

impl RawPageRow {
    fn into_record(self) -> StorageResult<PageRecord> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| {
                StorageError::Corrupt(format!("bad timestamp for {}: {}", self.url, e))
            })?
            .with_timezone(&Utc);
        let meta: BTreeMap<String, String> = serde_json::from_str(&self.meta)
            .map_err(|e| StorageError::Corrupt(format!("bad meta for {}: {}", self.url, e)))?;

        Ok(PageRecord {
            url: self.url,
            status: self.status,
            title: self.title,
            depth: self.depth,
            timestamp,
            text_preview: self.text_preview,
            meta,
            error: self.error,
        })
    }
}

impl Storage for SqliteStorage {
    fn record(&mut self, page: &PageRecord, links: &[String]) -> StorageResult<()> {
        let meta = serde_json::to_string(&page.meta)?;
        let tx = self
            .conn
            .transaction()
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;

        let inserted = tx.execute(
            "INSERT INTO pages (url, status, title, depth, timestamp, text_preview, error, meta)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                page.url,
                page.status,
                page.title,
                page.depth,
                page.timestamp.to_rfc3339(),
                page.text_preview,
                page.error,
                meta
            ],
        );

        if let Err(e) = inserted {
            // Dropping the transaction rolls it back
            return Err(match e {
                rusqlite::Error::SqliteFailure(ref err, _)
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    StorageError::DuplicatePage(page.url.clone())
                }
                other => StorageError::WriteFailed(other.to_string()),
            });
        }

        {
            let mut stmt = tx
                .prepare_cached("INSERT INTO links (source_url, target_url) VALUES (?1, ?2)")
                .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            for link in links {
                stmt.execute(params![page.url, link])
                    .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    fn visited_urls(&self) -> StorageResult<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT url FROM pages")?;
        let urls = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(urls)
    }

    fn load_records(&self) -> StorageResult<Vec<StoredPage>> {
        let pages = self.load_pages()?;

        let mut links_by_source: HashMap<String, Vec<String>> = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT source_url, target_url FROM links ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (source, target) = row?;
                links_by_source.entry(source).or_default().push(target);
            }
        }

        Ok(pages
            .into_iter()
            .map(|page| {
                let links = links_by_source.remove(&page.url).unwrap_or_default();
                StoredPage { page, links }
            })
            .collect())
    }

    fn describe(&self) -> String {
        self.location.display().to_string()
    }
}
