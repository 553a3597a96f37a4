//! Database schema for the relational store

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per fetched URL
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    status INTEGER,
    title TEXT,
    depth INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    text_preview TEXT NOT NULL DEFAULT '',
    error TEXT,
    meta TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_pages_url ON pages(url);
CREATE INDEX IF NOT EXISTS idx_pages_status ON pages(status);

-- Outbound links, written in the same transaction as their page
CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_url TEXT NOT NULL REFERENCES pages(url),
    target_url TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_links_source ON links(source_url);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
