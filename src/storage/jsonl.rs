//! Line-oriented storage: one self-contained JSON record per line
//!
//! Each record is built fully in memory and appended with a single write, so
//! a crash can at worst leave one partial trailing line. That line is skipped
//! when reading and terminated before the next append.

use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{PageRecord, StoredPage};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Append-only JSON lines store
pub struct JsonLinesStorage {
    path: PathBuf,
    file: File,
    visited: HashSet<String>,
}

/// Borrowed view of a line, so recording does not clone the page
#[derive(Serialize)]
struct LineRef<'a> {
    #[serde(flatten)]
    page: &'a PageRecord,
    links: &'a [String],
}

impl JsonLinesStorage {
    /// Opens (or creates) the store at `path` and loads the visited set
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let visited: HashSet<String> = if path.exists() {
            let records = read_records(path)?;
            tracing::info!(
                "Resuming existing store {}: {} pages",
                path.display(),
                records.len()
            );
            records.into_iter().map(|r| r.page.url).collect()
        } else {
            tracing::info!("Creating new store {}", path.display());
            HashSet::new()
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        terminate_partial_line(&mut file)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            visited,
        })
    }
}

/// Appends a newline if the file does not already end with one
fn terminate_partial_line(file: &mut File) -> StorageResult<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        tracing::warn!("Store ends with a partial line, terminating it");
        // append mode: the write lands at the end regardless of the cursor
        file.write_all(b"\n")?;
        file.flush()?;
    }
    Ok(())
}

/// Decodes every line, skipping ones that do not parse
fn read_records(path: &Path) -> StorageResult<Vec<StoredPage>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    // raw bytes: a torn line may end partway through a UTF-8 sequence
    for (index, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<StoredPage>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    "Skipping undecodable line {} in {}: {}",
                    index + 1,
                    path.display(),
                    e
                );
            }
        }
    }

    Ok(records)
}

impl Storage for JsonLinesStorage {
    fn record(&mut self, page: &PageRecord, links: &[String]) -> StorageResult<()> {
        if self.visited.contains(&page.url) {
            return Err(StorageError::DuplicatePage(page.url.clone()));
        }

        let mut line = serde_json::to_string(&LineRef { page, links })?;
        line.push('\n');

        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_data())
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", self.path.display(), e)))?;

        self.visited.insert(page.url.clone());
        Ok(())
    }

    fn visited_urls(&self) -> StorageResult<HashSet<String>> {
        Ok(self.visited.clone())
    }

    fn load_records(&self) -> StorageResult<Vec<StoredPage>> {
        read_records(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
