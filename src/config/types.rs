use serde::Deserialize;

/// Main configuration structure for Onion-Ripple
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tor: TorConfig,
    pub crawler: CrawlerConfig,
    pub storage: StorageConfig,
    pub log_level: String,
}

/// Tor proxy connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    /// SOCKS5 proxy host
    pub proxy_host: String,

    /// SOCKS5 proxy port
    pub proxy_port: u16,

    /// Tor control port (used only by circuit rotation)
    pub control_port: u16,

    /// Tor control port password
    pub control_password: Option<String>,

    /// Enables the external circuit-rotation capability
    pub use_stem: bool,

    /// How many times to probe the proxy before giving up at startup
    pub startup_attempts: u32,

    /// Seconds between proxy readiness probes
    pub startup_retry_delay: f64,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Seed URL, crawled at depth 0
    pub start_url: String,

    /// Maximum BFS distance from the seed
    pub max_depth: u32,

    /// Maximum number of recorded pages across the whole (resumed) crawl
    pub max_pages: u64,

    /// Maximum number of recorded pages for any single domain
    pub max_pages_per_domain: u32,

    /// Minimum seconds between the starts of successive fetches
    pub request_delay: f64,

    /// Connect/read timeout per attempt, in seconds
    pub request_timeout: f64,

    /// Extra attempts for timeouts and refused connections
    pub max_retries: u32,

    /// Linear backoff unit between retries, in seconds
    pub retry_backoff: f64,

    /// User-Agent header sent with every request
    pub user_agent: String,

    /// Whether links to other .onion domains than the seed's are followed
    pub follow_external_onion: bool,

    /// If non-empty, only these domains are crawled
    pub allowed_domains: Vec<String>,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// One JSON object per line, append-only
    #[default]
    Json,
    /// SQLite `pages` and `links` tables
    Sqlite,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub storage_type: StorageType,

    /// Directory holding the store file
    pub output_dir: String,

    /// File name of the line-oriented store
    pub json_filename: String,

    /// File name of the SQLite database
    pub sqlite_filename: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tor: TorConfig::default(),
            crawler: CrawlerConfig::default(),
            storage: StorageConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            proxy_host: "127.0.0.1".to_string(),
            proxy_port: 9050,
            control_port: 9051,
            control_password: None,
            use_stem: false,
            startup_attempts: 5,
            startup_retry_delay: 3.0,
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            start_url: String::new(),
            max_depth: 3,
            max_pages: 100,
            max_pages_per_domain: 50,
            request_delay: 2.0,
            request_timeout: 30.0,
            max_retries: 3,
            retry_backoff: 2.0,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; rv:115.0) Gecko/20100101 Firefox/115.0"
                .to_string(),
            follow_external_onion: true,
            allowed_domains: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Json,
            output_dir: "./data".to_string(),
            json_filename: "crawled_pages.jsonl".to_string(),
            sqlite_filename: "crawler.db".to_string(),
        }
    }
}

impl TorConfig {
    /// SOCKS URL handed to reqwest; `socks5h` keeps name resolution inside Tor
    pub fn proxy_url(&self) -> String {
        format!("socks5h://{}:{}", self.proxy_host, self.proxy_port)
    }

    /// `host:port` of the proxy listener
    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.proxy_host, self.proxy_port)
    }
}

impl StorageConfig {
    /// Full path of the store selected by `storage_type`
    pub fn store_path(&self) -> std::path::PathBuf {
        let filename = match self.storage_type {
            StorageType::Json => &self.json_filename,
            StorageType::Sqlite => &self.sqlite_filename,
        };
        std::path::Path::new(&self.output_dir).join(filename)
    }
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Sqlite => "sqlite",
        }
    }
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("storage_type must be 'json' or 'sqlite', got '{}'", other)),
        }
    }
}
