//! Integration tests for the crawler
//!
//! These drive the full crawl cycle with an in-process transport serving a
//! fixed link graph, against both storage backends.

use async_trait::async_trait;
use onion_ripple::config::{Config, CrawlerConfig, StorageConfig, StorageType};
use onion_ripple::crawler::{
    run_crawl, Coordinator, CrawlReport, FetchResult, Transport, TransportError,
};
use onion_ripple::state::CrawlState;
use onion_ripple::storage::{
    open_storage, PageRecord, Storage, StorageError, StorageResult, StoredPage,
};
use onion_ripple::{RippleError, StartupError};
use reqwest::header::HeaderMap;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use url::Url;

const BACKENDS: [StorageType; 2] = [StorageType::Json, StorageType::Sqlite];

/// What the mock transport serves for one URL
#[derive(Clone)]
enum MockPage {
    Html(Vec<&'static str>),
    Timeout,
    Redirect(&'static str),
    Slow(Duration),
}

/// Transport over a fixed link graph; unknown URLs answer 404
#[derive(Clone)]
struct GraphTransport {
    pages: HashMap<String, MockPage>,
    fetch_delay: Duration,
    fetches: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl GraphTransport {
    fn new(pages: &[(&str, MockPage)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, page)| (url.to_string(), page.clone()))
                .collect(),
            fetch_delay: Duration::ZERO,
            fetches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    fn fetched_urls(&self) -> Vec<String> {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    fn fetch_starts(&self) -> Vec<Instant> {
        self.fetches.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

fn html_page(url: &Url, links: &[&str]) -> FetchResult {
    let anchors: String = links
        .iter()
        .map(|l| format!("<a href=\"{}\">link</a>", l))
        .collect();
    FetchResult::Success {
        final_url: url.clone(),
        status_code: 200,
        headers: HeaderMap::new(),
        body: format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            url.path(),
            anchors
        ),
        content_type: Some("text/html".to_string()),
    }
}

#[async_trait]
impl Transport for GraphTransport {
    async fn fetch(&self, url: &Url) -> FetchResult {
        self.fetches
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        tokio::time::sleep(self.fetch_delay).await;

        match self.pages.get(url.as_str()) {
            Some(MockPage::Html(links)) => html_page(url, links),
            Some(MockPage::Timeout) => FetchResult::Failed {
                error: TransportError::Timeout,
                attempts: 4,
            },
            Some(MockPage::Redirect(target)) => FetchResult::Redirect {
                status_code: 302,
                location: Url::parse(target).unwrap(),
            },
            Some(MockPage::Slow(delay)) => {
                tokio::time::sleep(*delay).await;
                html_page(url, &[])
            }
            None => FetchResult::Failed {
                error: TransportError::Http(404),
                attempts: 1,
            },
        }
    }
}

/// Three onion domains with cycles, a cross link and one dead URL
fn sample_graph() -> GraphTransport {
    use MockPage::*;
    GraphTransport::new(&[
        (
            "http://a.onion/",
            Html(vec!["/1", "/2", "http://b.onion/", "https://clearnet.example/"]),
        ),
        ("http://a.onion/1", Html(vec!["/3", "/", "/2"])),
        ("http://a.onion/2", Html(vec!["/timeout", "http://b.onion/"])),
        ("http://a.onion/3", Html(vec!["/4"])),
        ("http://a.onion/4", Html(vec![])),
        ("http://a.onion/timeout", Timeout),
        ("http://b.onion/", Html(vec!["/1", "http://a.onion/1"])),
        ("http://b.onion/1", Html(vec!["http://c.onion/"])),
        ("http://c.onion/", Html(vec![])),
    ])
}

fn crawler_config(start_url: &str) -> CrawlerConfig {
    CrawlerConfig {
        start_url: start_url.to_string(),
        max_depth: 3,
        max_pages: 100,
        max_pages_per_domain: 50,
        request_delay: 0.0,
        ..CrawlerConfig::default()
    }
}

fn storage_config(dir: &Path, storage_type: StorageType) -> StorageConfig {
    StorageConfig {
        storage_type,
        output_dir: dir.to_string_lossy().into_owned(),
        ..StorageConfig::default()
    }
}

async fn crawl(
    config: &CrawlerConfig,
    dir: &Path,
    backend: StorageType,
    transport: GraphTransport,
) -> CrawlReport {
    let storage = open_storage(&storage_config(dir, backend)).unwrap();
    let mut coordinator = Coordinator::new(config, storage, Box::new(transport)).unwrap();
    let (_tx, rx) = watch::channel(false);
    coordinator.run(rx).await.unwrap()
}

fn stored_records(dir: &Path, backend: StorageType) -> Vec<StoredPage> {
    open_storage(&storage_config(dir, backend))
        .unwrap()
        .load_records()
        .unwrap()
}

fn urls(records: &[StoredPage]) -> Vec<&str> {
    records.iter().map(|r| r.page.url.as_str()).collect()
}

fn domain(url: &str) -> String {
    Url::parse(url).unwrap().host_str().unwrap().to_string()
}

#[tokio::test]
async fn test_full_crawl_breadth_first() {
    for backend in BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let report = crawl(&crawler_config("http://a.onion/"), dir.path(), backend, sample_graph()).await;

        assert_eq!(report.pages_recorded, 9, "{:?}", backend);
        assert_eq!(report.pages_failed, 1);
        assert_eq!(report.final_state, CrawlState::Stopped);

        let records = stored_records(dir.path(), backend);
        assert_eq!(
            urls(&records),
            vec![
                "http://a.onion/",
                "http://a.onion/1",
                "http://a.onion/2",
                "http://b.onion/",
                "http://a.onion/3",
                "http://a.onion/timeout",
                "http://b.onion/1",
                "http://a.onion/4",
                "http://c.onion/",
            ]
        );

        // breadth-first: depths never decrease in record order
        let depths: Vec<u32> = records.iter().map(|r| r.page.depth).collect();
        assert!(depths.windows(2).all(|w| w[0] <= w[1]), "{:?}", depths);
    }
}

#[tokio::test]
async fn test_no_url_recorded_twice() {
    for backend in BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let transport = sample_graph();
        crawl(&crawler_config("http://a.onion/"), dir.path(), backend, transport.clone()).await;

        let records = stored_records(dir.path(), backend);
        let unique: HashSet<&str> = urls(&records).into_iter().collect();
        assert_eq!(unique.len(), records.len());

        let fetched = transport.fetched_urls();
        let unique_fetched: HashSet<&String> = fetched.iter().collect();
        assert_eq!(unique_fetched.len(), fetched.len());
    }
}

#[tokio::test]
async fn test_depth_is_first_discovery_depth() {
    let dir = tempfile::tempdir().unwrap();
    crawl(
        &crawler_config("http://a.onion/"),
        dir.path(),
        StorageType::Sqlite,
        sample_graph(),
    )
    .await;

    let depths: HashMap<String, u32> = stored_records(dir.path(), StorageType::Sqlite)
        .into_iter()
        .map(|r| (r.page.url, r.page.depth))
        .collect();

    assert_eq!(depths["http://a.onion/"], 0);
    // also linked from b.onion/ at depth 1, which must not change it
    assert_eq!(depths["http://a.onion/1"], 1);
    assert_eq!(depths["http://a.onion/3"], 2);
    assert_eq!(depths["http://c.onion/"], 3);
}

#[tokio::test]
async fn test_max_depth_respected() {
    for backend in BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let config = CrawlerConfig {
            max_depth: 2,
            ..crawler_config("http://a.onion/")
        };
        crawl(&config, dir.path(), backend, sample_graph()).await;

        let records = stored_records(dir.path(), backend);
        assert_eq!(records.len(), 7);
        assert!(records.iter().all(|r| r.page.depth <= 2));
    }
}

#[tokio::test]
async fn test_max_pages_respected() {
    for backend in BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let config = CrawlerConfig {
            max_pages: 4,
            ..crawler_config("http://a.onion/")
        };
        let report = crawl(&config, dir.path(), backend, sample_graph()).await;

        assert_eq!(report.pages_recorded, 4);
        assert_eq!(stored_records(dir.path(), backend).len(), 4);
    }
}

#[tokio::test]
async fn test_max_pages_per_domain_respected() {
    for backend in BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let config = CrawlerConfig {
            max_pages_per_domain: 2,
            ..crawler_config("http://a.onion/")
        };
        crawl(&config, dir.path(), backend, sample_graph()).await;

        let records = stored_records(dir.path(), backend);
        let mut per_domain: HashMap<String, u32> = HashMap::new();
        for record in &records {
            *per_domain.entry(domain(&record.page.url)).or_default() += 1;
        }

        assert!(per_domain.values().all(|&count| count <= 2), "{:?}", per_domain);
        assert_eq!(
            urls(&records),
            vec![
                "http://a.onion/",
                "http://a.onion/1",
                "http://b.onion/",
                "http://b.onion/1",
                "http://c.onion/",
            ]
        );
    }
}

#[tokio::test]
async fn test_timeout_recorded_and_crawl_continues() {
    for backend in BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        crawl(&crawler_config("http://a.onion/"), dir.path(), backend, sample_graph()).await;

        let records = stored_records(dir.path(), backend);
        let position = records
            .iter()
            .position(|r| r.page.url == "http://a.onion/timeout")
            .unwrap();
        let failed = &records[position].page;

        assert_eq!(failed.error.as_deref(), Some("timeout"));
        assert_eq!(failed.status, None);
        assert!(failed.title.is_none());
        assert!(records[position].links.is_empty());
        assert!(position < records.len() - 1, "crawl stopped at the timeout");
    }
}

#[tokio::test]
async fn test_resume_matches_uninterrupted_run() {
    for backend in BACKENDS {
        let full_dir = tempfile::tempdir().unwrap();
        crawl(&crawler_config("http://a.onion/"), full_dir.path(), backend, sample_graph()).await;
        let full = stored_records(full_dir.path(), backend);

        let dir = tempfile::tempdir().unwrap();
        let partial = CrawlerConfig {
            max_pages: 4,
            ..crawler_config("http://a.onion/")
        };
        crawl(&partial, dir.path(), backend, sample_graph()).await;
        let first_run: Vec<String> = stored_records(dir.path(), backend)
            .into_iter()
            .map(|r| r.page.url)
            .collect();
        assert_eq!(first_run.len(), 4);

        let resumed_transport = sample_graph();
        let report = crawl(
            &crawler_config("http://a.onion/"),
            dir.path(),
            backend,
            resumed_transport.clone(),
        )
        .await;
        assert_eq!(report.pages_recorded, 5);

        // nothing from the first run was fetched again
        for url in resumed_transport.fetched_urls() {
            assert!(!first_run.contains(&url), "{} refetched", url);
        }

        let resumed = stored_records(dir.path(), backend);
        let as_tuples = |records: &[StoredPage]| -> HashSet<(String, u32)> {
            records
                .iter()
                .map(|r| (r.page.url.clone(), r.page.depth))
                .collect()
        };
        assert_eq!(as_tuples(&resumed), as_tuples(&full));
    }
}

#[tokio::test]
async fn test_resume_counts_existing_pages_against_max_pages() {
    let dir = tempfile::tempdir().unwrap();
    let config = CrawlerConfig {
        max_pages: 4,
        ..crawler_config("http://a.onion/")
    };
    crawl(&config, dir.path(), StorageType::Json, sample_graph()).await;

    let transport = sample_graph();
    let report = crawl(&config, dir.path(), StorageType::Json, transport.clone()).await;

    assert_eq!(report.pages_recorded, 0);
    assert!(transport.fetched_urls().is_empty());
}

#[tokio::test]
async fn test_backends_produce_equivalent_records() {
    let json_dir = tempfile::tempdir().unwrap();
    let sqlite_dir = tempfile::tempdir().unwrap();
    let config = crawler_config("http://a.onion/");

    crawl(&config, json_dir.path(), StorageType::Json, sample_graph()).await;
    crawl(&config, sqlite_dir.path(), StorageType::Sqlite, sample_graph()).await;

    let tuples = |records: Vec<StoredPage>| -> Vec<(String, Option<u16>, u32, bool)> {
        records
            .into_iter()
            .map(|r| (r.page.url, r.page.status, r.page.depth, r.page.error.is_some()))
            .collect()
    };

    let json = tuples(stored_records(json_dir.path(), StorageType::Json));
    let sqlite = tuples(stored_records(sqlite_dir.path(), StorageType::Sqlite));
    assert_eq!(json, sqlite);

    let json_links: Vec<Vec<String>> = stored_records(json_dir.path(), StorageType::Json)
        .into_iter()
        .map(|r| r.links)
        .collect();
    let sqlite_links: Vec<Vec<String>> = stored_records(sqlite_dir.path(), StorageType::Sqlite)
        .into_iter()
        .map(|r| r.links)
        .collect();
    assert_eq!(json_links, sqlite_links);
}

#[tokio::test]
async fn test_external_onions_not_followed() {
    use MockPage::*;
    for backend in BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let transport = GraphTransport::new(&[
            ("http://a.onion/", Html(vec!["/x", "http://b.onion/y"])),
            ("http://a.onion/x", Html(vec![])),
            ("http://b.onion/y", Html(vec![])),
        ]);
        let config = CrawlerConfig {
            max_depth: 1,
            max_pages: 10,
            follow_external_onion: false,
            ..crawler_config("http://a.onion/")
        };

        let report = crawl(&config, dir.path(), backend, transport.clone()).await;
        assert_eq!(report.links_offered, 1);

        let records = stored_records(dir.path(), backend);
        assert_eq!(urls(&records), vec!["http://a.onion/", "http://a.onion/x"]);
        assert_eq!(records[0].links, vec!["http://a.onion/x"]);
        assert!(!transport
            .fetched_urls()
            .contains(&"http://b.onion/y".to_string()));
    }
}

#[tokio::test]
async fn test_allowed_domains() {
    let dir = tempfile::tempdir().unwrap();
    let config = CrawlerConfig {
        allowed_domains: vec!["a.onion".to_string(), "c.onion".to_string()],
        ..crawler_config("http://a.onion/")
    };
    crawl(&config, dir.path(), StorageType::Sqlite, sample_graph()).await;

    let records = stored_records(dir.path(), StorageType::Sqlite);
    assert!(records.iter().all(|r| domain(&r.page.url) == "a.onion"));
    assert_eq!(records.len(), 6);
}

#[tokio::test]
async fn test_cross_host_redirect_goes_through_frontier() {
    use MockPage::*;
    for backend in BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let transport = GraphTransport::new(&[
            ("http://a.onion/", Redirect("http://b.onion/new")),
            ("http://b.onion/new", Html(vec![])),
        ]);
        crawl(&crawler_config("http://a.onion/"), dir.path(), backend, transport).await;

        let records = stored_records(dir.path(), backend);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].page.status, Some(302));
        assert!(records[0].page.error.is_none());
        assert_eq!(records[0].links, vec!["http://b.onion/new"]);
        assert_eq!(records[1].page.url, "http://b.onion/new");
        assert_eq!(records[1].page.depth, 1);
    }
}

#[tokio::test]
async fn test_redirect_to_unpermitted_host_is_not_followed() {
    use MockPage::*;
    let dir = tempfile::tempdir().unwrap();
    let transport = GraphTransport::new(&[(
        "http://a.onion/",
        Redirect("https://clearnet.example/landing"),
    )]);
    crawl(
        &crawler_config("http://a.onion/"),
        dir.path(),
        StorageType::Json,
        transport.clone(),
    )
    .await;

    let records = stored_records(dir.path(), StorageType::Json);
    assert_eq!(records.len(), 1);
    assert!(records[0].links.is_empty());
    assert_eq!(transport.fetched_urls(), vec!["http://a.onion/"]);
}

#[tokio::test]
async fn test_request_delay_paces_fetch_starts() {
    let dir = tempfile::tempdir().unwrap();
    let delay = Duration::from_millis(300);
    let config = CrawlerConfig {
        request_delay: delay.as_secs_f64(),
        max_pages: 4,
        ..crawler_config("http://a.onion/")
    };
    // fetches take a while too; the gap is measured between starts
    let transport = sample_graph().with_fetch_delay(Duration::from_millis(100));
    crawl(&config, dir.path(), StorageType::Sqlite, transport.clone()).await;

    let starts = transport.fetch_starts();
    assert_eq!(starts.len(), 4);
    // allow for the transport sampling its clock slightly after the pacer
    let tolerance = Duration::from_millis(5);
    for pair in starts.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap + tolerance >= delay, "fetch starts only {:?} apart", gap);
    }
}

#[tokio::test]
async fn test_interrupt_abandons_in_flight_page() {
    use MockPage::*;
    for backend in BACKENDS {
        let dir = tempfile::tempdir().unwrap();
        let transport = GraphTransport::new(&[
            ("http://a.onion/", Html(vec!["/slow", "/after"])),
            ("http://a.onion/slow", Slow(Duration::from_secs(30))),
            ("http://a.onion/after", Html(vec![])),
        ]);

        let storage = open_storage(&storage_config(dir.path(), backend)).unwrap();
        let mut coordinator = Coordinator::new(
            &crawler_config("http://a.onion/"),
            storage,
            Box::new(transport),
        )
        .unwrap();

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = tx.send(true);
        });

        let started = Instant::now();
        let report = coordinator.run(rx).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(report.interrupted);
        assert_eq!(report.final_state, CrawlState::Stopped);
        drop(coordinator);

        // the slow page was never written, so a later run can pick it up
        let records = stored_records(dir.path(), backend);
        assert_eq!(urls(&records), vec!["http://a.onion/"]);
    }
}

#[tokio::test]
async fn test_resume_after_interrupt() {
    use MockPage::*;
    let dir = tempfile::tempdir().unwrap();
    let pages = [
        ("http://a.onion/", Html(vec!["/slow", "/after"])),
        ("http://a.onion/slow", Slow(Duration::from_secs(30))),
        ("http://a.onion/after", Html(vec![])),
    ];

    {
        let storage = open_storage(&storage_config(dir.path(), StorageType::Json)).unwrap();
        let mut coordinator = Coordinator::new(
            &crawler_config("http://a.onion/"),
            storage,
            Box::new(GraphTransport::new(&pages)),
        )
        .unwrap();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(true);
        });
        assert!(coordinator.run(rx).await.unwrap().interrupted);
    }

    let fast = GraphTransport::new(&[
        ("http://a.onion/", Html(vec!["/slow", "/after"])),
        ("http://a.onion/slow", Html(vec![])),
        ("http://a.onion/after", Html(vec![])),
    ]);
    crawl(&crawler_config("http://a.onion/"), dir.path(), StorageType::Json, fast).await;

    let records = stored_records(dir.path(), StorageType::Json);
    assert_eq!(
        urls(&records),
        vec!["http://a.onion/", "http://a.onion/slow", "http://a.onion/after"]
    );
}

/// Store whose writes always fail
struct BrokenStorage;

impl Storage for BrokenStorage {
    fn record(&mut self, _page: &PageRecord, _links: &[String]) -> StorageResult<()> {
        Err(StorageError::WriteFailed("disk full".to_string()))
    }

    fn visited_urls(&self) -> StorageResult<HashSet<String>> {
        Ok(HashSet::new())
    }

    fn load_records(&self) -> StorageResult<Vec<StoredPage>> {
        Ok(Vec::new())
    }

    fn describe(&self) -> String {
        "broken".to_string()
    }
}

#[tokio::test]
async fn test_storage_failure_is_fatal() {
    let mut coordinator = Coordinator::new(
        &crawler_config("http://a.onion/"),
        Box::new(BrokenStorage),
        Box::new(sample_graph()),
    )
    .unwrap();
    let (_tx, rx) = watch::channel(false);

    let result = coordinator.run(rx).await;
    assert!(matches!(
        result,
        Err(RippleError::Storage(StorageError::WriteFailed(_)))
    ));
}

#[tokio::test]
async fn test_unreachable_proxy_aborts_startup() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.crawler = crawler_config("http://a.onion/");
    config.storage = storage_config(dir.path(), StorageType::Json);
    config.tor.proxy_port = port;
    config.tor.startup_attempts = 2;
    config.tor.startup_retry_delay = 0.0;

    let (_tx, rx) = watch::channel(false);
    let result = run_crawl(config, rx).await;
    assert!(matches!(
        result,
        Err(RippleError::Startup(StartupError::ProxyUnavailable { attempts: 2, .. }))
    ));
}

#[tokio::test]
async fn test_unopenable_storage_aborts_startup() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let mut config = Config::default();
    config.crawler = crawler_config("http://a.onion/");
    config.storage = storage_config(&blocker, StorageType::Sqlite);

    let (_tx, rx) = watch::channel(false);
    let result = run_crawl(config, rx).await;
    assert!(matches!(
        result,
        Err(RippleError::Startup(StartupError::StorageUnopenable(_)))
    ));
}
