use crawler_core::prelude::*;
use crawler_core::{DownloadError, ProxyState};
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, USER_AGENT};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Handler = dyn Fn(&Request, Option<&str>) -> Result<Response, DownloadError> + Send + Sync;

/// Downloader answering from a closure, recording calls and concurrency.
struct MockDownloader {
    handler: Box<Handler>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl MockDownloader {
    fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&Request, Option<&str>) -> Result<Response, DownloadError> + Send + Sync + 'static,
    {
        Self::with_delay(Duration::ZERO, handler)
    }

    fn with_delay<F>(delay: Duration, handler: F) -> Arc<Self>
    where
        F: Fn(&Request, Option<&str>) -> Result<Response, DownloadError> + Send + Sync + 'static,
    {
        Arc::new(MockDownloader {
            handler: Box::new(handler),
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn paths(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(path, _)| path.clone()).collect()
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(
        &self,
        request: &Request,
        proxy: Option<&str>,
    ) -> Result<Response, DownloadError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls
            .lock()
            .push((request.url().path().to_string(), proxy.map(str::to_owned)));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.handler)(request, proxy)
    }
}

/// Lets a shared mock be handed to the builder, which takes ownership.
struct Shared(Arc<MockDownloader>);

#[async_trait]
impl Downloader for Shared {
    async fn download(
        &self,
        request: &Request,
        proxy: Option<&str>,
    ) -> Result<Response, DownloadError> {
        self.0.download(request, proxy).await
    }
}

fn ok(request: &Request, body: &str) -> Result<Response, DownloadError> {
    Ok(Response::new(
        request.url().clone(),
        StatusCode::OK,
        HeaderMap::new(),
        body.as_bytes().to_vec(),
    ))
}

fn record_path(visited: ItemBuffer<String>) -> Callback {
    Callback::new(move |response, _frontier| {
        let visited = visited.clone();
        async move {
            visited.push(response.url.path().to_string());
            Ok(())
        }
    })
}

/// Seeds a fixed list of paths on example.com.
struct ListSpider {
    name: String,
    paths: Vec<&'static str>,
    visited: ItemBuffer<String>,
}

impl ListSpider {
    fn new(name: impl Into<String>, paths: Vec<&'static str>) -> Self {
        ListSpider {
            name: name.into(),
            paths,
            visited: ItemBuffer::new(),
        }
    }
}

impl Spider for ListSpider {
    fn name(&self) -> &str {
        &self.name
    }

    fn seed(&self, frontier: &Frontier) -> Result<(), CrawlError> {
        for path in &self.paths {
            let url = format!("https://example.com{path}");
            frontier.schedule(Request::parse(&url, record_path(self.visited.clone()))?);
        }
        Ok(())
    }
}

fn sorted(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items
}

#[tokio::test]
async fn three_requests_on_two_workers_invoke_each_callback_once() {
    let downloader = MockDownloader::new(|request, proxy| {
        assert!(proxy.is_none());
        assert!(request.headers().contains_key(USER_AGENT));
        ok(request, "ok")
    });
    let crawler = CrawlerBuilder::new()
        .workers(2)
        .downloader(Shared(downloader.clone()))
        .build()
        .unwrap();

    let spiders = crawler
        .run(vec![ListSpider::new("list", vec!["/r1", "/r2", "/r3"])])
        .await
        .unwrap();

    assert_eq!(spiders.len(), 1);
    assert_eq!(spiders[0].visited.snapshot(), vec!["/r1", "/r2", "/r3"]);
    assert_eq!(downloader.paths(), vec!["/r1", "/r2", "/r3"]);

    let stats = crawler.stats().snapshot();
    assert_eq!(stats.requests_sent, 3);
    assert_eq!(stats.requests_succeeded, 3);
    assert_eq!(stats.spiders_completed, 1);
    assert!(crawler.state().is_idle());
}

#[tokio::test(start_paused = true)]
async fn guarded_connection_failures_mark_proxy_unavailable() {
    let pool = Arc::new(ProxyPool::new(
        ["http://10.0.0.1:3128"],
        ProxyPoolConfig {
            success_cooldown: Duration::from_secs(60),
            failure_cooldown: Duration::from_secs(900),
        },
    ));
    let downloader = MockDownloader::new(|request, proxy| {
        assert_eq!(proxy, Some("http://10.0.0.1:3128"));
        Err(DownloadError::connection(request.url().as_str(), "connection refused"))
    });
    let crawler = CrawlerBuilder::new()
        .workers(2)
        .downloader(Shared(downloader.clone()))
        .proxy_pool(pool.clone())
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let spiders = crawler
        .run(vec![ListSpider::new("guarded", vec!["/a", "/b"])])
        .await
        .unwrap();

    assert!(spiders[0].visited.is_empty());
    assert_eq!(downloader.paths(), vec!["/a", "/b"]);
    // The single proxy had to cool down before serving the second request.
    assert!(started.elapsed() >= Duration::from_secs(900));
    assert_eq!(pool.cooling_count(), 1);

    tokio::time::sleep(Duration::from_secs(901)).await;
    assert!(!pool.is_empty());
    let lease = pool.acquire().await;
    assert_eq!(lease.state(), ProxyState::Unavailable);
    let history: Vec<ProxyState> = lease.history().iter().map(|c| c.state).collect();
    assert_eq!(
        history,
        vec![ProxyState::New, ProxyState::Unavailable, ProxyState::Unavailable]
    );
    pool.release_valid(lease);

    let stats = crawler.stats().snapshot();
    assert_eq!(stats.connection_errors, 2);
    assert_eq!(stats.requests_succeeded, 0);
}

#[tokio::test(start_paused = true)]
async fn guarded_http_error_and_success_keep_proxy_valid() {
    let pool = Arc::new(ProxyPool::new(
        ["p1"],
        ProxyPoolConfig {
            success_cooldown: Duration::from_secs(60),
            failure_cooldown: Duration::from_secs(900),
        },
    ));
    let downloader = MockDownloader::new(|request, _| match request.url().path() {
        "/missing" => Err(DownloadError::http(request.url().as_str(), 404)),
        _ => ok(request, "fine"),
    });
    let crawler = CrawlerBuilder::new()
        .workers(1)
        .downloader(Shared(downloader))
        .proxy_pool(pool.clone())
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    let spiders = crawler
        .run(vec![ListSpider::new("mixed", vec!["/missing", "/found"])])
        .await
        .unwrap();

    assert_eq!(spiders[0].visited.snapshot(), vec!["/found"]);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(60));
    assert!(elapsed < Duration::from_secs(900));

    let lease = pool.acquire().await;
    assert_eq!(lease.state(), ProxyState::Valid);
    pool.release_valid(lease);

    let stats = crawler.stats().snapshot();
    assert_eq!(stats.http_errors, 1);
    assert_eq!(stats.response_status_counts.get(&404), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn in_flight_downloads_never_exceed_worker_count() {
    let downloader = MockDownloader::with_delay(Duration::from_millis(10), |request, _| {
        ok(request, "slow")
    });
    let crawler = CrawlerBuilder::new()
        .workers(3)
        .downloader(Shared(downloader.clone()))
        .build()
        .unwrap();

    let spiders: Vec<ListSpider> = (0..8)
        .map(|i| ListSpider::new(format!("spider-{i}"), vec!["/one", "/two"]))
        .collect();
    let spiders = crawler.run(spiders).await.unwrap();

    assert!(spiders.iter().all(|s| s.visited.len() == 2));
    assert_eq!(downloader.paths().len(), 16);
    assert_eq!(downloader.peak.load(Ordering::SeqCst), 3);
    assert!(crawler.state().peak_in_flight() <= 3);
}

#[tokio::test]
async fn spiders_are_returned_in_input_order() {
    let downloader = MockDownloader::new(|request, _| ok(request, ""));
    let crawler = CrawlerBuilder::new()
        .workers(3)
        .downloader(Shared(downloader))
        .build()
        .unwrap();

    let spiders: Vec<ListSpider> = (0..5)
        .map(|i| ListSpider::new(format!("spider-{i}"), vec!["/"]))
        .collect();
    let names: Vec<String> = crawler
        .run(spiders)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();

    assert_eq!(
        names,
        vec!["spider-0", "spider-1", "spider-2", "spider-3", "spider-4"]
    );
}

fn follow_links(visited: ItemBuffer<String>) -> Callback {
    Callback::new(move |response, frontier| {
        let visited = visited.clone();
        async move {
            visited.push(response.url.path().to_string());
            let selector = Selector::parse("a[href]").unwrap();
            let links: Vec<Url> = response
                .html()
                .select(&selector)
                .filter_map(|a| a.value().attr("href"))
                .filter_map(|href| response.url.join(href).ok())
                .collect();
            for link in links {
                frontier.schedule(Request::new(link, follow_links(visited.clone())));
            }
            Ok(())
        }
    })
}

struct SiteSpider {
    visited: ItemBuffer<String>,
}

impl Spider for SiteSpider {
    fn name(&self) -> &str {
        "site"
    }

    fn seed(&self, frontier: &Frontier) -> Result<(), CrawlError> {
        frontier.schedule(Request::parse(
            "https://example.com/",
            follow_links(self.visited.clone()),
        )?);
        Ok(())
    }
}

#[tokio::test]
async fn callbacks_schedule_follow_ups_and_cycles_terminate() {
    let pages: HashMap<&str, &str> = HashMap::from([
        ("/", r#"<a href="/a">a</a><a href="/b">b</a>"#),
        ("/a", r#"<a href="/b">b</a><a href="/#top">home</a>"#),
        ("/b", r#"<a href="c">c</a>"#),
        ("/c", r#"<a href="/">home</a>"#),
    ]);
    let downloader = MockDownloader::new(move |request, _| {
        match pages.get(request.url().path()) {
            Some(body) => ok(request, body),
            None => Err(DownloadError::http(request.url().as_str(), 404)),
        }
    });
    let crawler = CrawlerBuilder::new()
        .workers(2)
        .downloader(Shared(downloader.clone()))
        .build()
        .unwrap();

    let spiders = crawler
        .run(vec![SiteSpider {
            visited: ItemBuffer::new(),
        }])
        .await
        .unwrap();

    // Breadth-first: the root's links come before their own links.
    assert_eq!(spiders[0].visited.snapshot(), vec!["/", "/a", "/b", "/c"]);
    assert_eq!(downloader.paths().len(), 4);

    let stats = crawler.stats().snapshot();
    assert_eq!(stats.requests_scheduled, 4);
    assert_eq!(stats.requests_deduplicated, 3);
}

#[tokio::test]
async fn failed_downloads_do_not_stop_the_spider() {
    let downloader = MockDownloader::new(|request, _| match request.url().path() {
        "/gone" => Err(DownloadError::http(request.url().as_str(), 410)),
        "/down" => Err(DownloadError::timeout(request.url().as_str())),
        _ => ok(request, "ok"),
    });
    let crawler = CrawlerBuilder::new()
        .workers(1)
        .downloader(Shared(downloader))
        .build()
        .unwrap();

    let spiders = crawler
        .run(vec![
            ListSpider::new("partial", vec!["/gone", "/one", "/down", "/two"]),
            ListSpider::new("total", vec!["/gone", "/down"]),
        ])
        .await
        .unwrap();

    assert_eq!(spiders[0].visited.snapshot(), vec!["/one", "/two"]);
    assert!(spiders[1].visited.is_empty());

    let stats = crawler.stats().snapshot();
    assert_eq!(stats.requests_sent, 6);
    assert_eq!(stats.requests_failed, 4);
    assert_eq!(stats.http_errors, 2);
    assert_eq!(stats.connection_errors, 2);
    assert_eq!(stats.spiders_completed, 2);
}

struct FlakyCallbacks {
    visited: ItemBuffer<String>,
}

impl Spider for FlakyCallbacks {
    fn name(&self) -> &str {
        "flaky"
    }

    fn seed(&self, frontier: &Frontier) -> Result<(), CrawlError> {
        frontier.schedule(Request::parse(
            "https://example.com/error",
            Callback::new(|_, _| async { Err(anyhow::anyhow!("parse failed")) }),
        )?);
        frontier.schedule(Request::parse(
            "https://example.com/panic",
            Callback::new(|response: Response, _| async move {
                if response.status_code() == 200 {
                    panic!("parser bug");
                }
                Ok(())
            }),
        )?);
        frontier.schedule(Request::parse(
            "https://example.com/fine",
            record_path(self.visited.clone()),
        )?);
        Ok(())
    }
}

#[tokio::test]
async fn callback_errors_and_panics_are_contained() {
    let downloader = MockDownloader::new(|request, _| ok(request, ""));
    let crawler = CrawlerBuilder::new()
        .workers(1)
        .downloader(Shared(downloader))
        .build()
        .unwrap();

    let spiders = crawler
        .run(vec![FlakyCallbacks {
            visited: ItemBuffer::new(),
        }])
        .await
        .unwrap();

    assert_eq!(spiders[0].visited.snapshot(), vec!["/fine"]);
    let stats = crawler.stats().snapshot();
    assert_eq!(stats.callbacks_failed, 2);
    assert_eq!(stats.requests_succeeded, 3);
}

struct BrokenSeed;

impl Spider for BrokenSeed {
    fn name(&self) -> &str {
        "broken"
    }

    fn seed(&self, _frontier: &Frontier) -> Result<(), CrawlError> {
        Err(CrawlError::GeneralError("no start page".to_string()))
    }
}

#[tokio::test]
async fn spiders_without_requests_are_acknowledged() {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let downloader = MockDownloader::new(|request, _| ok(request, ""));
    let crawler = CrawlerBuilder::new()
        .workers(2)
        .downloader(Shared(downloader.clone()))
        .on_complete({
            let completed = completed.clone();
            move |spider| completed.lock().push(spider.name().to_string())
        })
        .build()
        .unwrap();

    let spiders: Vec<Box<dyn Spider>> = vec![
        Box::new(ListSpider::new("empty", vec![])),
        Box::new(BrokenSeed),
    ];
    let spiders = crawler.run(spiders).await.unwrap();

    assert_eq!(spiders.len(), 2);
    assert!(downloader.paths().is_empty());
    assert_eq!(
        sorted(completed.lock().clone()),
        vec!["broken".to_string(), "empty".to_string()]
    );
    assert_eq!(crawler.stats().snapshot().spiders_completed, 2);
}

#[tokio::test]
async fn empty_spider_list_returns_immediately() {
    let crawler = CrawlerBuilder::new().build().unwrap();
    let spiders: Vec<ListSpider> = crawler.run(Vec::new()).await.unwrap();
    assert!(spiders.is_empty());
    assert_eq!(crawler.stats().snapshot().spiders_completed, 0);
}

#[test]
fn zero_workers_are_rejected() {
    assert!(matches!(
        CrawlerBuilder::new().workers(0).build(),
        Err(CrawlError::ConfigurationError(_))
    ));
}

/// Spider whose own hooks panic around an otherwise healthy request.
struct PanickyHooks {
    panic_in_name: bool,
    visited: ItemBuffer<String>,
}

impl Spider for PanickyHooks {
    fn name(&self) -> &str {
        if self.panic_in_name {
            panic!("name unavailable");
        }
        "panicky"
    }

    fn seed(&self, frontier: &Frontier) -> Result<(), CrawlError> {
        frontier.schedule(Request::parse(
            "https://example.com/hooks",
            record_path(self.visited.clone()),
        )?);
        Ok(())
    }

    fn default_headers(&self) -> HeaderMap {
        panic!("header table corrupt");
    }
}

#[tokio::test]
async fn panicking_spider_hooks_do_not_stall_the_crawl() {
    let downloader = MockDownloader::new(|request, _| {
        assert!(request.headers().get(USER_AGENT).is_none());
        ok(request, "")
    });
    let crawler = CrawlerBuilder::new()
        .workers(2)
        .downloader(Shared(downloader.clone()))
        .build()
        .unwrap();

    let spiders = vec![
        PanickyHooks {
            panic_in_name: false,
            visited: ItemBuffer::new(),
        },
        PanickyHooks {
            panic_in_name: true,
            visited: ItemBuffer::new(),
        },
    ];
    let spiders = tokio::time::timeout(Duration::from_secs(5), crawler.run(spiders))
        .await
        .expect("run should not hang")
        .unwrap();

    assert_eq!(spiders.len(), 2);
    for spider in &spiders {
        assert_eq!(spider.visited.snapshot(), vec!["/hooks"]);
    }
    assert_eq!(crawler.stats().snapshot().spiders_completed, 2);
}

#[tokio::test]
async fn callback_panicking_before_its_future_is_contained() {
    let downloader = MockDownloader::new(|request, _| ok(request, ""));
    let crawler = CrawlerBuilder::new()
        .workers(1)
        .downloader(Shared(downloader))
        .build()
        .unwrap();

    struct EagerPanic;

    impl Spider for EagerPanic {
        fn name(&self) -> &str {
            "eager"
        }

        fn seed(&self, frontier: &Frontier) -> Result<(), CrawlError> {
            frontier.schedule(Request::parse(
                "https://example.com/eager",
                Callback::new(|response: Response, _| {
                    if response.status_code() == 200 {
                        panic!("rejected before parsing");
                    }
                    async { Ok(()) }
                }),
            )?);
            Ok(())
        }
    }

    let spiders = crawler.run(vec![EagerPanic]).await.unwrap();
    assert_eq!(spiders.len(), 1);
    assert_eq!(crawler.stats().snapshot().callbacks_failed, 1);
}

/// Panics when the last request holding it is dropped.
struct ExplodesOnDrop;

impl Drop for ExplodesOnDrop {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            panic!("released with its request");
        }
    }
}

struct DropBomb;

impl Spider for DropBomb {
    fn name(&self) -> &str {
        "drop-bomb"
    }

    fn seed(&self, frontier: &Frontier) -> Result<(), CrawlError> {
        let bomb = Arc::new(ExplodesOnDrop);
        frontier.schedule(Request::parse(
            "https://example.com/bomb",
            Callback::new(move |_, _| {
                let _bomb = Arc::clone(&bomb);
                async { Ok(()) }
            }),
        )?);
        Ok(())
    }
}

#[tokio::test]
async fn dead_executor_fails_the_run_instead_of_hanging() {
    let downloader = MockDownloader::new(|request, _| ok(request, ""));
    let crawler = CrawlerBuilder::new()
        .workers(2)
        .downloader(Shared(downloader))
        .build()
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), crawler.run(vec![DropBomb]))
        .await
        .expect("run should not hang");

    assert!(matches!(result, Err(CrawlError::GeneralError(_))));
}
