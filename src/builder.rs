//! # Builder Module
//!
//! Provides the `CrawlerBuilder`, a fluent API for constructing and configuring
//! `Crawler` instances.
//!
//! ## Key Features
//!
//! - **Concurrency Configuration**: the number of executors, which bounds the
//!   number of downloads in flight
//! - **Request Strategy**: direct downloads by default, guarded by a proxy pool
//!   when one is attached, or any custom `RequestStrategy`
//! - **Component Registration**: a custom downloader and a completion hook
//! - **Validation**: inconsistent settings are rejected at `build` time
//!
//! ## Example
//!
//! ```rust,ignore
//! use crawler_core::{CrawlerBuilder, ProxyPool, ProxyPoolConfig};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(ProxyPool::new(proxies, ProxyPoolConfig::default()));
//! let crawler = CrawlerBuilder::new()
//!     .workers(8)
//!     .proxy_pool(pool)
//!     .on_complete(|spider| println!("{} done", spider.name()))
//!     .build()?;
//!
//! let spiders = crawler.run(spiders).await?;
//! ```

use crate::crawler::{CompletionHook, Crawler, DirectStrategy, GuardedStrategy, RequestStrategy};
use crate::downloader::{Downloader, ReqwestDownloader};
use crate::error::CrawlError;
use crate::proxy::ProxyPool;
use crate::spider::Spider;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Number of executors used unless configured otherwise.
pub const DEFAULT_WORKERS: usize = 4;

/// Configuration for the crawler's executor pool.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Number of executors, and so the maximum number of downloads in flight.
    pub workers: usize,
    /// How long `run` waits for executors to stop before aborting them.
    pub shutdown_timeout: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            workers: DEFAULT_WORKERS,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Fluent constructor for [`Crawler`].
#[derive(Default)]
pub struct CrawlerBuilder {
    crawler_config: CrawlerConfig,
    downloader: Option<Arc<dyn Downloader>>,
    proxy_pool: Option<Arc<ProxyPool>>,
    strategy: Option<Arc<dyn RequestStrategy>>,
    on_complete: Option<CompletionHook>,
}

impl CrawlerBuilder {
    /// Creates a builder with the default configuration and a `ReqwestDownloader`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: CrawlerConfig) -> Self {
        self.crawler_config = config;
        self
    }

    /// Sets the number of executors.
    pub fn workers(mut self, workers: usize) -> Self {
        self.crawler_config.workers = workers;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.crawler_config.shutdown_timeout = timeout;
        self
    }

    /// Sets a custom downloader for the crawler.
    pub fn downloader<D: Downloader>(mut self, downloader: D) -> Self {
        self.downloader = Some(Arc::new(downloader));
        self
    }

    /// Routes every request through a proxy leased from `pool`.
    pub fn proxy_pool(mut self, pool: Arc<ProxyPool>) -> Self {
        self.proxy_pool = Some(pool);
        self
    }

    /// Uses a custom request strategy. The downloader setting is ignored.
    pub fn strategy(mut self, strategy: Arc<dyn RequestStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Registers a hook called once per spider after its frontier is exhausted.
    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn Spider) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    /// Builds the `Crawler`, validating the configuration.
    pub fn build(self) -> Result<Crawler, CrawlError> {
        if self.crawler_config.workers == 0 {
            return Err(CrawlError::ConfigurationError(
                "workers must be greater than 0.".to_string(),
            ));
        }

        let strategy: Arc<dyn RequestStrategy> = match (self.strategy, self.proxy_pool) {
            (Some(_), Some(_)) => {
                return Err(CrawlError::ConfigurationError(
                    "a custom strategy and a proxy pool cannot be combined.".to_string(),
                ));
            }
            (Some(strategy), None) => strategy,
            (None, pool) => {
                let downloader = self
                    .downloader
                    .unwrap_or_else(|| Arc::new(ReqwestDownloader::new()) as Arc<dyn Downloader>);
                match pool {
                    Some(pool) => Arc::new(GuardedStrategy::new(downloader, pool)),
                    None => Arc::new(DirectStrategy::new(downloader)),
                }
            }
        };

        debug!(
            "Building crawler: workers={}, strategy={}",
            self.crawler_config.workers,
            strategy.name()
        );
        Ok(Crawler::new(self.crawler_config, strategy, self.on_complete))
    }
}
