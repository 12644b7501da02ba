//! # crawler-core
//!
//! A crawl engine built around three pieces:
//!
//! - a per-spider `Frontier`, a deduplicating FIFO of requests;
//! - a `Crawler` running a fixed pool of executors, each draining one spider at a time;
//! - a `ProxyPool` handing out egress proxies and taking them back after a cooldown.
//!
//! Requests go out either directly or, when a proxy pool is attached, through a
//! leased proxy whose health is reported back according to the download outcome.
//!
//! ## Example
//!
//! ```rust,ignore
//! use crawler_core::prelude::*;
//!
//! struct PageSpider {
//!     start: Url,
//!     pages: ItemBuffer<String>,
//! }
//!
//! impl Spider for PageSpider {
//!     fn name(&self) -> &str {
//!         "example"
//!     }
//!
//!     fn seed(&self, frontier: &Frontier) -> Result<(), CrawlError> {
//!         let pages = self.pages.clone();
//!         frontier.schedule(Request::new(
//!             self.start.clone(),
//!             Callback::new(move |response, _frontier| {
//!                 let pages = pages.clone();
//!                 async move {
//!                     pages.push(response.text().into_owned());
//!                     Ok(())
//!                 }
//!             }),
//!         ));
//!         Ok(())
//!     }
//! }
//!
//! async fn run(spiders: Vec<PageSpider>) -> Result<(), CrawlError> {
//!     let crawler = CrawlerBuilder::new().workers(4).build()?;
//!     for spider in crawler.run(spiders).await? {
//!         println!("{}: {} pages", spider.name(), spider.pages.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod builder;
pub mod crawler;
pub mod downloader;
pub mod error;
pub mod frontier;
pub mod prelude;
pub mod proxy;
pub mod registry;
pub mod request;
pub mod response;
pub mod spider;
pub mod state;
pub mod stats;

pub use api::{crawl, crawl_urls};
pub use builder::{CrawlerBuilder, CrawlerConfig, DEFAULT_WORKERS};
pub use crawler::{
    CompletionHook, Crawler, DirectStrategy, GuardedStrategy, RequestStrategy,
};
pub use downloader::{Downloader, ReqwestDownloader};
pub use error::{CrawlError, DownloadError};
pub use frontier::Frontier;
pub use proxy::{Proxy, ProxyLease, ProxyPool, ProxyPoolConfig, ProxyState, StateChange};
pub use registry::SpiderRegistry;
pub use request::{Callback, CallbackFuture, Request, RequestBody};
pub use response::{Redirect, Response};
pub use spider::{DEFAULT_USER_AGENT, ItemBuffer, Spider};
pub use state::CrawlerState;
pub use stats::{StatCollector, StatsSnapshot};

pub use async_trait::async_trait;
pub use tokio;
