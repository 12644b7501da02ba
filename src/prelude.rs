//! A "prelude" for users of the `crawler-core` crate.
//!
//! This prelude re-exports the most commonly used traits and structs
//! so that they can be easily imported.
//!
//! # Example
//!
//! ```
//! use crawler_core::prelude::*;
//! ```

pub use crate::{
    // Core structs
    Callback,
    CrawlError,
    Crawler,
    CrawlerBuilder,
    Frontier,
    ItemBuffer,
    ProxyPool,
    ProxyPoolConfig,
    Request,
    Response,
    // Core traits
    Downloader,
    RequestStrategy,
    Spider,
    // Essential re-exports for trait implementation
    async_trait,
};

pub use scraper::Selector;
pub use url::Url;
