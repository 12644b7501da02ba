//! # Spider Module
//!
//! Defines the `Spider` trait, the unit of work the crawler distributes among its
//! executors.
//!
//! ## Overview
//!
//! A spider seeds its frontier with one or more requests. Each request carries the
//! callback that parses its response, extracts results into the spider's own
//! buffer and schedules follow-up requests. Once the frontier is exhausted the
//! spider is done and is handed back to the caller of `Crawler::run`.
//!
//! ## Implementation
//!
//! Implementors must define:
//! - `name`: a short identifier, also used for URL matching by default
//! - `seed`: schedules the initial requests
//!
//! ## Example
//!
//! ```rust,ignore
//! use crawler_core::prelude::*;
//!
//! struct TitleSpider {
//!     start: Url,
//!     titles: ItemBuffer<String>,
//! }
//!
//! impl Spider for TitleSpider {
//!     fn name(&self) -> &str {
//!         "example"
//!     }
//!
//!     fn seed(&self, frontier: &Frontier) -> Result<(), CrawlError> {
//!         let titles = self.titles.clone();
//!         let callback = Callback::new(move |response, _frontier| {
//!             let titles = titles.clone();
//!             async move {
//!                 let selector = Selector::parse("title").map_err(|e| anyhow::anyhow!("{e}"))?;
//!                 if let Some(title) = response.html().select(&selector).next() {
//!                     titles.push(title.text().collect());
//!                 }
//!                 Ok(())
//!             }
//!         });
//!         frontier.schedule(Request::new(self.start.clone(), callback));
//!         Ok(())
//!     }
//! }
//! ```

use crate::error::CrawlError;
use crate::frontier::Frontier;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::sync::Arc;
use url::Url;

/// User agent sent unless a spider or request overrides it.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/68.0.3440.106 Safari/537.36";

/// The default URL matcher: `url` contains `name`.
pub(crate) fn name_matches(name: &str, url: &Url) -> bool {
    url.as_str().contains(name)
}

/// Defines the contract for a crawl work item.
pub trait Spider: Send + Sync + 'static {
    /// Short identifier used in logs and by the default URL matcher.
    fn name(&self) -> &str;

    /// Returns `true` if this spider knows how to crawl `url`.
    ///
    /// [`SpiderRegistry`](crate::SpiderRegistry) matches URLs before any spider
    /// exists, so its matchers stand in for this method during dispatch.
    fn accepts(&self, url: &Url) -> bool {
        name_matches(self.name(), url)
    }

    /// Schedules the initial requests. Called exactly once per run.
    fn seed(&self, frontier: &Frontier) -> Result<(), CrawlError>;

    /// Headers added to every request of this spider that does not set them itself.
    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        headers
    }
}

impl Spider for Box<dyn Spider> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn accepts(&self, url: &Url) -> bool {
        (**self).accepts(url)
    }

    fn seed(&self, frontier: &Frontier) -> Result<(), CrawlError> {
        (**self).seed(frontier)
    }

    fn default_headers(&self) -> HeaderMap {
        (**self).default_headers()
    }
}

/// Shared, append-only result buffer owned by a spider.
///
/// Clones share the same storage, so a clone can be moved into each callback.
#[derive(Debug)]
pub struct ItemBuffer<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for ItemBuffer<T> {
    fn clone(&self) -> Self {
        ItemBuffer {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for ItemBuffer<T> {
    fn default() -> Self {
        ItemBuffer {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T> ItemBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    pub fn extend(&self, items: impl IntoIterator<Item = T>) {
        self.items.lock().extend(items);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns everything collected so far.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }
}

impl<T: Clone> ItemBuffer<T> {
    /// Copies the collected items without draining the buffer.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Spider for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn seed(&self, _frontier: &Frontier) -> Result<(), CrawlError> {
            Ok(())
        }
    }

    #[test]
    fn default_matcher_checks_name_in_url() {
        let spider = Named("habr");
        assert!(spider.accepts(&Url::parse("https://habr.com/ru/post/1").unwrap()));
        assert!(!spider.accepts(&Url::parse("https://example.com/").unwrap()));
    }

    #[test]
    fn boxed_spider_delegates() {
        let spider: Box<dyn Spider> = Box::new(Named("boxed"));
        assert_eq!(Spider::name(&spider), "boxed");
        assert_eq!(
            spider.default_headers().get(USER_AGENT).unwrap(),
            DEFAULT_USER_AGENT
        );
    }

    #[test]
    fn item_buffer_clones_share_storage() {
        let buffer = ItemBuffer::new();
        let handle = buffer.clone();
        handle.push(1);
        handle.extend([2, 3]);

        assert_eq!(buffer.snapshot(), vec![1, 2, 3]);
        assert_eq!(buffer.take(), vec![1, 2, 3]);
        assert!(handle.is_empty());
    }
}
