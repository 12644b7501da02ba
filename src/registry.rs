//! Name-keyed table of spider variants.
//!
//! Each entry pairs a URL matcher with a factory building the spider for a given
//! start URL. `spiders_for` turns a list of start URLs into the spiders to crawl,
//! picking the first registered variant whose matcher accepts each URL.

use crate::spider::{Spider, name_matches};
use tracing::{debug, warn};
use url::Url;

type Matcher = Box<dyn Fn(&Url) -> bool + Send + Sync>;
type Factory = Box<dyn Fn(Url) -> Box<dyn Spider> + Send + Sync>;

struct Entry {
    name: String,
    matcher: Matcher,
    factory: Factory,
}

/// Dispatch table from start URLs to spider variants.
#[derive(Default)]
pub struct SpiderRegistry {
    entries: Vec<Entry>,
}

impl SpiderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a variant matched when the URL contains `name`, the same rule as the
    /// default [`Spider::accepts`].
    pub fn register<F, S>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Url) -> S + Send + Sync + 'static,
        S: Spider,
    {
        let name = name.into();
        let needle = name.clone();
        self.register_with(name, move |url| name_matches(&needle, url), factory)
    }

    /// Registers a variant with a custom URL matcher.
    ///
    /// The matcher replaces [`Spider::accepts`] for dispatch, since it runs before
    /// the spider is built.
    pub fn register_with<M, F, S>(mut self, name: impl Into<String>, matcher: M, factory: F) -> Self
    where
        M: Fn(&Url) -> bool + Send + Sync + 'static,
        F: Fn(Url) -> S + Send + Sync + 'static,
        S: Spider,
    {
        self.entries.push(Entry {
            name: name.into(),
            matcher: Box::new(matcher),
            factory: Box::new(move |url| Box::new(factory(url)) as Box<dyn Spider>),
        });
        self
    }

    /// Registered variant names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    /// Builds the spider of the first variant accepting `url`.
    pub fn select(&self, url: &Url) -> Option<Box<dyn Spider>> {
        let entry = self.entries.iter().find(|entry| (entry.matcher)(url))?;
        debug!("Spider '{}' selected for {}", entry.name, url);
        Some((entry.factory)(url.clone()))
    }

    /// Builds one spider per URL; URLs no variant accepts are skipped with a warning.
    pub fn spiders_for<'a>(&self, urls: impl IntoIterator<Item = &'a Url>) -> Vec<Box<dyn Spider>> {
        urls.into_iter()
            .filter_map(|url| {
                let spider = self.select(url);
                if spider.is_none() {
                    warn!("No spider registered for {}", url);
                }
                spider
            })
            .collect()
    }
}

impl std::fmt::Debug for SpiderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
