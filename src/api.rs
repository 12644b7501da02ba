//! One-call entry points.

use crate::builder::CrawlerBuilder;
use crate::error::CrawlError;
use crate::registry::SpiderRegistry;
use crate::spider::Spider;
use url::Url;

/// Crawls `spiders` with a default crawler and returns them once all are done.
pub async fn crawl<S: Spider>(spiders: Vec<S>) -> Result<Vec<S>, CrawlError> {
    CrawlerBuilder::new().build()?.run(spiders).await
}

/// Builds a spider for each start URL the registry knows and crawls them all.
///
/// URLs no registered spider accepts are skipped.
pub async fn crawl_urls(
    registry: &SpiderRegistry,
    urls: &[Url],
) -> Result<Vec<Box<dyn Spider>>, CrawlError> {
    crawl(registry.spiders_for(urls)).await
}
