//! The executor loop.
//!
//! Each executor takes one spider at a time from the intake channel, seeds a fresh
//! frontier for it, drains that frontier one request at a time through the
//! configured strategy and acknowledges the spider once nothing is left. Since an
//! executor never has more than one download in flight, the number of executors
//! bounds the crawler's concurrency.
//!
//! Failures are contained per request: download errors are logged and counted,
//! callback errors and panics are caught at this boundary, and the spider moves on
//! to its next request.

use super::CompletionHook;
use super::strategy::RequestStrategy;
use crate::error::DownloadError;
use crate::frontier::Frontier;
use crate::request::Request;
use crate::spider::Spider;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use futures_util::FutureExt;
use kanal::{AsyncReceiver, AsyncSender};
use reqwest::header::HeaderMap;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Logged in place of the name of a spider whose `name` panicked.
const UNNAMED_SPIDER: &str = "<unnamed>";

/// What an executor reports back to the crawler.
///
/// `Lost` means the executor itself died while holding a spider, which is then
/// never returned.
pub(crate) enum Ack<S> {
    Done(usize, S),
    Lost,
}

pub(crate) struct Executor<S> {
    pub(crate) id: usize,
    pub(crate) intake: AsyncReceiver<(usize, S)>,
    pub(crate) acks: AsyncSender<Ack<S>>,
    pub(crate) strategy: Arc<dyn RequestStrategy>,
    pub(crate) on_complete: Option<CompletionHook>,
    pub(crate) stats: Arc<StatCollector>,
    pub(crate) state: Arc<CrawlerState>,
}

impl<S: Spider> Executor<S> {
    /// Serves spiders until the intake channel is closed and empty.
    pub(crate) async fn run(self) {
        trace!("Executor {} started", self.id);
        while let Ok((idx, spider)) = self.intake.recv().await {
            self.drain(&spider).await;
            if self.acks.send(Ack::Done(idx, spider)).await.is_err() {
                error!("Acknowledgement channel closed, executor {} exiting", self.id);
                return;
            }
        }
        trace!("Intake closed, executor {} exiting", self.id);
    }

    async fn drain(&self, spider: &S) {
        let name = match catch_unwind(AssertUnwindSafe(|| spider.name().to_owned())) {
            Ok(name) => name,
            Err(panic) => {
                error!("Spider name panicked: {}", panic_message(&*panic));
                UNNAMED_SPIDER.to_owned()
            }
        };
        info!("Executor {} started spider '{}'", self.id, name);
        self.state.spider_started();

        let frontier = Frontier::with_stats(Arc::clone(&self.stats));
        match catch_unwind(AssertUnwindSafe(|| spider.seed(&frontier))) {
            Ok(Ok(())) => debug!("Spider '{}' seeded {} requests", name, frontier.len()),
            Ok(Err(e)) => error!("Spider '{}' failed to seed: {}", name, e),
            Err(panic) => error!(
                "Spider '{}' panicked while seeding: {}",
                name,
                panic_message(&*panic)
            ),
        }

        let default_headers = match catch_unwind(AssertUnwindSafe(|| spider.default_headers())) {
            Ok(headers) => headers,
            Err(panic) => {
                error!(
                    "Spider '{}' panicked building default headers: {}",
                    name,
                    panic_message(&*panic)
                );
                HeaderMap::new()
            }
        };
        let mut processed = 0usize;
        while let Some(request) = frontier.next_request() {
            self.process(request.with_default_headers(&default_headers), &frontier)
                .await;
            processed += 1;
        }

        if let Some(hook) = &self.on_complete {
            let spider: &dyn Spider = spider;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(spider))) {
                error!(
                    "Completion hook panicked for spider '{}': {}",
                    name,
                    panic_message(&*panic)
                );
            }
        }

        self.state.spider_finished();
        self.stats.increment_spiders_completed();
        info!(
            "Spider '{}' finished: {} requests processed, {} seen",
            name,
            processed,
            frontier.seen_count()
        );
    }

    async fn process(&self, request: Request, frontier: &Frontier) {
        trace!("Request started: {} {}", request.method(), request.url());
        self.stats.increment_requests_sent();

        self.state.download_started();
        let fetched = AssertUnwindSafe(self.strategy.fetch(&request))
            .catch_unwind()
            .await;
        self.state.download_finished();

        let response = match fetched {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                match &e {
                    DownloadError::Http { status, .. } => self.stats.record_http_error(*status),
                    DownloadError::Connection { .. } | DownloadError::Timeout { .. } => {
                        self.stats.record_connection_error()
                    }
                }
                warn!("Download failed: {}", e);
                return;
            }
            Err(panic) => {
                error!(
                    "Downloader panicked on {}: {}",
                    request.url(),
                    panic_message(&*panic)
                );
                return;
            }
        };

        self.stats
            .record_success(response.status_code(), response.body.len());
        trace!("Response {} for {}", response.status, response.url);

        let invoked = catch_unwind(AssertUnwindSafe(|| {
            request.callback().invoke(response, frontier.clone())
        }));
        let outcome = match invoked {
            Ok(callback) => AssertUnwindSafe(callback).catch_unwind().await,
            Err(panic) => Err(panic),
        };
        match outcome {
            Ok(Ok(())) => trace!("Request finished: {}", request.url()),
            Ok(Err(e)) => {
                self.stats.increment_callbacks_failed();
                error!("Callback failed for {}: {:#}", request.url(), e);
            }
            Err(panic) => {
                self.stats.increment_callbacks_failed();
                error!(
                    "Callback panicked for {}: {}",
                    request.url(),
                    panic_message(&*panic)
                );
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
