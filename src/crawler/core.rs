//! The core `Crawler` implementation.
//!
//! The crawler ties together the request strategy, the statistics collector and
//! the live state counters, and runs the executor pool for each call to `run`.

use super::CompletionHook;
use super::executor::{Ack, Executor, panic_message};
use super::strategy::RequestStrategy;
use crate::builder::CrawlerConfig;
use crate::error::CrawlError;
use crate::spider::Spider;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use futures_util::FutureExt;
use kanal::unbounded_async;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Runs spiders on a bounded pool of executors.
pub struct Crawler {
    config: CrawlerConfig,
    strategy: Arc<dyn RequestStrategy>,
    on_complete: Option<CompletionHook>,
    stats: Arc<StatCollector>,
    state: Arc<CrawlerState>,
}

impl Crawler {
    pub(crate) fn new(
        config: CrawlerConfig,
        strategy: Arc<dyn RequestStrategy>,
        on_complete: Option<CompletionHook>,
    ) -> Self {
        Crawler {
            config,
            strategy,
            on_complete,
            stats: Arc::new(StatCollector::new()),
            state: CrawlerState::new(),
        }
    }

    /// Crawls every spider to exhaustion and hands them back in their original order.
    ///
    /// Returns only after each spider's frontier was drained, including every request
    /// its callbacks scheduled, and the spider was acknowledged. Executors are stopped
    /// before returning.
    pub async fn run<S: Spider>(&self, spiders: Vec<S>) -> Result<Vec<S>, CrawlError> {
        let total = spiders.len();
        if total == 0 {
            info!("No spiders to crawl");
            return Ok(Vec::new());
        }

        info!(
            "Crawler starting: spiders={}, workers={}, strategy={}",
            total,
            self.config.workers,
            self.strategy.name()
        );

        let (intake_tx, intake_rx) = unbounded_async();
        let (ack_tx, ack_rx) = unbounded_async();
        for entry in spiders.into_iter().enumerate() {
            intake_tx
                .send(entry)
                .await
                .map_err(|e| CrawlError::GeneralError(format!("intake channel failed: {e}")))?;
        }

        trace!("Spawning {} executors", self.config.workers);
        let mut executors = JoinSet::new();
        for id in 0..self.config.workers {
            let executor = Executor {
                id,
                intake: intake_rx.clone(),
                acks: ack_tx.clone(),
                strategy: Arc::clone(&self.strategy),
                on_complete: self.on_complete.clone(),
                stats: Arc::clone(&self.stats),
                state: Arc::clone(&self.state),
            };
            let acks = ack_tx.clone();
            executors.spawn(async move {
                if let Err(panic) = AssertUnwindSafe(executor.run()).catch_unwind().await {
                    error!("Executor {} died: {}", id, panic_message(&*panic));
                    let _ = acks.send(Ack::Lost).await;
                }
            });
        }
        drop(intake_rx);
        drop(ack_tx);

        let mut slots: Vec<Option<S>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut acknowledged = 0;
        let mut lost = 0;
        while acknowledged + lost < total {
            match ack_rx.recv().await {
                Ok(Ack::Done(idx, spider)) => {
                    slots[idx] = Some(spider);
                    acknowledged += 1;
                    debug!("Spider #{} acknowledged ({}/{})", idx, acknowledged, total);
                }
                Ok(Ack::Lost) => lost += 1,
                Err(e) => {
                    error!("All executors stopped before every spider was acknowledged: {}", e);
                    break;
                }
            }
        }

        trace!("Closing intake channel");
        drop(intake_tx);
        self.shutdown(executors).await;

        if acknowledged < total {
            return Err(CrawlError::GeneralError(format!(
                "only {acknowledged} of {total} spiders were acknowledged"
            )));
        }

        info!("Crawl finished. {}", self.stats);
        Ok(slots.into_iter().flatten().collect())
    }

    async fn shutdown(&self, mut executors: JoinSet<()>) {
        let timeout = self.config.shutdown_timeout;
        let joined = tokio::time::timeout(timeout, async {
            while let Some(result) = executors.join_next().await {
                if let Err(e) = result {
                    error!("Executor failed during shutdown: {}", e);
                }
            }
        })
        .await;

        match joined {
            Ok(()) => trace!("All executors stopped"),
            Err(_) => {
                warn!(
                    "Executors did not stop within {:?}, aborting remaining executors",
                    timeout
                );
                executors.abort_all();
            }
        }
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Name of the request strategy in use.
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Returns the statistics collected over every run of this crawler.
    pub fn stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }

    /// Returns the live executor state.
    pub fn state(&self) -> Arc<CrawlerState> {
        Arc::clone(&self.state)
    }
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("config", &self.config)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}
