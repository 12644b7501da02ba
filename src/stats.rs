//! # Statistics Module
//!
//! Collects counters about a crawl.
//!
//! ## Key Metrics Tracked
//!
//! - **Request Metrics**: scheduled, deduplicated, sent, succeeded and failed requests,
//!   with failures split into connection and HTTP errors
//! - **Callback Metrics**: callbacks that returned an error or panicked
//! - **Response Metrics**: status code distribution and bytes downloaded
//! - **Spider Metrics**: spiders whose frontier was fully drained
//!
//! Counters are atomics, so the collector can be shared by every executor.
//! Reports are produced from a `StatsSnapshot`, which is also what the JSON
//! export serializes.
//!
//! ## Example
//!
//! ```rust,ignore
//! let crawler = CrawlerBuilder::new().build()?;
//! crawler.run(spiders).await?;
//!
//! println!("{}", crawler.stats());
//! println!("{}", crawler.stats().to_json_string_pretty()?);
//! ```

use crate::error::CrawlError;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub requests_scheduled: usize,
    pub requests_deduplicated: usize,
    pub requests_sent: usize,
    pub requests_succeeded: usize,
    pub requests_failed: usize,
    pub connection_errors: usize,
    pub http_errors: usize,
    pub callbacks_failed: usize,
    pub spiders_completed: usize,
    pub total_bytes_downloaded: usize,
    pub response_status_counts: BTreeMap<u16, usize>,
    #[serde(serialize_with = "serialize_duration_secs")]
    pub elapsed: Duration,
}

fn serialize_duration_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl StatsSnapshot {
    fn requests_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.requests_sent as f64 / secs
        } else {
            0.0
        }
    }

    fn formatted_bytes(&self) -> String {
        const KB: usize = 1024;
        const MB: usize = 1024 * KB;
        const GB: usize = 1024 * MB;

        if self.total_bytes_downloaded >= GB {
            format!("{:.2} GB", self.total_bytes_downloaded as f64 / GB as f64)
        } else if self.total_bytes_downloaded >= MB {
            format!("{:.2} MB", self.total_bytes_downloaded as f64 / MB as f64)
        } else if self.total_bytes_downloaded >= KB {
            format!("{:.2} KB", self.total_bytes_downloaded as f64 / KB as f64)
        } else {
            format!("{} B", self.total_bytes_downloaded)
        }
    }

    fn status_summary(&self, sep: &str, fmt: impl Fn(u16, usize) -> String) -> Option<String> {
        if self.response_status_counts.is_empty() {
            return None;
        }
        Some(
            self.response_status_counts
                .iter()
                .map(|(code, count)| fmt(*code, *count))
                .collect::<Vec<_>>()
                .join(sep),
        )
    }
}

/// Collects statistics about the crawler's operation.
#[derive(Debug)]
pub struct StatCollector {
    start_time: Instant,
    requests_scheduled: AtomicUsize,
    requests_deduplicated: AtomicUsize,
    requests_sent: AtomicUsize,
    requests_succeeded: AtomicUsize,
    requests_failed: AtomicUsize,
    connection_errors: AtomicUsize,
    http_errors: AtomicUsize,
    callbacks_failed: AtomicUsize,
    spiders_completed: AtomicUsize,
    total_bytes_downloaded: AtomicUsize,
    response_status_counts: DashMap<u16, usize>,
}

impl StatCollector {
    /// Creates a new `StatCollector` with all counters initialized to zero.
    pub fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            requests_scheduled: AtomicUsize::new(0),
            requests_deduplicated: AtomicUsize::new(0),
            requests_sent: AtomicUsize::new(0),
            requests_succeeded: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
            connection_errors: AtomicUsize::new(0),
            http_errors: AtomicUsize::new(0),
            callbacks_failed: AtomicUsize::new(0),
            spiders_completed: AtomicUsize::new(0),
            total_bytes_downloaded: AtomicUsize::new(0),
            response_status_counts: DashMap::new(),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_scheduled: self.requests_scheduled.load(Ordering::SeqCst),
            requests_deduplicated: self.requests_deduplicated.load(Ordering::SeqCst),
            requests_sent: self.requests_sent.load(Ordering::SeqCst),
            requests_succeeded: self.requests_succeeded.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
            connection_errors: self.connection_errors.load(Ordering::SeqCst),
            http_errors: self.http_errors.load(Ordering::SeqCst),
            callbacks_failed: self.callbacks_failed.load(Ordering::SeqCst),
            spiders_completed: self.spiders_completed.load(Ordering::SeqCst),
            total_bytes_downloaded: self.total_bytes_downloaded.load(Ordering::SeqCst),
            response_status_counts: self
                .response_status_counts
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
            elapsed: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_requests_scheduled(&self) {
        self.requests_scheduled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_deduplicated(&self) {
        self.requests_deduplicated.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a successful download of `bytes` bytes with the given status.
    pub(crate) fn record_success(&self, status_code: u16, bytes: usize) {
        self.requests_succeeded.fetch_add(1, Ordering::SeqCst);
        self.total_bytes_downloaded.fetch_add(bytes, Ordering::SeqCst);
        self.record_response_status(status_code);
    }

    pub(crate) fn record_connection_error(&self) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
        self.connection_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_http_error(&self, status_code: u16) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
        self.http_errors.fetch_add(1, Ordering::SeqCst);
        self.record_response_status(status_code);
    }

    pub(crate) fn increment_callbacks_failed(&self) {
        self.callbacks_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_spiders_completed(&self) {
        self.spiders_completed.fetch_add(1, Ordering::SeqCst);
    }

    fn record_response_status(&self, status_code: u16) {
        *self.response_status_counts.entry(status_code).or_insert(0) += 1;
    }

    /// Converts the snapshot into a JSON string.
    pub fn to_json_string(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Converts the snapshot into a pretty-printed JSON string.
    pub fn to_json_string_pretty(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    /// Exports the current statistics to a Markdown formatted string.
    pub fn to_markdown_string(&self) -> String {
        let snapshot = self.snapshot();
        let status_codes = snapshot
            .status_summary("\n", |code, count| format!("- **{}**: {}", code, count))
            .unwrap_or_else(|| "N/A".to_string());

        format!(
            r#"# Crawl Statistics Report

- **Duration**: {:?}
- **Average Speed**: {:.2} req/s

## Requests
| Metric       | Count |
|--------------|-------|
| Scheduled    | {}     |
| Deduplicated | {}     |
| Sent         | {}     |
| Succeeded    | {}     |
| Failed       | {}     |
| Conn errors  | {}     |
| HTTP errors  | {}     |

## Processing
| Metric            | Count |
|-------------------|-------|
| Callbacks failed  | {}     |
| Spiders completed | {}     |
| Downloaded        | {}     |

## Status Codes
{}
"#,
            snapshot.elapsed,
            snapshot.requests_per_second(),
            snapshot.requests_scheduled,
            snapshot.requests_deduplicated,
            snapshot.requests_sent,
            snapshot.requests_succeeded,
            snapshot.requests_failed,
            snapshot.connection_errors,
            snapshot.http_errors,
            snapshot.callbacks_failed,
            snapshot.spiders_completed,
            snapshot.formatted_bytes(),
            status_codes
        )
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration : {:?}", snapshot.elapsed)?;
        writeln!(f, "  speed    : req/s: {:.2}", snapshot.requests_per_second())?;
        writeln!(
            f,
            "  requests : scheduled: {}, dedup: {}, sent: {}, ok: {}, fail: {} (conn: {}, http: {})",
            snapshot.requests_scheduled,
            snapshot.requests_deduplicated,
            snapshot.requests_sent,
            snapshot.requests_succeeded,
            snapshot.requests_failed,
            snapshot.connection_errors,
            snapshot.http_errors
        )?;
        writeln!(
            f,
            "  process  : callbacks failed: {}, spiders completed: {}, downloaded: {}",
            snapshot.callbacks_failed,
            snapshot.spiders_completed,
            snapshot.formatted_bytes()
        )?;

        let status_string = snapshot
            .status_summary(", ", |code, count| format!("{}: {}", code, count))
            .unwrap_or_else(|| "none".to_string());
        writeln!(f, "  status   : {}\n", status_string)
    }
}
