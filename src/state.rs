//! Module for tracking the operational state of the crawler.
//!
//! `CrawlerState` holds atomic counters for:
//! - The number of downloads currently in flight.
//! - The highest number of simultaneous downloads observed.
//! - The number of spiders an executor is currently draining.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared live state of the crawler's executors.
#[derive(Debug, Default)]
pub struct CrawlerState {
    in_flight_requests: AtomicUsize,
    peak_in_flight: AtomicUsize,
    active_spiders: AtomicUsize,
}

impl CrawlerState {
    /// Creates a new, atomically reference-counted `CrawlerState`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn download_started(&self) {
        let now = self.in_flight_requests.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn download_finished(&self) {
        self.in_flight_requests.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn spider_started(&self) {
        self.active_spiders.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn spider_finished(&self) {
        self.active_spiders.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight_requests(&self) -> usize {
        self.in_flight_requests.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn active_spiders(&self) -> usize {
        self.active_spiders.load(Ordering::SeqCst)
    }

    /// Checks if no spider is being drained and no download is in flight.
    pub fn is_idle(&self) -> bool {
        self.in_flight_requests() == 0 && self.active_spiders() == 0
    }
}
