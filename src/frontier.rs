//! # Frontier Module
//!
//! Implements the per-spider request frontier with duplicate detection.
//!
//! ## Overview
//!
//! The `Frontier` holds the requests a spider still has to fetch and remembers
//! the identity of every request it has ever accepted. Requests come out in the
//! order they were scheduled, which gives breadth-first traversal of the link
//! graph a spider discovers. A request whose `target_key` was already seen is
//! silently dropped, so cyclic link graphs terminate.
//!
//! ## Ownership
//!
//! One frontier is created per spider per crawl and is drained by a single
//! executor. It is a cheap cloneable handle so that callbacks can schedule
//! follow-up requests into it while the executor is draining it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use crawler_core::{Callback, Frontier, Request};
//!
//! let frontier = Frontier::new();
//! frontier.schedule(Request::parse("https://example.com", Callback::noop())?);
//! frontier.schedule(Request::parse("https://example.com", Callback::noop())?);
//!
//! assert_eq!(frontier.len(), 1);
//! while let Some(request) = frontier.next_request() {
//!     // fetch it
//! }
//! ```

use crate::request::Request;
use crate::stats::StatCollector;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct FrontierState {
    pending: VecDeque<Request>,
    seen: HashSet<String>,
}

/// Deduplicating FIFO queue of pending requests.
#[derive(Debug, Clone, Default)]
pub struct Frontier {
    state: Arc<Mutex<FrontierState>>,
    stats: Option<Arc<StatCollector>>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a frontier that reports scheduled and deduplicated requests to `stats`.
    pub fn with_stats(stats: Arc<StatCollector>) -> Self {
        Frontier {
            state: Arc::default(),
            stats: Some(stats),
        }
    }

    /// Appends `request` unless a request with the same identity was scheduled before.
    ///
    /// Returns `true` if the request was queued.
    pub fn schedule(&self, request: Request) -> bool {
        let mut state = self.state.lock();
        if !state.seen.insert(request.target_key().to_owned()) {
            drop(state);
            trace!("Request already scheduled, skipping: {}", request.target_key());
            if let Some(stats) = &self.stats {
                stats.increment_requests_deduplicated();
            }
            return false;
        }

        debug!("Request scheduled: {} {}", request.method(), request.url());
        state.pending.push_back(request);
        drop(state);

        if let Some(stats) = &self.stats {
            stats.increment_requests_scheduled();
        }
        true
    }

    /// Removes and returns the oldest pending request, or `None` once the frontier is exhausted.
    pub fn next_request(&self) -> Option<Request> {
        self.state.lock().pending.pop_front()
    }

    /// Returns the number of pending requests.
    #[inline]
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of distinct requests ever scheduled.
    pub fn seen_count(&self) -> usize {
        self.state.lock().seen.len()
    }

    pub fn has_seen(&self, target_key: &str) -> bool {
        self.state.lock().seen.contains(target_key)
    }
}
