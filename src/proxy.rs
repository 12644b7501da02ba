//! # Proxy Pool Module
//!
//! An asynchronous pool of egress proxies with cooldown-gated reuse.
//!
//! ## Overview
//!
//! A proxy is either available in the pool, leased to exactly one caller, or
//! cooling down after a release. `acquire` hands out the oldest available proxy or,
//! when none is available, waits in FIFO order behind earlier callers. Releasing a
//! lease records the proxy's new health state and schedules its return:
//!
//! - `release_valid`: back after the success cooldown (about a minute)
//! - `release_banned` / `release_unavailable`: back after the failure cooldown
//!   (about fifteen minutes)
//!
//! Releases never block. Cooling proxies sit in a min-heap keyed by their ready
//! time, drained by a timer task spawned together with the pool.
//!
//! ## Hand-off
//!
//! A proxy leaving cooldown goes straight to the oldest live waiter, under the same
//! lock that `acquire` checks availability with. Waiters whose `acquire` future was
//! dropped are skipped, and a waiter dropped after it was handed a proxy gives it
//! back, so no release is ever lost.
//!
//! ## Example
//!
//! ```rust,ignore
//! use crawler_core::{ProxyPool, ProxyPoolConfig};
//!
//! let pool = ProxyPool::new(["http://10.0.0.1:3128", "http://10.0.0.2:3128"], ProxyPoolConfig::default());
//!
//! let lease = pool.acquire().await;
//! match fetch_through(lease.address()).await {
//!     Ok(_) => pool.release_valid(lease),
//!     Err(_) => pool.release_unavailable(lease),
//! }
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

const SUCCESS_COOLDOWN_BASE_SECS: u64 = 60;
const FAILURE_COOLDOWN_FACTOR: u32 = 15;
const COOLDOWN_JITTER: f64 = 0.3;

// Drawn once per process.
static DEFAULT_COOLDOWNS: LazyLock<(Duration, Duration)> = LazyLock::new(|| {
    let base = SUCCESS_COOLDOWN_BASE_SECS as f64;
    let low = (base * (1.0 - COOLDOWN_JITTER)) as u64;
    let high = (base * (1.0 + COOLDOWN_JITTER)) as u64;
    let mut rng = rand::thread_rng();
    let success = Duration::from_secs(rng.gen_range(low..=high));
    let failure = Duration::from_secs(rng.gen_range(low..=high)) * FAILURE_COOLDOWN_FACTOR;
    (success, failure)
});

/// Health of a proxy as last reported by its lease holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProxyState {
    New,
    Valid,
    Banned,
    Unavailable,
}

/// One entry of a proxy's state history.
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub state: ProxyState,
    pub at: DateTime<Utc>,
}

/// A network egress identity.
#[derive(Debug, Serialize)]
pub struct Proxy {
    address: String,
    state: ProxyState,
    history: Vec<StateChange>,
}

impl Proxy {
    pub fn new(address: impl Into<String>) -> Self {
        let mut proxy = Proxy {
            address: address.into(),
            state: ProxyState::New,
            history: Vec::new(),
        };
        proxy.set_state(ProxyState::New);
        proxy
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ProxyState {
        self.state
    }

    /// Every state the proxy went through, oldest first.
    pub fn history(&self) -> &[StateChange] {
        &self.history
    }

    fn set_state(&mut self, state: ProxyState) {
        self.state = state;
        self.history.push(StateChange {
            state,
            at: Utc::now(),
        });
    }
}

/// Cooldowns applied when a proxy is released.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Delay before a proxy released as valid becomes available again.
    pub success_cooldown: Duration,
    /// Delay before a proxy released as banned or unavailable becomes available again.
    pub failure_cooldown: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        let (success_cooldown, failure_cooldown) = *DEFAULT_COOLDOWNS;
        ProxyPoolConfig {
            success_cooldown,
            failure_cooldown,
        }
    }
}

struct Cooling {
    ready_at: Instant,
    seq: u64,
    proxy: Proxy,
}

impl PartialEq for Cooling {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for Cooling {}

impl PartialOrd for Cooling {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cooling {
    // Reversed so that `BinaryHeap` pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct PoolState {
    available: VecDeque<Proxy>,
    waiters: VecDeque<oneshot::Sender<Proxy>>,
    cooling: BinaryHeap<Cooling>,
    next_seq: u64,
}

impl PoolState {
    /// Gives `proxy` to the oldest waiter still listening, or puts it back in `available`.
    fn hand_off(&mut self, mut proxy: Proxy) {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(proxy) {
                Ok(()) => {
                    trace!("Proxy handed to waiting acquirer");
                    return;
                }
                Err(returned) => proxy = returned,
            }
        }
        self.available.push_back(proxy);
    }

    /// Returns every proxy whose cooldown ended by `now`; yields the next deadline.
    fn reinsert_ready(&mut self, now: Instant) -> Option<Instant> {
        loop {
            match self.cooling.peek() {
                Some(entry) if entry.ready_at <= now => {}
                Some(entry) => return Some(entry.ready_at),
                None => return None,
            }
            if let Some(entry) = self.cooling.pop() {
                debug!(
                    proxy = %entry.proxy.address,
                    state = ?entry.proxy.state,
                    "Proxy cooldown elapsed"
                );
                self.hand_off(entry.proxy);
            }
        }
    }
}

struct Shared {
    state: Mutex<PoolState>,
    timer: Arc<Notify>,
    config: ProxyPoolConfig,
    size: usize,
}

impl Shared {
    fn release(&self, mut proxy: Proxy, new_state: ProxyState) {
        proxy.set_state(new_state);
        let cooldown = match new_state {
            ProxyState::New | ProxyState::Valid => self.config.success_cooldown,
            ProxyState::Banned | ProxyState::Unavailable => self.config.failure_cooldown,
        };
        debug!(proxy = %proxy.address, state = ?new_state, ?cooldown, "Proxy released");

        let mut state = self.state.lock();
        if cooldown.is_zero() {
            state.hand_off(proxy);
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.cooling.push(Cooling {
            ready_at: Instant::now() + cooldown,
            seq,
            proxy,
        });
        drop(state);
        self.timer.notify_one();
    }
}

/// A proxy checked out of a [`ProxyPool`].
///
/// Give it back with one of the pool's `release_*` methods. A lease that is
/// dropped instead is released as [`ProxyState::Unavailable`].
pub struct ProxyLease {
    proxy: Option<Proxy>,
    shared: Arc<Shared>,
}

impl ProxyLease {
    fn release(mut self, state: ProxyState) {
        if let Some(proxy) = self.proxy.take() {
            self.shared.release(proxy, state);
        }
    }
}

impl Deref for ProxyLease {
    type Target = Proxy;

    fn deref(&self) -> &Proxy {
        self.proxy
            .as_ref()
            .expect("lease holds its proxy until released")
    }
}

impl fmt::Debug for ProxyLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyLease").field("proxy", &self.proxy).finish()
    }
}

impl Drop for ProxyLease {
    fn drop(&mut self) {
        if let Some(proxy) = self.proxy.take() {
            warn!(
                proxy = %proxy.address,
                "Proxy lease dropped without release, marking unavailable"
            );
            self.shared.release(proxy, ProxyState::Unavailable);
        }
    }
}

/// A registered interest in the next available proxy.
struct Waiter<'a> {
    rx: Option<oneshot::Receiver<Proxy>>,
    shared: &'a Shared,
}

impl Waiter<'_> {
    async fn wait(&mut self) -> Option<Proxy> {
        let rx = self.rx.as_mut()?;
        let result = rx.await;
        self.rx = None;
        result.ok()
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(proxy) = rx.try_recv() {
                debug!(proxy = %proxy.address, "Acquire cancelled after hand-off, returning proxy");
                self.shared.state.lock().hand_off(proxy);
            }
        }
    }
}

/// Pool of proxies with FIFO acquisition and cooldown-delayed return.
pub struct ProxyPool {
    shared: Arc<Shared>,
}

impl ProxyPool {
    /// Creates a pool holding one proxy per address, in the given order.
    ///
    /// Spawns the cooldown timer task, so it must be called within a Tokio runtime.
    #[instrument(
        skip_all,
        fields(
            success_cooldown = ?config.success_cooldown,
            failure_cooldown = ?config.failure_cooldown
        )
    )]
    pub fn new<I, A>(addresses: I, config: ProxyPoolConfig) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let available: VecDeque<Proxy> = addresses.into_iter().map(Proxy::new).collect();
        let size = available.len();
        if size == 0 {
            warn!("Proxy pool created without proxies; every acquire will wait forever");
        } else {
            info!("Proxy pool created with {} proxies", size);
        }

        let timer = Arc::new(Notify::new());
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                available,
                ..PoolState::default()
            }),
            timer: Arc::clone(&timer),
            config,
            size,
        });
        tokio::spawn(run_cooldown_timer(Arc::downgrade(&shared), timer));

        ProxyPool { shared }
    }

    /// Creates a pool with the process-wide default cooldowns.
    pub fn with_default_cooldowns<I, A>(addresses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self::new(addresses, ProxyPoolConfig::default())
    }

    pub fn config(&self) -> &ProxyPoolConfig {
        &self.shared.config
    }

    /// Takes the oldest available proxy, waiting for a release if there is none.
    ///
    /// Dropping the returned future before it completes gives up the waiter's
    /// place in line without losing any proxy.
    pub async fn acquire(&self) -> ProxyLease {
        loop {
            let rx = {
                let mut state = self.shared.state.lock();
                if let Some(proxy) = state.available.pop_front() {
                    trace!(proxy = %proxy.address, "Proxy acquired");
                    return self.lease(proxy);
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                rx
            };

            trace!("Proxy pool exhausted, waiting for a release");
            let mut waiter = Waiter {
                rx: Some(rx),
                shared: &self.shared,
            };
            if let Some(proxy) = waiter.wait().await {
                trace!(proxy = %proxy.address, "Proxy acquired after waiting");
                return self.lease(proxy);
            }
        }
    }

    fn lease(&self, proxy: Proxy) -> ProxyLease {
        ProxyLease {
            proxy: Some(proxy),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Marks the proxy valid; it returns after the success cooldown.
    pub fn release_valid(&self, lease: ProxyLease) {
        lease.release(ProxyState::Valid);
    }

    /// Marks the proxy banned; it returns after the failure cooldown.
    pub fn release_banned(&self, lease: ProxyLease) {
        lease.release(ProxyState::Banned);
    }

    /// Marks the proxy unavailable; it returns after the failure cooldown.
    pub fn release_unavailable(&self, lease: ProxyLease) {
        lease.release(ProxyState::Unavailable);
    }

    /// Total number of proxies owned by the pool, wherever they currently are.
    pub fn len(&self) -> usize {
        self.shared.size
    }

    /// Returns `true` when no proxy can be acquired without waiting.
    pub fn is_empty(&self) -> bool {
        self.available_count() == 0
    }

    pub fn available_count(&self) -> usize {
        self.shared.state.lock().available.len()
    }

    pub fn cooling_count(&self) -> usize {
        self.shared.state.lock().cooling.len()
    }

    /// Number of acquirers currently waiting for a proxy.
    pub fn waiting_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .waiters
            .iter()
            .filter(|waiter| !waiter.is_closed())
            .count()
    }
}

impl fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyPool")
            .field("size", &self.shared.size)
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Drop for ProxyPool {
    fn drop(&mut self) {
        self.shared.timer.notify_one();
    }
}

async fn run_cooldown_timer(shared: Weak<Shared>, timer: Arc<Notify>) {
    trace!("Proxy cooldown timer started");
    loop {
        let next_deadline = match shared.upgrade() {
            Some(shared) => shared.state.lock().reinsert_ready(Instant::now()),
            None => break,
        };
        match next_deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = timer.notified() => {}
                }
            }
            None => timer.notified().await,
        }
    }
    trace!("Proxy cooldown timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::poll;

    fn config(success_secs: u64, failure_secs: u64) -> ProxyPoolConfig {
        ProxyPoolConfig {
            success_cooldown: Duration::from_secs(success_secs),
            failure_cooldown: Duration::from_secs(failure_secs),
        }
    }

    fn states(proxy: &Proxy) -> Vec<ProxyState> {
        proxy.history().iter().map(|change| change.state).collect()
    }

    #[tokio::test]
    async fn acquire_is_fifo() {
        let pool = ProxyPool::new(["a", "b", "c"], config(60, 900));
        let a = pool.acquire().await;
        let b = pool.acquire().await;
        let c = pool.acquire().await;

        assert_eq!([a.address(), b.address(), c.address()], ["a", "b", "c"]);
        assert_eq!(a.state(), ProxyState::New);
        assert_eq!(states(&a), vec![ProxyState::New]);
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 3);

        pool.release_valid(a);
        pool.release_valid(b);
        pool.release_valid(c);
    }

    #[tokio::test(start_paused = true)]
    async fn valid_release_waits_for_success_cooldown() {
        let pool = ProxyPool::new(["a"], config(60, 900));
        let lease = pool.acquire().await;

        let released_at = Instant::now();
        pool.release_valid(lease);
        assert_eq!(pool.cooling_count(), 1);

        let early = tokio::time::timeout(Duration::from_secs(59), pool.acquire()).await;
        assert!(early.is_err());

        let lease = pool.acquire().await;
        assert!(released_at.elapsed() >= Duration::from_secs(60));
        assert_eq!(lease.state(), ProxyState::Valid);
        assert_eq!(states(&lease), vec![ProxyState::New, ProxyState::Valid]);
        pool.release_valid(lease);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_releases_wait_for_failure_cooldown() {
        let pool = ProxyPool::new(["a", "b"], config(60, 900));
        let a = pool.acquire().await;
        let b = pool.acquire().await;

        let released_at = Instant::now();
        pool.release_banned(a);
        pool.release_unavailable(b);

        let early = tokio::time::timeout(Duration::from_secs(899), pool.acquire()).await;
        assert!(early.is_err());

        let a = pool.acquire().await;
        let b = pool.acquire().await;
        assert!(released_at.elapsed() >= Duration::from_secs(900));
        assert_eq!(a.address(), "a");
        assert_eq!(a.state(), ProxyState::Banned);
        assert_eq!(b.state(), ProxyState::Unavailable);
        pool.release_valid(a);
        pool.release_valid(b);
    }

    #[tokio::test]
    async fn waiters_are_served_in_arrival_order() {
        let pool = ProxyPool::new(["a"], config(0, 0));
        let lease = pool.acquire().await;

        let mut first = Box::pin(pool.acquire());
        let mut second = Box::pin(pool.acquire());
        assert!(poll!(first.as_mut()).is_pending());
        assert!(poll!(second.as_mut()).is_pending());
        assert_eq!(pool.waiting_count(), 2);

        pool.release_valid(lease);
        assert!(poll!(second.as_mut()).is_pending());

        let lease = first.await;
        assert_eq!(lease.address(), "a");
        pool.release_valid(lease);

        let lease = second.await;
        assert_eq!(states(&lease), vec![ProxyState::New, ProxyState::Valid, ProxyState::Valid]);
        pool.release_valid(lease);
    }

    #[tokio::test]
    async fn cancelled_waiter_is_skipped() {
        let pool = ProxyPool::new(["a"], config(0, 0));
        let lease = pool.acquire().await;

        let mut cancelled = Box::pin(pool.acquire());
        let mut survivor = Box::pin(pool.acquire());
        assert!(poll!(cancelled.as_mut()).is_pending());
        assert!(poll!(survivor.as_mut()).is_pending());
        drop(cancelled);
        assert_eq!(pool.waiting_count(), 1);

        pool.release_valid(lease);
        let lease = survivor.await;
        assert_eq!(lease.address(), "a");
        pool.release_valid(lease);
    }

    #[tokio::test]
    async fn waiter_cancelled_after_hand_off_returns_proxy() {
        let pool = ProxyPool::new(["a"], config(0, 0));
        let lease = pool.acquire().await;

        let mut waiting = Box::pin(pool.acquire());
        assert!(poll!(waiting.as_mut()).is_pending());

        pool.release_valid(lease);
        drop(waiting);

        assert_eq!(pool.available_count(), 1);
        let lease = pool.acquire().await;
        assert_eq!(lease.state(), ProxyState::Valid);
        pool.release_valid(lease);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_is_woken_when_cooldown_elapses() {
        let pool = Arc::new(ProxyPool::new(["a"], config(30, 900)));
        let lease = pool.acquire().await;

        let waiter = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire().await.address().to_string() }
        });
        while pool.waiting_count() == 0 {
            tokio::task::yield_now().await;
        }

        let released_at = Instant::now();
        pool.release_valid(lease);
        assert_eq!(waiter.await.unwrap(), "a");
        assert!(released_at.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_lease_is_released_as_unavailable() {
        let pool = ProxyPool::new(["a"], config(60, 900));
        drop(pool.acquire().await);
        assert_eq!(pool.cooling_count(), 1);

        let lease = pool.acquire().await;
        assert_eq!(lease.state(), ProxyState::Unavailable);
        pool.release_valid(lease);
    }

    #[test]
    fn default_cooldowns_stay_within_jitter_band() {
        let config = ProxyPoolConfig::default();
        let success = config.success_cooldown.as_secs();
        let failure = config.failure_cooldown.as_secs();
        assert!((42..=78).contains(&success), "success cooldown {success}s");
        assert!((630..=1170).contains(&failure), "failure cooldown {failure}s");
        assert_eq!(failure % 15, 0);

        let again = ProxyPoolConfig::default();
        assert_eq!(again.success_cooldown, config.success_cooldown);
    }
}
