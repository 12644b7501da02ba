//! Request processing strategies.
//!
//! A strategy decides how a request reaches the network: directly, or through a
//! proxy leased from a [`ProxyPool`]. It only returns the download outcome; the
//! executor invokes the callback afterwards, so a guarded proxy is always back in
//! the pool before user code runs.

use crate::downloader::Downloader;
use crate::error::DownloadError;
use crate::proxy::ProxyPool;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

/// How a request is fetched.
#[async_trait]
pub trait RequestStrategy: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn fetch(&self, request: &Request) -> Result<Response, DownloadError>;
}

/// Downloads without any proxy.
pub struct DirectStrategy {
    downloader: Arc<dyn Downloader>,
}

impl DirectStrategy {
    pub fn new(downloader: Arc<dyn Downloader>) -> Self {
        DirectStrategy { downloader }
    }
}

#[async_trait]
impl RequestStrategy for DirectStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn fetch(&self, request: &Request) -> Result<Response, DownloadError> {
        self.downloader.download(request, None).await
    }
}

/// Downloads through a proxy leased from a pool, reporting the proxy's health back.
///
/// Transport failures release the proxy as unavailable. HTTP failures and successes
/// release it as valid, since the proxy itself carried the exchange.
pub struct GuardedStrategy {
    downloader: Arc<dyn Downloader>,
    pool: Arc<ProxyPool>,
}

impl GuardedStrategy {
    pub fn new(downloader: Arc<dyn Downloader>, pool: Arc<ProxyPool>) -> Self {
        GuardedStrategy { downloader, pool }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }
}

#[async_trait]
impl RequestStrategy for GuardedStrategy {
    fn name(&self) -> &'static str {
        "guarded"
    }

    async fn fetch(&self, request: &Request) -> Result<Response, DownloadError> {
        let lease = self.pool.acquire().await;
        trace!("Fetching {} through proxy {}", request.url(), lease.address());

        let result = self.downloader.download(request, Some(lease.address())).await;
        match &result {
            Err(e) if e.is_connection() => {
                debug!("Proxy {} failed: {}", lease.address(), e);
                self.pool.release_unavailable(lease);
            }
            _ => self.pool.release_valid(lease),
        }
        result
    }
}
