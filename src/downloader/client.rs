//! `reqwest`-backed downloader.
//!
//! One `reqwest::Client` is built per egress (direct, or one per proxy address)
//! and cached, so connection pools are reused across requests going through the
//! same proxy. Redirects are followed by hand to record every hop.

use super::Downloader;
use crate::error::DownloadError;
use crate::request::{Request, RequestBody};
use crate::response::{Redirect, Response, declared_encoding};
use async_trait::async_trait;
use dashmap::DashMap;
use encoding_rs::{Encoding, UTF_8};
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Total time allowed for one exchange, redirects excluded.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// HTTP downloader with per-proxy client caching.
///
/// # Example
///
/// ```rust,ignore
/// use crawler_core::{Callback, Downloader, Request, ReqwestDownloader};
///
/// let downloader = ReqwestDownloader::new().with_timeout(Duration::from_secs(5));
/// let request = Request::parse("https://example.com", Callback::noop())?;
/// let response = downloader.download(&request, Some("http://10.0.0.1:3128")).await?;
/// println!("{} after {} redirects", response.status, response.history.len());
/// ```
#[derive(Debug)]
pub struct ReqwestDownloader {
    clients: DashMap<Option<String>, Client>,
    timeout: Duration,
    max_redirects: usize,
}

impl Default for ReqwestDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestDownloader {
    pub fn new() -> Self {
        ReqwestDownloader {
            clients: DashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.clients.clear();
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Number of distinct egress clients built so far.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn client(&self, proxy: Option<&str>, url: &str) -> Result<Client, DownloadError> {
        let key = proxy.map(str::to_owned);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .timeout(self.timeout)
            .redirect(Policy::none());
        builder = match proxy {
            Some(address) => {
                let proxy = reqwest::Proxy::all(address).map_err(|e| {
                    DownloadError::connection(url, format!("invalid proxy {address}: {e}"))
                })?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };
        let client = builder
            .build()
            .map_err(|e| DownloadError::connection(url, e.to_string()))?;

        debug!(proxy = ?proxy, "Built HTTP client for egress");
        self.clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Downloader for ReqwestDownloader {
    async fn download(
        &self,
        request: &Request,
        proxy: Option<&str>,
    ) -> Result<Response, DownloadError> {
        let client = self.client(proxy, request.url().as_str())?;

        let mut url = request.url().clone();
        let mut method = request.method().clone();
        let mut body = request.body();
        let mut history = Vec::new();

        loop {
            trace!("{} {} via {:?}", method, url, proxy);
            let mut builder = client
                .request(method.clone(), url.clone())
                .headers(request.headers().clone());
            builder = match body {
                Some(RequestBody::Form(data)) => builder.form(data),
                Some(RequestBody::Json(data)) => builder.json(data),
                None => builder,
            };

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    DownloadError::timeout(url.as_str())
                } else {
                    DownloadError::connection(url.as_str(), e.to_string())
                }
            })?;
            let status = response.status();

            if status.is_redirection() {
                let Some(location) = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                else {
                    return Err(DownloadError::http(url.as_str(), status.as_u16()));
                };
                if history.len() >= self.max_redirects {
                    warn!("Too many redirects for {}", request.url());
                    return Err(DownloadError::http(url.as_str(), status.as_u16()));
                }
                let next = match url.join(location) {
                    Ok(next) => next,
                    Err(e) => {
                        warn!("Invalid redirect location {:?} from {}: {}", location, url, e);
                        return Err(DownloadError::http(url.as_str(), status.as_u16()));
                    }
                };

                if downgrades_to_get(status, &method) {
                    method = Method::GET;
                    body = None;
                }
                trace!("Redirect {} {} -> {}", status, url, next);
                history.push(Redirect {
                    url: std::mem::replace(&mut url, next),
                    status,
                });
                continue;
            }

            if !status.is_success() {
                return Err(DownloadError::http(url.as_str(), status.as_u16()));
            }

            let headers = response.headers().clone();
            let final_url = response.url().clone();
            let encoding = response_encoding(request, &headers);
            let bytes = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    DownloadError::timeout(url.as_str())
                } else {
                    DownloadError::connection(url.as_str(), e.to_string())
                }
            })?;

            return Ok(Response::new(final_url, status, headers, bytes.to_vec())
                .with_history(history)
                .with_encoding(encoding));
        }
    }
}

/// The request's charset when it names a known one, then the declared charset, then UTF-8.
fn response_encoding(request: &Request, headers: &HeaderMap) -> &'static Encoding {
    let forced = request.encoding().and_then(|label| {
        let encoding = Encoding::for_label(label.as_bytes());
        if encoding.is_none() {
            warn!(
                "Unknown encoding {:?} for {}, using the declared charset",
                label,
                request.url()
            );
        }
        encoding
    });
    forced.or_else(|| declared_encoding(headers)).unwrap_or(UTF_8)
}

fn downgrades_to_get(status: StatusCode, method: &Method) -> bool {
    status == StatusCode::SEE_OTHER
        || (*method == Method::POST
            && matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND))
}
