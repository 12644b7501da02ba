//! Transport abstraction used by the request strategies.
//!
//! A [`Downloader`] turns a [`Request`] into a [`Response`], optionally through an
//! egress proxy. Failures are reported as [`DownloadError`] so the guarded strategy
//! can tell a broken egress (`Connection`, `Timeout`) from a target that refused the
//! request (`Http`).
//!
//! [`ReqwestDownloader`] is the production implementation; tests plug in their own.

mod client;

pub use client::{DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT, ReqwestDownloader};

use crate::error::DownloadError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;

/// Performs the network exchange for one request.
#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    /// Downloads `request`, routing it through `proxy` when one is given.
    ///
    /// A non-success final status must be reported as [`DownloadError::Http`].
    async fn download(
        &self,
        request: &Request,
        proxy: Option<&str>,
    ) -> Result<Response, DownloadError>;
}
