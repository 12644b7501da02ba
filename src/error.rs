//! Error types shared by the crawler, the frontier and the downloaders.
//!
//! Download failures are split into two families because the guarded strategy
//! treats them differently: transport failures (`Connection`, `Timeout`) mean the
//! egress identity is suspect, while `Http` means the exchange completed and only
//! the target rejected it.

use thiserror::Error;

/// Errors returned by a [`Downloader`](crate::Downloader).
#[derive(Debug, Error)]
pub enum DownloadError {
    /// DNS, TCP, TLS or proxy failure before a response was received.
    #[error("connection error downloading {url}: {reason}")]
    Connection { url: String, reason: String },

    /// The request did not complete within the downloader's timeout.
    #[error("timeout downloading {url}")]
    Timeout { url: String },

    /// The transport succeeded but the server answered with a non-success status.
    #[error("HTTP {status} downloading {url}")]
    Http { url: String, status: u16 },
}

impl DownloadError {
    /// Creates a connection error.
    pub fn connection(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http(url: impl Into<String>, status: u16) -> Self {
        Self::Http {
            url: url.into(),
            status,
        }
    }

    /// Returns `true` for transport-level failures that damage the egress identity.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// The URL the failed download was aimed at.
    pub fn url(&self) -> &str {
        match self {
            Self::Connection { url, .. } | Self::Timeout { url } | Self::Http { url, .. } => url,
        }
    }
}

/// Top-level error type of the crate.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    GeneralError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_connection_errors() {
        assert!(DownloadError::connection("http://a", "refused").is_connection());
        assert!(DownloadError::timeout("http://a").is_connection());
        assert!(!DownloadError::http("http://a", 404).is_connection());
    }

    #[test]
    fn display_includes_url_and_status() {
        let err = DownloadError::http("http://example.com/x", 503);
        assert_eq!(err.to_string(), "HTTP 503 downloading http://example.com/x");
        assert_eq!(err.url(), "http://example.com/x");
    }
}
