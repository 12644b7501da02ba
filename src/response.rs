//! Adapter over a completed HTTP exchange.
//!
//! The HTML and JSON views are parsed on first access and cached for the
//! lifetime of the response. Both read the body through the response charset.

use encoding_rs::{Encoding, UTF_8};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, SET_COOKIE};
use scraper::Html;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::OnceLock;
use url::Url;

/// One hop of a redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// The URL that answered with the redirect.
    pub url: Url,
    pub status: StatusCode,
}

/// A successful download.
#[derive(Debug)]
pub struct Response {
    /// Final URL after redirects.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Redirect hops in the order they were followed.
    pub history: Vec<Redirect>,
    pub body: Vec<u8>,
    encoding: &'static Encoding,
    html: OnceLock<Html>,
    json: OnceLock<Value>,
}

impl Response {
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Response {
            url,
            status,
            headers,
            history: Vec::new(),
            body,
            encoding: UTF_8,
            html: OnceLock::new(),
            json: OnceLock::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Redirect>) -> Self {
        self.history = history;
        self
    }

    /// Sets the charset used by [`text`](Self::text) and the parsed views.
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// The body decoded with the response charset, with invalid sequences replaced.
    ///
    /// A byte order mark, when present, takes precedence over the charset.
    pub fn text(&self) -> Cow<'_, str> {
        self.encoding.decode(&self.body).0
    }

    /// The parsed HTML document, built on first call.
    pub fn html(&self) -> &Html {
        self.html.get_or_init(|| Html::parse_document(&self.text()))
    }

    /// The decoded JSON body, built on first successful call.
    pub fn json(&self) -> Result<&Value, serde_json::Error> {
        if let Some(value) = self.json.get() {
            return Ok(value);
        }
        let value: Value = serde_json::from_str(&self.text())?;
        Ok(self.json.get_or_init(|| value))
    }

    /// Name/value pairs from the `Set-Cookie` headers.
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|raw| {
                let pair = raw.split(';').next()?;
                let (name, value) = pair.split_once('=')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

/// The charset named by the `Content-Type` header, if it is one `encoding_rs` knows.
pub(crate) fn declared_encoding(headers: &HeaderMap) -> Option<&'static Encoding> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Encoding::for_label(value.trim().trim_matches('"').as_bytes())
    })
}
