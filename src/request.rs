//! # Request Module
//!
//! Defines the `Request` value handed to downloaders and the `Callback` invoked
//! with the resulting `Response`.
//!
//! ## Identity
//!
//! Every request carries a `target_key` computed once at construction from the
//! URL (fragment stripped) and a canonical rendering of its payload. Object keys
//! are sorted so that two mappings with the same entries produce the same key,
//! while array order is kept. The method, headers and body encoding (form or JSON)
//! do not take part in the key. The frontier deduplicates on this key.
//!
//! ## Example
//!
//! ```rust,ignore
//! use crawler_core::{Callback, Request};
//! use serde_json::json;
//! use url::Url;
//!
//! let request = Request::new(
//!     Url::parse("https://example.com/search")?,
//!     Callback::new(|response, _frontier| async move {
//!         println!("{}", response.status);
//!         Ok(())
//!     }),
//! )
//! .with_method(reqwest::Method::POST)
//! .with_form(json!({"q": "rust", "page": 1}));
//! ```

use crate::error::CrawlError;
use crate::frontier::Frontier;
use crate::response::Response;
use futures_util::future::BoxFuture;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use url::Url;

/// The future returned by a callback.
pub type CallbackFuture = BoxFuture<'static, anyhow::Result<()>>;

type CallbackFn = dyn Fn(Response, Frontier) -> CallbackFuture + Send + Sync;

/// A function of a successful `Response`.
///
/// The callback also receives the frontier the request came from, so it can
/// schedule follow-up requests.
#[derive(Clone)]
pub struct Callback(Arc<CallbackFn>);

impl Callback {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Response, Frontier) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |response, frontier| Box::pin(f(response, frontier))))
    }

    /// A callback that ignores the response.
    pub fn noop() -> Self {
        Self::new(|_, _| async { Ok(()) })
    }

    pub(crate) fn invoke(&self, response: Response, frontier: Frontier) -> CallbackFuture {
        (self.0)(response, frontier)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// Payload sent with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Sent as `application/x-www-form-urlencoded`.
    Form(Value),
    /// Sent as `application/json`.
    Json(Value),
}

impl RequestBody {
    pub fn value(&self) -> &Value {
        match self {
            RequestBody::Form(v) | RequestBody::Json(v) => v,
        }
    }
}

/// A single unit of crawl work.
#[derive(Debug, Clone)]
pub struct Request {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<RequestBody>,
    encoding: Option<String>,
    target_key: String,
    callback: Callback,
}

impl Request {
    /// Creates a `GET` request for `url`.
    pub fn new(mut url: Url, callback: Callback) -> Self {
        url.set_fragment(None);
        let target_key = target_key(&url, None);
        Request {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            encoding: None,
            target_key,
            callback,
        }
    }

    /// Parses `url` and creates a `GET` request for it.
    pub fn parse(url: &str, callback: Callback) -> Result<Self, CrawlError> {
        Ok(Self::new(Url::parse(url)?, callback))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attaches a form payload. The payload takes part in the request identity.
    pub fn with_form(self, data: Value) -> Self {
        self.with_body(RequestBody::Form(data))
    }

    /// Attaches a JSON payload. The payload takes part in the request identity.
    pub fn with_json(self, data: Value) -> Self {
        self.with_body(RequestBody::Json(data))
    }

    fn with_body(mut self, body: RequestBody) -> Self {
        self.target_key = target_key(&self.url, Some(body.value()));
        self.body = Some(body);
        self
    }

    /// Charset used to decode the response body, overriding the one the server declares.
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Adds every header of `defaults` the request does not set itself.
    pub(crate) fn with_default_headers(mut self, defaults: &HeaderMap) -> Self {
        for (name, value) in defaults {
            if !self.headers.contains_key(name) {
                self.headers.insert(name.clone(), value.clone());
            }
        }
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// The identity used for deduplication.
    ///
    /// URLs that differ only in their fragment, such as `/a#x` and `/a#y`, share a
    /// key on purpose: the fragment never reaches the server.
    pub fn target_key(&self) -> &str {
        &self.target_key
    }

    pub fn callback(&self) -> &Callback {
        &self.callback
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.target_key == other.target_key
    }
}

impl Eq for Request {}

impl Hash for Request {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target_key.hash(state);
    }
}

fn target_key(url: &Url, data: Option<&Value>) -> String {
    match data {
        None | Some(Value::Null) => url.to_string(),
        Some(value) => {
            let mut key = url.to_string();
            key.push(' ');
            write_canonical(value, &mut key);
            key
        }
    }
}

/// Renders `value` as JSON with object keys sorted at every level.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (idx, (k, v)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, v) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
