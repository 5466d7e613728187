//! Responses and the sources that produce them.

use crate::protocol::{HeaderBlock, Request};
use bytes::Bytes;
use http::StatusCode;
use std::collections::HashMap;

/// Body sent with every error response.
pub const ERROR_RESPONSE_BODY: &[u8] = b"bad";

/// A complete response: header block plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response status code
    status: StatusCode,

    /// Response headers, including `:status` and `:version`
    headers: HeaderBlock,

    /// Response body
    body: Bytes,
}

impl Response {
    /// Create a new response with the given status code.
    pub fn new(status: StatusCode) -> Self {
        let status_line = format!(
            "{} {}",
            status.as_str(),
            status.canonical_reason().unwrap_or("")
        );
        let headers = HeaderBlock::new()
            .with(":status", status_line.trim_end())
            .with(":version", "HTTP/1.1");

        Self {
            status,
            headers,
            body: Bytes::new(),
        }
    }

    /// Create a 200 OK response.
    pub fn ok() -> Self {
        Self::new(StatusCode::OK)
    }

    /// The fixed 500 response sent for malformed or unanswerable requests.
    pub fn error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR)
            .with_body(Bytes::from_static(ERROR_RESPONSE_BODY))
    }

    /// Set the response body and its `content-length`.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.headers
            .insert("content-length", self.body.len().to_string());
        self
    }

    /// Set a header on the response.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderBlock {
        &self.headers
    }

    /// Response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Split into header block and body.
    pub fn into_parts(self) -> (HeaderBlock, Bytes) {
        (self.headers, self.body)
    }
}

/// Result of looking up a request in a [`ResponseSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// No response for this request
    NotFound,
    /// Send this response
    Found(Response),
    /// Close the whole connection without an error
    CloseConnection,
    /// Leave the request unanswered
    IgnoreRequest,
}

/// Produces responses for parsed requests.
pub trait ResponseSource {
    /// Look up the response for `request`.
    fn lookup(&self, request: &Request) -> Lookup;
}

/// Special behaviours that can be registered instead of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialResponse {
    /// Close the connection when this request is received
    CloseConnection,
    /// Never answer this request
    IgnoreRequest,
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Regular(Response),
    Special(SpecialResponse),
}

/// Response source backed by a map of `host + path` to responses.
#[derive(Debug, Default)]
pub struct InMemoryResponseCache {
    responses: HashMap<String, CacheEntry>,
}

impl InMemoryResponseCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response for `host` and `path`.
    pub fn add_response(&mut self, host: &str, path: &str, response: Response) {
        self.insert(host, path, CacheEntry::Regular(response));
    }

    /// Register a response built from a status code and body.
    pub fn add_simple_response(
        &mut self,
        host: &str,
        path: &str,
        status: StatusCode,
        body: impl Into<Bytes>,
    ) {
        self.add_response(host, path, Response::new(status).with_body(body));
    }

    /// Register a special behaviour for `host` and `path`.
    pub fn add_special_response(&mut self, host: &str, path: &str, special: SpecialResponse) {
        self.insert(host, path, CacheEntry::Special(special));
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    fn insert(&mut self, host: &str, path: &str, entry: CacheEntry) {
        let key = format!("{host}{path}");
        if self.responses.insert(key.clone(), entry).is_some() {
            tracing::debug!("Replacing cached response for {}", key);
        }
    }
}

impl ResponseSource for InMemoryResponseCache {
    fn lookup(&self, request: &Request) -> Lookup {
        match self.responses.get(&request.cache_key()) {
            None => Lookup::NotFound,
            Some(CacheEntry::Regular(response)) => Lookup::Found(response.clone()),
            Some(CacheEntry::Special(SpecialResponse::CloseConnection)) => Lookup::CloseConnection,
            Some(CacheEntry::Special(SpecialResponse::IgnoreRequest)) => Lookup::IgnoreRequest,
        }
    }
}
