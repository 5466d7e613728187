//! Parsed request view over a header block.

use crate::protocol::HeaderBlock;
use http::Method;

/// A request whose header block has been fully received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    headers: HeaderBlock,
}

impl Request {
    /// Wrap a parsed header block.
    pub fn from_headers(headers: HeaderBlock) -> Self {
        Self { headers }
    }

    /// Create a GET request builder.
    pub fn get(path: &str) -> RequestBuilder {
        RequestBuilder::new(Method::GET, path)
    }

    /// Create a POST request builder.
    pub fn post(path: &str) -> RequestBuilder {
        RequestBuilder::new(Method::POST, path)
    }

    /// Request method, if present and well-formed.
    pub fn method(&self) -> Option<Method> {
        self.headers
            .get(":method")
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
    }

    /// Request path.
    pub fn path(&self) -> Option<&str> {
        self.headers.get(":path")
    }

    /// Request scheme.
    pub fn scheme(&self) -> Option<&str> {
        self.headers.get(":scheme")
    }

    /// Request authority, from `:host` or a plain `host` header.
    pub fn host(&self) -> Option<&str> {
        self.headers.get(":host").or_else(|| self.headers.get("host"))
    }

    /// Declared body length. `None` when absent or not a valid length.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Key used to look the request up in a response cache.
    pub fn cache_key(&self) -> String {
        format!("{}{}", self.host().unwrap_or(""), self.path().unwrap_or(""))
    }

    /// All request headers.
    pub fn headers(&self) -> &HeaderBlock {
        &self.headers
    }
}

/// Builder for constructing requests.
#[derive(Debug)]
pub struct RequestBuilder {
    headers: HeaderBlock,
}

impl RequestBuilder {
    /// Create a new request builder.
    pub fn new(method: Method, path: &str) -> Self {
        let headers = HeaderBlock::new()
            .with(":method", method.as_str())
            .with(":path", path)
            .with(":version", "HTTP/1.1");
        Self { headers }
    }

    /// Set the scheme.
    pub fn scheme(mut self, scheme: &str) -> Self {
        self.headers.insert(":scheme", scheme);
        self
    }

    /// Set the host.
    pub fn host(mut self, host: &str) -> Self {
        self.headers.insert(":host", host);
        self
    }

    /// Add a header to the request.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Build the request headers.
    pub fn build(self) -> HeaderBlock {
        self.headers
    }
}
