//! Transport-ready requests.
//!
//! A [`TransportRequest`] is what an [`Endpoint`](crate::Endpoint) encodes to:
//! the absolute URL, the merged headers and the materialized body. Interceptors
//! receive it mutably before launch, and the [`Transport`](crate::Transport)
//! executes it.
//!
//! # Example
//!
//! ```
//! use courier_core::{Method, TransportRequest};
//! use bytes::Bytes;
//!
//! let request = TransportRequest::builder(Method::Get, "https://api.example.com".parse().unwrap())
//!     .header("Accept", "application/json")
//!     .query("page", "1")
//!     .build();
//! assert_eq!(request.url().as_str(), "https://api.example.com/?page=1");
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use derive_more::Display;

use crate::Method;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one launched request.
///
/// Every built [`TransportRequest`] gets a fresh id, so two requests to the
/// same URL never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("#{_0}")]
pub struct RequestId(u64);

impl RequestId {
    /// Allocates the next id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// An HTTP request ready to be sent by a transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    id: RequestId,
    method: Method,
    url: url::Url,
    headers: HashMap<String, String>,
    body: Option<Bytes>,
    should_handle_cookies: bool,
}

impl TransportRequest {
    /// Creates a new [`TransportRequestBuilder`].
    #[must_use]
    pub fn builder(method: Method, url: url::Url) -> TransportRequestBuilder {
        TransportRequestBuilder::new(method, url)
    }

    /// Unique id of this request.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request URL.
    #[must_use]
    pub fn url(&self) -> &url::Url {
        &self.url
    }

    /// Mutable access to the URL.
    #[must_use]
    pub fn url_mut(&mut self) -> &mut url::Url {
        &mut self.url
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Mutable access to headers.
    #[must_use]
    pub fn headers_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.headers
    }

    /// Single header value by name, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Sets a header, replacing any existing value regardless of case.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
    }

    /// Removes a header, ignoring ASCII case.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
    }

    /// Request body.
    #[must_use]
    pub const fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Replaces the request body.
    pub fn set_body(&mut self, body: Option<Bytes>) {
        self.body = body;
    }

    /// Whether the transport should send stored cookies.
    #[must_use]
    pub const fn should_handle_cookies(&self) -> bool {
        self.should_handle_cookies
    }

    /// Consume into (method, url, headers, body).
    #[must_use]
    pub fn into_parts(self) -> (Method, url::Url, HashMap<String, String>, Option<Bytes>) {
        (self.method, self.url, self.headers, self.body)
    }
}

/// Builder for constructing [`TransportRequest`] instances.
#[derive(Debug, Clone)]
pub struct TransportRequestBuilder {
    method: Method,
    url: url::Url,
    headers: HashMap<String, String>,
    body: Option<Bytes>,
    should_handle_cookies: bool,
}

impl TransportRequestBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(method: Method, url: url::Url) -> Self {
        Self {
            method,
            url,
            headers: HashMap::new(),
            body: None,
            should_handle_cookies: true,
        }
    }

    /// Sets a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets multiple headers.
    #[must_use]
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Appends a query parameter to the URL.
    #[must_use]
    pub fn query(mut self, name: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the cookie policy.
    #[must_use]
    pub fn should_handle_cookies(mut self, enabled: bool) -> Self {
        self.should_handle_cookies = enabled;
        self
    }

    /// Builds the [`TransportRequest`] with a fresh [`RequestId`].
    #[must_use]
    pub fn build(self) -> TransportRequest {
        TransportRequest {
            id: RequestId::next(),
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            should_handle_cookies: self.should_handle_cookies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> url::Url {
        url::Url::parse("https://api.example.com/users").expect("valid URL")
    }

    #[test]
    fn request_builder_basic() {
        let request = TransportRequest::builder(Method::Get, url())
            .header("Accept", "application/json")
            .build();

        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.url().as_str(), "https://api.example.com/users");
        assert_eq!(request.header("accept"), Some("application/json"));
        assert!(request.body().is_none());
        assert!(request.should_handle_cookies());
    }

    #[test]
    fn every_build_gets_a_new_id() {
        let first = TransportRequest::builder(Method::Get, url()).build();
        let second = TransportRequest::builder(Method::Get, url()).build();

        assert_ne!(first.id(), second.id());
        assert_eq!(first.clone().id(), first.id());
    }

    #[test]
    fn set_header_replaces_any_case() {
        let mut request = TransportRequest::builder(Method::Get, url())
            .header("authorization", "Bearer old")
            .build();

        request.set_header("Authorization", "Bearer new");

        assert_eq!(request.headers().len(), 1);
        assert_eq!(request.header("AUTHORIZATION"), Some("Bearer new"));

        request.remove_header("AuthoriZation");
        assert!(request.headers().is_empty());
    }

    #[test]
    fn request_body() {
        let request = TransportRequest::builder(Method::Post, url())
            .body(Bytes::from_static(b"payload"))
            .should_handle_cookies(false)
            .build();

        assert_eq!(request.body().map(Bytes::as_ref), Some(&b"payload"[..]));
        assert!(!request.should_handle_cookies());
    }
}
