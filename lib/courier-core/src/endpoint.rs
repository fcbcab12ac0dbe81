//! Endpoint descriptions.
//!
//! An [`Endpoint<T>`] describes one server call: method, base URL, path,
//! parameters, headers and cookie policy. The type parameter `T` is the kind
//! of response the call decodes to; it is never materialized, it only routes
//! the call to the right response serializer.
//!
//! # Example
//!
//! ```
//! use courier_core::{Endpoint, Method};
//! use bytes::Bytes;
//!
//! let endpoint = Endpoint::<Bytes>::new(Method::Get, "https://api.example.com/v1/users/");
//! assert_eq!(endpoint.base_url(), Some("https://api.example.com"));
//! assert_eq!(endpoint.path(), "/v1/users/");
//!
//! let request = endpoint.encode(None, None).expect("encode");
//! assert_eq!(request.url().as_str(), "https://api.example.com/v1/users/");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use url::Url;

use crate::{EndpointParameter, Error, Method, Result, TransportRequest};

/// Characters left as-is in a path: the URL query-allowed set.
const QUERY_ALLOWED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b'-')
    .remove(b'.')
    .remove(b'/')
    .remove(b':')
    .remove(b';')
    .remove(b'=')
    .remove(b'?')
    .remove(b'@')
    .remove(b'_')
    .remove(b'~');

// ============================================================================
// Endpoint Info
// ============================================================================

/// The untyped description of an endpoint.
///
/// Interceptors receive this view, since they handle every response kind.
#[derive(Debug, Clone)]
pub struct EndpointInfo {
    method: Method,
    base_url: Option<String>,
    path: String,
    parameters: Option<EndpointParameter>,
    headers: HashMap<String, String>,
    should_handle_cookies: bool,
}

impl EndpointInfo {
    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Base URL of the endpoint, if it has one of its own.
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Percent-encoded path, relative to the base URL.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Parameters of the call.
    #[must_use]
    pub const fn parameters(&self) -> Option<&EndpointParameter> {
        self.parameters.as_ref()
    }

    /// Headers of the endpoint. An empty value removes the header.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Whether cookies are sent with the call.
    #[must_use]
    pub const fn should_handle_cookies(&self) -> bool {
        self.should_handle_cookies
    }

    /// Encodes the endpoint into a transport-ready request.
    ///
    /// `base_url` wins over the endpoint's own base URL. Headers start from
    /// `headers` and the endpoint's headers overwrite them; an endpoint header
    /// with an empty value removes the key.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingBaseUrl`] if neither base URL is available
    /// - [`Error::InvalidUrl`] if the base URL or the joined URL is invalid
    /// - the parameter encoder's error
    pub fn encode(
        &self,
        base_url: Option<&str>,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<TransportRequest> {
        let base = base_url
            .filter(|url| !url.is_empty())
            .or(self.base_url.as_deref())
            .ok_or_else(|| Error::MissingBaseUrl(self.path.clone()))?;
        let base = Url::parse(base)?;
        let url = if self.path.is_empty() {
            base
        } else {
            base.join(&self.path)?
        };

        let mut merged = headers.cloned().unwrap_or_default();
        for (name, value) in &self.headers {
            merged.retain(|key, _| !key.eq_ignore_ascii_case(name));
            if !value.is_empty() {
                merged.insert(name.clone(), value.clone());
            }
        }

        let request = TransportRequest::builder(self.method, url)
            .headers(merged)
            .should_handle_cookies(self.should_handle_cookies)
            .build();

        match &self.parameters {
            Some(parameters) => parameters.encode(request),
            None => Ok(request),
        }
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Description of one server call, typed by its response kind.
pub struct Endpoint<T> {
    info: Arc<EndpointInfo>,
    _response: PhantomData<fn() -> T>,
}

impl<T> Endpoint<T> {
    /// Creates an endpoint from a method and a path.
    ///
    /// A path that is an absolute URL is split into the base URL
    /// (`scheme://host[:port]`) and the path; a trailing slash is kept.
    #[must_use]
    pub fn new(method: Method, path: &str) -> Self {
        let (base_url, path) = match Url::parse(path) {
            Ok(url) if url.has_host() => split_absolute(&url),
            _ => (None, path.to_string()),
        };

        Self::from_info(EndpointInfo {
            method,
            base_url,
            path: encode_path(&path),
            parameters: None,
            headers: HashMap::new(),
            should_handle_cookies: true,
        })
    }

    /// Creates an endpoint with an explicit base URL.
    ///
    /// An empty base URL means the endpoint has none. Debug builds assert
    /// that `path` is not itself a full URL and that `base_url` parses.
    #[must_use]
    pub fn with_base_url(method: Method, base_url: &str, path: &str) -> Self {
        debug_assert!(
            Url::parse(path).map_or(true, |url| !url.has_host()),
            "invalid path provided to Endpoint: {path}"
        );
        debug_assert!(
            base_url.is_empty() || Url::parse(base_url).is_ok(),
            "invalid base URL provided to Endpoint: {base_url}"
        );

        Self::from_info(EndpointInfo {
            method,
            base_url: (!base_url.is_empty()).then(|| base_url.to_string()),
            path: encode_path(path),
            parameters: None,
            headers: HashMap::new(),
            should_handle_cookies: true,
        })
    }

    fn from_info(info: EndpointInfo) -> Self {
        Self {
            info: Arc::new(info),
            _response: PhantomData,
        }
    }

    fn update(mut self, f: impl FnOnce(&mut EndpointInfo)) -> Self {
        f(Arc::make_mut(&mut self.info));
        self
    }

    /// Sets the parameters.
    #[must_use]
    pub fn with_parameters(self, parameters: EndpointParameter) -> Self {
        self.update(|info| info.parameters = Some(parameters))
    }

    /// Adds headers, replacing existing values.
    #[must_use]
    pub fn with_headers(self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.update(|info| info.headers.extend(headers))
    }

    /// Adds one header. An empty value removes the header from the request.
    #[must_use]
    pub fn with_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.update(|info| {
            info.headers.insert(name.into(), value.into());
        })
    }

    /// Sets the cookie policy.
    #[must_use]
    pub fn with_should_handle_cookies(self, enabled: bool) -> Self {
        self.update(|info| info.should_handle_cookies = enabled)
    }

    /// The untyped description.
    #[must_use]
    pub fn info(&self) -> &EndpointInfo {
        &self.info
    }

    /// Shared handle on the untyped description.
    #[must_use]
    pub fn shared_info(&self) -> Arc<EndpointInfo> {
        Arc::clone(&self.info)
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.info.method
    }

    /// Base URL of the endpoint, if it has one of its own.
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.info.base_url()
    }

    /// Percent-encoded path.
    #[must_use]
    pub fn path(&self) -> &str {
        self.info.path()
    }

    /// Parameters of the call.
    #[must_use]
    pub fn parameters(&self) -> Option<&EndpointParameter> {
        self.info.parameters()
    }

    /// Headers of the endpoint.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        self.info.headers()
    }

    /// Whether cookies are sent with the call.
    #[must_use]
    pub fn should_handle_cookies(&self) -> bool {
        self.info.should_handle_cookies
    }

    /// The same endpoint, decoding the response as raw bytes.
    #[must_use]
    pub fn as_data_endpoint(&self) -> Endpoint<Bytes> {
        self.as_generic_endpoint()
    }

    /// The same endpoint, decoding the response as `U`.
    #[must_use]
    pub fn as_generic_endpoint<U>(&self) -> Endpoint<U> {
        Endpoint {
            info: Arc::clone(&self.info),
            _response: PhantomData,
        }
    }

    /// Encodes the endpoint, see [`EndpointInfo::encode`].
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be resolved or the parameters fail
    /// to encode.
    pub fn encode(
        &self,
        base_url: Option<&str>,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<TransportRequest> {
        self.info.encode(base_url, headers)
    }
}

impl<T> Clone for Endpoint<T> {
    fn clone(&self) -> Self {
        Self {
            info: Arc::clone(&self.info),
            _response: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Endpoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("response", &std::any::type_name::<T>())
            .field("info", &self.info)
            .finish()
    }
}

fn split_absolute(url: &Url) -> (Option<String>, String) {
    let mut base = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        base.push_str(&format!(":{port}"));
    }

    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    (Some(base), path)
}

/// Percent-encodes a path, keeping existing `%XX` escapes.
fn encode_path(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut encoded = String::with_capacity(path.len());
    let mut start = 0;
    let mut index = 0;

    while index < bytes.len() {
        if is_escape(bytes, index) {
            encoded.extend(utf8_percent_encode(
                path.get(start..index).unwrap_or_default(),
                QUERY_ALLOWED,
            ));
            encoded.push_str(path.get(index..index + 3).unwrap_or_default());
            index += 3;
            start = index;
        } else {
            index += 1;
        }
    }
    encoded.extend(utf8_percent_encode(
        path.get(start..).unwrap_or_default(),
        QUERY_ALLOWED,
    ));
    encoded
}

fn is_escape(bytes: &[u8], index: usize) -> bool {
    matches!(
        bytes.get(index..index + 3),
        Some([b'%', high, low]) if high.is_ascii_hexdigit() && low.is_ascii_hexdigit()
    )
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};
    use serde_json::json;

    use super::*;

    #[test]
    fn new_splits_absolute_urls() {
        let endpoint = Endpoint::<()>::new(Method::Get, "https://api.example.com:8443/v1/users");

        check!(endpoint.base_url() == Some("https://api.example.com:8443"));
        check!(endpoint.path() == "/v1/users");
    }

    #[test]
    fn new_keeps_trailing_slash() {
        let endpoint = Endpoint::<()>::new(Method::Get, "https://api.example.com/v1/");
        check!(endpoint.path() == "/v1/");
    }

    #[test]
    fn new_with_relative_path_has_no_base_url() {
        let endpoint = Endpoint::<()>::new(Method::Get, "users/1");

        check!(endpoint.base_url().is_none());
        check!(endpoint.path() == "users/1");
    }

    #[test]
    fn empty_base_url_means_none() {
        let endpoint = Endpoint::<()>::with_base_url(Method::Get, "", "users");
        check!(endpoint.base_url().is_none());
    }

    #[test]
    fn path_is_percent_encoded_once() {
        let endpoint = Endpoint::<()>::new(Method::Get, "search/hello world?q=a|b");
        check!(endpoint.path() == "search/hello%20world?q=a%7Cb");

        let endpoint = Endpoint::<()>::new(Method::Get, "files/a%20b/100%");
        check!(endpoint.path() == "files/a%20b/100%25");
    }

    #[test]
    fn encode_joins_override_base_url() {
        let endpoint = Endpoint::<()>::with_base_url(Method::Get, "https://fallback.example.com", "users");
        let request = endpoint
            .encode(Some("https://api.example.com/v1/"), None)
            .expect("encode");

        check!(request.url().as_str() == "https://api.example.com/v1/users");
        check!(request.method() == Method::Get);
    }

    #[test]
    fn encode_falls_back_to_endpoint_base_url() {
        let endpoint = Endpoint::<()>::with_base_url(Method::Delete, "https://api.example.com", "/users/1");
        let request = endpoint.encode(None, None).expect("encode");

        check!(request.url().as_str() == "https://api.example.com/users/1");
        check!(request.method() == Method::Delete);
    }

    #[test]
    fn encode_empty_path_uses_base_url() {
        let endpoint = Endpoint::<()>::with_base_url(Method::Get, "https://api.example.com/status", "");
        let request = endpoint.encode(None, None).expect("encode");

        check!(request.url().as_str() == "https://api.example.com/status");
    }

    #[test]
    fn encode_without_base_url_fails() {
        let endpoint = Endpoint::<()>::new(Method::Get, "users");

        let_assert!(Err(Error::MissingBaseUrl(path)) = endpoint.encode(None, None));
        check!(path == "users");

        let_assert!(Err(Error::InvalidUrl(_)) = endpoint.encode(Some("not a url"), None));
    }

    #[test]
    fn endpoint_headers_overwrite_and_remove() {
        let defaults: HashMap<String, String> = [
            ("Accept".to_string(), "application/json".to_string()),
            ("X-Client".to_string(), "courier".to_string()),
            ("Authorization".to_string(), "Bearer token".to_string()),
        ]
        .into_iter()
        .collect();

        let endpoint = Endpoint::<()>::new(Method::Get, "https://api.example.com/public")
            .with_header("accept", "text/plain")
            .with_header("Authorization", "");
        let request = endpoint.encode(None, Some(&defaults)).expect("encode");

        check!(request.headers().len() == 2);
        check!(request.header("Accept") == Some("text/plain"));
        check!(request.header("X-Client") == Some("courier"));
        check!(request.header("Authorization").is_none());
    }

    #[test]
    fn encode_applies_parameters_and_cookie_policy() {
        let endpoint = Endpoint::<()>::new(Method::Post, "https://api.example.com/users")
            .with_parameters(EndpointParameter::json(json!({"name": "Alice"})).expect("object"))
            .with_should_handle_cookies(false);
        let request = endpoint.encode(None, None).expect("encode");

        check!(request.header("Content-Type") == Some("application/json"));
        check!(request.body().map(Bytes::as_ref) == Some(&br#"{"name":"Alice"}"#[..]));
        check!(!request.should_handle_cookies());
    }

    #[test]
    fn builders_do_not_affect_clones() {
        let original = Endpoint::<()>::new(Method::Get, "https://api.example.com/users");
        let modified = original.clone().with_header("X-Trace", "1");

        check!(original.headers().is_empty());
        check!(modified.headers().len() == 1);
    }

    #[test]
    fn retyped_endpoints_share_description() {
        let endpoint = Endpoint::<String>::new(Method::Put, "https://api.example.com/users/1")
            .with_header("X-Trace", "1");
        let data = endpoint.as_data_endpoint();
        let generic = endpoint.as_generic_endpoint::<serde_json::Value>();

        check!(data.method() == Method::Put);
        check!(data.path() == endpoint.path());
        check!(generic.headers() == endpoint.headers());
        check!(generic.base_url() == Some("https://api.example.com"));
    }
}
