//! Client configuration types.
//!
//! [`Configuration`] supplies the base URL and headers of each call;
//! [`TransportConfig`] tunes the hyper transport.

use std::collections::HashMap;
use std::time::Duration;

use url::Url;

use crate::{EndpointInfo, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Base URL, static headers and access token applied to every call.
///
/// ```
/// use courier::{Configuration, Endpoint, Method};
///
/// let configuration = Configuration::parse("https://api.example.com/v1/")
///     .unwrap()
///     .with_header("X-Source", "cli")
///     .with_access_token("secret");
///
/// let endpoint = Endpoint::<()>::new(Method::Get, "users");
/// let headers = configuration.headers_for(endpoint.info());
/// assert_eq!(headers["Authorization"], "Bearer secret");
/// assert_eq!(configuration.base_url_for(endpoint.info()), Some("https://api.example.com/v1/"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    base_url: Url,
    headers: HashMap<String, String>,
    access_token: Option<String>,
}

impl Configuration {
    /// Creates a configuration for `base_url`.
    ///
    /// Paths are resolved relative to the base URL, so a base URL with a path
    /// prefix needs a trailing slash.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            headers: HashMap::new(),
            access_token: None,
        }
    }

    /// Parses `base_url` and creates a configuration for it.
    pub fn parse(base_url: &str) -> Result<Self> {
        Ok(Self::new(Url::parse(base_url)?))
    }

    /// Adds a static header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Adds static headers.
    #[must_use]
    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        for (name, value) in headers {
            self.set_header(name, value);
        }
        self
    }

    /// Sets the access token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Sets or replaces a static header, ignoring the name's case.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|key, _| !key.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
    }

    /// Sets or clears the access token.
    pub fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token;
    }

    /// The base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The static headers.
    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The access token.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Base URL to encode `endpoint` with.
    ///
    /// Endpoints that carry their own base URL keep it.
    #[must_use]
    pub fn base_url_for(&self, endpoint: &EndpointInfo) -> Option<&str> {
        match endpoint.base_url() {
            Some(_) => None,
            None => Some(self.base_url.as_str()),
        }
    }

    /// Headers to encode `endpoint` with.
    ///
    /// The access token becomes an `Authorization: Bearer` header unless a
    /// static header already sets `Authorization`.
    #[must_use]
    pub fn headers_for(&self, _endpoint: &EndpointInfo) -> HashMap<String, String> {
        let mut headers = self.headers.clone();
        if let Some(token) = &self.access_token
            && !headers.keys().any(|key| key.eq_ignore_ascii_case("authorization"))
        {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        headers
    }
}

// ============================================================================
// Transport configuration
// ============================================================================

/// Configuration of the hyper transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Request timeout duration.
    pub timeout: Duration,
    /// Connection timeout duration.
    pub connect_timeout: Duration,
    /// Maximum idle connections per host.
    pub pool_idle_per_host: usize,
    /// Idle connection timeout.
    pub pool_idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

impl TransportConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }
}

/// Builder for [`TransportConfig`].
#[derive(Debug, Clone, Default)]
pub struct TransportConfigBuilder {
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    pool_idle_per_host: Option<usize>,
    pool_idle_timeout: Option<Duration>,
}

impl TransportConfigBuilder {
    /// Set the request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the maximum idle connections per host.
    #[must_use]
    pub const fn pool_idle_per_host(mut self, count: usize) -> Self {
        self.pool_idle_per_host = Some(count);
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub const fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> TransportConfig {
        let defaults = TransportConfig::default();
        TransportConfig {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            pool_idle_per_host: self
                .pool_idle_per_host
                .unwrap_or(defaults.pool_idle_per_host),
            pool_idle_timeout: self.pool_idle_timeout.unwrap_or(defaults.pool_idle_timeout),
        }
    }
}
