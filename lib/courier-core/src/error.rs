//! Error types for courier.
//!
//! Every failure that can reject a promise is an [`Error`]. Failures that
//! happened after the request reached the network (transport, validation and
//! serialization failures) are wrapped in a [`RequestFailure`] that keeps the
//! raw response bytes and metadata around, so interceptors can decide whether
//! to recover or propagate.

use bytes::Bytes;
use derive_more::{Display, Error, From};

use crate::ResponseMeta;

// ============================================================================
// Error Type
// ============================================================================

/// Main error type for courier operations.
///
/// The error is cheap to clone: one settled value is handed to every
/// continuation registered on a promise.
#[derive(Debug, Clone, Display, Error, From)]
pub enum Error {
    /// HTTP-level errors (non-2xx status codes).
    #[display("HTTP error {status}: {message}")]
    #[from(skip)]
    Http {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
        /// Response body, if available.
        #[error(not(source))]
        body: Option<Bytes>,
    },

    /// Network/connection errors.
    #[display("connection error: {_0}")]
    #[from(skip)]
    Connection(#[error(not(source))] String),

    /// TLS/SSL errors, including trust evaluation failures.
    #[display("TLS error: {_0}")]
    #[from(skip)]
    Tls(#[error(not(source))] String),

    /// Request timeout.
    #[display("request timeout")]
    #[from(skip)]
    Timeout,

    /// The in-flight call was cancelled.
    #[display("request cancelled")]
    #[from(skip)]
    Cancelled,

    /// Invalid request configuration.
    #[display("invalid request: {_0}")]
    #[from(skip)]
    InvalidRequest(#[error(not(source))] String),

    /// Neither the endpoint nor the configuration provided a base URL.
    #[display("no base URL to resolve path '{_0}'")]
    #[from(skip)]
    MissingBaseUrl(#[error(not(source))] String),

    /// URL parsing error.
    #[display("invalid URL: {_0}")]
    #[from]
    InvalidUrl(url::ParseError),

    /// JSON serialization error.
    #[display("JSON serialization error: {_0}")]
    #[from(skip)]
    JsonSerialization(#[error(not(source))] String),

    /// Query string serialization error.
    #[display("query serialization error: {_0}")]
    #[from(skip)]
    QuerySerialization(#[error(not(source))] String),

    /// JSON deserialization error with path context.
    #[display("JSON deserialization error at '{path}': {message}")]
    #[from(skip)]
    JsonDeserialization {
        /// JSON path to the error (e.g., "user.address.city").
        path: String,
        /// Error message.
        message: String,
    },

    /// The response body could not be turned into the expected type.
    #[display("serialization error: {_0}")]
    #[from(skip)]
    Serialization(#[error(not(source))] String),

    /// A successful status came back without a usable body.
    #[display("no response from the server")]
    #[from(skip)]
    NoResponse,

    /// No async runtime was available to drive the request.
    #[display("runtime error: {_0}")]
    #[from(skip)]
    Runtime(#[error(not(source))] String),

    /// The promise was dropped by every producer before it settled.
    #[display("request dropped before completion")]
    #[from(skip)]
    Dropped,

    /// A failure that happened after the request was sent.
    #[display("{_0}")]
    #[from(skip)]
    Request(#[error(source)] Box<RequestFailure>),
}

/// Result type alias using [`crate::Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonSerialization(err.to_string())
    }
}

impl From<serde_html_form::ser::Error> for Error {
    fn from(err: serde_html_form::ser::Error) -> Self {
        Self::QuerySerialization(err.to_string())
    }
}

impl From<RequestFailure> for Error {
    fn from(failure: RequestFailure) -> Self {
        Self::Request(Box::new(failure))
    }
}

impl Error {
    /// Create an HTTP error from status code and message.
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            body: None,
        }
    }

    /// Create an HTTP error with body.
    #[must_use]
    pub fn http_with_body(status: u16, message: impl Into<String>, body: Bytes) -> Self {
        Self::Http {
            status,
            message: message.into(),
            body: Some(body),
        }
    }

    /// Create a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a TLS error.
    #[must_use]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a JSON deserialization error with path context.
    #[must_use]
    pub fn json_deserialization(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JsonDeserialization {
            path: path.into(),
            message: message.into(),
        }
    }

    /// The request failure context, if this error happened after the request was sent.
    #[must_use]
    pub fn failure(&self) -> Option<&RequestFailure> {
        match self {
            Self::Request(failure) => Some(failure),
            _ => None,
        }
    }

    /// The underlying error, looking through any [`RequestFailure`] wrapper.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Request(failure) => failure.error().root(),
            other => other,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout)
    }

    /// Returns `true` if this is a connection error.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self.root(), Self::Connection(_))
    }

    /// Returns `true` if the call was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }

    /// Returns the HTTP status code carried by this error.
    ///
    /// Looks at the validation error first, then at the response attached to
    /// a [`RequestFailure`].
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Request(failure) => failure
                .error()
                .status()
                .or_else(|| failure.response().map(ResponseMeta::status)),
            _ => None,
        }
    }

    /// Returns `true` if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| (400..500).contains(&s))
    }

    /// Returns `true` if this is a server error (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| (500..600).contains(&s))
    }

    /// Returns the response body attached to this error.
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::Http { body, .. } => body.as_ref(),
            Self::Request(failure) => failure.raw_data().or_else(|| failure.error().body()),
            _ => None,
        }
    }

    /// Try to decode the error body as JSON.
    ///
    /// Returns `Some(Ok(value))` if the error has a body and it deserializes successfully,
    /// `Some(Err(error))` if the body exists but deserialization fails,
    /// or `None` if there is no body.
    pub fn decode_body<T: serde::de::DeserializeOwned>(&self) -> Option<Result<T>> {
        self.body().map(|body| crate::from_json(body))
    }
}

// ============================================================================
// Request Failure
// ============================================================================

/// A failed request with the context an interceptor needs to react to it.
#[derive(Debug, Clone, Display, Error)]
#[display("{error}")]
pub struct RequestFailure {
    #[error(source)]
    error: Error,
    raw_data: Option<Bytes>,
    response: Option<ResponseMeta>,
}

impl RequestFailure {
    /// Creates a failure from its parts.
    #[must_use]
    pub fn new(error: Error, raw_data: Option<Bytes>, response: Option<ResponseMeta>) -> Self {
        Self {
            error,
            raw_data,
            response,
        }
    }

    /// The underlying error.
    #[must_use]
    pub const fn error(&self) -> &Error {
        &self.error
    }

    /// The raw bytes returned by the server, if any.
    #[must_use]
    pub fn raw_data(&self) -> Option<&Bytes> {
        self.raw_data.as_ref()
    }

    /// The server response metadata, if the call got that far.
    #[must_use]
    pub fn response(&self) -> Option<&ResponseMeta> {
        self.response.as_ref()
    }

    /// HTTP status of the response, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(ResponseMeta::status)
    }
}
