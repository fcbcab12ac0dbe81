//! Transport abstraction.
//!
//! The [`Transport`] trait is the seam between the request pipeline and the
//! network. `courier` ships a hyper/rustls implementation; tests and custom
//! stacks can plug in their own.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::{Response, Result, TransportRequest};

/// Boxed future returned by [`Transport::execute`].
pub type TransportFuture = Pin<Box<dyn Future<Output = Result<Response<Bytes>>> + Send>>;

/// Executes encoded requests.
///
/// The trait is object safe so a client can hold any implementation as
/// `Arc<dyn Transport>`. Implementations should:
/// - resolve exactly once per call
/// - return non-2xx responses as `Ok`, validation happens in the client
/// - map network failures to [`Error::Connection`](crate::Error::Connection),
///   [`Error::Tls`](crate::Error::Tls) or [`Error::Timeout`](crate::Error::Timeout)
///
/// Dropping the returned future cancels the call.
pub trait Transport: Send + Sync {
    /// Execute a request and return the buffered response.
    fn execute(&self, request: TransportRequest) -> TransportFuture;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn execute(&self, request: TransportRequest) -> TransportFuture {
        (**self).execute(request)
    }
}

/// Extension trait for [`Transport`] with convenience methods.
pub trait TransportExt: Transport {
    /// Execute a GET request.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the request fails.
    fn get(&self, url: &str) -> impl Future<Output = Result<Response<Bytes>>> + Send {
        let request = url::Url::parse(url)
            .map(|url| TransportRequest::builder(crate::Method::Get, url).build())
            .map_err(crate::Error::from);
        let call = request.map(|request| self.execute(request));
        async move { call?.await }
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}
