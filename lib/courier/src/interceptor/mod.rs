//! Request interceptors.
//!
//! An interceptor observes every call a [`Client`](crate::Client) makes and may
//! step in when one fails:
//!
//! - [`will_launch_request`](RequestInterceptor::will_launch_request) runs
//!   before the transport call and may mutate the outgoing request.
//! - [`request_succeeded`](RequestInterceptor::request_succeeded) observes a
//!   successful call.
//! - [`request_failed`](RequestInterceptor::request_failed) receives the
//!   failure and a [`Completion`] that settles the caller's promise.
//!
//! Available interceptors:
//!
//! | Interceptor | Purpose |
//! |-------------|---------|
//! | [`MultiRequestInterceptor`] | Fans every hook out to an ordered list |
//! | [`BasicRequestInterceptor`] | Renews a session on 401 and replays queued calls |
//! | [`RequestLogger`] | Formats request records and keeps recent packets |

mod basic;
mod logger;
mod multi;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;

pub use self::basic::{BasicRequestInterceptor, RenewalState};
pub use self::logger::{LogLevel, LogSink, MAX_PACKETS, RequestLogger, RequestPacket, TracingSink};
pub use self::multi::MultiRequestInterceptor;

use crate::{EndpointInfo, Error, RequestFailure, ResponseMeta, TransportRequest, WeakClient};

/// Hooks invoked around every request a client makes.
///
/// All hooks have no-op defaults. The default
/// [`request_failed`](Self::request_failed) drops the completion, which
/// propagates the failure unchanged.
pub trait RequestInterceptor: Send + Sync {
    /// Called when the interceptor becomes a client's default interceptor.
    ///
    /// The reference is weak: keep it as is to avoid a cycle with the client.
    fn attach(&self, client: &WeakClient) {
        let _ = client;
    }

    /// Called before the request goes to the transport.
    fn will_launch_request(&self, request: &mut TransportRequest, endpoint: &EndpointInfo) {
        let _ = (request, endpoint);
    }

    /// Called after the response was decoded and the promise fulfilled.
    fn request_succeeded(
        &self,
        request: &TransportRequest,
        endpoint: &EndpointInfo,
        data: &Bytes,
        response: &ResponseMeta,
    ) {
        let _ = (request, endpoint, data, response);
    }

    /// Called when the call failed, with the completion of the caller's promise.
    ///
    /// Settle the completion to recover, or drop it to propagate the failure.
    fn request_failed(
        &self,
        request: &TransportRequest,
        endpoint: &EndpointInfo,
        failure: &RequestFailure,
        completion: Completion,
    ) {
        let _ = (request, endpoint, failure, completion);
    }
}

impl<I: RequestInterceptor + ?Sized> RequestInterceptor for Arc<I> {
    fn attach(&self, client: &WeakClient) {
        (**self).attach(client);
    }

    fn will_launch_request(&self, request: &mut TransportRequest, endpoint: &EndpointInfo) {
        (**self).will_launch_request(request, endpoint);
    }

    fn request_succeeded(
        &self,
        request: &TransportRequest,
        endpoint: &EndpointInfo,
        data: &Bytes,
        response: &ResponseMeta,
    ) {
        (**self).request_succeeded(request, endpoint, data, response);
    }

    fn request_failed(
        &self,
        request: &TransportRequest,
        endpoint: &EndpointInfo,
        failure: &RequestFailure,
        completion: Completion,
    ) {
        (**self).request_failed(request, endpoint, failure, completion);
    }
}

// ============================================================================
// Completion
// ============================================================================

/// The settling side of the promise behind a failed call.
pub(crate) trait Settle: Send + Sync {
    fn reject(&self, error: Error);
    fn resolve(&self, body: Bytes, response: ResponseMeta);
    fn replay(&self);
}

struct CompletionInner {
    sink: Box<dyn Settle>,
    failure: RequestFailure,
    settled: AtomicBool,
}

impl CompletionInner {
    fn claim(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }
}

impl Drop for CompletionInner {
    fn drop(&mut self) {
        if self.claim() {
            self.sink.reject(Error::from(self.failure.clone()));
        }
    }
}

/// Settles the promise of a failed call.
///
/// Clones share one completion, and only the first settle takes effect.
/// Dropping every clone without settling rejects the promise with the original
/// failure.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<CompletionInner>,
}

impl Completion {
    pub(crate) fn new(sink: Box<dyn Settle>, failure: RequestFailure) -> Self {
        Self {
            inner: Arc::new(CompletionInner {
                sink,
                failure,
                settled: AtomicBool::new(false),
            }),
        }
    }

    /// The failure that triggered the interceptor.
    #[must_use]
    pub fn failure(&self) -> &RequestFailure {
        &self.inner.failure
    }

    /// Returns `true` once the completion has been settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::Acquire)
    }

    /// Rejects the promise with `error`.
    pub fn reject(&self, error: Error) -> bool {
        let claimed = self.inner.claim();
        if claimed {
            self.inner.sink.reject(error);
        }
        claimed
    }

    /// Rejects the promise with the original failure.
    pub fn propagate(&self) -> bool {
        self.reject(Error::from(self.inner.failure.clone()))
    }

    /// Recovers with a substitute response body.
    ///
    /// The body goes through the endpoint's serializer; a serializer failure
    /// rejects the promise.
    pub fn resolve(&self, body: Bytes, response: ResponseMeta) -> bool {
        let claimed = self.inner.claim();
        if claimed {
            self.inner.sink.resolve(body, response);
        }
        claimed
    }

    /// Issues the original call again and settles the promise with its outcome.
    pub fn replay(&self) -> bool {
        let claimed = self.inner.claim();
        if claimed {
            self.inner.sink.replay();
        }
        claimed
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("failure", &self.inner.failure)
            .field("settled", &self.is_settled())
            .finish()
    }
}
