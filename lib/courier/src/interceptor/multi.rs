use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::{Completion, RequestInterceptor};
use crate::{EndpointInfo, RequestFailure, ResponseMeta, TransportRequest, WeakClient};

/// Runs an ordered list of interceptors.
///
/// Every hook is forwarded to every interceptor, in order. On failure each
/// interceptor receives a clone of the same [`Completion`]: the first one to
/// settle it wins, later settles are ignored. If none settles, the failure
/// propagates.
///
/// ```
/// use courier::{LogLevel, MultiRequestInterceptor, RequestLogger};
///
/// let interceptor = MultiRequestInterceptor::new()
///     .with(RequestLogger::new(LogLevel::Simple))
///     .with(RequestLogger::new(LogLevel::All));
/// assert_eq!(interceptor.len(), 2);
/// ```
#[derive(Default, Clone)]
pub struct MultiRequestInterceptor {
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl MultiRequestInterceptor {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a list from shared interceptors.
    #[must_use]
    pub fn from_shared(interceptors: Vec<Arc<dyn RequestInterceptor>>) -> Self {
        Self { interceptors }
    }

    /// Appends an interceptor.
    #[must_use]
    pub fn with(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Appends a shared interceptor.
    #[must_use]
    pub fn with_shared(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Number of interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns `true` if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl fmt::Debug for MultiRequestInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiRequestInterceptor")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl RequestInterceptor for MultiRequestInterceptor {
    fn attach(&self, client: &WeakClient) {
        for interceptor in &self.interceptors {
            interceptor.attach(client);
        }
    }

    fn will_launch_request(&self, request: &mut TransportRequest, endpoint: &EndpointInfo) {
        for interceptor in &self.interceptors {
            interceptor.will_launch_request(request, endpoint);
        }
    }

    fn request_succeeded(
        &self,
        request: &TransportRequest,
        endpoint: &EndpointInfo,
        data: &Bytes,
        response: &ResponseMeta,
    ) {
        for interceptor in &self.interceptors {
            interceptor.request_succeeded(request, endpoint, data, response);
        }
    }

    fn request_failed(
        &self,
        request: &TransportRequest,
        endpoint: &EndpointInfo,
        failure: &RequestFailure,
        completion: Completion,
    ) {
        for interceptor in &self.interceptors {
            interceptor.request_failed(request, endpoint, failure, completion.clone());
        }
    }
}
