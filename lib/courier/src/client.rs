//! The client: endpoints in, request promises out.
//!
//! For every call the client resolves the [`Configuration`], encodes the
//! endpoint, lets the interceptor adjust the request, runs the transport call
//! on the tokio runtime and settles the returned [`Request`]:
//!
//! - encoding failure: the request is rejected right away, nothing is sent
//! - transport failure, non-2xx status or undecodable body: the failure goes
//!   to the interceptor's `request_failed`, or rejects the request when there
//!   is no interceptor
//! - success: the request is fulfilled, then `request_succeeded` runs

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::Instrument;

use crate::interceptor::{Completion, RequestInterceptor, Settle};
use crate::promise::{CallbackQueue, Canceller, Reissue, RequestSuccess, Resolver};
use crate::serializer::{FromResponse, decode};
use crate::{
    ClientTrustManager, Configuration, Endpoint, EndpointInfo, Error, HyperTransport, Request,
    RequestFailure, ResponseMeta, Result, StatusCode, Transport, TransportConfig,
    TransportRequest,
};

struct ClientInner {
    configuration: RwLock<Option<Configuration>>,
    interceptor: RwLock<Option<Arc<dyn RequestInterceptor>>>,
    transport: Arc<dyn Transport>,
    trust_manager: Arc<ClientTrustManager>,
    runtime: Handle,
    callback_queue: CallbackQueue,
}

/// HTTP client issuing [`Request`] promises for [`Endpoint`]s.
///
/// Cloning is cheap and shares the configuration, interceptor and transport.
///
/// # Example
///
/// ```no_run
/// use courier::{Client, Configuration, Endpoint, Json, Method};
///
/// #[derive(Debug, serde::Deserialize)]
/// struct User {
///     name: String,
/// }
///
/// # async fn example() -> courier::Result<()> {
/// let client = Client::builder()
///     .configuration(Configuration::parse("https://api.example.com/")?)
///     .build()?;
///
/// let user = client.task(&Endpoint::<Json<User>>::new(Method::Get, "users/1")).await?;
/// println!("{}", user.data().name);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
    routed_through: Option<Arc<dyn RequestInterceptor>>,
}

/// Non-owning reference to a [`Client`].
#[derive(Clone, Default)]
pub struct WeakClient {
    inner: Weak<ClientInner>,
}

impl WeakClient {
    /// The client, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Client> {
        self.inner.upgrade().map(|inner| Client {
            inner,
            routed_through: None,
        })
    }
}

impl fmt::Debug for WeakClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakClient")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("configuration", &*self.inner.configuration.read())
            .field("interceptor", &self.inner.interceptor.read().is_some())
            .field("routed", &self.routed_through.is_some())
            .field("trust_manager", &self.inner.trust_manager)
            .field("callback_queue", &self.inner.callback_queue)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client with the default transport, on the current tokio runtime.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Replaces the configuration; `None` leaves base URL and headers to the endpoints.
    pub fn configure(&self, configuration: Option<Configuration>) {
        *self.inner.configuration.write() = configuration;
    }

    /// Changes the configuration in place, if there is one.
    pub fn configure_with(&self, change: impl FnOnce(&mut Configuration)) {
        if let Some(configuration) = self.inner.configuration.write().as_mut() {
            change(configuration);
        }
    }

    /// The current configuration.
    #[must_use]
    pub fn configuration(&self) -> Option<Configuration> {
        self.inner.configuration.read().clone()
    }

    /// Sets the default interceptor and attaches it to this client.
    pub fn set_interceptor(&self, interceptor: impl RequestInterceptor + 'static) {
        self.set_shared_interceptor(Arc::new(interceptor));
    }

    /// Sets a shared default interceptor and attaches it to this client.
    pub fn set_shared_interceptor(&self, interceptor: Arc<dyn RequestInterceptor>) {
        interceptor.attach(&self.downgrade());
        *self.inner.interceptor.write() = Some(interceptor);
    }

    /// Removes the default interceptor.
    pub fn clear_interceptor(&self) {
        *self.inner.interceptor.write() = None;
    }

    /// The default interceptor.
    #[must_use]
    pub fn interceptor(&self) -> Option<Arc<dyn RequestInterceptor>> {
        self.inner.interceptor.read().clone()
    }

    /// The trust manager used by the default transport.
    #[must_use]
    pub fn trust_manager(&self) -> &Arc<ClientTrustManager> {
        &self.inner.trust_manager
    }

    /// A non-owning reference to this client.
    #[must_use]
    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// A handle on this client whose calls go through `interceptor` instead
    /// of the default one.
    ///
    /// Configuration, transport and default interceptor stay shared; replays
    /// and retries of its calls keep going through `interceptor`.
    #[must_use]
    pub fn routed_through(&self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            routed_through: Some(interceptor),
        }
    }

    /// Issues a call to `endpoint` through the default interceptor.
    pub fn task<T: FromResponse>(&self, endpoint: &Endpoint<T>) -> Request<T> {
        self.launch(endpoint, self.routed_through.clone())
    }

    /// Issues a call to `endpoint` through `interceptor` instead of the default one.
    pub fn task_with<T: FromResponse>(
        &self,
        endpoint: &Endpoint<T>,
        interceptor: Arc<dyn RequestInterceptor>,
    ) -> Request<T> {
        self.launch(endpoint, Some(interceptor))
    }

    fn launch<T: FromResponse>(
        &self,
        endpoint: &Endpoint<T>,
        interceptor: Option<Arc<dyn RequestInterceptor>>,
    ) -> Request<T> {
        let info = endpoint.shared_info();
        let reissue = self.reissue(endpoint, interceptor.clone());

        let encoded = {
            let configuration = self.inner.configuration.read();
            let base_url = configuration.as_ref().and_then(|c| c.base_url_for(&info));
            let headers = configuration.as_ref().map(|c| c.headers_for(&info));
            info.encode(base_url, headers.as_ref())
        };
        let mut request = match encoded {
            Ok(request) => request,
            Err(error) => {
                tracing::debug!(path = info.path(), %error, "endpoint encoding failed");
                let rejected = Request::rejected_on(self.inner.callback_queue.clone(), error);
                rejected.set_link(None, None, Some(reissue));
                return rejected;
            }
        };

        let interceptor = interceptor.or_else(|| self.interceptor());
        if let Some(interceptor) = &interceptor {
            interceptor.will_launch_request(&mut request, &info);
        }

        let (promise, resolver) = Request::pending_on(self.inner.callback_queue.clone());
        let cancel = Arc::new(Notify::new());
        let canceller: Canceller = {
            let cancel = Arc::clone(&cancel);
            Arc::new(move || cancel.notify_one())
        };
        promise.set_link(Some(request.clone()), Some(canceller), Some(Arc::clone(&reissue)));

        let call = Call {
            transport: Arc::clone(&self.inner.transport),
            interceptor,
            endpoint: info,
            request,
            cancel,
            sink: PromiseSink {
                resolver,
                target: promise.clone(),
                reissue,
            },
        };
        self.inner.runtime.spawn(call.run());
        promise
    }

    fn reissue<T: FromResponse>(
        &self,
        endpoint: &Endpoint<T>,
        interceptor: Option<Arc<dyn RequestInterceptor>>,
    ) -> Reissue<T> {
        let client = self.downgrade();
        let endpoint = endpoint.clone();
        let queue = self.inner.callback_queue.clone();
        Arc::new(move || match client.upgrade() {
            Some(client) => client.launch(&endpoint, interceptor.clone()),
            None => Request::rejected_on(queue.clone(), Error::Runtime("client dropped".to_string())),
        })
    }
}

// ============================================================================
// Call
// ============================================================================

/// Settles the promise of one call, and replays it on demand.
struct PromiseSink<T> {
    resolver: Resolver<T>,
    target: Request<T>,
    reissue: Reissue<T>,
}

impl<T: FromResponse> Settle for PromiseSink<T> {
    fn reject(&self, error: Error) {
        self.resolver.reject(error);
    }

    fn resolve(&self, body: Bytes, response: ResponseMeta) {
        match decode::<T>(&body, &response) {
            Ok(data) => {
                self.resolver.resolve(RequestSuccess::new(data, body, response));
            }
            Err(error) => {
                let failure = RequestFailure::new(error, Some(body), Some(response));
                self.resolver.reject(failure.into());
            }
        }
    }

    fn replay(&self) {
        let next = (self.reissue)();
        self.target.adopt(&next);
        next.forward_to(self.resolver.clone());
    }
}

struct Call<T> {
    transport: Arc<dyn Transport>,
    interceptor: Option<Arc<dyn RequestInterceptor>>,
    endpoint: Arc<EndpointInfo>,
    request: TransportRequest,
    cancel: Arc<Notify>,
    sink: PromiseSink<T>,
}

impl<T: FromResponse> Call<T> {
    async fn run(self) {
        let span = tracing::debug_span!(
            "courier.request",
            id = %self.request.id(),
            method = %self.request.method(),
            url = %self.request.url(),
        );

        let exchange = async {
            tokio::select! {
                biased;
                () = self.cancel.notified() => Err(Error::Cancelled),
                response = self.transport.execute(self.request.clone()) => response,
            }
        };
        let outcome = exchange.instrument(span.clone()).await;
        let _entered = span.enter();

        match self.validate(outcome) {
            Ok((data, body, meta)) => {
                tracing::debug!(status = meta.status(), "request succeeded");
                self.sink
                    .resolver
                    .resolve(RequestSuccess::new(data, body.clone(), meta.clone()));
                if let Some(interceptor) = &self.interceptor {
                    interceptor.request_succeeded(&self.request, &self.endpoint, &body, &meta);
                }
            }
            Err(failure) => {
                tracing::debug!(status = ?failure.status(), error = %failure, "request failed");
                self.fail(failure);
            }
        }
    }

    fn validate(
        &self,
        outcome: Result<crate::Response<Bytes>>,
    ) -> std::result::Result<(T, Bytes, ResponseMeta), RequestFailure> {
        let response = outcome.map_err(|error| RequestFailure::new(error, None, None))?;
        let (meta, body) = response.into_parts(self.request.url().clone());

        if !meta.is_success() {
            let reason = StatusCode::from_u16(meta.status())
                .ok()
                .and_then(|status| status.canonical_reason())
                .unwrap_or("Unknown Status");
            let error = Error::http_with_body(meta.status(), reason, body.clone());
            return Err(RequestFailure::new(error, Some(body), Some(meta)));
        }

        match decode::<T>(&body, &meta) {
            Ok(data) => Ok((data, body, meta)),
            Err(error) => Err(RequestFailure::new(error, Some(body), Some(meta))),
        }
    }

    fn fail(self, failure: RequestFailure) {
        let Self {
            interceptor,
            endpoint,
            request,
            sink,
            ..
        } = self;
        match interceptor {
            Some(interceptor) => {
                let completion = Completion::new(Box::new(sink), failure.clone());
                interceptor.request_failed(&request, &endpoint, &failure, completion);
            }
            None => {
                sink.resolver.reject(failure.into());
            }
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    transport_config: Option<TransportConfig>,
    configuration: Option<Configuration>,
    interceptor: Option<Arc<dyn RequestInterceptor>>,
    trust_manager: Option<Arc<ClientTrustManager>>,
    runtime: Option<Handle>,
    callback_queue: CallbackQueue,
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("custom_transport", &self.transport.is_some())
            .field("transport_config", &self.transport_config)
            .field("configuration", &self.configuration)
            .field("interceptor", &self.interceptor.is_some())
            .field("trust_manager", &self.trust_manager)
            .field("callback_queue", &self.callback_queue)
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Use a custom transport instead of [`HyperTransport`].
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Configure the default [`HyperTransport`].
    #[must_use]
    pub fn transport_config(mut self, config: TransportConfig) -> Self {
        self.transport_config = Some(config);
        self
    }

    /// Set the initial configuration.
    #[must_use]
    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// Set the default interceptor.
    #[must_use]
    pub fn interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptor = Some(Arc::new(interceptor));
        self
    }

    /// Set a shared default interceptor.
    #[must_use]
    pub fn shared_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Set the trust manager of the default transport.
    #[must_use]
    pub fn trust_manager(mut self, trust_manager: Arc<ClientTrustManager>) -> Self {
        self.trust_manager = Some(trust_manager);
        self
    }

    /// Run calls on `runtime` instead of the current runtime.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Where promise continuations run.
    #[must_use]
    pub fn callback_queue(mut self, queue: CallbackQueue) -> Self {
        self.callback_queue = queue;
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// - [`Error::Runtime`] without a runtime handle outside of a tokio runtime
    /// - the transport construction error
    pub fn build(self) -> Result<Client> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|err| Error::Runtime(err.to_string()))?,
        };
        let trust_manager = self.trust_manager.unwrap_or_default();
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HyperTransport::builder()
                    .config(&self.transport_config.unwrap_or_default())
                    .trust_manager(Arc::clone(&trust_manager))
                    .build()?,
            ),
        };

        let client = Client {
            inner: Arc::new(ClientInner {
                configuration: RwLock::new(self.configuration),
                interceptor: RwLock::new(None),
                transport,
                trust_manager,
                runtime,
                callback_queue: self.callback_queue,
            }),
            routed_through: None,
        };
        if let Some(interceptor) = self.interceptor {
            client.set_shared_interceptor(interceptor);
        }
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    use assert2::{check, let_assert};
    use parking_lot::Mutex;

    use super::*;
    use crate::{Json, Method, RequestState, Response, TransportFuture};

    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<Response<Bytes>>>>,
        seen: Mutex<Vec<TransportRequest>>,
        hang: bool,
    }

    impl Scripted {
        fn replying(responses: impl IntoIterator<Item = Result<Response<Bytes>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().collect()),
                ..Self::default()
            })
        }

        fn seen(&self) -> Vec<TransportRequest> {
            self.seen.lock().clone()
        }
    }

    impl Transport for Scripted {
        fn execute(&self, request: TransportRequest) -> TransportFuture {
            self.seen.lock().push(request);
            if self.hang {
                return Box::pin(std::future::pending());
            }
            let response = self
                .responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(Error::connection("no scripted response")));
            Box::pin(async move { response })
        }
    }

    fn ok(body: &'static str) -> Result<Response<Bytes>> {
        Ok(Response::new(200, HashMap::new(), Bytes::from_static(body.as_bytes())))
    }

    fn client(transport: Arc<Scripted>) -> Client {
        Client::builder()
            .transport(transport)
            .configuration(Configuration::parse("https://api.example.com/v1/").expect("valid URL"))
            .build()
            .expect("client")
    }

    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct Item {
        id: u32,
    }

    #[tokio::test]
    async fn applies_configuration_and_decodes() {
        let transport = Scripted::replying([ok(r#"{"id": 7}"#)]);
        let client = client(Arc::clone(&transport));
        client.configure_with(|configuration| configuration.set_access_token(Some("t0k".to_string())));

        let success = client
            .task(&Endpoint::<Json<Item>>::new(Method::Get, "items/7"))
            .await
            .expect("fulfilled");

        check!(success.data().0 == Item { id: 7 });
        let seen = transport.seen();
        check!(seen[0].url().as_str() == "https://api.example.com/v1/items/7");
        check!(seen[0].header("authorization") == Some("Bearer t0k"));
    }

    #[tokio::test]
    async fn encoding_failure_never_reaches_the_transport() {
        let transport = Scripted::replying([]);
        let client = Client::builder().transport(Arc::clone(&transport)).build().expect("client");

        let request = client.task(&Endpoint::<Bytes>::new(Method::Get, "relative/path"));

        check!(request.state() == RequestState::Rejected);
        let_assert!(Err(Error::MissingBaseUrl(path)) = request.await);
        check!(path == "relative/path");
        check!(transport.seen().is_empty());
    }

    #[tokio::test]
    async fn non_success_status_rejects_with_body() {
        let transport = Scripted::replying([Ok(Response::new(
            404,
            HashMap::new(),
            Bytes::from_static(br#"{"error":"missing"}"#),
        ))]);
        let client = client(transport);

        let error = client
            .task(&Endpoint::<Json<Item>>::new(Method::Get, "items/1"))
            .await
            .expect_err("rejected");

        check!(error.status() == Some(404));
        let_assert!(Some(failure) = error.failure());
        let_assert!(Error::Http { message, .. } = failure.error());
        check!(message == "Not Found");
        check!(error.body() == Some(&Bytes::from_static(br#"{"error":"missing"}"#)));
    }

    #[tokio::test]
    async fn empty_body_for_a_model_is_no_response() {
        let transport = Scripted::replying([ok(""), ok("")]);
        let client = client(transport);

        let error = client
            .task(&Endpoint::<Json<Item>>::new(Method::Get, "items/1"))
            .await
            .expect_err("rejected");
        check!(matches!(error.root(), Error::NoResponse));

        let unit = client.task(&Endpoint::<()>::new(Method::Delete, "items/1")).await;
        check!(unit.is_ok());
    }

    #[tokio::test]
    async fn interceptor_can_recover_a_failure() {
        struct Fallback;

        impl RequestInterceptor for Fallback {
            fn request_failed(
                &self,
                _request: &TransportRequest,
                _endpoint: &EndpointInfo,
                failure: &RequestFailure,
                completion: Completion,
            ) {
                let response = failure.response().cloned().expect("response");
                completion.resolve(Bytes::from_static(br#"{"id": 0}"#), response);
            }
        }

        let transport = Scripted::replying([Ok(Response::new(503, HashMap::new(), Bytes::new()))]);
        let client = client(transport);

        let success = client
            .task_with(&Endpoint::<Json<Item>>::new(Method::Get, "items/1"), Arc::new(Fallback))
            .await
            .expect("recovered");
        check!(success.data().id == 0);
        check!(success.response().status() == 503);
    }

    #[tokio::test]
    async fn cancel_rejects_through_the_failure_path() {
        let transport = Arc::new(Scripted {
            hang: true,
            ..Scripted::default()
        });
        let client = client(transport);

        let request = client.task(&Endpoint::<Bytes>::new(Method::Get, "slow"));
        request.cancel();

        let error = tokio::time::timeout(Duration::from_secs(5), request)
            .await
            .expect("settled")
            .expect_err("cancelled");
        check!(error.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_retry_sends_one_request() {
        let transport = Arc::new(Scripted {
            hang: true,
            ..Scripted::default()
        });
        let client = client(Arc::clone(&transport));

        let request = client.task(&Endpoint::<Bytes>::new(Method::Get, "slow")).retry(3);
        request.cancel();

        let error = tokio::time::timeout(Duration::from_secs(5), request)
            .await
            .expect("settled")
            .expect_err("cancelled");
        check!(error.is_cancelled());
        tokio::time::sleep(Duration::from_millis(20)).await;
        check!(transport.seen().len() == 1);
    }

    #[tokio::test]
    async fn routed_handle_keeps_its_interceptor_across_retries() {
        struct Route(&'static str);

        impl RequestInterceptor for Route {
            fn will_launch_request(&self, request: &mut TransportRequest, _endpoint: &EndpointInfo) {
                request.set_header("X-Route", self.0);
            }
        }

        let transport = Scripted::replying([Err(Error::connection("reset")), ok("a"), ok("b")]);
        let client = client(Arc::clone(&transport));
        client.set_interceptor(Route("default"));
        let routed = client.routed_through(Arc::new(Route("renewal")));

        let endpoint = Endpoint::<String>::new(Method::Get, "session");
        let success = routed.task(&endpoint).retry(2).await.expect("second attempt");
        check!(success.data() == "a");
        let plain = client.task(&endpoint).await.expect("fulfilled");
        check!(plain.data() == "b");

        let routes: Vec<_> = transport
            .seen()
            .iter()
            .map(|request| request.header("x-route").map(str::to_string))
            .collect();
        check!(
            routes
                == [
                    Some("renewal".to_string()),
                    Some("renewal".to_string()),
                    Some("default".to_string()),
                ]
        );
    }

    #[tokio::test]
    async fn current_request_reflects_the_launch() {
        let transport = Scripted::replying([ok("done")]);
        let client = client(transport);

        let request = client.task(&Endpoint::<String>::new(Method::Get, "status"));
        let_assert!(Some(current) = request.current_request());
        check!(current.url().as_str() == "https://api.example.com/v1/status");

        let success = request.await.expect("fulfilled");
        check!(success.data() == "done");
    }

    #[tokio::test]
    async fn reissue_after_client_drop_rejects() {
        let transport = Scripted::replying([Err(Error::connection("reset"))]);
        let request = {
            let client = client(transport);
            client.task(&Endpoint::<Bytes>::new(Method::Get, "flaky"))
        };

        let error = request.retry(2).await.expect_err("rejected");
        check!(matches!(error, Error::Runtime(_)));
    }

    #[test]
    fn build_requires_a_runtime() {
        let_assert!(Err(Error::Runtime(_)) = Client::builder().transport(Scripted::replying([])).build());
    }
}
