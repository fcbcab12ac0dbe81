use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{ReentrantMutex, RwLock};

use super::{Completion, RequestInterceptor};
use crate::{
    Client, EndpointInfo, Error, Request, RequestFailure, RequestId, ResponseMeta, TransportRequest,
    WeakClient,
};

type Renew<Token> = Arc<dyn Fn(&Client) -> Request<Token> + Send + Sync>;
type OnRenewed<Token> = Arc<dyn Fn(&Client, Result<&Token, &Error>) + Send + Sync>;

/// Whether a session renewal is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenewalState {
    /// No renewal in flight.
    Idle,
    /// A renewal request is in flight; 401 failures are queued.
    Renewing,
}

struct Renewal<Token> {
    renew: Renew<Token>,
    on_renewed: OnRenewed<Token>,
}

impl<Token> Clone for Renewal<Token> {
    fn clone(&self) -> Self {
        Self {
            renew: Arc::clone(&self.renew),
            on_renewed: Arc::clone(&self.on_renewed),
        }
    }
}

struct State {
    renewing: bool,
    queue: VecDeque<Completion>,
    /// Calls launched on behalf of the renewal.
    renewal_calls: HashSet<RequestId>,
}

type SharedState = Arc<ReentrantMutex<RefCell<State>>>;

/// Renews the session when a call fails with `401 Unauthorized`.
///
/// Every 401 failure is queued. The first one while idle launches the renewal
/// request; once it succeeds, `on_renewed` receives the token (typically to
/// update the client [`Configuration`](crate::Configuration)) and the queued
/// calls are replayed in order. If the renewal fails, `on_renewed` receives the
/// error and every queued call rejects with its own 401 failure.
///
/// `renew` receives a client handle routed through the renewal: every call
/// made with it, including calls chained with [`Request::and_then`], is renewal
/// traffic and a 401 among them fails the renewal instead of being queued.
/// Other failures are propagated unchanged.
///
/// The interceptor must be attached to a client, see
/// [`Client::set_interceptor`](crate::Client::set_interceptor).
///
/// ```no_run
/// use courier::{BasicRequestInterceptor, Client, Endpoint, Json, Method};
///
/// #[derive(serde::Deserialize)]
/// struct Session {
///     token: String,
/// }
///
/// # fn example(client: &Client) {
/// let renewal = BasicRequestInterceptor::with_renewal(
///     |client: &Client| client.task(&Endpoint::<Json<Session>>::new(Method::Post, "session/renew")),
///     |client: &Client, session: Result<&Json<Session>, &courier::Error>| {
///         if let Ok(session) = session {
///             client.configure_with(|configuration| {
///                 configuration.set_access_token(Some(session.token.clone()));
///             });
///         }
///     },
/// );
/// client.set_interceptor(renewal);
/// # }
/// ```
pub struct BasicRequestInterceptor<Token> {
    renewal: Option<Renewal<Token>>,
    client: RwLock<Option<WeakClient>>,
    state: SharedState,
}

impl<Token: Send + Sync + 'static> Default for BasicRequestInterceptor<Token> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Token: Send + Sync + 'static> BasicRequestInterceptor<Token> {
    /// An interceptor without renewal: every failure is propagated.
    #[must_use]
    pub fn new() -> Self {
        Self {
            renewal: None,
            client: RwLock::new(None),
            state: Arc::new(ReentrantMutex::new(RefCell::new(State {
                renewing: false,
                queue: VecDeque::new(),
                renewal_calls: HashSet::new(),
            }))),
        }
    }

    /// An interceptor that renews the session with `renew`.
    pub fn with_renewal<R, C>(renew: R, on_renewed: C) -> Self
    where
        R: Fn(&Client) -> Request<Token> + Send + Sync + 'static,
        C: Fn(&Client, Result<&Token, &Error>) + Send + Sync + 'static,
    {
        Self {
            renewal: Some(Renewal {
                renew: Arc::new(renew),
                on_renewed: Arc::new(on_renewed),
            }),
            ..Self::new()
        }
    }

    /// Current renewal state.
    #[must_use]
    pub fn state(&self) -> RenewalState {
        if self.state.lock().borrow().renewing {
            RenewalState::Renewing
        } else {
            RenewalState::Idle
        }
    }

    /// Number of calls waiting for the renewal to finish.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.lock().borrow().queue.len()
    }

    fn client(&self) -> Option<Client> {
        self.client.read().as_ref().and_then(WeakClient::upgrade)
    }

    fn launch_renewal(&self, renewal: &Renewal<Token>, client: &Client) {
        let traffic = RenewalTraffic {
            state: Arc::downgrade(&self.state),
            inner: client.interceptor().as_ref().map(Arc::downgrade),
        };
        let request = (renewal.renew)(&client.routed_through(Arc::new(traffic)));
        tracing::debug!(url = ?request.current_request().map(|r| r.url().to_string()), "renewing session");

        let on_success = Finish {
            state: Arc::downgrade(&self.state),
            client: client.downgrade(),
            on_renewed: Arc::clone(&renewal.on_renewed),
        };
        let on_failure = on_success.clone();
        request.handle(
            move |success| on_success.renewed(success.data()),
            move |error| on_failure.failed(&error),
        );
    }
}

/// Marks the calls of a renewal, then hands every hook to the client's
/// default interceptor.
struct RenewalTraffic {
    state: Weak<ReentrantMutex<RefCell<State>>>,
    inner: Option<Weak<dyn RequestInterceptor>>,
}

impl RenewalTraffic {
    fn inner(&self) -> Option<Arc<dyn RequestInterceptor>> {
        self.inner.as_ref().and_then(Weak::upgrade)
    }

    fn forget(&self, id: RequestId) {
        if let Some(state) = self.state.upgrade() {
            state.lock().borrow_mut().renewal_calls.remove(&id);
        }
    }
}

impl RequestInterceptor for RenewalTraffic {
    fn will_launch_request(&self, request: &mut TransportRequest, endpoint: &EndpointInfo) {
        if let Some(state) = self.state.upgrade() {
            state.lock().borrow_mut().renewal_calls.insert(request.id());
        }
        if let Some(inner) = self.inner() {
            inner.will_launch_request(request, endpoint);
        }
    }

    fn request_succeeded(
        &self,
        request: &TransportRequest,
        endpoint: &EndpointInfo,
        data: &Bytes,
        response: &ResponseMeta,
    ) {
        self.forget(request.id());
        if let Some(inner) = self.inner() {
            inner.request_succeeded(request, endpoint, data, response);
        }
    }

    fn request_failed(
        &self,
        request: &TransportRequest,
        endpoint: &EndpointInfo,
        failure: &RequestFailure,
        completion: Completion,
    ) {
        match self.inner() {
            Some(inner) => inner.request_failed(request, endpoint, failure, completion),
            None => drop(completion),
        }
        self.forget(request.id());
    }
}

/// Settles the queue once the renewal request finishes.
struct Finish<Token> {
    state: Weak<ReentrantMutex<RefCell<State>>>,
    client: WeakClient,
    on_renewed: OnRenewed<Token>,
}

impl<Token> Clone for Finish<Token> {
    fn clone(&self) -> Self {
        Self {
            state: Weak::clone(&self.state),
            client: self.client.clone(),
            on_renewed: Arc::clone(&self.on_renewed),
        }
    }
}

impl<Token> Finish<Token> {
    fn renewed(&self, token: &Token) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let guard = state.lock();
        let queue = Self::reset(&guard);
        tracing::debug!(queued = queue.len(), "session renewed");

        if let Some(client) = self.client.upgrade() {
            (self.on_renewed)(&client, Ok(token));
        }
        for completion in queue {
            completion.replay();
        }
    }

    fn failed(&self, error: &Error) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let guard = state.lock();
        let queue = Self::reset(&guard);
        tracing::warn!(queued = queue.len(), %error, "session renewal failed");

        if let Some(client) = self.client.upgrade() {
            (self.on_renewed)(&client, Err(error));
        }
        // unsettled completions reject with their own failure
        drop(queue);
    }

    fn reset(state: &RefCell<State>) -> VecDeque<Completion> {
        let mut state = state.borrow_mut();
        state.renewing = false;
        std::mem::take(&mut state.queue)
    }
}

impl<Token: Send + Sync + 'static> RequestInterceptor for BasicRequestInterceptor<Token> {
    fn attach(&self, client: &WeakClient) {
        *self.client.write() = Some(client.clone());
    }

    fn request_failed(
        &self,
        request: &TransportRequest,
        _endpoint: &EndpointInfo,
        failure: &RequestFailure,
        completion: Completion,
    ) {
        let Some(renewal) = &self.renewal else {
            return;
        };
        if failure.status() != Some(401) {
            return;
        }
        let guard = self.state.lock();
        let from_renewal = guard.borrow().renewal_calls.contains(&request.id());
        if from_renewal {
            tracing::debug!(url = %request.url(), "renewal request was unauthorized");
            completion.propagate();
            return;
        }
        let Some(client) = self.client() else {
            tracing::warn!(url = %request.url(), "401 with no attached client, cannot renew the session");
            return;
        };

        let launch = {
            let mut state = guard.borrow_mut();
            state.queue.push_back(completion);
            !std::mem::replace(&mut state.renewing, true)
        };
        if launch {
            self.launch_renewal(renewal, &client);
        }
    }
}

impl<Token> fmt::Debug for BasicRequestInterceptor<Token> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let state = state.borrow();
        f.debug_struct("BasicRequestInterceptor")
            .field("renews", &self.renewal.is_some())
            .field("renewing", &state.renewing)
            .field("queued", &state.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::*;
    use crate::interceptor::tests::{Recorder, Settled, http_failure};
    use crate::{Endpoint, Method};

    fn launch() -> (Endpoint<bytes::Bytes>, TransportRequest) {
        let endpoint = Endpoint::with_base_url(Method::Get, "https://api.example.com/", "me");
        let request = endpoint.encode(None, None).expect("encodes");
        (endpoint, request)
    }

    fn renewing() -> BasicRequestInterceptor<String> {
        BasicRequestInterceptor::with_renewal(
            |_client: &Client| Request::rejected(Error::Timeout),
            |_client: &Client, _token: Result<&String, &Error>| {},
        )
    }

    #[test]
    fn propagates_without_renewal() {
        let interceptor = BasicRequestInterceptor::<String>::new();
        let (endpoint, request) = launch();
        let recorder = Recorder::default();
        let failure = http_failure(401, "https://api.example.com/me");

        interceptor.request_failed(&request, endpoint.info(), &failure, recorder.completion(failure.clone()));

        check!(recorder.events() == [Settled::Rejected("HTTP error 401: failed".to_string())]);
        check!(interceptor.state() == RenewalState::Idle);
    }

    #[test]
    fn propagates_non_401_failures() {
        let interceptor = renewing();
        let (endpoint, request) = launch();
        let recorder = Recorder::default();
        let failure = http_failure(403, "https://api.example.com/me");

        interceptor.request_failed(&request, endpoint.info(), &failure, recorder.completion(failure.clone()));

        check!(recorder.events() == [Settled::Rejected("HTTP error 403: failed".to_string())]);
        check!(interceptor.queued() == 0);
    }

    #[test]
    fn propagates_failures_without_response() {
        let interceptor = renewing();
        let (endpoint, request) = launch();
        let recorder = Recorder::default();
        let failure = RequestFailure::new(Error::connection("reset"), None, None);

        interceptor.request_failed(&request, endpoint.info(), &failure, recorder.completion(failure.clone()));

        check!(recorder.events() == [Settled::Rejected("connection error: reset".to_string())]);
    }

    #[test]
    fn renewal_calls_are_never_queued() {
        let interceptor = renewing();
        let (endpoint, request) = launch();
        interceptor.state.lock().borrow_mut().renewal_calls.insert(request.id());
        let recorder = Recorder::default();
        let failure = http_failure(401, "https://api.example.com/me");

        interceptor.request_failed(&request, endpoint.info(), &failure, recorder.completion(failure.clone()));

        check!(recorder.events() == [Settled::Rejected("HTTP error 401: failed".to_string())]);
        check!(interceptor.queued() == 0);
        check!(interceptor.state() == RenewalState::Idle);
    }

    #[test]
    fn propagates_when_detached() {
        let interceptor = renewing();
        let (endpoint, request) = launch();
        let recorder = Recorder::default();
        let failure = http_failure(401, "https://api.example.com/me");

        interceptor.request_failed(&request, endpoint.info(), &failure, recorder.completion(failure.clone()));

        check!(recorder.events() == [Settled::Rejected("HTTP error 401: failed".to_string())]);
        check!(interceptor.state() == RenewalState::Idle);
    }
}
