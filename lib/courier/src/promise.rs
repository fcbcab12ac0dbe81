//! The request promise.
//!
//! A [`Request<T>`] is a cheap handle on a single-settlement result: it starts
//! pending and settles exactly once, either fulfilled with a
//! [`RequestSuccess<T>`] or rejected with an [`Error`]. Continuations
//! registered with [`then`](Request::then), [`catch`](Request::catch) and
//! [`handle`](Request::handle) fire once, in registration order.
//!
//! Requests created by a [`Client`](crate::Client) also remember how to cancel
//! the in-flight call and how to issue the same call again, which is what
//! [`retry`](Request::retry) builds on.
//!
//! ```
//! use courier::{Request, RequestSuccess};
//! use std::time::Duration;
//!
//! let (request, resolver) = Request::<u32>::pending();
//! request.then(|success| assert_eq!(*success.data(), 42));
//!
//! let url = "https://api.example.com/answer".parse().unwrap();
//! resolver.resolve(RequestSuccess::new(42, Default::default(), courier::ResponseMeta::new(200, Default::default(), url)));
//!
//! let success = request.wait(Duration::from_secs(1)).unwrap().unwrap();
//! assert_eq!(*success.data(), 42);
//! ```

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::{Error, ResponseMeta, Result, TransportRequest};

type Waiter<T> = Box<dyn FnOnce(Result<RequestSuccess<T>>) + Send>;
type Dispatch<T> = fn(&CallbackQueue, Vec<Waiter<T>>, Result<RequestSuccess<T>>);

/// Cancels the in-flight call backing a request.
pub(crate) type Canceller = Arc<dyn Fn() + Send + Sync>;

/// Issues the same call again, producing a fresh request.
pub(crate) type Reissue<T> = Arc<dyn Fn() -> Request<T> + Send + Sync>;

// ============================================================================
// Success value
// ============================================================================

/// A fulfilled request: the decoded data, the raw bytes and the response.
pub struct RequestSuccess<T> {
    data: Arc<T>,
    raw_data: Bytes,
    response: Arc<ResponseMeta>,
}

impl<T> RequestSuccess<T> {
    /// Creates a success value.
    pub fn new(data: T, raw_data: Bytes, response: ResponseMeta) -> Self {
        Self {
            data: Arc::new(data),
            raw_data,
            response: Arc::new(response),
        }
    }

    /// The decoded data.
    #[must_use]
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Shared handle on the decoded data.
    #[must_use]
    pub fn shared_data(&self) -> Arc<T> {
        Arc::clone(&self.data)
    }

    /// The raw response bytes.
    #[must_use]
    pub fn raw_data(&self) -> &Bytes {
        &self.raw_data
    }

    /// The response metadata.
    #[must_use]
    pub fn response(&self) -> &ResponseMeta {
        &self.response
    }
}

impl<T> Clone for RequestSuccess<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            raw_data: self.raw_data.clone(),
            response: Arc::clone(&self.response),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RequestSuccess<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSuccess")
            .field("data", &self.data)
            .field("raw_data", &self.raw_data.len())
            .field("status", &self.response.status())
            .finish()
    }
}

// ============================================================================
// Callback queue
// ============================================================================

/// Where continuations run once a request settles.
#[derive(Debug, Clone, Default)]
pub enum CallbackQueue {
    /// On the thread that settles the request.
    #[default]
    Immediate,
    /// On a task spawned on the given runtime, one task per settlement.
    Runtime(Handle),
}

fn dispatch<T>(queue: &CallbackQueue, waiters: Vec<Waiter<T>>, result: Result<RequestSuccess<T>>)
where
    T: Send + Sync + 'static,
{
    if waiters.is_empty() {
        return;
    }
    match queue {
        CallbackQueue::Immediate => run_waiters(waiters, &result),
        CallbackQueue::Runtime(handle) => {
            handle.spawn(async move { run_waiters(waiters, &result) });
        }
    }
}

/// Runs `callback` on `queue`, whatever queue the request itself uses.
fn run_on(queue: &CallbackQueue, callback: impl FnOnce() + Send + 'static) {
    match queue {
        CallbackQueue::Immediate => callback(),
        CallbackQueue::Runtime(handle) => {
            handle.spawn(async move { callback() });
        }
    }
}

fn run_waiters<T>(waiters: Vec<Waiter<T>>, result: &Result<RequestSuccess<T>>) {
    for waiter in waiters {
        waiter(result.clone());
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// Settlement state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Fulfilled,
    /// Settled with an error.
    Rejected,
}

enum Outcome<T> {
    Pending(Vec<Waiter<T>>),
    Fulfilled(RequestSuccess<T>),
    Rejected(Error),
}

struct Link<T> {
    current: Option<TransportRequest>,
    canceller: Option<Canceller>,
    reissue: Option<Reissue<T>>,
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            current: self.current.clone(),
            canceller: self.canceller.clone(),
            reissue: self.reissue.clone(),
        }
    }
}

struct Shared<T> {
    outcome: Mutex<Outcome<T>>,
    settled: Condvar,
    queue: CallbackQueue,
    dispatch: Dispatch<T>,
    link: Mutex<Link<T>>,
    cancelled: AtomicBool,
}

impl<T> Shared<T> {
    fn settle(&self, result: Result<RequestSuccess<T>>) -> bool {
        let waiters = {
            let mut outcome = self.outcome.lock();
            let Outcome::Pending(waiters) = &mut *outcome else {
                return false;
            };
            let waiters = std::mem::take(waiters);
            *outcome = match &result {
                Ok(success) => Outcome::Fulfilled(success.clone()),
                Err(error) => Outcome::Rejected(error.clone()),
            };
            waiters
        };
        self.settled.notify_all();
        (self.dispatch)(&self.queue, waiters, result);
        true
    }

    fn subscribe(&self, waiter: Waiter<T>) {
        let mut outcome = self.outcome.lock();
        let settled = match &mut *outcome {
            Outcome::Pending(waiters) => {
                waiters.push(waiter);
                return;
            }
            Outcome::Fulfilled(success) => Ok(success.clone()),
            Outcome::Rejected(error) => Err(error.clone()),
        };
        drop(outcome);
        (self.dispatch)(&self.queue, vec![waiter], settled);
    }
}

// ============================================================================
// Resolver
// ============================================================================

struct ResolverInner<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Drop for ResolverInner<T> {
    fn drop(&mut self) {
        self.shared.settle(Err(Error::Dropped));
    }
}

/// The settling side of a pending [`Request`].
///
/// The first call to [`resolve`](Self::resolve) or [`reject`](Self::reject)
/// wins; later calls return `false`. Dropping every clone without settling
/// rejects the request with [`Error::Dropped`].
pub struct Resolver<T> {
    inner: Arc<ResolverInner<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl<T> Resolver<T> {
    /// Fulfills the request.
    pub fn resolve(&self, success: RequestSuccess<T>) -> bool {
        self.inner.shared.settle(Ok(success))
    }

    /// Rejects the request.
    pub fn reject(&self, error: Error) -> bool {
        self.inner.shared.settle(Err(error))
    }

    /// Settles the request with a result.
    pub fn settle(&self, result: Result<RequestSuccess<T>>) -> bool {
        self.inner.shared.settle(result)
    }

    /// A handle on the request this resolver settles.
    #[must_use]
    pub fn request(&self) -> Request<T> {
        Request {
            shared: Arc::clone(&self.inner.shared),
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// A cancellable, single-settlement request promise.
///
/// Cloning the handle shares the same promise.
pub struct Request<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Request<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.outcome.lock() {
            Outcome::Pending(_) => RequestState::Pending,
            Outcome::Fulfilled(_) => RequestState::Fulfilled,
            Outcome::Rejected(_) => RequestState::Rejected,
        };
        f.debug_struct("Request")
            .field("response", &std::any::type_name::<T>())
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Request<T> {
    /// Creates a pending request and its resolver.
    ///
    /// Continuations run on the settling thread.
    #[must_use]
    pub fn pending() -> (Self, Resolver<T>) {
        Self::pending_on(CallbackQueue::Immediate)
    }

    /// Creates a pending request whose continuations run on `queue`.
    #[must_use]
    pub fn pending_on(queue: CallbackQueue) -> (Self, Resolver<T>) {
        let shared = Arc::new(Shared {
            outcome: Mutex::new(Outcome::Pending(Vec::new())),
            settled: Condvar::new(),
            queue,
            dispatch: dispatch::<T>,
            link: Mutex::new(Link {
                current: None,
                canceller: None,
                reissue: None,
            }),
            cancelled: AtomicBool::new(false),
        });
        let resolver = Resolver {
            inner: Arc::new(ResolverInner {
                shared: Arc::clone(&shared),
            }),
        };
        (Self { shared }, resolver)
    }

    /// An already fulfilled request.
    #[must_use]
    pub fn fulfilled(success: RequestSuccess<T>) -> Self {
        let (request, resolver) = Self::pending();
        resolver.resolve(success);
        request
    }

    /// An already rejected request.
    #[must_use]
    pub fn rejected(error: Error) -> Self {
        Self::rejected_on(CallbackQueue::Immediate, error)
    }

    pub(crate) fn rejected_on(queue: CallbackQueue, error: Error) -> Self {
        let (request, resolver) = Self::pending_on(queue);
        resolver.reject(error);
        request
    }

    /// Registers a continuation for fulfillment.
    ///
    /// Continuations run on the request's callback queue. One registered after
    /// settlement on the immediate queue runs before `then` returns.
    pub fn then<F>(&self, on_fulfilled: F) -> &Self
    where
        F: FnOnce(RequestSuccess<T>) + Send + 'static,
    {
        self.shared.subscribe(Box::new(move |result| {
            if let Ok(success) = result {
                on_fulfilled(success);
            }
        }));
        self
    }

    /// Registers a continuation for rejection.
    pub fn catch<F>(&self, on_rejected: F) -> &Self
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.shared.subscribe(Box::new(move |result| {
            if let Err(error) = result {
                on_rejected(error);
            }
        }));
        self
    }

    /// Registers one continuation for each outcome; exactly one of them runs.
    pub fn handle<F, E>(&self, on_fulfilled: F, on_rejected: E) -> &Self
    where
        F: FnOnce(RequestSuccess<T>) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        self.shared.subscribe(Box::new(move |result| match result {
            Ok(success) => on_fulfilled(success),
            Err(error) => on_rejected(error),
        }));
        self
    }

    /// Like [`then`](Self::then), running the continuation on `queue`.
    pub fn then_on<F>(&self, queue: CallbackQueue, on_fulfilled: F) -> &Self
    where
        F: FnOnce(RequestSuccess<T>) + Send + 'static,
    {
        self.then(move |success| run_on(&queue, move || on_fulfilled(success)))
    }

    /// Like [`catch`](Self::catch), running the continuation on `queue`.
    pub fn catch_on<F>(&self, queue: CallbackQueue, on_rejected: F) -> &Self
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.catch(move |error| run_on(&queue, move || on_rejected(error)))
    }

    /// Like [`handle`](Self::handle), running the continuation on `queue`.
    pub fn handle_on<F, E>(&self, queue: CallbackQueue, on_fulfilled: F, on_rejected: E) -> &Self
    where
        F: FnOnce(RequestSuccess<T>) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        self.shared.subscribe(Box::new(move |result| {
            run_on(&queue, move || match result {
                Ok(success) => on_fulfilled(success),
                Err(error) => on_rejected(error),
            });
        }));
        self
    }

    /// Chains a request that depends on this one's value.
    ///
    /// The returned request adopts the outcome of the request produced by
    /// `transform`. An error from `transform`, or a rejection of this request,
    /// rejects the returned request. Cancelling the returned request cancels
    /// this one until the inner request exists, then the inner request.
    pub fn and_then<U, F>(&self, transform: F) -> Request<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(RequestSuccess<T>) -> Result<Request<U>> + Send + 'static,
    {
        let (chained, resolver) = Request::<U>::pending_on(self.shared.queue.clone());

        let upstream = Arc::downgrade(&self.shared);
        chained.set_canceller(Some(Arc::new(move || {
            if let Some(shared) = Weak::upgrade(&upstream) {
                Self { shared }.cancel();
            }
        })));

        let target = chained.clone();
        let on_upstream_error = resolver.clone();
        self.handle(
            move |success| match transform(success) {
                Ok(inner) => {
                    target.adopt(&inner);
                    inner.forward_to(resolver);
                }
                Err(error) => {
                    resolver.reject(error);
                }
            },
            move |error| {
                on_upstream_error.reject(error);
            },
        );
        chained
    }

    /// Retries the call until it succeeds, for at most `max_attempts` attempts.
    ///
    /// This request is the first attempt; each later attempt issues the same
    /// call again through the client. Once `max_attempts` attempts failed, the
    /// returned request rejects with the last error. A cancelled attempt is
    /// not retried, and cancelling the returned request stops further attempts.
    ///
    /// Returns this request unchanged for `max_attempts == 0` or when the
    /// request was not created by a client.
    #[must_use]
    pub fn retry(&self, max_attempts: usize) -> Self {
        let Some(reissue) = self.shared.link.lock().reissue.clone() else {
            return self.clone();
        };
        if max_attempts == 0 {
            return self.clone();
        }

        let (request, resolver) = Self::pending_on(self.shared.queue.clone());
        request.adopt(self);
        attempt(self, reissue, max_attempts - 1, request.clone(), resolver);
        request
    }

    /// Cancels the in-flight call.
    ///
    /// The call then fails with [`Error::Cancelled`] through the usual failure
    /// path. Does nothing once the request settled.
    pub fn cancel(&self) -> &Self {
        if self.is_pending() {
            self.shared.cancelled.store(true, Ordering::Release);
            let canceller = self.shared.link.lock().canceller.clone();
            if let Some(cancel) = canceller {
                cancel();
            }
        }
        self
    }

    /// Blocks the current thread until the request settles or `timeout` elapses.
    ///
    /// Returns `Ok(None)` on timeout. Must not be called from a task of a
    /// current-thread runtime that drives the request.
    pub fn wait(&self, timeout: Duration) -> Result<Option<RequestSuccess<T>>> {
        let mut outcome = self.shared.outcome.lock();
        self.shared.settled.wait_while_for(
            &mut outcome,
            |outcome| matches!(outcome, Outcome::Pending(_)),
            timeout,
        );

        match &*outcome {
            Outcome::Pending(_) => Ok(None),
            Outcome::Fulfilled(success) => Ok(Some(success.clone())),
            Outcome::Rejected(error) => Err(error.clone()),
        }
    }

    /// The settled value, without blocking.
    pub fn get(&self) -> Result<Option<RequestSuccess<T>>> {
        self.wait(Duration::ZERO)
    }

    /// Current settlement state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        match &*self.shared.outcome.lock() {
            Outcome::Pending(_) => RequestState::Pending,
            Outcome::Fulfilled(_) => RequestState::Fulfilled,
            Outcome::Rejected(_) => RequestState::Rejected,
        }
    }

    /// Returns `true` until the request settles.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == RequestState::Pending
    }

    /// The transport request of the current attempt, as launched.
    #[must_use]
    pub fn current_request(&self) -> Option<TransportRequest> {
        self.shared.link.lock().current.clone()
    }

    pub(crate) fn set_link(
        &self,
        current: Option<TransportRequest>,
        canceller: Option<Canceller>,
        reissue: Option<Reissue<T>>,
    ) {
        *self.shared.link.lock() = Link {
            current,
            canceller,
            reissue,
        };
    }

    fn cancel_requested(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    fn set_canceller(&self, canceller: Option<Canceller>) {
        self.shared.link.lock().canceller = canceller;
    }

    /// Takes over the current call, cancel link and re-issue context of `other`.
    pub(crate) fn adopt(&self, other: &Self) {
        if Arc::ptr_eq(&self.shared, &other.shared) {
            return;
        }
        let link = other.shared.link.lock().clone();
        *self.shared.link.lock() = link;
    }

    /// Settles `resolver` with this request's outcome.
    pub(crate) fn forward_to(&self, resolver: Resolver<T>) {
        self.shared
            .subscribe(Box::new(move |result| {
                resolver.settle(result);
            }));
    }
}

fn attempt<T>(
    current: &Request<T>,
    reissue: Reissue<T>,
    remaining: usize,
    target: Request<T>,
    resolver: Resolver<T>,
) where
    T: Send + Sync + 'static,
{
    let on_success = resolver.clone();
    current.handle(
        move |success| {
            on_success.resolve(success);
        },
        move |error| {
            if remaining == 0 || error.is_cancelled() {
                resolver.reject(error);
                return;
            }
            if target.cancel_requested() {
                resolver.reject(Error::Cancelled);
                return;
            }
            tracing::debug!(remaining, error = %error, "retrying request");
            let next = reissue();
            target.adopt(&next);
            // a cancel that raced the re-issue only reached the previous attempt
            if target.cancel_requested() {
                next.cancel();
            }
            attempt(&next, reissue, remaining - 1, target, resolver);
        },
    );
}

impl<T: Send + Sync + 'static> IntoFuture for Request<T> {
    type Output = Result<RequestSuccess<T>>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        let (sender, receiver) = oneshot::channel();
        self.shared.subscribe(Box::new(move |result| {
            // The receiver may be gone if the future was dropped.
            let _ = sender.send(result);
        }));
        Box::pin(async move { receiver.await.unwrap_or(Err(Error::Dropped)) })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert2::{check, let_assert};

    use super::*;

    fn success(value: u32) -> RequestSuccess<u32> {
        let url = url::Url::parse("https://api.example.com/value").expect("valid URL");
        RequestSuccess::new(
            value,
            Bytes::from(value.to_string()),
            ResponseMeta::new(200, HashMap::new(), url),
        )
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(String) + Clone) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (events, move |event| sink.lock().push(event))
    }

    #[test]
    fn settles_only_once() {
        let (request, resolver) = Request::<u32>::pending();

        check!(resolver.resolve(success(1)));
        check!(!resolver.resolve(success(2)));
        check!(!resolver.reject(Error::Timeout));

        let value = request.get().expect("fulfilled").expect("settled");
        check!(*value.data() == 1);
        check!(request.state() == RequestState::Fulfilled);
    }

    #[test]
    fn continuations_fire_once_in_registration_order() {
        let (events, record) = recorder();
        let (request, resolver) = Request::<u32>::pending();

        for index in 0..3 {
            let record = record.clone();
            request.then(move |value| record(format!("then{index}:{}", value.data())));
        }
        {
            let record = record.clone();
            request.catch(move |_| record("catch".to_string()));
        }

        resolver.resolve(success(7));
        resolver.resolve(success(8));

        check!(*events.lock() == ["then0:7", "then1:7", "then2:7"]);
    }

    #[test]
    fn late_subscribers_see_the_settled_value() {
        let request = Request::<u32>::rejected(Error::Timeout);
        let (events, record) = recorder();

        request
            .then({
                let record = record.clone();
                move |_| record("then".to_string())
            })
            .catch(move |error| record(format!("catch:{error}")));

        check!(*events.lock() == ["catch:request timeout"]);
        check!(request.state() == RequestState::Rejected);
    }

    #[test]
    fn handle_runs_exactly_one_branch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (request, resolver) = Request::<u32>::pending();

        let ok = Arc::clone(&calls);
        let err = Arc::clone(&calls);
        request.handle(
            move |_| {
                ok.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                err.fetch_add(10, Ordering::SeqCst);
            },
        );
        resolver.reject(Error::Cancelled);

        check!(calls.load(Ordering::SeqCst) == 10);
    }

    #[test]
    fn dropping_the_resolver_rejects() {
        let (request, resolver) = Request::<u32>::pending();
        let other = resolver.clone();

        drop(resolver);
        check!(request.is_pending());

        drop(other);
        let_assert!(Err(Error::Dropped) = request.get());
    }

    #[test]
    fn wait_times_out_without_error() {
        let (request, _resolver) = Request::<u32>::pending();

        let_assert!(Ok(None) = request.wait(Duration::from_millis(10)));
        check!(request.is_pending());
    }

    #[test]
    fn wait_returns_value_settled_from_another_thread() {
        let (request, resolver) = Request::<u32>::pending();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            resolver.resolve(success(5));
        });

        let value = request
            .wait(Duration::from_secs(5))
            .expect("fulfilled")
            .expect("settled in time");
        check!(*value.data() == 5);
        handle.join().expect("thread");
    }

    #[test]
    fn and_then_flattens_the_inner_request() {
        let (upstream, resolver) = Request::<u32>::pending();
        let chained = upstream.and_then(|value| {
            let doubled = *value.data() * 2;
            Ok(Request::fulfilled(success(doubled)))
        });

        check!(chained.is_pending());
        resolver.resolve(success(21));

        let value = chained.get().expect("fulfilled").expect("settled");
        check!(*value.data() == 42);
    }

    #[test]
    fn and_then_rejects_on_transform_error_or_upstream_error() {
        let failing = Request::fulfilled(success(1))
            .and_then(|_| Err::<Request<u32>, _>(Error::serialization("nope")));
        let_assert!(Err(Error::Serialization(message)) = failing.get());
        check!(message == "nope");

        let rejected = Request::<u32>::rejected(Error::Timeout)
            .and_then(|value| Ok(Request::fulfilled(value)));
        let_assert!(Err(Error::Timeout) = rejected.get());
    }

    #[test]
    fn and_then_adopts_inner_rejection() {
        let chained = Request::fulfilled(success(1))
            .and_then(|_| Ok(Request::<u32>::rejected(Error::http(404, "Not Found"))));

        let_assert!(Err(error) = chained.get());
        check!(error.status() == Some(404));
    }

    #[test]
    fn retry_without_client_context_returns_same_request() {
        let (request, _resolver) = Request::<u32>::pending();
        let retried = request.retry(3);

        check!(Arc::ptr_eq(&request.shared, &retried.shared));
    }

    #[test]
    fn retry_counts_the_original_call() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (first, first_resolver) = Request::<u32>::pending();

        let counter = Arc::clone(&attempts);
        let reissue: Reissue<u32> = Arc::new(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 2;
            Request::rejected(Error::http(500, format!("attempt {attempt}")))
        });
        first.set_link(None, None, Some(reissue));

        let retried = first.retry(3);
        first_resolver.reject(Error::http(500, "attempt 1"));

        let_assert!(Err(Error::Http { message, .. }) = retried.get());
        check!(message == "attempt 3");
        check!(attempts.load(Ordering::SeqCst) == 2);
    }

    #[test]
    fn retry_zero_is_a_no_op() {
        let (request, _resolver) = Request::<u32>::pending();
        request.set_link(None, None, Some(Arc::new(|| Request::fulfilled(success(1)))));

        let retried = request.retry(0);
        check!(Arc::ptr_eq(&request.shared, &retried.shared));
    }

    #[test]
    fn cancelled_attempts_are_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (first, first_resolver) = Request::<u32>::pending();

        let counter = Arc::clone(&attempts);
        let reissue: Reissue<u32> = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Request::fulfilled(success(2))
        });
        first.set_link(
            None,
            Some(Arc::new(move || {
                first_resolver.reject(Error::Cancelled);
            })),
            Some(reissue),
        );

        let retried = first.retry(3);
        retried.cancel();

        let_assert!(Err(error) = retried.get());
        check!(error.is_cancelled());
        check!(attempts.load(Ordering::SeqCst) == 0);
    }

    #[test]
    fn cancelling_a_retry_stops_further_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let (first, first_resolver) = Request::<u32>::pending();

        let counter = Arc::clone(&attempts);
        let reissue: Reissue<u32> = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Request::fulfilled(success(2))
        });
        first.set_link(None, None, Some(reissue));

        let retried = first.retry(3);
        retried.cancel();
        first_resolver.reject(Error::http(500, "Internal Server Error"));

        let_assert!(Err(Error::Cancelled) = retried.get());
        check!(attempts.load(Ordering::SeqCst) == 0);
    }

    #[test]
    fn cancel_forwards_to_the_link_while_pending() {
        let cancels = Arc::new(AtomicUsize::new(0));
        let (request, resolver) = Request::<u32>::pending();

        let counter = Arc::clone(&cancels);
        request.set_link(
            None,
            Some(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        );

        request.cancel();
        check!(cancels.load(Ordering::SeqCst) == 1);

        resolver.reject(Error::Cancelled);
        request.cancel();
        check!(cancels.load(Ordering::SeqCst) == 1);
    }

    #[test]
    fn cancelling_a_chained_request_cancels_upstream() {
        let cancels = Arc::new(AtomicUsize::new(0));
        let (upstream, _resolver) = Request::<u32>::pending();

        let counter = Arc::clone(&cancels);
        upstream.set_link(
            None,
            Some(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        );

        let chained = upstream.and_then(|value| Ok(Request::fulfilled(value)));
        chained.cancel();

        check!(cancels.load(Ordering::SeqCst) == 1);
    }

    #[tokio::test]
    async fn await_yields_the_outcome() {
        let (request, resolver) = Request::<u32>::pending();

        tokio::spawn(async move {
            resolver.resolve(success(9));
        });

        let value = request.await.expect("fulfilled");
        check!(*value.data() == 9);
    }

    #[tokio::test]
    async fn per_call_queue_overrides_the_request_queue() {
        let (request, resolver) = Request::<u32>::pending();
        let ran = Arc::new(AtomicUsize::new(0));
        let (sender, receiver) = oneshot::channel();

        let counter = Arc::clone(&ran);
        request.then_on(CallbackQueue::Runtime(Handle::current()), move |value| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = sender.send(*value.data());
        });
        resolver.resolve(success(4));

        // the current-thread runtime has not polled the spawned continuation yet
        check!(ran.load(Ordering::SeqCst) == 0);
        check!(receiver.await.expect("continuation ran") == 4);
        check!(ran.load(Ordering::SeqCst) == 1);
    }

    #[tokio::test]
    async fn late_handle_on_defers_to_the_given_queue() {
        let request = Request::<u32>::rejected(Error::Timeout);
        let (sender, receiver) = oneshot::channel();

        request.handle_on(
            CallbackQueue::Runtime(Handle::current()),
            |_| unreachable!("request was rejected"),
            move |error| {
                let _ = sender.send(error.to_string());
            },
        );

        check!(receiver.await.expect("continuation ran") == "request timeout");
    }

    #[test]
    fn catch_on_immediate_runs_inline() {
        let (events, record) = recorder();
        let (request, resolver) = Request::<u32>::pending_on(CallbackQueue::Immediate);

        request.catch_on(CallbackQueue::Immediate, move |error| record(format!("catch:{error}")));
        resolver.reject(Error::Cancelled);

        check!(*events.lock() == ["catch:request cancelled"]);
    }

    #[tokio::test]
    async fn runtime_queue_runs_continuations_on_a_task() {
        let (request, resolver) = Request::<u32>::pending_on(CallbackQueue::Runtime(Handle::current()));
        let (sender, receiver) = oneshot::channel();

        request.then(move |value| {
            let _ = sender.send(*value.data());
        });
        resolver.resolve(success(3));

        check!(receiver.await.expect("continuation ran") == 3);
    }
}
