//! A value that notifies observers when it changes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

type Observer<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;

struct Inner<T> {
    /// Held across a change and its notifications.
    notifying: ReentrantMutex<()>,
    value: Mutex<T>,
    observers: Mutex<BTreeMap<u64, Observer<T>>>,
    next_id: Mutex<u64>,
}

/// A shared value with change observers.
///
/// Observers receive the new and the old value, in subscription order, on the
/// thread that performed the change. Concurrent changes are notified one after
/// the other, in the order they were applied; an observer may change the value
/// again from its callback. Observers stay registered as long as the returned
/// [`Subscription`] is alive.
pub struct Observable<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("value", &*self.inner.value.lock())
            .field("observers", &self.inner.observers.lock().len())
            .finish()
    }
}

impl<T: Default + Clone + Send + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + Send + 'static> Observable<T> {
    /// Creates an observable holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                notifying: ReentrantMutex::new(()),
                value: Mutex::new(value),
                observers: Mutex::new(BTreeMap::new()),
                next_id: Mutex::new(0),
            }),
        }
    }

    /// A copy of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.value.lock().clone()
    }

    /// Replaces the value and notifies observers.
    pub fn set(&self, value: T) {
        self.update(|current| *current = value);
    }

    /// Changes the value in place and notifies observers.
    pub fn update(&self, change: impl FnOnce(&mut T)) {
        let _notifying = self.inner.notifying.lock();
        let (old, new) = {
            let mut value = self.inner.value.lock();
            let old = value.clone();
            change(&mut value);
            (old, value.clone())
        };

        let observers: Vec<_> = self.inner.observers.lock().values().cloned().collect();
        for observer in observers {
            observer(&new, &old);
        }
    }

    /// Registers an observer.
    pub fn observe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.inner.next_id.lock();
            *next += 1;
            *next
        };
        self.inner.observers.lock().insert(id, Arc::new(observer));

        let inner: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.observers.lock().remove(&id);
                }
            })),
        }
    }
}

/// Keeps an observer registered; dropping it unsubscribes.
#[must_use = "the observer is removed when the subscription is dropped"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Unsubscribes now.
    pub fn dispose(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
