//! Ordered asynchronous publish/subscribe.
//!
//! An [`EventBus`] delivers each published event to every subscriber, one
//! after another, in subscription order. `publish` returns once the last
//! subscriber has finished, so a publisher that awaits each `publish` in turn
//! gets strictly ordered delivery.
//!
//! Subscribers are identified by a [`SubscriptionId`] and hold no reference
//! back to the publisher. A subscriber that needs state should capture a
//! [`std::sync::Weak`] so that dropping the owner frees it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::trace;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Opaque handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

struct Subscribers<T> {
    entries: Vec<(SubscriptionId, Handler<T>)>,
    closed: bool,
}

/// A named asynchronous event source.
///
/// Cloning an `EventBus` yields another handle to the same subscriber list.
pub struct EventBus<T> {
    name: Arc<str>,
    subscribers: Arc<Mutex<Subscribers<T>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<T> EventBus<T>
where
    T: Clone + Send + 'static,
{
    /// Create an empty bus. The name only appears in logs and errors.
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            subscribers: Arc::new(Mutex::new(Subscribers {
                entries: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an async handler.
    ///
    /// Fails with [`Error::Subscription`] once the bus is closed.
    pub async fn subscribe<F, Fut>(&self, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut subs = self.subscribers.lock().await;
        if subs.closed {
            return Err(Error::Subscription(format!(
                "cannot subscribe to closed event source '{}'",
                self.name
            )));
        }
        let id = SubscriptionId(Uuid::new_v4());
        let handler: Handler<T> = Arc::new(move |event| handler(event).boxed());
        subs.entries.push((id, handler));
        trace!("Subscribed {} to {}", id, self.name);
        Ok(id)
    }

    /// Remove a handler.
    ///
    /// Fails with [`Error::Subscription`] if `id` is not subscribed here.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut subs = self.subscribers.lock().await;
        let before = subs.entries.len();
        subs.entries.retain(|(sid, _)| *sid != id);
        if subs.entries.len() == before {
            return Err(Error::Subscription(format!(
                "subscription {} not found on '{}'",
                id, self.name
            )));
        }
        trace!("Unsubscribed {} from {}", id, self.name);
        Ok(())
    }

    /// Deliver `event` to every current subscriber in subscription order.
    ///
    /// The subscriber list is snapshotted first, so handlers may subscribe or
    /// unsubscribe without deadlocking. Returns the number of handlers run.
    pub async fn publish(&self, event: T) -> usize {
        let handlers: Vec<Handler<T>> = {
            let subs = self.subscribers.lock().await;
            subs.entries.iter().map(|(_, h)| Arc::clone(h)).collect()
        };
        for handler in &handlers {
            handler(event.clone()).await;
        }
        handlers.len()
    }

    /// Number of active subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.entries.len()
    }

    /// Whether `id` is currently subscribed.
    pub async fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscribers
            .lock()
            .await
            .entries
            .iter()
            .any(|(sid, _)| *sid == id)
    }

    /// Drop every subscriber and refuse new ones. Idempotent.
    pub async fn close(&self) {
        let mut subs = self.subscribers.lock().await;
        subs.entries.clear();
        subs.closed = true;
    }

    /// Whether [`close`](Self::close) has been called.
    pub async fn is_closed(&self) -> bool {
        self.subscribers.lock().await.closed
    }
}
