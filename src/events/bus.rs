//! Fan-out of events to registered observers.
//!
//! # Responsibilities
//! - Register and remove observers at any time
//! - Deliver each event to every observer concurrently
//! - Report observer failures without letting them reach the caller
//!
//! # Design Decisions
//! - The observer list is swapped atomically; a publish works on the
//!   snapshot taken when it started
//! - Synchronous observers are moved onto the blocking pool at registration,
//!   so every observer is awaited the same way
//! - A panicking observer is contained and reported like an `Err`

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;

use crate::events::types::Event;
use crate::http::transport::BoxError;
use crate::observability::metrics;

/// An asynchronous event consumer.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_event(&self, event: Arc<Event>) -> Result<(), BoxError>;
}

/// A synchronous event consumer, run on the blocking pool.
pub trait SyncObserver: Send + Sync + 'static {
    fn on_event(&self, event: &Event) -> Result<(), BoxError>;
}

impl<F> SyncObserver for F
where
    F: Fn(&Event) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn on_event(&self, event: &Event) -> Result<(), BoxError> {
        self(event)
    }
}

struct Blocking<O>(Arc<O>);

#[async_trait]
impl<O: SyncObserver> Observer for Blocking<O> {
    async fn on_event(&self, event: Arc<Event>) -> Result<(), BoxError> {
        let observer = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || observer.on_event(&event))
            .await
            .unwrap_or_else(|join| Err(join.into()))
    }
}

struct AsyncFn<F>(F);

#[async_trait]
impl<F> Observer for AsyncFn<F>
where
    F: Fn(Arc<Event>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync,
{
    async fn on_event(&self, event: Arc<Event>) -> Result<(), BoxError> {
        (self.0)(event).await
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// One observer that did not handle an event.
#[derive(Debug)]
pub struct ObserverFailure {
    pub subscription: SubscriptionId,
    pub error: String,
}

/// Result of delivering one event.
#[derive(Debug, Default)]
pub struct PublishReport {
    pub delivered: usize,
    pub failures: Vec<ObserverFailure>,
}

impl PublishReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

type Subscribers = Vec<(SubscriptionId, Arc<dyn Observer>)>;

/// Broadcasts events to all subscribed observers.
pub struct EventBus {
    observers: ArcSwap<Subscribers>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            observers: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an asynchronous observer.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.rcu(|current| {
            let mut next = Subscribers::clone(current);
            next.push((id, Arc::clone(&observer)));
            next
        });
        id
    }

    /// Register a synchronous observer; it runs on the blocking pool.
    pub fn subscribe_blocking<O: SyncObserver>(&self, observer: O) -> SubscriptionId {
        self.subscribe(Arc::new(Blocking(Arc::new(observer))))
    }

    /// Register a synchronous closure; it runs on the blocking pool.
    pub fn subscribe_blocking_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.subscribe_blocking(f)
    }

    /// Register an async closure.
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(Arc<Event>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(AsyncFn(f)))
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let previous = self.observers.rcu(|current| {
            current
                .iter()
                .filter(|(existing, _)| *existing != id)
                .cloned()
                .collect::<Subscribers>()
        });
        previous.iter().any(|(existing, _)| *existing == id)
    }

    pub fn len(&self) -> usize {
        self.observers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every observer and wait for all of them.
    pub async fn publish(&self, event: Event) -> PublishReport {
        let observers = self.observers.load_full();
        if observers.is_empty() {
            return PublishReport::default();
        }

        let name = event.name();
        let event = Arc::new(event);
        let deliveries = observers.iter().map(|(id, observer)| {
            let event = Arc::clone(&event);
            async move {
                let outcome = AssertUnwindSafe(observer.on_event(event)).catch_unwind().await;
                (*id, outcome)
            }
        });

        let mut report = PublishReport::default();
        for (subscription, outcome) in join_all(deliveries).await {
            let error = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "observer panicked".to_string(),
            };
            tracing::warn!(
                event = name,
                subscription = subscription.0,
                error = %error,
                "Event observer failed"
            );
            report.failures.push(ObserverFailure {
                subscription,
                error,
            });
        }

        if !report.failures.is_empty() {
            metrics::record_observer_failures(report.failures.len() as u64);
        }
        report
    }
}
