//! In-process publish/subscribe for query-execution events.
//!
//! The data-access layer publishes one [`Event`] per completed statement on a
//! named topic (conventionally [`SQL_EXECUTE`]); listeners subscribed to that
//! topic receive it synchronously, on the publishing thread.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlspy::notify::{Event, EventSource, Notifier, Payload, SQL_EXECUTE};
//! use std::sync::Arc;
//!
//! let notifier = Notifier::new();
//! let subscription = notifier.subscribe(SQL_EXECUTE, Arc::new(|event: &Event<'_>| {
//!     println!("{:.3}ms {:?}", event.duration_ms(), event.payload.get("sql"));
//! }))?;
//!
//! let mut payload = Payload::new();
//! payload.insert("sql".into(), "SELECT 1".into());
//! notifier.instrument(SQL_EXECUTE, payload, || run_statement());
//!
//! notifier.unsubscribe(subscription)?;
//! ```

use crate::error::{SpyError, SpyResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::thread::{self, ThreadId};
use std::time::Instant;
use uuid::Uuid;


/// Topic on which completed SQL statements are published.
pub const SQL_EXECUTE: &str = "sql.execute";

/// Event metadata: statement name, SQL text, cache flag and any layer-specific fields.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// One published event, borrowed for the duration of delivery.
#[derive(Debug, Clone, Copy)]
pub struct Event<'a> {
    /// Topic the event was published on.
    pub name: &'a str,
    /// When the instrumented work started.
    pub started: Instant,
    /// When the instrumented work finished.
    pub finished: Instant,
    /// Correlation id, unique per published event.
    pub id: Uuid,
    /// Thread that published the event.
    pub thread: ThreadId,
    pub payload: &'a Payload,
}

impl<'a> Event<'a> {
    /// Signed `finished - started` in milliseconds.
    ///
    /// Negative when `finished` precedes `started`; the value is not clamped.
    pub fn duration_ms(&self) -> f64 {
        if self.finished >= self.started {
            self.finished.duration_since(self.started).as_secs_f64() * 1000.0
        } else {
            -(self.started.duration_since(self.finished).as_secs_f64() * 1000.0)
        }
    }

    /// String field of the payload; absent or non-string values read as `None`.
    pub fn str_field(&self, key: &str) -> Option<&'a str> {
        self.payload.get(key).and_then(serde_json::Value::as_str)
    }

    /// Boolean field of the payload; absent or non-bool values read as `false`.
    pub fn flag(&self, key: &str) -> bool {
        self.payload
            .get(key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Receives events for the topic it is subscribed to.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event<'_>);
}

impl<F> EventListener for F
where
    F: Fn(&Event<'_>) + Send + Sync,
{
    fn on_event(&self, event: &Event<'_>) {
        self(event)
    }
}

/// Handle returned by [`EventSource::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "dropping a Subscription leaves the listener registered"]
pub struct Subscription {
    topic: String,
    id: u64,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, id: u64) -> Self {
        Self {
            topic: topic.into(),
            id,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A named-topic registry that listeners can attach to and detach from.
///
/// [`track`](crate::track()) only needs this capability, so tests can inject a
/// fake instead of a real [`Notifier`].
pub trait EventSource {
    /// Register `listener` for every event published on `topic`.
    fn subscribe(&self, topic: &str, listener: Arc<dyn EventListener>)
    -> SpyResult<Subscription>;

    /// Remove a previously registered listener.
    fn unsubscribe(&self, subscription: Subscription) -> SpyResult<()>;
}

impl<S: EventSource + ?Sized> EventSource for Arc<S> {
    fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn EventListener>,
    ) -> SpyResult<Subscription> {
        (**self).subscribe(topic, listener)
    }

    fn unsubscribe(&self, subscription: Subscription) -> SpyResult<()> {
        (**self).unsubscribe(subscription)
    }
}

type Listeners = Vec<(u64, Arc<dyn EventListener>)>;

#[derive(Default)]
struct Registry {
    topics: RwLock<HashMap<String, Listeners>>,
    next_id: AtomicU64,
}

/// The default [`EventSource`]: an in-process, thread-safe topic registry.
///
/// Cloning is cheap; clones share the same set of subscriptions.
#[derive(Clone, Default)]
pub struct Notifier {
    registry: Arc<Registry>,
}

impl Notifier {
    /// Create an empty notifier, independent from [`Notifier::global`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide notifier used by [`InstrumentedClient`](crate::InstrumentedClient) unless
    /// another is configured.
    pub fn global() -> &'static Notifier {
        static GLOBAL: OnceLock<Notifier> = OnceLock::new();
        GLOBAL.get_or_init(Notifier::new)
    }

    /// Number of listeners currently subscribed to `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.registry
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Deliver an event to every listener of `topic`, in subscription order.
    ///
    /// Listeners are snapshotted before delivery, so a listener may subscribe or
    /// unsubscribe from inside `on_event` without deadlocking.
    pub fn publish(&self, topic: &str, started: Instant, finished: Instant, payload: &Payload) {
        let listeners: Listeners = match self
            .registry
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
        {
            Some(listeners) if !listeners.is_empty() => listeners.clone(),
            _ => return,
        };

        let event = Event {
            name: topic,
            started,
            finished,
            id: Uuid::new_v4(),
            thread: thread::current().id(),
            payload,
        };
        for (_, listener) in &listeners {
            listener.on_event(&event);
        }
    }

    /// Run `f`, then publish an event on `topic` spanning its execution.
    ///
    /// The event is published whatever `f` returns, including `Err` values.
    pub fn instrument<T>(&self, topic: &str, payload: Payload, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let result = f();
        let finished = Instant::now();
        self.publish(topic, started, finished, &payload);
        result
    }
}

impl EventSource for Notifier {
    fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn EventListener>,
    ) -> SpyResult<Subscription> {
        if topic.trim().is_empty() {
            return Err(SpyError::InvalidTopic(topic.to_string()));
        }

        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push((id, listener));

        tracing::trace!(target: "sqlspy.notify", topic, id, "subscribed");
        Ok(Subscription::new(topic, id))
    }

    fn unsubscribe(&self, subscription: Subscription) -> SpyResult<()> {
        let mut topics = self
            .registry
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let unknown = || SpyError::UnknownSubscription {
            topic: subscription.topic.clone(),
            id: subscription.id,
        };
        let listeners = topics.get_mut(&subscription.topic).ok_or_else(unknown)?;
        let pos = listeners
            .iter()
            .position(|(id, _)| *id == subscription.id)
            .ok_or_else(unknown)?;
        listeners.remove(pos);
        if listeners.is_empty() {
            topics.remove(&subscription.topic);
        }

        tracing::trace!(
            target: "sqlspy.notify",
            topic = %subscription.topic,
            id = subscription.id,
            "unsubscribed"
        );
        Ok(())
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics = self
            .registry
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut counts: Vec<(&str, usize)> =
            topics.iter().map(|(t, l)| (t.as_str(), l.len())).collect();
        counts.sort_unstable();
        f.debug_struct("Notifier").field("topics", &counts).finish()
    }
}
