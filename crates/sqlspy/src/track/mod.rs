//! Scoped query tracking.
//!
//! [`track`] subscribes a fresh [`Tracker`] to the event source, runs the
//! operation, and unsubscribes before returning, on every exit path:
//!
//! - the operation returns `Ok`: the subscription is released and any
//!   unsubscribe failure is returned to the caller; otherwise the log is returned;
//! - the operation returns `Err`: the subscription is released and the
//!   operation's error is returned unchanged (no partial log);
//! - the operation panics, or an async operation is dropped before completing:
//!   the subscription is released while unwinding/dropping.
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlspy::{InstrumentedClient, Notifier, track_async};
//!
//! let client = InstrumentedClient::new(pg_client);
//! let queries = track_async(Notifier::global(), async {
//!     client.query_tagged("User Load", "SELECT * FROM users WHERE name = $1", &[&"mario"]).await?;
//!     Ok::<_, sqlspy::SpyError>(())
//! })
//! .await?;
//!
//! assert_eq!(queries.len(), 1);
//! assert!(queries[0].is_select());
//! ```

use crate::config::TrackConfig;
use crate::error::{SpyError, SpyResult};
use crate::notify::{EventSource, Subscription};
use crate::record::QueryRecord;
use crate::tracker::Tracker;
use std::future::Future;
use std::sync::Arc;


/// Track the statements issued by `operation`, discarding its return value.
pub fn track<S, F, T, E>(source: &S, operation: F) -> Result<Vec<QueryRecord>, E>
where
    S: EventSource + ?Sized,
    F: FnOnce() -> Result<T, E>,
    E: From<SpyError>,
{
    track_with_config(source, &TrackConfig::default(), operation).map(|(_, queries)| queries)
}

/// Track the statements issued by `operation`, returning its value alongside them.
pub fn track_with<S, F, T, E>(source: &S, operation: F) -> Result<(T, Vec<QueryRecord>), E>
where
    S: EventSource + ?Sized,
    F: FnOnce() -> Result<T, E>,
    E: From<SpyError>,
{
    track_with_config(source, &TrackConfig::default(), operation)
}

/// Track with a custom topic or filtering policy.
pub fn track_with_config<S, F, T, E>(
    source: &S,
    config: &TrackConfig,
    operation: F,
) -> Result<(T, Vec<QueryRecord>), E>
where
    S: EventSource + ?Sized,
    F: FnOnce() -> Result<T, E>,
    E: From<SpyError>,
{
    let (tracker, guard) = Scope::subscribe(source, config)?;
    let outcome = operation();
    guard.finish(tracker, outcome)
}

/// Track the statements issued while `operation` runs to completion.
pub async fn track_async<S, Fut, T, E>(source: &S, operation: Fut) -> Result<Vec<QueryRecord>, E>
where
    S: EventSource + ?Sized,
    Fut: Future<Output = Result<T, E>>,
    E: From<SpyError>,
{
    track_async_with_config(source, &TrackConfig::default(), operation)
        .await
        .map(|(_, queries)| queries)
}

/// Async variant of [`track_with_config`].
///
/// The subscription lives across the `.await`; dropping the returned future
/// before it completes releases it.
pub async fn track_async_with_config<S, Fut, T, E>(
    source: &S,
    config: &TrackConfig,
    operation: Fut,
) -> Result<(T, Vec<QueryRecord>), E>
where
    S: EventSource + ?Sized,
    Fut: Future<Output = Result<T, E>>,
    E: From<SpyError>,
{
    let (tracker, guard) = Scope::subscribe(source, config)?;
    let outcome = operation.await;
    guard.finish(tracker, outcome)
}

/// Owns one subscription and releases it exactly once.
struct Scope<'a, S: EventSource + ?Sized> {
    source: &'a S,
    subscription: Option<Subscription>,
}

impl<'a, S: EventSource + ?Sized> Scope<'a, S> {
    fn subscribe(source: &'a S, config: &TrackConfig) -> SpyResult<(Arc<Tracker>, Self)> {
        let tracker = Arc::new(Tracker::with_config(config.clone()));
        let subscription = source.subscribe(&config.topic, tracker.clone())?;
        Ok((
            tracker,
            Self {
                source,
                subscription: Some(subscription),
            },
        ))
    }

    fn release(&mut self) -> SpyResult<()> {
        match self.subscription.take() {
            Some(subscription) => self.source.unsubscribe(subscription),
            None => Ok(()),
        }
    }

    fn finish<T, E>(
        mut self,
        tracker: Arc<Tracker>,
        outcome: Result<T, E>,
    ) -> Result<(T, Vec<QueryRecord>), E>
    where
        E: From<SpyError>,
    {
        let value = match outcome {
            Ok(value) => {
                self.release()?;
                value
            }
            Err(err) => {
                if let Err(release_err) = self.release() {
                    tracing::warn!(
                        target: "sqlspy",
                        error = %release_err,
                        "failed to unsubscribe query tracker after operation error"
                    );
                }
                return Err(err);
            }
        };

        // The source should have dropped its handle on unsubscribe; fall back to a
        // snapshot if it still holds one.
        let queries = match Arc::try_unwrap(tracker) {
            Ok(tracker) => tracker.into_queries(),
            Err(shared) => shared.queries(),
        };
        tracing::debug!(target: "sqlspy", count = queries.len(), "tracked queries");
        Ok((value, queries))
    }
}

impl<S: EventSource + ?Sized> Drop for Scope<'_, S> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(
                target: "sqlspy",
                error = %err,
                "failed to unsubscribe query tracker during unwind"
            );
        }
    }
}
