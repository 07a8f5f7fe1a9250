//! The listener that collects accepted statements.

use crate::config::TrackConfig;
use crate::notify::{Event, EventListener};
use crate::record::QueryRecord;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

/// Collects a [`QueryRecord`] for every accepted query-execution event.
///
/// A tracker is created per tracking scope and discarded once its log has been
/// handed back. Events are filtered in order, stopping at the first match:
///
/// 1. the statement label is one of [`TrackConfig::ignored_names`] (`"SCHEMA"`);
/// 2. the payload's `cached` flag is set (unless [`TrackConfig::include_cached`]);
/// 3. otherwise the statement is appended to the log.
///
/// The log is append-only and keeps emission order. Appends are serialized by a
/// mutex, so events delivered from several threads are never lost, but they are
/// not attributed either: concurrent callers interleave into one log unless
/// [`TrackConfig::current_thread_only`] is set.
#[derive(Debug)]
pub struct Tracker {
    config: TrackConfig,
    origin: Option<ThreadId>,
    queries: Mutex<Vec<QueryRecord>>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    /// Create a tracker with the default filtering policy.
    pub fn new() -> Self {
        Self::with_config(TrackConfig::default())
    }

    /// Create a tracker with a custom filtering policy.
    ///
    /// With [`TrackConfig::current_thread_only`], the calling thread becomes the
    /// only thread whose events are accepted.
    pub fn with_config(config: TrackConfig) -> Self {
        let origin = config.current_thread_only.then(|| thread::current().id());
        Self {
            config,
            origin,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    /// Snapshot of the statements accepted so far, in emission order.
    pub fn queries(&self) -> Vec<QueryRecord> {
        self.log().clone()
    }

    /// Consume the tracker and return its log.
    pub fn into_queries(self) -> Vec<QueryRecord> {
        self.queries
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.log().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log().is_empty()
    }

    // A panic while pushing cannot leave the log half-written, so poisoning is ignored.
    fn log(&self) -> MutexGuard<'_, Vec<QueryRecord>> {
        self.queries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn accepts(&self, event: &Event<'_>) -> bool {
        if let Some(name) = event.str_field("name") {
            if self.config.is_ignored(name) {
                return false;
            }
        }
        if !self.config.include_cached && event.flag("cached") {
            return false;
        }
        if let Some(origin) = self.origin {
            return event.thread == origin;
        }
        true
    }
}

impl EventListener for Tracker {
    fn on_event(&self, event: &Event<'_>) {
        if !self.accepts(event) {
            return;
        }

        let record = QueryRecord::new(
            event.str_field("name").map(str::to_owned),
            event.str_field("sql").unwrap_or_default(),
            event.duration_ms(),
        );
        self.log().push(record);
    }
}
