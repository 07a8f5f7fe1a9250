use crate::notify::SQL_EXECUTE;

/// Label the data-access layer gives its own metadata-introspection statements.
pub const SCHEMA_LABEL: &str = "SCHEMA";

/// Configuration for a tracking scope.
///
/// The defaults reproduce the standard filtering policy: listen on
/// [`SQL_EXECUTE`], drop statements labelled `"SCHEMA"`, drop cached results,
/// and accept events from any thread.
#[derive(Debug, Clone)]
pub struct TrackConfig {
    /// Topic the tracker subscribes to.
    pub topic: String,
    /// Statement labels that are never recorded.
    pub ignored_names: Vec<String>,
    /// Whether results replayed from a result cache are recorded.
    pub include_cached: bool,
    /// Only record events published on the thread that started tracking.
    pub current_thread_only: bool,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            topic: SQL_EXECUTE.to_string(),
            ignored_names: vec![SCHEMA_LABEL.to_string()],
            include_cached: false,
            current_thread_only: false,
        }
    }
}

impl TrackConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a different topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Also drop statements carrying this label.
    pub fn ignore_name(mut self, name: impl Into<String>) -> Self {
        self.ignored_names.push(name.into());
        self
    }

    /// Record cached results too.
    pub fn include_cached(mut self) -> Self {
        self.include_cached = true;
        self
    }

    /// Attribute events to the tracking thread.
    ///
    /// Statements executed by other threads (parallel tests, spawned workers)
    /// are dropped instead of being interleaved into this log. This has no
    /// effect on work that hops threads, such as futures polled by a
    /// multi-threaded runtime.
    pub fn current_thread_only(mut self) -> Self {
        self.current_thread_only = true;
        self
    }

    pub(crate) fn is_ignored(&self, name: &str) -> bool {
        self.ignored_names.iter().any(|ignored| ignored == name)
    }
}
