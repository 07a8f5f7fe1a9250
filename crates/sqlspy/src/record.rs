//! The value recorded for every tracked statement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The verb a statement starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueryKind {
    /// SELECT query
    Select,
    /// INSERT statement
    Insert,
    /// UPDATE statement
    Update,
    /// DELETE statement
    Delete,
}

impl QueryKind {
    const ALL: [QueryKind; 4] = [
        QueryKind::Select,
        QueryKind::Insert,
        QueryKind::Update,
        QueryKind::Delete,
    ];

    /// The SQL keyword matched at the start of the statement.
    pub fn keyword(self) -> &'static str {
        match self {
            QueryKind::Select => "SELECT",
            QueryKind::Insert => "INSERT",
            QueryKind::Update => "UPDATE",
            QueryKind::Delete => "DELETE",
        }
    }

    /// Whether `sql`, after leading whitespace, starts with this kind's keyword.
    ///
    /// The match is case-sensitive: statement text is never normalized.
    pub fn matches(self, sql: &str) -> bool {
        sql.trim_start().starts_with(self.keyword())
    }

    /// Classify a statement by its leading keyword, if it is one of the four DML verbs.
    pub fn from_sql(sql: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.matches(sql))
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One statement observed while tracking.
///
/// Records are immutable: fields are only readable through accessors, and the
/// classification predicates are computed from `sql` on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    label: Option<String>,
    sql: String,
    duration_ms: f64,
}

impl QueryRecord {
    /// Create a record.
    ///
    /// `duration_ms` is stored as given; negative or non-finite values are kept
    /// so that a misbehaving event source stays visible.
    pub fn new(label: Option<String>, sql: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            label,
            sql: sql.into(),
            duration_ms,
        }
    }

    /// The statement's name tag, conventionally `"<Entity> <Operation>"`.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// The statement text exactly as it was reported.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Elapsed execution time in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    /// Elapsed execution time, or `None` if the recorded value is negative or not finite.
    pub fn duration(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.duration_ms / 1000.0).ok()
    }

    /// First whitespace-delimited token of the label (`"User Load"` -> `"User"`).
    pub fn entity_name(&self) -> Option<&str> {
        self.label.as_deref()?.split_whitespace().next()
    }

    pub fn kind(&self) -> Option<QueryKind> {
        QueryKind::from_sql(&self.sql)
    }

    pub fn is_select(&self) -> bool {
        QueryKind::Select.matches(&self.sql)
    }

    pub fn is_insert(&self) -> bool {
        QueryKind::Insert.matches(&self.sql)
    }

    pub fn is_update(&self) -> bool {
        QueryKind::Update.matches(&self.sql)
    }

    pub fn is_delete(&self) -> bool {
        QueryKind::Delete.matches(&self.sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_leading_keyword() {
        let record = QueryRecord::new(None, "SELECT COUNT(*) FROM users;", 1.0);
        assert!(record.is_select());
        assert!(!record.is_insert());
        assert!(!record.is_update());
        assert!(!record.is_delete());
        assert_eq!(record.kind(), Some(QueryKind::Select));

        let record = QueryRecord::new(None, "\n  INSERT INTO users (name) VALUES ($1)", 1.0);
        assert!(record.is_insert());
        assert_eq!(record.kind(), Some(QueryKind::Insert));

        let record = QueryRecord::new(None, "UPDATE users SET name = $1", 1.0);
        assert!(record.is_update());

        let record = QueryRecord::new(None, "DELETE FROM users", 1.0);
        assert!(record.is_delete());
    }

    #[test]
    fn classification_is_case_sensitive_with_no_fallback() {
        let record = QueryRecord::new(None, "select 1", 1.0);
        assert!(!record.is_select());
        assert_eq!(record.kind(), None);

        let record = QueryRecord::new(None, "BEGIN", 1.0);
        assert_eq!(record.kind(), None);
        assert!(!record.is_select() && !record.is_insert());
        assert!(!record.is_update() && !record.is_delete());

        assert_eq!(QueryRecord::new(None, "", 0.0).kind(), None);
    }

    #[test]
    fn entity_name_is_first_label_token() {
        let record = QueryRecord::new(Some("User Load".into()), "SELECT 1", 1.0);
        assert_eq!(record.entity_name(), Some("User"));
        assert_eq!(record.label(), Some("User Load"));

        let record = QueryRecord::new(Some("  Post   Create ".into()), "INSERT", 1.0);
        assert_eq!(record.entity_name(), Some("Post"));

        assert_eq!(QueryRecord::new(None, "SELECT 1", 1.0).entity_name(), None);
        assert_eq!(
            QueryRecord::new(Some(String::new()), "SELECT 1", 1.0).entity_name(),
            None
        );
    }

    #[test]
    fn negative_duration_is_kept() {
        let record = QueryRecord::new(None, "SELECT 1", -2.5);
        assert_eq!(record.duration_ms(), -2.5);
        assert_eq!(record.duration(), None);

        let record = QueryRecord::new(None, "SELECT 1", 500.0);
        assert_eq!(record.duration(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn serializes_for_audit_dumps() {
        let record = QueryRecord::new(Some("User Load".into()), "SELECT 1", 0.25);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"label": "User Load", "sql": "SELECT 1", "duration_ms": 0.25})
        );
    }
}
