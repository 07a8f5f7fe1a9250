//! Summaries over a tracked query log.
//!
//! These helpers answer the usual questions asked of a log in tests and audits:
//! how many statements of each kind ran, which entity they belonged to, and
//! whether the same statement was issued over and over (the N+1 signature).

use crate::record::{QueryKind, QueryRecord};
use std::collections::BTreeMap;
use std::collections::HashMap;

/// Aggregate figures for a query log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStats {
    /// Total number of statements.
    pub total_queries: usize,
    /// Number of SELECT queries.
    pub select_count: usize,
    /// Number of INSERT queries.
    pub insert_count: usize,
    /// Number of UPDATE queries.
    pub update_count: usize,
    /// Number of DELETE queries.
    pub delete_count: usize,
    /// Statements starting with none of the four verbs (BEGIN, COMMIT, DDL, ...).
    pub unclassified_count: usize,
    /// Sum of all durations, in milliseconds.
    pub total_duration_ms: f64,
    /// Longest duration, in milliseconds.
    pub max_duration_ms: f64,
    /// Slowest statement's SQL.
    pub slowest_query: Option<String>,
}

impl QueryStats {
    /// Compute statistics for `records`.
    pub fn from_records(records: &[QueryRecord]) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total_queries += 1;
            match record.kind() {
                Some(QueryKind::Select) => stats.select_count += 1,
                Some(QueryKind::Insert) => stats.insert_count += 1,
                Some(QueryKind::Update) => stats.update_count += 1,
                Some(QueryKind::Delete) => stats.delete_count += 1,
                None => stats.unclassified_count += 1,
            }

            let duration = record.duration_ms();
            stats.total_duration_ms += duration;
            if stats.slowest_query.is_none() || duration > stats.max_duration_ms {
                stats.max_duration_ms = duration;
                stats.slowest_query = Some(record.sql().to_string());
            }
        }
        stats
    }

    /// Number of statements of the given kind.
    pub fn count(&self, kind: QueryKind) -> usize {
        match kind {
            QueryKind::Select => self.select_count,
            QueryKind::Insert => self.insert_count,
            QueryKind::Update => self.update_count,
            QueryKind::Delete => self.delete_count,
        }
    }
}

/// Group records by [`QueryRecord::entity_name`], keeping log order inside each group.
///
/// Unlabelled statements are grouped under `None`.
pub fn group_by_entity(records: &[QueryRecord]) -> BTreeMap<Option<&str>, Vec<&QueryRecord>> {
    let mut groups: BTreeMap<Option<&str>, Vec<&QueryRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.entity_name()).or_default().push(record);
    }
    groups
}

/// A statement text that was issued several times.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatedStatement {
    pub sql: String,
    /// Entity of the first occurrence.
    pub entity_name: Option<String>,
    pub count: usize,
    /// Combined duration of all occurrences, in milliseconds.
    pub total_duration_ms: f64,
}

/// Statements whose exact SQL text appears at least `min_count` times.
///
/// With bind parameters, the per-row queries of an N+1 pattern share one SQL
/// text, so they show up here as a single entry. Results are in first-seen
/// order. A `min_count` below 2 is treated as 2.
pub fn repeated_statements(records: &[QueryRecord], min_count: usize) -> Vec<RepeatedStatement> {
    let min_count = min_count.max(2);
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut seen: Vec<RepeatedStatement> = Vec::new();

    for record in records {
        match index.get(record.sql()) {
            Some(&i) => {
                seen[i].count += 1;
                seen[i].total_duration_ms += record.duration_ms();
            }
            None => {
                index.insert(record.sql(), seen.len());
                seen.push(RepeatedStatement {
                    sql: record.sql().to_string(),
                    entity_name: record.entity_name().map(str::to_owned),
                    count: 1,
                    total_duration_ms: record.duration_ms(),
                });
            }
        }
    }

    seen.retain(|statement| statement.count >= min_count);
    seen
}
