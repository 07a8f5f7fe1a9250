use crate::client::GenericClient;
use crate::error::SpyResult;
use crate::notify::{Notifier, Payload, SQL_EXECUTE};
use serde_json::Value;
use std::time::Instant;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// A database client that publishes a query-execution event for every statement.
///
/// Each statement is timed and published on the configured [`Notifier`]
/// (default: [`Notifier::global`]) under [`SQL_EXECUTE`], with the payload
///
/// | field         | value                                        |
/// |---------------|----------------------------------------------|
/// | `name`        | the statement tag, or `null` for untagged    |
/// | `sql`         | the statement text                           |
/// | `cached`      | always `false`: every statement hits Postgres |
/// | `param_count` | number of bind parameters                    |
/// | `rows` / `affected` / `error` | the statement outcome        |
///
/// Failed statements are published too, before their error is returned.
pub struct InstrumentedClient<C> {
    client: C,
    notifier: Notifier,
    topic: String,
    max_sql_length: Option<usize>,
}

impl<C: GenericClient> InstrumentedClient<C> {
    /// Wrap `client`, publishing on the global notifier.
    pub fn new(client: C) -> Self {
        Self {
            client,
            notifier: Notifier::global().clone(),
            topic: SQL_EXECUTE.to_string(),
            max_sql_length: Some(200),
        }
    }

    /// Publish on `notifier` instead of the global one.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Publish on a different topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set maximum SQL length (in bytes) for debug logging.
    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    /// Log full SQL text.
    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Get a reference to the inner client.
    pub fn inner(&self) -> &C {
        &self.client
    }

    /// Get the inner client, consuming this wrapper.
    pub fn into_inner(self) -> C {
        self.client
    }

    fn truncate_sql<'a>(&self, sql: &'a str) -> std::borrow::Cow<'a, str> {
        match self.max_sql_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)).into(),
            _ => sql.into(),
        }
    }

    fn publish(
        &self,
        tag: Option<&str>,
        sql: &str,
        param_count: usize,
        started: Instant,
        outcome: (&str, Value),
    ) {
        let finished = Instant::now();

        tracing::debug!(
            target: "sqlspy.sql",
            tag = tag.unwrap_or("-"),
            param_count,
            elapsed = ?finished.duration_since(started),
            sql = %self.truncate_sql(sql),
        );

        let mut payload = Payload::new();
        payload.insert("name".into(), tag.into());
        payload.insert("sql".into(), sql.into());
        payload.insert("cached".into(), false.into());
        payload.insert("param_count".into(), param_count.into());
        payload.insert(outcome.0.into(), outcome.1);
        self.notifier.publish(&self.topic, started, finished, &payload);
    }

    async fn query_inner(
        &self,
        tag: Option<&str>,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> SpyResult<Vec<Row>> {
        let started = Instant::now();
        let result = self.client.query(sql, params).await;
        let outcome: (&str, Value) = match &result {
            Ok(rows) => ("rows", rows.len().into()),
            Err(e) => ("error", e.to_string().into()),
        };
        self.publish(tag, sql, params.len(), started, outcome);
        result
    }

    async fn execute_inner(
        &self,
        tag: Option<&str>,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> SpyResult<u64> {
        let started = Instant::now();
        let result = self.client.execute(sql, params).await;
        let outcome: (&str, Value) = match &result {
            Ok(n) => ("affected", (*n).into()),
            Err(e) => ("error", e.to_string().into()),
        };
        self.publish(tag, sql, params.len(), started, outcome);
        result
    }
}

impl<C: GenericClient> GenericClient for InstrumentedClient<C> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> SpyResult<Vec<Row>> {
        self.query_inner(None, sql, params).await
    }

    async fn query_tagged(
        &self,
        tag: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> SpyResult<Vec<Row>> {
        self.query_inner(Some(tag), sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> SpyResult<u64> {
        self.execute_inner(None, sql, params).await
    }

    async fn execute_tagged(
        &self,
        tag: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> SpyResult<u64> {
        self.execute_inner(Some(tag), sql, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpyError;
    use crate::{TrackConfig, track_async, track_async_with_config};

    struct DummyClient;
    impl GenericClient for DummyClient {
        async fn query(&self, _: &str, _: &[&(dyn ToSql + Sync)]) -> SpyResult<Vec<Row>> {
            Ok(vec![])
        }
        async fn execute(&self, _: &str, _: &[&(dyn ToSql + Sync)]) -> SpyResult<u64> {
            Ok(1)
        }
    }

    struct FailingClient;
    impl GenericClient for FailingClient {
        async fn query(&self, _: &str, _: &[&(dyn ToSql + Sync)]) -> SpyResult<Vec<Row>> {
            Err(SpyError::other("relation \"users\" does not exist"))
        }
        async fn execute(&self, _: &str, _: &[&(dyn ToSql + Sync)]) -> SpyResult<u64> {
            Err(SpyError::other("relation \"users\" does not exist"))
        }
    }

    #[test]
    fn truncate_sql_respects_char_boundaries() {
        assert_eq!(truncate_sql_bytes("SELECT 1", 20), "SELECT 1");
        assert_eq!(truncate_sql_bytes("SELECT * FROM users", 10), "SELECT * F");
        assert_eq!(truncate_sql_bytes("SELECT 'é'", 9), "SELECT '");
    }

    #[test]
    fn truncate_sql_for_logging() {
        let client = InstrumentedClient::new(DummyClient).max_sql_length(10);
        assert_eq!(client.truncate_sql("SELECT * FROM users"), "SELECT * F...");
        assert_eq!(client.truncate_sql("SELECT 1"), "SELECT 1");
        let client = client.no_truncate();
        assert_eq!(client.truncate_sql("SELECT * FROM users"), "SELECT * FROM users");
    }

    #[tokio::test]
    async fn tagged_statements_are_tracked() {
        let notifier = Notifier::new();
        let client = InstrumentedClient::new(DummyClient).with_notifier(notifier.clone());

        let queries = track_async(&notifier, async {
            client
                .query_tagged("User Load", "SELECT * FROM users WHERE name = $1", &[&"mario"])
                .await?;
            client
                .execute_tagged("User Update", "UPDATE users SET name = $1", &[&"luigi"])
                .await?;
            client.query_one("SELECT COUNT(*) FROM users", &[]).await.ok();
            Ok::<_, SpyError>(())
        })
        .await
        .unwrap();

        assert_eq!(queries.len(), 3);
        assert!(queries[0].is_select());
        assert_eq!(queries[0].entity_name(), Some("User"));
        assert!(queries[1].is_update());
        assert_eq!(queries[1].label(), Some("User Update"));
        assert_eq!(queries[2].label(), None);
        assert!(queries.iter().all(|q| q.duration_ms() >= 0.0));
    }

    #[tokio::test]
    async fn payload_describes_the_outcome() {
        let notifier = Notifier::new();
        let payloads = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = payloads.clone();
        let subscription = crate::EventSource::subscribe(
            &notifier,
            SQL_EXECUTE,
            std::sync::Arc::new(move |event: &crate::Event<'_>| {
                sink.lock().unwrap().push(event.payload.clone());
            }),
        )
        .unwrap();

        let ok = InstrumentedClient::new(DummyClient).with_notifier(notifier.clone());
        ok.execute("DELETE FROM users", &[]).await.unwrap();
        let failing = InstrumentedClient::new(FailingClient).with_notifier(notifier.clone());
        failing.query_tagged("SCHEMA", "SELECT 1", &[]).await.unwrap_err();

        crate::EventSource::unsubscribe(&notifier, subscription).unwrap();

        let payloads = payloads.lock().unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0]["name"], Value::Null);
        assert_eq!(payloads[0]["cached"], Value::Bool(false));
        assert_eq!(payloads[0]["affected"], 1);
        assert_eq!(payloads[0]["param_count"], 0);
        assert_eq!(payloads[1]["name"], "SCHEMA");
        assert_eq!(payloads[1]["error"], "relation \"users\" does not exist");
    }

    #[tokio::test]
    async fn failed_statement_error_propagates_through_tracking() {
        let notifier = Notifier::new();
        let client = InstrumentedClient::new(FailingClient).with_notifier(notifier.clone());

        let err = track_async(&notifier, async {
            client.query_tagged("User Load", "SELECT * FROM users", &[]).await?;
            Ok::<_, SpyError>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, SpyError::Other(_)));
        assert_eq!(notifier.listener_count(SQL_EXECUTE), 0);
    }

    #[tokio::test]
    async fn custom_topic_pairs_with_tracking_config() {
        let notifier = Notifier::new();
        let client = InstrumentedClient::new(DummyClient)
            .with_notifier(notifier.clone())
            .with_topic("sql.replica");
        let config = TrackConfig::new().with_topic("sql.replica");

        let (_, queries) = track_async_with_config(&notifier, &config, async {
            client.query("SELECT 1", &[]).await?;
            Ok::<_, SpyError>(())
        })
        .await
        .unwrap();

        assert_eq!(queries.len(), 1);
    }
}
