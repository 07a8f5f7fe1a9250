//! # sqlspy
//!
//! Scoped SQL query tracking for test suites and performance audits.
//!
//! ## Features
//!
//! - **Scoped**: [`track`] listens only while the given operation runs, and always
//!   stops listening before returning, whether the operation succeeds, fails or panics
//! - **Filtered**: schema-introspection statements and cached results are skipped
//! - **Structured**: every statement becomes a [`QueryRecord`] with its label, SQL,
//!   duration and SELECT/INSERT/UPDATE/DELETE classification
//! - **Injectable**: tracking works against any [`EventSource`]; [`Notifier`] is the
//!   built-in in-process one, and [`InstrumentedClient`] publishes to it from
//!   `tokio-postgres`
//!
//! ## Example
//!
//! ```ignore
//! use sqlspy::{InstrumentedClient, Notifier, group_by_entity, track_async};
//!
//! let client = InstrumentedClient::new(pg_client);
//!
//! let queries = track_async(Notifier::global(), async {
//!     let users = client.query_tagged("User Load", "SELECT id FROM users", &[]).await?;
//!     for user in &users {
//!         let id: i64 = user.get(0);
//!         client
//!             .query_tagged("Post Load", "SELECT * FROM posts WHERE user_id = $1", &[&id])
//!             .await?;
//!     }
//!     Ok::<_, sqlspy::SpyError>(())
//! })
//! .await?;
//!
//! // One query for the users, then one per user: an N+1.
//! let by_entity = group_by_entity(&queries);
//! assert_eq!(by_entity[&Some("User")].len(), 1);
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod instrumented;
pub mod notify;
pub mod record;
pub mod stats;
pub mod track;
pub mod tracker;

pub use client::GenericClient;
pub use config::{SCHEMA_LABEL, TrackConfig};
pub use error::{SpyError, SpyResult};
pub use instrumented::InstrumentedClient;
pub use notify::{Event, EventListener, EventSource, Notifier, Payload, SQL_EXECUTE, Subscription};
pub use record::{QueryKind, QueryRecord};
pub use stats::{QueryStats, RepeatedStatement, group_by_entity, repeated_statements};
pub use track::{track, track_async, track_async_with_config, track_with, track_with_config};
pub use tracker::Tracker;
