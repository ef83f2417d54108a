//! Store abstraction over the agency's hosted tables.
//!
//! Two backends implement [`Store`]:
//! - `rest`: the hosted PostgREST-style HTTP API used in production.
//! - `sqlite`: a local SQLite database for development and integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::model::{ActivityEntry, ContentPost, NewActivity, TaskFilter, TaskItem};

pub mod rest;
pub mod sqlite;

pub use rest::RestStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to reach store: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid store response: {0}")]
    Decode(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Posts in `pending_approval` whose non-null deadline is at or before `now`.
    async fn select_due_posts(&self, now: DateTime<Utc>) -> Result<Vec<ContentPost>, StoreError>;

    /// Flip exactly `ids` to `approved` in one statement and return the post-images.
    async fn approve_posts(
        &self,
        ids: &[Uuid],
        approved_at: DateTime<Utc>,
    ) -> Result<Vec<ContentPost>, StoreError>;

    /// Mark every task matching `filter` completed and return the updated rows.
    async fn complete_tasks(
        &self,
        filter: &TaskFilter,
        completed_at: DateTime<Utc>,
    ) -> Result<Vec<TaskItem>, StoreError>;

    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityEntry, StoreError>;
}

/// Resolves a caller's bearer token to a user id.
#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn resolve_user(&self, access_token: &str) -> Result<Option<String>, StoreError>;
}

/// Store handles built from configuration.
pub struct Backends {
    pub store: Arc<dyn Store>,
    pub users: Option<Arc<dyn UserResolver>>,
}

/// Construct the configured backend. The sqlite backend runs its migrations first.
pub async fn connect(cfg: &config::Store) -> anyhow::Result<Backends> {
    match cfg {
        config::Store::Rest { url, service_key } => {
            let store = Arc::new(RestStore::new(url, service_key.clone())?);
            Ok(Backends {
                store: store.clone(),
                users: Some(store),
            })
        }
        config::Store::Sqlite { database_url } => {
            let store = SqliteStore::connect(database_url).await?;
            store.run_migrations().await?;
            Ok(Backends {
                store: Arc::new(store),
                users: None,
            })
        }
    }
}

/// RFC 3339 with a fixed `Z` suffix and microsecond precision, so stored values sort lexically.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
