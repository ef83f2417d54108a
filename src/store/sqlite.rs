use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

use super::{format_ts, Store, StoreError};
use crate::model::{ActivityEntry, ContentPost, NewActivity, PostStatus, TaskFilter, TaskItem};

const POST_COLUMNS: &str =
    "id, client_id, status, approval_deadline, approved_at, caption, platforms";
const TASK_COLUMNS: &str = "id, client_id, title, completed, completed_at, due_date";

/// Local SQLite mirror of the hosted tables.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let normalized = prepare_sqlite_url(database_url);
        let in_memory = normalized.starts_with("sqlite::memory");
        let mut options = SqliteConnectOptions::from_str(&normalized)?.create_if_missing(true);
        if !in_memory {
            // File-backed databases: WAL journal, fsync on every commit.
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Full);
        }
        // Every in-memory connection is its own database; pin the pool to one.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_post(&self, post: &ContentPost) -> Result<(), StoreError> {
        let platforms =
            serde_json::to_string(&post.platforms).map_err(|e| StoreError::Decode(e.to_string()))?;
        sqlx::query(
            "INSERT INTO content_posts (id, client_id, status, approval_deadline, approved_at, caption, platforms) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(post.id.to_string())
        .bind(post.client_id.to_string())
        .bind(post.status.as_str())
        .bind(post.approval_deadline.map(format_ts))
        .bind(post.approved_at.map(format_ts))
        .bind(post.caption.as_deref())
        .bind(platforms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_task(&self, task: &TaskItem) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tasks (id, client_id, title, completed, completed_at, due_date) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(task.client_id.to_string())
        .bind(&task.title)
        .bind(task.completed)
        .bind(task.completed_at.map(format_ts))
        .bind(task.due_date.map(format_ts))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_post(&self, id: Uuid) -> Result<Option<ContentPost>, StoreError> {
        let sql = format!("SELECT {} FROM content_posts WHERE id = ?", POST_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(post_from_row).transpose()
    }

    pub async fn get_task(&self, id: Uuid) -> Result<Option<TaskItem>, StoreError> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    pub async fn list_activities(&self, client_id: Uuid) -> Result<Vec<ActivityEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, client_id, type, description, created_at, created_by FROM activities WHERE client_id = ? ORDER BY created_at ASC",
        )
        .bind(client_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(activity_from_row).collect()
    }

    pub async fn count_activities(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM activities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip_all)]
    async fn select_due_posts(&self, now: DateTime<Utc>) -> Result<Vec<ContentPost>, StoreError> {
        let sql = format!(
            "SELECT {} FROM content_posts WHERE status = ? AND approval_deadline IS NOT NULL AND approval_deadline <= ? ORDER BY approval_deadline ASC",
            POST_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(PostStatus::PendingApproval.as_str())
            .bind(format_ts(now))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(post_from_row).collect()
    }

    #[instrument(skip_all, fields(count = ids.len()))]
    async fn approve_posts(
        &self,
        ids: &[Uuid],
        approved_at: DateTime<Utc>,
    ) -> Result<Vec<ContentPost>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE content_posts SET status = ?, approved_at = ? WHERE id IN ({}) RETURNING {}",
            placeholders, POST_COLUMNS
        );
        let mut query = sqlx::query(&sql)
            .bind(PostStatus::Approved.as_str())
            .bind(format_ts(approved_at));
        for id in ids {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(post_from_row).collect()
    }

    #[instrument(skip_all, fields(client_id = %filter.client_id))]
    async fn complete_tasks(
        &self,
        filter: &TaskFilter,
        completed_at: DateTime<Utc>,
    ) -> Result<Vec<TaskItem>, StoreError> {
        let sql = format!(
            "UPDATE tasks SET completed = 1, completed_at = ? WHERE client_id = ? AND title = ? AND completed = 0 AND due_date IS NOT NULL AND due_date >= ? AND due_date <= ? RETURNING {}",
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(format_ts(completed_at))
            .bind(filter.client_id.to_string())
            .bind(&filter.title)
            .bind(format_ts(filter.due_from))
            .bind(format_ts(filter.due_to))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    #[instrument(skip_all, fields(client_id = %entry.client_id))]
    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityEntry, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO activities (id, client_id, type, description, created_at, created_by) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(entry.client_id.to_string())
        .bind(&entry.kind)
        .bind(&entry.description)
        .bind(format_ts(entry.created_at))
        .bind(&entry.created_by)
        .execute(&self.pool)
        .await?;
        Ok(ActivityEntry {
            id,
            client_id: entry.client_id,
            kind: entry.kind.clone(),
            description: entry.description.clone(),
            created_at: entry.created_at,
            created_by: entry.created_by.clone(),
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Decode(format!("bad uuid {:?}: {}", raw, e)))
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Decode(format!("bad timestamp {:?}: {}", raw, e)))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(parse_ts).transpose()
}

fn post_from_row(row: &SqliteRow) -> Result<ContentPost, StoreError> {
    let status: String = row.try_get("status")?;
    let platforms: String = row.try_get("platforms")?;
    Ok(ContentPost {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        client_id: parse_uuid(&row.try_get::<String, _>("client_id")?)?,
        status: PostStatus::parse_status(&status)
            .ok_or_else(|| StoreError::Decode(format!("unknown post status {:?}", status)))?,
        approval_deadline: parse_opt_ts(row.try_get("approval_deadline")?)?,
        approved_at: parse_opt_ts(row.try_get("approved_at")?)?,
        caption: row.try_get("caption")?,
        platforms: serde_json::from_str(&platforms)
            .map_err(|e| StoreError::Decode(format!("bad platforms column: {}", e)))?,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<TaskItem, StoreError> {
    Ok(TaskItem {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        client_id: parse_uuid(&row.try_get::<String, _>("client_id")?)?,
        title: row.try_get("title")?,
        completed: row.try_get("completed")?,
        completed_at: parse_opt_ts(row.try_get("completed_at")?)?,
        due_date: parse_opt_ts(row.try_get("due_date")?)?,
    })
}

fn activity_from_row(row: &SqliteRow) -> Result<ActivityEntry, StoreError> {
    Ok(ActivityEntry {
        id: parse_uuid(&row.try_get::<String, _>("id")?)?,
        client_id: parse_uuid(&row.try_get::<String, _>("client_id")?)?,
        kind: row.try_get("type")?,
        description: row.try_get("description")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        created_by: row.try_get("created_by")?,
    })
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}
