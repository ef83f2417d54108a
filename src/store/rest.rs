use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{format_ts, Store, StoreError, UserResolver};
use crate::model::{ActivityEntry, ContentPost, NewActivity, PostStatus, TaskFilter, TaskItem};

const POSTS_TABLE: &str = "content_posts";
const TASKS_TABLE: &str = "tasks";
const ACTIVITIES_TABLE: &str = "activities";

/// Client for the hosted PostgREST-style table API.
#[derive(Clone)]
pub struct RestStore {
    http: Client,
    base_url: Url,
    service_key: String,
}

impl fmt::Debug for RestStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestStore")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestStore {
    pub fn new(base_url: &str, service_key: String) -> anyhow::Result<Self> {
        // Url::join drops the last path segment unless the base ends with '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized).context("invalid store base URL")?;
        let http = Client::builder()
            .user_agent("approval-sweeper/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            service_key,
        })
    }

    fn table_url(&self, table: &str, query: &[(&str, String)]) -> Result<Url, StoreError> {
        let mut url = self
            .base_url
            .join(&format!("rest/v1/{}", table))
            .map_err(|e| StoreError::Decode(format!("invalid table URL: {}", e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn build_request(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<reqwest::Request, StoreError> {
        let mut builder = self
            .http
            .request(method, url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Accept", "application/json");
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/json")
                .header("Prefer", "return=representation")
                .json(body);
        }
        Ok(builder.build()?)
    }

    pub fn select_due_posts_request(&self, now: DateTime<Utc>) -> Result<reqwest::Request, StoreError> {
        let url = self.table_url(
            POSTS_TABLE,
            &[
                ("select", "*".into()),
                ("status", format!("eq.{}", PostStatus::PendingApproval.as_str())),
                ("approval_deadline", "not.is.null".into()),
                ("approval_deadline", format!("lte.{}", format_ts(now))),
            ],
        )?;
        self.build_request(Method::GET, url, None)
    }

    pub fn approve_posts_request(
        &self,
        ids: &[Uuid],
        approved_at: DateTime<Utc>,
    ) -> Result<reqwest::Request, StoreError> {
        let id_list = ids
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let url = self.table_url(POSTS_TABLE, &[("id", format!("in.({})", id_list))])?;
        let body = json!({
            "status": PostStatus::Approved.as_str(),
            "approved_at": format_ts(approved_at),
        });
        self.build_request(Method::PATCH, url, Some(&body))
    }

    pub fn complete_tasks_request(
        &self,
        filter: &TaskFilter,
        completed_at: DateTime<Utc>,
    ) -> Result<reqwest::Request, StoreError> {
        let url = self.table_url(
            TASKS_TABLE,
            &[
                ("client_id", format!("eq.{}", filter.client_id)),
                ("title", format!("eq.{}", filter.title)),
                ("completed", "eq.false".into()),
                ("due_date", format!("gte.{}", format_ts(filter.due_from))),
                ("due_date", format!("lte.{}", format_ts(filter.due_to))),
            ],
        )?;
        let body = json!({
            "completed": true,
            "completed_at": format_ts(completed_at),
        });
        self.build_request(Method::PATCH, url, Some(&body))
    }

    pub fn append_activity_request(&self, entry: &NewActivity) -> Result<reqwest::Request, StoreError> {
        let url = self.table_url(ACTIVITIES_TABLE, &[])?;
        let body = serde_json::to_value(entry).map_err(|e| StoreError::Decode(e.to_string()))?;
        self.build_request(Method::POST, url, Some(&body))
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T, StoreError> {
        debug!(method=%request.method(), url=%request.url(), "sending store request");
        let res = self.http.execute(request).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, %body, "store request failed");
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = res.text().await?;
        serde_json::from_str(&body).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Store for RestStore {
    #[instrument(skip_all)]
    async fn select_due_posts(&self, now: DateTime<Utc>) -> Result<Vec<ContentPost>, StoreError> {
        let request = self.select_due_posts_request(now)?;
        self.execute(request).await
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
        let request = self.approve_posts_request(ids, approved_at)?;
        self.execute(request).await
    }

    #[instrument(skip_all, fields(client_id = %filter.client_id))]
    async fn complete_tasks(
        &self,
        filter: &TaskFilter,
        completed_at: DateTime<Utc>,
    ) -> Result<Vec<TaskItem>, StoreError> {
        let request = self.complete_tasks_request(filter, completed_at)?;
        self.execute(request).await
    }

    #[instrument(skip_all, fields(client_id = %entry.client_id))]
    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityEntry, StoreError> {
        let request = self.append_activity_request(entry)?;
        let mut rows: Vec<ActivityEntry> = self.execute(request).await?;
        if rows.is_empty() {
            return Err(StoreError::Decode("insert returned no rows".into()));
        }
        Ok(rows.swap_remove(0))
    }
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
}

#[async_trait]
impl UserResolver for RestStore {
    #[instrument(skip_all)]
    async fn resolve_user(&self, access_token: &str) -> Result<Option<String>, StoreError> {
        let url = self
            .base_url
            .join("auth/v1/user")
            .map_err(|e| StoreError::Decode(format!("invalid auth URL: {}", e)))?;
        let res = self
            .http
            .get(url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;
        match res.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            status if !status.is_success() => Err(StoreError::Status {
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            }),
            _ => {
                let user: AuthUser = res
                    .json()
                    .await
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                Ok(Some(user.id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn store() -> RestStore {
        RestStore::new("https://db.example.co", "service-key".into()).unwrap()
    }

    fn query_of(request: &reqwest::Request) -> Vec<(String, String)> {
        request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn header<'a>(request: &'a reqwest::Request, name: &str) -> Option<&'a str> {
        request.headers().get(name).and_then(|h| h.to_str().ok())
    }

    #[test]
    fn select_request_filters_pending_posts_past_deadline() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let request = store().select_due_posts_request(now).unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.url().path(), "/rest/v1/content_posts");
        let query = query_of(&request);
        assert!(query.contains(&("status".into(), "eq.pending_approval".into())));
        assert!(query.contains(&("approval_deadline".into(), "not.is.null".into())));
        assert!(query.contains(&(
            "approval_deadline".into(),
            "lte.2024-05-01T12:00:00.000000Z".into()
        )));
        assert_eq!(header(&request, "apikey"), Some("service-key"));
        assert_eq!(header(&request, "Authorization"), Some("Bearer service-key"));
        assert!(request.body().is_none());
    }

    #[test]
    fn approve_request_targets_exact_ids() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let request = store().approve_posts_request(&[a, b], at).unwrap();
        assert_eq!(request.method(), Method::PATCH);
        let query: HashMap<_, _> = query_of(&request).into_iter().collect();
        assert_eq!(query["id"], format!("in.({},{})", a, b));
        assert_eq!(header(&request, "Prefer"), Some("return=representation"));
        let body: Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(body["status"], "approved");
        assert_eq!(body["approved_at"], "2024-05-01T12:00:00.000000Z");
    }

    #[test]
    fn complete_tasks_request_applies_window_and_title() {
        let now = Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap();
        let filter = TaskFilter {
            client_id: Uuid::new_v4(),
            title: "Review Content Post".into(),
            due_from: now - chrono::Duration::days(2),
            due_to: now,
        };
        let request = store().complete_tasks_request(&filter, now).unwrap();
        assert_eq!(request.url().path(), "/rest/v1/tasks");
        let query = query_of(&request);
        assert!(query.contains(&("title".into(), "eq.Review Content Post".into())));
        assert!(query.contains(&("completed".into(), "eq.false".into())));
        assert!(query.contains(&("due_date".into(), "gte.2024-05-01T00:00:00.000000Z".into())));
        assert!(query.contains(&("due_date".into(), "lte.2024-05-03T00:00:00.000000Z".into())));
    }

    #[test]
    fn activity_request_posts_entry() {
        let entry = NewActivity {
            client_id: Uuid::new_v4(),
            kind: "content_approved".into(),
            description: "auto-approved (instagram)".into(),
            created_at: Utc::now(),
            created_by: "System".into(),
        };
        let request = store().append_activity_request(&entry).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().path(), "/rest/v1/activities");
        let body: Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(body["type"], "content_approved");
        assert_eq!(body["created_by"], "System");
    }

    #[test]
    fn base_url_with_path_keeps_prefix() {
        let store = RestStore::new("http://localhost:54321/proxy", "k".into()).unwrap();
        let request = store.select_due_posts_request(Utc::now()).unwrap();
        assert_eq!(request.url().path(), "/proxy/rest/v1/content_posts");
    }
}
