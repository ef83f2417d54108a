use std::sync::Arc;

use anyhow::{anyhow, Result};
use approval_sweeper::model::{
    ActivityEntry, ContentPost, NewActivity, PostStatus, TaskFilter, TaskItem,
};
use approval_sweeper::pricing::CompletionService;
use approval_sweeper::server::{router, AppState};
use approval_sweeper::store::{SqliteStore, Store, StoreError, UserResolver};
use approval_sweeper::sweep::SweepSettings;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;

async fn sqlite_store() -> Arc<SqliteStore> {
    let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
    store.run_migrations().await.unwrap();
    Arc::new(store)
}

fn app_with(
    store: Arc<dyn Store>,
    users: Option<Arc<dyn UserResolver>>,
    pricing: Option<Arc<dyn CompletionService>>,
) -> Router {
    router(Arc::new(AppState {
        store,
        users,
        pricing,
        settings: SweepSettings::default(),
    }))
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

struct FailingStore;

#[async_trait::async_trait]
impl Store for FailingStore {
    async fn select_due_posts(&self, _now: DateTime<Utc>) -> Result<Vec<ContentPost>, StoreError> {
        Err(StoreError::Status {
            status: 503,
            body: "store unavailable".into(),
        })
    }

    async fn approve_posts(
        &self,
        _ids: &[Uuid],
        _approved_at: DateTime<Utc>,
    ) -> Result<Vec<ContentPost>, StoreError> {
        unreachable!("select always fails")
    }

    async fn complete_tasks(
        &self,
        _filter: &TaskFilter,
        _completed_at: DateTime<Utc>,
    ) -> Result<Vec<TaskItem>, StoreError> {
        unreachable!("select always fails")
    }

    async fn append_activity(&self, _entry: &NewActivity) -> Result<ActivityEntry, StoreError> {
        unreachable!("select always fails")
    }
}

#[derive(Default)]
struct RecordingResolver {
    tokens: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl UserResolver for RecordingResolver {
    async fn resolve_user(&self, access_token: &str) -> Result<Option<String>, StoreError> {
        self.tokens.lock().await.push(access_token.to_string());
        Ok(Some("user-1".into()))
    }
}

struct CannedCompletion(Result<String, String>);

#[async_trait::async_trait]
impl CompletionService for CannedCompletion {
    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        assert!(user.contains("Brand identity"));
        self.0.clone().map_err(|e| anyhow!(e))
    }
}

#[tokio::test]
async fn auto_approve_with_nothing_due() {
    let app = app_with(sqlite_store().await, None, None);
    let req = Request::builder()
        .method("POST")
        .uri("/auto-approve")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body),
        json!({"message": "No posts to auto-approve", "processed": 0})
    );
}

#[tokio::test]
async fn auto_approve_reports_processed_posts() {
    let store = sqlite_store().await;
    let post = ContentPost {
        id: Uuid::new_v4(),
        client_id: Uuid::new_v4(),
        status: PostStatus::PendingApproval,
        approval_deadline: Some(Utc::now() - Duration::hours(1)),
        approved_at: None,
        caption: None,
        platforms: vec!["instagram".into(), "tiktok".into()],
    };
    store.insert_post(&post).await.unwrap();
    let app = app_with(store.clone(), None, None);

    let req = Request::builder()
        .method("GET")
        .uri("/functions/v1/auto-approve")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, req).await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["processed"], 1);
    assert_eq!(body["message"], "Auto-approved 1 posts");
    assert_eq!(body["posts"][0]["status"], "approved");
    assert_eq!(body["results"][0]["activity"]["status"], "done");

    let activities = store.list_activities(post.client_id).await.unwrap();
    assert!(activities[0].description.contains("instagram, tiktok"));
}

#[tokio::test]
async fn options_never_reaches_a_handler() {
    // Any handler would answer this empty request with an error status.
    for uri in ["/auto-approve", "/functions/v1/auto-approve", "/log", "/pricing-suggestion"] {
        let app = app_with(Arc::new(FailingStore), None, None);
        let req = Request::builder()
            .method("OPTIONS")
            .uri(uri)
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert!(body.is_empty(), "{uri}");
    }
}

#[tokio::test]
async fn cors_preflight_allows_any_origin() {
    let app = app_with(Arc::new(FailingStore), None, None);
    let req = Request::builder()
        .method("OPTIONS")
        .uri("/auto-approve")
        .header("Origin", "https://dashboard.example.com")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "authorization, content-type")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|h| h.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn auto_approve_store_failure_is_500() {
    let app = app_with(Arc::new(FailingStore), None, None);
    let req = Request::builder()
        .method("POST")
        .uri("/auto-approve")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(&body);
    assert!(body["error"].as_str().unwrap().contains("store unavailable"));
    assert_eq!(body["details"], "select stage failed");
}

#[tokio::test]
async fn log_collector_accepts_batch_and_resolves_sender() {
    let resolver = Arc::new(RecordingResolver::default());
    let app = app_with(
        Arc::new(FailingStore),
        Some(resolver.clone() as Arc<dyn UserResolver>),
        None,
    );
    let payload = json!([
        {"level": "info", "message": "page loaded", "correlationId": "abc"},
        {"level": "error", "message": "save failed", "error": {"message": "timeout"}}
    ]);
    let req = Request::builder()
        .method("POST")
        .uri("/log")
        .header("Content-Type", "application/json")
        .header("Authorization", "Bearer token-123")
        .body(Body::from(payload.to_string()))
        .unwrap();

    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["success"], true);
    assert_eq!(body["logsProcessed"], 2);
    assert_eq!(body["correlationIds"][0], "abc");
    assert_eq!(body["correlationIds"].as_array().unwrap().len(), 2);
    assert_eq!(*resolver.tokens.lock().await, vec!["token-123".to_string()]);
}

#[tokio::test]
async fn log_collector_keeps_entries_with_unknown_level() {
    let app = app_with(Arc::new(FailingStore), None, None);
    let payload = json!([
        {"level": "notice", "message": "custom level", "correlationId": "c-1"},
        {"level": "info", "message": "page loaded", "correlationId": "c-2"}
    ]);
    let req = Request::builder()
        .method("POST")
        .uri("/log")
        .body(Body::from(payload.to_string()))
        .unwrap();

    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["logsProcessed"], 2);
    assert_eq!(body["correlationIds"], json!(["c-1", "c-2"]));
}

#[tokio::test]
async fn log_collector_rejects_malformed_body() {
    let app = app_with(Arc::new(FailingStore), None, None);
    let req = Request::builder()
        .method("POST")
        .uri("/functions/v1/log")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["error"], "invalid log payload");
}

#[tokio::test]
async fn pricing_suggestion_extracts_json() {
    let completion = CannedCompletion(Ok(
        "Based on the scope: {\"suggestedPrice\": 2500, \"pricingModel\": \"project\"}".into(),
    ));
    let app = app_with(Arc::new(FailingStore), None, Some(Arc::new(completion)));
    let req = Request::builder()
        .method("POST")
        .uri("/pricing-suggestion")
        .body(Body::from(
            json!({"serviceType": "Brand identity", "deliverables": ["logo"]}).to_string(),
        ))
        .unwrap();

    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["suggestion"]["suggestedPrice"], 2500);
}

#[tokio::test]
async fn pricing_suggestion_without_json_is_500() {
    let completion = CannedCompletion(Ok("I would charge a fair amount.".into()));
    let app = app_with(Arc::new(FailingStore), None, Some(Arc::new(completion)));
    let req = Request::builder()
        .method("POST")
        .uri("/pricing-suggestion")
        .body(Body::from(json!({"serviceType": "Brand identity"}).to_string()))
        .unwrap();

    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(&body)["error"], "failed to generate pricing suggestion");
}

#[tokio::test]
async fn pricing_suggestion_unconfigured_is_503() {
    let app = app_with(Arc::new(FailingStore), None, None);
    let req = Request::builder()
        .method("POST")
        .uri("/pricing-suggestion")
        .body(Body::from(json!({"serviceType": "Brand identity"}).to_string()))
        .unwrap();

    let (status, _) = send(app, req).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
