//! HTTP surface: the auto-approve trigger, the client log collector and the
//! pricing assistant, each reachable at `/<name>` and `/functions/v1/<name>`.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::logsink::{self, LogBatch};
use crate::model::ContentPost;
use crate::pricing::{self, CompletionService, PricingRequest};
use crate::store::{Store, UserResolver};
use crate::sweep::{self, PostOutcome, SweepSettings};

/// Everything a request handler needs, built once at startup and injected.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub users: Option<Arc<dyn UserResolver>>,
    pub pricing: Option<Arc<dyn CompletionService>>,
    pub settings: SweepSettings,
}

pub async fn serve(state: Arc<AppState>, bind_addr: &str) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "http server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Build the router (separated for testing).
pub fn router(state: Arc<AppState>) -> Router {
    // The CORS layer answers every OPTIONS request itself, so no handler sees one.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
        ]);

    Router::new()
        .route("/health", get(health))
        .route("/auto-approve", any(auto_approve))
        .route("/functions/v1/auto-approve", any(auto_approve))
        .route("/log", post(collect_logs))
        .route("/functions/v1/log", post(collect_logs))
        .route("/pricing-suggestion", post(suggest_pricing))
        .route("/functions/v1/pricing-suggestion", post(suggest_pricing))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct AutoApproveResponse {
    pub message: String,
    pub processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posts: Option<Vec<ContentPost>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<PostOutcome>>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn error_response(status: StatusCode, error: impl Into<String>, details: Option<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.into(),
            details,
        }),
    )
        .into_response()
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn auto_approve(State(state): State<Arc<AppState>>) -> Response {
    match sweep::run(state.store.as_ref(), &state.settings, Utc::now()).await {
        Ok(report) if report.processed() == 0 => Json(AutoApproveResponse {
            message: "No posts to auto-approve".into(),
            processed: 0,
            posts: None,
            results: None,
        })
        .into_response(),
        Ok(report) => {
            let processed = report.processed();
            let failed_steps = report.failed_steps();
            if failed_steps > 0 {
                warn!(processed, failed_steps, "auto-approval finished with cascade failures");
            }
            Json(AutoApproveResponse {
                message: format!("Auto-approved {} posts", processed),
                processed,
                posts: Some(report.approved),
                results: Some(report.outcomes),
            })
            .into_response()
        }
        Err(err) => {
            error!(error = %err, stage = err.stage(), "auto-approval aborted");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                err.store_error().to_string(),
                Some(format!("{} stage failed", err.stage())),
            )
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn collect_logs(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let batch: LogBatch = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid log payload", Some(err.to_string()))
        }
    };

    let acting_user = match (bearer_token(&headers), state.users.as_ref()) {
        (Some(token), Some(users)) => match users.resolve_user(token).await {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "failed to resolve log sender");
                None
            }
        },
        _ => None,
    };

    let summary = logsink::ingest(batch.into_entries(), acting_user.as_deref());
    Json(summary).into_response()
}

async fn suggest_pricing(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Some(service) = state.pricing.as_ref() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "pricing assistant is not configured", None);
    };
    let request: PricingRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid pricing request", Some(err.to_string()))
        }
    };
    if request.service_type.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "serviceType must be non-empty", None);
    }

    match pricing::suggest(service.as_ref(), &request).await {
        Ok(suggestion) => Json(serde_json::json!({ "suggestion": suggestion })).into_response(),
        Err(err) => {
            error!(error = %err, "pricing suggestion failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to generate pricing suggestion",
                Some(format!("{:#}", err)),
            )
        }
    }
}
