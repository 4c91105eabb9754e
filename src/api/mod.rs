use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::AppState;

pub mod auth;
pub mod handlers;

/// Build the notification API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/notifications/subscribe", post(handlers::subscribe))
        .route("/notifications/unsubscribe", post(handlers::unsubscribe))
        .route("/notifications/test", post(handlers::send_test))
        .route("/notifications/vapid-key", get(handlers::vapid_key))
        .layer(middleware::from_fn_with_state(state, auth::require_user))
        .fallback(fallback_404)
}

/// Full application: health check plus the API under `/api/v1`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .nest("/api/v1", api_router(state.clone()))
        .with_state(state)
        .layer(middleware::from_fn(response_headers))
        .layer(TraceLayer::new_for_http())
}

static REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Echo or mint `x-request-id` and mark responses as private and non-embeddable.
async fn response_headers(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&REQUEST_ID)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .cloned()
        .or_else(|| HeaderValue::try_from(Uuid::new_v4().to_string()).ok());

    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    if let Some(id) = request_id {
        headers.insert(REQUEST_ID.clone(), id);
    }
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("cache-control", HeaderValue::from_static("no-store"));
    resp
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}
