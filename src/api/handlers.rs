use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::api::auth::AuthUser;
use crate::errors::AppError;
use crate::models::subscription::NewSubscription;
use crate::notification::dispatch::{DeliveryReport, TestSend};
use crate::notification::push::{audience_for, DeliveryOutcome};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

/// Browser `PushSubscription.toJSON()` shape.
#[derive(Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Deserialize)]
pub struct SubscriptionKeys {
    pub auth: String,
    pub p256dh: String,
}

#[derive(Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct TestSendResponse {
    pub status: &'static str,
    pub results: Vec<DeliveryReport>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VapidKeyResponse {
    pub public_key: String,
}

fn required(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /api/v1/notifications/subscribe: register or refresh a device
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StatusResponse>), AppError> {
    let Json(payload) = payload?;
    required("endpoint", &payload.endpoint)?;
    required("keys.auth", &payload.keys.auth)?;
    required("keys.p256dh", &payload.keys.p256dh)?;
    audience_for(&payload.endpoint).map_err(|e| AppError::Validation(e.to_string()))?;

    let row = state
        .subscriptions
        .upsert(&NewSubscription {
            user_id: user.id,
            endpoint: payload.endpoint,
            keys_auth: payload.keys.auth,
            keys_p256dh: payload.keys.p256dh,
        })
        .await?;

    tracing::info!(user_id = %user.id, subscription_id = row.id, "push subscription saved");

    Ok((
        StatusCode::CREATED,
        Json(StatusResponse {
            status: "subscribed",
        }),
    ))
}

/// POST /api/v1/notifications/unsubscribe: forget one device (idempotent)
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, AppError> {
    let Json(payload) = payload?;
    required("endpoint", &payload.endpoint)?;

    let removed = state
        .subscriptions
        .delete(user.id, &payload.endpoint)
        .await?;
    tracing::info!(user_id = %user.id, removed, "push subscription removed");

    Ok(Json(StatusResponse {
        status: "unsubscribed",
    }))
}

/// POST /api/v1/notifications/test: push a test notification to every device
pub async fn send_test(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<(StatusCode, Json<TestSendResponse>), AppError> {
    let push = state.push.as_ref().ok_or(AppError::PushNotConfigured)?;

    match push.send_test(user.id).await? {
        TestSend::NoSubscriptions => Ok((
            StatusCode::NOT_FOUND,
            Json(TestSendResponse {
                status: "no-subscriptions",
                results: Vec::new(),
            }),
        )),
        TestSend::Attempted(results) => {
            let status = if results.iter().any(|r| r.outcome.is_delivered()) {
                "sent"
            } else if results
                .iter()
                .all(|r| r.outcome == DeliveryOutcome::SubscriptionExpired)
            {
                "expired-and-removed"
            } else {
                "failed"
            };
            Ok((StatusCode::OK, Json(TestSendResponse { status, results })))
        }
    }
}

/// GET /api/v1/notifications/vapid-key: application server key for `pushManager.subscribe`
pub async fn vapid_key(
    State(state): State<Arc<AppState>>,
) -> Result<Json<VapidKeyResponse>, AppError> {
    let push = state.push.as_ref().ok_or(AppError::PushNotConfigured)?;
    Ok(Json(VapidKeyResponse {
        public_key: push.sender().keys().public_key().to_string(),
    }))
}
