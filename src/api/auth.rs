//! Bearer-token authentication for the notification routes.
//!
//! Tokens are minted by the application's login flow: HS256 JWTs signed
//! with `JWT_SECRET` carrying the user id in the `id` claim. Tokens without
//! `exp` are accepted; an `exp` in the past is rejected.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct UserClaims {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Authenticated caller, inserted into request extensions by [`require_user`].
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
}

pub fn decode_user_token(token: &str, secret: &str) -> anyhow::Result<UserClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    let data = decode::<UserClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Middleware: rejects requests without a valid user bearer token.
pub async fn require_user(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(AppError::Unauthorized)?;

    let claims = decode_user_token(token, &state.config.jwt_secret).map_err(|e| {
        tracing::warn!(error = %e, "rejected user token");
        AppError::Unauthorized
    })?;

    req.extensions_mut().insert(AuthUser { id: claims.id });
    Ok(next.run(req).await)
}
