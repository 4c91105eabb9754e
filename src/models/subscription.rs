use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A browser push subscription owned by one user.
///
/// At most one row exists per `(user_id, endpoint)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: Uuid,
    /// Push service URL for one installed application instance.
    pub endpoint: String,
    /// Browser auth secret (base64url), opaque to this service.
    pub keys_auth: String,
    /// Browser ECDH public key (base64url), opaque to this service.
    pub keys_p256dh: String,
    pub created_at: DateTime<Utc>,
}

/// Insert-or-update input for [`crate::store::SubscriptionStore::upsert`].
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: Uuid,
    pub endpoint: String,
    pub keys_auth: String,
    pub keys_p256dh: String,
}
