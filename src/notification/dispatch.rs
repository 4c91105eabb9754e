//! Fan-out of one payload to every subscription of a user.
//!
//! Shared by the daily reminder sweep and the API's test send. Expired
//! endpoints are deleted as they are discovered.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::payload::NotificationPayload;
use crate::models::subscription::Subscription;
use crate::notification::push::{DeliveryOutcome, PushSender};
use crate::store::SubscriptionStore;

/// Per-subscription result reported to API callers.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub endpoint: String,
    /// One of `sent`, `failed`, `expired-and-removed`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub outcome: DeliveryOutcome,
}

impl DeliveryReport {
    fn new(endpoint: String, outcome: DeliveryOutcome) -> Self {
        let (status, error) = match &outcome {
            DeliveryOutcome::Delivered => ("sent", None),
            DeliveryOutcome::SubscriptionExpired => ("expired-and-removed", None),
            DeliveryOutcome::DeliveryFailed(failure) => ("failed", Some(failure.to_string())),
        };
        Self {
            endpoint,
            status,
            error,
            outcome,
        }
    }
}

/// Outcome of a user-triggered test notification.
#[derive(Debug, Clone)]
pub enum TestSend {
    /// The user has no subscriptions; nothing was sent.
    NoSubscriptions,
    Attempted(Vec<DeliveryReport>),
}

#[derive(Clone)]
pub struct PushDispatcher {
    store: Arc<dyn SubscriptionStore>,
    sender: PushSender,
}

impl PushDispatcher {
    pub fn new(store: Arc<dyn SubscriptionStore>, sender: PushSender) -> Self {
        Self { store, sender }
    }

    pub fn sender(&self) -> &PushSender {
        &self.sender
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    /// Deliver `payload` to all of the user's subscriptions concurrently.
    ///
    /// Fails only if the subscription list cannot be read. Individual
    /// delivery failures are reported per endpoint.
    pub async fn deliver_to_user(
        &self,
        user_id: Uuid,
        payload: &NotificationPayload,
    ) -> anyhow::Result<Vec<DeliveryReport>> {
        let subscriptions = self.store.list(user_id).await?;
        Ok(self.deliver_all(&subscriptions, payload).await)
    }

    /// Send the fixed test notification to every subscription of `user_id`.
    pub async fn send_test(&self, user_id: Uuid) -> anyhow::Result<TestSend> {
        let subscriptions = self.store.list(user_id).await?;
        if subscriptions.is_empty() {
            return Ok(TestSend::NoSubscriptions);
        }
        let reports = self
            .deliver_all(&subscriptions, &NotificationPayload::test())
            .await;
        Ok(TestSend::Attempted(reports))
    }

    async fn deliver_all(
        &self,
        subscriptions: &[Subscription],
        payload: &NotificationPayload,
    ) -> Vec<DeliveryReport> {
        join_all(subscriptions.iter().map(|sub| self.deliver_one(sub, payload))).await
    }

    async fn deliver_one(
        &self,
        subscription: &Subscription,
        payload: &NotificationPayload,
    ) -> DeliveryReport {
        let outcome = self.sender.send(subscription, payload).await;

        if outcome == DeliveryOutcome::SubscriptionExpired {
            match self
                .store
                .delete(subscription.user_id, &subscription.endpoint)
                .await
            {
                Ok(removed) => info!(
                    user_id = %subscription.user_id,
                    endpoint = %subscription.endpoint,
                    removed,
                    "pruned expired push subscription"
                ),
                // the next delivery will see the 410 again and retry the delete
                Err(e) => warn!(
                    user_id = %subscription.user_id,
                    endpoint = %subscription.endpoint,
                    error = %e,
                    "failed to delete expired push subscription"
                ),
            }
        }

        DeliveryReport::new(subscription.endpoint.clone(), outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::models::subscription::NewSubscription;
    use crate::notification::vapid::VapidKeyPair;
    use crate::store::memory::MemoryStore;

    fn dispatcher(store: &MemoryStore) -> PushDispatcher {
        let keys = VapidKeyPair::generate("mailto:ops@example.com").unwrap();
        let sender = PushSender::new(keys, 60, Duration::from_secs(2)).unwrap();
        PushDispatcher::new(Arc::new(store.clone()), sender)
    }

    async fn subscribe(store: &MemoryStore, user_id: Uuid, endpoint: String) {
        store
            .upsert(&NewSubscription {
                user_id,
                endpoint,
                keys_auth: "auth".into(),
                keys_p256dh: "p256dh".into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_gone_endpoint_is_removed_and_stays_removed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(410))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/live"))
            .respond_with(ResponseTemplate::new(201))
            .expect(2)
            .mount(&mock_server)
            .await;

        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        subscribe(&store, user, format!("{}/gone", mock_server.uri())).await;
        subscribe(&store, user, format!("{}/live", mock_server.uri())).await;

        let dispatcher = dispatcher(&store);
        let reports = dispatcher
            .deliver_to_user(user, &NotificationPayload::test())
            .await
            .unwrap();

        let statuses: Vec<&str> = reports.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec!["expired-and-removed", "sent"]);

        let remaining = store.list(user).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].endpoint.ends_with("/live"));

        // second round only reaches the live endpoint
        let reports = dispatcher
            .deliver_to_user(user, &NotificationPayload::test())
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_keeps_subscription() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        subscribe(&store, user, format!("{}/busy", mock_server.uri())).await;

        let reports = dispatcher(&store)
            .deliver_to_user(user, &NotificationPayload::test())
            .await
            .unwrap();
        assert_eq!(reports[0].status, "failed");
        assert_eq!(reports[0].error.as_deref(), Some("push service returned HTTP 503"));
        assert_eq!(store.list(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_test_without_subscriptions_makes_no_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&mock_server)
            .await;

        let store = MemoryStore::new();
        let outcome = dispatcher(&store).send_test(Uuid::new_v4()).await.unwrap();
        assert!(matches!(outcome, TestSend::NoSubscriptions));
    }

    #[test]
    fn test_report_serialization_omits_outcome() {
        let report = DeliveryReport::new("https://push.example/a".into(), DeliveryOutcome::Delivered);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json, serde_json::json!({"endpoint": "https://push.example/a", "status": "sent"}));
    }
}
