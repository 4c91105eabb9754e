use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::models::payload::NotificationPayload;
use crate::models::subscription::Subscription;
use crate::notification::vapid::VapidKeyPair;

/// Why one delivery attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Push service answered with a non-2xx status other than 404/410.
    Status(u16),
    /// Connection, TLS or timeout error.
    Transport(String),
    /// No credential could be produced; nothing was sent.
    Signing(String),
    /// The stored endpoint is not an absolute http(s) URL.
    InvalidEndpoint(String),
    /// The payload could not be serialized; nothing was sent.
    Payload(String),
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFailure::Status(code) => write!(f, "push service returned HTTP {}", code),
            DeliveryFailure::Transport(e) => write!(f, "transport error: {}", e),
            DeliveryFailure::Signing(e) => write!(f, "signing error: {}", e),
            DeliveryFailure::InvalidEndpoint(e) => write!(f, "invalid endpoint: {}", e),
            DeliveryFailure::Payload(e) => write!(f, "payload encoding error: {}", e),
        }
    }
}

/// Result of one delivery attempt to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// 404 or 410: the endpoint no longer exists and must be removed.
    SubscriptionExpired,
    DeliveryFailed(DeliveryFailure),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Classify a push service status code.
pub fn classify_status(status: u16) -> DeliveryOutcome {
    match status {
        200..=299 => DeliveryOutcome::Delivered,
        404 | 410 => DeliveryOutcome::SubscriptionExpired,
        other => DeliveryOutcome::DeliveryFailed(DeliveryFailure::Status(other)),
    }
}

/// Origin of a push endpoint, used as the credential audience.
pub fn audience_for(endpoint: &str) -> Result<String, DeliveryFailure> {
    let url = Url::parse(endpoint).map_err(|e| DeliveryFailure::InvalidEndpoint(e.to_string()))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(DeliveryFailure::InvalidEndpoint(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(DeliveryFailure::InvalidEndpoint("endpoint has no host".into()));
    }
    Ok(origin.ascii_serialization())
}

// ── Push Sender ───────────────────────────────────────────────

/// Sends one notification to one endpoint per call.
///
/// No retries: the next daily sweep is the retry. Each request is bounded
/// by the client timeout.
#[derive(Clone)]
pub struct PushSender {
    client: reqwest::Client,
    keys: VapidKeyPair,
    ttl_secs: u32,
}

impl PushSender {
    pub fn new(keys: VapidKeyPair, ttl_secs: u32, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .user_agent(concat!("taskpush/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            keys,
            ttl_secs,
        })
    }

    pub fn keys(&self) -> &VapidKeyPair {
        &self.keys
    }

    pub async fn send(
        &self,
        subscription: &Subscription,
        payload: &NotificationPayload,
    ) -> DeliveryOutcome {
        let endpoint = subscription.endpoint.as_str();

        let audience = match audience_for(endpoint) {
            Ok(a) => a,
            Err(failure) => {
                warn!(endpoint, error = %failure, "push skipped: bad endpoint");
                return DeliveryOutcome::DeliveryFailed(failure);
            }
        };

        let authorization = match self.keys.authorization(&audience) {
            Ok(value) => value,
            Err(e) => {
                warn!(endpoint, error = %e, "push skipped: could not sign VAPID credential");
                return DeliveryOutcome::DeliveryFailed(DeliveryFailure::Signing(e.to_string()));
            }
        };

        let body = match payload.to_bytes() {
            Ok(b) => b,
            Err(e) => {
                warn!(endpoint, error = %e, "push skipped: could not encode payload");
                return DeliveryOutcome::DeliveryFailed(DeliveryFailure::Payload(e.to_string()));
            }
        };

        debug!(endpoint, audience = %audience, bytes = body.len(), "sending push");

        let result = self
            .client
            .post(endpoint)
            .header("authorization", authorization)
            .header("ttl", self.ttl_secs.to_string())
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await;

        match result {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let outcome = classify_status(status);
                match &outcome {
                    DeliveryOutcome::Delivered => {
                        info!(user_id = %subscription.user_id, endpoint, status, "push delivered");
                    }
                    DeliveryOutcome::SubscriptionExpired => {
                        info!(user_id = %subscription.user_id, endpoint, status, "push endpoint gone");
                    }
                    DeliveryOutcome::DeliveryFailed(_) => {
                        let body = resp.text().await.unwrap_or_default();
                        warn!(
                            user_id = %subscription.user_id,
                            endpoint,
                            status,
                            body = %body,
                            "push delivery failed (non-2xx)"
                        );
                    }
                }
                outcome
            }
            Err(e) => {
                warn!(user_id = %subscription.user_id, endpoint, error = %e, "push request error");
                DeliveryOutcome::DeliveryFailed(DeliveryFailure::Transport(e.to_string()))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sender() -> PushSender {
        let keys = VapidKeyPair::generate("mailto:ops@example.com").unwrap();
        PushSender::new(keys, 3600, Duration::from_secs(2)).unwrap()
    }

    fn subscription(endpoint: String) -> Subscription {
        Subscription {
            id: 1,
            user_id: Uuid::new_v4(),
            endpoint,
            keys_auth: "auth".into(),
            keys_p256dh: "p256dh".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(201), DeliveryOutcome::Delivered);
        assert_eq!(classify_status(410), DeliveryOutcome::SubscriptionExpired);
        assert_eq!(classify_status(404), DeliveryOutcome::SubscriptionExpired);
        assert_eq!(
            classify_status(429),
            DeliveryOutcome::DeliveryFailed(DeliveryFailure::Status(429))
        );
    }

    #[test]
    fn test_audience_is_origin() {
        assert_eq!(
            audience_for("https://fcm.googleapis.com/fcm/send/abc:def").unwrap(),
            "https://fcm.googleapis.com"
        );
        assert_eq!(
            audience_for("https://push.example.net:8443/wpush/v2/x").unwrap(),
            "https://push.example.net:8443"
        );
        assert_eq!(
            audience_for("https://push.example.net:443/x").unwrap(),
            "https://push.example.net"
        );
        assert!(audience_for("not a url").is_err());
        assert!(audience_for("mailto:someone@example.com").is_err());
    }

    #[tokio::test]
    async fn test_local_failures_are_not_reported_as_transport() {
        let outcome = sender()
            .send(&subscription("ftp://push.example/x".into()), &NotificationPayload::test())
            .await;
        assert!(matches!(
            outcome,
            DeliveryOutcome::DeliveryFailed(DeliveryFailure::InvalidEndpoint(_))
        ));

        let failure = DeliveryFailure::Payload("key must be a string".into());
        assert_eq!(failure.to_string(), "payload encoding error: key must be a string");
        assert_ne!(failure, DeliveryFailure::Transport("key must be a string".into()));
    }

    #[tokio::test]
    async fn test_send_posts_credential_ttl_and_json_body() {
        let mock_server = MockServer::start().await;
        let sender = sender();
        let expected_key = format!(", k={}", sender.keys().public_key());

        Mock::given(method("POST"))
            .and(path("/push/abc"))
            .and(header("ttl", "3600"))
            .and(header("content-type", "application/json"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;

        let sub = subscription(format!("{}/push/abc", mock_server.uri()));
        let outcome = sender.send(&sub, &NotificationPayload::test()).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);

        let requests = mock_server.received_requests().await.unwrap();
        let auth = requests[0].headers.get("authorization").unwrap().to_str().unwrap();
        assert!(auth.starts_with("vapid t="));
        assert!(auth.ends_with(&expected_key));

        let body: NotificationPayload = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body, NotificationPayload::test());
    }

    #[tokio::test]
    async fn test_send_410_is_expired() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(410))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = sender()
            .send(&subscription(format!("{}/gone", mock_server.uri())), &NotificationPayload::test())
            .await;
        assert_eq!(outcome, DeliveryOutcome::SubscriptionExpired);
    }

    #[tokio::test]
    async fn test_send_500_is_failed_without_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let outcome = sender()
            .send(&subscription(format!("{}/err", mock_server.uri())), &NotificationPayload::test())
            .await;
        assert_eq!(outcome, DeliveryOutcome::DeliveryFailed(DeliveryFailure::Status(500)));
    }

    #[tokio::test]
    async fn test_send_times_out_as_transport_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(5)))
            .mount(&mock_server)
            .await;

        let keys = VapidKeyPair::generate("mailto:ops@example.com").unwrap();
        let sender = PushSender::new(keys, 60, Duration::from_millis(200)).unwrap();
        let outcome = sender
            .send(&subscription(format!("{}/slow", mock_server.uri())), &NotificationPayload::test())
            .await;
        assert!(matches!(
            outcome,
            DeliveryOutcome::DeliveryFailed(DeliveryFailure::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_send_to_closed_port_is_transport_failure() {
        let outcome = sender()
            .send(&subscription("http://127.0.0.1:1/push".into()), &NotificationPayload::test())
            .await;
        assert!(matches!(
            outcome,
            DeliveryOutcome::DeliveryFailed(DeliveryFailure::Transport(_))
        ));
    }
}
