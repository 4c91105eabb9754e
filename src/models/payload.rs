use serde::{Deserialize, Serialize};

/// Notification body as consumed by the service worker's `push` handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub url: String,
}

impl NotificationPayload {
    /// Payload for the user-triggered test send.
    pub fn test() -> Self {
        Self {
            title: "Test Notification".to_string(),
            body: "If you see this, push notifications are working!".to_string(),
            url: "/".to_string(),
        }
    }

    /// Daily reminder summarising the open tasks due today.
    pub fn due_today(count: i64, sample_title: Option<&str>) -> Self {
        let body = match (count, sample_title) {
            (1, Some(title)) => format!("\"{}\" is due today", title),
            (1, None) => "You have 1 task due today".to_string(),
            (n, _) => format!("You have {} tasks due today", n),
        };
        Self {
            title: "Tasks due today".to_string(),
            body,
            url: "/".to_string(),
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
