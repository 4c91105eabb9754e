//! In-process store backed by `DashMap`.
//!
//! Used by the test suites and for running the API without Postgres.
//! Due-today answers come from tasks added with [`MemoryStore::add_task`],
//! filtered like the SQL query, unless a fixed answer was registered with
//! [`MemoryStore::set_due_today`], which is then reported for every date.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{local_day_bounds, DueToday, SubscriptionStore, TaskDirectory};
use crate::models::subscription::{NewSubscription, Subscription};

/// Task row as far as reminders care.
#[derive(Debug, Clone)]
pub struct MemoryTask {
    pub title: String,
    pub due_at: DateTime<Utc>,
    pub is_completed: bool,
    pub reminder_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl MemoryTask {
    /// Open task with reminders on.
    pub fn due(title: &str, due_at: DateTime<Utc>) -> Self {
        Self {
            title: title.to_string(),
            due_at,
            is_completed: false,
            reminder_enabled: true,
            created_at: Utc::now(),
        }
    }

    pub fn completed(mut self) -> Self {
        self.is_completed = true;
        self
    }

    pub fn reminders_off(mut self) -> Self {
        self.reminder_enabled = false;
        self
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    subscriptions: Arc<DashMap<Uuid, Vec<Subscription>>>,
    tasks: Arc<DashMap<Uuid, Vec<MemoryTask>>>,
    due: Arc<DashMap<Uuid, DueToday>>,
    failing: Arc<DashMap<Uuid, String>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&self, user_id: Uuid, task: MemoryTask) {
        self.tasks.entry(user_id).or_default().push(task);
    }

    pub fn set_due_today(&self, user_id: Uuid, count: i64, sample_title: Option<&str>) {
        self.due.insert(
            user_id,
            DueToday {
                count,
                sample_title: sample_title.map(String::from),
            },
        );
    }

    /// Make `due_today` fail for one user.
    pub fn fail_due_today(&self, user_id: Uuid, reason: &str) {
        self.failing.insert(user_id, reason.to_string());
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn list(&self, user_id: Uuid) -> anyhow::Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .get(&user_id)
            .map(|subs| subs.clone())
            .unwrap_or_default())
    }

    async fn list_user_ids(&self) -> anyhow::Result<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self
            .subscriptions
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn upsert(&self, sub: &NewSubscription) -> anyhow::Result<Subscription> {
        let mut subs = self.subscriptions.entry(sub.user_id).or_default();

        if let Some(existing) = subs.iter_mut().find(|s| s.endpoint == sub.endpoint) {
            existing.keys_auth = sub.keys_auth.clone();
            existing.keys_p256dh = sub.keys_p256dh.clone();
            return Ok(existing.clone());
        }

        let row = Subscription {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            user_id: sub.user_id,
            endpoint: sub.endpoint.clone(),
            keys_auth: sub.keys_auth.clone(),
            keys_p256dh: sub.keys_p256dh.clone(),
            created_at: Utc::now(),
        };
        subs.push(row.clone());
        Ok(row)
    }

    async fn delete(&self, user_id: Uuid, endpoint: &str) -> anyhow::Result<bool> {
        let removed = match self.subscriptions.get_mut(&user_id) {
            Some(mut subs) => {
                let before = subs.len();
                subs.retain(|s| s.endpoint != endpoint);
                subs.len() < before
            }
            None => false,
        };
        self.subscriptions.remove_if(&user_id, |_, subs| subs.is_empty());
        Ok(removed)
    }
}

#[async_trait]
impl TaskDirectory for MemoryStore {
    async fn due_today(&self, user_id: Uuid, today: NaiveDate) -> anyhow::Result<DueToday> {
        if let Some(reason) = self.failing.get(&user_id) {
            anyhow::bail!("task query failed: {}", reason.value());
        }
        if let Some(fixed) = self.due.get(&user_id) {
            return Ok(fixed.clone());
        }

        let Some(tasks) = self.tasks.get(&user_id) else {
            return Ok(DueToday::default());
        };
        let (start, end) = local_day_bounds(&Local, today);
        let mut matching: Vec<&MemoryTask> = tasks
            .iter()
            .filter(|t| !t.is_completed && t.reminder_enabled)
            .filter(|t| t.due_at >= start && t.due_at < end)
            .collect();
        matching.sort_by_key(|t| t.created_at);

        Ok(DueToday {
            count: matching.len() as i64,
            sample_title: matching.first().map(|t| t.title.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_sub(user_id: Uuid, endpoint: &str, auth: &str) -> NewSubscription {
        NewSubscription {
            user_id,
            endpoint: endpoint.to_string(),
            keys_auth: auth.to_string(),
            keys_p256dh: "p256dh".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_same_endpoint_updates_keys() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();

        let first = store.upsert(&new_sub(user, "https://push.example/a", "old")).await.unwrap();
        let second = store.upsert(&new_sub(user, "https://push.example/a", "new")).await.unwrap();

        assert_eq!(first.id, second.id);
        let subs = store.list(user).await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].keys_auth, "new");
    }

    #[tokio::test]
    async fn test_same_endpoint_for_different_users_is_two_rows() {
        let store = MemoryStore::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store.upsert(&new_sub(a, "https://push.example/x", "k")).await.unwrap();
        store.upsert(&new_sub(b, "https://push.example/x", "k")).await.unwrap();
        assert_eq!(store.list_user_ids().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.upsert(&new_sub(user, "https://push.example/a", "k")).await.unwrap();

        assert!(store.delete(user, "https://push.example/a").await.unwrap());
        assert!(!store.delete(user, "https://push.example/a").await.unwrap());
        assert!(!store.delete(Uuid::new_v4(), "https://push.example/a").await.unwrap());
        assert!(store.list_user_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_deletes_of_same_row() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.upsert(&new_sub(user, "https://push.example/a", "k")).await.unwrap();

        let (a, b) = tokio::join!(
            store.delete(user, "https://push.example/a"),
            store.delete(user, "https://push.example/a"),
        );
        let removed = [a.unwrap(), b.unwrap()].iter().filter(|r| **r).count();
        assert_eq!(removed, 1);
        assert!(store.list(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_due_today_fixture_and_failure() {
        let store = MemoryStore::new();
        let (ok, bad) = (Uuid::new_v4(), Uuid::new_v4());
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        store.set_due_today(ok, 2, Some("Water plants"));
        store.fail_due_today(bad, "connection reset");

        let due = store.due_today(ok, today).await.unwrap();
        assert_eq!(due.count, 2);
        assert_eq!(due.sample_title.as_deref(), Some("Water plants"));
        assert!(store.due_today(bad, today).await.is_err());
        assert_eq!(store.due_today(Uuid::new_v4(), today).await.unwrap().count, 0);
    }

    fn local(day: NaiveDate, hour: u32) -> DateTime<Utc> {
        use chrono::TimeZone;
        Local
            .from_local_datetime(&day.and_hms_opt(hour, 0, 0).unwrap())
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_due_today_skips_disabled_completed_and_other_days() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let tomorrow = today.succ_opt().unwrap();

        store.add_task(user, MemoryTask::due("Pay rent", local(today, 10)));
        store.add_task(user, MemoryTask::due("Late call", local(today, 23)));
        store.add_task(user, MemoryTask::due("Muted", local(today, 12)).reminders_off());
        store.add_task(user, MemoryTask::due("Done", local(today, 9)).completed());
        store.add_task(user, MemoryTask::due("Tomorrow", local(tomorrow, 0)));

        let due = store.due_today(user, today).await.unwrap();
        assert_eq!(due.count, 2);
        assert_eq!(due.sample_title.as_deref(), Some("Pay rent"));

        let due = store.due_today(user, tomorrow).await.unwrap();
        assert_eq!(due.count, 1);
        assert_eq!(due.sample_title.as_deref(), Some("Tomorrow"));
    }

    #[tokio::test]
    async fn test_only_muted_tasks_means_nothing_due() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        store.add_task(user, MemoryTask::due("Muted", local(today, 8)).reminders_off());

        let due = store.due_today(user, today).await.unwrap();
        assert_eq!(due, DueToday::default());
    }
}
