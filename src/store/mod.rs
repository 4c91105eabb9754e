//! Storage seams for the push subsystem.
//!
//! Subscriptions and tasks are owned by the surrounding CRUD application;
//! this crate only reads task counts and keeps the subscription table tidy.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use crate::models::subscription::{NewSubscription, Subscription};

/// Subscription directory used by the API and the reminder sweep.
///
/// Implementations must tolerate concurrent `delete` calls for the same row.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// All subscriptions of one user, oldest first.
    async fn list(&self, user_id: Uuid) -> anyhow::Result<Vec<Subscription>>;

    /// Users holding at least one subscription.
    async fn list_user_ids(&self) -> anyhow::Result<Vec<Uuid>>;

    /// Insert, or replace the keying material of an existing `(user_id, endpoint)` row.
    async fn upsert(&self, subscription: &NewSubscription) -> anyhow::Result<Subscription>;

    /// Remove one subscription. Returns `false` when it was already gone.
    async fn delete(&self, user_id: Uuid, endpoint: &str) -> anyhow::Result<bool>;
}

/// Open tasks due on a given day for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueToday {
    pub count: i64,
    /// Title of the earliest-created matching task, if any.
    pub sample_title: Option<String>,
}

/// UTC instants `[start, end)` covering calendar day `day` in time zone `tz`.
///
/// Due dates are stored as instants, so "due today" is a range query
/// rather than a date cast in the database session's zone.
pub fn local_day_bounds<Tz: TimeZone>(tz: &Tz, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = day.succ_opt().unwrap_or(day);
    (start_of_day(tz, day), start_of_day(tz, next))
}

fn start_of_day<Tz: TimeZone>(tz: &Tz, day: NaiveDate) -> DateTime<Utc> {
    let midnight = day.and_time(NaiveTime::MIN);
    // a DST gap can skip local midnight; the day then starts at the first valid hour
    (0..=3)
        .find_map(|h| {
            tz.from_local_datetime(&(midnight + Duration::hours(h)))
                .earliest()
        })
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Read-only view of the task records.
#[async_trait]
pub trait TaskDirectory: Send + Sync {
    /// Open tasks of `user_id` with reminders enabled, due during the
    /// server-local calendar day `today`.
    async fn due_today(&self, user_id: Uuid, today: NaiveDate) -> anyhow::Result<DueToday>;
}
