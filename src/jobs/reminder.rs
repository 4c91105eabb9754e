//! Background job: daily "tasks due today" push reminders.
//!
//! Fires once per calendar day at the configured server-local time. Each
//! sweep walks every user holding a subscription, counts their open tasks
//! due today and, when there are any, notifies all of their devices.
//! Subscriptions reported gone by the push service are deleted on the way.
//!
//! The fire guard is `Idle`/`Firing` plus the date of the last sweep:
//! at most one sweep per day, never two at once, and no catch-up when the
//! fire minute is missed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::payload::NotificationPayload;
use crate::notification::dispatch::{DeliveryReport, PushDispatcher};
use crate::notification::push::DeliveryOutcome;
use crate::store::TaskDirectory;

/// Longest sleep between two checks, so wall-clock adjustments are noticed.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Source of server-local wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The host's local time zone.
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Firing,
}

struct SchedulerState {
    phase: Phase,
    last_fired: Option<NaiveDate>,
}

/// Counters for one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub date: NaiveDate,
    pub users: usize,
    pub notified_users: usize,
    pub skipped_users: usize,
    pub query_failures: usize,
    pub delivered: usize,
    pub expired: usize,
    pub failed: usize,
}

impl SweepReport {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            users: 0,
            notified_users: 0,
            skipped_users: 0,
            query_failures: 0,
            delivered: 0,
            expired: 0,
            failed: 0,
        }
    }

    /// Delivery attempts made, whatever their outcome.
    pub fn attempts(&self) -> usize {
        self.delivered + self.expired + self.failed
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    /// Current minute is not the fire minute.
    NotDue,
    /// Today's sweep already ran.
    AlreadyFired,
    /// A sweep is still running.
    Busy,
    Fired(SweepReport),
}

enum UserResult {
    Skipped,
    QueryFailed,
    Notified(Vec<DeliveryReport>),
}

pub struct ReminderScheduler {
    dispatcher: PushDispatcher,
    tasks: Arc<dyn TaskDirectory>,
    clock: Arc<dyn Clock>,
    fire_at: NaiveTime,
    concurrency: usize,
    state: Mutex<SchedulerState>,
}

/// Returns the scheduler to `Idle` even if the sweep future is dropped.
struct FiringGuard<'a> {
    scheduler: &'a ReminderScheduler,
}

impl Drop for FiringGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.state().phase = Phase::Idle;
    }
}

impl ReminderScheduler {
    pub fn new(
        dispatcher: PushDispatcher,
        tasks: Arc<dyn TaskDirectory>,
        clock: Arc<dyn Clock>,
        fire_at: NaiveTime,
    ) -> Self {
        Self {
            dispatcher,
            tasks,
            clock,
            fire_at,
            concurrency: 8,
            state: Mutex::new(SchedulerState {
                phase: Phase::Idle,
                last_fired: None,
            }),
        }
    }

    /// Max users processed at once within a sweep.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn last_fired(&self) -> Option<NaiveDate> {
        self.state().last_fired
    }

    fn is_fire_minute(&self, now: NaiveDateTime) -> bool {
        now.hour() == self.fire_at.hour() && now.minute() == self.fire_at.minute()
    }

    /// Evaluate the fire condition once and run today's sweep if it is due.
    pub async fn tick(&self) -> TickOutcome {
        let now = self.clock.now();
        let today = now.date();

        {
            let mut state = self.state();
            if state.phase == Phase::Firing {
                return TickOutcome::Busy;
            }
            if !self.is_fire_minute(now) {
                return TickOutcome::NotDue;
            }
            if state.last_fired == Some(today) {
                return TickOutcome::AlreadyFired;
            }
            state.phase = Phase::Firing;
            state.last_fired = Some(today);
        }

        let _guard = FiringGuard { scheduler: self };
        TickOutcome::Fired(self.sweep(today).await)
    }

    /// How long the background loop should sleep before the next tick.
    pub fn next_poll_delay(&self) -> Duration {
        let now = self.clock.now();
        let next = next_fire_at(now, self.fire_at, self.last_fired());
        (next - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_POLL_INTERVAL)
    }

    /// Run one sweep for `today`, bypassing the daily guard.
    pub async fn sweep(&self, today: NaiveDate) -> SweepReport {
        let mut report = SweepReport::new(today);
        info!(date = %today, "reminder sweep: starting");

        let user_ids = match self.dispatcher.store().list_user_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "reminder sweep: could not list subscribed users");
                return report;
            }
        };
        report.users = user_ids.len();

        let results: Vec<UserResult> = stream::iter(user_ids)
            .map(|user_id| self.process_user(user_id, today))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                UserResult::Skipped => report.skipped_users += 1,
                UserResult::QueryFailed => report.query_failures += 1,
                UserResult::Notified(deliveries) => {
                    report.notified_users += 1;
                    for delivery in deliveries {
                        match delivery.outcome {
                            DeliveryOutcome::Delivered => report.delivered += 1,
                            DeliveryOutcome::SubscriptionExpired => report.expired += 1,
                            DeliveryOutcome::DeliveryFailed(_) => report.failed += 1,
                        }
                    }
                }
            }
        }

        info!(
            date = %today,
            users = report.users,
            notified = report.notified_users,
            skipped = report.skipped_users,
            query_failures = report.query_failures,
            delivered = report.delivered,
            expired = report.expired,
            failed = report.failed,
            "reminder sweep: complete"
        );
        report
    }

    async fn process_user(&self, user_id: Uuid, today: NaiveDate) -> UserResult {
        let due = match self.tasks.due_today(user_id, today).await {
            Ok(due) => due,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "reminder sweep: task query failed");
                return UserResult::QueryFailed;
            }
        };

        if due.count <= 0 {
            debug!(user_id = %user_id, "reminder sweep: nothing due, skipping");
            return UserResult::Skipped;
        }

        let payload = NotificationPayload::due_today(due.count, due.sample_title.as_deref());
        match self.dispatcher.deliver_to_user(user_id, &payload).await {
            Ok(deliveries) => UserResult::Notified(deliveries),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "reminder sweep: subscription lookup failed");
                UserResult::QueryFailed
            }
        }
    }

    /// Spawn the polling loop. Call this once at startup.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(fire_at = %self.fire_at.format("%H:%M"), "reminder scheduler started");
            loop {
                tokio::time::sleep(self.next_poll_delay()).await;
                match self.tick().await {
                    TickOutcome::Fired(report) => {
                        debug!(attempts = report.attempts(), "reminder scheduler: sweep finished")
                    }
                    TickOutcome::Busy => debug!("reminder scheduler: sweep still running"),
                    TickOutcome::NotDue | TickOutcome::AlreadyFired => {}
                }
            }
        })
    }
}

/// Next instant at which a tick could fire.
///
/// Inside today's fire minute with no sweep yet, that is `now`.
pub fn next_fire_at(
    now: NaiveDateTime,
    fire_at: NaiveTime,
    last_fired: Option<NaiveDate>,
) -> NaiveDateTime {
    let today = now.date();
    let fire_minute = NaiveTime::from_hms_opt(fire_at.hour(), fire_at.minute(), 0).unwrap_or(fire_at);
    let fire_today = today.and_time(fire_minute);
    let minute_end = fire_today + ChronoDuration::minutes(1);

    if last_fired != Some(today) && now < minute_end {
        if now >= fire_today {
            now
        } else {
            fire_today
        }
    } else {
        fire_today + ChronoDuration::days(1)
    }
}

// ── Tests ─────────────────────────────────────────────────────
