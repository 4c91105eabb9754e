//! taskpush: Web Push reminder service for a task tracker.
//!
//! Signs VAPID credentials, delivers notifications to browser push
//! services, prunes dead subscriptions and runs the daily "due today"
//! reminder sweep. Users, groups and tasks live in the surrounding
//! application's database and are only read here.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod notification;
pub mod store;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub subscriptions: Arc<dyn store::SubscriptionStore>,
    /// `None` when VAPID keys are missing or invalid.
    pub push: Option<notification::dispatch::PushDispatcher>,
    pub config: config::Config,
}
