use std::time::Duration;

use chrono::NaiveTime;

const PLACEHOLDER_JWT_SECRET: &str = "CHANGE_ME_JWT_SECRET";

/// Raw VAPID settings as read from the environment.
///
/// Validated into a [`crate::notification::vapid::VapidKeyPair`] at startup.
#[derive(Clone)]
pub struct VapidSettings {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

impl std::fmt::Debug for VapidSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidSettings")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .field("subject", &self.subject)
            .finish()
    }
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// HS256 secret for user bearer tokens minted by the login flow.
    pub jwt_secret: String,
    /// `None` disables push delivery and the reminder job.
    pub vapid: Option<VapidSettings>,
    /// Daily reminder time, server-local. Set via REMINDER_TIME (HH:MM). Default: 09:00.
    pub reminder_time: NaiveTime,
    /// TTL header sent with every push. Default: 24h.
    pub push_ttl_secs: u32,
    /// Per-delivery network timeout in seconds. Default: 10.
    pub push_timeout_secs: u64,
    /// Users processed concurrently in one sweep. Default: 8.
    pub reminder_concurrency: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("jwt_secret", &"<redacted>")
            .field("vapid", &self.vapid)
            .field("reminder_time", &self.reminder_time)
            .field("push_ttl_secs", &self.push_ttl_secs)
            .field("push_timeout_secs", &self.push_timeout_secs)
            .field("reminder_concurrency", &self.reminder_concurrency)
            .finish()
    }
}

impl Config {
    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.push_timeout_secs)
    }
}

/// Parse `HH:MM` (24h).
pub fn parse_reminder_time(raw: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|e| anyhow::anyhow!("invalid REMINDER_TIME '{}': expected HH:MM ({})", raw, e))
}

/// Parse a positive number of seconds. Zero would make every push time out.
pub fn parse_push_timeout(raw: &str) -> anyhow::Result<u64> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => anyhow::bail!(
            "invalid PUSH_TIMEOUT_SECS '{}': expected a whole number of seconds >= 1",
            raw
        ),
    }
}

fn vapid_from_env() -> Option<VapidSettings> {
    let public_key = std::env::var("VAPID_PUBLIC_KEY").ok().filter(|v| !v.trim().is_empty());
    let private_key = std::env::var("VAPID_PRIVATE_KEY").ok().filter(|v| !v.trim().is_empty());

    match (public_key, private_key) {
        (Some(public_key), Some(private_key)) => Some(VapidSettings {
            public_key,
            private_key,
            subject: std::env::var("VAPID_SUBJECT")
                .unwrap_or_else(|_| "mailto:admin@localhost".into()),
        }),
        (None, None) => None,
        _ => {
            tracing::error!(
                "only one of VAPID_PUBLIC_KEY / VAPID_PRIVATE_KEY is set; push notifications disabled"
            );
            None
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| PLACEHOLDER_JWT_SECRET.into());

    if jwt_secret == PLACEHOLDER_JWT_SECRET {
        let env_mode = std::env::var("TASKPUSH_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "JWT_SECRET is not set. \
                 Use the same secret as the login service before running in production."
            );
        }
        eprintln!("⚠️  JWT_SECRET is not set: using insecure placeholder. Set it for production.");
    }

    let reminder_time =
        parse_reminder_time(&std::env::var("REMINDER_TIME").unwrap_or_else(|_| "09:00".into()))?;
    let push_timeout_secs =
        parse_push_timeout(&std::env::var("PUSH_TIMEOUT_SECS").unwrap_or_else(|_| "10".into()))?;

    Ok(Config {
        port: std::env::var("TASKPUSH_PORT")
            .unwrap_or_else(|_| "3001".into())
            .parse()
            .unwrap_or(3001),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/taskpush".into()),
        jwt_secret,
        vapid: vapid_from_env(),
        reminder_time,
        push_ttl_secs: std::env::var("PUSH_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24 * 60 * 60),
        push_timeout_secs,
        reminder_concurrency: std::env::var("REMINDER_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8),
    })
}
