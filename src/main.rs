use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskpush::config::{self, Config};
use taskpush::jobs::reminder::{Clock, LocalClock, ReminderScheduler};
use taskpush::notification::dispatch::{PushDispatcher, TestSend};
use taskpush::notification::push::PushSender;
use taskpush::notification::vapid::VapidKeyPair;
use taskpush::store::postgres::PgStore;
use taskpush::store::SubscriptionStore;
use taskpush::{api, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let json_logs = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    let (plain_layer, json_layer) = if json_logs {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "taskpush=debug,tower_http=debug".into()),
        ))
        .with(plain_layer)
        .with(json_layer)
        .init();

    let args = cli::Cli::parse();

    // Key generation needs no environment.
    if let Some(cli::Commands::Vapid {
        command: cli::VapidCommands::Generate { subject },
    }) = &args.command
    {
        let keys = VapidKeyPair::generate(subject)?;
        println!("VAPID_PUBLIC_KEY={}", keys.public_key());
        println!("VAPID_PRIVATE_KEY={}", keys.private_key());
        println!("VAPID_SUBJECT={}", keys.subject());
        return Ok(());
    }

    let cfg = config::load()?;

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::SendTest { user_id }) => handle_send_test(cfg, &user_id).await,
        Some(cli::Commands::Sweep) => handle_sweep(cfg).await,
        Some(cli::Commands::Vapid { .. }) => Ok(()),
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Validate VAPID settings and build the dispatcher.
///
/// Missing or invalid keys disable push delivery without stopping the process.
fn build_push(cfg: &Config, store: Arc<dyn SubscriptionStore>) -> Option<PushDispatcher> {
    let Some(settings) = &cfg.vapid else {
        tracing::warn!("VAPID keys not configured: push notifications and reminders disabled");
        return None;
    };

    let keys = match VapidKeyPair::from_base64url(
        &settings.public_key,
        &settings.private_key,
        &settings.subject,
    ) {
        Ok(keys) => keys,
        Err(e) => {
            tracing::error!(error = %e, "push notifications disabled");
            return None;
        }
    };

    match PushSender::new(keys, cfg.push_ttl_secs, cfg.push_timeout()) {
        Ok(sender) => Some(PushDispatcher::new(store, sender)),
        Err(e) => {
            tracing::error!(error = %e, "failed to build push HTTP client; push notifications disabled");
            None
        }
    }
}

fn build_scheduler(cfg: &Config, push: PushDispatcher, db: PgStore) -> ReminderScheduler {
    ReminderScheduler::new(push, Arc::new(db), Arc::new(LocalClock), cfg.reminder_time)
        .with_concurrency(cfg.reminder_concurrency)
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let subscriptions: Arc<dyn SubscriptionStore> = Arc::new(db.clone());
    let push = build_push(&cfg, subscriptions.clone());

    if let Some(dispatcher) = &push {
        let scheduler = Arc::new(build_scheduler(&cfg, dispatcher.clone(), db.clone()));
        scheduler.spawn();
        tracing::info!(
            fire_at = %cfg.reminder_time.format("%H:%M"),
            "Daily reminder job started"
        );
    }

    let state = Arc::new(AppState {
        subscriptions,
        push,
        config: cfg,
    });

    let app = api::app(state)
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            let app_origin = std::env::var("APP_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string());
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == app_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                ])
        });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("taskpush listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_send_test(cfg: Config, user_id: &str) -> anyhow::Result<()> {
    let user_id = uuid::Uuid::parse_str(user_id).context("Invalid user_id")?;
    let db = PgStore::connect(&cfg.database_url).await?;
    let push = build_push(&cfg, Arc::new(db))
        .ok_or_else(|| anyhow::anyhow!("VAPID keys not configured"))?;

    match push.send_test(user_id).await? {
        TestSend::NoSubscriptions => println!("No subscriptions for user {}.", user_id),
        TestSend::Attempted(reports) => {
            println!("{:<22} {}", "STATUS", "ENDPOINT");
            for r in reports {
                match r.error {
                    Some(err) => println!("{:<22} {} ({})", r.status, r.endpoint, err),
                    None => println!("{:<22} {}", r.status, r.endpoint),
                }
            }
        }
    }
    Ok(())
}

async fn handle_sweep(cfg: Config) -> anyhow::Result<()> {
    let db = PgStore::connect(&cfg.database_url).await?;
    let push = build_push(&cfg, Arc::new(db.clone()))
        .ok_or_else(|| anyhow::anyhow!("VAPID keys not configured"))?;

    let scheduler = build_scheduler(&cfg, push, db);
    let report = scheduler.sweep(LocalClock.now().date()).await;

    println!("Sweep for {}:", report.date);
    println!("  Users:          {}", report.users);
    println!("  Notified:       {}", report.notified_users);
    println!("  Skipped:        {}", report.skipped_users);
    println!("  Query failures: {}", report.query_failures);
    println!("  Delivered:      {}", report.delivered);
    println!("  Expired:        {}", report.expired);
    println!("  Failed:         {}", report.failed);
    Ok(())
}
