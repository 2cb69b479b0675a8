mod cron;
mod db;
mod domain;
mod evaluation;
mod middleware;
mod params;
mod services;
mod state;
mod web;

use crate::state::SharedState;
use base64::{engine::general_purpose, Engine as _};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL missing");
    tracing::info!("connecting to database");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("failed to connect to database: {}", e);
            e
        })?;

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    let session_key_b64 = std::env::var("SESSION_KEY").expect("SESSION_KEY missing");
    let session_key = general_purpose::STANDARD
        .decode(session_key_b64)
        .expect("SESSION_KEY must be base64");

    db::seed::seed_all(&pool).await?;

    let shared: SharedState = Arc::new(state::AppState { pool, session_key });

    let scheduler = JobScheduler::new().await?;

    // Sunday 00:01: open the next rating week and assign HR its task.
    let shared_for_week = shared.clone();
    scheduler
        .add(Job::new_async("0 1 0 * * Sun", move |_uuid, _l| {
            let state = shared_for_week.clone();
            Box::pin(async move {
                if let Err(e) = cron::add_week_to_rate(&state.pool).await {
                    tracing::error!("weekly rollover failed: {:#}", e);
                }
            })
        })?)
        .await?;

    // Every minute: flip task statuses around their deadlines.
    let shared_for_sweep = shared.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let state = shared_for_sweep.clone();
            Box::pin(async move {
                if let Err(e) = cron::check_tasks_status(&state.pool).await {
                    tracing::error!("task status sweep failed: {:#}", e);
                }
            })
        })?)
        .await?;

    // Hourly: advance the audit cursor and prune stale normal posts.
    let shared_for_cursor = shared.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let state = shared_for_cursor.clone();
            Box::pin(async move {
                if let Err(e) = cron::advance_audit_cursor(&state.pool).await {
                    tracing::error!("audit cursor advance failed: {:#}", e);
                }
            })
        })?)
        .await?;

    scheduler.start().await?;

    let app = web::routes(shared.clone())
        .layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            middleware::admission_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
