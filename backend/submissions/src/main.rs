//! Audition submission pipeline — entry point.
//!
//! Exposes the Axum REST API the competition front-end talks to, and runs a
//! background reconciler that settles payment attempts abandoned mid-checkout.

mod api;
mod config;
mod db;
mod errors;
mod models;
mod payments;
mod reconcile;
mod resolver;
mod sequence;
mod storage;
mod submit;
mod upload;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client shared between the API handlers and the reconciler.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    // ─── Background reconciler ────────────────────────────
    let reconciler_state = Arc::new(reconcile::ReconcilerState {
        pool: pool.clone(),
        config: config.clone(),
        client: client.clone(),
    });
    tokio::spawn(reconcile::run(reconciler_state));

    // ─── REST API ─────────────────────────────────────────
    // Multipart bodies carry the audition file; leave headroom over the cap
    // so the size check rejects with a reason instead of a bare 413.
    let body_limit = (config.max_file_bytes as usize) + 1024 * 1024;
    let api_state = Arc::new(api::ApiState {
        pool,
        client,
        config: config.clone(),
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/entries/state", get(api::get_state))
        .route("/entries/payment", post(api::initiate_payment))
        .route("/entries/payment/confirm", post(api::confirm_payment))
        .route("/entries/payment/cancel", post(api::cancel_payment))
        .route("/entries/submission", post(api::submit_entry))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
