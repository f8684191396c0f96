//! Foreman scheduler binary.
//!
//! Runs the scheduling engine and its HTTP API for job submission,
//! agent diagnostics, and scheduling control.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use foreman_scheduler::{api, build_policy, build_store, SchedulerConfig, SchedulerEngine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("foreman_scheduler=info".parse()?),
        )
        .init();

    info!("Foreman scheduler starting");

    // Load configuration
    let config: SchedulerConfig = Figment::new()
        .merge(Toml::file("foreman.toml"))
        .merge(Env::prefixed("FOREMAN_").split("_"))
        .extract()?;

    info!(listen_addr = %config.api.listen_addr, "Configuration loaded");

    // Create the backing store. A configured but unreachable store is fatal:
    // running without the promised persistence would silently lose history.
    let store = build_store(&config.store).await?;
    match &store {
        Some(_) => info!(kind = ?config.store.kind, "Backing store initialised"),
        None => info!("Running without a backing store"),
    }

    // Create the scheduling policy
    let policy = build_policy(&config.policy);
    info!(policy = policy.name(), "Scheduling policy configured");

    // Start the engine
    info!(
        heartbeat_timeout_secs = config.timing.heartbeat_timeout.as_secs(),
        liveness_sweep_secs = config.timing.liveness_sweep_interval.as_secs(),
        "Starting scheduler engine"
    );
    let (engine, handle) = SchedulerEngine::new(config.timing.clone(), policy, store);
    tokio::spawn(engine.run());

    // Build application state and router
    let state = Arc::new(api::AppState { scheduler: handle });
    let app = api::router(state);

    // Start HTTP server
    let listener = TcpListener::bind(&config.api.listen_addr).await?;
    info!(addr = %config.api.listen_addr, "Scheduler API listening");

    axum::serve(listener, app).await?;

    Ok(())
}
