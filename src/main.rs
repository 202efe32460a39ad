//! Walk coordinator - house claims and walk sessions for canvassing teams
//!
//! Module structure:
//! - `domain/` - Core types (WalkSession, HouseClaim, WalkActivity)
//! - `io/` - External interfaces (HTTP API, MQTT egress, activity log)
//! - `services/` - Business logic (WalkService, store, hub, routing)
//! - `infra/` - Infrastructure (Config, Metrics, Broker, errors)

use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use walk_coordinator::infra::{Config, Metrics};
use walk_coordinator::io::{create_activity_log, start_http_server, ActivityLog, ApiState, MqttPublisher};
use walk_coordinator::services::{HouseDirectory, Hub, MemoryWalkStore, WalkService};

/// Walk coordinator - canvassing session and house claim service
#[derive(Parser, Debug)]
#[command(name = "walk-coordinator", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default INFO level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("GIT_HASH"), "walk-coordinator starting");

    let args = Args::parse();
    let config = Config::load_from_path(&Config::resolve_config_path(args.config.as_deref()));

    if let Err(e) = walk_coordinator::infra::broker::start_embedded_broker(&config) {
        error!(error = %e, "broker_start_failed");
    }

    info!(
        config_file = %config.config_file(),
        site_id = %config.site_id(),
        http_bind = %config.http_bind_address(),
        http_port = %config.http_port(),
        claim_ttl_min = %config.claim_ttl_minutes(),
        abandon_after_min = %config.abandon_after_mins(),
        tokens = %config.tokens().len(),
        mqtt_enabled = %config.mqtt_enabled(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared components
    let metrics = Arc::new(Metrics::new());
    let hub = Arc::new(Hub::new(config.hub_capacity(), config.canvasser_stale_secs(), metrics.clone()));
    let houses = Arc::new(HouseDirectory::load_optional(config.houses_file()));
    let store = Arc::new(MemoryWalkStore::new());

    let mut service = WalkService::new(&config, store, hub.clone(), houses, metrics.clone());

    // Activity log writer (if configured)
    let mut log_handle = None;
    if let Some(path) = config.activity_log_file() {
        let (sender, rx) = create_activity_log(1000);
        let log = ActivityLog::new(path);
        let log_shutdown = shutdown_rx.clone();
        log_handle = Some(tokio::spawn(log.run(rx, log_shutdown)));
        service = service.with_activity_log(sender);
    }
    let service = Arc::new(service);

    // Hub -> MQTT bridge
    if config.mqtt_enabled() {
        let publisher = MqttPublisher::new(&config, hub.subscribe(), metrics.clone());
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });
    }

    // Housekeeping: claim expiry, idle session abandonment, stale positions
    let sweep_service = service.clone();
    let sweep_interval = config.sweep_interval_secs();
    let mut sweep_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(sweep_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = sweep_service.sweep().await {
                        error!(error = %e, "sweep_failed");
                    }
                }
                _ = sweep_shutdown.changed() => {
                    if *sweep_shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });

    // Periodic metrics summary
    let metrics_service = service.clone();
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            match metrics_service.stats().await {
                Ok(stats) => {
                    metrics_clone.report(stats.open_sessions, stats.active_claims, stats.connected).log();
                }
                Err(e) => error!(error = %e, "metrics_stats_failed"),
            }
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Serve until shutdown
    let state = Arc::new(ApiState::new(&config, service, metrics));
    let result = start_http_server(&config, state, shutdown_rx).await;

    // The writer only exits on shutdown, so skip the drain if the server failed to start
    if let (Ok(()), Some(handle)) = (&result, log_handle) {
        let _ = handle.await;
    }

    info!("walk-coordinator shutdown complete");
    result
}
