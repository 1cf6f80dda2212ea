use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lottery::config::Config;
use lottery::scheduler::Scheduler;
use lottery::state::AppState;
use lottery::LotteryEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging with JSON formatting (configurable via env)
    let use_json = std::env::var("LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .eq_ignore_ascii_case("json");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lottery=info,tower_http=info".into());

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        service = "lottery",
        version = env!("CARGO_PKG_VERSION"),
        log_format = if use_json { "json" } else { "text" },
        "Starting lottery service"
    );

    let config = Config::load()?;
    tracing::info!(
        app_env = %config.app_env,
        round_duration_minutes = config.lottery.round_duration_minutes,
        lottery_tick_seconds = config.lottery.lottery_tick_seconds,
        autobet_tick_seconds = config.lottery.autobet_tick_seconds,
        "Configuration loaded"
    );

    let metrics_handle = tokio::spawn(start_metrics_server(config.metrics_port));

    let (engine, redis) = LotteryEngine::from_config(&config).await?;
    let engine = Arc::new(engine);

    // Make sure a round is open before the first tick
    match engine.rounds.create_new_round(false).await {
        Ok(Some(round)) => tracing::info!(round_number = round.round_number, "Active round ready"),
        Ok(None) => tracing::warn!("New rounds are paused, starting without an active round"),
        Err(e) => tracing::error!(error = %e, "Failed to open initial round"),
    }

    let scheduler = Scheduler::new(
        engine.clone(),
        Duration::from_secs(config.lottery.lottery_tick_seconds),
        Duration::from_secs(config.lottery.autobet_tick_seconds),
    );
    let loop_handles = scheduler.start().await;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let app = lottery::build_router(AppState::new(config, engine, redis));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Health API listening on {}", addr);
    let api_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    tracing::info!("Lottery service running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    scheduler.stop().await;
    for handle in loop_handles {
        handle.abort();
    }
    api_handle.abort();
    metrics_handle.abort();

    tracing::info!("Lottery service stopped");
    Ok(())
}

async fn start_metrics_server(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder()?;

    let app = Router::new().route("/metrics", get(|| async move { handle.render() }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
