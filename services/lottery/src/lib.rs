// Library interface for the lottery service - exposes modules for testing

pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod randomness;
pub mod repository;
pub mod scheduler;
pub mod services;
pub mod settings;
pub mod state;

use axum::{routing::get, Router};
use state::AppState;
use tower_http::trace::TraceLayer;

pub use engine::LotteryEngine;
pub use errors::{LotteryError, Result};

/// Build the health router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/detailed", get(handlers::health::detailed_health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
