use crate::config::Config;
use crate::engine::LotteryEngine;
use redis::aio::ConnectionManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<LotteryEngine>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<LotteryEngine>, redis: Option<ConnectionManager>) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            redis,
        }
    }
}
