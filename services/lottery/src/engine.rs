use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::config::Config;
use crate::events::{EventPublisher, NoopEventPublisher, RedisEventPublisher};
use crate::randomness::{BlockDrawer, ThreadRngDrawer};
use crate::repository::{InMemoryStore, LotteryStore, PostgresStore};
use crate::services::{AutoBetExecutor, BetLedger, RoundManager};
use crate::settings::{RedisSystemSettings, StaticSettings, SystemSettings};

/// The four lottery components wired over one store
pub struct LotteryEngine {
    pub store: Arc<dyn LotteryStore>,
    pub rounds: RoundManager,
    pub ledger: BetLedger,
    pub autobet: AutoBetExecutor,
}

impl LotteryEngine {
    pub fn new(
        store: Arc<dyn LotteryStore>,
        settings: Arc<dyn SystemSettings>,
        events: Arc<dyn EventPublisher>,
        drawer: Arc<dyn BlockDrawer>,
        round_duration: chrono::Duration,
    ) -> Self {
        let ledger = BetLedger::new(store.clone(), settings.clone(), events.clone());
        let rounds = RoundManager::new(
            store.clone(),
            settings,
            events.clone(),
            drawer,
            round_duration,
        );
        let autobet = AutoBetExecutor::new(store.clone(), ledger.clone(), events);

        Self {
            store,
            rounds,
            ledger,
            autobet,
        }
    }

    /// Build the engine and its collaborators from configuration
    ///
    /// Also returns the Redis connection, if any, for health checks.
    pub async fn from_config(config: &Config) -> anyhow::Result<(Self, Option<ConnectionManager>)> {
        let store: Arc<dyn LotteryStore> = match &config.database.url {
            Some(url) => {
                let store = PostgresStore::connect(url, config.database.pool_size).await?;
                tracing::info!(pool_size = config.database.pool_size, "Postgres store connected");
                Arc::new(store)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory store (state is lost on exit)");
                Arc::new(InMemoryStore::new())
            }
        };

        let settings: Arc<dyn SystemSettings>;
        let events: Arc<dyn EventPublisher>;
        let mut redis_conn = None;
        match &config.redis.url {
            Some(url) => {
                let client = redis::Client::open(url.as_str())?;
                let conn = client.get_connection_manager().await?;
                tracing::info!("Redis connected");
                settings = Arc::new(RedisSystemSettings::new(conn.clone()));
                events = Arc::new(RedisEventPublisher::new(conn.clone()));
                redis_conn = Some(conn);
            }
            None => {
                tracing::warn!("REDIS_URL not set, using static settings and no event stream");
                settings = Arc::new(StaticSettings::new(
                    config.lottery.betting_paused,
                    config.lottery.new_rounds_paused,
                ));
                events = Arc::new(NoopEventPublisher);
            }
        }

        let engine = Self::new(
            store,
            settings,
            events,
            Arc::new(ThreadRngDrawer),
            config.round_duration(),
        );
        Ok((engine, redis_conn))
    }
}
