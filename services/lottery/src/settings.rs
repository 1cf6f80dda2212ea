//! Operator switches consulted before betting and before opening rounds

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::Result;

const BETTING_PAUSED_KEY: &str = "lottery:settings:betting_paused";
const NEW_ROUNDS_PAUSED_KEY: &str = "lottery:settings:new_rounds_paused";

#[async_trait]
pub trait SystemSettings: Send + Sync {
    async fn is_betting_paused(&self) -> Result<bool>;
    async fn is_new_rounds_paused(&self) -> Result<bool>;
}

/// Flags fixed at startup, flippable in process (tests, local runs)
#[derive(Debug, Default)]
pub struct StaticSettings {
    betting_paused: AtomicBool,
    new_rounds_paused: AtomicBool,
}

impl StaticSettings {
    pub fn new(betting_paused: bool, new_rounds_paused: bool) -> Self {
        Self {
            betting_paused: AtomicBool::new(betting_paused),
            new_rounds_paused: AtomicBool::new(new_rounds_paused),
        }
    }

    pub fn set_betting_paused(&self, paused: bool) {
        self.betting_paused.store(paused, Ordering::SeqCst);
    }

    pub fn set_new_rounds_paused(&self, paused: bool) {
        self.new_rounds_paused.store(paused, Ordering::SeqCst);
    }
}

#[async_trait]
impl SystemSettings for StaticSettings {
    async fn is_betting_paused(&self) -> Result<bool> {
        Ok(self.betting_paused.load(Ordering::SeqCst))
    }

    async fn is_new_rounds_paused(&self) -> Result<bool> {
        Ok(self.new_rounds_paused.load(Ordering::SeqCst))
    }
}

/// Flags shared by every process through Redis keys
///
/// A missing key means "not paused".
pub struct RedisSystemSettings {
    redis: ConnectionManager,
}

impl RedisSystemSettings {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    async fn flag(&self, key: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value.as_deref().map(parse_flag).unwrap_or(false))
    }

    pub async fn set_betting_paused(&self, paused: bool) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: () = conn.set(BETTING_PAUSED_KEY, paused.to_string()).await?;
        tracing::info!(paused, "Betting pause flag updated");
        Ok(())
    }

    pub async fn set_new_rounds_paused(&self, paused: bool) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: () = conn.set(NEW_ROUNDS_PAUSED_KEY, paused.to_string()).await?;
        tracing::info!(paused, "New rounds pause flag updated");
        Ok(())
    }
}

#[async_trait]
impl SystemSettings for RedisSystemSettings {
    async fn is_betting_paused(&self) -> Result<bool> {
        self.flag(BETTING_PAUSED_KEY).await
    }

    async fn is_new_rounds_paused(&self) -> Result<bool> {
        self.flag(NEW_ROUNDS_PAUSED_KEY).await
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
