//! Post-commit notifications for realtime clients
//!
//! Publishing is fire-and-forget: callers log failures and move on, a
//! notification never undoes a committed change.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use shared::KyatAmount;

use crate::domain::{BetPlacedSnapshot, RoundCompletedSnapshot, UserId};
use crate::errors::{LotteryError, Result};

/// Redis stream consumed by the realtime gateway
pub const EVENTS_STREAM: &str = "lottery:events";

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn on_round_completed(&self, snapshot: &RoundCompletedSnapshot) -> Result<()>;
    async fn on_bet_placed(&self, snapshot: &BetPlacedSnapshot) -> Result<()>;
    async fn on_user_balance_changed(
        &self,
        user_id: UserId,
        balance: KyatAmount,
        points: i64,
    ) -> Result<()>;
}

pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn on_round_completed(&self, _snapshot: &RoundCompletedSnapshot) -> Result<()> {
        Ok(())
    }

    async fn on_bet_placed(&self, _snapshot: &BetPlacedSnapshot) -> Result<()> {
        Ok(())
    }

    async fn on_user_balance_changed(
        &self,
        _user_id: UserId,
        _balance: KyatAmount,
        _points: i64,
    ) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct BalanceChanged {
    user_id: UserId,
    balance: KyatAmount,
    points: i64,
}

pub struct RedisEventPublisher {
    redis: ConnectionManager,
}

impl RedisEventPublisher {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    async fn publish<T: Serialize + Sync>(&self, kind: &str, payload: &T) -> Result<()> {
        let payload = serde_json::to_string(payload)
            .map_err(|e| LotteryError::Internal(anyhow::anyhow!("Event encoding failed: {}", e)))?;

        let mut conn = self.redis.clone();
        let _: String = conn
            .xadd(EVENTS_STREAM, "*", &[("type", kind), ("payload", payload.as_str())])
            .await?;

        tracing::debug!(event = kind, "Published lottery event");
        metrics::counter!("lottery_events_published_total", "event" => kind.to_string()).increment(1);
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn on_round_completed(&self, snapshot: &RoundCompletedSnapshot) -> Result<()> {
        self.publish("round_completed", snapshot).await
    }

    async fn on_bet_placed(&self, snapshot: &BetPlacedSnapshot) -> Result<()> {
        self.publish("bet_placed", snapshot).await
    }

    async fn on_user_balance_changed(
        &self,
        user_id: UserId,
        balance: KyatAmount,
        points: i64,
    ) -> Result<()> {
        self.publish(
            "user_balance_changed",
            &BalanceChanged {
                user_id,
                balance,
                points,
            },
        )
        .await
    }
}
