//! Round Lifecycle Manager
//!
//! Opens rounds, draws them when due and chains the next round after each
//! draw. Every entry point is safe to call from overlapping ticks and from
//! several processes: the round row lock and the single-active-round
//! constraint do the serializing.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::domain::{NewRound, Round, RoundCompletedSnapshot, RoundId, RoundStatus, UserAccount};
use crate::errors::{LotteryError, Result};
use crate::events::EventPublisher;
use crate::randomness::BlockDrawer;
use crate::repository::LotteryStore;
use crate::services::payout::PayoutCalculator;
use crate::settings::SystemSettings;

/// What one `run_lottery` tick did
#[derive(Debug, Clone, PartialEq)]
pub enum LotteryTick {
    /// No round was active and a new one was opened
    Created(Round),
    /// The active round is not due yet
    Waiting(Round),
    /// The active round was drawn (or had already been drawn)
    Drawn(Round),
    /// No round is active and new rounds are paused
    Idle,
}

pub struct RoundManager {
    store: Arc<dyn LotteryStore>,
    settings: Arc<dyn SystemSettings>,
    events: Arc<dyn EventPublisher>,
    drawer: Arc<dyn BlockDrawer>,
    calculator: PayoutCalculator,
    round_duration: Duration,
}

impl RoundManager {
    pub fn new(
        store: Arc<dyn LotteryStore>,
        settings: Arc<dyn SystemSettings>,
        events: Arc<dyn EventPublisher>,
        drawer: Arc<dyn BlockDrawer>,
        round_duration: Duration,
    ) -> Self {
        Self {
            store,
            settings,
            events,
            drawer,
            calculator: PayoutCalculator::new(),
            round_duration,
        }
    }

    pub fn round_duration(&self) -> Duration {
        self.round_duration
    }

    pub async fn get_active_round(&self) -> Result<Option<Round>> {
        self.store.find_active_round().await
    }

    /// Completed rounds, newest first
    pub async fn recent_rounds(&self, limit: i64) -> Result<Vec<Round>> {
        self.store.find_recent_rounds(limit).await
    }

    /// Open the next round
    ///
    /// Returns the existing round if one is already active, and `None` when
    /// new rounds are paused and `force_create` is not set.
    pub async fn create_new_round(&self, force_create: bool) -> Result<Option<Round>> {
        if !force_create && self.settings.is_new_rounds_paused().await? {
            tracing::info!("New rounds are paused, not creating a round");
            return Ok(None);
        }

        let mut tx = self.store.begin().await?;
        if let Some(active) = tx.lock_active_round().await? {
            tracing::debug!(round_id = active.id, "Active round already exists");
            return Ok(Some(active));
        }

        let round_number = tx.last_round_number().await?.unwrap_or(0) + 1;
        let inserted = tx
            .insert_round(NewRound {
                round_number,
                status: RoundStatus::Active,
                draw_time: Utc::now() + self.round_duration,
            })
            .await;

        let round = match inserted {
            Ok(round) => round,
            // Another process opened a round between our read and insert
            Err(LotteryError::Conflict(reason)) => {
                drop(tx);
                tracing::info!(reason = %reason, "Lost round creation race, using existing round");
                return self.store.find_active_round().await;
            }
            Err(e) => return Err(e),
        };
        tx.commit().await?;

        tracing::info!(
            round_id = round.id,
            round_number = round.round_number,
            draw_time = %round.draw_time,
            forced = force_create,
            "Round created"
        );
        metrics::counter!("lottery_rounds_created_total").increment(1);

        Ok(Some(round))
    }

    /// Periodic entry point: open a round if none is active, draw it when due
    pub async fn run_lottery(&self) -> Result<LotteryTick> {
        let Some(active) = self.store.find_active_round().await? else {
            return Ok(match self.create_new_round(false).await? {
                Some(round) => LotteryTick::Created(round),
                None => LotteryTick::Idle,
            });
        };

        if !active.is_due(Utc::now()) {
            return Ok(LotteryTick::Waiting(active));
        }

        let drawn = self.draw_winner(active.id).await?;
        Ok(LotteryTick::Drawn(drawn))
    }

    /// Draw a round and settle every bet in one transaction
    ///
    /// Drawing a completed round returns it unchanged.
    pub async fn draw_winner(&self, round_id: RoundId) -> Result<Round> {
        let started = std::time::Instant::now();
        let mut tx = self.store.begin().await?;

        let mut round = tx
            .lock_round(round_id)
            .await?
            .ok_or(LotteryError::RoundNotFound(round_id))?;

        if round.is_completed() {
            tracing::debug!(round_id, "Round already drawn");
            return Ok(round);
        }
        if !round.is_active() {
            return Err(LotteryError::NoActiveRound);
        }

        let bets = tx.round_bets(round_id).await?;

        let (settlement, credited) = if bets.is_empty() {
            (None, Vec::new())
        } else {
            let winning_block = self.drawer.draw()?;
            let settlement = self.calculator.calculate(&round, &bets, winning_block)?;
            let credited = self.calculator.apply_in(tx.as_mut(), &settlement).await?;
            round.winning_block = Some(winning_block);
            (Some(settlement), credited)
        };

        round.status = RoundStatus::Completed;
        round.drawn_at = Some(Utc::now());
        tx.update_round(&round).await?;
        tx.commit().await?;

        let snapshot = match &settlement {
            Some(s) => RoundCompletedSnapshot {
                round: round.snapshot(),
                refunded: s.refunded,
                payouts: s.payout_lines(),
                total_paid: s.total_paid,
            },
            None => RoundCompletedSnapshot {
                round: round.snapshot(),
                refunded: false,
                payouts: Vec::new(),
                total_paid: Default::default(),
            },
        };

        tracing::info!(
            round_id,
            round_number = round.round_number,
            winning_block = ?round.winning_block.map(|b| b.get()),
            total_bets = round.total_bets,
            total_pool = %round.total_pool,
            total_paid = %snapshot.total_paid,
            refunded = snapshot.refunded,
            "Round drawn"
        );
        metrics::counter!("lottery_rounds_drawn_total").increment(1);
        metrics::histogram!("lottery_draw_duration_seconds").record(started.elapsed().as_secs_f64());

        self.publish_completion(&snapshot, &credited).await;
        self.open_successor(&round).await;

        Ok(round)
    }

    async fn publish_completion(&self, snapshot: &RoundCompletedSnapshot, credited: &[UserAccount]) {
        if let Err(e) = self.events.on_round_completed(snapshot).await {
            tracing::warn!(round_id = snapshot.round.round_id, error = %e, "Failed to publish round completion");
        }
        for user in credited {
            if let Err(e) = self
                .events
                .on_user_balance_changed(user.id, user.balance, user.points)
                .await
            {
                tracing::warn!(user_id = user.id, error = %e, "Failed to publish balance event");
            }
        }
    }

    /// Best-effort: the drawn round stays completed whatever happens here
    async fn open_successor(&self, drawn: &Round) {
        match self.create_new_round(false).await {
            Ok(Some(next)) => {
                tracing::debug!(previous = drawn.id, next = next.id, "Successor round opened");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!(
                    round_id = drawn.id,
                    error = %e,
                    "Failed to create successor round"
                );
                e.record();
                metrics::counter!("lottery_successor_round_failures_total").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventPublisher;
    use crate::randomness::ThreadRngDrawer;
    use crate::repository::InMemoryStore;
    use crate::settings::StaticSettings;

    fn manager(store: InMemoryStore, settings: Arc<StaticSettings>) -> RoundManager {
        RoundManager::new(
            Arc::new(store),
            settings,
            Arc::new(NoopEventPublisher),
            Arc::new(ThreadRngDrawer),
            Duration::minutes(1),
        )
    }

    #[tokio::test]
    async fn test_create_round_numbers_sequentially() {
        let store = InMemoryStore::new();
        let rounds = manager(store.clone(), Arc::new(StaticSettings::default()));

        let first = rounds.create_new_round(false).await.unwrap().unwrap();
        assert_eq!(first.round_number, 1);
        assert_eq!(first.total_pool, Default::default());

        // Still active, so the same round comes back
        let again = rounds.create_new_round(true).await.unwrap().unwrap();
        assert_eq!(again.id, first.id);

        rounds.draw_winner(first.id).await.unwrap();
        let second = rounds.get_active_round().await.unwrap().unwrap();
        assert_eq!(second.round_number, 2);
    }

    #[tokio::test]
    async fn test_paused_rounds_require_force() {
        let store = InMemoryStore::new();
        let settings = Arc::new(StaticSettings::new(false, true));
        let rounds = manager(store, settings);

        assert!(rounds.create_new_round(false).await.unwrap().is_none());
        assert_eq!(rounds.run_lottery().await.unwrap(), LotteryTick::Idle);
        assert!(rounds.create_new_round(true).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_round_completes_without_winner() {
        let store = InMemoryStore::new();
        let rounds = manager(store.clone(), Arc::new(StaticSettings::default()));
        let round = rounds.create_new_round(false).await.unwrap().unwrap();

        let drawn = rounds.draw_winner(round.id).await.unwrap();
        assert!(drawn.is_completed());
        assert_eq!(drawn.winning_block, None);
        assert!(drawn.drawn_at.is_some());
        assert_eq!(rounds.recent_rounds(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_round() {
        let rounds = manager(InMemoryStore::new(), Arc::new(StaticSettings::default()));
        let err = rounds.draw_winner(42).await.unwrap_err();
        assert!(matches!(err, LotteryError::RoundNotFound(42)));
    }
}
