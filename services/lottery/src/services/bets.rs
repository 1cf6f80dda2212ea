//! Bet Ledger
//!
//! Validates bets and records them atomically together with the round's pool
//! aggregates and the bettor's balance.

use shared::{
    points_for_stake, BlockNumber, KyatAmount, MAX_BETS_PER_USER_PER_ROUND,
    MAX_STAKE_PER_USER_PER_ROUND_KYAT,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Bet, BetPlacedSnapshot, NewBet, Round, RoundId, UserAccount, UserId};
use crate::errors::{LotteryError, Result};
use crate::events::EventPublisher;
use crate::repository::{LotteryStore, LotteryTx};
use crate::settings::SystemSettings;

/// Everything a successful placement touched, as committed
#[derive(Debug, Clone)]
pub struct PlacedBet {
    pub bet: Bet,
    pub round: Round,
    pub user: UserAccount,
}

impl PlacedBet {
    pub fn snapshot(&self) -> BetPlacedSnapshot {
        BetPlacedSnapshot {
            bet_id: self.bet.id,
            user_id: self.bet.user_id,
            block_number: self.bet.block_number,
            amount: self.bet.amount,
            round: self.round.snapshot(),
            user_balance: self.user.balance,
            user_points: self.user.points,
        }
    }
}

#[derive(Clone)]
pub struct BetLedger {
    store: Arc<dyn LotteryStore>,
    settings: Arc<dyn SystemSettings>,
    events: Arc<dyn EventPublisher>,
}

impl BetLedger {
    pub fn new(
        store: Arc<dyn LotteryStore>,
        settings: Arc<dyn SystemSettings>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            settings,
            events,
        }
    }

    /// Place one bet on the active round
    ///
    /// `amount_kyat` is whole KYAT. Input and pause checks happen before any
    /// transaction is opened.
    pub async fn place_bet(
        &self,
        user_id: UserId,
        block_number: i64,
        amount_kyat: i64,
    ) -> Result<Bet> {
        let block = BlockNumber::new(block_number)?;
        let amount = KyatAmount::stake(amount_kyat)?;

        if self.settings.is_betting_paused().await? {
            return Err(LotteryError::BettingPaused);
        }

        let mut tx = self.store.begin().await?;
        let placed = match record_bet_in(tx.as_mut(), user_id, block, amount).await {
            Ok(placed) => placed,
            Err(e) => {
                tracing::info!(
                    user_id,
                    block = %block,
                    amount = %amount,
                    error = %e,
                    "Bet rejected"
                );
                e.record();
                return Err(e);
            }
        };
        tx.commit().await?;

        tracing::info!(
            bet_id = %placed.bet.id,
            user_id,
            round_id = placed.round.id,
            block = %block,
            amount = %amount,
            "Bet placed"
        );
        metrics::counter!("lottery_bets_placed_total").increment(1);
        metrics::histogram!("lottery_bet_amount_kyat").record(amount.to_kyat());

        self.notify(&placed).await;
        Ok(placed.bet)
    }

    /// Place a bet inside a caller's transaction
    ///
    /// Same checks and caps as [`BetLedger::place_bet`]; nothing is visible
    /// until the caller commits.
    pub async fn place_bet_in(
        &self,
        tx: &mut dyn LotteryTx,
        user_id: UserId,
        block: BlockNumber,
        amount: KyatAmount,
    ) -> Result<PlacedBet> {
        KyatAmount::stake(amount.whole_kyat())?;
        if self.settings.is_betting_paused().await? {
            return Err(LotteryError::BettingPaused);
        }
        record_bet_in(tx, user_id, block, amount).await
    }

    /// Post-commit notifications for a placement; failures are only logged
    pub async fn notify(&self, placed: &PlacedBet) {
        if let Err(e) = self.events.on_bet_placed(&placed.snapshot()).await {
            tracing::warn!(bet_id = %placed.bet.id, error = %e, "Failed to publish bet placed event");
        }
        if let Err(e) = self
            .events
            .on_user_balance_changed(placed.user.id, placed.user.balance, placed.user.points)
            .await
        {
            tracing::warn!(user_id = placed.user.id, error = %e, "Failed to publish balance event");
        }
    }

    /// All bets of a round in placement order
    pub async fn round_bets(&self, round_id: RoundId) -> Result<Vec<Bet>> {
        self.store.find_round_bets(round_id).await
    }

    /// Bets of a round that were drawn as winners
    pub async fn winning_bets(&self, round_id: RoundId) -> Result<Vec<Bet>> {
        let bets = self.store.find_round_bets(round_id).await?;
        Ok(bets.into_iter().filter(|b| b.is_winner).collect())
    }

    pub async fn user_round_bets(&self, user_id: UserId, round_id: RoundId) -> Result<Vec<Bet>> {
        self.store.find_user_round_bets(user_id, round_id).await
    }

    /// Mark a bet as a winner with the given payout, in its own transaction
    pub async fn update_bet_payout(&self, bet_id: Uuid, payout: KyatAmount) -> Result<()> {
        let mut tx = self.store.begin().await?;
        Self::update_bet_payout_in(tx.as_mut(), bet_id, payout).await?;
        tx.commit().await
    }

    /// Mark a bet as a winner inside an ambient transaction
    pub async fn update_bet_payout_in(
        tx: &mut dyn LotteryTx,
        bet_id: Uuid,
        payout: KyatAmount,
    ) -> Result<()> {
        if payout.is_negative() {
            return Err(shared::ValidationError::NegativeAmount(payout.as_minor()).into());
        }
        tx.settle_bet(bet_id, payout, true).await
    }
}

/// Steps shared by every placement path: caps, debit, insert, pool update
///
/// Locks the active round before the user.
async fn record_bet_in(
    tx: &mut dyn LotteryTx,
    user_id: UserId,
    block: BlockNumber,
    amount: KyatAmount,
) -> Result<PlacedBet> {
    let mut round = tx
        .lock_active_round()
        .await?
        .ok_or(LotteryError::NoActiveRound)?;

    let (count, staked) = tx.user_round_exposure(user_id, round.id).await?;
    if count >= MAX_BETS_PER_USER_PER_ROUND {
        return Err(LotteryError::RoundLimit(format!(
            "at most {} bets per round",
            MAX_BETS_PER_USER_PER_ROUND
        )));
    }
    let cap = KyatAmount::from_whole(MAX_STAKE_PER_USER_PER_ROUND_KYAT)?;
    if staked.checked_add(amount)? > cap {
        return Err(LotteryError::RoundLimit(format!(
            "total stake per round may not exceed {} (already staked {})",
            cap, staked
        )));
    }

    let mut user = tx
        .lock_user(user_id)
        .await?
        .ok_or(LotteryError::UserNotFound(user_id))?;
    if user.balance < amount {
        return Err(LotteryError::InsufficientBalance {
            required: amount,
            available: user.balance,
        });
    }
    user.debit(amount)?;
    user.points += points_for_stake(amount);
    tx.save_user(&user).await?;

    let bet = tx
        .insert_bet(NewBet {
            user_id,
            round_id: round.id,
            block_number: block,
            amount,
        })
        .await?;

    round.add_stake(amount)?;
    tx.update_round(&round).await?;

    Ok(PlacedBet { bet, round, user })
}
