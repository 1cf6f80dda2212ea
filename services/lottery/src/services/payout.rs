//! Draw-time payout distribution
//!
//! Pools are split with the largest-remainder method over minor units: every
//! bet gets `floor(pool * stake / total)`, and the few units left over go one
//! each to the bets with the largest fractional remainders (earlier bets win
//! ties). The sum of the allocations always equals the pool.

use shared::{BlockNumber, KyatAmount, ValidationError};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::{Bet, PayoutLine, Round, UserAccount, UserId};
use crate::errors::{LotteryError, Result};
use crate::repository::LotteryTx;
use crate::services::bets::BetLedger;

/// Outcome of one bet at draw time
#[derive(Debug, Clone, PartialEq)]
pub struct BetSettlement {
    pub bet_id: Uuid,
    pub user_id: UserId,
    pub block_number: BlockNumber,
    pub amount: KyatAmount,
    pub payout: KyatAmount,
    pub is_winner: bool,
}

/// Settlement of a whole round, computed before anything is written
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSettlement {
    pub winning_block: BlockNumber,
    /// Nobody hit the winning block; stakes are refunded from the winner pool
    pub refunded: bool,
    pub settlements: Vec<BetSettlement>,
    pub total_paid: KyatAmount,
}

impl RoundSettlement {
    /// Amount to credit per user, in ascending user id (the lock order)
    pub fn credits(&self) -> BTreeMap<UserId, KyatAmount> {
        let mut credits: BTreeMap<UserId, KyatAmount> = BTreeMap::new();
        for s in self.settlements.iter().filter(|s| s.payout > KyatAmount::ZERO) {
            let entry = credits.entry(s.user_id).or_default();
            *entry = KyatAmount::from_minor(entry.as_minor() + s.payout.as_minor());
        }
        credits
    }

    /// Lines that actually moved money, for the completion event
    pub fn payout_lines(&self) -> Vec<PayoutLine> {
        self.settlements
            .iter()
            .filter(|s| s.payout > KyatAmount::ZERO)
            .map(|s| PayoutLine {
                bet_id: s.bet_id,
                user_id: s.user_id,
                block_number: s.block_number,
                amount: s.amount,
                payout: s.payout,
            })
            .collect()
    }
}

/// Split `pool` across `weights` proportionally, exactly
///
/// Weights must be positive; the result has one entry per weight, in order.
pub fn allocate_proportional(
    pool: KyatAmount,
    weights: &[KyatAmount],
) -> std::result::Result<Vec<KyatAmount>, ValidationError> {
    if weights.is_empty() {
        return Ok(Vec::new());
    }
    if pool.is_negative() {
        return Err(ValidationError::NegativeAmount(pool.as_minor()));
    }
    if let Some(bad) = weights.iter().find(|w| w.as_minor() <= 0) {
        return Err(ValidationError::NegativeAmount(bad.as_minor()));
    }

    let total: i128 = weights.iter().map(|w| w.as_minor() as i128).sum();
    let pool_units = pool.as_minor() as i128;

    let mut shares = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    for (index, weight) in weights.iter().enumerate() {
        let scaled = pool_units * weight.as_minor() as i128;
        shares.push(scaled / total);
        remainders.push((scaled % total, index));
    }

    let allocated: i128 = shares.iter().sum();
    let leftover = (pool_units - allocated) as usize;

    // Stable sort keeps input order among equal remainders
    remainders.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, index) in remainders.into_iter().take(leftover) {
        shares[index] += 1;
    }

    shares
        .into_iter()
        .map(|s| i64::try_from(s).map(KyatAmount::from_minor))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| ValidationError::AmountOverflow)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PayoutCalculator;

impl PayoutCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Work out every bet's payout for a drawn block
    ///
    /// Winners share the round's winner pool by stake. With no winner every
    /// bet is refunded its share of 90% of the pool, recorded as a
    /// non-winning payout. Losing bets are settled at zero.
    pub fn calculate(
        &self,
        round: &Round,
        bets: &[Bet],
        winning_block: BlockNumber,
    ) -> Result<RoundSettlement> {
        let mut ordered: Vec<&Bet> = bets.iter().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let winners: Vec<&Bet> = ordered
            .iter()
            .copied()
            .filter(|b| b.block_number == winning_block)
            .collect();
        let refunded = winners.is_empty();

        let (eligible, pool) = if refunded {
            (ordered.clone(), round.total_pool.winner_pool_share())
        } else {
            (winners, round.winner_pool)
        };

        let weights: Vec<KyatAmount> = eligible.iter().map(|b| b.amount).collect();
        let shares = allocate_proportional(pool, &weights)?;
        let payouts: BTreeMap<Uuid, KyatAmount> =
            eligible.iter().map(|b| b.id).zip(shares).collect();

        let settlements: Vec<BetSettlement> = ordered
            .iter()
            .map(|b| BetSettlement {
                bet_id: b.id,
                user_id: b.user_id,
                block_number: b.block_number,
                amount: b.amount,
                payout: payouts.get(&b.id).copied().unwrap_or(KyatAmount::ZERO),
                is_winner: !refunded && b.block_number == winning_block,
            })
            .collect();
        let total_paid = settlements.iter().map(|s| s.payout).sum();

        Ok(RoundSettlement {
            winning_block,
            refunded,
            settlements,
            total_paid,
        })
    }

    /// Persist a settlement inside the draw transaction
    ///
    /// Returns the credited accounts so balance events can go out after commit.
    pub async fn apply_in(
        &self,
        tx: &mut dyn LotteryTx,
        settlement: &RoundSettlement,
    ) -> Result<Vec<UserAccount>> {
        for s in &settlement.settlements {
            if s.is_winner {
                BetLedger::update_bet_payout_in(tx, s.bet_id, s.payout).await?;
            } else {
                tx.settle_bet(s.bet_id, s.payout, false).await?;
            }
        }

        let mut credited = Vec::new();
        for (user_id, amount) in settlement.credits() {
            let mut user = tx
                .lock_user(user_id)
                .await?
                .ok_or(LotteryError::UserNotFound(user_id))?;
            user.credit(amount)?;
            tx.save_user(&user).await?;
            credited.push(user);
        }

        Ok(credited)
    }
}
