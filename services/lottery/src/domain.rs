use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{BlockNumber, KyatAmount, ValidationError};
use uuid::Uuid;

/// Identifier of a user in the external balance store
pub type UserId = i64;

/// Database identifier of a round (distinct from its public round number)
pub type RoundId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Pending,
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub id: RoundId,
    pub round_number: i64,
    pub status: RoundStatus,
    pub winning_block: Option<BlockNumber>,
    pub total_pool: KyatAmount,
    pub admin_fee: KyatAmount,
    pub winner_pool: KyatAmount,
    pub total_bets: i64,
    pub draw_time: DateTime<Utc>,
    pub drawn_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Round {
    pub fn is_active(&self) -> bool {
        self.status == RoundStatus::Active
    }

    pub fn is_completed(&self) -> bool {
        self.status == RoundStatus::Completed
    }

    /// Whether the draw time has been reached
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.draw_time <= now
    }

    /// Add one bet's stake to the pool, keeping fee and winner pool in step
    pub fn add_stake(&mut self, amount: KyatAmount) -> Result<(), ValidationError> {
        self.total_pool = self.total_pool.checked_add(amount)?;
        self.total_bets += 1;
        self.admin_fee = self.total_pool.admin_fee_share();
        self.winner_pool = self.total_pool.winner_pool_share();
        Ok(())
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            round_id: self.id,
            round_number: self.round_number,
            status: self.status,
            winning_block: self.winning_block,
            total_pool: self.total_pool,
            admin_fee: self.admin_fee,
            winner_pool: self.winner_pool,
            total_bets: self.total_bets,
            draw_time: self.draw_time,
            drawn_at: self.drawn_at,
        }
    }
}

/// Values for a round that has not been persisted yet
#[derive(Debug, Clone)]
pub struct NewRound {
    pub round_number: i64,
    pub status: RoundStatus,
    pub draw_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub id: Uuid,
    pub user_id: UserId,
    pub round_id: RoundId,
    pub block_number: BlockNumber,
    pub amount: KyatAmount,
    pub payout: Option<KyatAmount>,
    pub is_winner: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBet {
    pub user_id: UserId,
    pub round_id: RoundId,
    pub block_number: BlockNumber,
    pub amount: KyatAmount,
}

/// Balance row owned by the external user store, mutated here only under lock
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAccount {
    pub id: UserId,
    pub balance: KyatAmount,
    pub points: i64,
}

impl UserAccount {
    pub fn debit(&mut self, amount: KyatAmount) -> Result<(), ValidationError> {
        let balance = self.balance.checked_sub(amount)?;
        if balance.is_negative() {
            return Err(ValidationError::NegativeAmount(balance.as_minor()));
        }
        self.balance = balance;
        Ok(())
    }

    pub fn credit(&mut self, amount: KyatAmount) -> Result<(), ValidationError> {
        self.balance = self.balance.checked_add(amount)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoBetPlan {
    pub id: Uuid,
    pub user_id: UserId,
    pub blocks: Vec<BlockNumber>,
    pub bet_amount_per_block: KyatAmount,
    pub rounds_remaining: i32,
    pub total_rounds: i32,
    pub total_locked_amount: KyatAmount,
    pub status: PlanStatus,
    /// Last round this plan has been run against; survives restarts
    pub last_executed_round_id: Option<RoundId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AutoBetPlan {
    /// Cost of one execution: every block at the per-block stake
    pub fn per_round_amount(&self) -> Result<KyatAmount, ValidationError> {
        self.bet_amount_per_block.checked_mul(self.blocks.len() as i64)
    }

    /// Escrow still held for rounds that have not run
    pub fn remaining_locked_amount(&self) -> Result<KyatAmount, ValidationError> {
        self.total_locked_amount
            .mul_div_floor(self.rounds_remaining as i64, self.total_rounds as i64)
    }

    pub fn is_due_for(&self, round_id: RoundId) -> bool {
        self.status == PlanStatus::Active
            && self.rounds_remaining > 0
            && self.last_executed_round_id != Some(round_id)
    }
}

/// States of the compensating transaction that runs a plan against one round
///
/// `Locked` is written first and claims the round; exactly one of the two
/// terminal states follows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Locked,
    Applied,
    RolledBack,
}

impl ExecutionState {
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        matches!(
            (self, next),
            (ExecutionState::Locked, ExecutionState::Applied)
                | (ExecutionState::Locked, ExecutionState::RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        self != ExecutionState::Locked
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoBetExecution {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub round_id: RoundId,
    pub user_id: UserId,
    pub amount: KyatAmount,
    pub state: ExecutionState,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Event snapshots
// ---------------------------------------------------------------------------

/// Amounts in snapshots are KYAT minor units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundSnapshot {
    pub round_id: RoundId,
    pub round_number: i64,
    pub status: RoundStatus,
    pub winning_block: Option<BlockNumber>,
    pub total_pool: KyatAmount,
    pub admin_fee: KyatAmount,
    pub winner_pool: KyatAmount,
    pub total_bets: i64,
    pub draw_time: DateTime<Utc>,
    pub drawn_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BetPlacedSnapshot {
    pub bet_id: Uuid,
    pub user_id: UserId,
    pub block_number: BlockNumber,
    pub amount: KyatAmount,
    pub round: RoundSnapshot,
    pub user_balance: KyatAmount,
    pub user_points: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayoutLine {
    pub bet_id: Uuid,
    pub user_id: UserId,
    pub block_number: BlockNumber,
    pub amount: KyatAmount,
    pub payout: KyatAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundCompletedSnapshot {
    pub round: RoundSnapshot,
    /// True when nobody hit the winning block and stakes were refunded
    pub refunded: bool,
    pub payouts: Vec<PayoutLine>,
    pub total_paid: KyatAmount,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round() -> Round {
        Round {
            id: 1,
            round_number: 1,
            status: RoundStatus::Active,
            winning_block: None,
            total_pool: KyatAmount::ZERO,
            admin_fee: KyatAmount::ZERO,
            winner_pool: KyatAmount::ZERO,
            total_bets: 0,
            draw_time: Utc::now(),
            drawn_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_add_stake_keeps_split_in_step() {
        let mut round = round();
        round.add_stake(KyatAmount::stake(10_000).unwrap()).unwrap();
        round.add_stake(KyatAmount::stake(2_500).unwrap()).unwrap();

        assert_eq!(round.total_bets, 2);
        assert_eq!(round.total_pool, KyatAmount::from_whole(12_500).unwrap());
        assert_eq!(round.admin_fee, KyatAmount::from_whole(1_250).unwrap());
        assert_eq!(round.winner_pool, KyatAmount::from_whole(11_250).unwrap());
    }

    #[test]
    fn test_debit_refuses_overdraft() {
        let mut user = UserAccount {
            id: 7,
            balance: KyatAmount::from_whole(500).unwrap(),
            points: 0,
        };
        assert!(user.debit(KyatAmount::from_whole(501).unwrap()).is_err());
        assert_eq!(user.balance, KyatAmount::from_whole(500).unwrap());
        user.debit(KyatAmount::from_whole(500).unwrap()).unwrap();
        assert_eq!(user.balance, KyatAmount::ZERO);
    }

    #[test]
    fn test_execution_state_transitions() {
        assert!(ExecutionState::Locked.can_transition_to(ExecutionState::Applied));
        assert!(ExecutionState::Locked.can_transition_to(ExecutionState::RolledBack));
        assert!(!ExecutionState::Applied.can_transition_to(ExecutionState::RolledBack));
        assert!(!ExecutionState::RolledBack.can_transition_to(ExecutionState::Locked));
        assert!(!ExecutionState::Locked.is_terminal());
    }

    #[test]
    fn test_plan_remaining_escrow() {
        let plan = AutoBetPlan {
            id: Uuid::new_v4(),
            user_id: 1,
            blocks: vec![BlockNumber::new(1).unwrap(), BlockNumber::new(2).unwrap()],
            bet_amount_per_block: KyatAmount::stake(2_000).unwrap(),
            rounds_remaining: 2,
            total_rounds: 3,
            total_locked_amount: KyatAmount::from_whole(12_000).unwrap(),
            status: PlanStatus::Active,
            last_executed_round_id: Some(4),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(plan.per_round_amount().unwrap(), KyatAmount::from_whole(4_000).unwrap());
        assert_eq!(
            plan.remaining_locked_amount().unwrap(),
            KyatAmount::from_whole(8_000).unwrap()
        );
        assert!(!plan.is_due_for(4));
        assert!(plan.is_due_for(5));
    }
}
