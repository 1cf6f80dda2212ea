use async_trait::async_trait;
use shared::KyatAmount;
use uuid::Uuid;

use crate::domain::{
    AutoBetExecution, AutoBetPlan, Bet, NewBet, NewRound, Round, RoundId, UserAccount, UserId,
};
use crate::errors::Result;

/// Relational store shared by every process running the lottery
///
/// Methods on the store itself are unlocked reads. Anything that moves money
/// goes through a [`LotteryTx`] obtained from [`LotteryStore::begin`].
#[async_trait]
pub trait LotteryStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LotteryTx>>;

    async fn find_active_round(&self) -> Result<Option<Round>>;
    async fn find_round(&self, round_id: RoundId) -> Result<Option<Round>>;
    async fn find_recent_rounds(&self, limit: i64) -> Result<Vec<Round>>;
    async fn find_round_bets(&self, round_id: RoundId) -> Result<Vec<Bet>>;
    async fn find_user_round_bets(&self, user_id: UserId, round_id: RoundId) -> Result<Vec<Bet>>;
    async fn find_user(&self, user_id: UserId) -> Result<Option<UserAccount>>;
    async fn find_plan(&self, plan_id: Uuid) -> Result<Option<AutoBetPlan>>;
    async fn find_active_plans(&self) -> Result<Vec<AutoBetPlan>>;
    async fn find_user_plans(&self, user_id: UserId) -> Result<Vec<AutoBetPlan>>;
    async fn find_plan_executions(&self, plan_id: Uuid) -> Result<Vec<AutoBetExecution>>;

    /// Cheap round trip used by health checks
    async fn ping(&self) -> Result<()>;
}

/// One open transaction
///
/// `lock_*` methods take a pessimistic row lock held until commit. Dropping
/// the transaction without calling [`LotteryTx::commit`] rolls it back.
/// Lock order is rounds, then plans, then users (ascending id).
#[async_trait]
pub trait LotteryTx: Send {
    async fn lock_active_round(&mut self) -> Result<Option<Round>>;
    async fn lock_round(&mut self, round_id: RoundId) -> Result<Option<Round>>;
    async fn last_round_number(&mut self) -> Result<Option<i64>>;
    async fn insert_round(&mut self, round: NewRound) -> Result<Round>;
    async fn update_round(&mut self, round: &Round) -> Result<()>;

    async fn round_bets(&mut self, round_id: RoundId) -> Result<Vec<Bet>>;
    /// Count and total stake of a user's bets in a round
    async fn user_round_exposure(&mut self, user_id: UserId, round_id: RoundId)
        -> Result<(i64, KyatAmount)>;
    async fn insert_bet(&mut self, bet: NewBet) -> Result<Bet>;
    /// Record the draw outcome of a bet; fails with `BetNotFound` for unknown ids
    async fn settle_bet(&mut self, bet_id: Uuid, payout: KyatAmount, is_winner: bool) -> Result<()>;

    async fn lock_user(&mut self, user_id: UserId) -> Result<Option<UserAccount>>;
    async fn save_user(&mut self, user: &UserAccount) -> Result<()>;

    async fn insert_plan(&mut self, plan: &AutoBetPlan) -> Result<()>;
    async fn lock_plan(&mut self, plan_id: Uuid) -> Result<Option<AutoBetPlan>>;
    async fn update_plan(&mut self, plan: &AutoBetPlan) -> Result<()>;

    async fn insert_execution(&mut self, execution: &AutoBetExecution) -> Result<()>;
    async fn lock_execution(&mut self, execution_id: Uuid) -> Result<Option<AutoBetExecution>>;
    /// Executions still `locked` for any round other than `current_round`
    async fn lock_stale_executions(
        &mut self,
        current_round: Option<RoundId>,
    ) -> Result<Vec<AutoBetExecution>>;
    async fn update_execution(&mut self, execution: &AutoBetExecution) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
