//! In-memory LotteryStore implementation
//!
//! Every transaction holds the single state mutex from `begin` until it is
//! committed or dropped, so transactions are fully serialized. Writes go to a
//! working copy that replaces the shared state on commit; dropping the
//! transaction discards the copy, which is the rollback.

use async_trait::async_trait;
use chrono::Utc;
use shared::KyatAmount;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    AutoBetExecution, AutoBetPlan, Bet, ExecutionState, NewBet, NewRound, PlanStatus, Round,
    RoundId, RoundStatus, UserAccount, UserId,
};
use crate::errors::{LotteryError, Result};

use super::store::{LotteryStore, LotteryTx};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<UserId, UserAccount>,
    rounds: BTreeMap<RoundId, Round>,
    last_round_id: RoundId,
    /// Insertion order doubles as placement order
    bets: Vec<Bet>,
    plans: BTreeMap<Uuid, AutoBetPlan>,
    executions: Vec<AutoBetExecution>,
}

impl MemoryState {
    fn active_round(&self) -> Option<&Round> {
        self.rounds.values().find(|r| r.status == RoundStatus::Active)
    }

    fn bets_where<F: Fn(&Bet) -> bool>(&self, predicate: F) -> Vec<Bet> {
        self.bets.iter().filter(|b| predicate(b)).cloned().collect()
    }
}

/// Serializable in-memory store used by tests and by local runs without Postgres
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite a user row, standing in for the external user store
    pub async fn upsert_user(&self, user: UserAccount) {
        let mut state = self.state.lock().await;
        state.users.insert(user.id, user);
    }
}

#[async_trait]
impl LotteryStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn LotteryTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn find_active_round(&self) -> Result<Option<Round>> {
        Ok(self.state.lock().await.active_round().cloned())
    }

    async fn find_round(&self, round_id: RoundId) -> Result<Option<Round>> {
        Ok(self.state.lock().await.rounds.get(&round_id).cloned())
    }

    async fn find_recent_rounds(&self, limit: i64) -> Result<Vec<Round>> {
        let state = self.state.lock().await;
        Ok(state
            .rounds
            .values()
            .rev()
            .filter(|r| r.is_completed())
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn find_round_bets(&self, round_id: RoundId) -> Result<Vec<Bet>> {
        Ok(self.state.lock().await.bets_where(|b| b.round_id == round_id))
    }

    async fn find_user_round_bets(&self, user_id: UserId, round_id: RoundId) -> Result<Vec<Bet>> {
        Ok(self
            .state
            .lock()
            .await
            .bets_where(|b| b.round_id == round_id && b.user_id == user_id))
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<UserAccount>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn find_plan(&self, plan_id: Uuid) -> Result<Option<AutoBetPlan>> {
        Ok(self.state.lock().await.plans.get(&plan_id).cloned())
    }

    async fn find_active_plans(&self) -> Result<Vec<AutoBetPlan>> {
        let state = self.state.lock().await;
        let mut plans: Vec<AutoBetPlan> = state
            .plans
            .values()
            .filter(|p| p.status == PlanStatus::Active)
            .cloned()
            .collect();
        plans.sort_by_key(|p| (p.created_at, p.id));
        Ok(plans)
    }

    async fn find_user_plans(&self, user_id: UserId) -> Result<Vec<AutoBetPlan>> {
        let state = self.state.lock().await;
        let mut plans: Vec<AutoBetPlan> = state
            .plans
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    async fn find_plan_executions(&self, plan_id: Uuid) -> Result<Vec<AutoBetExecution>> {
        let state = self.state.lock().await;
        Ok(state
            .executions
            .iter()
            .filter(|e| e.plan_id == plan_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl LotteryTx for MemoryTx {
    async fn lock_active_round(&mut self) -> Result<Option<Round>> {
        Ok(self.working.active_round().cloned())
    }

    async fn lock_round(&mut self, round_id: RoundId) -> Result<Option<Round>> {
        Ok(self.working.rounds.get(&round_id).cloned())
    }

    async fn last_round_number(&mut self) -> Result<Option<i64>> {
        Ok(self.working.rounds.values().map(|r| r.round_number).max())
    }

    async fn insert_round(&mut self, round: NewRound) -> Result<Round> {
        if self
            .working
            .rounds
            .values()
            .any(|r| r.round_number == round.round_number)
        {
            return Err(LotteryError::Conflict(format!(
                "round number {} already exists",
                round.round_number
            )));
        }
        if round.status == RoundStatus::Active && self.working.active_round().is_some() {
            return Err(LotteryError::Conflict("an active round already exists".into()));
        }

        self.working.last_round_id += 1;
        let created = Round {
            id: self.working.last_round_id,
            round_number: round.round_number,
            status: round.status,
            winning_block: None,
            total_pool: KyatAmount::ZERO,
            admin_fee: KyatAmount::ZERO,
            winner_pool: KyatAmount::ZERO,
            total_bets: 0,
            draw_time: round.draw_time,
            drawn_at: None,
            created_at: Utc::now(),
        };
        self.working.rounds.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_round(&mut self, round: &Round) -> Result<()> {
        match self.working.rounds.get_mut(&round.id) {
            Some(existing) => {
                *existing = round.clone();
                Ok(())
            }
            None => Err(LotteryError::RoundNotFound(round.id)),
        }
    }

    async fn round_bets(&mut self, round_id: RoundId) -> Result<Vec<Bet>> {
        Ok(self.working.bets_where(|b| b.round_id == round_id))
    }

    async fn user_round_exposure(
        &mut self,
        user_id: UserId,
        round_id: RoundId,
    ) -> Result<(i64, KyatAmount)> {
        let bets = self
            .working
            .bets_where(|b| b.round_id == round_id && b.user_id == user_id);
        let total = bets.iter().map(|b| b.amount).sum();
        Ok((bets.len() as i64, total))
    }

    async fn insert_bet(&mut self, bet: NewBet) -> Result<Bet> {
        if !self.working.users.contains_key(&bet.user_id) {
            return Err(LotteryError::UserNotFound(bet.user_id));
        }
        if !self.working.rounds.contains_key(&bet.round_id) {
            return Err(LotteryError::RoundNotFound(bet.round_id));
        }

        let created = Bet {
            id: Uuid::new_v4(),
            user_id: bet.user_id,
            round_id: bet.round_id,
            block_number: bet.block_number,
            amount: bet.amount,
            payout: None,
            is_winner: false,
            created_at: Utc::now(),
        };
        self.working.bets.push(created.clone());
        Ok(created)
    }

    async fn settle_bet(&mut self, bet_id: Uuid, payout: KyatAmount, is_winner: bool) -> Result<()> {
        let bet = self
            .working
            .bets
            .iter_mut()
            .find(|b| b.id == bet_id)
            .ok_or(LotteryError::BetNotFound(bet_id))?;
        bet.payout = Some(payout);
        bet.is_winner = is_winner;
        Ok(())
    }

    async fn lock_user(&mut self, user_id: UserId) -> Result<Option<UserAccount>> {
        Ok(self.working.users.get(&user_id).cloned())
    }

    async fn save_user(&mut self, user: &UserAccount) -> Result<()> {
        if user.balance.is_negative() {
            return Err(LotteryError::Internal(anyhow::anyhow!(
                "balance of user {} would become negative",
                user.id
            )));
        }
        match self.working.users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(LotteryError::UserNotFound(user.id)),
        }
    }

    async fn insert_plan(&mut self, plan: &AutoBetPlan) -> Result<()> {
        if self.working.plans.contains_key(&plan.id) {
            return Err(LotteryError::Conflict(format!("plan {} already exists", plan.id)));
        }
        self.working.plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn lock_plan(&mut self, plan_id: Uuid) -> Result<Option<AutoBetPlan>> {
        Ok(self.working.plans.get(&plan_id).cloned())
    }

    async fn update_plan(&mut self, plan: &AutoBetPlan) -> Result<()> {
        match self.working.plans.get_mut(&plan.id) {
            Some(existing) => {
                *existing = plan.clone();
                Ok(())
            }
            None => Err(LotteryError::PlanNotFound(plan.id)),
        }
    }

    async fn insert_execution(&mut self, execution: &AutoBetExecution) -> Result<()> {
        if self
            .working
            .executions
            .iter()
            .any(|e| e.plan_id == execution.plan_id && e.round_id == execution.round_id)
        {
            return Err(LotteryError::Conflict(format!(
                "plan {} already executed for round {}",
                execution.plan_id, execution.round_id
            )));
        }
        self.working.executions.push(execution.clone());
        Ok(())
    }

    async fn lock_execution(&mut self, execution_id: Uuid) -> Result<Option<AutoBetExecution>> {
        Ok(self
            .working
            .executions
            .iter()
            .find(|e| e.id == execution_id)
            .cloned())
    }

    async fn lock_stale_executions(
        &mut self,
        current_round: Option<RoundId>,
    ) -> Result<Vec<AutoBetExecution>> {
        Ok(self
            .working
            .executions
            .iter()
            .filter(|e| e.state == ExecutionState::Locked && Some(e.round_id) != current_round)
            .cloned()
            .collect())
    }

    async fn update_execution(&mut self, execution: &AutoBetExecution) -> Result<()> {
        let existing = self
            .working
            .executions
            .iter_mut()
            .find(|e| e.id == execution.id)
            .ok_or_else(|| {
                LotteryError::Internal(anyhow::anyhow!("execution {} not found", execution.id))
            })?;
        *existing = execution.clone();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shared::BlockNumber;

    fn new_round(number: i64) -> NewRound {
        NewRound {
            round_number: number,
            status: RoundStatus::Active,
            draw_time: Utc::now() + Duration::minutes(1),
        }
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = InMemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_round(new_round(1)).await.unwrap();
            // dropped without commit
        }
        assert!(store.find_active_round().await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        tx.insert_round(new_round(1)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.find_active_round().await.unwrap().unwrap().round_number, 1);
    }

    #[tokio::test]
    async fn test_single_active_round_enforced() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_round(new_round(1)).await.unwrap();
        let err = tx.insert_round(new_round(2)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_exposure_counts_only_matching_user_and_round() {
        let store = InMemoryStore::new();
        for id in [1, 2] {
            store
                .upsert_user(UserAccount { id, balance: KyatAmount::ZERO, points: 0 })
                .await;
        }
        let mut tx = store.begin().await.unwrap();
        let round = tx.insert_round(new_round(1)).await.unwrap();
        for (user_id, kyat) in [(1, 1_000), (1, 2_000), (2, 5_000)] {
            tx.insert_bet(NewBet {
                user_id,
                round_id: round.id,
                block_number: BlockNumber::new(3).unwrap(),
                amount: KyatAmount::stake(kyat).unwrap(),
            })
            .await
            .unwrap();
        }

        let (count, total) = tx.user_round_exposure(1, round.id).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(total, KyatAmount::from_whole(3_000).unwrap());
    }

    #[tokio::test]
    async fn test_settle_unknown_bet_is_not_found() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .settle_bet(Uuid::new_v4(), KyatAmount::ZERO, false)
            .await
            .unwrap_err();
        assert!(matches!(err, LotteryError::BetNotFound(_)));
    }
}
