//! AutoBet Plan Executor
//!
//! A plan's full cost is debited when it is created and held as escrow. Each
//! round the plan runs as a small compensating transaction recorded in
//! `autobet_executions`:
//!
//! 1. claim: insert a `locked` execution and stamp the plan with the round id
//! 2. apply: in one transaction release the round's escrow to the user, place
//!    every block bet and decrement the remaining rounds, then mark the
//!    execution `applied`
//! 3. on failure: mark the execution `rolled_back` and pause the plan
//!
//! The apply transaction either commits as a whole or not at all, so a failed
//! round never leaves partial bets or a released escrow behind.

use chrono::Utc;
use serde::Serialize;
use shared::{BlockNumber, KyatAmount, MAX_PLAN_BLOCKS, MAX_STAKE_PER_USER_PER_ROUND_KYAT};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    AutoBetExecution, AutoBetPlan, ExecutionState, PlanStatus, RoundId, UserId,
};
use crate::errors::{LotteryError, Result};
use crate::events::EventPublisher;
use crate::repository::LotteryStore;
use crate::services::bets::{BetLedger, PlacedBet};

/// What happens to a plan whose round could not be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Scheduled runs: stop the plan until someone looks at it
    Pause,
    /// The attempt made right after creation: keep the plan running
    KeepActive,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanRunOutcome {
    Executed {
        rounds_remaining: i32,
        completed: bool,
    },
    /// Already run for this round, claimed elsewhere, or no longer eligible
    Skipped,
    RolledBack {
        error: String,
        paused: bool,
    },
}

/// Summary of one `execute_auto_bets` batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutoBetBatchReport {
    pub round_id: Option<RoundId>,
    pub executed: usize,
    pub completed: usize,
    pub paused: usize,
    pub skipped: usize,
    /// Plans left active after a store error in claim or rollback
    pub failed: usize,
    /// Stale `locked` executions from earlier rounds resolved at batch start
    pub recovered: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancelledPlan {
    pub plan: AutoBetPlan,
    pub refunded: KyatAmount,
}

#[derive(Clone)]
pub struct AutoBetExecutor {
    store: Arc<dyn LotteryStore>,
    ledger: BetLedger,
    events: Arc<dyn EventPublisher>,
}

impl AutoBetExecutor {
    pub fn new(store: Arc<dyn LotteryStore>, ledger: BetLedger, events: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            ledger,
            events,
        }
    }

    /// Create a plan, lock its full cost, then try the current round at once
    pub async fn create_plan(
        &self,
        user_id: UserId,
        blocks: &[i64],
        bet_amount_per_block_kyat: i64,
        total_rounds: i32,
    ) -> Result<AutoBetPlan> {
        let blocks = validate_blocks(blocks)?;
        let per_block = KyatAmount::stake(bet_amount_per_block_kyat)?;
        let per_round = per_block.checked_mul(blocks.len() as i64)?;
        let round_cap = KyatAmount::from_whole(MAX_STAKE_PER_USER_PER_ROUND_KYAT)?;
        if per_round > round_cap {
            return Err(LotteryError::InvalidPlan(format!(
                "stake per round {} exceeds {}",
                per_round, round_cap
            )));
        }
        if total_rounds < 1 {
            return Err(LotteryError::InvalidPlan(
                "a plan needs at least one round".to_string(),
            ));
        }
        let total_locked = per_round.checked_mul(total_rounds as i64)?;

        let mut tx = self.store.begin().await?;
        let mut user = tx
            .lock_user(user_id)
            .await?
            .ok_or(LotteryError::UserNotFound(user_id))?;
        if user.balance < total_locked {
            return Err(LotteryError::InsufficientBalance {
                required: total_locked,
                available: user.balance,
            });
        }
        user.debit(total_locked)?;
        tx.save_user(&user).await?;

        let now = Utc::now();
        let plan = AutoBetPlan {
            id: Uuid::new_v4(),
            user_id,
            blocks,
            bet_amount_per_block: per_block,
            rounds_remaining: total_rounds,
            total_rounds,
            total_locked_amount: total_locked,
            status: PlanStatus::Active,
            last_executed_round_id: None,
            created_at: now,
            updated_at: now,
        };
        tx.insert_plan(&plan).await?;
        tx.commit().await?;

        tracing::info!(
            plan_id = %plan.id,
            user_id,
            blocks = plan.blocks.len(),
            per_round = %per_round,
            total_rounds,
            locked = %total_locked,
            "Auto-bet plan created"
        );
        metrics::counter!("lottery_autobet_plans_created_total").increment(1);
        self.publish_balance(user_id, user.balance, user.points).await;

        if let Some(round) = self.store.find_active_round().await? {
            match self.run_plan(plan.id, round.id, FailurePolicy::KeepActive).await {
                Ok(outcome) => {
                    tracing::debug!(plan_id = %plan.id, round_id = round.id, ?outcome, "Immediate auto-bet run");
                }
                Err(e) => {
                    tracing::warn!(plan_id = %plan.id, error = %e, "Immediate auto-bet run failed");
                }
            }
        }

        self.get_plan(plan.id).await
    }

    /// Cancel an active plan and refund the escrow of the rounds not yet run
    pub async fn cancel_plan(&self, plan_id: Uuid, user_id: UserId) -> Result<CancelledPlan> {
        let mut tx = self.store.begin().await?;
        let mut plan = tx
            .lock_plan(plan_id)
            .await?
            .filter(|p| p.user_id == user_id)
            .ok_or(LotteryError::PlanNotFound(plan_id))?;
        if plan.status != PlanStatus::Active {
            return Err(LotteryError::PlanNotActive(plan_id));
        }

        let refund = plan.remaining_locked_amount()?;
        let mut user = tx
            .lock_user(user_id)
            .await?
            .ok_or(LotteryError::UserNotFound(user_id))?;
        user.credit(refund)?;
        tx.save_user(&user).await?;

        plan.status = PlanStatus::Cancelled;
        plan.updated_at = Utc::now();
        tx.update_plan(&plan).await?;
        tx.commit().await?;

        tracing::info!(
            plan_id = %plan_id,
            user_id,
            rounds_remaining = plan.rounds_remaining,
            refund = %refund,
            "Auto-bet plan cancelled"
        );
        self.publish_balance(user_id, user.balance, user.points).await;

        Ok(CancelledPlan {
            plan,
            refunded: refund,
        })
    }

    /// Periodic entry point: run every due plan once against the active round
    ///
    /// A plan whose round fails to apply is rolled back and paused. A store
    /// error in the claim or in the rollback bookkeeping (lock timeout, lost
    /// connection) moves no money; the plan is counted as `failed` and stays
    /// active. A failed claim is retried on the next batch, and a claim left
    /// `locked` is resolved by stale recovery once the round closes. Neither
    /// case stops the rest of the batch.
    pub async fn execute_auto_bets(&self) -> Result<AutoBetBatchReport> {
        let active = self.store.find_active_round().await?;
        let mut report = AutoBetBatchReport {
            round_id: active.as_ref().map(|r| r.id),
            recovered: self.recover_stale(active.as_ref().map(|r| r.id)).await?,
            ..Default::default()
        };

        let Some(round) = active else {
            tracing::debug!("No active round, skipping auto-bets");
            return Ok(report);
        };

        for plan in self.store.find_active_plans().await? {
            if !plan.is_due_for(round.id) {
                report.skipped += 1;
                continue;
            }

            match self.run_plan(plan.id, round.id, FailurePolicy::Pause).await {
                Ok(PlanRunOutcome::Executed { completed, .. }) => {
                    report.executed += 1;
                    if completed {
                        report.completed += 1;
                    }
                }
                Ok(PlanRunOutcome::Skipped) => report.skipped += 1,
                Ok(PlanRunOutcome::RolledBack { .. }) => report.paused += 1,
                Err(e) => {
                    tracing::error!(plan_id = %plan.id, error = %e, "Auto-bet plan run failed");
                    e.record();
                    report.failed += 1;
                }
            }
        }

        if report.executed + report.paused + report.failed > 0 {
            tracing::info!(
                round_id = round.id,
                executed = report.executed,
                completed = report.completed,
                paused = report.paused,
                skipped = report.skipped,
                failed = report.failed,
                "Auto-bet batch finished"
            );
        }

        Ok(report)
    }

    pub async fn user_plans(&self, user_id: UserId) -> Result<Vec<AutoBetPlan>> {
        self.store.find_user_plans(user_id).await
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> Result<AutoBetPlan> {
        self.store
            .find_plan(plan_id)
            .await?
            .ok_or(LotteryError::PlanNotFound(plan_id))
    }

    pub async fn plan_executions(&self, plan_id: Uuid) -> Result<Vec<AutoBetExecution>> {
        self.store.find_plan_executions(plan_id).await
    }

    /// Run one plan against one round through claim, apply and compensate
    pub async fn run_plan(
        &self,
        plan_id: Uuid,
        round_id: RoundId,
        policy: FailurePolicy,
    ) -> Result<PlanRunOutcome> {
        let Some(execution) = self.claim(plan_id, round_id).await? else {
            metrics::counter!("lottery_autobet_executions_total", "outcome" => "skipped").increment(1);
            return Ok(PlanRunOutcome::Skipped);
        };

        match self.apply(&execution).await {
            Ok(outcome) => {
                let label = match outcome {
                    PlanRunOutcome::Executed { .. } => "applied",
                    _ => "skipped",
                };
                metrics::counter!("lottery_autobet_executions_total", "outcome" => label).increment(1);
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(
                    plan_id = %plan_id,
                    round_id,
                    error = %e,
                    "Auto-bet round failed, rolling back"
                );
                metrics::counter!("lottery_autobet_executions_total", "outcome" => "rolled_back")
                    .increment(1);
                let paused = self.compensate(&execution, &e, policy).await?;
                Ok(PlanRunOutcome::RolledBack {
                    error: e.to_string(),
                    paused,
                })
            }
        }
    }

    /// Claim the round for the plan; `None` when there is nothing to do
    async fn claim(&self, plan_id: Uuid, round_id: RoundId) -> Result<Option<AutoBetExecution>> {
        let mut tx = self.store.begin().await?;

        let round_open = tx
            .lock_round(round_id)
            .await?
            .map(|r| r.is_active())
            .unwrap_or(false);
        if !round_open {
            return Ok(None);
        }

        let mut plan = tx
            .lock_plan(plan_id)
            .await?
            .ok_or(LotteryError::PlanNotFound(plan_id))?;
        if !plan.is_due_for(round_id) {
            return Ok(None);
        }

        let now = Utc::now();
        let execution = AutoBetExecution {
            id: Uuid::new_v4(),
            plan_id,
            round_id,
            user_id: plan.user_id,
            amount: plan.per_round_amount()?,
            state: ExecutionState::Locked,
            error: None,
            created_at: now,
            resolved_at: None,
        };

        match tx.insert_execution(&execution).await {
            Ok(()) => {}
            Err(LotteryError::Conflict(reason)) => {
                tracing::debug!(plan_id = %plan_id, round_id, reason = %reason, "Round already claimed");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        plan.last_executed_round_id = Some(round_id);
        plan.updated_at = now;
        tx.update_plan(&plan).await?;
        tx.commit().await?;

        Ok(Some(execution))
    }

    async fn apply(&self, claimed: &AutoBetExecution) -> Result<PlanRunOutcome> {
        let mut tx = self.store.begin().await?;

        let round = tx
            .lock_round(claimed.round_id)
            .await?
            .ok_or(LotteryError::RoundNotFound(claimed.round_id))?;
        if !round.is_active() {
            return Err(LotteryError::NoActiveRound);
        }

        let mut plan = tx
            .lock_plan(claimed.plan_id)
            .await?
            .ok_or(LotteryError::PlanNotFound(claimed.plan_id))?;
        if plan.status != PlanStatus::Active {
            return Err(LotteryError::PlanNotActive(plan.id));
        }
        if plan.rounds_remaining <= 0 {
            return Err(LotteryError::NoRoundsRemaining(plan.id));
        }

        let mut execution = match tx.lock_execution(claimed.id).await? {
            Some(e) if e.state == ExecutionState::Locked => e,
            _ => return Ok(PlanRunOutcome::Skipped),
        };

        let mut user = tx
            .lock_user(plan.user_id)
            .await?
            .ok_or(LotteryError::UserNotFound(plan.user_id))?;
        user.credit(execution.amount)?;
        tx.save_user(&user).await?;

        let mut placed: Vec<PlacedBet> = Vec::with_capacity(plan.blocks.len());
        for block in &plan.blocks {
            let bet = self
                .ledger
                .place_bet_in(tx.as_mut(), plan.user_id, *block, plan.bet_amount_per_block)
                .await?;
            placed.push(bet);
        }

        plan.rounds_remaining -= 1;
        let completed = plan.rounds_remaining == 0;
        if completed {
            plan.status = PlanStatus::Completed;
        }
        plan.updated_at = Utc::now();
        tx.update_plan(&plan).await?;

        execution.state = ExecutionState::Applied;
        execution.resolved_at = Some(Utc::now());
        tx.update_execution(&execution).await?;
        tx.commit().await?;

        tracing::info!(
            plan_id = %plan.id,
            round_id = execution.round_id,
            bets = placed.len(),
            amount = %execution.amount,
            rounds_remaining = plan.rounds_remaining,
            completed,
            "Auto-bet round applied"
        );

        for bet in &placed {
            self.ledger.notify(bet).await;
        }

        Ok(PlanRunOutcome::Executed {
            rounds_remaining: plan.rounds_remaining,
            completed,
        })
    }

    /// Record the rollback; returns whether the plan was paused
    async fn compensate(
        &self,
        claimed: &AutoBetExecution,
        cause: &LotteryError,
        policy: FailurePolicy,
    ) -> Result<bool> {
        let mut tx = self.store.begin().await?;

        let plan = tx.lock_plan(claimed.plan_id).await?;
        let Some(mut execution) = tx.lock_execution(claimed.id).await? else {
            return Err(LotteryError::Internal(anyhow::anyhow!(
                "execution {} disappeared",
                claimed.id
            )));
        };

        // Already resolved elsewhere (stale recovery); keep its outcome
        if !execution.state.is_terminal() {
            execution.state = ExecutionState::RolledBack;
            execution.error = Some(cause.to_string());
            execution.resolved_at = Some(Utc::now());
            tx.update_execution(&execution).await?;
        }

        let mut paused = false;
        if let Some(mut plan) = plan {
            if policy == FailurePolicy::Pause && plan.status == PlanStatus::Active {
                plan.status = PlanStatus::Paused;
                plan.updated_at = Utc::now();
                tx.update_plan(&plan).await?;
                paused = true;
            }
        }
        tx.commit().await?;

        if paused {
            tracing::warn!(
                plan_id = %claimed.plan_id,
                round_id = claimed.round_id,
                error = %cause,
                "Auto-bet plan paused"
            );
            metrics::counter!("lottery_autobet_plans_paused_total").increment(1);
        }
        Ok(paused)
    }

    /// Resolve executions left `locked` for rounds other than the current one
    async fn recover_stale(&self, current_round: Option<RoundId>) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let stale = tx.lock_stale_executions(current_round).await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        for mut execution in stale.iter().cloned() {
            execution.state = ExecutionState::RolledBack;
            execution.error = Some("abandoned before apply".to_string());
            execution.resolved_at = Some(now);
            tx.update_execution(&execution).await?;
        }
        tx.commit().await?;

        for execution in &stale {
            tracing::warn!(
                execution_id = %execution.id,
                plan_id = %execution.plan_id,
                round_id = execution.round_id,
                "Rolled back stale auto-bet execution"
            );
        }
        metrics::counter!("lottery_autobet_recovered_total").increment(stale.len() as u64);
        Ok(stale.len())
    }

    async fn publish_balance(&self, user_id: UserId, balance: KyatAmount, points: i64) {
        if let Err(e) = self.events.on_user_balance_changed(user_id, balance, points).await {
            tracing::warn!(user_id, error = %e, "Failed to publish balance event");
        }
    }
}

/// Distinct, in range, between one and `MAX_PLAN_BLOCKS` entries
fn validate_blocks(blocks: &[i64]) -> Result<Vec<BlockNumber>> {
    if blocks.is_empty() || blocks.len() > MAX_PLAN_BLOCKS {
        return Err(LotteryError::InvalidPlan(format!(
            "a plan needs between 1 and {} blocks, got {}",
            MAX_PLAN_BLOCKS,
            blocks.len()
        )));
    }

    let mut seen = BTreeSet::new();
    let mut validated = Vec::with_capacity(blocks.len());
    for raw in blocks {
        let block = BlockNumber::new(*raw)?;
        if !seen.insert(block) {
            return Err(LotteryError::InvalidPlan(format!("block {} repeated", block)));
        }
        validated.push(block);
    }
    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_blocks() {
        assert_eq!(validate_blocks(&[3, 1]).unwrap().len(), 2);
        assert!(matches!(validate_blocks(&[]), Err(LotteryError::InvalidPlan(_))));
        assert!(matches!(validate_blocks(&[2, 2]), Err(LotteryError::InvalidPlan(_))));
        assert!(matches!(validate_blocks(&[26]), Err(LotteryError::InvalidValue(_))));
        let eleven: Vec<i64> = (1..=11).collect();
        assert!(matches!(validate_blocks(&eleven), Err(LotteryError::InvalidPlan(_))));
    }
}
