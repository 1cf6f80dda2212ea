//! Postgres-backed LotteryStore implementation
//!
//! Row locks are `SELECT ... FOR UPDATE`. Every transaction sets a local
//! `lock_timeout` so contention surfaces as a retryable `Conflict` instead of
//! an unbounded wait.

mod rows;

use async_trait::async_trait;
use chrono::Utc;
use shared::KyatAmount;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{
    AutoBetExecution, AutoBetPlan, Bet, NewBet, NewRound, Round, RoundId, UserAccount, UserId,
};
use crate::errors::{LotteryError, Result};
use crate::repository::status::{execution_state_to_str, plan_status_to_str, round_status_to_str};

use super::store::{LotteryStore, LotteryTx};
use rows::{convert_all, BetRow, ExecutionRow, PlanRow, RoundRow, UserRow};

const LOCK_TIMEOUT: &str = "SET LOCAL lock_timeout = '5s'";

const ROUND_COLUMNS: &str = "id, round_number, status, winning_block, total_pool, admin_fee, \
     winner_pool, total_bets, draw_time, drawn_at, created_at";

const BET_COLUMNS: &str =
    "id, user_id, round_id, block_number, amount, payout, is_winner, created_at";

const PLAN_COLUMNS: &str = "id, user_id, blocks, bet_amount_per_block, rounds_remaining, \
     total_rounds, total_locked_amount, status, last_executed_round_id, created_at, updated_at";

const EXECUTION_COLUMNS: &str =
    "id, plan_id, round_id, user_id, amount, state, error, created_at, resolved_at";

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| LotteryError::Internal(anyhow::anyhow!("Migration failed: {}", e)))?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LotteryStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn LotteryTx>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(LOCK_TIMEOUT).execute(&mut *tx).await?;
        Ok(Box::new(PgLotteryTx { tx }))
    }

    async fn find_active_round(&self) -> Result<Option<Round>> {
        let row = sqlx::query_as::<_, RoundRow>(&format!(
            "SELECT {} FROM rounds WHERE status = 'active'",
            ROUND_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Round::try_from).transpose()
    }

    async fn find_round(&self, round_id: RoundId) -> Result<Option<Round>> {
        let row = sqlx::query_as::<_, RoundRow>(&format!(
            "SELECT {} FROM rounds WHERE id = $1",
            ROUND_COLUMNS
        ))
        .bind(round_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Round::try_from).transpose()
    }

    async fn find_recent_rounds(&self, limit: i64) -> Result<Vec<Round>> {
        let rows = sqlx::query_as::<_, RoundRow>(&format!(
            "SELECT {} FROM rounds WHERE status = 'completed' ORDER BY round_number DESC LIMIT $1",
            ROUND_COLUMNS
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn find_round_bets(&self, round_id: RoundId) -> Result<Vec<Bet>> {
        let rows = sqlx::query_as::<_, BetRow>(&format!(
            "SELECT {} FROM bets WHERE round_id = $1 ORDER BY created_at, id",
            BET_COLUMNS
        ))
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn find_user_round_bets(&self, user_id: UserId, round_id: RoundId) -> Result<Vec<Bet>> {
        let rows = sqlx::query_as::<_, BetRow>(&format!(
            "SELECT {} FROM bets WHERE round_id = $1 AND user_id = $2 ORDER BY created_at, id",
            BET_COLUMNS
        ))
        .bind(round_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<UserAccount>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT id, balance, points FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(UserAccount::from))
    }

    async fn find_plan(&self, plan_id: Uuid) -> Result<Option<AutoBetPlan>> {
        let row = sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {} FROM autobet_plans WHERE id = $1",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AutoBetPlan::try_from).transpose()
    }

    async fn find_active_plans(&self) -> Result<Vec<AutoBetPlan>> {
        let rows = sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {} FROM autobet_plans WHERE status = 'active' ORDER BY created_at, id",
            PLAN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn find_user_plans(&self, user_id: UserId) -> Result<Vec<AutoBetPlan>> {
        let rows = sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {} FROM autobet_plans WHERE user_id = $1 ORDER BY created_at DESC",
            PLAN_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn find_plan_executions(&self, plan_id: Uuid) -> Result<Vec<AutoBetExecution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM autobet_executions WHERE plan_id = $1 ORDER BY created_at",
            EXECUTION_COLUMNS
        ))
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgLotteryTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LotteryTx for PgLotteryTx {
    async fn lock_active_round(&mut self) -> Result<Option<Round>> {
        let row = sqlx::query_as::<_, RoundRow>(&format!(
            "SELECT {} FROM rounds WHERE status = 'active' FOR UPDATE",
            ROUND_COLUMNS
        ))
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Round::try_from).transpose()
    }

    async fn lock_round(&mut self, round_id: RoundId) -> Result<Option<Round>> {
        let row = sqlx::query_as::<_, RoundRow>(&format!(
            "SELECT {} FROM rounds WHERE id = $1 FOR UPDATE",
            ROUND_COLUMNS
        ))
        .bind(round_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Round::try_from).transpose()
    }

    async fn last_round_number(&mut self) -> Result<Option<i64>> {
        let last: Option<i64> = sqlx::query_scalar("SELECT MAX(round_number) FROM rounds")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(last)
    }

    async fn insert_round(&mut self, round: NewRound) -> Result<Round> {
        let row = sqlx::query_as::<_, RoundRow>(&format!(
            "INSERT INTO rounds (round_number, status, draw_time) VALUES ($1, $2, $3) RETURNING {}",
            ROUND_COLUMNS
        ))
        .bind(round.round_number)
        .bind(round_status_to_str(round.status))
        .bind(round.draw_time)
        .fetch_one(&mut *self.tx)
        .await?;

        Round::try_from(row)
    }

    async fn update_round(&mut self, round: &Round) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE rounds
            SET status = $2, winning_block = $3, total_pool = $4, admin_fee = $5,
                winner_pool = $6, total_bets = $7, draw_time = $8, drawn_at = $9
            WHERE id = $1
            "#,
        )
        .bind(round.id)
        .bind(round_status_to_str(round.status))
        .bind(round.winning_block.map(|b| b.get() as i16))
        .bind(round.total_pool.as_minor())
        .bind(round.admin_fee.as_minor())
        .bind(round.winner_pool.as_minor())
        .bind(round.total_bets)
        .bind(round.draw_time)
        .bind(round.drawn_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LotteryError::RoundNotFound(round.id));
        }
        Ok(())
    }

    async fn round_bets(&mut self, round_id: RoundId) -> Result<Vec<Bet>> {
        let rows = sqlx::query_as::<_, BetRow>(&format!(
            "SELECT {} FROM bets WHERE round_id = $1 ORDER BY created_at, id",
            BET_COLUMNS
        ))
        .bind(round_id)
        .fetch_all(&mut *self.tx)
        .await?;

        convert_all(rows)
    }

    async fn user_round_exposure(
        &mut self,
        user_id: UserId,
        round_id: RoundId,
    ) -> Result<(i64, KyatAmount)> {
        let (count, total): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(amount), 0)::BIGINT
            FROM bets
            WHERE round_id = $1 AND user_id = $2
            "#,
        )
        .bind(round_id)
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok((count, KyatAmount::from_minor(total)))
    }

    async fn insert_bet(&mut self, bet: NewBet) -> Result<Bet> {
        let row = sqlx::query_as::<_, BetRow>(&format!(
            r#"
            INSERT INTO bets (id, user_id, round_id, block_number, amount, is_winner, created_at)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6)
            RETURNING {}
            "#,
            BET_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(bet.user_id)
        .bind(bet.round_id)
        .bind(bet.block_number.get() as i16)
        .bind(bet.amount.as_minor())
        .bind(Utc::now())
        .fetch_one(&mut *self.tx)
        .await?;

        Bet::try_from(row)
    }

    async fn settle_bet(&mut self, bet_id: Uuid, payout: KyatAmount, is_winner: bool) -> Result<()> {
        let result = sqlx::query("UPDATE bets SET payout = $2, is_winner = $3 WHERE id = $1")
            .bind(bet_id)
            .bind(payout.as_minor())
            .bind(is_winner)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LotteryError::BetNotFound(bet_id));
        }
        Ok(())
    }

    async fn lock_user(&mut self, user_id: UserId) -> Result<Option<UserAccount>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, balance, points FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(UserAccount::from))
    }

    async fn save_user(&mut self, user: &UserAccount) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET balance = $2, points = $3, updated_at = now() WHERE id = $1",
        )
        .bind(user.id)
        .bind(user.balance.as_minor())
        .bind(user.points)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LotteryError::UserNotFound(user.id));
        }
        Ok(())
    }

    async fn insert_plan(&mut self, plan: &AutoBetPlan) -> Result<()> {
        let blocks: Vec<i16> = plan.blocks.iter().map(|b| b.get() as i16).collect();

        sqlx::query(
            r#"
            INSERT INTO autobet_plans (
                id, user_id, blocks, bet_amount_per_block, rounds_remaining, total_rounds,
                total_locked_amount, status, last_executed_round_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(plan.id)
        .bind(plan.user_id)
        .bind(blocks)
        .bind(plan.bet_amount_per_block.as_minor())
        .bind(plan.rounds_remaining)
        .bind(plan.total_rounds)
        .bind(plan.total_locked_amount.as_minor())
        .bind(plan_status_to_str(plan.status))
        .bind(plan.last_executed_round_id)
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_plan(&mut self, plan_id: Uuid) -> Result<Option<AutoBetPlan>> {
        let row = sqlx::query_as::<_, PlanRow>(&format!(
            "SELECT {} FROM autobet_plans WHERE id = $1 FOR UPDATE",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(AutoBetPlan::try_from).transpose()
    }

    async fn update_plan(&mut self, plan: &AutoBetPlan) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE autobet_plans
            SET rounds_remaining = $2, status = $3, last_executed_round_id = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(plan.id)
        .bind(plan.rounds_remaining)
        .bind(plan_status_to_str(plan.status))
        .bind(plan.last_executed_round_id)
        .bind(plan.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LotteryError::PlanNotFound(plan.id));
        }
        Ok(())
    }

    async fn insert_execution(&mut self, execution: &AutoBetExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO autobet_executions (
                id, plan_id, round_id, user_id, amount, state, error, created_at, resolved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(execution.id)
        .bind(execution.plan_id)
        .bind(execution.round_id)
        .bind(execution.user_id)
        .bind(execution.amount.as_minor())
        .bind(execution_state_to_str(execution.state))
        .bind(&execution.error)
        .bind(execution.created_at)
        .bind(execution.resolved_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn lock_execution(&mut self, execution_id: Uuid) -> Result<Option<AutoBetExecution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM autobet_executions WHERE id = $1 FOR UPDATE",
            EXECUTION_COLUMNS
        ))
        .bind(execution_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(AutoBetExecution::try_from).transpose()
    }

    async fn lock_stale_executions(
        &mut self,
        current_round: Option<RoundId>,
    ) -> Result<Vec<AutoBetExecution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            r#"
            SELECT {} FROM autobet_executions
            WHERE state = 'locked' AND ($1::BIGINT IS NULL OR round_id <> $1)
            ORDER BY created_at
            FOR UPDATE SKIP LOCKED
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(current_round)
        .fetch_all(&mut *self.tx)
        .await?;

        convert_all(rows)
    }

    async fn update_execution(&mut self, execution: &AutoBetExecution) -> Result<()> {
        sqlx::query(
            "UPDATE autobet_executions SET state = $2, error = $3, resolved_at = $4 WHERE id = $1",
        )
        .bind(execution.id)
        .bind(execution_state_to_str(execution.state))
        .bind(&execution.error)
        .bind(execution.resolved_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
