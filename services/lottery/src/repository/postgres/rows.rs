//! Row types and their conversion into domain objects
//!
//! Money columns are BIGINT minor units, statuses are TEXT, blocks SMALLINT.

use chrono::{DateTime, Utc};
use shared::{BlockNumber, KyatAmount};
use uuid::Uuid;

use crate::domain::{AutoBetExecution, AutoBetPlan, Bet, Round, UserAccount};
use crate::errors::{LotteryError, Result};
use crate::repository::status::{
    execution_state_from_str, plan_status_from_str, round_status_from_str,
};

fn corrupt(what: &str, id: impl std::fmt::Display, detail: impl std::fmt::Display) -> LotteryError {
    LotteryError::Internal(anyhow::anyhow!("Invalid {} for {}: {}", what, id, detail))
}

fn block(value: i16, id: impl std::fmt::Display) -> Result<BlockNumber> {
    BlockNumber::new(value as i64).map_err(|e| corrupt("block_number", id, e))
}

#[derive(Debug, sqlx::FromRow)]
pub struct RoundRow {
    pub id: i64,
    pub round_number: i64,
    pub status: String,
    pub winning_block: Option<i16>,
    pub total_pool: i64,
    pub admin_fee: i64,
    pub winner_pool: i64,
    pub total_bets: i64,
    pub draw_time: DateTime<Utc>,
    pub drawn_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RoundRow> for Round {
    type Error = LotteryError;

    fn try_from(row: RoundRow) -> Result<Self> {
        let status = round_status_from_str(&row.status)
            .ok_or_else(|| corrupt("status", format!("round {}", row.id), &row.status))?;
        let winning_block = row
            .winning_block
            .map(|b| block(b, format!("round {}", row.id)))
            .transpose()?;

        Ok(Round {
            id: row.id,
            round_number: row.round_number,
            status,
            winning_block,
            total_pool: KyatAmount::from_minor(row.total_pool),
            admin_fee: KyatAmount::from_minor(row.admin_fee),
            winner_pool: KyatAmount::from_minor(row.winner_pool),
            total_bets: row.total_bets,
            draw_time: row.draw_time,
            drawn_at: row.drawn_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct BetRow {
    pub id: Uuid,
    pub user_id: i64,
    pub round_id: i64,
    pub block_number: i16,
    pub amount: i64,
    pub payout: Option<i64>,
    pub is_winner: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<BetRow> for Bet {
    type Error = LotteryError;

    fn try_from(row: BetRow) -> Result<Self> {
        Ok(Bet {
            id: row.id,
            user_id: row.user_id,
            round_id: row.round_id,
            block_number: block(row.block_number, format!("bet {}", row.id))?,
            amount: KyatAmount::from_minor(row.amount),
            payout: row.payout.map(KyatAmount::from_minor),
            is_winner: row.is_winner,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub balance: i64,
    pub points: i64,
}

impl From<UserRow> for UserAccount {
    fn from(row: UserRow) -> Self {
        UserAccount {
            id: row.id,
            balance: KyatAmount::from_minor(row.balance),
            points: row.points,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PlanRow {
    pub id: Uuid,
    pub user_id: i64,
    pub blocks: Vec<i16>,
    pub bet_amount_per_block: i64,
    pub rounds_remaining: i32,
    pub total_rounds: i32,
    pub total_locked_amount: i64,
    pub status: String,
    pub last_executed_round_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PlanRow> for AutoBetPlan {
    type Error = LotteryError;

    fn try_from(row: PlanRow) -> Result<Self> {
        let status = plan_status_from_str(&row.status)
            .ok_or_else(|| corrupt("status", format!("plan {}", row.id), &row.status))?;
        let blocks = row
            .blocks
            .iter()
            .map(|b| block(*b, format!("plan {}", row.id)))
            .collect::<Result<Vec<_>>>()?;

        Ok(AutoBetPlan {
            id: row.id,
            user_id: row.user_id,
            blocks,
            bet_amount_per_block: KyatAmount::from_minor(row.bet_amount_per_block),
            rounds_remaining: row.rounds_remaining,
            total_rounds: row.total_rounds,
            total_locked_amount: KyatAmount::from_minor(row.total_locked_amount),
            status,
            last_executed_round_id: row.last_executed_round_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ExecutionRow {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub round_id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub state: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExecutionRow> for AutoBetExecution {
    type Error = LotteryError;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        let state = execution_state_from_str(&row.state)
            .ok_or_else(|| corrupt("state", format!("execution {}", row.id), &row.state))?;

        Ok(AutoBetExecution {
            id: row.id,
            plan_id: row.plan_id,
            round_id: row.round_id,
            user_id: row.user_id,
            amount: KyatAmount::from_minor(row.amount),
            state,
            error: row.error,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

/// Convert a batch of rows, failing on the first corrupt one
pub fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = LotteryError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RoundStatus;

    fn round_row(status: &str, winning_block: Option<i16>) -> RoundRow {
        RoundRow {
            id: 9,
            round_number: 42,
            status: status.to_string(),
            winning_block,
            total_pool: 1_000_000,
            admin_fee: 100_000,
            winner_pool: 900_000,
            total_bets: 3,
            draw_time: Utc::now(),
            drawn_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_round_row_conversion() {
        let round = Round::try_from(round_row("completed", Some(7))).unwrap();
        assert_eq!(round.status, RoundStatus::Completed);
        assert_eq!(round.winning_block, Some(BlockNumber::new(7).unwrap()));
        assert_eq!(round.winner_pool, KyatAmount::from_minor(900_000));
    }

    #[test]
    fn test_corrupt_rows_are_rejected() {
        assert!(Round::try_from(round_row("drawn", None)).is_err());
        assert!(Round::try_from(round_row("active", Some(26))).is_err());
    }
}
