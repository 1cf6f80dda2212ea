/// Shared constants for the KYAT block lottery
///
/// This module centralizes all magic numbers so that the bet ledger, the
/// draw step and the auto-bet executor agree on limits and pool splits.

/// Minor units per whole KYAT
///
/// All balances and pool figures are stored in minor units so that the
/// 10% / 90% pool split of whole-KYAT stakes is exact.
pub const MINOR_UNITS_PER_KYAT: i64 = 100;

/// Lowest numbered block a bet can target
pub const MIN_BLOCK: u8 = 1;

/// Highest numbered block a bet can target
pub const MAX_BLOCK: u8 = 25;

/// Minimum stake for a single bet, in whole KYAT
pub const MIN_BET_KYAT: i64 = 1_000;

/// Maximum stake for a single bet, in whole KYAT
pub const MAX_BET_KYAT: i64 = 100_000;

/// Maximum number of bets one user may place in a single round
pub const MAX_BETS_PER_USER_PER_ROUND: i64 = 10;

/// Maximum total stake one user may place in a single round, in whole KYAT
pub const MAX_STAKE_PER_USER_PER_ROUND_KYAT: i64 = 100_000;

/// Share of every pool retained by the house, in percent
pub const ADMIN_FEE_PERCENT: i64 = 10;

/// Share of every pool distributed to winners (or refunded), in percent
pub const WINNER_POOL_PERCENT: i64 = 100 - ADMIN_FEE_PERCENT;

/// Loyalty points granted per full stake step
pub const POINTS_PER_STEP: i64 = 10;

/// Stake step (whole KYAT) that earns `POINTS_PER_STEP` points
pub const POINTS_STEP_KYAT: i64 = 1_000;

/// Maximum number of distinct blocks in one auto-bet plan
pub const MAX_PLAN_BLOCKS: usize = 10;

/// Round duration used in production deployments
pub const PRODUCTION_ROUND_MINUTES: i64 = 60;

/// Round duration used in development and test deployments
pub const DEV_ROUND_MINUTES: i64 = 1;
