/// Type-safe wrappers for lottery domain primitives
///
/// These types enforce validation at construction time and provide checked
/// arithmetic so balances and pools can never silently overflow.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Block number out of range: {block} (min: {min}, max: {max})")]
    BlockOutOfRange { block: i64, min: u8, max: u8 },

    #[error("Bet amount out of range: {amount} KYAT (min: {min}, max: {max})")]
    BetAmountOutOfRange { amount: i64, min: i64, max: i64 },

    #[error("Amount overflow in operation")]
    AmountOverflow,

    #[error("Amount must not be negative: {0}")]
    NegativeAmount(i64),
}

/// Numbered bettable target, always within `MIN_BLOCK..=MAX_BLOCK`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct BlockNumber(u8);

impl BlockNumber {
    pub fn new(block: i64) -> Result<Self, ValidationError> {
        if block < MIN_BLOCK as i64 || block > MAX_BLOCK as i64 {
            return Err(ValidationError::BlockOutOfRange {
                block,
                min: MIN_BLOCK,
                max: MAX_BLOCK,
            });
        }
        Ok(Self(block as u8))
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// Every valid block, in ascending order
    pub fn all() -> impl Iterator<Item = BlockNumber> {
        (MIN_BLOCK..=MAX_BLOCK).map(BlockNumber)
    }
}

impl TryFrom<i64> for BlockNumber {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BlockNumber> for i64 {
    fn from(block: BlockNumber) -> Self {
        block.0 as i64
    }
}

impl std::fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// KYAT amount held as an integer count of minor units
///
/// Provides checked arithmetic operations to prevent overflow and
/// accidental negative balances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KyatAmount(i64);

impl KyatAmount {
    pub const ZERO: KyatAmount = KyatAmount(0);

    /// Wrap a raw minor-unit value
    pub fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Convert whole KYAT into minor units
    pub fn from_whole(kyat: i64) -> Result<Self, ValidationError> {
        kyat.checked_mul(MINOR_UNITS_PER_KYAT)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    /// Validate a single-bet stake given in whole KYAT
    pub fn stake(kyat: i64) -> Result<Self, ValidationError> {
        if !(MIN_BET_KYAT..=MAX_BET_KYAT).contains(&kyat) {
            return Err(ValidationError::BetAmountOutOfRange {
                amount: kyat,
                min: MIN_BET_KYAT,
                max: MAX_BET_KYAT,
            });
        }
        Self::from_whole(kyat)
    }

    /// Get the raw minor-unit value
    pub fn as_minor(&self) -> i64 {
        self.0
    }

    /// Whole KYAT, truncating any minor units
    pub fn whole_kyat(&self) -> i64 {
        self.0 / MINOR_UNITS_PER_KYAT
    }

    /// Convert to KYAT (as f64), for display and event payloads only
    pub fn to_kyat(&self) -> f64 {
        self.0 as f64 / MINOR_UNITS_PER_KYAT as f64
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Checked addition
    pub fn checked_add(&self, other: KyatAmount) -> Result<Self, ValidationError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    /// Checked subtraction
    pub fn checked_sub(&self, other: KyatAmount) -> Result<Self, ValidationError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    /// Checked multiplication
    pub fn checked_mul(&self, multiplier: i64) -> Result<Self, ValidationError> {
        self.0
            .checked_mul(multiplier)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    /// `self * numerator / denominator`, rounded down, using a 128-bit intermediate
    pub fn mul_div_floor(&self, numerator: i64, denominator: i64) -> Result<Self, ValidationError> {
        if denominator == 0 {
            return Err(ValidationError::AmountOverflow);
        }
        let scaled = (self.0 as i128) * (numerator as i128) / (denominator as i128);
        i64::try_from(scaled)
            .map(Self)
            .map_err(|_| ValidationError::AmountOverflow)
    }

    /// House share of a pool
    pub fn admin_fee_share(&self) -> Self {
        Self(self.0 * ADMIN_FEE_PERCENT / 100)
    }

    /// Distributable share of a pool; together with the fee it always sums to the pool
    pub fn winner_pool_share(&self) -> Self {
        Self(self.0 - self.admin_fee_share().0)
    }
}

impl std::iter::Sum for KyatAmount {
    fn sum<I: Iterator<Item = KyatAmount>>(iter: I) -> Self {
        Self(iter.map(|a| a.0).sum())
    }
}

impl std::fmt::Display for KyatAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let unit = MINOR_UNITS_PER_KYAT as u64;
        write!(f, "{}{}.{:02} KYAT", sign, abs / unit, abs % unit)
    }
}

/// Loyalty points earned for a stake: 10 points per full 1,000 KYAT
pub fn points_for_stake(stake: KyatAmount) -> i64 {
    (stake.whole_kyat() / POINTS_STEP_KYAT) * POINTS_PER_STEP
}
