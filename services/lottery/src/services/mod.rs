pub mod autobet;
pub mod bets;
pub mod payout;
pub mod rounds;

pub use autobet::{AutoBetBatchReport, AutoBetExecutor, CancelledPlan, FailurePolicy, PlanRunOutcome};
pub use bets::{BetLedger, PlacedBet};
pub use payout::{allocate_proportional, PayoutCalculator, RoundSettlement};
pub use rounds::{LotteryTick, RoundManager};
