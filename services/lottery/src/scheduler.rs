//! Periodic triggers for the draw check and the auto-bet batch
//!
//! Both loops may overlap with each other and with loops in other processes;
//! the operations they call are idempotent.

use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::engine::LotteryEngine;
use crate::services::LotteryTick;

pub struct Scheduler {
    engine: Arc<LotteryEngine>,
    lottery_tick: Duration,
    autobet_tick: Duration,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(engine: Arc<LotteryEngine>, lottery_tick: Duration, autobet_tick: Duration) -> Self {
        Self {
            engine,
            lottery_tick,
            autobet_tick,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Spawn both loops; they run until [`Scheduler::stop`]
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        *self.running.write().await = true;

        tracing::info!(
            lottery_tick_seconds = self.lottery_tick.as_secs(),
            autobet_tick_seconds = self.autobet_tick.as_secs(),
            "Scheduler starting"
        );

        vec![
            tokio::spawn(lottery_loop(
                self.engine.clone(),
                self.lottery_tick,
                self.running.clone(),
            )),
            tokio::spawn(autobet_loop(
                self.engine.clone(),
                self.autobet_tick,
                self.running.clone(),
            )),
        ]
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        tracing::info!("Stopping scheduler");
    }
}

async fn lottery_loop(engine: Arc<LotteryEngine>, period: Duration, running: Arc<RwLock<bool>>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !*running.read().await {
            break;
        }

        match engine.rounds.run_lottery().await {
            Ok(LotteryTick::Drawn(round)) => {
                tracing::info!(round_number = round.round_number, "Lottery tick drew a round");
            }
            Ok(LotteryTick::Created(round)) => {
                tracing::info!(round_number = round.round_number, "Lottery tick opened a round");
            }
            Ok(LotteryTick::Waiting(_)) | Ok(LotteryTick::Idle) => {}
            Err(e) => {
                tracing::error!(error = %e, retryable = e.is_retryable(), "Lottery tick failed");
                e.record();
                metrics::counter!("lottery_tick_errors_total", "loop" => "lottery").increment(1);
            }
        }
    }

    tracing::info!("Lottery loop stopped");
}

async fn autobet_loop(engine: Arc<LotteryEngine>, period: Duration, running: Arc<RwLock<bool>>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !*running.read().await {
            break;
        }

        if let Err(e) = engine.autobet.execute_auto_bets().await {
            tracing::error!(error = %e, "Auto-bet tick failed");
            e.record();
            metrics::counter!("lottery_tick_errors_total", "loop" => "autobet").increment(1);
        }
    }

    tracing::info!("Auto-bet loop stopped");
}
