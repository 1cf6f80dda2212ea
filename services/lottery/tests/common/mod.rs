//! Common test utilities and fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Duration;
use lottery::domain::{BetPlacedSnapshot, Round, RoundCompletedSnapshot, UserAccount, UserId};
use lottery::events::EventPublisher;
use lottery::randomness::BlockDrawer;
use lottery::repository::{InMemoryStore, LotteryStore};
use lottery::settings::StaticSettings;
use lottery::{LotteryEngine, Result};
use shared::{BlockNumber, KyatAmount};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Event captured by [`RecordingPublisher`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    RoundCompleted(RoundCompletedSnapshot),
    BetPlaced(BetPlacedSnapshot),
    BalanceChanged {
        user_id: UserId,
        balance: KyatAmount,
        points: i64,
    },
}

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn completed_rounds(&self) -> Vec<RoundCompletedSnapshot> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::RoundCompleted(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn bets_placed(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, RecordedEvent::BetPlaced(_)))
            .count()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn on_round_completed(&self, snapshot: &RoundCompletedSnapshot) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent::RoundCompleted(snapshot.clone()));
        Ok(())
    }

    async fn on_bet_placed(&self, snapshot: &BetPlacedSnapshot) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(RecordedEvent::BetPlaced(snapshot.clone()));
        Ok(())
    }

    async fn on_user_balance_changed(
        &self,
        user_id: UserId,
        balance: KyatAmount,
        points: i64,
    ) -> Result<()> {
        self.events.lock().unwrap().push(RecordedEvent::BalanceChanged {
            user_id,
            balance,
            points,
        });
        Ok(())
    }
}

/// Drawer that always returns the configured block
pub struct FixedDrawer {
    block: AtomicU8,
}

impl FixedDrawer {
    pub fn new(block: u8) -> Self {
        Self {
            block: AtomicU8::new(block),
        }
    }

    pub fn set(&self, block: u8) {
        self.block.store(block, Ordering::SeqCst);
    }
}

impl BlockDrawer for FixedDrawer {
    fn draw(&self) -> Result<BlockNumber> {
        Ok(BlockNumber::new(self.block.load(Ordering::SeqCst) as i64)?)
    }
}

/// Test fixtures wired over an in-memory store
pub struct TestContext {
    pub store: InMemoryStore,
    pub settings: Arc<StaticSettings>,
    pub events: Arc<RecordingPublisher>,
    pub drawer: Arc<FixedDrawer>,
    pub round_duration: Duration,
    pub engine: LotteryEngine,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_round_duration(Duration::minutes(1))
    }

    /// A negative duration makes every new round immediately due
    pub fn with_round_duration(round_duration: Duration) -> Self {
        let store = InMemoryStore::new();
        let settings = Arc::new(StaticSettings::default());
        let events = Arc::new(RecordingPublisher::default());
        let drawer = Arc::new(FixedDrawer::new(25));
        let engine = LotteryEngine::new(
            Arc::new(store.clone()),
            settings.clone(),
            events.clone(),
            drawer.clone(),
            round_duration,
        );

        Self {
            store,
            settings,
            events,
            drawer,
            round_duration,
            engine,
        }
    }

    /// A second engine over the same store, as after a process restart
    pub fn restarted_engine(&self) -> LotteryEngine {
        LotteryEngine::new(
            Arc::new(self.store.clone()),
            self.settings.clone(),
            self.events.clone(),
            self.drawer.clone(),
            self.round_duration,
        )
    }

    pub async fn add_user(&self, id: UserId, balance_kyat: i64) {
        self.store
            .upsert_user(UserAccount {
                id,
                balance: kyat(balance_kyat),
                points: 0,
            })
            .await;
    }

    pub async fn user(&self, id: UserId) -> UserAccount {
        self.store
            .find_user(id)
            .await
            .expect("Failed to read user")
            .expect("User not found")
    }

    pub async fn balance(&self, id: UserId) -> KyatAmount {
        self.user(id).await.balance
    }

    pub async fn open_round(&self) -> Round {
        self.engine
            .rounds
            .create_new_round(true)
            .await
            .expect("Failed to open round")
            .expect("Round not created")
    }

    pub async fn active_round(&self) -> Round {
        self.engine
            .rounds
            .get_active_round()
            .await
            .expect("Failed to read active round")
            .expect("No active round")
    }
}

pub fn kyat(whole: i64) -> KyatAmount {
    KyatAmount::from_whole(whole).expect("Invalid KYAT amount")
}
