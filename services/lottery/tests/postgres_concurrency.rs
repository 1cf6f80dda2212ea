/// Contention tests against a real Postgres store
///
/// Run with `DATABASE_URL=... cargo test -- --ignored`. The one-active-round
/// index and round numbers are global, so tests in this file hold `DATABASE`
/// for their whole run and never overlap.
mod common;

use chrono::Duration;
use common::{kyat, FixedDrawer, RecordingPublisher};
use futures::future::join_all;
use lottery::domain::{ExecutionState, UserId};
use lottery::repository::{LotteryStore, PostgresStore};
use lottery::settings::StaticSettings;
use lottery::{LotteryEngine, LotteryError};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

static DATABASE: Mutex<()> = Mutex::const_new(());

struct PgContext {
    store: Arc<PostgresStore>,
    events: Arc<RecordingPublisher>,
    engine: Arc<LotteryEngine>,
}

impl PgContext {
    async fn new(round_duration: Duration, users: &[(UserId, i64)]) -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/lottery_test".to_string());
        let store = Arc::new(
            PostgresStore::connect(&database_url, 10)
                .await
                .expect("Failed to connect to test database"),
        );

        for table in ["autobet_executions", "autobet_plans", "bets", "rounds"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(store.pool())
                .await
                .expect("Failed to clear table");
        }
        for (id, balance_kyat) in users {
            sqlx::query(
                "INSERT INTO users (id, balance, points) VALUES ($1, $2, 0)
                 ON CONFLICT (id) DO UPDATE SET balance = EXCLUDED.balance, points = 0",
            )
            .bind(id)
            .bind(kyat(*balance_kyat).as_minor())
            .execute(store.pool())
            .await
            .expect("Failed to seed user");
        }

        let events = Arc::new(RecordingPublisher::default());
        let engine = Arc::new(LotteryEngine::new(
            store.clone(),
            Arc::new(StaticSettings::default()),
            events.clone(),
            Arc::new(FixedDrawer::new(25)),
            round_duration,
        ));

        Self {
            store,
            events,
            engine,
        }
    }

    async fn balance(&self, id: UserId) -> shared::KyatAmount {
        self.store
            .find_user(id)
            .await
            .expect("Failed to read user")
            .expect("User not found")
            .balance
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires DATABASE_URL"]
async fn test_parallel_bets_respect_round_caps_under_row_locks() {
    let _serial = DATABASE.lock().await;
    let ctx = PgContext::new(Duration::minutes(5), &[(9101, 1_000_000)]).await;
    let round = ctx
        .engine
        .rounds
        .create_new_round(true)
        .await
        .unwrap()
        .unwrap();

    let handles = (0..20).map(|i| {
        let engine = ctx.engine.clone();
        tokio::spawn(async move { engine.ledger.place_bet(9101, 1 + (i % 25), 15_000).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("bet task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 6);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LotteryError::RoundLimit(_))));

    let stored = ctx.store.find_round(round.id).await.unwrap().unwrap();
    assert_eq!(stored.total_bets, 6);
    assert_eq!(stored.total_pool, kyat(90_000));
    assert_eq!(ctx.store.find_round_bets(round.id).await.unwrap().len(), 6);
    assert_eq!(ctx.balance(9101).await, kyat(1_000_000 - 90_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires DATABASE_URL"]
async fn test_overlapping_ticks_draw_each_round_once() {
    let _serial = DATABASE.lock().await;
    // Every round is due as soon as it opens
    let ctx = PgContext::new(Duration::seconds(-1), &[(9201, 10_000)]).await;
    let first = ctx
        .engine
        .rounds
        .create_new_round(true)
        .await
        .unwrap()
        .unwrap();
    ctx.engine.ledger.place_bet(9201, 25, 1_000).await.unwrap();

    let ticks = (0..8).map(|_| {
        let engine = ctx.engine.clone();
        tokio::spawn(async move { engine.rounds.run_lottery().await })
    });
    for joined in join_all(ticks).await {
        joined.expect("tick panicked").expect("tick failed");
    }

    let completed = ctx.events.completed_rounds();
    let distinct: HashSet<_> = completed.iter().map(|s| s.round.round_id).collect();
    assert_eq!(distinct.len(), completed.len());

    let rounds: Vec<(i64, String)> =
        sqlx::query_as("SELECT round_number, status FROM rounds ORDER BY round_number")
            .fetch_all(ctx.store.pool())
            .await
            .unwrap();
    let numbers: Vec<i64> = rounds.iter().map(|(n, _)| *n).collect();
    assert_eq!(numbers, (1..=rounds.len() as i64).collect::<Vec<_>>());
    assert_eq!(rounds.iter().filter(|(_, s)| s == "active").count(), 1);
    assert_eq!(rounds.last().map(|(_, s)| s.as_str()), Some("active"));

    let winners = ctx.engine.ledger.winning_bets(first.id).await.unwrap();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].payout, Some(kyat(900)));
    assert_eq!(ctx.balance(9201).await, kyat(9_900));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_batches_run_plan_once_per_round() {
    let _serial = DATABASE.lock().await;
    let ctx = PgContext::new(Duration::minutes(5), &[(9301, 50_000)]).await;

    // No round yet, so creation does not run the plan
    let plan = ctx
        .engine
        .autobet
        .create_plan(9301, &[3, 7], 1_000, 3)
        .await
        .unwrap();
    let round = ctx
        .engine
        .rounds
        .create_new_round(true)
        .await
        .unwrap()
        .unwrap();

    let batches = (0..6).map(|_| {
        let engine = ctx.engine.clone();
        tokio::spawn(async move { engine.autobet.execute_auto_bets().await })
    });
    let reports: Vec<_> = join_all(batches)
        .await
        .into_iter()
        .map(|joined| joined.expect("batch panicked").expect("batch failed"))
        .collect();

    assert_eq!(reports.iter().map(|r| r.executed).sum::<usize>(), 1);
    assert_eq!(reports.iter().map(|r| r.skipped).sum::<usize>(), 5);
    assert_eq!(reports.iter().map(|r| r.failed + r.paused).sum::<usize>(), 0);

    let plan = ctx.engine.autobet.get_plan(plan.id).await.unwrap();
    assert_eq!(plan.rounds_remaining, 2);
    assert_eq!(plan.last_executed_round_id, Some(round.id));

    let executions = ctx.engine.autobet.plan_executions(plan.id).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].state, ExecutionState::Applied);

    let bets = ctx.engine.ledger.user_round_bets(9301, round.id).await.unwrap();
    assert_eq!(bets.len(), 2);
    assert_eq!(ctx.balance(9301).await, kyat(50_000 - 6_000));
}
