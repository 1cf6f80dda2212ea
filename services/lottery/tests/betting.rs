/// Integration tests for bet placement and pool bookkeeping
mod common;

use common::{kyat, RecordedEvent, TestContext};
use futures::future::join_all;
use lottery::repository::LotteryStore;
use lottery::LotteryError;
use shared::KyatAmount;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_pool_tracks_every_bet() {
    let ctx = TestContext::new();
    ctx.add_user(1, 100_000).await;
    ctx.add_user(2, 100_000).await;
    let round = ctx.open_round().await;

    let stakes = [(1, 3, 1_000), (2, 3, 4_500), (1, 17, 12_345), (2, 25, 95_000)];
    for (user_id, block, amount) in stakes {
        assert_ok!(ctx.engine.ledger.place_bet(user_id, block, amount).await);
    }

    let round = ctx.engine.rounds.get_active_round().await.unwrap().unwrap();
    let bets = ctx.engine.ledger.round_bets(round.id).await.unwrap();
    let staked: KyatAmount = bets.iter().map(|b| b.amount).sum();

    assert_eq!(bets.len(), 4);
    assert_eq!(round.total_bets, 4);
    assert_eq!(round.total_pool, staked);
    assert_eq!(round.total_pool, kyat(112_845));
    // 10% of 112,845 KYAT is 11,284.50 KYAT, exact in minor units
    assert_eq!(round.admin_fee, KyatAmount::from_minor(1_128_450));
    assert_eq!(round.winner_pool, KyatAmount::from_minor(10_156_050));
    assert_eq!(
        round.admin_fee.as_minor() + round.winner_pool.as_minor(),
        round.total_pool.as_minor()
    );
}

#[tokio::test]
async fn test_bet_debits_balance_and_awards_points() {
    let ctx = TestContext::new();
    ctx.add_user(7, 10_000).await;
    ctx.open_round().await;

    let bet = ctx.engine.ledger.place_bet(7, 12, 3_500).await.unwrap();
    assert_eq!(bet.amount, kyat(3_500));

    let user = ctx.user(7).await;
    assert_eq!(user.balance, kyat(6_500));
    assert_eq!(user.points, 30);

    let events = ctx.events.events();
    assert_eq!(ctx.events.bets_placed(), 1);
    assert!(events.contains(&RecordedEvent::BalanceChanged {
        user_id: 7,
        balance: kyat(6_500),
        points: 30,
    }));
}

#[tokio::test]
async fn test_insufficient_balance_is_atomic() {
    let ctx = TestContext::new();
    ctx.add_user(1, 2_000).await;
    let round = ctx.open_round().await;

    assert_ok!(ctx.engine.ledger.place_bet(1, 5, 1_500).await);
    let err = assert_err!(ctx.engine.ledger.place_bet(1, 6, 1_000).await);
    assert!(matches!(err, LotteryError::InsufficientBalance { .. }));
    assert_eq!(err.to_service_error().category.as_str(), "InsufficientFunds");

    assert_eq!(ctx.balance(1).await, kyat(500));
    let bets = ctx.engine.ledger.user_round_bets(1, round.id).await.unwrap();
    assert_eq!(bets.len(), 1);
    let round = ctx.active_round().await;
    assert_eq!(round.total_pool, kyat(1_500));
    assert_eq!(ctx.events.bets_placed(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_bets_respect_round_caps() {
    let ctx = TestContext::new();
    ctx.add_user(1, 1_000_000).await;
    let round = ctx.open_round().await;

    // 20 concurrent 15,000 KYAT bets: the stake cap admits 6 of them
    let handles = (0..20).map(|i| {
        let ledger = ctx.engine.ledger.clone();
        tokio::spawn(async move { ledger.place_bet(1, 1 + (i % 25), 15_000).await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("bet task panicked"))
        .collect();

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 6);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LotteryError::RoundLimit(_))));

    let bets = ctx.engine.ledger.user_round_bets(1, round.id).await.unwrap();
    let staked: KyatAmount = bets.iter().map(|b| b.amount).sum();
    assert!(bets.len() <= 10);
    assert!(staked <= kyat(100_000));
    assert_eq!(ctx.balance(1).await, kyat(1_000_000 - 90_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_small_bets_respect_count_cap() {
    let ctx = TestContext::new();
    ctx.add_user(1, 1_000_000).await;
    let round = ctx.open_round().await;

    let handles = (0..25).map(|_| {
        let ledger = ctx.engine.ledger.clone();
        tokio::spawn(async move { ledger.place_bet(1, 9, 1_000).await })
    });
    let accepted = join_all(handles)
        .await
        .into_iter()
        .filter(|joined| matches!(joined, Ok(Ok(_))))
        .count();

    assert_eq!(accepted, 10);
    let round = ctx.engine.store.find_round(round.id).await.unwrap().unwrap();
    assert_eq!(round.total_bets, 10);
    assert_eq!(round.total_pool, kyat(10_000));
}

#[tokio::test]
async fn test_bet_lands_in_next_round_after_draw() {
    let ctx = TestContext::new();
    ctx.add_user(1, 10_000).await;
    let first = ctx.open_round().await;

    ctx.engine.rounds.draw_winner(first.id).await.unwrap();
    let bet = ctx.engine.ledger.place_bet(1, 4, 1_000).await.unwrap();

    assert_ne!(bet.round_id, first.id);
    let drawn = ctx.engine.store.find_round(first.id).await.unwrap().unwrap();
    assert_eq!(drawn.total_bets, 0);
}

#[tokio::test]
async fn test_service_error_for_rejections() {
    let ctx = TestContext::new();
    ctx.add_user(1, 10_000).await;
    ctx.open_round().await;
    ctx.settings.set_betting_paused(true);

    let err = ctx.engine.ledger.place_bet(1, 4, 1_000).await.unwrap_err();
    let service = err.to_service_error();
    assert_eq!(service.code, "STATE_BETTING_PAUSED");
    assert_eq!(service.category.as_str(), "State");

    ctx.settings.set_betting_paused(false);
    let err = ctx.engine.ledger.place_bet(99, 4, 1_000).await.unwrap_err();
    assert!(matches!(err, LotteryError::UserNotFound(99)));
}
