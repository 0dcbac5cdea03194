//! End-to-end batch scenarios over the in-memory ledger

use comp_model::{usd, PackageType, Rank, User, UserId};
use std::sync::Arc;
use tmc_engine::{
    BatchKind, Engine, EngineError, InvestmentFilter, Ledger, MemoryLedger, Promotion,
};
use tmc_integration_tests::{address, seed, test_config, FlakyLedger};

const DAY: u64 = 86_400;
const MONTH: u64 = 30 * DAY;

async fn balance(ledger: &dyn Ledger, id: u64) -> u128 {
    ledger.get_user(UserId(id)).await.unwrap().balance
}

#[tokio::test]
async fn test_daily_run_is_idempotent_per_period() {
    let ledger = Arc::new(FlakyLedger::new());
    seed(&*ledger, &[(1, None), (2, Some(1))]).await;
    let engine = Engine::new(test_config(), ledger.clone());
    engine
        .on_new_investment(UserId(2), "1000", "principal", 0)
        .await
        .unwrap();

    let summary = engine.run_daily_accrual(DAY).await.unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.total_accrued, usd(6));
    let after_first = ledger.list_users().await.unwrap();

    let again = engine.run_daily_accrual(DAY + 3_600).await;
    assert!(matches!(
        again,
        Err(EngineError::AlreadyRan { kind: BatchKind::DailyAccrual, period: 1 })
    ));
    assert_eq!(ledger.list_users().await.unwrap(), after_first);
}

#[tokio::test]
async fn test_tax_applies_when_wallet_crosses_threshold() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&*ledger, &[(1, None)]).await;
    let engine = Engine::new(test_config(), ledger.clone());
    engine
        .on_new_investment(UserId(1), "1000", "principal", 0)
        .await
        .unwrap();

    let mut user = ledger.get_user(UserId(1)).await.unwrap();
    user.balance = usd(19_995);
    ledger.save_user(user).await.unwrap();

    engine.run_daily_accrual(DAY).await.unwrap();
    // $6 return pushes the wallet past $20,000: 75% of it is kept
    assert_eq!(balance(&*ledger, 1).await, usd(19_995) + 4_500_000);
}

#[tokio::test]
async fn test_plus_legs_promote_to_pro_and_reward_once() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&*ledger, &[(1, None)]).await;
    for id in 2..=13 {
        seed(&*ledger, &[(id, Some(1))]).await;
        let mut leg = ledger.get_user(UserId(id)).await.unwrap();
        leg.rank = Rank::TmcPlus;
        ledger.save_user(leg).await.unwrap();
    }
    let mut root = ledger.get_user(UserId(1)).await.unwrap();
    root.rank = Rank::TmcPlus;
    root.first_investment = Some(0);
    root.rewards.entry_paid[Rank::TmcPlus.index()] = true;
    root.rewards.entered_at[Rank::TmcPlus.index()] = Some(0);
    ledger.save_user(root).await.unwrap();

    let engine = Engine::new(test_config(), ledger.clone());
    let summary = engine.run_daily_accrual(DAY).await.unwrap();
    assert_eq!(
        summary.promotions,
        vec![Promotion {
            user: UserId(1),
            from: Rank::TmcPlus,
            to: Rank::TmcPro,
        }]
    );
    assert_eq!(summary.rewards_paid, usd(2_000));

    let root = ledger.get_user(UserId(1)).await.unwrap();
    assert_eq!(root.rank, Rank::TmcPro);
    assert_eq!(root.balance, usd(2_000));
    assert_eq!(root.rewards.rank_reward_total, usd(2_000));

    let summary = engine.run_daily_accrual(2 * DAY).await.unwrap();
    assert!(summary.promotions.is_empty());
    // Legs collect their own unpaid TMC PLUS entry; the root has nothing left to collect
    let summary = engine.run_monthly_rewards(MONTH).await.unwrap();
    assert_eq!(summary.rewards_paid, usd(12 * 500));
    assert_eq!(balance(&*ledger, 1).await, usd(2_000));
}

#[tokio::test]
async fn test_referral_cycle_isolated() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&*ledger, &[(1, None)]).await;
    for (id, referrer) in [(10, 11), (11, 10)] {
        ledger
            .import_user(
                User::new(UserId(id), 0)
                    .with_referrer(UserId(referrer))
                    .with_payout_address(address(id)),
            )
            .await;
    }
    let engine = Engine::new(test_config(), ledger.clone());
    engine
        .on_new_investment(UserId(1), "1000", "principal", 0)
        .await
        .unwrap();

    // The walk stops when it comes back around; the investment stands
    let receipt = engine
        .on_new_investment(UserId(10), "100", "principal", 0)
        .await
        .unwrap();
    assert!(receipt.investment.is_active);
    assert_eq!(receipt.bonuses.cycle_at, Some(UserId(10)));

    let summary = engine.run_daily_accrual(DAY).await.unwrap();
    assert!(summary.failed(UserId(10)));
    assert!(summary.failed(UserId(11)));
    assert!(!summary.failed(UserId(1)));
    assert_eq!(summary.transient_failures, 0);
    assert_eq!(balance(&*ledger, 1).await, usd(6));

    // Integrity failures do not hold the period open
    assert!(matches!(
        engine.run_daily_accrual(DAY + 1).await,
        Err(EngineError::AlreadyRan { .. })
    ));
}

#[tokio::test]
async fn test_user_without_payout_address_skipped() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&*ledger, &[(1, None)]).await;
    ledger.create_user(User::new(UserId(2), 0)).await.unwrap();
    let engine = Engine::new(test_config(), ledger.clone());
    for id in [1, 2] {
        engine
            .on_new_investment(UserId(id), "1000", "principal", 0)
            .await
            .unwrap();
    }

    let summary = engine.run_daily_accrual(DAY).await.unwrap();
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].user, UserId(2));
    assert!(summary.is_clean());
    assert_eq!(balance(&*ledger, 1).await, usd(6));
    assert_eq!(balance(&*ledger, 2).await, 0);
}

#[tokio::test]
async fn test_transient_failures_retried_then_period_left_open() {
    let ledger = Arc::new(FlakyLedger::new());
    seed(&*ledger, &[(1, None), (2, None)]).await;
    let engine = Engine::new(test_config(), ledger.clone());
    for id in [1, 2] {
        engine
            .on_new_investment(UserId(id), "1000", "principal", 0)
            .await
            .unwrap();
    }

    // User 1 recovers within the retry budget, user 2 does not
    ledger.fail_commits(UserId(1), 2);
    ledger.fail_commits(UserId(2), 3);

    let summary = engine.run_daily_accrual(DAY).await.unwrap();
    assert!(!summary.failed(UserId(1)));
    assert!(summary.failed(UserId(2)));
    assert_eq!(summary.transient_failures, 1);
    assert_eq!(balance(&*ledger, 1).await, usd(6));
    assert_eq!(balance(&*ledger, 2).await, 0);

    let summary = engine.run_daily_accrual(DAY + 60).await.unwrap();
    assert_eq!(summary.already_done, 1);
    assert_eq!(summary.processed, 1);
    assert!(summary.is_clean());
    assert_eq!(balance(&*ledger, 1).await, usd(6));
    assert_eq!(balance(&*ledger, 2).await, usd(6));

    assert!(matches!(
        engine.run_daily_accrual(DAY + 120).await,
        Err(EngineError::AlreadyRan { .. })
    ));
}

#[tokio::test]
async fn test_deferred_bonus_credited_on_next_run() {
    let ledger = Arc::new(FlakyLedger::new());
    seed(&*ledger, &[(1, None), (2, Some(1))]).await;
    let engine = Engine::new(test_config(), ledger.clone());

    // Every attempt at the direct credit fails; the level credit after it goes through
    ledger.fail_commits(UserId(1), 3);
    let receipt = engine
        .on_new_investment(UserId(2), "1000", "principal", 0)
        .await
        .unwrap();
    assert!(receipt.investment.is_active);
    assert!(receipt.bonuses.deferred.is_some());
    assert_eq!(engine.deferred_bonuses().len(), 1);

    let upline = ledger.get_user(UserId(1)).await.unwrap();
    assert_eq!(upline.balance, 0);
    assert!(upline.referral_income > 0);

    let summary = engine.run_daily_accrual(DAY).await.unwrap();
    assert_eq!(summary.bonuses_replayed, 1);
    assert_eq!(summary.bonuses_deferred, 0);
    assert!(engine.deferred_bonuses().is_empty());
    assert_eq!(balance(&*ledger, 1).await, usd(200));
    assert_eq!(
        ledger.bonuses_for(receipt.investment.id).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_cap_exceeded_leaves_ledger_untouched() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&*ledger, &[(1, None), (2, Some(1))]).await;
    let engine = Engine::new(test_config(), ledger.clone());
    engine
        .on_new_investment(UserId(2), "10000", "principal", 0)
        .await
        .unwrap();
    let upline = ledger.get_user(UserId(1)).await.unwrap();

    let err = engine
        .on_new_investment(UserId(2), "50", "principal", 0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::CapExceeded { package: PackageType::Principal, .. }
    ));

    for amount in ["10000", "10000", "5000"] {
        engine
            .on_new_investment(UserId(2), amount, "yield", 0)
            .await
            .unwrap();
    }
    assert!(matches!(
        engine.on_new_investment(UserId(2), "1000", "yield", 0).await,
        Err(EngineError::CapExceeded { package: PackageType::Yield, .. })
    ));

    let held = ledger
        .find_investments(UserId(2), InvestmentFilter::All)
        .await
        .unwrap();
    assert_eq!(held.len(), 4);
    let after = ledger.get_user(UserId(1)).await.unwrap();
    assert_eq!(after.balance, upline.balance + usd(5_000));
}

#[tokio::test]
async fn test_monthly_catch_up_drains_over_runs() {
    let ledger = Arc::new(MemoryLedger::new());
    seed(&*ledger, &[(1, None)]).await;
    let mut user = ledger.get_user(UserId(1)).await.unwrap();
    user.rank = Rank::TmcSmart;
    for rank in [Rank::TmcPlus, Rank::TmcPro, Rank::TmcSmart] {
        user.rewards.entry_paid[rank.index()] = true;
        user.rewards.entered_at[rank.index()] = Some(0);
    }
    ledger.save_user(user).await.unwrap();
    let engine = Engine::new(test_config(), ledger.clone());

    // Five months behind: three paid now, the rest next month
    let summary = engine.run_monthly_rewards(5 * MONTH).await.unwrap();
    assert_eq!(summary.rewards_paid, usd(3_000));
    let summary = engine.run_monthly_rewards(6 * MONTH).await.unwrap();
    assert_eq!(summary.rewards_paid, usd(3_000));

    let user = ledger.get_user(UserId(1)).await.unwrap();
    assert_eq!(user.rewards.months_paid[Rank::TmcSmart.index()], 6);
    assert_eq!(user.balance, usd(6_000));
}

#[tokio::test]
async fn test_abort_keeps_committed_users_and_reopens_period() {
    let ledger = Arc::new(FlakyLedger::new());
    seed(&*ledger, &[(1, None), (2, None), (3, None)]).await;
    let mut config = test_config();
    config.batch.concurrency = 1;
    let engine = Engine::new(config, ledger.clone());
    for id in [1, 2, 3] {
        engine
            .on_new_investment(UserId(id), "1000", "principal", 0)
            .await
            .unwrap();
    }

    let abort = engine.abort_handle();
    ledger.on_commit(move |_| abort.abort());
    let summary = engine.run_daily_accrual(DAY).await.unwrap();
    assert!(summary.aborted);
    assert_eq!(summary.processed, 1);
    assert_eq!(balance(&*ledger, 1).await, usd(6));
    assert_eq!(balance(&*ledger, 2).await, 0);

    ledger.on_commit(|_| {});
    let summary = engine.run_daily_accrual(DAY + 60).await.unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.already_done, 1);
    assert_eq!(summary.processed, 2);
    for id in [1, 2, 3] {
        assert_eq!(balance(&*ledger, id).await, usd(6));
    }
}
