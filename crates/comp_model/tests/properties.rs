//! Property tests for the accrual, schedule and reward model

use comp_model::accrual::{accrue, AccrualParams, AccrualSkip, Disposition};
use comp_model::level::{level_roi, LevelRoiParams};
use comp_model::rewards::{pay_entry_rewards, pay_monthly_stipend, RewardTable};
use comp_model::*;
use proptest::prelude::*;

fn any_rank() -> impl Strategy<Value = Rank> {
    (0usize..Rank::ALL.len()).prop_map(|i| Rank::ALL[i])
}

fn any_package() -> impl Strategy<Value = PackageType> {
    prop_oneof![Just(PackageType::Principal), Just(PackageType::Yield)]
}

proptest! {
    #[test]
    fn uncapped_accrual_strictly_grows(
        amount_usd in 1u64..5_000_000,
        rank in any_rank(),
        package in any_package(),
        auto in any::<bool>(),
        balance_usd in 0u64..100_000,
        periods in 1usize..20,
    ) {
        let params = AccrualParams::default();
        let mut user = User::new(UserId(1), 0);
        user.rank = rank;
        user.auto_invest_enabled = auto;
        user.balance = usd(balance_usd);
        let mut inv = Investment::new(InvestmentId(1), UserId(1), package, usd(amount_usd), 0, 0);

        for _ in 0..periods {
            let before = inv.clone();
            match accrue(&mut user, &mut inv, &params) {
                Ok(event) => {
                    prop_assert!(inv.daily_roi > before.daily_roi);
                    prop_assert_eq!(inv.days_accumulated, before.days_accumulated + 1);
                    prop_assert!(event.period_return.net <= event.period_return.capped);
                    prop_assert!(event.period_return.capped <= usd(params.limits(package).daily_cap_usd));
                    prop_assert!(investment_transition_ok(&before, &inv));
                }
                Err(skip) => {
                    prop_assert_eq!(skip, AccrualSkip::Capped);
                    prop_assert!(before.is_capped);
                    prop_assert_eq!(&inv, &before);
                }
            }
        }
    }

    #[test]
    fn auto_invest_never_exceeds_cap(
        amount_usd in 50u64..10_000,
        start_usd in 0u64..10_000,
        periods in 1usize..400,
    ) {
        let params = AccrualParams::default();
        let mut user = User::new(UserId(1), 0);
        user.auto_invest_enabled = true;
        user.investment_total = usd(start_usd);
        let mut inv = Investment::new(InvestmentId(1), UserId(1), PackageType::Principal, usd(amount_usd), 0, 0);

        let mut returned = 0u128;
        let start_total = user.investment_total;
        for _ in 0..periods {
            if let Ok(event) = accrue(&mut user, &mut inv, &params) {
                returned += event.period_return.net;
                if let Disposition::Capped { .. } = event.disposition {
                    prop_assert!(inv.is_capped);
                }
            }
            prop_assert!(user.investment_total <= user.investment_cap.max(start_total));
        }
        // Nothing is dropped: every net return is either reinvested or credited
        prop_assert_eq!(returned, (user.investment_total - start_total) + user.balance);
    }

    #[test]
    fn level_roi_never_exceeds_principal(
        level in 0u16..80,
        directs in 0u32..40,
        amount_usd in 0u64..1_000_000,
    ) {
        let roi = level_roi(level, directs, usd(amount_usd), &LevelRoiParams::default());
        prop_assert!(roi.value <= usd(amount_usd));
        prop_assert!(roi.bps <= 10_000);
    }

    #[test]
    fn rewards_never_double_pay(
        rank in any_rank(),
        entered_day in 0u64..1_000,
        checks in proptest::collection::vec(0u64..2_000, 1..30),
    ) {
        let table = RewardTable::default();
        let mut user = User::new(UserId(1), 0);
        user.rank = rank;
        user.rewards.entered_at[rank.index()] = Some(entered_day * 86_400);

        let mut now_days: Vec<u64> = checks;
        now_days.sort_unstable();
        for day in now_days {
            let before = user.clone();
            pay_entry_rewards(&mut user, &table);
            pay_monthly_stipend(&mut user, day * 86_400, &table);
            prop_assert!(reward_flags_monotonic(&before, &user));
        }

        let elapsed = comp_model::rewards::months_elapsed(
            entered_day * 86_400,
            2_000 * 86_400,
            table.month_secs,
        );
        prop_assert!(user.rewards.months_paid[rank.index()] <= elapsed);
        let entries: u128 = Rank::ALL
            .iter()
            .filter(|r| **r <= rank)
            .filter_map(|r| table.entry_reward(*r))
            .sum();
        let stipends = table
            .monthly_stipend(rank)
            .map(|s| s * user.rewards.months_paid[rank.index()] as u128)
            .unwrap_or(0);
        prop_assert_eq!(user.rewards.rank_reward_total, entries + stipends);
    }
}
