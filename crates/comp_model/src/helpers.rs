//! Invariant checking helpers

use crate::state::*;

/// Rank never moves backwards
pub fn rank_monotonic(before: &User, after: &User) -> bool {
    after.rank >= before.rank
}

/// Entry flags are never cleared and stipend counters never shrink
pub fn reward_flags_monotonic(before: &User, after: &User) -> bool {
    let b = &before.rewards;
    let a = &after.rewards;
    let flags_kept = b
        .entry_paid
        .iter()
        .zip(a.entry_paid.iter())
        .all(|(was, is)| !*was || *is);
    let months_kept = b
        .months_paid
        .iter()
        .zip(a.months_paid.iter())
        .all(|(was, is)| is >= was);
    flags_kept && months_kept && a.rank_reward_total >= b.rank_reward_total
}

/// Every user invariant between a stored record and its replacement
pub fn user_transition_ok(before: &User, after: &User) -> bool {
    before.id == after.id
        && rank_monotonic(before, after)
        && reward_flags_monotonic(before, after)
        && after.plus_progress >= before.plus_progress
}

/// Principal and ownership are fixed at creation
pub fn principal_unchanged(before: &Investment, after: &Investment) -> bool {
    before.id == after.id
        && before.user_id == after.user_id
        && before.package == after.package
        && before.amount == after.amount
        && before.created_at == after.created_at
}

/// Accrual fields only grow; a capped investment stays capped
pub fn accrual_monotonic(before: &Investment, after: &Investment) -> bool {
    after.daily_roi >= before.daily_roi
        && after.days_accumulated >= before.days_accumulated
        && (!before.is_capped || after.is_capped)
}

/// Every investment invariant between a stored record and its replacement
pub fn investment_transition_ok(before: &Investment, after: &Investment) -> bool {
    principal_unchanged(before, after) && accrual_monotonic(before, after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::usd;

    #[test]
    fn test_rank_regression_detected() {
        let mut before = User::new(UserId(1), 0);
        before.rank = Rank::TmcPro;
        let mut after = before.clone();
        after.rank = Rank::TmcPlus;
        assert!(!user_transition_ok(&before, &after));
    }

    #[test]
    fn test_cleared_reward_flag_detected() {
        let mut before = User::new(UserId(1), 0);
        before.rewards.entry_paid[1] = true;
        let mut after = before.clone();
        after.rewards.entry_paid[1] = false;
        assert!(!reward_flags_monotonic(&before, &after));
    }

    #[test]
    fn test_principal_mutation_detected() {
        let before = Investment::new(InvestmentId(1), UserId(1), PackageType::Principal, usd(100), 0, 0);
        let mut after = before.clone();
        after.amount = usd(200);
        assert!(!investment_transition_ok(&before, &after));

        let mut accrued = before.clone();
        accrued.daily_roi = usd(1);
        accrued.days_accumulated = 1;
        assert!(investment_transition_ok(&before, &accrued));
    }

    #[test]
    fn test_uncapping_detected() {
        let mut before = Investment::new(InvestmentId(1), UserId(1), PackageType::Principal, usd(100), 0, 0);
        before.is_capped = true;
        let mut after = before.clone();
        after.is_capped = false;
        assert!(!accrual_monotonic(&before, &after));
    }
}
