//! Reward scheduler

use comp_model::math::add_u128;
use comp_model::rewards::{
    pay_entry_rewards, pay_monthly_stipend, record_tier_entry, RewardPayment, RewardTable,
};
use comp_model::{Money, Usd, User};

pub struct RewardScheduler<'a> {
    table: &'a RewardTable,
}

impl<'a> RewardScheduler<'a> {
    pub fn new(table: &'a RewardTable) -> Self {
        Self { table }
    }

    /// Stamp newly entered tiers and pay their entry rewards. Runs inside the promotion
    /// transaction.
    pub fn on_promotion(&self, user: &mut User, now: u64) -> Vec<RewardPayment> {
        record_tier_entry(user, now);
        let paid = pay_entry_rewards(user, self.table);
        log_payments(user, &paid);
        paid
    }

    /// Monthly pass: sweep unpaid entry rewards, then the held tier's stipend
    pub fn monthly(&self, user: &mut User, now: u64) -> Vec<RewardPayment> {
        record_tier_entry(user, now);
        let mut paid = pay_entry_rewards(user, self.table);
        paid.extend(pay_monthly_stipend(user, now, self.table));
        log_payments(user, &paid);
        paid
    }
}

pub fn total_paid(payments: &[RewardPayment]) -> Money {
    payments.iter().fold(0, |acc, p| add_u128(acc, p.amount))
}

fn log_payments(user: &User, paid: &[RewardPayment]) {
    for payment in paid {
        log::info!(
            "{}: {} {:?} reward of {}",
            user.id,
            payment.rank,
            payment.kind,
            Usd(payment.amount)
        );
    }
}
