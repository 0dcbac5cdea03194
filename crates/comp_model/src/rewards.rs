//! Tier rewards
//!
//! Entry rewards are one-shot per tier, gated by `entry_paid`. Monthly stipends accrue one
//! per full month since the held tier was entered and are paid incrementally: at most
//! `max_months_per_run` outstanding months per call, so a missed run catches up over the
//! following runs instead of in one lump sum.

use crate::math::add_u128;
use crate::money::{usd, Money};
use crate::rank::SECONDS_PER_DAY;
use crate::state::{Rank, User};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTable {
    /// Entry reward for TMC PLUS, PRO, SMART, ROYAL, CHIEF, AMBASSADOR
    pub entry_usd: [u64; 6],
    /// Monthly stipend for TMC SMART, ROYAL, CHIEF, AMBASSADOR
    pub monthly_usd: [u64; 4],
    /// Length of a reward month
    pub month_secs: u64,
    pub max_months_per_run: u32,
}

impl Default for RewardTable {
    fn default() -> Self {
        Self {
            entry_usd: [500, 2_000, 5_000, 50_000, 200_000, 1_000_000],
            monthly_usd: [1_000, 5_000, 10_000, 30_000],
            month_secs: 30 * SECONDS_PER_DAY,
            max_months_per_run: 3,
        }
    }
}

impl RewardTable {
    pub fn entry_reward(&self, rank: Rank) -> Option<Money> {
        rank.index()
            .checked_sub(Rank::TmcPlus.index())
            .and_then(|i| self.entry_usd.get(i))
            .map(|d| usd(*d))
    }

    pub fn monthly_stipend(&self, rank: Rank) -> Option<Money> {
        rank.index()
            .checked_sub(Rank::TmcSmart.index())
            .and_then(|i| self.monthly_usd.get(i))
            .map(|d| usd(*d))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardKind {
    Entry,
    /// Stipend for the given month since tier entry (1-based)
    Monthly { month: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPayment {
    pub rank: Rank,
    pub kind: RewardKind,
    pub amount: Money,
}

fn credit(user: &mut User, amount: Money) {
    user.balance = add_u128(user.balance, amount);
    user.rewards.rank_reward_total = add_u128(user.rewards.rank_reward_total, amount);
}

/// Stamp the entry time of every tier up to the user's rank that has none
pub fn record_tier_entry(user: &mut User, now: u64) {
    let held = user.rank;
    for rank in Rank::ALL.iter().filter(|r| **r <= held) {
        let slot = &mut user.rewards.entered_at[rank.index()];
        if slot.is_none() {
            *slot = Some(now);
        }
    }
}

/// Pay every unpaid entry reward for tiers up to the user's rank
pub fn pay_entry_rewards(user: &mut User, table: &RewardTable) -> Vec<RewardPayment> {
    let held = user.rank;
    let mut paid = Vec::new();
    for rank in Rank::ALL.iter().copied().filter(|r| *r <= held) {
        let Some(amount) = table.entry_reward(rank) else {
            continue;
        };
        if user.rewards.entry_paid[rank.index()] {
            continue;
        }
        user.rewards.entry_paid[rank.index()] = true;
        credit(user, amount);
        paid.push(RewardPayment {
            rank,
            kind: RewardKind::Entry,
            amount,
        });
    }
    paid
}

/// Full months between `entered_at` and `now`
pub fn months_elapsed(entered_at: u64, now: u64, month_secs: u64) -> u32 {
    if month_secs == 0 {
        return 0;
    }
    u32::try_from(now.saturating_sub(entered_at) / month_secs).unwrap_or(u32::MAX)
}

/// Pay the held tier's outstanding stipends, bounded by `max_months_per_run`
pub fn pay_monthly_stipend(user: &mut User, now: u64, table: &RewardTable) -> Vec<RewardPayment> {
    let rank = user.rank;
    let Some(stipend) = table.monthly_stipend(rank) else {
        return Vec::new();
    };
    let idx = rank.index();

    // Tier held without an entry stamp (e.g. imported rank): the clock starts now
    let Some(entered_at) = user.rewards.entered_at[idx] else {
        user.rewards.entered_at[idx] = Some(now);
        return Vec::new();
    };

    let elapsed = months_elapsed(entered_at, now, table.month_secs);
    let already = user.rewards.months_paid[idx];
    let due = elapsed.saturating_sub(already).min(table.max_months_per_run);

    let mut paid = Vec::with_capacity(due as usize);
    for month in already.saturating_add(1)..=already.saturating_add(due) {
        credit(user, stipend);
        user.rewards.months_paid[idx] = month;
        paid.push(RewardPayment {
            rank,
            kind: RewardKind::Monthly { month },
            amount: stipend,
        });
    }
    paid
}
