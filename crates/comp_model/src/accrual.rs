//! Periodic ROI accrual
//!
//! One call to [`accrue`] is one period for one investment:
//! - rate by rank from a [`RateTable`]
//! - return capped at the class daily ceiling
//! - tax applied when the class wallet would reach the threshold (recomputed each period)
//! - return reinvested under auto-invest, otherwise credited to the class wallet
//!
//! Reinvestment that would overshoot the user's investment cap fills the remaining
//! headroom, credits the surplus and caps the investment for good.

use crate::math::*;
use crate::money::{usd, Money};
use crate::state::{Investment, PackageType, Rank, User};
use serde::{Deserialize, Serialize};

/// Daily rate by rank, in basis points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateTable {
    pub regular_bps: u32,
    /// TMC PLUS
    pub plus_bps: u32,
    /// TMC PRO and every tier above
    pub pro_and_above_bps: u32,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            regular_bps: 60,       // 0.6%
            plus_bps: 80,          // 0.8%
            pro_and_above_bps: 100, // 1.0%
        }
    }
}

impl RateTable {
    pub fn rate_for(&self, rank: Rank) -> u32 {
        match rank {
            Rank::Regular => self.regular_bps,
            Rank::TmcPlus => self.plus_bps,
            _ => self.pro_and_above_bps,
        }
    }
}

/// Ceilings of one investment class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLimits {
    /// Max return credited per period
    pub daily_cap_usd: u64,
    /// Wallet level at which the period return is taxed
    pub tax_threshold_usd: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualParams {
    /// Share of a taxed return the user keeps (7500 = 75%)
    pub tax_retained_bps: u32,
    pub rates: RateTable,
    pub principal: ClassLimits,
    pub yield_package: ClassLimits,
}

impl Default for AccrualParams {
    fn default() -> Self {
        Self {
            tax_retained_bps: 7_500,
            rates: RateTable::default(),
            principal: ClassLimits {
                daily_cap_usd: 20_000,
                tax_threshold_usd: 20_000,
            },
            yield_package: ClassLimits {
                daily_cap_usd: 50_000,
                tax_threshold_usd: 50_000,
            },
        }
    }
}

impl AccrualParams {
    pub fn limits(&self, package: PackageType) -> &ClassLimits {
        match package {
            PackageType::Principal => &self.principal,
            PackageType::Yield => &self.yield_package,
        }
    }
}

/// Return computed for one period, before disposition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodReturn {
    pub rate_bps: u32,
    pub raw: Money,
    pub capped: Money,
    pub taxed: bool,
    /// What the user actually receives
    pub net: Money,
}

/// Where a period's net return went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    Credited(Money),
    Reinvested(Money),
    /// Cap reached: headroom reinvested, surplus credited, investment capped
    Capped { reinvested: Money, credited: Money },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualEvent {
    pub period_return: PeriodReturn,
    pub disposition: Disposition,
}

/// Why an investment was not accrued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccrualSkip {
    Inactive,
    Capped,
    UnderReview,
    /// Zero principal; the investment is flagged for review
    Malformed,
    /// Investment belongs to a different user
    Foreign,
}

/// Compute a period return without touching any state
pub fn period_return(
    amount: Money,
    rank: Rank,
    package: PackageType,
    wallet: Money,
    params: &AccrualParams,
) -> PeriodReturn {
    let rate_bps = params.rates.rate_for(rank);
    let limits = params.limits(package);

    let raw = mul_bps(amount, rate_bps);
    let capped = min_u128(raw, usd(limits.daily_cap_usd));

    // Threshold crossing is judged on the wallet as it would stand after this period
    let taxed = add_u128(wallet, capped) >= usd(limits.tax_threshold_usd);
    let net = if taxed {
        mul_bps(capped, params.tax_retained_bps)
    } else {
        capped
    };

    PeriodReturn {
        rate_bps,
        raw,
        capped,
        taxed,
        net,
    }
}

/// Accrue one period on `inv`, applying the return to `user`
pub fn accrue(
    user: &mut User,
    inv: &mut Investment,
    params: &AccrualParams,
) -> Result<AccrualEvent, AccrualSkip> {
    if inv.user_id != user.id {
        return Err(AccrualSkip::Foreign);
    }
    if !inv.is_active {
        return Err(AccrualSkip::Inactive);
    }
    if inv.is_capped {
        return Err(AccrualSkip::Capped);
    }
    if inv.needs_review {
        return Err(AccrualSkip::UnderReview);
    }
    if inv.amount == 0 {
        inv.needs_review = true;
        return Err(AccrualSkip::Malformed);
    }

    let ret = period_return(inv.amount, user.rank, inv.package, user.wallet(inv.package), params);

    inv.daily_roi = add_u128(inv.daily_roi, ret.net);
    inv.days_accumulated = inv.days_accumulated.saturating_add(1);

    let disposition = if user.auto_invest_enabled {
        let projected = add_u128(user.investment_total, ret.net);
        if projected <= user.investment_cap {
            user.investment_total = projected;
            Disposition::Reinvested(ret.net)
        } else {
            let headroom = sub_u128(user.investment_cap, user.investment_total);
            let reinvested = min_u128(headroom, ret.net);
            let credited = sub_u128(ret.net, reinvested);
            user.investment_total = add_u128(user.investment_total, reinvested);
            let wallet = user.wallet_mut(inv.package);
            *wallet = add_u128(*wallet, credited);
            inv.is_capped = true;
            Disposition::Capped {
                reinvested,
                credited,
            }
        }
    } else {
        let wallet = user.wallet_mut(inv.package);
        *wallet = add_u128(*wallet, ret.net);
        Disposition::Credited(ret.net)
    };

    Ok(AccrualEvent {
        period_return: ret,
        disposition,
    })
}
