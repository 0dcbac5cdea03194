//! Domain records shared by the model and the engine

use crate::money::{usd, Money};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of tiers in [`Rank::ALL`]
pub const RANK_COUNT: usize = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvestmentId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user#{}", self.0)
    }
}

impl fmt::Display for InvestmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inv#{}", self.0)
    }
}

/// Referral-network tier, strictly ordered
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    Regular,
    TmcPlus,
    TmcPro,
    TmcSmart,
    TmcRoyal,
    TmcChief,
    TmcAmbassador,
}

impl Rank {
    pub const ALL: [Rank; RANK_COUNT] = [
        Rank::Regular,
        Rank::TmcPlus,
        Rank::TmcPro,
        Rank::TmcSmart,
        Rank::TmcRoyal,
        Rank::TmcChief,
        Rank::TmcAmbassador,
    ];

    /// Position in the tier order (Regular = 0)
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Rank> {
        Rank::ALL.get(self.index() + 1).copied()
    }

    pub fn previous(self) -> Option<Rank> {
        self.index().checked_sub(1).map(|i| Rank::ALL[i])
    }

    pub fn label(self) -> &'static str {
        match self {
            Rank::Regular => "Regular",
            Rank::TmcPlus => "TMC PLUS",
            Rank::TmcPro => "TMC PRO",
            Rank::TmcSmart => "TMC SMART",
            Rank::TmcRoyal => "TMC ROYAL",
            Rank::TmcChief => "TMC CHIEF",
            Rank::TmcAmbassador => "TMC AMBASSADOR",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Investment class; each class has its own caps, tax threshold and wallet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PackageType {
    Principal,
    Yield,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown package type: {0:?}")]
pub struct UnknownPackage(pub String);

impl FromStr for PackageType {
    type Err = UnknownPackage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "principal" | "standard" => Ok(PackageType::Principal),
            "yield" => Ok(PackageType::Yield),
            _ => Err(UnknownPackage(s.to_string())),
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageType::Principal => f.write_str("principal"),
            PackageType::Yield => f.write_str("yield"),
        }
    }
}

/// Per-tier reward bookkeeping. Flags are set once and never cleared.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankRewardRecord {
    /// One-time entry reward paid, indexed by [`Rank::index`]
    pub entry_paid: [bool; RANK_COUNT],
    /// Tier entry timestamp (unix seconds)
    pub entered_at: [Option<u64>; RANK_COUNT],
    /// Monthly stipends paid for the tier
    pub months_paid: [u32; RANK_COUNT],
    /// Sum of every entry reward and stipend credited
    pub rank_reward_total: Money,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Base58 payout wallet; batch processing skips users without one
    pub payout_address: Option<String>,
    /// Withdrawable funds
    pub balance: Money,
    /// Returns of yield-package investments
    pub yield_balance: Money,
    /// Level-ROI income from the downline
    pub referral_income: Money,
    /// Cumulative active principal, including reinvested returns
    pub investment_total: Money,
    /// Ceiling for auto-reinvestment
    pub investment_cap: Money,
    pub auto_invest_enabled: bool,
    pub referrer_id: Option<UserId>,
    pub rank: Rank,
    pub rewards: RankRewardRecord,
    /// First investment timestamp, anchors the TMC PLUS windows
    pub first_investment: Option<u64>,
    /// TMC PLUS qualification windows met so far
    pub plus_progress: u8,
    pub last_accrual_period: Option<u64>,
    pub last_reward_period: Option<u64>,
    /// Optimistic-concurrency counter, bumped by the ledger on every commit
    pub version: u64,
    pub created_at: u64,
}

impl User {
    pub fn new(id: UserId, created_at: u64) -> Self {
        Self {
            id,
            payout_address: None,
            balance: 0,
            yield_balance: 0,
            referral_income: 0,
            investment_total: 0,
            investment_cap: usd(10_000),
            auto_invest_enabled: false,
            referrer_id: None,
            rank: Rank::Regular,
            rewards: RankRewardRecord::default(),
            first_investment: None,
            plus_progress: 0,
            last_accrual_period: None,
            last_reward_period: None,
            version: 0,
            created_at,
        }
    }

    pub fn with_referrer(mut self, referrer: UserId) -> Self {
        self.referrer_id = Some(referrer);
        self
    }

    pub fn with_payout_address(mut self, address: impl Into<String>) -> Self {
        self.payout_address = Some(address.into());
        self
    }

    /// Wallet credited by returns of the given class
    pub fn wallet(&self, package: PackageType) -> Money {
        match package {
            PackageType::Principal => self.balance,
            PackageType::Yield => self.yield_balance,
        }
    }

    pub fn wallet_mut(&mut self, package: PackageType) -> &mut Money {
        match package {
            PackageType::Principal => &mut self.balance,
            PackageType::Yield => &mut self.yield_balance,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub user_id: UserId,
    pub package: PackageType,
    /// Principal, fixed at creation
    pub amount: Money,
    pub liquidity_fee: Money,
    /// Cumulative accrued return
    pub daily_roi: Money,
    pub days_accumulated: u32,
    pub is_active: bool,
    pub is_capped: bool,
    /// Malformed record excluded from accrual until an operator looks at it
    pub needs_review: bool,
    pub created_at: u64,
}

impl Investment {
    pub fn new(
        id: InvestmentId,
        user_id: UserId,
        package: PackageType,
        amount: Money,
        liquidity_fee: Money,
        created_at: u64,
    ) -> Self {
        Self {
            id,
            user_id,
            package,
            amount,
            liquidity_fee,
            daily_roi: 0,
            days_accumulated: 0,
            is_active: true,
            is_capped: false,
            needs_review: false,
            created_at,
        }
    }

    /// Eligible for another accrual period
    pub fn accrues(&self) -> bool {
        self.is_active && !self.is_capped && !self.needs_review
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BonusKind {
    /// One-off percentage of the investment paid to the direct referrer
    Direct,
    /// Level ROI paid along the upline
    LevelRoi,
}

/// Idempotency tag of a bonus credit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BonusKey {
    pub investment_id: InvestmentId,
    pub level: u16,
    pub kind: BonusKind,
}

impl fmt::Display for BonusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/L{}/{:?}", self.investment_id, self.level, self.kind)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusRecord {
    pub key: BonusKey,
    pub recipient: UserId,
    pub source_user: UserId,
    pub percentage_bps: u32,
    pub value: Money,
    pub created_at: u64,
}
