//! Rank qualification criteria
//!
//! Regular -> TMC PLUS is time-boxed: three consecutive windows anchored at the user's
//! first investment, each needing a number of recently active direct referrals. Every
//! tier above needs a number of direct legs whose subtree already holds the previous tier;
//! the leg search itself lives with the referral graph.

use crate::state::Rank;
use serde::{Deserialize, Serialize};

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Number of staged TMC PLUS windows
pub const PLUS_WINDOWS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlusWindow {
    /// First tenure day of the window, inclusive
    pub start_day: u32,
    /// Tenure day the window closes, exclusive
    pub end_day: u32,
    /// Direct referrals needed while the window is open
    pub required: u32,
}

impl PlusWindow {
    pub fn size(&self) -> u32 {
        self.end_day.saturating_sub(self.start_day)
    }

    pub fn contains(&self, tenure_days: u32) -> bool {
        self.start_day <= tenure_days && tenure_days < self.end_day
    }

    /// Referrals whose own tenure fits inside the window size
    pub fn count_referrals(&self, referral_tenures: &[Option<u32>]) -> u32 {
        let size = self.size();
        let n = referral_tenures
            .iter()
            .filter(|t| matches!(t, Some(days) if *days <= size))
            .count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankCriteria {
    /// Qualifying legs for TMC PRO, SMART, ROYAL, CHIEF, AMBASSADOR
    pub legs_required: [u32; 5],
    /// Deepest downline level inspected for a qualifying member
    pub max_depth: u16,
    pub plus_windows: [PlusWindow; PLUS_WINDOWS],
}

impl Default for RankCriteria {
    fn default() -> Self {
        Self {
            legs_required: [4, 5, 6, 7, 8],
            max_depth: 50,
            plus_windows: [
                PlusWindow { start_day: 0, end_day: 30, required: 5 },
                PlusWindow { start_day: 30, end_day: 90, required: 8 },
                PlusWindow { start_day: 90, end_day: 180, required: 10 },
            ],
        }
    }
}

impl RankCriteria {
    /// Legs needed to enter `target`; `None` for tiers not gated by legs
    pub fn legs_required(&self, target: Rank) -> Option<u32> {
        target
            .index()
            .checked_sub(Rank::TmcPro.index())
            .and_then(|i| self.legs_required.get(i).copied())
    }
}

/// Why a user did not advance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Advisory {
    TopRank,
    NoDirectConnections,
    NoFirstInvestment,
    /// Window (1-based) is open but short of referrals
    PlusWindowOpen { window: u8, have: u32, need: u32 },
    /// Window (1-based) has not opened yet
    PlusAwaitingWindow { window: u8 },
    /// Window (1-based) closed unmet; TMC PLUS can no longer be reached
    PlusWindowMissed { window: u8 },
    InsufficientLegs { target: Rank, have: u32, need: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlusOutcome {
    /// Windows met after this evaluation
    pub progress: u8,
    pub qualified: bool,
    pub advisory: Option<Advisory>,
}

/// Whole days elapsed since `since`
pub fn tenure_days(since: Option<u64>, now: u64) -> Option<u32> {
    since.map(|s| {
        let days = now.saturating_sub(s) / SECONDS_PER_DAY;
        u32::try_from(days).unwrap_or(u32::MAX)
    })
}

/// Advance the staged TMC PLUS qualification by at most one window
pub fn plus_step(
    progress: u8,
    tenure: Option<u32>,
    referral_tenures: &[Option<u32>],
    windows: &[PlusWindow],
) -> PlusOutcome {
    let total = u8::try_from(windows.len()).unwrap_or(u8::MAX);
    let blocked = |advisory| PlusOutcome {
        progress,
        qualified: false,
        advisory: Some(advisory),
    };

    if progress >= total {
        return PlusOutcome {
            progress,
            qualified: true,
            advisory: None,
        };
    }
    let Some(tenure) = tenure else {
        return blocked(Advisory::NoFirstInvestment);
    };

    let Some(current) = windows.iter().position(|w| w.contains(tenure)) else {
        return blocked(Advisory::PlusWindowMissed { window: progress + 1 });
    };
    let current = u8::try_from(current).unwrap_or(u8::MAX);

    if current > progress {
        return blocked(Advisory::PlusWindowMissed { window: progress + 1 });
    }
    if current < progress {
        return blocked(Advisory::PlusAwaitingWindow { window: progress + 1 });
    }

    let window = &windows[current as usize];
    let have = window.count_referrals(referral_tenures);
    if have < window.required {
        return blocked(Advisory::PlusWindowOpen {
            window: current + 1,
            have,
            need: window.required,
        });
    }

    let progress = progress + 1;
    let qualified = progress >= total;
    PlusOutcome {
        progress,
        qualified,
        advisory: (!qualified).then_some(Advisory::PlusAwaitingWindow { window: progress + 1 }),
    }
}
