//! Referral bonus schedules
//!
//! Level ROI percentages are an ordered list of `(level range -> bps)` bands. Two
//! schedules exist; which one applies depends on whether the recipient has reached the
//! qualifying number of direct referrals.

use crate::math::mul_bps;
use crate::money::Money;
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Max bands per schedule
pub const MAX_BANDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelBand {
    /// First level of the band (1 = direct referrer)
    pub from: u16,
    /// Last level of the band, inclusive
    pub to: u16,
    pub bps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("schedule has no bands")]
    Empty,
    #[error("schedule has more than {max} bands", max = MAX_BANDS)]
    TooManyBands,
    #[error("band {from}..={to} is not a valid level range")]
    InvalidRange { from: u16, to: u16 },
    #[error("band starting at level {from} overlaps or precedes the previous band")]
    Unordered { from: u16 },
    #[error("band {from}..={to} pays {bps} bps, above 100%")]
    RateTooHigh { from: u16, to: u16, bps: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelSchedule {
    bands: ArrayVec<LevelBand, MAX_BANDS>,
}

impl LevelSchedule {
    pub fn new(bands: &[LevelBand]) -> Result<Self, ScheduleError> {
        if bands.len() > MAX_BANDS {
            return Err(ScheduleError::TooManyBands);
        }
        let schedule = Self::from_bands(bands);
        schedule.validate()?;
        Ok(schedule)
    }

    fn from_bands(bands: &[LevelBand]) -> Self {
        Self {
            bands: bands.iter().copied().take(MAX_BANDS).collect(),
        }
    }

    /// Bands must be non-empty, ascending and disjoint
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.bands.is_empty() {
            return Err(ScheduleError::Empty);
        }
        let mut previous_to = 0u16;
        for band in &self.bands {
            if band.from == 0 || band.from > band.to {
                return Err(ScheduleError::InvalidRange {
                    from: band.from,
                    to: band.to,
                });
            }
            if band.from <= previous_to {
                return Err(ScheduleError::Unordered { from: band.from });
            }
            if band.bps > 10_000 {
                return Err(ScheduleError::RateTooHigh {
                    from: band.from,
                    to: band.to,
                    bps: band.bps,
                });
            }
            previous_to = band.to;
        }
        Ok(())
    }

    /// Percentage paid at `level`; 0 outside every band
    pub fn bps_for(&self, level: u16) -> u32 {
        self.bands
            .iter()
            .find(|b| b.from <= level && level <= b.to)
            .map(|b| b.bps)
            .unwrap_or(0)
    }

    pub fn bands(&self) -> &[LevelBand] {
        &self.bands
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRoiParams {
    /// Direct referrals needed to use the qualified schedule
    pub qualified_direct_threshold: u32,
    pub standard: LevelSchedule,
    pub qualified: LevelSchedule,
}

impl Default for LevelRoiParams {
    fn default() -> Self {
        Self {
            qualified_direct_threshold: 5,
            standard: LevelSchedule::from_bands(&[
                LevelBand { from: 1, to: 5, bps: 1_000 },  // 10%
                LevelBand { from: 6, to: 50, bps: 100 },   // 1%
            ]),
            qualified: LevelSchedule::from_bands(&[
                LevelBand { from: 1, to: 1, bps: 5_000 },  // 50%
                LevelBand { from: 2, to: 5, bps: 1_000 },  // 10%
                LevelBand { from: 6, to: 50, bps: 200 },   // 2%
            ]),
        }
    }
}

impl LevelRoiParams {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        self.standard.validate()?;
        self.qualified.validate()
    }

    pub fn schedule_for(&self, direct_referrals: u32) -> &LevelSchedule {
        if direct_referrals >= self.qualified_direct_threshold {
            &self.qualified
        } else {
            &self.standard
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusParams {
    /// Direct referral bonus (2000 = 20%)
    pub direct_bps: u32,
    /// Deepest upline level that can receive level ROI
    pub max_depth: u16,
    pub level: LevelRoiParams,
}

impl Default for BonusParams {
    fn default() -> Self {
        Self {
            direct_bps: 2_000,
            max_depth: 50,
            level: LevelRoiParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelRoi {
    pub bps: u32,
    pub value: Money,
}

/// Level ROI owed to a recipient `level` steps above the investor
pub fn level_roi(level: u16, direct_referrals: u32, amount: Money, params: &LevelRoiParams) -> LevelRoi {
    let bps = params.schedule_for(direct_referrals).bps_for(level);
    LevelRoi {
        bps,
        value: mul_bps(amount, bps),
    }
}
