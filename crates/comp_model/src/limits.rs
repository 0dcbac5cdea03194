//! Deposit bounds and per-class active-investment caps

use crate::math::{add_u128, mul_bps};
use crate::money::{usd, Money};
use crate::state::PackageType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestmentLimits {
    pub min_usd: u64,
    pub max_usd: u64,
    /// Smallest deposit accepted into a yield package
    pub yield_min_usd: u64,
    /// Ceiling on the sum of active principal investments
    pub principal_cap_usd: u64,
    /// Ceiling on the sum of active yield-package investments
    pub yield_cap_usd: u64,
    pub liquidity_fee_bps: u32,
}

impl Default for InvestmentLimits {
    fn default() -> Self {
        Self {
            min_usd: 50,
            max_usd: 10_000,
            yield_min_usd: 1_000,
            principal_cap_usd: 10_000,
            yield_cap_usd: 25_000,
            liquidity_fee_bps: 100, // 1%
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    #[error("amount {amount} is outside the accepted range {min}..={max}")]
    OutOfRange { amount: Money, min: Money, max: Money },
    #[error("yield packages start at {min}, got {amount}")]
    BelowYieldMinimum { amount: Money, min: Money },
    #[error("{package} cap exceeded: active {active} + requested {requested} > {cap}")]
    CapExceeded {
        package: PackageType,
        active: Money,
        requested: Money,
        cap: Money,
    },
}

impl InvestmentLimits {
    pub fn cap_for(&self, package: PackageType) -> Money {
        match package {
            PackageType::Principal => usd(self.principal_cap_usd),
            PackageType::Yield => usd(self.yield_cap_usd),
        }
    }

    pub fn check_amount(&self, amount: Money, package: PackageType) -> Result<(), LimitError> {
        let (min, max) = (usd(self.min_usd), usd(self.max_usd));
        if amount < min || amount > max {
            return Err(LimitError::OutOfRange { amount, min, max });
        }
        if package == PackageType::Yield && amount < usd(self.yield_min_usd) {
            return Err(LimitError::BelowYieldMinimum {
                amount,
                min: usd(self.yield_min_usd),
            });
        }
        Ok(())
    }

    /// Reject a deposit that would push the class's active total past its cap
    pub fn check_cap(&self, package: PackageType, active: Money, requested: Money) -> Result<(), LimitError> {
        let cap = self.cap_for(package);
        if add_u128(active, requested) > cap {
            return Err(LimitError::CapExceeded {
                package,
                active,
                requested,
                cap,
            });
        }
        Ok(())
    }

    pub fn liquidity_fee(&self, amount: Money) -> Money {
        mul_bps(amount, self.liquidity_fee_bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_bounds() {
        let limits = InvestmentLimits::default();
        assert!(limits.check_amount(usd(50), PackageType::Principal).is_ok());
        assert!(limits.check_amount(usd(10_000), PackageType::Principal).is_ok());
        assert!(limits.check_amount(usd(49), PackageType::Principal).is_err());
        assert!(limits.check_amount(usd(10_001), PackageType::Principal).is_err());
        assert!(matches!(
            limits.check_amount(usd(500), PackageType::Yield),
            Err(LimitError::BelowYieldMinimum { .. })
        ));
    }

    #[test]
    fn test_caps_are_per_class() {
        let limits = InvestmentLimits::default();
        assert!(limits.check_cap(PackageType::Principal, usd(9_000), usd(1_000)).is_ok());
        assert!(limits.check_cap(PackageType::Principal, usd(9_000), usd(1_001)).is_err());
        assert!(limits.check_cap(PackageType::Yield, usd(20_000), usd(5_000)).is_ok());
        assert!(limits.check_cap(PackageType::Yield, usd(20_000), usd(5_001)).is_err());
    }

    #[test]
    fn test_liquidity_fee() {
        let limits = InvestmentLimits::default();
        assert_eq!(limits.liquidity_fee(usd(500)), usd(5));
    }
}
