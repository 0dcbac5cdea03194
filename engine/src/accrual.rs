//! ROI accrual for one user
//!
//! Runs one period of [`comp_model::accrual::accrue`] over every investment of a user and
//! packs the result into a single [`UserTransaction`].

use crate::ledger::UserTransaction;
use comp_model::accrual::{accrue, AccrualParams, AccrualSkip, Disposition};
use comp_model::{Investment, InvestmentId, Money, Usd, User};

/// Accrual result for one user, ready to commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccrual {
    pub tx: UserTransaction,
    /// Investments accrued this period
    pub accrued: u32,
    /// Net return over all investments
    pub total_net: Money,
    /// Hit the investment cap this period
    pub newly_capped: Vec<InvestmentId>,
    /// Malformed and excluded until reviewed
    pub flagged: Vec<InvestmentId>,
}

pub struct AccrualEngine<'a> {
    params: &'a AccrualParams,
}

impl<'a> AccrualEngine<'a> {
    pub fn new(params: &'a AccrualParams) -> Self {
        Self { params }
    }

    /// Accrue `period` for `user`. Only changed investments end up in the transaction.
    pub fn accrue_user(&self, mut user: User, investments: Vec<Investment>, period: u64) -> UserAccrual {
        let mut changed = Vec::new();
        let mut accrued = 0u32;
        let mut total_net: Money = 0;
        let mut newly_capped = Vec::new();
        let mut flagged = Vec::new();

        for mut inv in investments {
            match accrue(&mut user, &mut inv, self.params) {
                Ok(event) => {
                    accrued += 1;
                    total_net = total_net.saturating_add(event.period_return.net);
                    if event.period_return.taxed {
                        log::debug!("{}: {} return taxed", user.id, inv.id);
                    }
                    if let Disposition::Capped { reinvested, credited } = event.disposition {
                        log::info!(
                            "{}: {} reached the investment cap (reinvested {}, credited {})",
                            user.id,
                            inv.id,
                            Usd(reinvested),
                            Usd(credited)
                        );
                        newly_capped.push(inv.id);
                    }
                    changed.push(inv);
                }
                Err(AccrualSkip::Malformed) => {
                    log::warn!("{}: {} has a zero amount, flagged for review", user.id, inv.id);
                    flagged.push(inv.id);
                    changed.push(inv);
                }
                Err(AccrualSkip::Foreign) => {
                    log::error!("{}: {} belongs to {}, skipped", user.id, inv.id, inv.user_id);
                }
                Err(skip) => {
                    log::trace!("{}: {} not accrued ({:?})", user.id, inv.id, skip);
                }
            }
        }

        user.last_accrual_period = Some(period);
        UserAccrual {
            tx: UserTransaction {
                user,
                investments: changed,
                bonuses: Vec::new(),
            },
            accrued,
            total_net,
            newly_capped,
            flagged,
        }
    }
}
