//! Referral bonus engine
//!
//! A new investment walks the investor's upline. The direct referrer receives the direct
//! bonus on `balance`; every ancestor up to `max_depth` receives level ROI on
//! `referral_income`. Each credit is its own transaction on the recipient, tagged with a
//! [`BonusKey`], so a replayed walk pays only what is still missing.

use crate::error::{EngineError, EngineResult, LedgerError};
use crate::ledger::{Ledger, UserTransaction};
use crate::retry::RetryPolicy;
use comp_model::level::{level_roi, BonusParams};
use comp_model::math::{add_u128, mul_bps};
use comp_model::{BonusKey, BonusKind, BonusRecord, Investment, Money, Usd, User, UserId};
use std::collections::HashSet;

/// What a bonus walk did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BonusOutcome {
    /// Credits committed by this walk
    pub credited: Vec<BonusRecord>,
    /// Credits skipped because their key was already recorded
    pub already_paid: u32,
    /// A credit or upline lookup failed transiently; the walk must be replayed
    pub deferred: Option<String>,
    /// Credits rejected for good
    pub failed: Vec<(BonusKey, String)>,
    /// Upline cycle that stopped the walk
    pub cycle_at: Option<UserId>,
}

impl BonusOutcome {
    pub fn total_credited(&self) -> Money {
        self.credited.iter().fold(0, |acc, r| add_u128(acc, r.value))
    }

    pub fn is_complete(&self) -> bool {
        self.deferred.is_none()
    }
}

enum Credit {
    Paid,
    AlreadyPaid,
}

pub struct ReferralBonusEngine<'a> {
    ledger: &'a dyn Ledger,
    params: &'a BonusParams,
    retry: &'a RetryPolicy,
}

impl<'a> ReferralBonusEngine<'a> {
    pub fn new(ledger: &'a dyn Ledger, params: &'a BonusParams, retry: &'a RetryPolicy) -> Self {
        Self {
            ledger,
            params,
            retry,
        }
    }

    /// Credit the upline of `investor` for `inv`. Never fails the investment itself.
    pub async fn on_investment(&self, investor: &User, inv: &Investment, now: u64) -> BonusOutcome {
        let mut outcome = BonusOutcome::default();
        let mut visited = HashSet::from([investor.id]);
        let mut current = investor.referrer_id;
        let mut level: u16 = 1;

        while let Some(recipient_id) = current {
            if level > self.params.max_depth {
                break;
            }
            if !visited.insert(recipient_id) {
                log::error!(
                    "Referral cycle at {} while crediting {}, walk stopped",
                    recipient_id,
                    inv.id
                );
                outcome.cycle_at = Some(recipient_id);
                break;
            }

            let recipient = match self.lookup(recipient_id).await {
                Ok(r) => r,
                Err(e) if e.is_transient() => {
                    log::warn!("Bonus walk for {} deferred at level {}: {}", inv.id, level, e);
                    outcome.deferred = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    log::error!("Bonus walk for {} stopped at level {}: {}", inv.id, level, e);
                    break;
                }
            };

            if level == 1 {
                let direct = self.direct_record(inv, recipient_id, now);
                self.apply(direct, &mut outcome).await;
            }
            let level_record = self.level_record(inv, &recipient, level, now);
            if let Some(record) = level_record {
                self.apply(record, &mut outcome).await;
            }

            current = recipient.user.referrer_id;
            level += 1;
        }

        if !outcome.credited.is_empty() {
            log::info!(
                "{}: credited {} bonuses totalling {} to the upline of {}",
                inv.id,
                outcome.credited.len(),
                Usd(outcome.total_credited()),
                investor.id
            );
        }
        outcome
    }

    async fn lookup(&self, id: UserId) -> EngineResult<Recipient> {
        let ledger = self.ledger;
        self.retry
            .run("upline lookup", || async move {
                let user = ledger.get_user(id).await?;
                let direct_referrals = ledger.count_direct(id).await?;
                Ok(Recipient {
                    user,
                    direct_referrals,
                })
            })
            .await
    }

    fn direct_record(&self, inv: &Investment, recipient: UserId, now: u64) -> BonusRecord {
        BonusRecord {
            key: BonusKey {
                investment_id: inv.id,
                level: 1,
                kind: BonusKind::Direct,
            },
            recipient,
            source_user: inv.user_id,
            percentage_bps: self.params.direct_bps,
            value: mul_bps(inv.amount, self.params.direct_bps),
            created_at: now,
        }
    }

    fn level_record(
        &self,
        inv: &Investment,
        recipient: &Recipient,
        level: u16,
        now: u64,
    ) -> Option<BonusRecord> {
        let roi = level_roi(level, recipient.direct_referrals, inv.amount, &self.params.level);
        (roi.value > 0).then(|| BonusRecord {
            key: BonusKey {
                investment_id: inv.id,
                level,
                kind: BonusKind::LevelRoi,
            },
            recipient: recipient.user.id,
            source_user: inv.user_id,
            percentage_bps: roi.bps,
            value: roi.value,
            created_at: now,
        })
    }

    async fn apply(&self, record: BonusRecord, outcome: &mut BonusOutcome) {
        match self.credit(&record).await {
            Ok(Credit::Paid) => outcome.credited.push(record),
            Ok(Credit::AlreadyPaid) => outcome.already_paid += 1,
            Err(e) if e.is_transient() => {
                log::warn!("Bonus {} to {} deferred: {}", record.key, record.recipient, e);
                outcome.deferred = Some(e.to_string());
            }
            Err(e) => {
                log::error!("Bonus {} to {} rejected: {}", record.key, record.recipient, e);
                outcome.failed.push((record.key, e.to_string()));
            }
        }
    }

    /// Commit one credit on the recipient; a key already on record is a no-op
    async fn credit(&self, record: &BonusRecord) -> EngineResult<Credit> {
        let ledger = self.ledger;
        self.retry
            .run("bonus credit", || async move {
                if ledger.find_bonus(&record.key).await?.is_some() {
                    return Ok(Credit::AlreadyPaid);
                }
                let mut user = ledger.get_user(record.recipient).await?;
                match record.key.kind {
                    BonusKind::Direct => user.balance = add_u128(user.balance, record.value),
                    BonusKind::LevelRoi => {
                        user.referral_income = add_u128(user.referral_income, record.value)
                    }
                }
                let tx = UserTransaction::new(user).with_bonus(record.clone());
                match ledger.commit(tx).await {
                    Ok(_) => Ok(Credit::Paid),
                    // Lost a race with another walk of the same investment
                    Err(LedgerError::DuplicateBonus(_)) => Ok(Credit::AlreadyPaid),
                    Err(e) => Err(EngineError::from(e)),
                }
            })
            .await
    }
}

struct Recipient {
    user: User,
    direct_referrals: u32,
}
