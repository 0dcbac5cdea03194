//! Batch orchestrator
//!
//! `run_daily_accrual` and `run_monthly_rewards` are the only batch entry points. Each user is
//! processed in its own retried transaction through a bounded worker pool; a failing user is
//! recorded in the [`RunSummary`] and never stops the run.

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::graph::ReferralGraph;
use crate::ledger::InvestmentFilter;
use crate::rewards::total_paid;
use crate::run_lock::BatchKind;
use comp_model::math::add_u128;
use comp_model::{Money, Rank, Usd, User, UserId};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;

/// Payout addresses are base58-encoded 32-byte keys
pub fn check_payout_address(user: &User) -> EngineResult<()> {
    let Some(address) = user.payout_address.as_deref() else {
        return Err(EngineError::Integrity(format!("{} has no payout address", user.id)));
    };
    match bs58::decode(address).into_vec() {
        Ok(bytes) if bytes.len() == 32 => Ok(()),
        _ => Err(EngineError::Integrity(format!(
            "{} has an invalid payout address",
            user.id
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserNote {
    pub user: UserId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Promotion {
    pub user: UserId,
    pub from: Rank,
    pub to: Rank,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub kind: BatchKind,
    pub period: u64,
    pub started_at: u64,
    /// Users listed at the start of the run
    pub users: usize,
    pub processed: usize,
    /// Already handled in this period by an earlier, interrupted run
    pub already_done: usize,
    pub skipped: Vec<UserNote>,
    pub failures: Vec<UserNote>,
    /// Failures that exhausted their store retries; the period stays open for them
    pub transient_failures: usize,
    pub investments_accrued: u32,
    pub investments_capped: u32,
    pub investments_flagged: u32,
    pub total_accrued: Money,
    pub promotions: Vec<Promotion>,
    pub rewards_paid: Money,
    /// Deferred bonus walks completed by this run
    pub bonuses_replayed: u32,
    /// Bonus walks still waiting after this run
    pub bonuses_deferred: usize,
    pub aborted: bool,
}

impl RunSummary {
    fn new(kind: BatchKind, period: u64, started_at: u64) -> Self {
        Self {
            kind,
            period,
            started_at,
            users: 0,
            processed: 0,
            already_done: 0,
            skipped: Vec::new(),
            failures: Vec::new(),
            transient_failures: 0,
            investments_accrued: 0,
            investments_capped: 0,
            investments_flagged: 0,
            total_accrued: 0,
            promotions: Vec::new(),
            rewards_paid: 0,
            bonuses_replayed: 0,
            bonuses_deferred: 0,
            aborted: false,
        }
    }

    /// No failures and not aborted
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.aborted
    }

    pub fn failed(&self, user: UserId) -> bool {
        self.failures.iter().any(|n| n.user == user)
    }

    /// Whether the period is complete and its marker may be written
    pub fn closes_period(&self) -> bool {
        !self.aborted && self.transient_failures == 0
    }

    fn fail(&mut self, user: UserId, error: &EngineError) {
        log::error!("{}: {}", user, error);
        if error.is_transient() {
            self.transient_failures += 1;
        }
        self.failures.push(UserNote {
            user,
            reason: error.to_string(),
        });
    }

    fn log(&self) {
        log::info!(
            "{} run for period {} finished: {} processed, {} already done, {} skipped, {} failed, {} promoted{}",
            self.kind,
            self.period,
            self.processed,
            self.already_done,
            self.skipped.len(),
            self.failures.len(),
            self.promotions.len(),
            if self.aborted { " (aborted)" } else { "" }
        );
        match serde_json::to_string(self) {
            Ok(json) => log::info!("run_summary {}", json),
            Err(e) => log::warn!("Failed to serialize run summary: {}", e),
        }
    }
}

enum Step<T> {
    Done(T),
    AlreadyDone,
    Aborted,
}

struct AccrualStats {
    accrued: u32,
    net: Money,
    capped: u32,
    flagged: u32,
}

impl Engine {
    /// Daily batch: deferred bonuses, accrual for every user, bottom-up rank evaluation
    pub async fn run_daily_accrual(&self, now: u64) -> EngineResult<RunSummary> {
        let kind = BatchKind::DailyAccrual;
        let _guard = self.run_lock.try_acquire(kind)?;
        let period = kind.period_of(now);
        self.ensure_not_ran(kind, period).await?;
        self.abort.reset();

        log::info!("Starting {} run for period {}", kind, period);
        let mut summary = RunSummary::new(kind, period, now);

        self.replay_deferred_bonuses(now, &mut summary).await;

        let users = self.ledger.list_users().await?;
        let eligible = self.screen_addresses(&users, &mut summary);

        let mut results: Vec<(UserId, EngineResult<Step<AccrualStats>>)> =
            stream::iter(eligible.iter().copied())
                .map(|id| async move { (id, self.accrue_one(id, period).await) })
                .buffer_unordered(self.workers())
                .collect()
                .await;
        results.sort_by_key(|(id, _)| *id);

        for (id, result) in results {
            match result {
                Ok(Step::Done(stats)) => {
                    summary.processed += 1;
                    summary.investments_accrued += stats.accrued;
                    summary.investments_capped += stats.capped;
                    summary.investments_flagged += stats.flagged;
                    summary.total_accrued = add_u128(summary.total_accrued, stats.net);
                }
                Ok(Step::AlreadyDone) => summary.already_done += 1,
                Ok(Step::Aborted) => summary.aborted = true,
                Err(e) => summary.fail(id, &e),
            }
        }

        if !summary.aborted {
            let eligible: HashSet<UserId> = eligible.into_iter().collect();
            self.evaluate_ranks(&eligible, now, &mut summary).await?;
        }

        self.finish(kind, &mut summary).await?;
        Ok(summary)
    }

    /// Monthly batch: entry-reward sweep and the held tier's stipend for every user
    pub async fn run_monthly_rewards(&self, now: u64) -> EngineResult<RunSummary> {
        let kind = BatchKind::MonthlyRewards;
        let _guard = self.run_lock.try_acquire(kind)?;
        let period = kind.period_of(now);
        self.ensure_not_ran(kind, period).await?;
        self.abort.reset();

        log::info!("Starting {} run for period {}", kind, period);
        let mut summary = RunSummary::new(kind, period, now);

        let users = self.ledger.list_users().await?;
        let eligible = self.screen_addresses(&users, &mut summary);

        let mut results: Vec<(UserId, EngineResult<Step<Money>>)> =
            stream::iter(eligible.iter().copied())
                .map(|id| async move { (id, self.reward_one(id, period, now).await) })
                .buffer_unordered(self.workers())
                .collect()
                .await;
        results.sort_by_key(|(id, _)| *id);

        for (id, result) in results {
            match result {
                Ok(Step::Done(paid)) => {
                    summary.processed += 1;
                    summary.rewards_paid = add_u128(summary.rewards_paid, paid);
                }
                Ok(Step::AlreadyDone) => summary.already_done += 1,
                Ok(Step::Aborted) => summary.aborted = true,
                Err(e) => summary.fail(id, &e),
            }
        }

        self.finish(kind, &mut summary).await?;
        Ok(summary)
    }

    async fn ensure_not_ran(&self, kind: BatchKind, period: u64) -> EngineResult<()> {
        match self.ledger.run_marker(kind).await? {
            Some(last) if last >= period => Err(EngineError::AlreadyRan { kind, period }),
            _ => Ok(()),
        }
    }

    /// Record the period unless the run was aborted or left users to retry, then report.
    /// An open period is rerun on the next tick; users already done are passed over.
    async fn finish(&self, kind: BatchKind, summary: &mut RunSummary) -> EngineResult<()> {
        summary.bonuses_deferred = self.queue().len();
        if summary.closes_period() {
            self.ledger.set_run_marker(kind, summary.period).await?;
        } else {
            log::warn!("{} run period {} left open", kind, summary.period);
        }
        summary.log();
        Ok(())
    }

    /// Users processed concurrently; a zero limit would never poll the stream
    fn workers(&self) -> usize {
        self.config.batch.concurrency.max(1)
    }

    /// Users with a usable payout address; the rest are skipped with a warning
    fn screen_addresses(&self, users: &[User], summary: &mut RunSummary) -> Vec<UserId> {
        summary.users = users.len();
        let mut eligible = Vec::with_capacity(users.len());
        for user in users {
            match check_payout_address(user) {
                Ok(()) => eligible.push(user.id),
                Err(e) => {
                    log::warn!("Skipping {}: {}", user.id, e);
                    summary.skipped.push(UserNote {
                        user: user.id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        eligible
    }

    async fn accrue_one(&self, user_id: UserId, period: u64) -> EngineResult<Step<AccrualStats>> {
        if self.abort.is_aborted() {
            return Ok(Step::Aborted);
        }
        let ledger = &*self.ledger;
        let accrual = self.accrual_engine();
        let accrual = &accrual;
        self.config
            .batch
            .retry
            .run("accrual", || async move {
                let user = ledger.get_user(user_id).await?;
                if user.last_accrual_period.is_some_and(|p| p >= period) {
                    return Ok(Step::AlreadyDone);
                }
                let investments = ledger
                    .find_investments(user_id, InvestmentFilter::Active)
                    .await?;
                let result = accrual.accrue_user(user, investments, period);
                let stats = AccrualStats {
                    accrued: result.accrued,
                    net: result.total_net,
                    capped: u32::try_from(result.newly_capped.len()).unwrap_or(u32::MAX),
                    flagged: u32::try_from(result.flagged.len()).unwrap_or(u32::MAX),
                };
                ledger.commit(result.tx).await?;
                log::debug!("{}: accrued {} over {} investments", user_id, Usd(stats.net), stats.accrued);
                Ok(Step::Done(stats))
            })
            .await
    }

    async fn reward_one(&self, user_id: UserId, period: u64, now: u64) -> EngineResult<Step<Money>> {
        if self.abort.is_aborted() {
            return Ok(Step::Aborted);
        }
        let ledger = &*self.ledger;
        let rewards = self.reward_scheduler();
        let rewards = &rewards;
        self.config
            .batch
            .retry
            .run("monthly rewards", || async move {
                let mut user = ledger.get_user(user_id).await?;
                if user.last_reward_period.is_some_and(|p| p >= period) {
                    return Ok(Step::AlreadyDone);
                }
                let paid = total_paid(&rewards.monthly(&mut user, now));
                user.last_reward_period = Some(period);
                ledger.save_user(user).await?;
                Ok(Step::Done(paid))
            })
            .await
    }

    /// Bottom-up over a fresh graph snapshot; each promotion is written back into the
    /// snapshot so the upline sees it in the same pass
    async fn evaluate_ranks(
        &self,
        eligible: &HashSet<UserId>,
        now: u64,
        summary: &mut RunSummary,
    ) -> EngineResult<()> {
        let mut graph = ReferralGraph::load(&*self.ledger).await?;
        let order = graph.bottom_up_order();

        for id in order.cyclic.iter().filter(|id| eligible.contains(id)) {
            let err = EngineError::Integrity(format!("{} sits in a referral cycle", id));
            summary.fail(*id, &err);
        }

        for id in order.users {
            if self.abort.is_aborted() {
                summary.aborted = true;
                break;
            }
            if !eligible.contains(&id) || graph.children(id).is_empty() {
                continue;
            }
            match self.apply_rank(id, &graph, now).await {
                Ok((decision, paid)) => {
                    summary.rewards_paid = add_u128(summary.rewards_paid, paid);
                    if decision.promoted() {
                        graph.set_rank(id, decision.to);
                        summary.promotions.push(Promotion {
                            user: id,
                            from: decision.from,
                            to: decision.to,
                        });
                    }
                }
                Err(e) => {
                    if !summary.failed(id) {
                        summary.fail(id, &e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn replay_deferred_bonuses(&self, now: u64, summary: &mut RunSummary) {
        let due = self.queue().pop_due(now);
        if due.is_empty() {
            return;
        }
        log::info!("Replaying {} deferred bonus walks", due.len());

        for entry in due {
            let loaded = async {
                let inv = self.ledger.get_investment(entry.investment_id).await?;
                let investor = self.ledger.get_user(inv.user_id).await?;
                Ok::<_, EngineError>((inv, investor))
            }
            .await;

            match loaded {
                Ok((inv, investor)) => {
                    let outcome = self
                        .dispatch_bonuses(&investor, &inv, now, entry.attempts)
                        .await;
                    if outcome.is_complete() {
                        summary.bonuses_replayed += 1;
                    }
                }
                Err(e) if e.is_transient() => {
                    self.defer_bonus(entry.investment_id, entry.attempts + 1, now, e.to_string());
                }
                Err(e) => {
                    log::error!(
                        "Deferred bonus walk for {} dropped: {}",
                        entry.investment_id,
                        e
                    );
                }
            }
        }
    }
}
