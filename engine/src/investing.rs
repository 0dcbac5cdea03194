//! Request paths: investment creation, withdrawals, portfolio, on-demand rank and replay
//!
//! Errors here go back to the caller. Nothing is written unless the request is valid.

use crate::bonus::BonusOutcome;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::graph::ReferralGraph;
use crate::ledger::{InvestmentFilter, UserTransaction};
use crate::rank::RankDecision;
use crate::retry_queue::DeferredBonus;
use crate::rewards::total_paid;
use comp_model::math::{add_u128, sub_u128};
use comp_model::{
    parse_usd, Investment, InvestmentId, Money, PackageType, Rank, Usd, User, UserId,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvestmentReceipt {
    pub investment: Investment,
    pub liquidity_fee: Money,
    /// Investor's `investment_total` after the deposit
    pub new_total: Money,
    pub bonuses: BonusOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Portfolio {
    pub user: UserId,
    pub rank: Rank,
    pub balance: Money,
    pub yield_balance: Money,
    pub referral_income: Money,
    pub rank_reward_total: Money,
    pub investment_total: Money,
    pub active_principal: Money,
    pub active_yield: Money,
    /// Return accrued over every investment, capped or not
    pub accrued_roi: Money,
    pub active_investments: usize,
}

fn active_sum(investments: &[Investment], package: PackageType) -> Money {
    investments
        .iter()
        .filter(|i| i.is_active && i.package == package)
        .fold(0, |acc, i| add_u128(acc, i.amount))
}

impl Engine {
    /// Record a new investment and credit the investor's upline
    ///
    /// `amount` is a decimal dollar string. The investment commits before any bonus; a
    /// bonus that cannot be credited is deferred, never rolled back into the investment.
    pub async fn on_new_investment(
        &self,
        user_id: UserId,
        amount: &str,
        package: &str,
        now: u64,
    ) -> EngineResult<InvestmentReceipt> {
        let amount = parse_usd(amount)?;
        let package: PackageType = package.parse()?;
        let limits = &self.config.investment;
        limits.check_amount(amount, package)?;

        let ledger = &*self.ledger;
        let (investor, investment) = self
            .config
            .batch
            .retry
            .run("new investment", || async move {
                let mut user = ledger.get_user(user_id).await?;
                let held = ledger.find_investments(user_id, InvestmentFilter::Active).await?;
                limits.check_cap(package, active_sum(&held, package), amount)?;

                let id = ledger.next_investment_id().await?;
                let inv = Investment::new(id, user_id, package, amount, limits.liquidity_fee(amount), now);
                if package == PackageType::Principal {
                    user.investment_total = add_u128(user.investment_total, amount);
                }
                user.first_investment.get_or_insert(now);

                let user = ledger
                    .commit(UserTransaction::new(user).with_investment(inv.clone()))
                    .await?;
                Ok((user, inv))
            })
            .await?;

        log::info!(
            "{} invested {} ({}), {}",
            user_id,
            Usd(amount),
            package,
            investment.id
        );

        let bonuses = self.dispatch_bonuses(&investor, &investment, now, 0).await;
        Ok(InvestmentReceipt {
            liquidity_fee: investment.liquidity_fee,
            new_total: investor.investment_total,
            investment,
            bonuses,
        })
    }

    /// Debit `balance`
    pub async fn withdraw(&self, user_id: UserId, amount: &str) -> EngineResult<User> {
        let amount = parse_usd(amount)?;
        if amount == 0 {
            return Err(EngineError::Validation("withdrawal amount must be positive".into()));
        }
        let ledger = &*self.ledger;
        let user = self
            .config
            .batch
            .retry
            .run("withdrawal", || async move {
                let mut user = ledger.get_user(user_id).await?;
                if user.balance < amount {
                    return Err(EngineError::InsufficientBalance {
                        available: Usd(user.balance),
                        requested: Usd(amount),
                    });
                }
                user.balance = sub_u128(user.balance, amount);
                Ok(ledger.save_user(user).await?)
            })
            .await?;
        log::info!("{} withdrew {}", user_id, Usd(amount));
        Ok(user)
    }

    pub async fn portfolio(&self, user_id: UserId) -> EngineResult<Portfolio> {
        let user = self.ledger.get_user(user_id).await?;
        let investments = self
            .ledger
            .find_investments(user_id, InvestmentFilter::All)
            .await?;
        Ok(Portfolio {
            user: user.id,
            rank: user.rank,
            balance: user.balance,
            yield_balance: user.yield_balance,
            referral_income: user.referral_income,
            rank_reward_total: user.rewards.rank_reward_total,
            investment_total: user.investment_total,
            active_principal: active_sum(&investments, PackageType::Principal),
            active_yield: active_sum(&investments, PackageType::Yield),
            accrued_roi: investments
                .iter()
                .fold(0, |acc, i| add_u128(acc, i.daily_roi)),
            active_investments: investments.iter().filter(|i| i.is_active).count(),
        })
    }

    /// Evaluate one user's rank against their current downline and apply the result
    pub async fn evaluate_rank(&self, user_id: UserId, now: u64) -> EngineResult<RankDecision> {
        // One extra level so legs at the depth limit still see their own children
        let depth = self.config.rank.max_depth.saturating_add(1);
        let graph = ReferralGraph::load_downline(&*self.ledger, user_id, depth).await?;
        let (decision, _) = self.apply_rank(user_id, &graph, now).await?;
        Ok(decision)
    }

    /// Re-run the bonus walk of an investment; levels already paid are skipped
    pub async fn replay_investment_bonuses(
        &self,
        investment_id: InvestmentId,
        now: u64,
    ) -> EngineResult<BonusOutcome> {
        let inv = self.ledger.get_investment(investment_id).await?;
        let investor = self.ledger.get_user(inv.user_id).await?;
        self.queue().remove(&investment_id);
        Ok(self.dispatch_bonuses(&investor, &inv, now, 0).await)
    }

    /// Run the bonus walk and park it in the retry queue if it did not finish
    pub(crate) async fn dispatch_bonuses(
        &self,
        investor: &User,
        inv: &Investment,
        now: u64,
        prior_attempts: u32,
    ) -> BonusOutcome {
        let outcome = self.bonus_engine().on_investment(investor, inv, now).await;
        if let Some(error) = &outcome.deferred {
            self.defer_bonus(inv.id, prior_attempts + 1, now, error.clone());
        }
        outcome
    }

    pub(crate) fn defer_bonus(&self, investment_id: InvestmentId, attempts: u32, now: u64, error: String) {
        let batch = &self.config.batch;
        if attempts > batch.deferred_max_attempts {
            log::error!(
                "Bonus walk for {} failed {} times, dropped: {}",
                investment_id,
                attempts,
                error
            );
            return;
        }
        let factor = 1u64.checked_shl(attempts - 1).unwrap_or(u64::MAX);
        let delay = batch.deferred_backoff_secs.saturating_mul(factor);
        let next_attempt_at = now.saturating_add(delay);
        log::warn!(
            "Bonus walk for {} deferred until {} (attempt {})",
            investment_id,
            next_attempt_at,
            attempts
        );
        self.queue().push(DeferredBonus {
            investment_id,
            attempts,
            next_attempt_at,
            last_error: error,
        });
    }

    /// Evaluate `user_id` on `graph` and commit any change with its entry rewards.
    /// Returns the decision and the rewards it paid.
    pub(crate) async fn apply_rank(
        &self,
        user_id: UserId,
        graph: &ReferralGraph,
        now: u64,
    ) -> EngineResult<(RankDecision, Money)> {
        let ledger = &*self.ledger;
        let evaluator = self.rank_evaluator();
        let rewards = self.reward_scheduler();
        let evaluator = &evaluator;
        let rewards = &rewards;

        self.config
            .batch
            .retry
            .run("rank evaluation", || async move {
                let mut user = ledger.get_user(user_id).await?;
                let decision = evaluator.evaluate(&user, graph, now)?;
                if !decision.changes(&user) {
                    return Ok((decision, 0));
                }

                user.rank = decision.to;
                user.plus_progress = decision.plus_progress;
                let mut paid = 0;
                if decision.promoted() {
                    paid = total_paid(&rewards.on_promotion(&mut user, now));
                    log::info!("{} promoted {} -> {}", user_id, decision.from, decision.to);
                }
                ledger.save_user(user).await?;
                Ok((decision, paid))
            })
            .await
    }
}
