//! Engine handle
//!
//! Owns the configuration, the injected ledger and the run state shared by the batch
//! entry points ([`crate::orchestrator`]) and the request paths ([`crate::investing`]).

use crate::accrual::AccrualEngine;
use crate::bonus::ReferralBonusEngine;
use crate::config::Config;
use crate::ledger::Ledger;
use crate::rank::RankEvaluator;
use crate::retry_queue::{DeferredBonus, RetryQueue};
use crate::rewards::RewardScheduler;
use crate::run_lock::RunLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Stops the batch run in progress after the users already scheduled
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Engine {
    pub(crate) config: Config,
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) run_lock: RunLock,
    pub(crate) deferred: Mutex<RetryQueue>,
    pub(crate) abort: AbortHandle,
}

impl Engine {
    pub fn new(config: Config, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            config,
            ledger,
            run_lock: RunLock::new(),
            deferred: Mutex::new(RetryQueue::new()),
            abort: AbortHandle::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Stop the run in progress; users already committed stay committed
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Bonus walks waiting for a replay, earliest first
    pub fn deferred_bonuses(&self) -> Vec<DeferredBonus> {
        self.queue().entries()
    }

    pub(crate) fn queue(&self) -> MutexGuard<'_, RetryQueue> {
        self.deferred.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn bonus_engine(&self) -> ReferralBonusEngine<'_> {
        ReferralBonusEngine::new(&*self.ledger, &self.config.bonus, &self.config.batch.retry)
    }

    pub(crate) fn accrual_engine(&self) -> AccrualEngine<'_> {
        AccrualEngine::new(&self.config.accrual)
    }

    pub(crate) fn rank_evaluator(&self) -> RankEvaluator<'_> {
        RankEvaluator::new(&self.config.rank)
    }

    pub(crate) fn reward_scheduler(&self) -> RewardScheduler<'_> {
        RewardScheduler::new(&self.config.rewards)
    }
}
