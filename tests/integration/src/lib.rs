//! Integration test support
//!
//! [`FlakyLedger`] wraps the in-memory ledger and can fail a user's next commits or run a
//! hook after each successful one, so batch behavior under store failures and aborts can
//! be driven deterministically.

use async_trait::async_trait;
use comp_model::{BonusKey, BonusRecord, Investment, InvestmentId, User, UserId};
use std::collections::HashMap;
use std::sync::Mutex;
use tmc_engine::{
    BatchKind, Config, InvestmentFilter, Ledger, LedgerError, MemoryLedger, RetryPolicy,
    UserTransaction,
};

type CommitHook = Box<dyn Fn(&User) + Send + Sync>;

pub struct FlakyLedger {
    inner: MemoryLedger,
    failures: Mutex<HashMap<UserId, u32>>,
    hook: Mutex<Option<CommitHook>>,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self {
            inner: MemoryLedger::new(),
            failures: Mutex::new(HashMap::new()),
            hook: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &MemoryLedger {
        &self.inner
    }

    /// Fail the next `n` commits on `user` with a transient error
    pub fn fail_commits(&self, user: UserId, n: u32) {
        self.failures.lock().unwrap().insert(user, n);
    }

    /// Run `hook` after every successful commit
    pub fn on_commit(&self, hook: impl Fn(&User) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    fn take_failure(&self, user: UserId) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&user) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Default for FlakyLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn get_user(&self, id: UserId) -> Result<User, LedgerError> {
        self.inner.get_user(id).await
    }

    async fn create_user(&self, user: User) -> Result<User, LedgerError> {
        self.inner.create_user(user).await
    }

    async fn list_users(&self) -> Result<Vec<User>, LedgerError> {
        self.inner.list_users().await
    }

    async fn find_investments(
        &self,
        user: UserId,
        filter: InvestmentFilter,
    ) -> Result<Vec<Investment>, LedgerError> {
        self.inner.find_investments(user, filter).await
    }

    async fn get_investment(&self, id: InvestmentId) -> Result<Investment, LedgerError> {
        self.inner.get_investment(id).await
    }

    async fn save_investment(&self, inv: Investment) -> Result<(), LedgerError> {
        self.inner.save_investment(inv).await
    }

    async fn next_investment_id(&self) -> Result<InvestmentId, LedgerError> {
        self.inner.next_investment_id().await
    }

    async fn find_downline(&self, user: UserId) -> Result<Vec<User>, LedgerError> {
        self.inner.find_downline(user).await
    }

    async fn count_direct(&self, user: UserId) -> Result<u32, LedgerError> {
        self.inner.count_direct(user).await
    }

    async fn find_bonus(&self, key: &BonusKey) -> Result<Option<BonusRecord>, LedgerError> {
        self.inner.find_bonus(key).await
    }

    async fn bonuses_for(&self, investment: InvestmentId) -> Result<Vec<BonusRecord>, LedgerError> {
        self.inner.bonuses_for(investment).await
    }

    async fn commit(&self, tx: UserTransaction) -> Result<User, LedgerError> {
        if self.take_failure(tx.user.id) {
            return Err(LedgerError::Unavailable(format!(
                "injected failure for {}",
                tx.user.id
            )));
        }
        let user = self.inner.commit(tx).await?;
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(&user);
        }
        Ok(user)
    }

    async fn run_marker(&self, kind: BatchKind) -> Result<Option<u64>, LedgerError> {
        self.inner.run_marker(kind).await
    }

    async fn set_run_marker(&self, kind: BatchKind, period: u64) -> Result<(), LedgerError> {
        self.inner.set_run_marker(kind, period).await
    }
}

/// A valid payout address derived from `id`
pub fn address(id: u64) -> String {
    let mut key = [0u8; 32];
    key[..8].copy_from_slice(&id.to_le_bytes());
    key[31] = 1;
    bs58::encode(key).into_string()
}

/// Production parameters with fast retries
pub fn test_config() -> Config {
    let mut config = Config::default_params();
    config.batch.retry = RetryPolicy {
        max_attempts: 3,
        base_backoff_ms: 1,
        max_backoff_ms: 5,
    };
    config
}

/// Register `(id, referrer)` pairs in order, each with a payout address
pub async fn seed(ledger: &dyn Ledger, users: &[(u64, Option<u64>)]) {
    for (id, referrer) in users {
        let mut user = User::new(UserId(*id), 0).with_payout_address(address(*id));
        user.referrer_id = referrer.map(UserId);
        ledger.create_user(user).await.unwrap();
    }
}
