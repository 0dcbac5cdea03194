//! Ledger accessor
//!
//! The engine never touches storage directly. Everything goes through [`Ledger`], held as
//! `Arc<dyn Ledger>`, so the bundled [`crate::memory::MemoryLedger`] can be swapped for a
//! database-backed store.

use crate::error::LedgerError;
use crate::run_lock::BatchKind;
use async_trait::async_trait;
use comp_model::{BonusKey, BonusRecord, Investment, InvestmentId, User, UserId};

/// Which of a user's investments to return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvestmentFilter {
    #[default]
    All,
    /// `is_active`, capped or not
    Active,
    /// Still eligible for accrual
    Accruing,
}

impl InvestmentFilter {
    pub fn matches(&self, inv: &Investment) -> bool {
        match self {
            InvestmentFilter::All => true,
            InvestmentFilter::Active => inv.is_active,
            InvestmentFilter::Accruing => inv.accrues(),
        }
    }
}

/// Every mutation of one user, committed atomically
///
/// `user.version` must match the stored record; the ledger bumps it on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTransaction {
    pub user: User,
    /// New or updated investments, all owned by `user`
    pub investments: Vec<Investment>,
    /// Bonus credits received by `user`
    pub bonuses: Vec<BonusRecord>,
}

impl UserTransaction {
    pub fn new(user: User) -> Self {
        Self {
            user,
            investments: Vec::new(),
            bonuses: Vec::new(),
        }
    }

    pub fn with_investment(mut self, inv: Investment) -> Self {
        self.investments.push(inv);
        self
    }

    pub fn with_bonus(mut self, record: BonusRecord) -> Self {
        self.bonuses.push(record);
        self
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<User, LedgerError>;

    /// Register a user. The referrer, if any, must already exist.
    async fn create_user(&self, user: User) -> Result<User, LedgerError>;

    async fn list_users(&self) -> Result<Vec<User>, LedgerError>;

    async fn find_investments(
        &self,
        user: UserId,
        filter: InvestmentFilter,
    ) -> Result<Vec<Investment>, LedgerError>;

    async fn get_investment(&self, id: InvestmentId) -> Result<Investment, LedgerError>;

    async fn save_investment(&self, inv: Investment) -> Result<(), LedgerError>;

    async fn next_investment_id(&self) -> Result<InvestmentId, LedgerError>;

    /// Direct referrals of `user`
    async fn find_downline(&self, user: UserId) -> Result<Vec<User>, LedgerError>;

    async fn count_direct(&self, user: UserId) -> Result<u32, LedgerError>;

    async fn find_bonus(&self, key: &BonusKey) -> Result<Option<BonusRecord>, LedgerError>;

    /// Bonus records generated by one investment
    async fn bonuses_for(&self, investment: InvestmentId) -> Result<Vec<BonusRecord>, LedgerError>;

    /// Apply a [`UserTransaction`] all-or-nothing and return the stored user
    async fn commit(&self, tx: UserTransaction) -> Result<User, LedgerError>;

    /// Last completed period of a batch kind
    async fn run_marker(&self, kind: BatchKind) -> Result<Option<u64>, LedgerError>;

    async fn set_run_marker(&self, kind: BatchKind, period: u64) -> Result<(), LedgerError>;

    /// Version-checked write of the user record alone
    async fn save_user(&self, user: User) -> Result<User, LedgerError> {
        self.commit(UserTransaction::new(user)).await
    }
}
