//! In-memory ledger with bincode snapshots

use crate::error::LedgerError;
use crate::ledger::{InvestmentFilter, Ledger, UserTransaction};
use crate::run_lock::BatchKind;
use async_trait::async_trait;
use comp_model::{
    investment_transition_ok, user_transition_ok, BonusKey, BonusRecord, Investment,
    InvestmentId, User, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct LedgerState {
    users: BTreeMap<UserId, User>,
    investments: BTreeMap<InvestmentId, Investment>,
    bonuses: BTreeMap<BonusKey, BonusRecord>,
    markers: BTreeMap<BatchKind, u64>,
    next_investment: u64,
}

impl LedgerState {
    fn user(&self, id: UserId) -> Result<&User, LedgerError> {
        self.users
            .get(&id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    /// Validate every part of `tx` before anything is written
    fn check(&self, tx: &UserTransaction) -> Result<(), LedgerError> {
        let stored = self.user(tx.user.id)?;
        if stored.version != tx.user.version {
            return Err(LedgerError::StaleVersion {
                entity: tx.user.id.to_string(),
                stored: stored.version,
                attempted: tx.user.version,
            });
        }
        if !user_transition_ok(stored, &tx.user) {
            return Err(LedgerError::Invariant(format!(
                "{}: rank or reward history moved backwards",
                tx.user.id
            )));
        }

        for inv in &tx.investments {
            if inv.user_id != tx.user.id {
                return Err(LedgerError::Invariant(format!(
                    "{} is owned by {}, not {}",
                    inv.id, inv.user_id, tx.user.id
                )));
            }
            self.check_investment(inv)?;
        }

        let mut keys = HashSet::new();
        for record in &tx.bonuses {
            if record.recipient != tx.user.id {
                return Err(LedgerError::Invariant(format!(
                    "bonus {} is addressed to {}, not {}",
                    record.key, record.recipient, tx.user.id
                )));
            }
            if self.bonuses.contains_key(&record.key) || !keys.insert(record.key) {
                return Err(LedgerError::DuplicateBonus(record.key));
            }
        }
        Ok(())
    }

    fn check_investment(&self, inv: &Investment) -> Result<(), LedgerError> {
        if let Some(before) = self.investments.get(&inv.id) {
            if !investment_transition_ok(before, inv) {
                return Err(LedgerError::Invariant(format!(
                    "{}: principal, owner or accrual history changed",
                    inv.id
                )));
            }
        }
        Ok(())
    }
}

/// Reference [`Ledger`] implementation
///
/// All writes go through one `RwLock` write guard, which makes [`Ledger::commit`] atomic.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot, or start empty when the file does not exist yet
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?
        {
            Self::load_snapshot(path).await
        } else {
            log::info!("No snapshot at {}, starting with an empty ledger", path.display());
            Ok(Self::new())
        }
    }

    pub async fn load_snapshot(path: &Path) -> Result<Self, LedgerError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let state: LedgerState =
            bincode::deserialize(&bytes).map_err(|e| LedgerError::Corrupt(e.to_string()))?;
        log::info!(
            "Loaded snapshot {} ({} users, {} investments, {} bonus records)",
            path.display(),
            state.users.len(),
            state.investments.len(),
            state.bonuses.len()
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Write the full state to `path`, via a temporary file and a rename
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), LedgerError> {
        let bytes = {
            let state = self.state.read().await;
            bincode::serialize(&*state).map_err(|e| LedgerError::Corrupt(e.to_string()))?
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| LedgerError::Unavailable(format!("{}: {}", dir.display(), e)))?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("{}: {}", path.display(), e)))?;
        log::debug!("Saved snapshot to {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    /// Insert a user record as-is, bypassing referrer and version checks.
    /// Meant for migrating existing data.
    pub async fn import_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }

    /// Insert an investment record as-is. Meant for migrating existing data.
    pub async fn import_investment(&self, inv: Investment) {
        let mut state = self.state.write().await;
        state.next_investment = state.next_investment.max(inv.id.0);
        state.investments.insert(inv.id, inv);
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_user(&self, id: UserId) -> Result<User, LedgerError> {
        self.state.read().await.user(id).cloned()
    }

    async fn create_user(&self, mut user: User) -> Result<User, LedgerError> {
        let mut state = self.state.write().await;
        if state.users.contains_key(&user.id) {
            return Err(LedgerError::Invariant(format!("{} already exists", user.id)));
        }
        if let Some(referrer) = user.referrer_id {
            if referrer == user.id {
                return Err(LedgerError::Invariant(format!("{} cannot refer itself", user.id)));
            }
            state.user(referrer)?;
        }
        user.version = 0;
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>, LedgerError> {
        Ok(self.state.read().await.users.values().cloned().collect())
    }

    async fn find_investments(
        &self,
        user: UserId,
        filter: InvestmentFilter,
    ) -> Result<Vec<Investment>, LedgerError> {
        let state = self.state.read().await;
        state.user(user)?;
        Ok(state
            .investments
            .values()
            .filter(|inv| inv.user_id == user && filter.matches(inv))
            .cloned()
            .collect())
    }

    async fn get_investment(&self, id: InvestmentId) -> Result<Investment, LedgerError> {
        self.state
            .read()
            .await
            .investments
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    async fn save_investment(&self, inv: Investment) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        state.user(inv.user_id)?;
        state.check_investment(&inv)?;
        state.investments.insert(inv.id, inv);
        Ok(())
    }

    async fn next_investment_id(&self) -> Result<InvestmentId, LedgerError> {
        let mut state = self.state.write().await;
        state.next_investment += 1;
        Ok(InvestmentId(state.next_investment))
    }

    async fn find_downline(&self, user: UserId) -> Result<Vec<User>, LedgerError> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .filter(|u| u.referrer_id == Some(user))
            .cloned()
            .collect())
    }

    async fn count_direct(&self, user: UserId) -> Result<u32, LedgerError> {
        let n = self
            .state
            .read()
            .await
            .users
            .values()
            .filter(|u| u.referrer_id == Some(user))
            .count();
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }

    async fn find_bonus(&self, key: &BonusKey) -> Result<Option<BonusRecord>, LedgerError> {
        Ok(self.state.read().await.bonuses.get(key).cloned())
    }

    async fn bonuses_for(&self, investment: InvestmentId) -> Result<Vec<BonusRecord>, LedgerError> {
        Ok(self
            .state
            .read()
            .await
            .bonuses
            .values()
            .filter(|b| b.key.investment_id == investment)
            .cloned()
            .collect())
    }

    async fn commit(&self, tx: UserTransaction) -> Result<User, LedgerError> {
        let mut state = self.state.write().await;
        state.check(&tx)?;

        let UserTransaction {
            mut user,
            investments,
            bonuses,
        } = tx;
        user.version += 1;
        for inv in investments {
            state.next_investment = state.next_investment.max(inv.id.0);
            state.investments.insert(inv.id, inv);
        }
        for record in bonuses {
            state.bonuses.insert(record.key, record);
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn run_marker(&self, kind: BatchKind) -> Result<Option<u64>, LedgerError> {
        Ok(self.state.read().await.markers.get(&kind).copied())
    }

    async fn set_run_marker(&self, kind: BatchKind, period: u64) -> Result<(), LedgerError> {
        self.state.write().await.markers.insert(kind, period);
        Ok(())
    }
}
