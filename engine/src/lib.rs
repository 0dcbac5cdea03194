//! TMC compensation engine
//!
//! Daily return accrual, referral bonuses, rank progression and tier rewards over an injected
//! [`Ledger`]. The pure arithmetic lives in `comp_model`; this crate owns persistence,
//! retries, run coordination and the batch orchestrator.

pub mod accrual;
pub mod bonus;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod investing;
pub mod ledger;
pub mod memory;
pub mod orchestrator;
pub mod rank;
pub mod retry;
pub mod retry_queue;
pub mod rewards;
pub mod run_lock;

pub use bonus::BonusOutcome;
pub use config::{BatchConfig, Config};
pub use engine::{AbortHandle, Engine};
pub use error::{EngineError, EngineResult, LedgerError};
pub use graph::{GraphError, ReferralGraph};
pub use investing::{InvestmentReceipt, Portfolio};
pub use ledger::{InvestmentFilter, Ledger, UserTransaction};
pub use memory::MemoryLedger;
pub use orchestrator::{check_payout_address, Promotion, RunSummary, UserNote};
pub use rank::RankDecision;
pub use retry::RetryPolicy;
pub use retry_queue::{DeferredBonus, RetryQueue};
pub use run_lock::{BatchKind, RunLock};
