//! Error taxonomy
//!
//! Request paths surface [`EngineError`] to the caller. Batch runs classify it per user:
//! transient failures are retried, everything else is recorded in the run summary.

use crate::graph::GraphError;
use crate::run_lock::BatchKind;
use comp_model::limits::LimitError;
use comp_model::{AmountError, BonusKey, PackageType, UnknownPackage, Usd};
use thiserror::Error;

/// Failures reported by a [`crate::ledger::Ledger`] implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("stale write for {entity}: stored version {stored}, attempted {attempted}")]
    StaleVersion {
        entity: String,
        stored: u64,
        attempted: u64,
    },
    #[error("bonus {0} already recorded")]
    DuplicateBonus(BonusKey),
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("snapshot unreadable: {0}")]
    Corrupt(String),
}

impl LedgerError {
    /// Worth retrying from a fresh read
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_) | LedgerError::StaleVersion { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{package} investment cap exceeded: active {active} + requested {requested} > cap {cap}")]
    CapExceeded {
        package: PackageType,
        active: Usd,
        requested: Usd,
        cap: Usd,
    },
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Usd, requested: Usd },
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("transient store failure: {0}")]
    TransientStore(String),
    #[error("{0} run already in progress")]
    RunLocked(BatchKind),
    #[error("{kind} run already completed for period {period}")]
    AlreadyRan { kind: BatchKind, period: u64 },
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientStore(_))
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(what) => EngineError::NotFound(what),
            e @ (LedgerError::Unavailable(_) | LedgerError::StaleVersion { .. }) => {
                EngineError::TransientStore(e.to_string())
            }
            e @ (LedgerError::DuplicateBonus(_)
            | LedgerError::Invariant(_)
            | LedgerError::Corrupt(_)) => {
                EngineError::Integrity(e.to_string())
            }
        }
    }
}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> Self {
        EngineError::Integrity(err.to_string())
    }
}

impl From<AmountError> for EngineError {
    fn from(err: AmountError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<UnknownPackage> for EngineError {
    fn from(err: UnknownPackage) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<LimitError> for EngineError {
    fn from(err: LimitError) -> Self {
        match err {
            LimitError::CapExceeded {
                package,
                active,
                requested,
                cap,
            } => EngineError::CapExceeded {
                package,
                active: Usd(active),
                requested: Usd(requested),
                cap: Usd(cap),
            },
            other => EngineError::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comp_model::usd;

    #[test]
    fn test_ledger_error_classification() {
        let stale = LedgerError::StaleVersion {
            entity: "user#1".into(),
            stored: 2,
            attempted: 1,
        };
        assert!(stale.is_transient());
        assert!(EngineError::from(stale).is_transient());
        assert!(EngineError::from(LedgerError::Unavailable("down".into())).is_transient());
        assert!(matches!(
            EngineError::from(LedgerError::Invariant("rank".into())),
            EngineError::Integrity(_)
        ));
        assert!(matches!(
            EngineError::from(LedgerError::NotFound("user#9".into())),
            EngineError::NotFound(_)
        ));
    }

    #[test]
    fn test_cap_error_keeps_amounts() {
        let err = EngineError::from(LimitError::CapExceeded {
            package: PackageType::Principal,
            active: usd(9_900),
            requested: usd(200),
            cap: usd(10_000),
        });
        assert_eq!(
            err.to_string(),
            "principal investment cap exceeded: active $9900.00 + requested $200.00 > cap $10000.00"
        );
    }
}
