//! Batch kinds and the in-process run lock

use crate::error::EngineError;
use comp_model::rank::SECONDS_PER_DAY;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BatchKind {
    DailyAccrual,
    MonthlyRewards,
}

impl BatchKind {
    /// Length of one period
    pub fn period_secs(self) -> u64 {
        match self {
            BatchKind::DailyAccrual => SECONDS_PER_DAY,
            BatchKind::MonthlyRewards => 30 * SECONDS_PER_DAY,
        }
    }

    /// Period containing `now`
    pub fn period_of(self, now: u64) -> u64 {
        now / self.period_secs()
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchKind::DailyAccrual => f.write_str("daily-accrual"),
            BatchKind::MonthlyRewards => f.write_str("monthly-rewards"),
        }
    }
}

/// Rejects a second run of a kind while one is in flight. Never queues.
#[derive(Debug, Default)]
pub struct RunLock {
    held: Mutex<HashSet<BatchKind>>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, kind: BatchKind) -> Result<RunGuard<'_>, EngineError> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(kind) {
            return Err(EngineError::RunLocked(kind));
        }
        Ok(RunGuard { lock: self, kind })
    }

    pub fn is_held(&self, kind: BatchKind) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&kind)
    }
}

/// Releases the lock on drop, including when the run future is cancelled
#[derive(Debug)]
pub struct RunGuard<'a> {
    lock: &'a RunLock,
    kind: BatchKind,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.lock
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.kind);
    }
}
