//! Deferred bonus walks (min-heap by next attempt time)
//!
//! A bonus credit that keeps failing is not dropped. Its investment is parked here and the
//! whole walk is replayed later; already-paid levels are skipped by their bonus key.

use comp_model::InvestmentId;
use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;

/// Investment whose bonus walk did not finish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredBonus {
    pub investment_id: InvestmentId,
    /// Failed walks so far
    pub attempts: u32,
    /// Unix seconds before which the walk is not retried
    pub next_attempt_at: u64,
    pub last_error: String,
}

impl DeferredBonus {
    pub fn is_due(&self, now: u64) -> bool {
        self.next_attempt_at <= now
    }
}

/// Deferred walks ordered by next attempt (earliest first)
pub struct RetryQueue {
    /// Priority queue (using Reverse for min-heap)
    queue: PriorityQueue<InvestmentId, Reverse<u64>>,
    /// Map for O(1) lookups
    map: HashMap<InvestmentId, DeferredBonus>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            map: HashMap::new(),
        }
    }

    /// Push or replace the entry for an investment
    pub fn push(&mut self, entry: DeferredBonus) {
        let id = entry.investment_id;
        let at = entry.next_attempt_at;
        self.map.insert(id, entry);
        self.queue.push(id, Reverse(at));
    }

    /// Pop the earliest entry
    pub fn pop(&mut self) -> Option<DeferredBonus> {
        let (id, _priority) = self.queue.pop()?;
        self.map.remove(&id)
    }

    pub fn peek(&self) -> Option<&DeferredBonus> {
        let (id, _priority) = self.queue.peek()?;
        self.map.get(id)
    }

    /// Pop every entry due at `now`, earliest first
    pub fn pop_due(&mut self, now: u64) -> Vec<DeferredBonus> {
        let mut due = Vec::new();
        while self.peek().is_some_and(|e| e.is_due(now)) {
            if let Some(entry) = self.pop() {
                due.push(entry);
            }
        }
        due
    }

    pub fn remove(&mut self, id: &InvestmentId) -> Option<DeferredBonus> {
        self.queue.remove(id);
        self.map.remove(id)
    }

    /// All entries, earliest first
    pub fn entries(&self) -> Vec<DeferredBonus> {
        let mut all: Vec<DeferredBonus> = self.map.values().cloned().collect();
        all.sort_by_key(|e| (e.next_attempt_at, e.investment_id));
        all
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new()
    }
}
