//! Retry statistics shared across executions

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Point-in-time copy of the four counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatisticsSnapshot {
    pub started: u64,
    pub success: u64,
    pub exhausted: u64,
    pub recovered: u64,
}

/// Counters of execution outcomes
///
/// One instance may be shared (behind an `Arc`) by any number of concurrent
/// executions. Increments run in parallel; [`reset`](Self::reset) excludes
/// them and every reader, so no reader ever sees a half-reset set of counters.
#[derive(Debug, Default)]
pub struct RetryStatistics {
    name: Option<String>,
    gate: RwLock<()>,
    started: AtomicU64,
    success: AtomicU64,
    exhausted: AtomicU64,
    recovered: AtomicU64,
}

impl RetryStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create statistics labeled with the operation they track
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn bump(&self, counter: &AtomicU64) {
        let _shared = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn read(&self, counter: &AtomicU64) -> u64 {
        let _shared = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        counter.load(Ordering::SeqCst)
    }

    pub fn increment_started(&self) {
        self.bump(&self.started);
    }

    pub fn increment_success(&self) {
        self.bump(&self.success);
    }

    pub fn increment_exhausted(&self) {
        self.bump(&self.exhausted);
    }

    pub fn increment_recovered(&self) {
        self.bump(&self.recovered);
    }

    pub fn started_count(&self) -> u64 {
        self.read(&self.started)
    }

    pub fn success_count(&self) -> u64 {
        self.read(&self.success)
    }

    pub fn exhausted_count(&self) -> u64 {
        self.read(&self.exhausted)
    }

    pub fn recovered_count(&self) -> u64 {
        self.read(&self.recovered)
    }

    /// Read all four counters as one consistent set
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let _exclusive = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        StatisticsSnapshot {
            started: self.started.load(Ordering::SeqCst),
            success: self.success.load(Ordering::SeqCst),
            exhausted: self.exhausted.load(Ordering::SeqCst),
            recovered: self.recovered.load(Ordering::SeqCst),
        }
    }

    /// Zero all four counters together
    pub fn reset(&self) {
        let _exclusive = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        self.started.store(0, Ordering::SeqCst);
        self.success.store(0, Ordering::SeqCst);
        self.exhausted.store(0, Ordering::SeqCst);
        self.recovered.store(0, Ordering::SeqCst);
    }
}
