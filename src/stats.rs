//! Counters for attempted vs. failed operations, used for health and
//! diagnostic reporting. Not correctness-critical.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Append-only record of operation outcomes.
///
/// Designed for the single coordinator thread but uses interior mutability
/// so the owning session can read a report at any time.
#[derive(Default)]
pub struct OperationRecord {
    attempted: AtomicUsize,
    confirmed: AtomicUsize,
    failed: AtomicUsize,

    /// Failure counts keyed by error kind string (for reporting).
    failures_by_kind: Mutex<BTreeMap<String, usize>>,
}

impl OperationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that an intent was accepted for processing.
    pub fn record_attempt(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmed(&self) {
        self.confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let mut by_kind = self.failures_by_kind.lock().unwrap();
        *by_kind.entry(kind.to_owned()).or_default() += 1;
    }

    pub fn report(&self) -> OperationReport {
        OperationReport {
            attempted: self.attempted.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            failures_by_kind: self.failures_by_kind.lock().unwrap().clone(),
        }
    }
}

/// Snapshot of the operation counters, shaped for diagnostic consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub attempted: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<String, usize>,
}
