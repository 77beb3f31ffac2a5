//! Per-shard processing counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by one shard processor.
///
/// Atomic so a worker owner can read them while the processor runs.
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    records_received: AtomicU64,
    records_applied: AtomicU64,
    records_skipped: AtomicU64,
    records_dropped: AtomicU64,
    records_deferred: AtomicU64,
    attempts_failed: AtomicU64,
    checkpoints_completed: AtomicU64,
    checkpoints_failed: AtomicU64,
}

/// Point-in-time copy of [`ProcessorMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Records handed to the processor
    pub records_received: u64,
    /// Records applied to the store
    pub records_applied: u64,
    /// Malformed records dropped without retrying
    pub records_skipped: u64,
    /// Records dropped after exhausting retries
    pub records_dropped: u64,
    /// Records abandoned on shutdown and left for redelivery
    pub records_deferred: u64,
    /// Failed processing attempts
    pub attempts_failed: u64,
    /// Checkpoints persisted
    pub checkpoints_completed: u64,
    /// Checkpoint procedures that ended without persisting
    pub checkpoints_failed: u64,
}

impl ProcessorMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_received(&self, count: usize) {
        self.records_received
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn increment_applied(&self) {
        self.records_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_skipped(&self) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_deferred(&self) {
        self.records_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_failed_attempts(&self, count: u32) {
        self.attempts_failed
            .fetch_add(u64::from(count), Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self, completed: bool) {
        if completed {
            self.checkpoints_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.checkpoints_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_received: self.records_received.load(Ordering::Relaxed),
            records_applied: self.records_applied.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            records_deferred: self.records_deferred.load(Ordering::Relaxed),
            attempts_failed: self.attempts_failed.load(Ordering::Relaxed),
            checkpoints_completed: self.checkpoints_completed.load(Ordering::Relaxed),
            checkpoints_failed: self.checkpoints_failed.load(Ordering::Relaxed),
        }
    }
}
