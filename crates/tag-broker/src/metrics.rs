//! Counters for broker activity
//!
//! Thread-safe, lock-free counters updated by the registry. Read them
//! through [`BrokerMetrics::snapshot`].
//!
//! ## Usage
//!
//! ```ignore
//! let snapshot = registry.metrics().snapshot();
//! assert_eq!(snapshot.opens - snapshot.closes, registry.active_tags() as u64);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Broker activity counters.
#[derive(Debug, Default)]
pub struct BrokerMetrics {
    /// Provider subscriptions opened successfully
    pub opens: AtomicU64,
    /// Provider opens that failed or timed out
    pub open_failures: AtomicU64,
    /// Provider subscriptions closed (including failed closes)
    pub closes: AtomicU64,
    /// Provider closes that reported an error
    pub close_failures: AtomicU64,
    /// Live provider updates handed to the dispatcher
    pub updates_dispatched: AtomicU64,
    /// Provider callbacks ignored because their subscription was gone
    pub late_updates: AtomicU64,
    /// Cached samples replayed on subscribe
    pub replays: AtomicU64,
    /// Writes handed to a provider
    pub writes_forwarded: AtomicU64,
    /// Writes dropped because the tag had no active subscription
    pub writes_dropped: AtomicU64,
}

impl BrokerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_open_failure(&self) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a teardown; `ok` is false when the provider reported an error.
    pub fn record_close(&self, ok: bool) {
        self.closes.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.close_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_update(&self) {
        self.updates_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_update(&self) {
        self.late_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, forwarded: bool) {
        if forwarded {
            self.writes_forwarded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.writes_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            opens: self.opens.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            updates_dispatched: self.updates_dispatched.load(Ordering::Relaxed),
            late_updates: self.late_updates.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            writes_forwarded: self.writes_forwarded.load(Ordering::Relaxed),
            writes_dropped: self.writes_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BrokerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub opens: u64,
    pub open_failures: u64,
    pub closes: u64,
    pub close_failures: u64,
    pub updates_dispatched: u64,
    pub late_updates: u64,
    pub replays: u64,
    pub writes_forwarded: u64,
    pub writes_dropped: u64,
}

impl MetricsSnapshot {
    /// Provider subscriptions currently believed open.
    pub fn open_subscriptions(&self) -> u64 {
        self.opens.saturating_sub(self.closes)
    }
}
