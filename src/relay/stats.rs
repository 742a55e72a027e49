//! Relay statistics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::BroadcastReport;

/// Counters shared by the acceptor, handlers and broadcaster
#[derive(Debug, Default)]
pub struct RelayStats {
    total_accepted: AtomicUsize,
    total_rejected: AtomicUsize,
    messages_relayed: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub total_accepted: usize,
    pub total_rejected: usize,
    pub messages_relayed: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.total_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self, report: &BroadcastReport) {
        self.messages_relayed.fetch_add(1, Ordering::Relaxed);
        self.deliveries.fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.delivery_failures.fetch_add(report.failed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}
