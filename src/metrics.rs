//! Minimal in-process counters. Not a scrape endpoint — just plain atomics
//! a caller can snapshot via [`Core::stats`](crate::core::Core::stats).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub notifications_total: AtomicU64,
    pub suppressed_total: AtomicU64,
    pub groups_active: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub notifications_total: u64,
    pub suppressed_total: u64,
    pub groups_active: u64,
}

impl Metrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            notifications_total: self.notifications_total.load(Ordering::Relaxed),
            suppressed_total: self.suppressed_total.load(Ordering::Relaxed),
            groups_active: self.groups_active.load(Ordering::Relaxed),
        }
    }

    pub fn group_spawned(&self) {
        self.groups_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn group_destroyed(&self) {
        self.groups_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &crate::notify::FlushOutcome) {
        use crate::notify::FlushOutcome::*;
        match outcome {
            Sent => {
                self.notifications_total.fetch_add(1, Ordering::Relaxed);
            }
            RepeatSuppressed => {
                self.suppressed_total.fetch_add(1, Ordering::Relaxed);
            }
            NothingToSend | PartiallySent => {}
        }
    }
}
