// Lock-free delivery statistics using atomic operations

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DeliveryStats {
    events_accepted: AtomicU64,
    batches_dispatched: AtomicU64,
    batches_delivered: AtomicU64,
    batches_failed: AtomicU64,
    events_delivered: AtomicU64,
    events_dropped: AtomicU64,
    retry_attempts: AtomicU64,
    delivery_panics: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub events_accepted: u64,
    pub batches_dispatched: u64,
    pub batches_delivered: u64,
    pub batches_failed: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub retry_attempts: u64,
    pub delivery_panics: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, events: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.events_delivered.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self, events: usize) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.events_dropped.fetch_add(events as u64, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retry_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self, events: usize) {
        self.delivery_panics.fetch_add(1, Ordering::Relaxed);
        self.record_failed(events);
    }

    /// Counter snapshot. The in-flight figures come from the permit gate.
    pub fn snapshot(&self, in_flight: usize, peak_in_flight: usize) -> StatsSnapshot {
        StatsSnapshot {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
            delivery_panics: self.delivery_panics.load(Ordering::Relaxed),
            in_flight: in_flight as u64,
            peak_in_flight: peak_in_flight as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_recorded_outcomes() {
        let stats = DeliveryStats::new();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_dispatched();
        stats.record_dispatched();
        stats.record_delivered(5);
        stats.record_retry();
        stats.record_panic(3);

        let snapshot = stats.snapshot(1, 2);
        assert_eq!(snapshot.events_accepted, 2);
        assert_eq!(snapshot.batches_dispatched, 2);
        assert_eq!(snapshot.batches_delivered, 1);
        assert_eq!(snapshot.events_delivered, 5);
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.events_dropped, 3);
        assert_eq!(snapshot.retry_attempts, 1);
        assert_eq!(snapshot.delivery_panics, 1);
        assert_eq!(snapshot.in_flight, 1);
        assert_eq!(snapshot.peak_in_flight, 2);
    }
}
