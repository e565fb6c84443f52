//! Observability and Metrics
//!
//! Thread-safe counters for monitoring a router's traffic and health.
//! Counters use relaxed atomics; they are statistics, not synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-router metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Packets decoded off any channel.
    pub packets_received: AtomicU64,
    /// Packets handed to a local service or context handler.
    pub packets_delivered: AtomicU64,
    /// Data-plane packets forwarded toward another node.
    pub packets_forwarded: AtomicU64,
    /// Control-plane packets relayed to other channels.
    pub control_relayed: AtomicU64,
    /// Channel send failures observed by the router.
    pub send_errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_delivered(&self) {
        self.packets_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_forwarded(&self) {
        self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn control_relayed(&self) {
        self.control_relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_delivered: self.packets_delivered.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            control_relayed: self.control_relayed.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Plain-value view of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub packets_received: u64,
    pub packets_delivered: u64,
    pub packets_forwarded: u64,
    pub control_relayed: u64,
    pub send_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.packet_received();
        metrics.packet_received();
        metrics.packet_delivered();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.packets_received, 2);
        assert_eq!(snapshot.packets_delivered, 1);
        assert_eq!(snapshot.packets_forwarded, 0);
    }
}
