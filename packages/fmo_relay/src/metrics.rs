//! Relay counters
//!
//! Lock-free counters updated from the inbound and replay paths, summarised
//! on shutdown.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::replay::ReplayStats;

#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Inbound
    /// Messages delivered by the transport
    pub packets_received: AtomicU64,
    /// Packets carrying the relay's own UID
    pub packets_looped: AtomicU64,
    /// Packets too short to carry a header
    pub packets_malformed: AtomicU64,
    /// Packets appended to the replay buffer
    pub packets_buffered: AtomicU64,

    // Replay
    pub replay_batches: AtomicU64,
    pub packets_replayed: AtomicU64,
    pub replay_failures: AtomicU64,

    start_time: Option<Instant>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn packet_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_looped(&self) {
        self.packets_looped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_malformed(&self) {
        self.packets_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_buffered(&self) {
        self.packets_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_replayed(&self, stats: &ReplayStats) {
        self.replay_batches.fetch_add(1, Ordering::Relaxed);
        self.packets_replayed
            .fetch_add(stats.succeeded as u64, Ordering::Relaxed);
        self.replay_failures
            .fetch_add(stats.failed as u64, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            inbound: InboundMetrics {
                received: self.packets_received.load(Ordering::Relaxed),
                looped: self.packets_looped.load(Ordering::Relaxed),
                malformed: self.packets_malformed.load(Ordering::Relaxed),
                buffered: self.packets_buffered.load(Ordering::Relaxed),
            },
            replay: ReplayMetrics {
                batches: self.replay_batches.load(Ordering::Relaxed),
                replayed: self.packets_replayed.load(Ordering::Relaxed),
                failures: self.replay_failures.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub inbound: InboundMetrics,
    pub replay: ReplayMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMetrics {
    pub received: u64,
    pub looped: u64,
    pub malformed: u64,
    pub buffered: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayMetrics {
    pub batches: u64,
    pub replayed: u64,
    pub failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_tracking() {
        let metrics = RelayMetrics::new();

        metrics.packet_received();
        metrics.packet_received();
        metrics.packet_received();
        metrics.packet_looped();
        metrics.packet_buffered();
        metrics.packet_malformed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.inbound.received, 3);
        assert_eq!(snapshot.inbound.looped, 1);
        assert_eq!(snapshot.inbound.buffered, 1);
        assert_eq!(snapshot.inbound.malformed, 1);
    }

    #[test]
    fn test_batch_tracking() {
        let metrics = RelayMetrics::new();
        metrics.batch_replayed(&ReplayStats {
            succeeded: 2,
            failed: 1,
            total: 3,
        });
        metrics.batch_replayed(&ReplayStats {
            succeeded: 4,
            failed: 0,
            total: 4,
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.replay.batches, 2);
        assert_eq!(snapshot.replay.replayed, 6);
        assert_eq!(snapshot.replay.failures, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = RelayMetrics::new().snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
