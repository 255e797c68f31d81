//! Sender counters.
//!
//! Observations only; nothing in the retry loop reads them back.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::proto::RegionError;

/// Counters shared by every sender that reports into them.
#[derive(Debug, Default)]
pub struct SenderMetrics {
    not_leader: AtomicU64,
    stale_epoch: AtomicU64,
    server_busy: AtomicU64,
    other_region_error: AtomicU64,
    rpc_failures: AtomicU64,
    stale_short_circuits: AtomicU64,
}

/// Point-in-time copy of [`SenderMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderMetricsSnapshot {
    /// Not-leader errors observed.
    pub not_leader: u64,
    /// Stale-epoch errors reported by servers.
    pub stale_epoch: u64,
    /// Server-busy errors observed.
    pub server_busy: u64,
    /// Other region errors observed.
    pub other_region_error: u64,
    /// Transport calls that failed.
    pub rpc_failures: u64,
    /// Requests answered locally because the region version was gone.
    pub stale_short_circuits: u64,
}

impl SenderMetricsSnapshot {
    /// Returns the total number of server-reported region errors.
    #[must_use]
    pub const fn region_errors(&self) -> u64 {
        self.not_leader + self.stale_epoch + self.server_busy + self.other_region_error
    }
}

impl SenderMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a server-reported region error.
    pub fn observe_region_error(&self, err: &RegionError) {
        let counter = match err {
            RegionError::NotLeader { .. } => &self.not_leader,
            RegionError::StaleEpoch { .. } => &self.stale_epoch,
            RegionError::ServerBusy { .. } => &self.server_busy,
            RegionError::Other { .. } => &self.other_region_error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed transport call.
    pub fn observe_rpc_failure(&self) {
        self.rpc_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a request answered without a network call.
    pub fn observe_stale_short_circuit(&self) {
        self.stale_short_circuits.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> SenderMetricsSnapshot {
        SenderMetricsSnapshot {
            not_leader: self.not_leader.load(Ordering::Relaxed),
            stale_epoch: self.stale_epoch.load(Ordering::Relaxed),
            server_busy: self.server_busy.load(Ordering::Relaxed),
            other_region_error: self.other_region_error.load(Ordering::Relaxed),
            rpc_failures: self.rpc_failures.load(Ordering::Relaxed),
            stale_short_circuits: self.stale_short_circuits.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::RegionId;

    use super::*;

    #[test]
    fn test_observe_by_variant() {
        let metrics = SenderMetrics::new();
        metrics.observe_region_error(&RegionError::NotLeader {
            region_id: RegionId::new(1),
            leader: None,
        });
        metrics.observe_region_error(&RegionError::stale_epoch());
        metrics.observe_region_error(&RegionError::ServerBusy {
            reason: String::new(),
        });
        metrics.observe_region_error(&RegionError::ServerBusy {
            reason: String::new(),
        });
        metrics.observe_rpc_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.not_leader, 1);
        assert_eq!(snapshot.stale_epoch, 1);
        assert_eq!(snapshot.server_busy, 2);
        assert_eq!(snapshot.other_region_error, 0);
        assert_eq!(snapshot.region_errors(), 4);
        assert_eq!(snapshot.rpc_failures, 1);
        assert_eq!(snapshot.stale_short_circuits, 0);
    }
}
