//! Traffic accounting for the messenger core.

use parking_lot::Mutex;

/// Point-in-time copy of the traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    /// Number of successful wire sends (peer sends and client replies).
    pub msg_complexity: u64,
    /// Total wire bytes across those sends.
    pub msg_size: u64,
}

/// The two global traffic counters.
///
/// Both counters move together per send, so they share one lock; a reader
/// never observes a send counted in one but not the other.
#[derive(Debug, Default)]
pub struct TrafficMetrics {
    counters: Mutex<TrafficSnapshot>,
}

impl TrafficMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one successful send of `wire_len` bytes.
    pub fn record_send(&self, wire_len: usize) {
        let mut counters = self.counters.lock();
        counters.msg_complexity = counters.msg_complexity.saturating_add(1);
        counters.msg_size = counters.msg_size.saturating_add(wire_len as u64);
    }

    /// Read both counters atomically.
    pub fn snapshot(&self) -> TrafficSnapshot {
        *self.counters.lock()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_move_together() {
        let metrics = TrafficMetrics::new();
        let sizes = [10usize, 250, 3];
        for len in sizes {
            metrics.record_send(len);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.msg_complexity, sizes.len() as u64);
        assert_eq!(snap.msg_size, sizes.iter().sum::<usize>() as u64);
    }
}
