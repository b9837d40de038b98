//! Metrics sink contract.
//!
//! Export to an external system (Prometheus, OTLP, ...) is an out-of-scope
//! collaborator; this module only defines the write-only contract the core
//! calls into, plus a process-local atomic implementation good enough for
//! both production use and assertions in tests.

use std::sync::atomic::{AtomicU64, Ordering};

/// One method per counter named in the external-interfaces table.
///
/// Implementations must be cheap and non-blocking: every call site here sits
/// on a hot path (connection accept, per-frame encode/decode), so a sink
/// backed by, say, a blocking HTTP export would violate the "never block the
/// acceptor" rule the rest of the system depends on.
pub trait MetricsSink: Send + Sync + 'static {
    /// A frame was forwarded from S1 to S2 successfully.
    fn packets_forwarded(&self) {}
    /// A frame was dropped by a rate limiter.
    fn rate_limited(&self) {}
    /// A frame was dropped by the DPI allow-list.
    fn dpi_blocked(&self) {}
    /// A frame failed to encode (bad source IP).
    fn encode_errors(&self) {}
    /// A frame's send to S2 failed after exhausting retries.
    fn send_errors(&self) {}
    /// A connection was rejected by the intake limiter.
    fn conn_rejected(&self) {}
    /// A connection was rejected by the concurrent-connection cap.
    fn conn_capped(&self) {}
    /// A read exceeded the per-frame payload cap and was dropped.
    fn oversize_dropped(&self) {}
    /// A datagram was too short or otherwise malformed.
    fn malformed_drops(&self) {}
    /// A datagram's checksum did not match.
    fn integrity_failures(&self) {}
    /// A write was dropped due to a full disk.
    fn disk_full_drops(&self) {}
    /// A datagram was dropped because the S2 worker pool was saturated.
    fn s2_saturation_drops(&self) {}
    /// The heartbeat monitor raised a `ChannelSilent` alarm.
    fn heartbeat_miss_alarms(&self) {}
}

/// A [`MetricsSink`] that discards every observation. Useful in tests and
/// call sites that don't care about counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Process-local atomic counters, one per [`MetricsSink`] method.
///
/// Counter updates are best-effort under concurrency: `Relaxed` ordering is
/// sufficient since these are observational counters, not synchronization
/// points.
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    packets_forwarded: AtomicU64,
    rate_limited: AtomicU64,
    dpi_blocked: AtomicU64,
    encode_errors: AtomicU64,
    send_errors: AtomicU64,
    conn_rejected: AtomicU64,
    conn_capped: AtomicU64,
    oversize_dropped: AtomicU64,
    malformed_drops: AtomicU64,
    integrity_failures: AtomicU64,
    disk_full_drops: AtomicU64,
    s2_saturation_drops: AtomicU64,
    heartbeat_miss_alarms: AtomicU64,
}

macro_rules! counter_accessor {
    ($field:ident) => {
        /// Current value of this counter.
        pub fn $field(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl AtomicMetrics {
    counter_accessor!(packets_forwarded);
    counter_accessor!(rate_limited);
    counter_accessor!(dpi_blocked);
    counter_accessor!(encode_errors);
    counter_accessor!(send_errors);
    counter_accessor!(conn_rejected);
    counter_accessor!(conn_capped);
    counter_accessor!(oversize_dropped);
    counter_accessor!(malformed_drops);
    counter_accessor!(integrity_failures);
    counter_accessor!(disk_full_drops);
    counter_accessor!(s2_saturation_drops);
    counter_accessor!(heartbeat_miss_alarms);
}

impl MetricsSink for AtomicMetrics {
    fn packets_forwarded(&self) {
        self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
    }
    fn rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }
    fn dpi_blocked(&self) {
        self.dpi_blocked.fetch_add(1, Ordering::Relaxed);
    }
    fn encode_errors(&self) {
        self.encode_errors.fetch_add(1, Ordering::Relaxed);
    }
    fn send_errors(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }
    fn conn_rejected(&self) {
        self.conn_rejected.fetch_add(1, Ordering::Relaxed);
    }
    fn conn_capped(&self) {
        self.conn_capped.fetch_add(1, Ordering::Relaxed);
    }
    fn oversize_dropped(&self) {
        self.oversize_dropped.fetch_add(1, Ordering::Relaxed);
    }
    fn malformed_drops(&self) {
        self.malformed_drops.fetch_add(1, Ordering::Relaxed);
    }
    fn integrity_failures(&self) {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
    }
    fn disk_full_drops(&self) {
        self.disk_full_drops.fetch_add(1, Ordering::Relaxed);
    }
    fn s2_saturation_drops(&self) {
        self.s2_saturation_drops.fetch_add(1, Ordering::Relaxed);
    }
    fn heartbeat_miss_alarms(&self) {
        self.heartbeat_miss_alarms.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = AtomicMetrics::default();
        assert_eq!(metrics.dpi_blocked(), 0);
        metrics.dpi_blocked();
        metrics.dpi_blocked();
        assert_eq!(metrics.dpi_blocked(), 2);
    }

    #[test]
    fn noop_sink_accepts_every_call() {
        let sink = NoopMetrics;
        sink.packets_forwarded();
        sink.heartbeat_miss_alarms();
    }
}
