//! S2-side heartbeat monitor.
//!
//! Holds the last time a heartbeat frame was seen and periodically checks
//! whether the configured timeout has elapsed. The alarm re-arms after
//! firing: a continued outage keeps raising it at every check, rather than
//! latching once.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{sync::Mutex, time::Duration};

use diode_core::{env::Environment, MetricsSink};

/// How often the monitor checks for silence, independent of the timeout
/// itself so the alarm fires promptly after the threshold is crossed.
const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Heartbeat payload bytes, matching `diode_s1::encapsulator::HEARTBEAT_PAYLOAD`'s
/// value. Duplicated rather than shared across a crate boundary since S2 has
/// no dependency on S1.
pub const HEARTBEAT_PAYLOAD: &[u8] = b"HEARTBEAT";

/// Tracks diode-link liveness via heartbeat frames.
pub struct HeartbeatMonitor<E: Environment> {
    env: E,
    last_seen: Mutex<E::Instant>,
    timeout: Duration,
}

impl<E: Environment> HeartbeatMonitor<E> {
    /// Creates a monitor that considers the link alive as of construction
    /// time, alarming if no heartbeat arrives within `timeout`.
    #[must_use]
    pub fn new(env: E, timeout: Duration) -> Self {
        let now = env.now();
        Self { env, last_seen: Mutex::new(now), timeout }
    }

    /// Records that a heartbeat frame was just received.
    pub fn notify(&self) {
        let now = self.env.now();
        *self.last_seen.lock().expect("last_seen mutex poisoned") = now;
    }

    fn is_silent(&self) -> bool {
        let last_seen = *self.last_seen.lock().expect("last_seen mutex poisoned");
        self.env.now() - last_seen > self.timeout
    }

    /// Runs the periodic silence check until shutdown, re-raising the
    /// `ChannelSilent` alarm at every check while the outage continues.
    pub async fn run_checker(
        self: std::sync::Arc<Self>,
        metrics: std::sync::Arc<dyn MetricsSink>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                () = self.env.sleep(CHECK_INTERVAL) => {
                    if self.is_silent() {
                        metrics.heartbeat_miss_alarms();
                        tracing::error!("ChannelSilent: no heartbeat within the configured timeout");
                    }
                }
            }
        }
    }
}
