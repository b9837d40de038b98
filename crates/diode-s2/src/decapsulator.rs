//! Decapsulator: validates a frame and hands it off to secure storage
//! or the heartbeat monitor.
//!
//! One call per datagram, invoked from a [`crate::receiver`] worker task.
//! Every branch here is drop-plus-metric: nothing in this module ever
//! propagates an error back to the receive loop.

use std::sync::Arc;

use diode_core::{env::Environment, MetricsSink};
use diode_proto::{Frame, FrameError};

use crate::{
    heartbeat::HeartbeatMonitor,
    storage::{build_file_stem, Storage, StorageError, UniqueIdGenerator},
};

/// Decodes and persists one diode datagram.
pub struct Decapsulator<E: Environment, S: Storage> {
    env: E,
    storage: Arc<S>,
    unique_ids: Arc<UniqueIdGenerator>,
    heartbeat_monitor: Arc<HeartbeatMonitor<E>>,
    metrics: Arc<dyn MetricsSink>,
}

impl<E: Environment, S: Storage> Clone for Decapsulator<E, S> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
            storage: Arc::clone(&self.storage),
            unique_ids: Arc::clone(&self.unique_ids),
            heartbeat_monitor: Arc::clone(&self.heartbeat_monitor),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<E: Environment, S: Storage> Decapsulator<E, S> {
    /// Builds a decapsulator over shared storage and heartbeat state; one
    /// instance is cloned into every worker task the receiver spawns.
    #[must_use]
    pub fn new(
        env: E,
        storage: Arc<S>,
        unique_ids: Arc<UniqueIdGenerator>,
        heartbeat_monitor: Arc<HeartbeatMonitor<E>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self { env, storage, unique_ids, heartbeat_monitor, metrics }
    }

    /// Decodes `datagram` and either notifies the heartbeat monitor or
    /// persists the payload: decode, route heartbeats, verify the checksum,
    /// then write.
    pub fn handle(&self, datagram: &[u8]) {
        let frame = match Frame::decode(datagram) {
            Ok(frame) => frame,
            Err(FrameError::TooShort { .. }) => {
                self.metrics.malformed_drops();
                return;
            },
            Err(FrameError::ChecksumMismatch) => {
                self.metrics.integrity_failures();
                return;
            },
            Err(_) => {
                // `decode` never returns InvalidIp/OversizePayload; any
                // other variant still counts as malformed.
                self.metrics.malformed_drops();
                return;
            },
        };

        if frame.payload.as_ref() == crate::heartbeat::HEARTBEAT_PAYLOAD {
            self.heartbeat_monitor.notify();
            return;
        }

        if frame.payload.len() > Frame::MAX_PAYLOAD_SIZE {
            self.metrics.malformed_drops();
            return;
        }

        let stem = build_file_stem(self.env.wall_clock_millis(), self.unique_ids.next_id(), frame.src_port);

        match self.storage.write_payload(&stem, &frame.payload) {
            Ok(()) => {},
            Err(StorageError::DiskFull) => self.metrics.disk_full_drops(),
            Err(StorageError::Io(reason)) => {
                tracing::error!(%reason, stem, "persistent io error writing payload");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use diode_core::AtomicMetrics;

    use super::*;
    use crate::storage::FileStorage;

    #[derive(Clone)]
    struct TestEnv;

    impl Environment for TestEnv {
        type Instant = std::time::Instant;

        fn now(&self) -> Self::Instant {
            std::time::Instant::now()
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            tokio::time::sleep(duration)
        }

        fn wall_clock_millis(&self) -> u64 {
            1_700_000_000_000
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0);
        }
    }

    fn decapsulator(
        dir: &std::path::Path,
    ) -> (Decapsulator<TestEnv, FileStorage>, Arc<AtomicMetrics>, Arc<HeartbeatMonitor<TestEnv>>) {
        let metrics = Arc::new(AtomicMetrics::default());
        let monitor = Arc::new(HeartbeatMonitor::new(TestEnv, Duration::from_secs(360)));
        let dec = Decapsulator::new(
            TestEnv,
            Arc::new(FileStorage::new(dir)),
            Arc::new(UniqueIdGenerator::new()),
            Arc::clone(&monitor),
            metrics.clone() as Arc<dyn MetricsSink>,
        );
        (dec, metrics, monitor)
    }

    #[test]
    fn happy_path_writes_exactly_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let (dec, _metrics, _monitor) = decapsulator(dir.path());

        let payload = b"\x00\x01\x00\x00\x00\x06\x01\x03\x00\x00\x00\x0A";
        let wire = Frame::encode("10.0.0.5", 4444, payload).unwrap();
        dec.handle(&wire);

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let entry = entries.into_iter().next().unwrap().unwrap();
        let name = entry.file_name().to_string_lossy().to_string();
        assert!(name.starts_with("data_") && name.ends_with("_4444.dat"), "{name}");
        assert_eq!(std::fs::read(entry.path()).unwrap(), payload);
    }

    #[test]
    fn malformed_datagram_is_dropped_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let (dec, metrics, _monitor) = decapsulator(dir.path());

        dec.handle(&[0u8; 4]);

        assert_eq!(metrics.malformed_drops(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn bad_checksum_is_dropped_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let (dec, metrics, _monitor) = decapsulator(dir.path());

        let mut wire = Frame::encode("127.0.0.1", 1, b"hello").unwrap().to_vec();
        *wire.last_mut().unwrap() ^= 0xFF;
        dec.handle(&wire);

        assert_eq!(metrics.integrity_failures(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn heartbeat_notifies_the_monitor_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (dec, _metrics, monitor) = decapsulator(dir.path());

        let wire = Frame::encode("127.0.0.1", 0, crate::heartbeat::HEARTBEAT_PAYLOAD).unwrap();
        dec.handle(&wire);

        assert!(std::fs::read_dir(dir.path()).unwrap().count() == 0);
        drop(monitor); // presence alone (no panic) demonstrates notify() ran
    }
}
