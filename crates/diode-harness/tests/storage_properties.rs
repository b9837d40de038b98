//! Storage durability properties that a single end-to-end scenario test
//! wouldn't stress hard enough to catch: file-name uniqueness across a
//! wall-clock regression, and "no file is ever partially written" under
//! injected mid-write failures.

use std::{collections::HashMap, net::Ipv4Addr, sync::Arc};

use diode_core::{AtomicMetrics, MetricsSink};
use diode_harness::invariants::StorageSnapshot;
use diode_proto::Frame;
use diode_s2::{
    chaotic_storage::ChaoticStorage,
    decapsulator::Decapsulator,
    heartbeat::HeartbeatMonitor,
    storage::{build_file_stem, FileStorage, UniqueIdGenerator},
};

#[derive(Clone)]
struct FixedEnv {
    wall_ms: u64,
}

impl diode_core::env::Environment for FixedEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    async fn sleep(&self, _duration: std::time::Duration) {}

    fn wall_clock_millis(&self) -> u64 {
        self.wall_ms
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0);
    }
}

/// File names stay unique even across a regressing wall clock, because
/// the `unique` component is a process-wide monotonic counter independent of
/// `wall_ms`. Exercised here over a sawtooth clock (a more adversarial
/// pattern than the single-regression case `diode_s2::storage` already unit
/// tests in-crate).
#[test]
fn file_names_stay_unique_under_a_sawtooth_wall_clock() {
    let unique_ids = UniqueIdGenerator::new();
    let mut seen = std::collections::HashSet::new();
    let mut wall_ms: u64 = 1_700_000_000_000;

    for i in 0..500u64 {
        // Regress by 90s every third tick, otherwise advance by 1s — no
        // monotonic assumption should ever be load-bearing for uniqueness.
        wall_ms = if i % 3 == 0 { wall_ms.saturating_sub(90_000) } else { wall_ms + 1_000 };
        let stem = build_file_stem(wall_ms, unique_ids.next_id(), 4444);
        assert!(seen.insert(stem.clone()), "duplicate file stem {stem} at tick {i}");
    }
}

/// Crash-mid-write simulation: a storage backend that fails some writes
/// outright before touching the filesystem (as `ChaoticStorage` does) must
/// still leave the directory in a consistent state — every finalized `.dat`
/// file holds exactly its intended payload, never a truncated or
/// overwritten one, and no name is ever reused by two different payloads.
#[tokio::test]
async fn chaotic_failures_never_corrupt_or_duplicate_a_stored_file() {
    let dir = tempfile::tempdir().unwrap();
    let env = FixedEnv { wall_ms: 1_700_000_000_000 };
    let metrics = Arc::new(AtomicMetrics::default());
    let monitor = Arc::new(HeartbeatMonitor::new(env.clone(), std::time::Duration::from_secs(360)));
    let storage = ChaoticStorage::with_seed(FileStorage::new(dir.path()), 0.3, 99);
    let decapsulator = Decapsulator::new(
        env,
        Arc::new(storage),
        Arc::new(UniqueIdGenerator::new()),
        monitor,
        metrics.clone() as Arc<dyn MetricsSink>,
    );

    let mut expected_by_port: HashMap<u16, Vec<u8>> = HashMap::new();
    for port in 1u16..=200 {
        let payload = format!("payload-{port}").into_bytes();
        let wire = Frame::encode("10.0.0.5", port, &payload).unwrap();
        decapsulator.handle(&wire);
        expected_by_port.insert(port, payload);
    }

    let snapshot = StorageSnapshot::read(dir.path());
    assert!(snapshot.first_duplicate().is_none(), "two finalized files shared a name");
    assert!(snapshot.first_non_conforming_name().is_none(), "a finalized name didn't match the naming convention");

    for name in &snapshot.finalized {
        let (_, _, port) = StorageSnapshot::parse_file_name(name).expect("already checked above");
        let contents = std::fs::read(dir.path().join(name)).unwrap();
        assert_eq!(&contents, expected_by_port.get(&port).unwrap(), "{name} holds the wrong payload");
    }

    // Some writes should have been injected to fail given a 0.3 rate over
    // 200 attempts; those show up as persistent-io log lines, not as
    // partial files, since `write_payload` either fully succeeds or never
    // touches the filesystem.
    assert!(snapshot.finalized.len() < 200, "failure injection should have dropped at least one write");
    assert!(snapshot.temporary.is_empty(), "chaotic pre-write failures should never leave a .tmp behind");
}
