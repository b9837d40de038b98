//! S2 receiver: UDP socket plus a bounded decapsulation worker pool.
//!
//! The receive loop only binds, `recv_from`s, and enqueues; it must never be
//! blocked by decapsulation work. Bounding the pool at 200 in-flight
//! tasks caps file-descriptor and memory use under load the same way
//! `diode-s1`'s `MAX_CONCURRENT_CONNECTIONS` semaphore caps accept load.

use std::sync::Arc;

use diode_core::{env::Environment, MetricsSink};
use tokio::{net::UdpSocket, sync::Semaphore};

use crate::{decapsulator::Decapsulator, storage::Storage};

/// Maximum number of decapsulation tasks in flight at once.
pub const MAX_IN_FLIGHT: usize = 200;

/// Largest datagram this receiver will read off the wire: the maximum frame
/// size (10 + 1,000,000 bytes), oversized reads are simply truncated by the
/// fixed buffer and will fail checksum validation downstream.
const MAX_DATAGRAM_SIZE: usize = 10 + 1_000_000;

/// Drives the UDP receive loop until a fatal socket error or shutdown.
pub async fn run<E: Environment, S: Storage>(
    socket: UdpSocket,
    decapsulator: Decapsulator<E, S>,
    metrics: Arc<dyn MetricsSink>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<(), String> {
    let pool = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                // Drain: wait for every in-flight task to release its
                // permit before returning, bounding the wait the same way
                // the caller's supervisor-level shutdown timeout (5s)
                // bounds the overall shutdown drain.
                let _ = pool.acquire_many(MAX_IN_FLIGHT as u32).await;
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => {
                let (n, _peer) = received.map_err(|err| format!("fatal udp recv error: {err}"))?;

                let permit = match Arc::clone(&pool).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        metrics.s2_saturation_drops();
                        continue;
                    }
                };

                let datagram = buf[..n].to_vec();
                let decapsulator = decapsulator.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    decapsulator.handle(&datagram);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use diode_core::AtomicMetrics;
    use diode_proto::Frame;

    use super::*;
    use crate::{heartbeat::HeartbeatMonitor, storage::{FileStorage, UniqueIdGenerator}};

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
            0
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            buffer.fill(0);
        }
    }

    #[tokio::test]
    async fn a_valid_datagram_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let socket = UdpSocket::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = socket.local_addr().unwrap();
        let metrics = Arc::new(AtomicMetrics::default());
        let decapsulator = Decapsulator::new(
            TestEnv,
            Arc::new(FileStorage::new(dir.path())),
            Arc::new(UniqueIdGenerator::new()),
            Arc::new(HeartbeatMonitor::new(TestEnv, Duration::from_secs(360))),
            metrics.clone() as Arc<dyn MetricsSink>,
        );
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let server = tokio::spawn(run(socket, decapsulator, metrics.clone() as Arc<dyn MetricsSink>, shutdown_rx));

        let client = UdpSocket::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let wire = Frame::encode("10.0.0.5", 4444, b"payload").unwrap();
        client.send_to(&wire, addr).await.unwrap();

        // Give the spawned worker a moment to land the write.
        for _ in 0..50 {
            if std::fs::read_dir(dir.path()).unwrap().count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        shutdown_tx.send(true).unwrap();
        let _ = server.await;
    }
}
