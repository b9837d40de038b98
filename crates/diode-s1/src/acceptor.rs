//! S1 acceptor and UDP listener.
//!
//! Binds the TCP listener (and, if configured, a UDP ingress socket) and
//! hands accepted work off to the encapsulator, applying the
//! connection-intake limiter and a soft concurrent-connection cap on the
//! TCP path. The accept loop itself never blocks on anything but `accept`
//! and the bounded channel send to the encapsulator.

use std::sync::Arc;

use diode_core::{env::Environment, limiter::TokenBucket, MetricsSink};
use tokio::{
    net::{TcpListener, UdpSocket},
    sync::{mpsc, watch, Semaphore},
};

use crate::{
    connection::{handle_connection, ClientSocket},
    encapsulator::EncapsulateRequest,
};

/// Soft cap on simultaneous TCP connections.
pub const MAX_CONCURRENT_CONNECTIONS: usize = 100;

/// Drives the TCP accept loop until a fatal socket error or shutdown.
///
/// A fatal accept error returns `Err` so the caller's supervisor can count
/// it against the restart budget; transient errors are logged and the loop
/// continues.
pub async fn run_tcp<E: Environment>(
    env: E,
    listener: TcpListener,
    mut intake_limiter: TokenBucket<E>,
    max_payload_bytes: usize,
    submit: mpsc::Sender<EncapsulateRequest>,
    metrics: Arc<dyn MetricsSink>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), String> {
    let concurrency = Arc::new(Semaphore::new(MAX_CONCURRENT_CONNECTIONS));

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => return Ok(()),
            accepted = listener.accept() => {
                let (socket, _peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) if is_transient(&err) => {
                        tracing::warn!(%err, "transient accept error, continuing");
                        continue;
                    }
                    Err(err) => {
                        return Err(format!("fatal accept error: {err}"));
                    }
                };

                if intake_limiter.try_consume(&env, 1.0) == diode_core::limiter::Admission::Deny {
                    metrics.conn_rejected();
                    drop(socket);
                    continue;
                }

                let permit = match concurrency.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        metrics.conn_capped();
                        drop(socket);
                        continue;
                    }
                };

                let submit = submit.clone();
                let metrics = Arc::clone(&metrics);
                let shutdown_rx = shutdown.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    handle_connection(socket, max_payload_bytes, submit, metrics.as_ref(), shutdown_rx)
                        .await;
                });
            }
        }
    }
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted | std::io::ErrorKind::ConnectionAborted
    )
}

/// Drives the optional UDP ingress loop: each datagram becomes one
/// encapsulation request with no per-connection state.
pub async fn run_udp(
    socket: UdpSocket,
    max_datagram_bytes: usize,
    submit: mpsc::Sender<EncapsulateRequest>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), String> {
    let mut buf = vec![0u8; max_datagram_bytes];

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => return Ok(()),
            received = socket.recv_from(&mut buf) => {
                let (n, peer) = received.map_err(|err| format!("fatal udp recv error: {err}"))?;

                let src_ip = match peer.ip() {
                    std::net::IpAddr::V4(ip) => ip,
                    std::net::IpAddr::V6(_) => continue,
                };

                let request = EncapsulateRequest {
                    src_ip,
                    src_port: peer.port(),
                    payload: bytes::Bytes::copy_from_slice(&buf[..n]),
                };

                if submit.try_send(request).is_err() {
                    tracing::debug!(%peer, "encapsulator channel full, dropping udp datagram");
                }
            }
        }
    }
}
