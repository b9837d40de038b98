//! Per-connection lifecycle.
//!
//! Each accepted TCP socket is driven by exactly one task. A handler crash
//! terminates that one connection only — it is spawned in isolation by the
//! acceptor and is never restarted by the supervisor; only the acceptor and
//! the encapsulator are restart-supervised.

use std::{io, net::SocketAddr};

use tokio::io::AsyncReadExt;

use crate::encapsulator::EncapsulateRequest;

/// Capability interface over a client socket, so tests can substitute an
/// in-memory fake instead of a real `TcpStream` — the same pattern
/// `Storage`/`Environment` use elsewhere in this workspace.
pub trait ClientSocket: Send {
    /// Reads into `buf`, returning the number of bytes read (`0` at EOF).
    fn read(&mut self, buf: &mut [u8]) -> impl std::future::Future<Output = io::Result<usize>> + Send;

    /// Half-closes the write side, best-effort.
    fn shutdown(&mut self) -> impl std::future::Future<Output = io::Result<()>> + Send;

    /// The socket's peer address.
    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl ClientSocket for tokio::net::TcpStream {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(self).await
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::TcpStream::peer_addr(self)
    }
}

/// Lifecycle states a connection passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Just accepted; peer address not yet resolved.
    Opening,
    /// Actively reading frames and handing them to the encapsulator.
    Active,
    /// Shutting down: finishing the in-flight submission, then closing.
    Draining,
    /// Socket closed, task about to exit.
    Closed,
}

/// Drives one client connection until EOF, a read error, or a shutdown
/// signal. Every chunk read is handed to the encapsulator verbatim as one
/// frame; the connection does not attempt to reassemble or delimit
/// application-level messages — the wire format is frame-per-read.
pub async fn handle_connection<S: ClientSocket>(
    mut socket: S,
    max_payload_bytes: usize,
    submit: tokio::sync::mpsc::Sender<EncapsulateRequest>,
    metrics: &dyn diode_core::MetricsSink,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut state = ConnectionState::Opening;

    let peer = match socket.peer_addr() {
        Ok(addr) => addr,
        Err(err) => {
            tracing::debug!(%err, "connection closed before peer address resolved");
            return;
        },
    };

    let src_ip = match peer.ip() {
        std::net::IpAddr::V4(ip) => ip,
        std::net::IpAddr::V6(_) => {
            tracing::debug!(%peer, "rejecting non-IPv4 peer");
            return;
        },
    };
    let src_port = peer.port();

    state = ConnectionState::Active;
    let mut buf = vec![0u8; max_payload_bytes + 1];

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                state = ConnectionState::Draining;
                break;
            }
            read = socket.read(&mut buf) => {
                match read {
                    Ok(0) => break,
                    Ok(n) if n > max_payload_bytes => {
                        metrics.oversize_dropped();
                        tracing::debug!(%peer, size = n, "oversize read dropped");
                    }
                    Ok(n) => {
                        let payload = bytes::Bytes::copy_from_slice(&buf[..n]);
                        let request = EncapsulateRequest { src_ip, src_port, payload };
                        if submit.send(request).await.is_err() {
                            tracing::warn!(%peer, "encapsulator channel closed, ending connection");
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(%peer, %err, "read error, ending connection");
                        break;
                    }
                }
            }
        }
    }

    if state == ConnectionState::Draining {
        let _ = socket.shutdown().await;
    }
    state = ConnectionState::Closed;
    tracing::trace!(%peer, ?state, "connection task exiting");
}
