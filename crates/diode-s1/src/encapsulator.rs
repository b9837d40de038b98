//! Encapsulator: the single point through which all payloads leave S1.
//!
//! Single-owner over the global limiter, the DPI allow-list, and the
//! diode-facing UDP socket — everything funnels through one `mpsc` channel
//! so the limiter and socket are serialized without needing a lock.

use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use bytes::Bytes;
use diode_core::{classifier::AllowList, env::Environment, limiter::{KeyedLimiter, TokenBucket}, MetricsSink};
use tokio::{net::UdpSocket, sync::mpsc, sync::watch};

/// Heartbeat payload bytes.
pub const HEARTBEAT_PAYLOAD: &[u8] = b"HEARTBEAT";

/// Rate of the optional per-source-IP limiter, in packets per second.
pub const PER_IP_RATE: f64 = 100.0;

/// Burst capacity of the optional per-source-IP limiter.
pub const PER_IP_CAPACITY: f64 = 100.0;

/// Maximum number of distinct source IPs the optional per-IP limiter tracks
/// before aging out the least-recently-used one.
pub const PER_IP_MAX_TRACKED: usize = 10_000;

/// One payload waiting to be encapsulated and sent toward S2.
#[derive(Debug, Clone)]
pub struct EncapsulateRequest {
    /// Originating client's IPv4 address.
    pub src_ip: Ipv4Addr,
    /// Originating client's port.
    pub src_port: u16,
    /// Raw payload bytes.
    pub payload: Bytes,
}

impl EncapsulateRequest {
    /// True if this request carries the heartbeat payload. Heartbeats bypass
    /// DPI but remain subject to the global limiter.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.payload.as_ref() == HEARTBEAT_PAYLOAD
    }
}

const RETRY_BACKOFFS_MS: [u64; 4] = [10, 20, 40, 80];

/// The encapsulator: DPI + rate-limit + encode + send, in that order.
pub struct Encapsulator<E: Environment> {
    env: E,
    limiter: TokenBucket<E>,
    per_ip_limiter: Option<KeyedLimiter<Ipv4Addr, E>>,
    allow_list: AllowList,
    socket: UdpSocket,
    dest: std::net::SocketAddr,
    metrics: Arc<dyn MetricsSink>,
}

impl<E: Environment> Encapsulator<E> {
    /// Builds an encapsulator bound to an ephemeral local UDP port, sending
    /// to `dest` (by default `127.0.0.1:<s2_port>`).
    ///
    /// `per_ip_limiting` enables the optional third limiter tier (§4.3's
    /// "third optional limiter"): when `true`, each source IP gets its own
    /// `PER_IP_RATE`-pps bucket, checked *before* the global limiter, with
    /// state aged out on an LRU basis past `PER_IP_MAX_TRACKED` distinct IPs.
    /// When `false`, per-IP backpressure relies on the global limiter alone.
    pub async fn bind(
        env: E,
        dest: std::net::SocketAddr,
        rate: f64,
        allow_list: AllowList,
        metrics: Arc<dyn MetricsSink>,
        per_ip_limiting: bool,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0)).await?;
        let limiter = TokenBucket::new(&env, rate, rate);
        let per_ip_limiter = per_ip_limiting
            .then(|| KeyedLimiter::new(PER_IP_RATE, PER_IP_CAPACITY, PER_IP_MAX_TRACKED));
        Ok(Self { env, limiter, per_ip_limiter, allow_list, socket, dest, metrics })
    }

    /// Runs the encapsulator's single-owner processing loop until the
    /// channel closes or a shutdown signal arrives. Draining on shutdown
    /// means: stop accepting new requests but let requests already in the
    /// channel buffer flush before returning.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<EncapsulateRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    requests.close();
                    while let Ok(req) = requests.try_recv() {
                        self.submit(req).await;
                    }
                    return;
                }
                maybe_req = requests.recv() => {
                    match maybe_req {
                        Some(req) => self.submit(req).await,
                        None => return,
                    }
                }
            }
        }
    }

    /// Processes exactly one request through the sequential contract:
    /// per-IP limiter (if enabled), then the global limiter, then DPI, then
    /// encode, then send-with-retry.
    async fn submit(&mut self, req: EncapsulateRequest) {
        if let Some(per_ip) = &mut self.per_ip_limiter {
            if per_ip.try_consume(&self.env, req.src_ip) == diode_core::limiter::Admission::Deny {
                self.metrics.rate_limited();
                return;
            }
        }

        if self.limiter.try_consume(&self.env, 1.0) == diode_core::limiter::Admission::Deny {
            self.metrics.rate_limited();
            return;
        }

        // The limiter token is spent even when DPI goes on to reject the
        // frame, closing off a bypass where rejected traffic costs nothing.
        let is_heartbeat = req.is_heartbeat();
        if self.allow_list.decide(&req.payload, is_heartbeat) == diode_core::classifier::Decision::Reject
        {
            self.metrics.dpi_blocked();
            return;
        }

        let wire = match diode_proto::Frame::encode(&req.src_ip.to_string(), req.src_port, &req.payload)
        {
            Ok(wire) => wire,
            Err(_) => {
                self.metrics.encode_errors();
                return;
            },
        };

        self.send_with_retry(&wire).await;
    }

    async fn send_with_retry(&mut self, wire: &[u8]) {
        if self.socket.send_to(wire, self.dest).await.is_ok() {
            self.metrics.packets_forwarded();
            return;
        }

        for backoff_ms in RETRY_BACKOFFS_MS {
            self.env.sleep(Duration::from_millis(backoff_ms)).await;
            if self.socket.send_to(wire, self.dest).await.is_ok() {
                self.metrics.packets_forwarded();
                return;
            }
        }

        self.metrics.send_errors();
    }
}
