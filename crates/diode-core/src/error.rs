//! Error taxonomy shared by both diode sides.
//!
//! Mirrors the error-handling policy of the gateway's design: startup
//! errors are fail-fast, per-frame errors are drop-plus-metric and must
//! never propagate, and component crashes are the supervisor's concern. We
//! avoid `std::io::Error` at these boundaries: typed variants let callers
//! match on policy instead of string-sniffing.

use thiserror::Error;

use diode_proto::FrameError;

/// Startup configuration errors. Always fail-fast (exit code 2).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A configured port was outside `1..=65535`.
    #[error("{field}: port {port} out of range (must be 1-65535)")]
    PortOutOfRange {
        /// Name of the offending config field.
        field: &'static str,
        /// The rejected value.
        port: u32,
    },

    /// `data_dir` does not exist or is not writable.
    #[error("data_dir {path:?} is not writable: {reason}")]
    DataDirNotWritable {
        /// The configured directory.
        path: String,
        /// Underlying `io::Error` description.
        reason: String,
    },

    /// A numeric option was zero or otherwise nonsensical.
    #[error("{field}: {reason}")]
    InvalidValue {
        /// Name of the offending config field.
        field: &'static str,
        /// Human-readable explanation.
        reason: String,
    },
}

/// Socket bind errors raised by the acceptor, encapsulator, or receiver at
/// startup. Retried briefly (20 attempts, 5s apart) before failing fast.
#[derive(Error, Debug)]
pub enum BindError {
    /// All retry attempts were exhausted.
    #[error("failed to bind {addr} after {attempts} attempts: {source}")]
    Exhausted {
        /// Address that could not be bound.
        addr: String,
        /// Number of attempts made.
        attempts: u32,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Reasons a frame never reaches storage. Every variant here is
/// drop-plus-metric; none may propagate past the component that observes it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Frame failed to decode: too short, bad IP, or checksum mismatch.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// DPI classifier rejected the payload (`ProtocolDenied`).
    #[error("protocol denied by allow-list")]
    ProtocolDenied,

    /// A limiter (global, per-IP, or connection-intake) denied the request.
    #[error("rate limited")]
    RateLimited,

    /// A TCP read delivered more than the per-frame payload cap; the excess
    /// was dropped rather than the connection being torn down.
    #[error("oversize payload: {size} bytes, max {max}")]
    Oversize {
        /// Size of the rejected read.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The S1→S2 send failed after exhausting the backoff retry budget.
    #[error("transient send error exhausted retries: {0}")]
    SendExhausted(String),

    /// The S2 worker pool had no free permits.
    #[error("worker pool saturated")]
    PoolSaturated,

    /// `ENOSPC` or equivalent while writing a payload to disk.
    #[error("disk full")]
    DiskFull,

    /// Any other, non-space-related I/O failure while persisting a payload.
    #[error("persistent io error: {0}")]
    PersistentIo(String),
}

/// Errors that can terminate a long-lived component (acceptor, encapsulator,
/// receiver, decapsulator pool, heartbeat tasks). Counted against the
/// supervisor's `max_restarts` budget; never surfaced per-frame.
#[derive(Error, Debug)]
pub enum ComponentError {
    /// The component's socket bind failed even after retry.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// An I/O error not tied to a specific frame (e.g. the UDP socket itself
    /// faulted).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
