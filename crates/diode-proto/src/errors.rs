//! Error types for frame encoding and decoding.

use thiserror::Error;

/// Errors that can occur while encoding or decoding a [`crate::Frame`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The caller supplied a `src_ip` that does not parse as IPv4.
    #[error("invalid source IP address: {0}")]
    InvalidIp(String),

    /// The buffer is shorter than the minimum frame size (10 bytes).
    #[error("frame too short: {len} bytes, need at least {min}")]
    TooShort {
        /// Length of the buffer that was handed to `decode`.
        len: usize,
        /// Minimum valid frame size.
        min: usize,
    },

    /// The trailing CRC32 did not match the computed checksum over the
    /// rest of the frame.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The payload exceeds the configured maximum payload size.
    #[error("payload too large: {size} bytes, max {max}")]
    OversizePayload {
        /// Size of the rejected payload.
        size: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, FrameError>;
