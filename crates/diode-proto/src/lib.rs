//! Wire codec for the data diode frame format.
//!
//! A frame is `src_ip(4) | src_port(2) | payload(N) | crc32(4)`, all fields
//! Big Endian, total size `10 + N` bytes with `0 <= N <= 1_000_000`. This
//! crate is deliberately tiny and dependency-light: it is shared, unchanged,
//! by both the S1 (ingress) and S2 (egress) binaries, so any drift here
//! would break interoperability across the diode link.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod errors;
mod frame;

pub use errors::{FrameError, Result};
pub use frame::Frame;
