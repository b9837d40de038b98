//! Egress side of the data diode.
//!
//! Binds the S2 UDP socket, decodes and validates each datagram before
//! persisting it to durable storage, and tracks diode-link liveness via
//! heartbeat frames. Nothing in this crate ever sends, opens, or writes
//! to an S1-bound socket: the only network resource owned here is the
//! S2 receive socket.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaotic_storage;
pub mod decapsulator;
pub mod heartbeat;
pub mod receiver;
pub mod storage;
pub mod system_env;

pub use decapsulator::Decapsulator;
pub use heartbeat::HeartbeatMonitor;
pub use storage::{FileStorage, Storage, StorageError, UniqueIdGenerator};
pub use system_env::SystemEnv;
