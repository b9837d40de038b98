//! Ingress side of the data diode.
//!
//! Wraps `diode-core`'s shared primitives (limiter, classifier, supervisor)
//! with real I/O: a TCP/UDP acceptor, per-connection handlers, and
//! the single-owner encapsulator that puts frames onto the diode link.
//! An S1-side heartbeat generator rides the same channel as ordinary
//! traffic.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod acceptor;
pub mod connection;
pub mod encapsulator;
pub mod heartbeat;
pub mod system_env;

pub use connection::{handle_connection, ClientSocket, ConnectionState};
pub use encapsulator::{EncapsulateRequest, Encapsulator, HEARTBEAT_PAYLOAD};
pub use system_env::SystemEnv;
