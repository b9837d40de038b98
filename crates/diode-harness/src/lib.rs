//! Deterministic simulation and end-to-end testing harness for the data
//! diode gateway.
//!
//! Three pieces, covering a virtual-time `Environment`, a simulated
//! transport, and a library of behavioral invariant checks for this
//! gateway's one-way, two-sided pipeline:
//!
//! - [`sim_env`]: a virtual-clock, seeded-RNG [`diode_core::env::Environment`]
//!   so rate-limiter and heartbeat-timeout tests run in microseconds instead
//!   of real wall-clock minutes.
//! - [`diode_link`]: an in-memory stand-in for the diode's unreliable,
//!   unidirectional datagram channel, with configurable, seeded packet loss.
//! - [`invariants`]: assertion helpers for the cross-cutting storage and
//!   delivery checks that a single end-to-end scenario test would otherwise
//!   have to re-derive by hand every time.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod diode_link;
pub mod invariants;
pub mod sim_env;

pub use diode_link::{channel as diode_link_channel, LinkReceiver, LinkSender};
pub use sim_env::SimEnv;
