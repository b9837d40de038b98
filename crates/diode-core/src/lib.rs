//! Ambient stack shared by both diode sides.
//!
//! Holds everything that is not specific to ingress (S1) or egress (S2):
//! the [`env::Environment`] (clock/randomness) abstraction, the error
//! taxonomy, configuration, the metrics sink contract, the DPI classifier,
//! the token-bucket limiter, and the generic restart supervisor.

#![warn(missing_docs)]

pub mod classifier;
pub mod config;
pub mod env;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod supervisor;

pub use classifier::{AllowList, Decision, ProtocolTag};
pub use config::Config;
pub use env::Environment;
pub use error::{BindError, ComponentError, ConfigError, DropReason};
pub use limiter::{Admission, KeyedLimiter, TokenBucket};
pub use metrics::{AtomicMetrics, MetricsSink, NoopMetrics};
pub use supervisor::{supervise, RestartPolicy, RestartsExhausted};
