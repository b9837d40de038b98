//! Configuration snapshot consumed at startup.
//!
//! `Config` is a plain, immutable value; parsing command-line arguments into
//! it is ambient glue each binary's `main.rs` owns via `clap`, keeping CLI
//! parsing separate from the values the server itself operates on.

use std::{collections::BTreeSet, net::Ipv4Addr, path::PathBuf};

use crate::{classifier::ProtocolTag, error::ConfigError};

/// Immutable configuration snapshot for one side of the gateway.
///
/// Both `diode-s1` and `diode-s2` construct one of these at startup.
/// `diode-s1` validates it with [`Config::validate`]; `diode-s2` additionally
/// persists payloads to `data_dir`, so it validates with
/// [`Config::validate_s2`] instead.
#[derive(Debug, Clone)]
pub struct Config {
    /// S1 TCP bind address.
    pub s1_ip: Ipv4Addr,
    /// S1 TCP bind port.
    pub s1_tcp_port: u16,
    /// Optional S1 UDP ingress port; `None` disables the UDP listener.
    pub s1_udp_port: Option<u16>,

    /// S2 UDP bind address (and, from S1's perspective, the diode
    /// destination address).
    pub s2_ip: Ipv4Addr,
    /// S2 UDP bind port / diode destination port.
    pub s2_port: u16,

    /// Directory `.dat` files are written into.
    pub data_dir: PathBuf,

    /// Protocol tags accepted by the DPI allow-list. Empty means accept-all.
    pub allowed_protocols: BTreeSet<ProtocolTag>,

    /// Global ingress limiter rate, in packets per second.
    pub max_packets_per_sec: u32,
    /// Per-frame payload cap, in bytes.
    pub max_payload_bytes: usize,
    /// Enables the optional per-source-IP limiter tier (§4.3's "third
    /// optional limiter"). When `false`, per-IP backpressure relies on the
    /// global limiter alone.
    pub enable_per_ip_limiter: bool,

    /// Heartbeat generation interval, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Heartbeat silence threshold before raising `ChannelSilent`, in
    /// milliseconds.
    pub heartbeat_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            s1_ip: Ipv4Addr::UNSPECIFIED,
            s1_tcp_port: 8080,
            s1_udp_port: None,
            s2_ip: Ipv4Addr::UNSPECIFIED,
            s2_port: 42001,
            data_dir: PathBuf::from("."),
            allowed_protocols: BTreeSet::from([ProtocolTag::Any]),
            max_packets_per_sec: 1000,
            max_payload_bytes: 1_000_000,
            enable_per_ip_limiter: false,
            heartbeat_interval_ms: 300_000,
            heartbeat_timeout_ms: 360_000,
        }
    }
}

impl Config {
    /// Validates the fields common to both sides of the gateway, failing
    /// fast at startup: every port must be in `[1, 65535]` and the numeric
    /// limiter/payload/heartbeat fields must be sane. This is what `diode-s1`
    /// calls directly — S1 never writes to `data_dir`, so it does not probe
    /// for write access; only [`Config::validate_s2`] does that.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_port("s1_tcp_port", self.s1_tcp_port)?;
        if let Some(port) = self.s1_udp_port {
            check_port("s1_udp_port", port)?;
        }
        check_port("s2_port", self.s2_port)?;

        if self.max_packets_per_sec == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_packets_per_sec",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_payload_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_timeout_ms",
                reason: "must exceed heartbeat_interval_ms".to_string(),
            });
        }

        Ok(())
    }

    /// Validates everything [`Config::validate`] does, plus `data_dir`
    /// writability. `diode-s2` is the only side that persists payloads to
    /// `data_dir`, so it is the only side that needs to fail fast on an
    /// unwritable one.
    pub fn validate_s2(&self) -> Result<(), ConfigError> {
        self.validate()?;
        probe_writable(&self.data_dir)
    }
}

fn check_port(field: &'static str, port: u16) -> Result<(), ConfigError> {
    if port == 0 {
        return Err(ConfigError::PortOutOfRange { field, port: port as u32 });
    }
    Ok(())
}

fn probe_writable(dir: &std::path::Path) -> Result<(), ConfigError> {
    let probe = dir.join(".diode-writable-probe");
    std::fs::write(&probe, b"") .map_err(|err| ConfigError::DataDirNotWritable {
        path: dir.display().to_string(),
        reason: err.to_string(),
    })?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}
