//! Protocol classifier (deep packet inspection).
//!
//! Pure, allocation-free byte-signature matching against the application
//! payload, independent of the wire frame that carries it.

use std::collections::BTreeSet;

/// A recognized protocol signature, or the catch-all `any`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolTag {
    /// Modbus/TCP.
    Modbus,
    /// DNP3.
    Dnp3,
    /// MQTT.
    Mqtt,
    /// SNMP (ASN.1 BER).
    Snmp,
    /// Matches any non-empty payload.
    Any,
}

impl ProtocolTag {
    /// Parses a configuration string into a tag. Unknown tags return `None`
    /// so callers can silently ignore them.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "modbus" => Some(Self::Modbus),
            "dnp3" => Some(Self::Dnp3),
            "mqtt" => Some(Self::Mqtt),
            "snmp" => Some(Self::Snmp),
            "any" => Some(Self::Any),
            _ => None,
        }
    }

    /// Parses a comma- or whitespace-agnostic set of tags from an iterator
    /// of strings, silently dropping anything unrecognized.
    pub fn parse_many<'a>(raw: impl IntoIterator<Item = &'a str>) -> BTreeSet<Self> {
        raw.into_iter().filter_map(Self::parse).collect()
    }
}

/// Returns the set of tags the payload's leading bytes match.
///
/// A payload can match more than one signature (e.g. a short MQTT CONNECT
/// happens to also satisfy the SNMP prefix check); callers only care whether
/// the intersection with the allow-list is non-empty.
#[must_use]
pub fn classify(payload: &[u8]) -> BTreeSet<ProtocolTag> {
    let mut tags = BTreeSet::new();

    if payload.len() >= 8 && payload[2] == 0x00 && payload[3] == 0x00 {
        tags.insert(ProtocolTag::Modbus);
    }
    if payload.len() >= 2 && payload[0] == 0x05 && payload[1] == 0x64 {
        tags.insert(ProtocolTag::Dnp3);
    }
    if payload.len() >= 2 {
        let packet_type = payload[0] >> 4;
        if (1..=14).contains(&packet_type) {
            tags.insert(ProtocolTag::Mqtt);
        }
    }
    if payload.len() >= 2 && payload[0] == 0x30 {
        tags.insert(ProtocolTag::Snmp);
    }
    if !payload.is_empty() {
        tags.insert(ProtocolTag::Any);
    }

    tags
}

/// Outcome of a DPI decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The payload matched a tag in the allow-list (or the list allows
    /// everything).
    Accept,
    /// No tag in the payload's signature set is in the allow-list.
    Reject,
}

/// A configured set of acceptable protocol tags.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    tags: BTreeSet<ProtocolTag>,
}

impl AllowList {
    /// Builds an allow-list from a set of tags. An empty set behaves as
    /// accept-all, equivalent to an explicit `any`.
    #[must_use]
    pub fn new(tags: BTreeSet<ProtocolTag>) -> Self {
        Self { tags }
    }

    /// Decides whether `payload` may pass. Heartbeat payloads bypass DPI
    /// entirely and always accept; callers must check `is_heartbeat` before
    /// reaching for this function's answer on a heartbeat frame.
    #[must_use]
    pub fn decide(&self, payload: &[u8], is_heartbeat: bool) -> Decision {
        if is_heartbeat {
            return Decision::Accept;
        }
        if self.tags.is_empty() || self.tags.contains(&ProtocolTag::Any) {
            return Decision::Accept;
        }

        let signature = classify(payload);
        if signature.iter().any(|tag| self.tags.contains(tag)) {
            Decision::Accept
        } else {
            Decision::Reject
        }
    }
}
