//! On-wire frame format: `src_ip(4) | src_port(2) | payload(N) | crc32(4)`.
//!
//! All multi-byte integers are Big Endian (network byte order). The 6-byte
//! address prefix is parsed zero-copy via `zerocopy`, scaled down to the
//! two fields this format actually fixes in place. The payload and
//! trailing checksum are variable-offset (the payload length is not known
//! until the whole buffer is in hand), so they are handled with plain
//! slicing rather than a second zerocopy struct.

use std::net::Ipv4Addr;

use bytes::{Bytes, BytesMut};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{FrameError, Result};

/// Fixed 6-byte address prefix: `src_ip` then `src_port`, both Big Endian.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
struct AddrPrefix {
    src_ip: [u8; 4],
    src_port: [u8; 2],
}

/// A decoded frame: the originating client's address and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// IPv4 address of the originating client.
    pub src_ip: Ipv4Addr,
    /// Originating client port.
    pub src_port: u16,
    /// Opaque payload bytes, exactly as received.
    pub payload: Bytes,
}

impl Frame {
    /// Size of the fixed prefix (`src_ip` + `src_port`).
    pub const PREFIX_SIZE: usize = 6;

    /// Size of the trailing CRC32 checksum.
    pub const CHECKSUM_SIZE: usize = 4;

    /// Minimum valid frame size: prefix + checksum, empty payload.
    pub const MIN_SIZE: usize = Self::PREFIX_SIZE + Self::CHECKSUM_SIZE;

    /// Largest payload this format allows.
    pub const MAX_PAYLOAD_SIZE: usize = 1_000_000;

    /// Construct a frame from its parts. Does not validate payload size;
    /// use [`Frame::encode`] to enforce the cap at the wire boundary.
    #[must_use]
    pub fn new(src_ip: Ipv4Addr, src_port: u16, payload: impl Into<Bytes>) -> Self {
        Self { src_ip, src_port, payload: payload.into() }
    }

    /// Encode `(src_ip, src_port, payload)` into the wire format.
    ///
    /// `src_ip` is parsed as IPv4; a non-IPv4 address fails with
    /// [`FrameError::InvalidIp`] and no bytes are emitted. A payload over
    /// [`Frame::MAX_PAYLOAD_SIZE`] fails with [`FrameError::OversizePayload`].
    pub fn encode(src_ip: &str, src_port: u16, payload: &[u8]) -> Result<Bytes> {
        let ip: Ipv4Addr =
            src_ip.parse().map_err(|_| FrameError::InvalidIp(src_ip.to_string()))?;

        if payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(FrameError::OversizePayload {
                size: payload.len(),
                max: Self::MAX_PAYLOAD_SIZE,
            });
        }

        let prefix = AddrPrefix { src_ip: ip.octets(), src_port: src_port.to_be_bytes() };

        let mut buf = BytesMut::with_capacity(Self::PREFIX_SIZE + payload.len() + Self::CHECKSUM_SIZE);
        buf.extend_from_slice(prefix.as_bytes());
        buf.extend_from_slice(payload);

        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_be_bytes());

        Ok(buf.freeze())
    }

    /// Decode a wire-format buffer into its parts.
    ///
    /// Decoding is total over well-formed-size inputs: any buffer of at
    /// least [`Frame::MIN_SIZE`] bytes is decoded, and the checksum is the
    /// only content check performed. Payload size caps are enforced by the
    /// caller (ingress drops oversize reads before they reach the wire;
    /// egress checks with [`Frame::MAX_PAYLOAD_SIZE`] after decode).
    ///
    /// # Errors
    ///
    /// - [`FrameError::TooShort`] if `bytes.len() < Frame::MIN_SIZE`.
    /// - [`FrameError::ChecksumMismatch`] if the trailing CRC32 does not
    ///   match the computed checksum over `src_ip ‖ src_port ‖ payload`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::MIN_SIZE {
            return Err(FrameError::TooShort { len: bytes.len(), min: Self::MIN_SIZE });
        }

        let body_len = bytes.len() - Self::CHECKSUM_SIZE;
        let (body, trailer) = bytes.split_at(body_len);

        let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let actual = crc32fast::hash(body);
        if actual != expected {
            return Err(FrameError::ChecksumMismatch);
        }

        // SAFETY net: body_len >= PREFIX_SIZE because bytes.len() >= MIN_SIZE.
        let prefix = AddrPrefix::ref_from_bytes(&body[..Self::PREFIX_SIZE])
            .map_err(|_| FrameError::TooShort { len: bytes.len(), min: Self::MIN_SIZE })?;

        let src_ip = Ipv4Addr::from(prefix.src_ip);
        let src_port = u16::from_be_bytes(prefix.src_port);
        let payload = Bytes::copy_from_slice(&body[Self::PREFIX_SIZE..]);

        Ok(Self { src_ip, src_port, payload })
    }

    /// Total on-wire size of this frame.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        Self::PREFIX_SIZE + self.payload.len() + Self::CHECKSUM_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_empty_payload() {
        let wire = Frame::encode("10.0.0.5", 4444, b"").unwrap();
        assert_eq!(wire.len(), Frame::MIN_SIZE);

        let frame = Frame::decode(&wire).unwrap();
        assert_eq!(frame.src_ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(frame.src_port, 4444);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn round_trip_with_payload() {
        let payload = b"\x00\x01\x00\x00\x00\x06\x01\x03\x00\x00\x00\x0A";
        let wire = Frame::encode("10.0.0.5", 4444, payload).unwrap();
        let frame = Frame::decode(&wire).unwrap();
        assert_eq!(frame.payload.as_ref(), payload);
        assert_eq!(frame.src_port, 4444);
    }

    #[test]
    fn invalid_ip_rejected() {
        let err = Frame::encode("not-an-ip", 1, b"x").unwrap_err();
        assert!(matches!(err, FrameError::InvalidIp(_)));
    }

    #[test]
    fn oversize_payload_rejected_at_encode() {
        let payload = vec![0u8; Frame::MAX_PAYLOAD_SIZE + 1];
        let err = Frame::encode("127.0.0.1", 1, &payload).unwrap_err();
        assert!(matches!(err, FrameError::OversizePayload { .. }));
    }

    #[test]
    fn truncated_frame_rejected() {
        let wire = Frame::encode("127.0.0.1", 1, b"hello").unwrap();
        for cut in 0..Frame::MIN_SIZE {
            let err = Frame::decode(&wire[..cut]).unwrap_err();
            assert!(matches!(err, FrameError::TooShort { .. }), "cut={cut}");
        }
    }

    #[test]
    fn bit_flip_in_payload_breaks_checksum() {
        let mut wire = Frame::encode("127.0.0.1", 1, b"hello world").unwrap().to_vec();
        wire[8] ^= 0x01;
        let err = Frame::decode(&wire).unwrap_err();
        assert_eq!(err, FrameError::ChecksumMismatch);
    }

    #[test]
    fn bit_flip_in_ip_breaks_checksum() {
        let mut wire = Frame::encode("127.0.0.1", 1, b"hello world").unwrap().to_vec();
        wire[0] ^= 0x01;
        let err = Frame::decode(&wire).unwrap_err();
        assert_eq!(err, FrameError::ChecksumMismatch);
    }

    #[test]
    fn bit_flip_in_port_breaks_checksum() {
        let mut wire = Frame::encode("127.0.0.1", 1, b"hello world").unwrap().to_vec();
        wire[4] ^= 0x01;
        let err = Frame::decode(&wire).unwrap_err();
        assert_eq!(err, FrameError::ChecksumMismatch);
    }
}
