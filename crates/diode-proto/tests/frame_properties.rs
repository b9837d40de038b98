//! Property tests for the wire codec: round-trip and mutation coverage
//! for the fixed prefix and trailing checksum.

use diode_proto::{Frame, FrameError};
use proptest::prelude::*;

fn arb_ipv4() -> impl Strategy<Value = String> {
    (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>())
        .prop_map(|(a, b, c, d)| format!("{a}.{b}.{c}.{d}"))
}

proptest! {
    // `decode(encode(ip, port, payload)) == (ip, port, payload)` for any
    // valid IPv4 address, port, and payload under the size cap.
    #[test]
    fn round_trip(ip in arb_ipv4(), port in any::<u16>(), payload in prop::collection::vec(any::<u8>(), 0..4096)) {
        let wire = Frame::encode(&ip, port, &payload).expect("valid ip/size should encode");
        let frame = Frame::decode(&wire).expect("freshly encoded frame should decode");

        prop_assert_eq!(frame.src_ip.to_string(), ip);
        prop_assert_eq!(frame.src_port, port);
        prop_assert_eq!(frame.payload.as_ref(), payload.as_slice());
    }

    // Flipping any single bit anywhere in the frame causes a checksum
    // mismatch (the checksum covers the entire prefix+payload).
    #[test]
    fn single_bit_flip_always_detected(
        ip in arb_ipv4(),
        port in any::<u16>(),
        payload in prop::collection::vec(any::<u8>(), 1..256),
        bit in 0usize..64,
    ) {
        let wire = Frame::encode(&ip, port, &payload).unwrap();
        let body_bits = (wire.len() - Frame::CHECKSUM_SIZE) * 8;
        let flip_bit = bit % body_bits;

        let mut mutated = wire.to_vec();
        mutated[flip_bit / 8] ^= 1 << (flip_bit % 8);

        prop_assert_eq!(Frame::decode(&mutated).unwrap_err(), FrameError::ChecksumMismatch);
    }

    // Truncating any frame below the minimum size yields `TooShort`.
    #[test]
    fn truncation_below_minimum_is_too_short(
        ip in arb_ipv4(),
        port in any::<u16>(),
        payload in prop::collection::vec(any::<u8>(), 0..64),
        cut in 0usize..Frame::MIN_SIZE,
    ) {
        let wire = Frame::encode(&ip, port, &payload).unwrap();
        prop_assert!(matches!(Frame::decode(&wire[..cut]), Err(FrameError::TooShort { .. })));
    }
}
