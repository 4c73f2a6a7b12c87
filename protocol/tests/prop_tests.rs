use proptest::prelude::*;

use keel_protocol::{decode_frame, encode_frame, InvPayload, Message, ProtocolError, HEADER_SIZE};
use keel_types::{Hash256, InventoryType};

const MAGIC: u32 = 0x4b45_454c;

fn arb_inv() -> impl Strategy<Value = Message> {
    (
        prop::bool::ANY,
        prop::collection::vec(any::<[u8; 32]>().prop_map(Hash256::new), 0..40),
    )
        .prop_map(|(block, hashes)| {
            let kind = if block {
                InventoryType::Block
            } else {
                InventoryType::Tx
            };
            Message::Inv(InvPayload::new(kind, hashes))
        })
}

proptest! {
    /// Arbitrary bytes never panic the frame decoder.
    #[test]
    fn garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode_frame(MAGIC, &bytes);
    }

    /// Flipping any payload byte is caught before the payload is decoded.
    #[test]
    fn payload_corruption_is_detected(msg in arb_inv(), pick in any::<prop::sample::Index>(), flip in 1u8..) {
        let mut frame = encode_frame(MAGIC, &msg).unwrap();
        let payload_len = frame.len() - HEADER_SIZE;
        let at = HEADER_SIZE + pick.index(payload_len);
        frame[at] ^= flip;
        let is_checksum_mismatch = matches!(
            decode_frame(MAGIC, &frame),
            Err(ProtocolError::ChecksumMismatch { .. })
        );
        prop_assert!(is_checksum_mismatch);
    }

    /// A truncated frame is an error, not a shorter message.
    #[test]
    fn truncation_is_rejected(msg in arb_inv(), cut in 1usize..16) {
        let frame = encode_frame(MAGIC, &msg).unwrap();
        let keep = frame.len().saturating_sub(cut);
        prop_assert!(decode_frame(MAGIC, &frame[..keep]).is_err());
    }

    /// Valid frames decode to the message that was sent.
    #[test]
    fn frames_carry_the_message(msg in arb_inv()) {
        let frame = encode_frame(MAGIC, &msg).unwrap();
        prop_assert_eq!(decode_frame(MAGIC, &frame).unwrap(), msg);
    }
}
