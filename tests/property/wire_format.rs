//! Property-based tests for the relayed message format.
//!
//! Uses proptest to verify:
//! 1. The sender identity always appears verbatim inside the leading brackets.
//! 2. The payload always follows the `": "` separator byte-for-byte.
//! 3. Socket addresses render to identities that survive the format unchanged.

use std::net::{Ipv4Addr, SocketAddr};

use broadcast_proto::{PeerId, format_broadcast};
use proptest::prelude::*;

/// Strategy for identities shaped like `ip:port`.
fn arb_peer_id() -> impl Strategy<Value = PeerId> {
    (any::<u32>(), any::<u16>())
        .prop_map(|(ip, port)| PeerId::from(SocketAddr::from((Ipv4Addr::from(ip), port))))
}

proptest! {
    #[test]
    fn frame_starts_with_bracketed_identity(from in arb_peer_id(), payload in ".*") {
        let frame = format_broadcast(&from, &payload);
        let prefix = format!("[{}]: ", from.as_str());
        prop_assert!(frame.starts_with(&prefix));
    }

    #[test]
    fn payload_is_carried_verbatim(from in arb_peer_id(), payload in "\\PC*") {
        let frame = format_broadcast(&from, &payload);
        let prefix_len = from.as_str().len() + 4;
        prop_assert_eq!(&frame[prefix_len..], payload.as_str());
        prop_assert_eq!(frame.len(), prefix_len + payload.len());
    }

    #[test]
    fn multiline_payloads_are_not_split(from in arb_peer_id(), lines in prop::collection::vec("[a-z ]{0,16}", 0..8)) {
        let payload = lines.join("\n");
        let frame = format_broadcast(&from, &payload);
        prop_assert_eq!(frame.matches('\n').count(), payload.matches('\n').count());
    }
}
