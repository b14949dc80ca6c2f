use proptest::prelude::*;

use cosi_protocol::message::{AnnouncementPayload, ErrorPayload};
use cosi_protocol::{Envelope, GroupChangeKind, NodeName, Payload, VoteRequest, VoteTally};

fn arb_name() -> impl Strategy<Value = NodeName> {
    "[a-zA-Z0-9]{1,12}".prop_map(NodeName::from)
}

fn arb_payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        (any::<u64>(), prop::collection::vec(any::<u8>(), 0..2048))
            .prop_map(|(round, data)| Payload::Announcement(AnnouncementPayload { round, data })),
        (any::<u64>(), ".{0,64}")
            .prop_map(|(round, reason)| Payload::Error(ErrorPayload { round, reason })),
        (any::<u64>(), arb_name(), any::<u64>(), any::<u64>()).prop_map(
            |(vote_id, name, accept, reject)| Payload::VoteRequest(VoteRequest {
                vote_id,
                kind: GroupChangeKind::RemovePeer { name },
                tally: VoteTally { accept, reject },
            })
        ),
    ]
}

proptest! {
    /// Any envelope should survive a MessagePack roundtrip with its tag intact.
    #[test]
    fn roundtrip_envelope(view in any::<u64>(), from in arb_name(), payload in arb_payload()) {
        let env = Envelope::new(view, from, payload);
        let bytes = env.to_bytes().expect("serialize");
        let decoded = Envelope::from_bytes(&bytes).expect("deserialize");
        prop_assert_eq!(decoded.msg_type, decoded.payload.msg_type());
        prop_assert_eq!(&env, &decoded);
    }

    /// Arbitrary bytes decode to an error, never a panic.
    #[test]
    fn garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Envelope::from_bytes(&bytes);
    }
}
