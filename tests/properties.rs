#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Property-based tests using proptest
//!
//! These validate codec invariants across randomly generated packets and
//! hostile byte streams.

use mesh_protocol::{NetState, Packet, Parser};
use proptest::prelude::*;

fn arb_net_state() -> impl Strategy<Value = Option<NetState>> {
    prop_oneof![
        Just(None),
        Just(Some(NetState::Route)),
        Just(Some(NetState::Service)),
        Just(Some(NetState::Query)),
    ]
}

prop_compose! {
    fn arb_packet()(
        net_state in arb_net_state(),
        service in "[a-z0-9_-]{0,16}",
        src_addr in "[a-z0-9_-]{0,16}",
        dest_addr in "[a-z0-9_-]{0,16}",
        next_addr in "[a-z0-9_-]{0,16}",
        seq_num in any::<u16>(),
        ack_block in any::<u32>(),
        context_id in any::<u16>(),
        data_type in any::<u8>(),
        data in prop::collection::vec(any::<u8>(), 0..2048),
    ) -> Packet {
        Packet {
            net_state,
            service,
            src_addr,
            dest_addr,
            next_addr,
            seq_num,
            ack_block,
            context_id,
            data_type,
            data,
        }
    }
}

proptest! {
    // Property: any packet with any subset of fields populated survives
    // encode -> decode field-for-field.
    #[test]
    fn prop_packet_roundtrip(packet in arb_packet()) {
        let encoded = packet.encode().expect("encode should not fail");
        let decoded = Packet::decode(&encoded).expect("decode should not fail");
        prop_assert_eq!(decoded, packet);
    }
}

proptest! {
    // Property: encoding is deterministic.
    #[test]
    fn prop_encoding_deterministic(packet in arb_packet()) {
        prop_assert_eq!(packet.encode().unwrap(), packet.encode().unwrap());
    }
}

proptest! {
    // Property: a framed packet survives the parser regardless of how the
    // stream is chopped into chunks.
    #[test]
    fn prop_roundtrip_any_chunking(
        packet in arb_packet(),
        chunk_sizes in prop::collection::vec(1usize..64, 1..64),
    ) {
        let stream = packet.to_frame_bytes().unwrap();
        let mut parser = Parser::new();
        let mut got = Vec::new();
        let mut offset = 0;
        let mut sizes = chunk_sizes.into_iter().cycle();
        while offset < stream.len() {
            let take = sizes.next().unwrap().min(stream.len() - offset);
            parser.read_bytes(&stream[offset..offset + take], &mut |p| got.push(p));
            offset += take;
        }
        prop_assert_eq!(got, vec![packet]);
    }
}

proptest! {
    // Property: arbitrary garbage never panics the parser or the decoder,
    // and the parser is still usable afterwards.
    #[test]
    fn prop_parser_survives_garbage(garbage in prop::collection::vec(any::<u8>(), 0..4096)) {
        let mut parser = Parser::new();
        parser.read_bytes(&garbage, &mut |_p| {});

        // flush whatever partial state the garbage left behind
        parser.read_bytes(&[0xC0], &mut |_p| {});

        let packet = Packet { seq_num: 1, ..Default::default() };
        let mut got = Vec::new();
        parser.read_bytes(&packet.to_frame_bytes().unwrap(), &mut |p| got.push(p));
        prop_assert_eq!(got, vec![packet]);
    }
}

proptest! {
    // Property: decoding arbitrary bytes returns an error or a packet,
    // never panics.
    #[test]
    fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Packet::decode(&bytes);
    }
}
