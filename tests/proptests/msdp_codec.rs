// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Properties of the MSDP framing and SA payload codec

use bytes::BytesMut;
use msdpd::protocols::msdp::{encode_sa, MsdpHeader, MsdpSaMessage, MAX_MESSAGE_SIZE, MAX_SA_ENTRIES};
use msdpd::protocols::msdp_tcp::MsdpCodec;
use proptest::prelude::*;
use std::net::Ipv4Addr;
use tokio_util::codec::Decoder;

fn unicast() -> impl Strategy<Value = Ipv4Addr> {
    (1u8..=223, any::<u8>(), any::<u8>(), 1u8..=254)
        .prop_filter("loopback", |(a, ..)| *a != 127)
        .prop_map(|(a, b, c, d)| Ipv4Addr::new(a, b, c, d))
}

fn group() -> impl Strategy<Value = Ipv4Addr> {
    (224u8..=239, any::<u8>(), any::<u8>(), any::<u8>())
        .prop_map(|(a, b, c, d)| Ipv4Addr::new(a, b, c, d))
}

proptest! {
    /// **Property:** SA payload parsing never panics on arbitrary input
    #[test]
    fn sa_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..600)) {
        let _ = MsdpSaMessage::parse(&data);
    }

    /// **Property:** every entry of a parsed payload is either kept or
    /// reported, never silently lost
    #[test]
    fn sa_parse_accounts_for_every_entry(data in prop::collection::vec(any::<u8>(), 5..600)) {
        if let Ok(msg) = MsdpSaMessage::parse(&data) {
            prop_assert_eq!(msg.entries.len() + msg.invalid.len(), data[0] as usize);
            for (source, group) in &msg.entries {
                prop_assert!(group.is_multicast());
                prop_assert!(!source.is_multicast());
            }
        }
    }

    /// **Property:** the frame decoder never panics, never yields a frame
    /// longer than the maximum, and consumes exactly what it returns
    #[test]
    fn frame_decoder_is_bounded(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let mut codec = MsdpCodec;
        let mut buf = BytesMut::from(&data[..]);
        loop {
            let before = buf.len();
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => {
                    prop_assert!(frame.payload.len() + MsdpHeader::SIZE <= MAX_MESSAGE_SIZE);
                    prop_assert_eq!(before - buf.len(), frame.payload.len() + MsdpHeader::SIZE);
                }
                Ok(None) | Err(_) => break,
            }
        }
    }

    /// **Property:** encoded SAs respect the size limits and carry every
    /// entry exactly once
    #[test]
    fn encode_sa_chunks_within_limits(
        rp in unicast(),
        entries in prop::collection::vec((unicast(), group()), 0..700),
    ) {
        let messages = encode_sa(rp, &entries);
        let mut decoded = Vec::new();
        for (msg, count) in &messages {
            prop_assert!(msg.len() <= MAX_MESSAGE_SIZE);
            prop_assert!(*count <= MAX_SA_ENTRIES);
            let header = MsdpHeader::parse(msg).unwrap();
            prop_assert_eq!(header.length as usize, msg.len());
            let sa = MsdpSaMessage::parse(&msg[MsdpHeader::SIZE..]).unwrap();
            prop_assert_eq!(sa.rp_address, rp);
            prop_assert_eq!(sa.entries.len(), *count);
            decoded.extend(sa.entries);
        }
        prop_assert_eq!(decoded, entries);
    }
}
