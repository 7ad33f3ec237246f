//! Serial frame vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use bytes::Bytes;

use ecrlink_core::protocol::frame::{decode_packet, encode_packet};

mod vector_loader;
use vector_loader::load;

#[test]
fn frame_vectors() {
    let files = [
        "frame_handshake.json",
        "frame_handshake_confirm.json",
        "frame_data.json",
        "frame_ack.json",
        "frame_bad_checksum.json",
        "frame_bad_length.json",
        "frame_unknown_type.json",
        "frame_too_short.json",
    ];

    for f in files {
        let v = load(f);
        let raw = v.frame.decode();
        let res = decode_packet(Bytes::from(raw.clone()));

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(e.kind().as_str(), err.code, "vector={}", v.description);
            continue;
        }

        let packet = res.expect("expected ok packet");
        let ex = v.expect.expect("missing expect block");

        assert_eq!(packet.packet_type as u64, ex["type"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(packet.ack as u64, ex["ack"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(packet.id as u64, ex["id"].as_u64().unwrap(), "vector={}", v.description);
        assert_eq!(hex::encode(&packet.data), ex["data_hex"].as_str().unwrap(), "vector={}", v.description);

        // valid vectors are canonical: re-encoding gives the same bytes
        assert_eq!(&encode_packet(&packet).unwrap()[..], &raw[..], "vector={}", v.description);
    }
}
