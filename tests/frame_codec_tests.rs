// Unit tests for the binary ASR wire frame codec
//
// These cover header packing, the optional sequence word, gzip handling,
// error frames, and truncated-buffer behavior.

use voicepipe::asr::frame::{
    decode, encode, AsrFrame, Decoded, FrameFlags, MessageType, Serialization, WireCompression,
};

fn round_trip(frame: &AsrFrame) -> AsrFrame {
    let wire = encode(frame).unwrap();
    match decode(&wire).unwrap() {
        Decoded::Frame(decoded) => decoded,
        other => panic!("expected a frame, got {:?}", other),
    }
}

#[test]
fn test_full_client_request_round_trip() {
    let frame = AsrFrame::full_client_request(br#"{"uid":"abc"}"#.to_vec());
    assert_eq!(round_trip(&frame), frame);
}

#[test]
fn test_audio_frame_round_trip() {
    let pcm: Vec<u8> = (0..3200u32).map(|i| (i % 251) as u8).collect();
    let frame = AsrFrame::audio(pcm.clone());
    let decoded = round_trip(&frame);
    assert_eq!(decoded.message_type, MessageType::AudioOnly);
    assert_eq!(decoded.payload, pcm);
}

#[test]
fn test_uncompressed_raw_frame_round_trip() {
    let frame = AsrFrame {
        message_type: MessageType::ServerResponse,
        flags: FrameFlags::None,
        serialization: Serialization::Raw,
        compression: WireCompression::None,
        sequence: None,
        payload: vec![1, 2, 3, 4],
    };
    assert_eq!(round_trip(&frame), frame);
}

#[test]
fn test_sequenced_frame_round_trip() {
    let frame = AsrFrame {
        message_type: MessageType::AudioOnly,
        flags: FrameFlags::Sequenced,
        serialization: Serialization::Raw,
        compression: WireCompression::Gzip,
        sequence: Some(-42),
        payload: vec![9; 100],
    };
    let decoded = round_trip(&frame);
    assert_eq!(decoded.sequence, Some(-42));
    assert_eq!(decoded, frame);
}

#[test]
fn test_last_package_flag_survives() {
    let decoded = round_trip(&AsrFrame::last_package());
    assert!(decoded.flags.is_last_package());
    assert!(decoded.payload.is_empty());
}

#[test]
fn test_header_byte_layout() {
    let frame = AsrFrame::audio(vec![0u8; 16]);
    let wire = encode(&frame).unwrap();
    // version 1, header size 1 word
    assert_eq!(wire[0], 0x11);
    // AudioOnly (0x2), no flags
    assert_eq!(wire[1], 0x20);
    // raw serialization, gzip compression
    assert_eq!(wire[2], 0x01);
    assert_eq!(wire[3], 0x00);
}

#[test]
fn test_length_field_reflects_compressed_size() {
    let frame = AsrFrame::audio(vec![0u8; 3200]);
    let wire = encode(&frame).unwrap();
    let declared = u32::from_be_bytes([wire[4], wire[5], wire[6], wire[7]]) as usize;
    assert_eq!(wire.len(), 8 + declared);
    // 3200 zero bytes compress well below their raw size
    assert!(declared < 3200);
}

#[test]
fn test_gzip_payload_not_stored_raw() {
    let frame = AsrFrame::audio(b"hello hello hello hello".to_vec());
    let wire = encode(&frame).unwrap();
    // gzip magic right after the 8-byte header
    assert_eq!(&wire[8..10], &[0x1f, 0x8b]);
}

#[test]
fn test_error_frame_decodes_to_code() {
    let mut wire = vec![0x11, 0xF0, 0x00, 0x00];
    wire.extend_from_slice(&45000002u32.to_be_bytes());
    assert_eq!(decode(&wire).unwrap(), Decoded::Error { code: 45000002 });
}

#[test]
fn test_truncated_buffers_are_incomplete() {
    let frame = AsrFrame::audio(vec![7u8; 64]);
    let wire = encode(&frame).unwrap();
    for len in 0..wire.len() {
        assert_eq!(
            decode(&wire[..len]).unwrap(),
            Decoded::Incomplete,
            "prefix of {} bytes should be incomplete",
            len
        );
    }
}

#[test]
fn test_truncated_error_frame_is_incomplete() {
    let wire = vec![0x11, 0xF0, 0x00, 0x00, 0x02];
    assert_eq!(decode(&wire).unwrap(), Decoded::Incomplete);
}

#[test]
fn test_unknown_message_type_is_an_error() {
    // 0x5 is not an assigned message type
    let wire = vec![0x11, 0x50, 0x00, 0x00, 0, 0, 0, 0];
    assert!(decode(&wire).is_err());
}

#[test]
fn test_unknown_compression_is_an_error() {
    let wire = vec![0x11, 0x20, 0x0F, 0x00, 0, 0, 0, 0];
    assert!(decode(&wire).is_err());
}

#[test]
fn test_corrupt_gzip_is_an_error() {
    let frame = AsrFrame {
        message_type: MessageType::AudioOnly,
        flags: FrameFlags::None,
        serialization: Serialization::Raw,
        compression: WireCompression::Gzip,
        sequence: None,
        payload: Vec::new(),
    };
    let mut wire = encode(&frame).unwrap();
    let body_len = wire.len();
    // stomp on the gzip stream
    wire[body_len - 1] ^= 0xFF;
    wire[9] ^= 0xFF;
    assert!(decode(&wire).is_err());
}

#[test]
fn test_empty_payload_round_trip() {
    let frame = AsrFrame {
        message_type: MessageType::ServerResponse,
        flags: FrameFlags::None,
        serialization: Serialization::Json,
        compression: WireCompression::None,
        sequence: None,
        payload: Vec::new(),
    };
    assert_eq!(round_trip(&frame), frame);
}
