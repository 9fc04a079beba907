// Binary ASR wire frame codec
//
// Frame layout:
//   byte 0: version (high nibble) | header words (low nibble)
//   byte 1: message type (high nibble) | flags (low nibble)
//   byte 2: serialization (high nibble) | compression (low nibble)
//   byte 3: reserved, always 0x00
//   [4 bytes big-endian sequence, only when flags indicate one]
//   4 bytes big-endian payload length
//   payload
//
// Error frames carry a raw 4-byte big-endian error code instead of a
// length-prefixed payload; no compression or serialization applies.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use std::io::{Read, Write};

pub const PROTOCOL_VERSION: u8 = 0x1;
pub const HEADER_WORDS: u8 = 0x1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    FullClientRequest = 0x1,
    AudioOnly = 0x2,
    ServerResponse = 0x9,
    ErrorResponse = 0xF,
}

impl MessageType {
    fn from_nibble(v: u8) -> Option<Self> {
        match v {
            0x1 => Some(MessageType::FullClientRequest),
            0x2 => Some(MessageType::AudioOnly),
            0x9 => Some(MessageType::ServerResponse),
            0xF => Some(MessageType::ErrorResponse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameFlags {
    None = 0x0,
    Sequenced = 0x1,
    LastPackage = 0x2,
    SequencedLast = 0x3,
}

impl FrameFlags {
    fn from_nibble(v: u8) -> Option<Self> {
        match v {
            0x0 => Some(FrameFlags::None),
            0x1 => Some(FrameFlags::Sequenced),
            0x2 => Some(FrameFlags::LastPackage),
            0x3 => Some(FrameFlags::SequencedLast),
            _ => None,
        }
    }

    /// Whether a 4-byte sequence word follows the header.
    pub fn has_sequence(self) -> bool {
        matches!(self, FrameFlags::Sequenced | FrameFlags::SequencedLast)
    }

    /// Whether this frame marks the end of an utterance.
    pub fn is_last_package(self) -> bool {
        matches!(self, FrameFlags::LastPackage | FrameFlags::SequencedLast)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Serialization {
    Raw = 0x0,
    Json = 0x1,
}

impl Serialization {
    fn from_nibble(v: u8) -> Option<Self> {
        match v {
            0x0 => Some(Serialization::Raw),
            0x1 => Some(Serialization::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireCompression {
    None = 0x0,
    Gzip = 0x1,
}

impl WireCompression {
    fn from_nibble(v: u8) -> Option<Self> {
        match v {
            0x0 => Some(WireCompression::None),
            0x1 => Some(WireCompression::Gzip),
            _ => None,
        }
    }
}

/// One unit of the wire protocol. `payload` is always the uncompressed
/// bytes; the codec applies and strips gzip according to `compression`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsrFrame {
    pub message_type: MessageType,
    pub flags: FrameFlags,
    pub serialization: Serialization,
    pub compression: WireCompression,
    pub sequence: Option<i32>,
    pub payload: Vec<u8>,
}

impl AsrFrame {
    /// A config frame: JSON payload, gzip on the wire.
    pub fn full_client_request(json_payload: Vec<u8>) -> Self {
        Self {
            message_type: MessageType::FullClientRequest,
            flags: FrameFlags::None,
            serialization: Serialization::Json,
            compression: WireCompression::Gzip,
            sequence: None,
            payload: json_payload,
        }
    }

    /// A PCM audio frame: raw payload, gzip on the wire.
    pub fn audio(pcm: Vec<u8>) -> Self {
        Self {
            message_type: MessageType::AudioOnly,
            flags: FrameFlags::None,
            serialization: Serialization::Raw,
            compression: WireCompression::Gzip,
            sequence: None,
            payload: pcm,
        }
    }

    /// The explicit end-of-utterance marker: empty payload, LastPackage.
    pub fn last_package() -> Self {
        Self {
            message_type: MessageType::AudioOnly,
            flags: FrameFlags::LastPackage,
            serialization: Serialization::Raw,
            compression: WireCompression::Gzip,
            sequence: None,
            payload: Vec::new(),
        }
    }
}

/// Result of decoding one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete non-error frame, payload decompressed.
    Frame(AsrFrame),
    /// An ErrorResponse frame carrying its 4-byte big-endian code.
    Error { code: u32 },
    /// Declared lengths exceed the available bytes. Defensive only; the
    /// transport delivers whole messages.
    Incomplete,
}

/// Encode a frame to wire bytes. Compresses the payload when the frame's
/// compression field says Gzip; the length field always reflects the
/// post-compression byte count.
pub fn encode(frame: &AsrFrame) -> Result<Vec<u8>> {
    let body = match frame.compression {
        WireCompression::None => frame.payload.clone(),
        WireCompression::Gzip => gzip(&frame.payload)?,
    };

    let mut out = Vec::with_capacity(8 + body.len());
    out.push(PROTOCOL_VERSION << 4 | HEADER_WORDS);
    out.push((frame.message_type as u8) << 4 | frame.flags as u8);
    out.push((frame.serialization as u8) << 4 | frame.compression as u8);
    out.push(0x00);
    if frame.flags.has_sequence() {
        out.extend_from_slice(&frame.sequence.unwrap_or(0).to_be_bytes());
    }
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode one wire buffer. Returns `Decoded::Incomplete` rather than
/// failing when the buffer is shorter than the declared lengths; invalid
/// field values and malformed gzip are hard errors.
pub fn decode(bytes: &[u8]) -> Result<Decoded> {
    if bytes.len() < 4 {
        return Ok(Decoded::Incomplete);
    }

    let message_type = MessageType::from_nibble(bytes[1] >> 4)
        .with_context(|| format!("unknown message type nibble {:#x}", bytes[1] >> 4))?;
    let flags = FrameFlags::from_nibble(bytes[1] & 0x0F)
        .with_context(|| format!("unknown flags nibble {:#x}", bytes[1] & 0x0F))?;
    let serialization = Serialization::from_nibble(bytes[2] >> 4)
        .with_context(|| format!("unknown serialization nibble {:#x}", bytes[2] >> 4))?;
    let compression = WireCompression::from_nibble(bytes[2] & 0x0F)
        .with_context(|| format!("unknown compression nibble {:#x}", bytes[2] & 0x0F))?;

    let mut offset = 4usize;

    if message_type == MessageType::ErrorResponse {
        // Error frames carry a bare big-endian code, nothing else applies.
        if bytes.len() < offset + 4 {
            return Ok(Decoded::Incomplete);
        }
        let code = u32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]);
        return Ok(Decoded::Error { code });
    }

    let sequence = if flags.has_sequence() {
        if bytes.len() < offset + 4 {
            return Ok(Decoded::Incomplete);
        }
        let seq = i32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]);
        offset += 4;
        Some(seq)
    } else {
        None
    };

    if bytes.len() < offset + 4 {
        return Ok(Decoded::Incomplete);
    }
    let declared = u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]) as usize;
    offset += 4;

    if bytes.len() < offset + declared {
        return Ok(Decoded::Incomplete);
    }
    let body = &bytes[offset..offset + declared];

    let payload = match compression {
        WireCompression::None => body.to_vec(),
        WireCompression::Gzip => gunzip(body)?,
    };

    Ok(Decoded::Frame(AsrFrame {
        message_type,
        flags,
        serialization,
        compression,
        sequence,
        payload,
    }))
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(data).context("gzip write failed")?;
    encoder.finish().context("gzip finish failed")
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .context("gzip decompression failed")?;
    Ok(out)
}
