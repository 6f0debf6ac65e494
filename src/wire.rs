//! Wire codec for the framed packet layout.
//!
//! Every post-handshake plaintext is `[outer header][reliability
//! sub-header][body]`, all integers big-endian:
//!
//! ```text
//! Outer header (11 bytes):
//! +-----------+-----------+-----------+--------+--------+
//! | magic     | version   | length    | type   | seq    |
//! | 4 bytes   | 2 bytes   | 2 bytes   | 1 byte | 2 bytes|
//! +-----------+-----------+-----------+--------+--------+
//!
//! Reliability sub-header (17 bytes):
//! +--------+--------+--------------+--------+-----------+
//! | seq    | ack    | ack_bitfield | type   | reserved  |
//! | 2 bytes| 2 bytes| 4 bytes      | 1 byte | 8 bytes   |
//! +--------+--------+--------------+--------+-----------+
//! ```
//!
//! `length` counts the bytes after the outer header (sub-header plus body);
//! the outer `seq` and `type` mirror the sub-header for cheap filtering. The
//! reserved field is zero on send and ignored on receive.

use crate::core::{
    PacketType, WireError, MAX_BODY, OUTER_HEADER_LEN, PROTOCOL_MAGIC, PROTOCOL_VERSION,
    RELIABLE_HEADER_LEN,
};

/// Minimum size of a framed packet: both headers, empty body.
pub const MIN_FRAME_LEN: usize = OUTER_HEADER_LEN + RELIABLE_HEADER_LEN;

/// Outer packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OuterHeader {
    /// Protocol tag; always [`PROTOCOL_MAGIC`].
    pub magic: u32,
    /// Protocol version; always [`PROTOCOL_VERSION`].
    pub version: u16,
    /// Payload length after this header (sub-header plus body).
    pub length: u16,
    /// Packet type, mirroring the sub-header.
    pub packet_type: PacketType,
    /// Sequence number, mirroring the sub-header.
    pub seq: u16,
}

impl OuterHeader {
    /// Build the outer header for a frame carrying `body_len` body bytes.
    pub fn new(packet_type: PacketType, seq: u16, body_len: u16) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            length: RELIABLE_HEADER_LEN as u16 + body_len,
            packet_type,
            seq,
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> [u8; OUTER_HEADER_LEN] {
        let mut buf = [0u8; OUTER_HEADER_LEN];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..6].copy_from_slice(&self.version.to_be_bytes());
        buf[6..8].copy_from_slice(&self.length.to_be_bytes());
        buf[8] = self.packet_type.as_byte();
        buf[9..11].copy_from_slice(&self.seq.to_be_bytes());
        buf
    }
}

/// Reliability sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReliableHeader {
    /// Sequence number of this frame.
    pub seq: u16,
    /// Highest sequence received from the peer.
    pub ack: u16,
    /// Receipt bits for the sequences at and below `ack`; bit k of the
    /// field acknowledges sequence `ack - 1 - k` to the remote sender.
    pub ack_bitfield: u32,
    /// Packet type, mirroring the outer header.
    pub packet_type: PacketType,
    /// Reserved; zero on send, ignored on receive.
    pub reserved: u64,
}

impl ReliableHeader {
    /// Build a sub-header for an outgoing frame.
    pub fn new(seq: u16, ack: u16, ack_bitfield: u32, packet_type: PacketType) -> Self {
        Self {
            seq,
            ack,
            ack_bitfield,
            packet_type,
            reserved: 0,
        }
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> [u8; RELIABLE_HEADER_LEN] {
        let mut buf = [0u8; RELIABLE_HEADER_LEN];
        buf[0..2].copy_from_slice(&self.seq.to_be_bytes());
        buf[2..4].copy_from_slice(&self.ack.to_be_bytes());
        buf[4..8].copy_from_slice(&self.ack_bitfield.to_be_bytes());
        buf[8] = self.packet_type.as_byte();
        buf[9..17].copy_from_slice(&self.reserved.to_be_bytes());
        buf
    }
}

/// A decoded frame borrowing its body from the input datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Outer header.
    pub outer: OuterHeader,
    /// Reliability sub-header.
    pub reliability: ReliableHeader,
    /// Body bytes (possibly a compression frame), length `outer.length - 17`.
    pub body: &'a [u8],
}

/// Assemble a complete framed plaintext.
///
/// The caller is responsible for the body bound; `debug_assert`ed here
/// because [`prepare_outgoing`](crate::reliability::prepare_outgoing)
/// rejects oversized bodies before framing.
pub fn encode_frame(reliability: &ReliableHeader, body: &[u8]) -> Vec<u8> {
    debug_assert!(body.len() <= MAX_BODY);
    let outer = OuterHeader::new(reliability.packet_type, reliability.seq, body.len() as u16);

    let mut wire = Vec::with_capacity(MIN_FRAME_LEN + body.len());
    wire.extend_from_slice(&outer.encode());
    wire.extend_from_slice(&reliability.encode());
    wire.extend_from_slice(body);
    wire
}

/// Parse a framed plaintext into headers and a body slice.
pub fn decode(bytes: &[u8]) -> Result<Frame<'_>, WireError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(WireError::TooShort {
            expected: MIN_FRAME_LEN,
            actual: bytes.len(),
        });
    }

    let magic = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != PROTOCOL_MAGIC {
        return Err(WireError::BadMagic(magic));
    }

    let version = u16::from_be_bytes([bytes[4], bytes[5]]);
    if version != PROTOCOL_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }

    let length = u16::from_be_bytes([bytes[6], bytes[7]]);
    if length as usize + OUTER_HEADER_LEN != bytes.len() || (length as usize) < RELIABLE_HEADER_LEN
    {
        return Err(WireError::LengthMismatch {
            declared: length as usize,
            actual: bytes.len() - OUTER_HEADER_LEN,
        });
    }

    let outer_type_byte = bytes[8];
    let outer_type = PacketType::from_byte(outer_type_byte)
        .ok_or(WireError::UnknownType(outer_type_byte))?;
    let outer_seq = u16::from_be_bytes([bytes[9], bytes[10]]);

    let sub = &bytes[OUTER_HEADER_LEN..];
    let seq = u16::from_be_bytes([sub[0], sub[1]]);
    let ack = u16::from_be_bytes([sub[2], sub[3]]);
    let ack_bitfield = u32::from_be_bytes([sub[4], sub[5], sub[6], sub[7]]);
    let sub_type_byte = sub[8];
    let packet_type =
        PacketType::from_byte(sub_type_byte).ok_or(WireError::UnknownType(sub_type_byte))?;
    let reserved = u64::from_be_bytes([
        sub[9], sub[10], sub[11], sub[12], sub[13], sub[14], sub[15], sub[16],
    ]);

    if outer_type != packet_type {
        return Err(WireError::TypeMismatch {
            outer: outer_type_byte,
            reliability: sub_type_byte,
        });
    }

    Ok(Frame {
        outer: OuterHeader {
            magic,
            version,
            length,
            packet_type: outer_type,
            seq: outer_seq,
        },
        reliability: ReliableHeader {
            seq,
            ack,
            ack_bitfield,
            packet_type,
            reserved,
        },
        body: &bytes[MIN_FRAME_LEN..],
    })
}
