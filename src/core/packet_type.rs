//! Packet type discriminator.

/// The closed set of packet types carried in both the outer header and the
/// reliability sub-header.
///
/// `ReliableAck` and `Heartbeat` may carry an empty body; every other type
/// carries an application payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Handshake control traffic (reserved; the key exchange itself is an
    /// unframed 32-byte datagram).
    Handshake = 0x00,
    /// Explicit acknowledgement frame, usually empty-bodied.
    ReliableAck = 0x01,
    /// Player input.
    PlayerAction = 0x02,
    /// Chat text.
    ChatMessage = 0x03,
    /// World state snapshot.
    GameState = 0x04,
    /// Keepalive; empty-bodied heartbeats are not delivered to the
    /// application.
    Heartbeat = 0x05,
    /// Echo/benchmark traffic.
    EchoTest = 0x06,
}

impl PacketType {
    /// Parse a packet type from its wire byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Handshake),
            0x01 => Some(Self::ReliableAck),
            0x02 => Some(Self::PlayerAction),
            0x03 => Some(Self::ChatMessage),
            0x04 => Some(Self::GameState),
            0x05 => Some(Self::Heartbeat),
            0x06 => Some(Self::EchoTest),
            _ => None,
        }
    }

    /// Wire byte for this type.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}
