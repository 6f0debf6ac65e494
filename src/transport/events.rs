//! Events delivered to the application.

use std::net::SocketAddr;

use crate::core::{DisconnectReason, PacketType};

/// What the transport tells the application.
///
/// Delivered in order per connection on the event receiver returned by
/// [`Transport::listen`](crate::transport::Transport::listen) /
/// [`Transport::connect`](crate::transport::Transport::connect).
#[derive(Debug)]
pub enum TransportEvent {
    /// The handshake with `peer` completed; the channel is secure.
    Connected {
        /// Remote endpoint.
        peer: SocketAddr,
    },

    /// The connection to `peer` was torn down. Emitted exactly once.
    Disconnected {
        /// Remote endpoint.
        peer: SocketAddr,
        /// Why the connection went away.
        reason: DisconnectReason,
    },

    /// An application payload arrived from `peer`.
    Received {
        /// Remote endpoint.
        peer: SocketAddr,
        /// Packet type discriminator.
        packet_type: PacketType,
        /// Decompressed payload bytes.
        payload: Vec<u8>,
    },

    /// The socket reported an error; the transport keeps running unless the
    /// error recurs fatally.
    SocketError {
        /// Peer the error is attributable to, when known.
        peer: Option<SocketAddr>,
        /// Error kind.
        kind: std::io::ErrorKind,
    },
}
