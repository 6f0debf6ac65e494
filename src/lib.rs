//! # SQUALL
//!
//! A secure, reliable, connection-oriented message transport over UDP for
//! real-time applications. One authoritative server accepts many concurrent
//! clients; each client keeps one logical connection to the server. On top
//! of best-effort datagrams the transport provides:
//!
//! - **Security**: an ephemeral X25519 key exchange and ChaCha20-Poly1305
//!   authenticated encryption of every post-handshake datagram, with strict
//!   nonce discipline
//! - **Reliability**: sequence numbers, cumulative + bitfield
//!   acknowledgements, RFC 6298-style RTT/RTO estimation, retransmission
//!   with exponential backoff, and duplicate suppression
//! - **Compression**: transparent zstd body compression with
//!   self-identifying frames
//!
//! The transport is message oriented: one application payload per reliable
//! unit, delivered at most once, not necessarily in order. Payloads that do
//! not fit a single datagram are rejected rather than fragmented.
//!
//! ## Example
//!
//! ```no_run
//! use squall::{Delivery, PacketType, Transport, TransportConfig, TransportEvent};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server_addr = "203.0.113.7:19000".parse()?;
//! let (transport, mut events) = Transport::connect(server_addr, TransportConfig::default()).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         TransportEvent::Connected { peer } => {
//!             transport.send(peer, PacketType::PlayerAction, b"jump", Delivery::Reliable)?;
//!         }
//!         TransportEvent::Received { packet_type, payload, .. } => {
//!             println!("{packet_type:?}: {} bytes", payload.len());
//!         }
//!         TransportEvent::Disconnected { reason, .. } => {
//!             println!("gone: {reason}");
//!             break;
//!         }
//!         TransportEvent::SocketError { kind, .. } => eprintln!("socket: {kind:?}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`core`](crate::core): constants, packet types, and the error taxonomy
//! - [`wire`]: the framed packet codec
//! - [`compress`]: the zstd body stage
//! - [`crypto`]: key agreement and the AEAD channel
//! - [`reliability`]: windows, RTT/RTO, retransmission, dedup
//! - [`transport`]: the connection manager, I/O pump, and [`Transport`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod compress;
mod connection;
pub mod core;
pub mod crypto;
pub mod reliability;
pub mod transport;
pub mod wire;

pub use crate::core::{
    DisconnectReason, DropReason, PacketType, SendError, TransportError, WireError,
};
pub use crate::reliability::Delivery;
pub use crate::transport::{EventReceiver, Transport, TransportConfig, TransportEvent};
