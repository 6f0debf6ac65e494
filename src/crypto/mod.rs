//! Security layer: ephemeral key agreement and the AEAD channel.
//!
//! The handshake is deliberately minimal — one raw 32-byte public key in
//! each direction, in the clear — and everything after it is authenticated
//! encryption with per-datagram nonces. Keys are ephemeral per session;
//! nothing survives a restart.

mod channel;
mod keys;

pub use channel::SecureChannel;
pub use keys::{DirectionalKeys, EphemeralKeypair, Role, SessionKey};
