//! Core types shared by every layer: protocol constants, the packet-type
//! discriminator, and the error taxonomy.

pub mod constants;
mod error;
mod packet_type;

pub use constants::*;
pub use error::*;
pub use packet_type::PacketType;
