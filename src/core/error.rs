//! Error types for the transport.
//!
//! Each layer has its own error enum; [`TransportError`] composes them at
//! the top. Datagrams that are dropped with local recovery (the common case
//! on a hostile network) are classified by [`DropReason`] rather than
//! surfaced as errors.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors from the wire codec.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// Datagram is shorter than the two mandatory headers.
    #[error("frame too short: {actual} bytes, need at least {expected}")]
    TooShort {
        /// Minimum length required.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },

    /// Magic tag does not match the protocol.
    #[error("bad magic: 0x{0:08X}")]
    BadMagic(u32),

    /// Version field is not one we speak.
    #[error("unsupported protocol version: 0x{0:04X}")]
    UnsupportedVersion(u16),

    /// Declared length disagrees with the datagram size.
    #[error("length mismatch: header declares {declared}, datagram carries {actual}")]
    LengthMismatch {
        /// Payload length from the outer header.
        declared: usize,
        /// Payload bytes actually present.
        actual: usize,
    },

    /// Outer and reliability headers disagree on the packet type.
    #[error("type mismatch: outer 0x{outer:02X}, reliability 0x{reliability:02X}")]
    TypeMismatch {
        /// Type byte from the outer header.
        outer: u8,
        /// Type byte from the reliability sub-header.
        reliability: u8,
    },

    /// Type byte is outside the closed packet-type set.
    #[error("unknown packet type: 0x{0:02X}")]
    UnknownType(u8),
}

/// Errors from the compression stage.
#[derive(Debug, Error)]
pub enum CompressError {
    /// Body claimed to be a compression frame but was malformed.
    #[error("decompression failed: {0}")]
    DecompressFailed(String),

    /// Decompressed size exceeds the safety limit.
    #[error("decompressed size exceeded limit: {size} > {limit}")]
    SizeExceeded {
        /// Actual decompressed size.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },
}

/// Errors from the security layer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Key derivation produced no usable keys (e.g. a degenerate peer key).
    #[error("key agreement failed")]
    KeyAgreementFailed,

    /// AEAD encryption failed.
    #[error("encryption failed")]
    EncryptFailed,

    /// No candidate nonce in the forward search window authenticated the
    /// datagram.
    #[error("decryption failed (auth failure or nonce outside window)")]
    DecryptFailed,
}

/// Errors returned synchronously from the send path.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// Body exceeds the per-datagram budget; the transport does not fragment.
    #[error("payload too large: {len} bytes, max {max}")]
    PayloadTooLarge {
        /// Compressed body length.
        len: usize,
        /// Maximum body length.
        max: usize,
    },

    /// No connection exists for the destination endpoint.
    #[error("unknown peer: {0}")]
    UnknownPeer(SocketAddr),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

/// Why an inbound datagram or packet body was dropped without delivery.
///
/// These are all locally-recoverable conditions; the connection stays up.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The framed plaintext failed to parse.
    #[error("malformed frame: {0}")]
    MalformedFrame(WireError),

    /// Sequence already delivered; body suppressed.
    #[error("duplicate sequence {0}")]
    Duplicate(u16),

    /// Sequence fell behind the receive window.
    #[error("sequence {0} too old")]
    TooOld(u16),
}

/// Why a connection was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Retransmission or handshake retry limit exceeded.
    TimedOut,
    /// No datagram received within the idle timeout.
    Idle,
    /// Key agreement failed; the channel could not be established.
    CryptoFailure,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut => write!(f, "timed out"),
            Self::Idle => write!(f, "idle"),
            Self::CryptoFailure => write!(f, "crypto failure"),
        }
    }
}

/// Top-level transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Security layer error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
