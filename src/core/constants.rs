//! Protocol constants.
//!
//! Wire-format values are fixed by the protocol and MUST NOT be changed;
//! the timing values in this module are the defaults that
//! [`TransportConfig`](crate::transport::TransportConfig) starts from.

use std::time::Duration;

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// Protocol tag at the start of every framed packet ("SQLL").
pub const PROTOCOL_MAGIC: u32 = 0x5351_4C4C;

/// Protocol version (v1).
pub const PROTOCOL_VERSION: u16 = 0x0001;

/// Maximum datagram size on the wire, before encryption overhead.
pub const MAX_DATAGRAM: usize = 1024;

/// Outer header size: 4 (magic) + 2 (version) + 2 (length) + 1 (type) + 2 (seq).
pub const OUTER_HEADER_LEN: usize = 11;

/// Reliability sub-header size: 2 (seq) + 2 (ack) + 4 (bitfield) + 1 (type) + 8 (reserved).
pub const RELIABLE_HEADER_LEN: usize = 17;

/// Maximum body size after both headers.
pub const MAX_BODY: usize = MAX_DATAGRAM - OUTER_HEADER_LEN - RELIABLE_HEADER_LEN;

/// Size of a pre-handshake datagram (one raw X25519 public key).
pub const HANDSHAKE_DATAGRAM_LEN: usize = 32;

// =============================================================================
// CRYPTOGRAPHY
// =============================================================================

/// X25519 public key size.
pub const PUBLIC_KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 session key size.
pub const SESSION_KEY_LEN: usize = 32;

/// IETF ChaCha20-Poly1305 nonce size.
pub const AEAD_NONCE_LEN: usize = 12;

/// Poly1305 authentication tag size.
pub const AEAD_TAG_LEN: usize = 16;

/// Default forward search window for out-of-order receive nonces.
pub const DEFAULT_NONCE_SEARCH_WINDOW: u64 = 5;

// =============================================================================
// RELIABILITY (RFC 6298-style RTT/RTO)
// =============================================================================

/// Smoothing factor for SRTT (1/8).
pub const RTT_ALPHA: f32 = 0.125;

/// Smoothing factor for RTT variance (1/4).
pub const RTT_BETA: f32 = 0.25;

/// Variance multiplier for RTO calculation.
pub const RTO_K: f32 = 4.0;

/// Assumed RTT before the first sample.
pub const INITIAL_RTT_MS: f32 = 200.0;

/// Assumed RTT variance before the first sample.
pub const INITIAL_RTT_VAR_MS: f32 = 100.0;

/// Retransmission timeout before the first sample.
pub const INITIAL_RTO_MS: f32 = 400.0;

/// Minimum retransmission timeout.
pub const DEFAULT_MIN_RTO_MS: f32 = 100.0;

/// Maximum retransmission timeout.
pub const DEFAULT_MAX_RTO_MS: f32 = 3000.0;

/// Retransmission attempts before a connection is dropped.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Lower bound on the delayed-ACK interval.
pub const DEFAULT_ACK_DELAY_MIN_MS: f32 = 5.0;

/// Upper bound on the delayed-ACK interval.
pub const DEFAULT_ACK_DELAY_MAX_MS: f32 = 20.0;

/// Receive window width: how many sequences below the highest are tracked.
pub const RECEIVE_WINDOW_BITS: u16 = 32;

// =============================================================================
// CONNECTION LIFECYCLE
// =============================================================================

/// Reap a connection after this long without any inbound datagram.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maintenance tick rate.
pub const DEFAULT_TICK_HZ: u32 = 10;

/// Byte bound on payloads queued before the handshake completes.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 512 * 1024;

/// Re-send the handshake public key at this interval while unanswered.
pub const DEFAULT_HANDSHAKE_RESEND: Duration = Duration::from_millis(1000);

/// Handshake re-sends before giving up.
pub const DEFAULT_HANDSHAKE_RETRIES: u32 = 5;

// =============================================================================
// COMPRESSION
// =============================================================================

/// zstd frame magic in wire order; the self-identifying prefix of every
/// compressed body.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Default zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Cap on decompressed body size.
pub const MAX_DECOMPRESSED_LEN: usize = 64 * 1024;
