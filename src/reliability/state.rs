//! Per-connection reliability state.

use std::collections::VecDeque;
use std::time::Instant;

use crate::core::PacketType;

use super::rtt::RttEstimator;

/// One reliable send awaiting acknowledgement.
///
/// Holds the fully framed plaintext so a retransmission re-encrypts the
/// identical frame (same sequence number) under a fresh nonce.
#[derive(Debug, Clone)]
pub struct InFlightPacket {
    /// Sequence number assigned at first transmission.
    pub seq: u16,
    /// Packet type, for diagnostics.
    pub packet_type: PacketType,
    /// When this frame was (re)transmitted last.
    pub send_time: Instant,
    /// Retransmission count; zero means the ACK can produce an RTT sample.
    pub retries: u32,
    /// Framed plaintext bytes (pre-encryption wire).
    pub wire: Vec<u8>,
}

/// Delivery mode for an outgoing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Tracked in flight and retransmitted until acknowledged.
    Reliable,
    /// Fire and forget; no retransmission, no RTT accounting.
    Unreliable,
}

/// The whole reliability state machine for one connection.
///
/// Guarded by the owning connection's mutex; nothing in here locks.
#[derive(Debug)]
pub struct ReliabilityState {
    /// Next sequence to assign; starts at 1, wraps past 0 (0 means "none").
    pub(crate) next_outgoing_seq: u16,
    /// Highest sequence received from the peer, wrap-aware.
    pub(crate) highest_received_seq: u16,
    /// Receipt bits below the highest: bit k covers `highest - k`.
    pub(crate) received_bitfield: u32,
    /// RTT/RTO estimation.
    pub(crate) rtt: RttEstimator,
    /// Reliable sends not yet acknowledged, oldest first.
    pub(crate) inflight: VecDeque<InFlightPacket>,
    /// Last time any valid frame arrived.
    pub(crate) last_rx_time: Instant,
    /// Last time any frame went out.
    pub(crate) last_tx_time: Instant,
    /// An ACK is owed and has not been piggybacked yet.
    pub(crate) has_pending_ack: bool,
    /// RTO expiries since the last acknowledged frame.
    pub(crate) consecutive_timeouts: u32,
    /// Set when a frame exhausted its retries; the connection is dead.
    pub(crate) dropped_by_retry_limit: bool,
    /// Retry budget per frame.
    pub(crate) max_retries: u32,
}

impl ReliabilityState {
    /// Fresh state for a new connection.
    pub fn new(now: Instant, max_retries: u32, min_rto_ms: f32, max_rto_ms: f32) -> Self {
        Self {
            next_outgoing_seq: 1,
            highest_received_seq: 0,
            received_bitfield: 0,
            rtt: RttEstimator::new(min_rto_ms, max_rto_ms),
            inflight: VecDeque::new(),
            last_rx_time: now,
            last_tx_time: now,
            has_pending_ack: false,
            consecutive_timeouts: 0,
            dropped_by_retry_limit: false,
            max_retries,
        }
    }

    /// Number of reliable sends awaiting acknowledgement.
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Whether the retry limit has been hit.
    pub fn is_dropped(&self) -> bool {
        self.dropped_by_retry_limit
    }

    /// The RTT estimator, for diagnostics.
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }
}
