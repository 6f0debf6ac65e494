//! The reliability engine: sequence assignment, ACK processing, duplicate
//! suppression, and retransmission scheduling.
//!
//! All operations take the state and an explicit `now` so timing behavior is
//! fully deterministic under test. Locking is the caller's job (the owning
//! connection holds its mutex across each call).

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::core::{DropReason, PacketType, SendError, MAX_BODY, RECEIVE_WINDOW_BITS};
use crate::wire::{self, ReliableHeader};

use super::state::{Delivery, InFlightPacket, ReliabilityState};

/// Wrap-aware half-range comparison over u16 sequence numbers: true when
/// `s1` is more recent than `s2`.
pub fn sequence_more_recent(s1: u16, s2: u16) -> bool {
    const HALF: u16 = 1 << 15;
    ((s1 > s2) && (s1 - s2 < HALF)) || ((s2 > s1) && (s2 - s1 > HALF))
}

/// Frame an outgoing body: assign a sequence number, attach the current ACK
/// window, and (for tracked sends) record the frame in flight.
///
/// ACK-only frames (`ReliableAck` with an empty body) and unreliable sends
/// are framed identically but never tracked: they are not themselves
/// acknowledged.
pub fn prepare_outgoing(
    state: &mut ReliabilityState,
    packet_type: PacketType,
    body: &[u8],
    delivery: Delivery,
    now: Instant,
) -> Result<Vec<u8>, SendError> {
    if body.len() > MAX_BODY {
        return Err(SendError::PayloadTooLarge {
            len: body.len(),
            max: MAX_BODY,
        });
    }

    let seq = state.next_outgoing_seq;
    // Skip 0 on wrap so 0 unambiguously means "none".
    state.next_outgoing_seq = match state.next_outgoing_seq.wrapping_add(1) {
        0 => 1,
        n => n,
    };

    let header = ReliableHeader::new(
        seq,
        state.highest_received_seq,
        state.received_bitfield,
        packet_type,
    );
    let framed = wire::encode_frame(&header, body);

    let ack_only = packet_type == PacketType::ReliableAck && body.is_empty();
    if delivery == Delivery::Reliable && !ack_only {
        state.inflight.push_back(InFlightPacket {
            seq,
            packet_type,
            send_time: now,
            retries: 0,
            wire: framed.clone(),
        });
    }

    state.has_pending_ack = false;
    state.last_tx_time = now;
    trace!(seq, ?packet_type, body_len = body.len(), "prepared outgoing frame");
    Ok(framed)
}

/// Process one inbound framed plaintext.
///
/// On success returns the packet type and the (still compressed) body. A
/// `DropReason` means the body must not be delivered; the ACK window may
/// still have been updated, because even duplicate frames carry a current
/// view of the peer's receive state.
pub fn process_incoming(
    state: &mut ReliabilityState,
    framed: &[u8],
    now: Instant,
) -> Result<(PacketType, Vec<u8>), DropReason> {
    // A frame that does not parse updates nothing.
    let frame = wire::decode(framed).map_err(DropReason::MalformedFrame)?;
    state.last_rx_time = now;

    process_acks(state, frame.reliability.ack, frame.reliability.ack_bitfield, now);

    // Receive window update and duplicate suppression.
    let seq = frame.reliability.seq;
    if sequence_more_recent(seq, state.highest_received_seq) {
        let distance = u32::from(seq.wrapping_sub(state.highest_received_seq));
        state.received_bitfield = if distance < u32::from(RECEIVE_WINDOW_BITS) {
            state.received_bitfield << distance
        } else {
            0
        };
        state.received_bitfield |= 1;
        state.highest_received_seq = seq;
    } else {
        let distance = u32::from(state.highest_received_seq.wrapping_sub(seq));
        if distance >= u32::from(RECEIVE_WINDOW_BITS) {
            return Err(DropReason::TooOld(seq));
        }
        if (state.received_bitfield >> distance) & 1 == 1 {
            // Already delivered; the peer still deserves a (re-)ACK.
            state.has_pending_ack = true;
            return Err(DropReason::Duplicate(seq));
        }
        state.received_bitfield |= 1 << distance;
    }

    let packet_type = frame.reliability.packet_type;
    let zero_len_control = frame.body.is_empty()
        && matches!(
            packet_type,
            PacketType::ReliableAck | PacketType::Heartbeat
        );
    if !zero_len_control {
        state.has_pending_ack = true;
    }

    Ok((packet_type, frame.body.to_vec()))
}

/// Remove acknowledged entries from the in-flight list and feed RTT samples
/// from first-transmission ACKs.
///
/// An entry is covered when its sequence equals `ack`, or when `ack` is more
/// recent and bit `ack - seq - 1` of the bitfield is set (bit k of the wire
/// field covers sequence `ack - 1 - k`).
fn process_acks(state: &mut ReliabilityState, ack: u16, ack_bitfield: u32, now: Instant) {
    let mut samples: Vec<f32> = Vec::new();

    state.inflight.retain(|entry| {
        let covered = if entry.seq == ack {
            true
        } else if sequence_more_recent(ack, entry.seq) {
            let diff = ack.wrapping_sub(entry.seq);
            (1..=32).contains(&diff) && (ack_bitfield >> (diff - 1)) & 1 == 1
        } else {
            false
        };

        if covered && entry.retries == 0 {
            let rtt = now.saturating_duration_since(entry.send_time);
            samples.push(rtt.as_secs_f32() * 1000.0);
        }
        !covered
    });

    if !samples.is_empty() {
        state.consecutive_timeouts = 0;
    }
    for sample_ms in samples {
        state.rtt.on_sample(sample_ms);
    }
}

/// Collect the framed plaintexts that are due for retransmission.
///
/// Each returned frame has had its retry count bumped and its send time
/// reset; the RTO doubles (clamped) per retransmission. When a frame runs
/// out of retries the connection is marked dropped and collection stops.
/// The caller re-encrypts each frame with a fresh nonce and dispatches it.
pub fn collect_retransmits(state: &mut ReliabilityState, now: Instant) -> Vec<Vec<u8>> {
    let mut due = Vec::new();
    let ReliabilityState {
        inflight,
        rtt,
        max_retries,
        dropped_by_retry_limit,
        consecutive_timeouts,
        ..
    } = state;

    for entry in inflight.iter_mut() {
        let elapsed_ms = now.saturating_duration_since(entry.send_time).as_secs_f32() * 1000.0;
        if elapsed_ms < rtt.rto_ms() {
            continue;
        }

        if entry.retries + 1 > *max_retries {
            *dropped_by_retry_limit = true;
            break;
        }

        debug!(
            seq = entry.seq,
            retries = entry.retries + 1,
            rto_ms = rtt.rto_ms(),
            "retransmitting"
        );
        due.push(entry.wire.clone());
        entry.send_time = now;
        entry.retries += 1;
        *consecutive_timeouts += 1;
        rtt.backoff();
    }

    due
}

/// Whether an explicit ACK-only frame should be emitted now: an ACK is owed
/// and no outbound frame has piggybacked it within the ack delay.
pub fn should_send_ack(
    state: &ReliabilityState,
    now: Instant,
    ack_delay_min_ms: f32,
    ack_delay_max_ms: f32,
) -> bool {
    if !state.has_pending_ack {
        return false;
    }
    let delay_ms = state.rtt.ack_delay_ms(ack_delay_min_ms, ack_delay_max_ms);
    let since_tx_ms = now.saturating_duration_since(state.last_tx_time).as_secs_f32() * 1000.0;
    since_tx_ms >= delay_ms
}

/// Whether the connection is dead: retry limit hit, or nothing received for
/// the idle timeout.
pub fn is_timed_out(state: &ReliabilityState, now: Instant, idle_timeout: Duration) -> bool {
    state.dropped_by_retry_limit
        || now.saturating_duration_since(state.last_rx_time) > idle_timeout
}
