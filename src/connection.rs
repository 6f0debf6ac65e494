//! A single peer's pipeline: handshake, security, reliability, compression.
//!
//! One `Connection` exists per remote endpoint. The handshake is a one-shot
//! exchange of raw 32-byte public keys in the clear; everything after it is
//! encrypted. Payloads submitted before the channel is secure are queued
//! (bounded, oldest dropped) and flushed on key derivation.
//!
//! All state lives behind one mutex, held for the duration of one
//! datagram's processing and never across an await; outbound datagrams and
//! application events leave through non-blocking channel sends.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::compress::Compressor;
use crate::core::{
    DisconnectReason, DropReason, PacketType, SendError, HANDSHAKE_DATAGRAM_LEN, PUBLIC_KEY_LEN,
};
use crate::crypto::{EphemeralKeypair, Role, SecureChannel};
use crate::reliability::{self, Delivery, ReliabilityState};
use crate::transport::{TransportConfig, TransportEvent};

/// A datagram headed for the socket, routed through the pump's send task.
#[derive(Debug)]
pub(crate) struct Outbound {
    /// Destination endpoint.
    pub dest: SocketAddr,
    /// Wire bytes (ciphertext, or a cleartext public key during handshake).
    pub wire: Vec<u8>,
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakePhase {
    /// Nothing sent or received yet.
    Idle,
    /// Our public key is out; waiting for the peer's.
    AwaitingPeerKey,
    /// Keys derived; all traffic is encrypted.
    Established,
}

/// Payload accepted before the channel was secure.
#[derive(Debug)]
struct PendingSend {
    packet_type: PacketType,
    /// Already compressed; flushed as-is.
    body: Vec<u8>,
    delivery: Delivery,
}

/// Datagrams dropped with local recovery, by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ConnStats {
    pub malformed: u64,
    pub decrypt_failed: u64,
    pub decompress_failed: u64,
    pub duplicate: u64,
    pub too_old: u64,
}

/// Everything guarded by the connection mutex.
struct ConnState {
    phase: HandshakePhase,
    keypair: EphemeralKeypair,
    channel: Option<SecureChannel>,
    reliability: ReliabilityState,
    compressor: Compressor,
    pending: VecDeque<PendingSend>,
    pending_bytes: usize,
    hello_sent: bool,
    hello_resends: u32,
    last_hello_time: Instant,
    stats: ConnStats,
    /// Set exactly once; the manager removes the connection afterwards.
    dead: Option<DisconnectReason>,
}

/// One logical connection to one peer.
pub(crate) struct Connection {
    endpoint: SocketAddr,
    role: Role,
    state: Mutex<ConnState>,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
    config: Arc<TransportConfig>,
}

impl Connection {
    /// Create a connection with a fresh ephemeral keypair.
    pub fn new(
        endpoint: SocketAddr,
        role: Role,
        config: Arc<TransportConfig>,
        outbound: mpsc::UnboundedSender<Outbound>,
        events: mpsc::UnboundedSender<TransportEvent>,
        now: Instant,
    ) -> Self {
        let state = ConnState {
            phase: HandshakePhase::Idle,
            keypair: EphemeralKeypair::generate(),
            channel: None,
            reliability: ReliabilityState::new(
                now,
                config.max_retries,
                config.min_rto_ms,
                config.max_rto_ms,
            ),
            compressor: Compressor::with_level(config.compression_level),
            pending: VecDeque::new(),
            pending_bytes: 0,
            hello_sent: false,
            hello_resends: 0,
            last_hello_time: now,
            stats: ConnStats::default(),
            dead: None,
        };
        Self {
            endpoint,
            role,
            state: Mutex::new(state),
            outbound,
            events,
            config,
        }
    }

    /// Remote endpoint this connection talks to.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Whether the connection has been torn down and awaits removal.
    pub fn is_dead(&self) -> bool {
        self.state.lock().unwrap().dead.is_some()
    }

    /// Whether the handshake has completed.
    pub fn is_established(&self) -> bool {
        self.state.lock().unwrap().phase == HandshakePhase::Established
    }

    /// Drop counters, for diagnostics.
    #[allow(dead_code)]
    pub fn stats(&self) -> ConnStats {
        self.state.lock().unwrap().stats
    }

    /// Send our public key in the clear, once.
    ///
    /// Safe to call repeatedly; only the first call emits.
    pub fn begin_handshake(&self, now: Instant) {
        let mut state = self.state.lock().unwrap();
        self.begin_handshake_locked(&mut state, now);
    }

    fn begin_handshake_locked(&self, state: &mut ConnState, now: Instant) {
        if state.hello_sent {
            return;
        }
        state.hello_sent = true;
        state.last_hello_time = now;
        if state.phase == HandshakePhase::Idle {
            state.phase = HandshakePhase::AwaitingPeerKey;
        }
        debug!(peer = %self.endpoint, role = ?self.role, "sending public key");
        self.emit_wire(state.keypair.public_bytes().to_vec());
    }

    fn emit_wire(&self, wire: Vec<u8>) {
        let _ = self.outbound.send(Outbound {
            dest: self.endpoint,
            wire,
        });
    }

    fn emit_event(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Tear the connection down and tell the application, exactly once.
    fn mark_dead(&self, state: &mut ConnState, reason: DisconnectReason) {
        if state.dead.is_some() {
            return;
        }
        state.dead = Some(reason);
        info!(peer = %self.endpoint, %reason, stats = ?state.stats, "connection closed");
        self.emit_event(TransportEvent::Disconnected {
            peer: self.endpoint,
            reason,
        });
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    /// Feed one raw datagram from the socket into the pipeline.
    pub fn handle_datagram(&self, data: &[u8], now: Instant) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if state.dead.is_some() {
            return;
        }

        if state.phase != HandshakePhase::Established {
            self.handle_prehandshake(state, data, now);
            return;
        }

        let channel = state
            .channel
            .as_mut()
            .expect("established connection has a channel");
        let plaintext = match channel.decrypt(data) {
            Ok(p) => p,
            Err(_) => {
                state.stats.decrypt_failed += 1;
                warn!(
                    peer = %self.endpoint,
                    len = data.len(),
                    "dropping datagram that failed authentication"
                );
                return;
            }
        };

        let (packet_type, body) =
            match reliability::process_incoming(&mut state.reliability, &plaintext, now) {
                Ok(ok) => ok,
                Err(DropReason::MalformedFrame(e)) => {
                    state.stats.malformed += 1;
                    warn!(peer = %self.endpoint, error = %e, "dropping malformed frame");
                    return;
                }
                Err(DropReason::Duplicate(seq)) => {
                    state.stats.duplicate += 1;
                    trace!(peer = %self.endpoint, seq, "dropping duplicate frame");
                    return;
                }
                Err(DropReason::TooOld(seq)) => {
                    state.stats.too_old += 1;
                    trace!(peer = %self.endpoint, seq, "dropping stale frame");
                    return;
                }
            };

        // Empty control frames carry no payload for the application.
        if body.is_empty()
            && matches!(packet_type, PacketType::ReliableAck | PacketType::Heartbeat)
        {
            return;
        }

        let payload = match state.compressor.decode_body(&body) {
            Ok(p) => p,
            Err(e) => {
                // Reliability state already advanced; the payload is lost the
                // same way an undetected corruption below us would lose it.
                state.stats.decompress_failed += 1;
                warn!(peer = %self.endpoint, error = %e, "dropping undecompressible body");
                return;
            }
        };

        self.emit_event(TransportEvent::Received {
            peer: self.endpoint,
            packet_type,
            payload,
        });
    }

    fn handle_prehandshake(&self, state: &mut ConnState, data: &[u8], now: Instant) {
        if data.len() != HANDSHAKE_DATAGRAM_LEN {
            warn!(
                peer = %self.endpoint,
                len = data.len(),
                "dropping non-handshake datagram before channel is secure"
            );
            return;
        }

        let mut peer_public = [0u8; PUBLIC_KEY_LEN];
        peer_public.copy_from_slice(data);

        let keys = match state.keypair.derive_session_keys(&peer_public, self.role) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(peer = %self.endpoint, error = %e, "key agreement failed");
                self.mark_dead(state, DisconnectReason::CryptoFailure);
                return;
            }
        };

        state.channel = Some(SecureChannel::new(&keys, self.config.nonce_search_window));
        state.phase = HandshakePhase::Established;
        state.reliability.last_rx_time = now;
        info!(peer = %self.endpoint, role = ?self.role, "handshake complete");

        // Complete the symmetry if the peer spoke first.
        self.begin_handshake_locked(state, now);

        self.emit_event(TransportEvent::Connected {
            peer: self.endpoint,
        });

        self.flush_pending(state, now);
    }

    fn flush_pending(&self, state: &mut ConnState, now: Instant) {
        if state.pending.is_empty() {
            return;
        }
        info!(
            peer = %self.endpoint,
            count = state.pending.len(),
            "flushing payloads queued before handshake"
        );
        while let Some(ps) = state.pending.pop_front() {
            state.pending_bytes -= ps.body.len();
            self.frame_and_emit(state, ps.packet_type, &ps.body, ps.delivery, now);
        }
    }

    /// Frame, encrypt, and queue one already-compressed body.
    fn frame_and_emit(
        &self,
        state: &mut ConnState,
        packet_type: PacketType,
        body: &[u8],
        delivery: Delivery,
        now: Instant,
    ) {
        let framed = match reliability::prepare_outgoing(
            &mut state.reliability,
            packet_type,
            body,
            delivery,
            now,
        ) {
            Ok(f) => f,
            Err(e) => {
                // Bound was checked when the payload entered the pipeline.
                warn!(peer = %self.endpoint, error = %e, "dropping outbound frame");
                return;
            }
        };
        self.encrypt_and_emit(state, &framed);
    }

    fn encrypt_and_emit(&self, state: &mut ConnState, framed: &[u8]) {
        let channel = state
            .channel
            .as_mut()
            .expect("send path requires an established channel");
        match channel.encrypt(framed) {
            Ok(wire) => self.emit_wire(wire),
            Err(e) => {
                // Leaves any in-flight record in place; retransmission will
                // retry under a later nonce.
                warn!(peer = %self.endpoint, error = %e, "encryption failed, datagram not sent");
            }
        }
    }

    // ------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------

    /// Submit an application payload.
    ///
    /// Before the handshake completes the payload is queued (bounded,
    /// oldest dropped) and the handshake is kicked. `PayloadTooLarge` is
    /// always checked here, synchronously.
    pub fn send(
        &self,
        packet_type: PacketType,
        payload: &[u8],
        delivery: Delivery,
        now: Instant,
    ) -> Result<(), SendError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if state.dead.is_some() {
            return Err(SendError::UnknownPeer(self.endpoint));
        }

        let body = state.compressor.encode_body(payload);
        if body.len() > crate::core::MAX_BODY {
            return Err(SendError::PayloadTooLarge {
                len: body.len(),
                max: crate::core::MAX_BODY,
            });
        }

        if state.phase != HandshakePhase::Established {
            self.begin_handshake_locked(state, now);
            self.queue_pending(state, packet_type, body, delivery);
            return Ok(());
        }

        self.frame_and_emit(state, packet_type, &body, delivery, now);
        Ok(())
    }

    fn queue_pending(
        &self,
        state: &mut ConnState,
        packet_type: PacketType,
        body: Vec<u8>,
        delivery: Delivery,
    ) {
        state.pending_bytes += body.len();
        state.pending.push_back(PendingSend {
            packet_type,
            body,
            delivery,
        });

        while state.pending_bytes > self.config.max_pending_bytes {
            match state.pending.pop_front() {
                Some(dropped) => {
                    state.pending_bytes -= dropped.body.len();
                    warn!(
                        peer = %self.endpoint,
                        bytes = dropped.body.len(),
                        "pre-handshake queue overflow, dropping oldest payload"
                    );
                }
                None => break,
            }
        }
        trace!(
            peer = %self.endpoint,
            queued = state.pending.len(),
            bytes = state.pending_bytes,
            "queued payload until channel is secure"
        );
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Periodic upkeep: handshake re-sends, retransmissions, delayed ACKs,
    /// and death detection. Called by the manager on every tick.
    pub fn maintain(&self, now: Instant) {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if state.dead.is_some() {
            return;
        }

        if state.phase != HandshakePhase::Established {
            self.maintain_handshake(state, now);
            return;
        }

        let due = reliability::collect_retransmits(&mut state.reliability, now);
        for framed in due {
            self.encrypt_and_emit(state, &framed);
        }

        if state.reliability.is_dropped() {
            self.mark_dead(state, DisconnectReason::TimedOut);
            return;
        }

        if reliability::is_timed_out(&state.reliability, now, self.config.idle_timeout) {
            self.mark_dead(state, DisconnectReason::Idle);
            return;
        }

        if reliability::should_send_ack(
            &state.reliability,
            now,
            self.config.ack_delay_min_ms,
            self.config.ack_delay_max_ms,
        ) {
            trace!(peer = %self.endpoint, "emitting ack-only frame");
            self.frame_and_emit(
                state,
                PacketType::ReliableAck,
                &[],
                Delivery::Unreliable,
                now,
            );
        }
    }

    fn maintain_handshake(&self, state: &mut ConnState, now: Instant) {
        if !state.hello_sent {
            return;
        }
        if now.saturating_duration_since(state.last_hello_time) < self.config.handshake_resend {
            return;
        }
        if state.hello_resends >= self.config.handshake_retries {
            self.mark_dead(state, DisconnectReason::TimedOut);
            return;
        }
        state.hello_resends += 1;
        state.last_hello_time = now;
        debug!(
            peer = %self.endpoint,
            attempt = state.hello_resends,
            "re-sending public key"
        );
        self.emit_wire(state.keypair.public_bytes().to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    type EventRx = mpsc::UnboundedReceiver<TransportEvent>;
    type WireRx = mpsc::UnboundedReceiver<Outbound>;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn connection(port: u16, role: Role) -> (Connection, WireRx, EventRx) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let conn = Connection::new(
            addr(port),
            role,
            Arc::new(TransportConfig::default()),
            out_tx,
            ev_tx,
            Instant::now(),
        );
        (conn, out_rx, ev_rx)
    }

    /// Move every queued outbound datagram from one side into the other.
    fn shuttle(rx: &mut WireRx, to: &Connection, now: Instant) {
        while let Ok(out) = rx.try_recv() {
            to.handle_datagram(&out.wire, now);
        }
    }

    fn drain_events(rx: &mut EventRx) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn established_pair() -> (Connection, WireRx, EventRx, Connection, WireRx, EventRx) {
        let now = Instant::now();
        let (client, mut client_wire, mut client_ev) = connection(1000, Role::Initiator);
        let (server, mut server_wire, mut server_ev) = connection(2000, Role::Responder);

        client.begin_handshake(now);
        shuttle(&mut client_wire, &server, now);
        shuttle(&mut server_wire, &client, now);

        assert!(client.is_established());
        assert!(server.is_established());
        assert!(matches!(
            drain_events(&mut client_ev).as_slice(),
            [TransportEvent::Connected { .. }]
        ));
        assert!(matches!(
            drain_events(&mut server_ev).as_slice(),
            [TransportEvent::Connected { .. }]
        ));

        (client, client_wire, client_ev, server, server_wire, server_ev)
    }

    #[test]
    fn handshake_then_one_reliable_message() {
        let (client, mut client_wire, _cev, server, mut server_wire, mut server_ev) =
            established_pair();
        let now = Instant::now();

        client
            .send(
                PacketType::PlayerAction,
                &[0xDE, 0xAD, 0xBE, 0xEF],
                Delivery::Reliable,
                now,
            )
            .unwrap();
        shuttle(&mut client_wire, &server, now);

        let events = drain_events(&mut server_ev);
        match events.as_slice() {
            [TransportEvent::Received {
                packet_type,
                payload,
                ..
            }] => {
                assert_eq!(*packet_type, PacketType::PlayerAction);
                assert_eq!(payload, &[0xDE, 0xAD, 0xBE, 0xEF]);
            }
            other => panic!("unexpected events: {other:?}"),
        }

        // Server owes an ACK; after the ack delay it emits an explicit frame.
        let ack_time = now + Duration::from_millis(50);
        server.maintain(ack_time);
        shuttle(&mut server_wire, &client, ack_time);

        // The in-flight entry is gone and the RTT estimator got its sample.
        let state = client.state.lock().unwrap();
        assert_eq!(state.reliability.inflight_len(), 0);
        assert!(state.reliability.rtt().has_sample());
    }

    #[test]
    fn retransmission_recovers_a_lost_datagram() {
        let (client, mut client_wire, _cev, server, mut server_wire, mut server_ev) =
            established_pair();
        let now = Instant::now();

        client
            .send(PacketType::PlayerAction, &[0x01], Delivery::Reliable, now)
            .unwrap();
        // The network eats the first transmission.
        while client_wire.try_recv().is_ok() {}

        // At the RTO the frame goes out again under a fresh nonce.
        let retry_time = now + Duration::from_millis(450);
        client.maintain(retry_time);
        shuttle(&mut client_wire, &server, retry_time);

        let events = drain_events(&mut server_ev);
        assert!(
            matches!(events.as_slice(), [TransportEvent::Received { payload, .. }] if payload == &[0x01])
        );

        // ACK clears the entry, but a retransmitted exchange yields no RTT
        // sample.
        let ack_time = retry_time + Duration::from_millis(50);
        server.maintain(ack_time);
        shuttle(&mut server_wire, &client, ack_time);
        let state = client.state.lock().unwrap();
        assert_eq!(state.reliability.inflight_len(), 0);
        assert!(!state.reliability.rtt().has_sample());
    }

    #[test]
    fn duplicate_sequence_is_delivered_once() {
        let (client, mut client_wire, _cev, server, _swire, mut server_ev) = established_pair();
        let now = Instant::now();

        client
            .send(PacketType::ChatMessage, b"hello", Delivery::Reliable, now)
            .unwrap();
        let first = client_wire.try_recv().unwrap();
        server.handle_datagram(&first.wire, now);

        // The original arrives, then the retransmission of the same sequence.
        let retry_time = now + Duration::from_millis(450);
        client.maintain(retry_time);
        let second = client_wire.try_recv().unwrap();
        assert_ne!(first.wire, second.wire, "fresh nonce per retransmission");
        server.handle_datagram(&second.wire, retry_time);

        let received = drain_events(&mut server_ev)
            .into_iter()
            .filter(|e| matches!(e, TransportEvent::Received { .. }))
            .count();
        assert_eq!(received, 1);
        assert_eq!(server.stats().duplicate, 1);
    }

    #[test]
    fn payloads_queued_before_handshake_are_flushed() {
        let now = Instant::now();
        let (client, mut client_wire, _cev, server, mut server_wire, mut server_ev) = {
            let (c, cw, cev) = connection(1000, Role::Initiator);
            let (s, sw, sev) = connection(2000, Role::Responder);
            (c, cw, cev, s, sw, sev)
        };

        // Sending before any handshake queues and kicks the hello.
        client
            .send(PacketType::ChatMessage, b"early", Delivery::Reliable, now)
            .unwrap();
        assert!(!client.is_established());

        shuttle(&mut client_wire, &server, now);
        shuttle(&mut server_wire, &client, now);
        // Client is now established and flushed the queue.
        shuttle(&mut client_wire, &server, now);

        let payloads: Vec<_> = drain_events(&mut server_ev)
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::Received { payload, .. } => Some(payload),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, vec![b"early".to_vec()]);
    }

    #[test]
    fn oversized_payload_fails_synchronously() {
        let (client, _cw, _cev, _server, _sw, _sev) = established_pair();
        // Incompressible garbage larger than a datagram.
        let mut big = vec![0u8; 4096];
        let mut x: u32 = 0x12345678;
        for b in big.iter_mut() {
            x = x.wrapping_mul(1664525).wrapping_add(1013904223);
            *b = (x >> 24) as u8;
        }
        let err = client
            .send(PacketType::GameState, &big, Delivery::Reliable, Instant::now())
            .unwrap_err();
        assert!(matches!(err, SendError::PayloadTooLarge { .. }));
    }

    #[test]
    fn unreliable_sends_are_not_retransmitted() {
        let (client, mut client_wire, _cev, _server, _sw, _sev) = established_pair();
        let now = Instant::now();

        client
            .send(PacketType::EchoTest, &[0x07], Delivery::Unreliable, now)
            .unwrap();
        assert!(client_wire.try_recv().is_ok());

        client.maintain(now + Duration::from_secs(5));
        // Nothing in flight, so the only possible output is an ack frame;
        // none is owed either.
        assert!(client_wire.try_recv().is_err());
    }

    #[test]
    fn handshake_retry_exhaustion_times_out() {
        let now = Instant::now();
        let (client, mut client_wire, mut client_ev) = connection(1000, Role::Initiator);
        client.begin_handshake(now);

        let mut t = now;
        for _ in 0..=TransportConfig::default().handshake_retries {
            t += Duration::from_millis(1100);
            client.maintain(t);
        }

        assert!(client.is_dead());
        let events = drain_events(&mut client_ev);
        assert!(matches!(
            events.as_slice(),
            [TransportEvent::Disconnected {
                reason: DisconnectReason::TimedOut,
                ..
            }]
        ));
        // Initial hello plus the configured number of re-sends.
        let mut hellos = 0;
        while client_wire.try_recv().is_ok() {
            hellos += 1;
        }
        assert_eq!(hellos, 1 + TransportConfig::default().handshake_retries);
    }

    #[test]
    fn idle_connection_is_marked_dead_once() {
        let (client, _cw, mut client_ev, _server, _sw, _sev) = established_pair();
        let later = Instant::now() + Duration::from_secs(31);

        client.maintain(later);
        client.maintain(later + Duration::from_secs(1));

        assert!(client.is_dead());
        let disconnects = drain_events(&mut client_ev)
            .into_iter()
            .filter(|e| matches!(e, TransportEvent::Disconnected { .. }))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[test]
    fn garbage_before_handshake_is_ignored() {
        let now = Instant::now();
        let (server, _sw, mut server_ev) = connection(2000, Role::Responder);
        server.handle_datagram(&[0xAB; 17], now);
        server.handle_datagram(&[], now);
        assert!(!server.is_established());
        assert!(drain_events(&mut server_ev).is_empty());
    }

    #[test]
    fn tampered_ciphertext_is_counted_and_dropped() {
        let (client, mut client_wire, _cev, server, _sw, mut server_ev) = established_pair();
        let now = Instant::now();

        client
            .send(PacketType::ChatMessage, b"x", Delivery::Reliable, now)
            .unwrap();
        let mut out = client_wire.try_recv().unwrap();
        out.wire[0] ^= 0xFF;
        server.handle_datagram(&out.wire, now);

        assert!(drain_events(&mut server_ev).is_empty());
        assert_eq!(server.stats().decrypt_failed, 1);
    }
}
