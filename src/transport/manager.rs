//! The server-side connection table.
//!
//! Demultiplexes inbound datagrams by source endpoint, creates connections
//! on first contact (server role), and reaps dead connections during the
//! maintenance sweep.
//!
//! Lock ordering: the map mutex is taken only for lookup, create, and
//! remove, and is always released before a per-connection mutex is taken.
//! Packet contents are never processed under the map lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{Connection, Outbound};
use crate::crypto::Role;
use crate::transport::{TransportConfig, TransportEvent};

pub(crate) struct ConnectionTable {
    connections: Mutex<HashMap<SocketAddr, Arc<Connection>>>,
    /// Role given to connections created on inbound datagrams. Only the
    /// responder (server) side accepts first contact from unknown peers.
    role: Role,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
    config: Arc<TransportConfig>,
}

impl ConnectionTable {
    pub fn new(
        role: Role,
        outbound: mpsc::UnboundedSender<Outbound>,
        events: mpsc::UnboundedSender<TransportEvent>,
        config: Arc<TransportConfig>,
    ) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            role,
            outbound,
            events,
            config,
        }
    }

    /// Look up an existing connection.
    pub fn get(&self, endpoint: SocketAddr) -> Option<Arc<Connection>> {
        self.connections.lock().unwrap().get(&endpoint).cloned()
    }

    /// Explicitly open a connection (client `connect`), sending our public
    /// key immediately.
    pub fn open(&self, endpoint: SocketAddr, role: Role, now: Instant) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(
            endpoint,
            role,
            Arc::clone(&self.config),
            self.outbound.clone(),
            self.events.clone(),
            now,
        ));
        self.connections
            .lock()
            .unwrap()
            .insert(endpoint, Arc::clone(&conn));
        conn.begin_handshake(now);
        conn
    }

    /// Route one inbound datagram to its connection, creating one on first
    /// contact when this table accepts connections.
    pub fn handle_datagram(&self, from: SocketAddr, data: &[u8], now: Instant) {
        let conn = {
            let mut map = self.connections.lock().unwrap();
            match map.get(&from) {
                Some(conn) => Arc::clone(conn),
                None if self.role == Role::Responder => {
                    info!(peer = %from, "first contact, creating connection");
                    let conn = Arc::new(Connection::new(
                        from,
                        Role::Responder,
                        Arc::clone(&self.config),
                        self.outbound.clone(),
                        self.events.clone(),
                        now,
                    ));
                    map.insert(from, Arc::clone(&conn));
                    conn
                }
                None => {
                    warn!(peer = %from, "dropping datagram from unknown peer");
                    return;
                }
            }
        };

        // First contact answers with our public key before anything else.
        conn.begin_handshake(now);
        conn.handle_datagram(data, now);
    }

    /// Drive maintenance on every connection, then remove the dead ones.
    pub fn sweep(&self, now: Instant) {
        let snapshot: Vec<Arc<Connection>> = {
            let map = self.connections.lock().unwrap();
            map.values().cloned().collect()
        };

        let mut reaped = Vec::new();
        for conn in snapshot {
            conn.maintain(now);
            if conn.is_dead() {
                reaped.push(conn.endpoint());
            }
        }

        if !reaped.is_empty() {
            let mut map = self.connections.lock().unwrap();
            for endpoint in reaped {
                if map.remove(&endpoint).is_some() {
                    debug!(peer = %endpoint, "reaped connection");
                }
            }
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PacketType;
    use crate::reliability::Delivery;
    use std::time::Duration;

    fn table(role: Role) -> (
        ConnectionTable,
        mpsc::UnboundedReceiver<Outbound>,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let config = Arc::new(TransportConfig::default());
        (
            ConnectionTable::new(role, out_tx, ev_tx, config),
            out_rx,
            ev_rx,
        )
    }

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn server_creates_connections_on_first_contact() {
        let (table, mut out_rx, _ev) = table(Role::Responder);
        let now = Instant::now();

        table.handle_datagram(addr(5000), &[0u8; 16], now);
        assert_eq!(table.len(), 1);
        // The public key goes out even though the datagram itself was junk.
        let out = out_rx.try_recv().unwrap();
        assert_eq!(out.dest, addr(5000));
        assert_eq!(out.wire.len(), 32);

        // Same endpoint again reuses the entry.
        table.handle_datagram(addr(5000), &[0u8; 16], now);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn client_ignores_unknown_sources() {
        let (table, mut out_rx, _ev) = table(Role::Initiator);
        table.handle_datagram(addr(5000), &[0u8; 32], Instant::now());
        assert_eq!(table.len(), 0);
        assert!(out_rx.try_recv().is_err());
    }

    #[test]
    fn open_sends_the_public_key() {
        let (table, mut out_rx, _ev) = table(Role::Initiator);
        let conn = table.open(addr(6000), Role::Initiator, Instant::now());
        assert_eq!(conn.endpoint(), addr(6000));
        assert_eq!(out_rx.try_recv().unwrap().wire.len(), 32);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn sweep_reaps_idle_connections_and_send_fails_afterwards() {
        let (table, _out, mut ev_rx) = table(Role::Responder);
        let now = Instant::now();
        table.handle_datagram(addr(5000), &[0u8; 16], now);
        assert_eq!(table.len(), 1);

        // Nothing received for longer than the idle timeout. The handshake
        // retry path trips first (TimedOut), which reaps just the same.
        let mut t = now;
        for _ in 0..8 {
            t += Duration::from_secs(5);
            table.sweep(t);
        }
        assert_eq!(table.len(), 0);

        let disconnects = std::iter::from_fn(|| ev_rx.try_recv().ok())
            .filter(|e| matches!(e, TransportEvent::Disconnected { .. }))
            .count();
        assert_eq!(disconnects, 1);

        // The reaped connection can no longer be used to send.
        assert!(table.get(addr(5000)).is_none());
        let conn = table.open(addr(5001), Role::Responder, t);
        conn.send(PacketType::Heartbeat, &[1], Delivery::Unreliable, t)
            .unwrap();
    }
}
