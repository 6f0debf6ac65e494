//! The I/O pump: the tasks that move datagrams between the socket and the
//! connection table, and the [`Transport`] handle the application owns.
//!
//! Three tasks run per transport: a receive loop (the only reader of the
//! socket), a send loop draining the outbound channel (the only writer),
//! and a maintenance timer ticking at the configured rate. All of them
//! observe a shutdown signal between operations. In-flight reliable frames
//! are abandoned on shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::connection::Outbound;
use crate::core::{PacketType, SendError, TransportError, AEAD_TAG_LEN};
use crate::crypto::Role;
use crate::reliability::Delivery;

use super::config::TransportConfig;
use super::events::TransportEvent;
use super::manager::ConnectionTable;

/// Receiver for transport events.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// The application's handle to a running transport.
///
/// Owns the socket, the connection table, and the pump tasks. Dropping the
/// handle signals the tasks to stop; [`shutdown`](Self::shutdown) stops them
/// deterministically.
pub struct Transport {
    local_addr: SocketAddr,
    table: Arc<ConnectionTable>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Bind a server-role transport: connections are accepted from any
    /// endpoint on first contact.
    pub async fn listen(
        bind_addr: SocketAddr,
        config: TransportConfig,
    ) -> Result<(Self, EventReceiver), TransportError> {
        config.validate()?;
        let socket = UdpSocket::bind(bind_addr).await?;
        Self::start(socket, Role::Responder, config, None)
    }

    /// Bind a client-role transport and open a connection to `server_addr`,
    /// kicking the handshake immediately. Datagrams from endpoints other
    /// than opened connections are ignored.
    pub async fn connect(
        server_addr: SocketAddr,
        config: TransportConfig,
    ) -> Result<(Self, EventReceiver), TransportError> {
        config.validate()?;
        let bind: SocketAddr = if server_addr.is_ipv4() {
            "0.0.0.0:0".parse().expect("fixed address parses")
        } else {
            "[::]:0".parse().expect("fixed address parses")
        };
        let socket = UdpSocket::bind(bind).await?;
        Self::start(socket, Role::Initiator, config, Some(server_addr))
    }

    fn start(
        socket: UdpSocket,
        role: Role,
        config: TransportConfig,
        connect_to: Option<SocketAddr>,
    ) -> Result<(Self, EventReceiver), TransportError> {
        let socket = Arc::new(socket);
        let local_addr = socket.local_addr()?;
        let config = Arc::new(config);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let table = Arc::new(ConnectionTable::new(
            role,
            outbound_tx,
            event_tx.clone(),
            Arc::clone(&config),
        ));

        let tasks = vec![
            tokio::spawn(recv_loop(
                Arc::clone(&socket),
                Arc::clone(&table),
                Arc::clone(&config),
                event_tx.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(send_loop(
                Arc::clone(&socket),
                outbound_rx,
                event_tx,
                shutdown_rx.clone(),
            )),
            tokio::spawn(maintenance_loop(
                Arc::clone(&table),
                config.tick_hz,
                shutdown_rx,
            )),
        ];

        if let Some(peer) = connect_to {
            table.open(peer, Role::Initiator, Instant::now());
        }

        info!(%local_addr, ?role, "transport started");
        Ok((
            Self {
                local_addr,
                table,
                shutdown: shutdown_tx,
                tasks,
            },
            event_rx,
        ))
    }

    /// Submit an application payload for `peer`.
    ///
    /// Synchronous: the pipeline frames and encrypts inline and hands the
    /// datagram to the send task. Fails with `UnknownPeer` when no
    /// connection exists for the endpoint and with `PayloadTooLarge` when
    /// the (compressed) body exceeds the datagram budget.
    pub fn send(
        &self,
        peer: SocketAddr,
        packet_type: PacketType,
        payload: &[u8],
        delivery: Delivery,
    ) -> Result<(), SendError> {
        let conn = self
            .table
            .get(peer)
            .ok_or(SendError::UnknownPeer(peer))?;
        conn.send(packet_type, payload, delivery, Instant::now())
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether a connection to `peer` exists and has completed its
    /// handshake.
    pub fn is_connected(&self, peer: SocketAddr) -> bool {
        self.table.get(peer).is_some_and(|c| c.is_established())
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.table.len()
    }

    /// Stop the pump tasks and drop every connection. Queued outbound
    /// datagrams and in-flight reliable frames are abandoned.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        info!(local_addr = %self.local_addr, "transport stopped");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // Tasks observe the flag at their next suspension point.
        let _ = self.shutdown.send(true);
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Receive task: the only reader of the socket.
async fn recv_loop(
    socket: Arc<UdpSocket>,
    table: Arc<ConnectionTable>,
    config: Arc<TransportConfig>,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 65535];
    let max_wire = config.max_datagram + AEAD_TAG_LEN;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => {
                    if len > max_wire {
                        warn!(peer = %from, len, "dropping oversized datagram");
                        continue;
                    }
                    table.handle_datagram(from, &buf[..len], Instant::now());
                }
                Err(e) => {
                    warn!(error = %e, "socket receive error");
                    let _ = events.send(TransportEvent::SocketError {
                        peer: None,
                        kind: e.kind(),
                    });
                }
            },
        }
    }
}

/// Send task: the only writer to the socket.
async fn send_loop(
    socket: Arc<UdpSocket>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let out = tokio::select! {
            _ = shutdown.changed() => break,
            msg = outbound.recv() => match msg {
                Some(out) => out,
                None => break,
            },
        };
        if let Err(e) = socket.send_to(&out.wire, out.dest).await {
            warn!(peer = %out.dest, error = %e, "socket send error");
            let _ = events.send(TransportEvent::SocketError {
                peer: Some(out.dest),
                kind: e.kind(),
            });
        }
    }
}

/// Maintenance task: drives retransmission, delayed ACKs, and reaping.
async fn maintenance_loop(
    table: Arc<ConnectionTable>,
    tick_hz: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(tick_hz)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => table.sweep(Instant::now()),
        }
    }
}
