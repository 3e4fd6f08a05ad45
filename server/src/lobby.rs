//! Per-lobby UDP game server: two sockets, two receive loops, and the
//! packet dispatch that drives the connected-client roster.

use crate::channel::Transport;
use crate::config::ReliableConfig;
use crate::reliable::ReliableChannel;
use crate::roster::{ClientEndpoint, Roster};
use crate::unreliable::UnreliableChannel;
use log::{error, info, warn};
use shared::{Packet, PacketType};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Receive-loop failures tolerated back to back before the socket is
/// written off as dead.
const MAX_CONSECUTIVE_RECV_ERRORS: u32 = 10;

/// One running lobby: a reliable socket, an unreliable socket, and the
/// roster of clients connected to them.
///
/// Construction binds both sockets and spawns one receive loop per
/// socket plus the reliable channel's retry timer. All of them run
/// until [`LobbyServer::stop`], which signals, joins, and only then
/// returns; no packet is processed after `stop` completes. Dropping
/// the stopped server closes both sockets.
pub struct LobbyServer {
    lobby_id: String,
    bind_host: String,
    reliable_port: u16,
    unreliable_port: u16,
    roster: Arc<RwLock<Roster>>,
    reliable: Arc<ReliableChannel>,
    unreliable: Arc<UnreliableChannel>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl LobbyServer {
    /// Binds the lobby's socket pair on `bind_host` and starts serving.
    ///
    /// Passing port 0 lets the operating system pick; the ports
    /// reported by [`reliable_port`](Self::reliable_port) and
    /// [`unreliable_port`](Self::unreliable_port) are always the ones
    /// actually bound.
    pub async fn bind(
        lobby_id: &str,
        bind_host: &str,
        reliable_port: u16,
        unreliable_port: u16,
        config: ReliableConfig,
    ) -> io::Result<Self> {
        let reliable_socket = Arc::new(UdpSocket::bind((bind_host, reliable_port)).await?);
        let unreliable_socket = Arc::new(UdpSocket::bind((bind_host, unreliable_port)).await?);
        let reliable_port = reliable_socket.local_addr()?.port();
        let unreliable_port = unreliable_socket.local_addr()?.port();

        let roster = Arc::new(RwLock::new(Roster::new()));
        let reliable = Arc::new(ReliableChannel::new(Arc::clone(&reliable_socket), config));
        let unreliable = Arc::new(UnreliableChannel::new(Arc::clone(&unreliable_socket)));
        let (shutdown_tx, _) = watch::channel(false);

        let reliable_loop = spawn_receive_loop(
            lobby_id.to_string(),
            reliable_socket,
            Arc::clone(&roster),
            Arc::clone(&reliable),
            Arc::clone(&unreliable),
            shutdown_tx.subscribe(),
            true,
        );
        let unreliable_loop = spawn_receive_loop(
            lobby_id.to_string(),
            unreliable_socket,
            Arc::clone(&roster),
            Arc::clone(&reliable),
            Arc::clone(&unreliable),
            shutdown_tx.subscribe(),
            false,
        );

        info!(
            "[{}] lobby server listening on {}:{} (reliable) and {}:{} (unreliable)",
            lobby_id, bind_host, reliable_port, bind_host, unreliable_port
        );

        Ok(Self {
            lobby_id: lobby_id.to_string(),
            bind_host: bind_host.to_string(),
            reliable_port,
            unreliable_port,
            roster,
            reliable,
            unreliable,
            shutdown: shutdown_tx,
            tasks: Mutex::new(vec![reliable_loop, unreliable_loop]),
            running: AtomicBool::new(true),
        })
    }

    pub fn lobby_id(&self) -> &str {
        &self.lobby_id
    }

    pub fn bind_host(&self) -> &str {
        &self.bind_host
    }

    pub fn reliable_port(&self) -> u16 {
        self.reliable_port
    }

    pub fn unreliable_port(&self) -> u16 {
        self.unreliable_port
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether `client_id` is currently in this lobby, reserved or
    /// connected.
    pub async fn has_client(&self, client_id: &str) -> bool {
        self.roster.read().await.contains(client_id)
    }

    /// Reserves a roster slot for a player admitted through the
    /// manager, ahead of its `connect` packet.
    pub async fn reserve_client(&self, client_id: &str) {
        self.roster.write().await.reserve(client_id);
    }

    /// Ids of every client currently registered.
    pub async fn client_ids(&self) -> Vec<String> {
        self.roster.read().await.client_ids()
    }

    /// Number of clients currently registered.
    pub async fn client_count(&self) -> usize {
        self.roster.read().await.len()
    }

    /// Whether the roster is currently empty (the idle reaper's signal).
    pub async fn is_empty(&self) -> bool {
        self.roster.read().await.is_empty()
    }

    /// Reliable packets still awaiting acknowledgment.
    pub async fn pending_reliable(&self) -> usize {
        self.reliable.pending_len().await
    }

    /// Stops the lobby: signals every task, waits for all of them to
    /// unwind, and stops the retry timer. Idempotent; once it returns,
    /// no further packet is processed.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        self.reliable.stop().await;

        info!("[{}] lobby server stopped", self.lobby_id);
    }
}

/// One receive loop: blocking read, decode, dispatch. Malformed packets
/// and socket errors are logged and the loop continues; only the
/// shutdown signal ends it.
fn spawn_receive_loop(
    lobby_id: String,
    socket: Arc<UdpSocket>,
    roster: Arc<RwLock<Roster>>,
    reliable: Arc<ReliableChannel>,
    unreliable: Arc<UnreliableChannel>,
    mut shutdown_rx: watch::Receiver<bool>,
    from_reliable: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        let mut consecutive_errors = 0u32;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                result = socket.recv_from(&mut buf) => match result {
                    Ok((len, addr)) => {
                        consecutive_errors = 0;
                        match Packet::decode(&buf[..len]) {
                            Ok(packet) => {
                                dispatch(
                                    &lobby_id,
                                    &roster,
                                    &reliable,
                                    &unreliable,
                                    packet,
                                    addr,
                                    from_reliable,
                                )
                                .await;
                            }
                            Err(e) => {
                                warn!("[{}] dropping malformed packet from {}: {}", lobby_id, addr, e);
                            }
                        }
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        error!("[{}] error receiving packet: {}", lobby_id, e);
                        if consecutive_errors >= MAX_CONSECUTIVE_RECV_ERRORS {
                            // The socket is not coming back; leave the
                            // lobby to the idle reaper instead of
                            // spinning on a dead descriptor.
                            error!(
                                "[{}] giving up on socket after {} consecutive receive errors",
                                lobby_id, consecutive_errors
                            );
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }
    })
}

/// Routes one decoded packet by type.
async fn dispatch(
    lobby_id: &str,
    roster: &RwLock<Roster>,
    reliable: &ReliableChannel,
    unreliable: &UnreliableChannel,
    packet: Packet,
    addr: SocketAddr,
    from_reliable: bool,
) {
    match packet.kind {
        PacketType::Connect => {
            let peers = {
                let mut roster = roster.write().await;
                let replaced = roster.register(&packet.client_id, addr);
                if replaced.is_some() {
                    info!("[{}] client {} reconnected from {}", lobby_id, packet.client_id, addr);
                } else {
                    info!("[{}] client {} connected from {}", lobby_id, packet.client_id, addr);
                }
                roster.others(&packet.client_id)
            };
            broadcast(reliable, &packet, &peers).await;
        }
        PacketType::Disconnect => {
            let (removed, peers) = {
                let mut roster = roster.write().await;
                let removed = roster.remove(&packet.client_id);
                (removed, roster.others(&packet.client_id))
            };
            if removed.is_some() {
                info!("[{}] client {} disconnected", lobby_id, packet.client_id);
            }
            broadcast(reliable, &packet, &peers).await;
            // Best-effort: anything still pending for the departed
            // address will never be acked.
            if let Some(endpoint) = removed {
                reliable.purge_client(endpoint.addr).await;
            }
        }
        PacketType::Update => {
            let peers = roster.read().await.others(&packet.client_id);
            broadcast(unreliable, &packet, &peers).await;
        }
        PacketType::Ack if from_reliable => match packet.seq {
            Some(seq) => reliable.process_ack(seq).await,
            None => warn!(
                "[{}] dropping ack without sequence number from {}",
                lobby_id, addr
            ),
        },
        PacketType::Ack => {
            warn!("[{}] ignoring ack on unreliable socket from {}", lobby_id, addr);
        }
    }
}

/// Sends `packet` to every peer in the snapshot, one independent
/// per-destination send; there is no atomicity across the set.
async fn broadcast<T: Transport>(transport: &T, packet: &Packet, peers: &[ClientEndpoint]) {
    for peer in peers {
        transport.send(packet.clone(), peer.addr).await;
    }
}
