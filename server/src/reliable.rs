//! Reliable delivery over the lobby's acknowledged UDP socket.
//!
//! Every outgoing packet is stamped with a fresh sequence number and
//! parked in a pending-ack table. A timer task sweeps the table and
//! resends anything unacknowledged past the ack timeout, reusing the
//! original sequence number, until the retry cap is reached, after
//! which the packet is abandoned and only a warning remains. Delivery
//! is therefore at-least-once while retries last, with no ordering
//! between distinct sequence numbers.

use crate::channel::Transport;
use crate::config::ReliableConfig;
use log::{debug, error, warn};
use shared::Packet;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// A reliable packet awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct PendingAck {
    /// The stamped packet, kept verbatim for retransmission.
    pub packet: Packet,
    /// Where the packet was sent.
    pub destination: SocketAddr,
    /// When the packet was first written to the socket.
    pub first_sent_at: Instant,
    /// When the packet was last (re)sent; drives the retry timer.
    pub last_sent_at: Instant,
    /// Retransmissions performed so far. Never exceeds the configured cap.
    pub retry_count: u32,
}

/// Sequence counter and pending table, guarded by one lock.
///
/// The lock is held only for counter/table operations, never across a
/// socket write.
#[derive(Debug, Default)]
struct ChannelState {
    sequence: u32,
    pending: HashMap<u32, PendingAck>,
}

/// The acknowledged half of a lobby's socket pair.
pub struct ReliableChannel {
    socket: Arc<UdpSocket>,
    state: Arc<Mutex<ChannelState>>,
    shutdown: watch::Sender<bool>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

impl ReliableChannel {
    /// Wraps the lobby's reliable socket and starts the retry timer task.
    pub fn new(socket: Arc<UdpSocket>, config: ReliableConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(ChannelState::default()));

        let retry_task = tokio::spawn(retry_loop(
            Arc::clone(&socket),
            Arc::clone(&state),
            config,
            shutdown_rx,
        ));

        Self {
            socket,
            state,
            shutdown: shutdown_tx,
            retry_task: Mutex::new(Some(retry_task)),
        }
    }

    /// Stamps the next sequence number into `packet`, records the
    /// pending entry, and writes the datagram.
    ///
    /// The entry is inserted before the socket write so a failed write
    /// is repaired by the next retry sweep rather than lost.
    pub async fn send(&self, mut packet: Packet, dest: SocketAddr) {
        let now = Instant::now();
        {
            let mut state = self.state.lock().await;
            state.sequence += 1;
            let seq = state.sequence;
            packet.seq = Some(seq);
            state.pending.insert(
                seq,
                PendingAck {
                    packet: packet.clone(),
                    destination: dest,
                    first_sent_at: now,
                    last_sent_at: now,
                    retry_count: 0,
                },
            );
        }

        write_datagram(&self.socket, &packet, dest).await;
    }

    /// Clears the pending entry for an acknowledged sequence number.
    ///
    /// Duplicate or late acks find no entry and are a no-op.
    pub async fn process_ack(&self, seq: u32) {
        let mut state = self.state.lock().await;
        if state.pending.remove(&seq).is_some() {
            debug!("ack received for seq {}", seq);
        } else {
            debug!("ignoring duplicate or late ack for seq {}", seq);
        }
    }

    /// Drops every pending entry destined for `addr`.
    ///
    /// Best-effort cleanup when a client leaves; packets toward a
    /// departed address will never be acked.
    pub async fn purge_client(&self, addr: SocketAddr) {
        let mut state = self.state.lock().await;
        let before = state.pending.len();
        state.pending.retain(|_, entry| entry.destination != addr);
        let dropped = before - state.pending.len();
        if dropped > 0 {
            debug!("purged {} pending packet(s) for departed {}", dropped, addr);
        }
    }

    /// Number of packets still awaiting acknowledgment.
    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Stops the retry timer task and waits for it to unwind. Idempotent.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.retry_task.lock().await.take() {
            let _ = task.await;
        }
    }
}

impl Transport for ReliableChannel {
    fn send(&self, packet: Packet, dest: SocketAddr) -> impl Future<Output = ()> + Send {
        ReliableChannel::send(self, packet, dest)
    }
}

/// Periodic sweep of the pending table.
///
/// Due entries are collected and mutated under the lock, then resent
/// outside it; entries past the retry cap are dropped silently apart
/// from a warning.
async fn retry_loop(
    socket: Arc<UdpSocket>,
    state: Arc<Mutex<ChannelState>>,
    config: ReliableConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(config.retry_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let mut resends = Vec::new();
                {
                    let mut state = state.lock().await;
                    state.pending.retain(|seq, entry| {
                        if now.duration_since(entry.last_sent_at) <= config.ack_timeout {
                            return true;
                        }
                        if entry.retry_count >= config.max_retries {
                            warn!(
                                "abandoning packet seq {} to {} after {} retries ({:?} unacknowledged)",
                                seq,
                                entry.destination,
                                entry.retry_count,
                                now.duration_since(entry.first_sent_at),
                            );
                            return false;
                        }
                        entry.retry_count += 1;
                        entry.last_sent_at = now;
                        resends.push((entry.packet.clone(), entry.destination, *seq, entry.retry_count));
                        true
                    });
                }

                for (packet, dest, seq, attempt) in resends {
                    debug!("resending seq {} to {} (attempt {})", seq, dest, attempt);
                    write_datagram(&socket, &packet, dest).await;
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

/// Encode and write one datagram; failures are logged, the retry sweep
/// covers the rest.
async fn write_datagram(socket: &UdpSocket, packet: &Packet, dest: SocketAddr) {
    match packet.encode() {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, dest).await {
                warn!("failed to send packet to {}: {}", dest, e);
            }
        }
        Err(e) => error!("failed to encode outgoing packet: {}", e),
    }
}
