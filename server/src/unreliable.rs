//! Fire-and-forget delivery over the lobby's unreliable UDP socket.

use crate::channel::Transport;
use log::{error, warn};
use shared::Packet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// The best-effort half of a lobby's socket pair.
///
/// No sequence numbers, no tracking, no retries: a packet is encoded,
/// written once, and forgotten. Send failures are logged and discarded
/// so they can never stall the loops calling in.
pub struct UnreliableChannel {
    socket: Arc<UdpSocket>,
}

impl UnreliableChannel {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        Self { socket }
    }

    /// Encode and write one datagram toward `dest`.
    pub async fn send(&self, packet: Packet, dest: SocketAddr) {
        match packet.encode() {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, dest).await {
                    warn!("failed to send unreliable packet to {}: {}", dest, e);
                }
            }
            Err(e) => error!("failed to encode outgoing packet: {}", e),
        }
    }
}

impl Transport for UnreliableChannel {
    fn send(&self, packet: Packet, dest: SocketAddr) -> impl Future<Output = ()> + Send {
        UnreliableChannel::send(self, packet, dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn delivers_datagram_without_stamping_sequence() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let channel = UnreliableChannel::new(socket);

        let sent = Packet::update("p1", vec![9, 8, 7]);
        channel.send(sent.clone(), peer.local_addr().unwrap()).await;

        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(1), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let received = Packet::decode(&buf[..len]).unwrap();

        assert_eq!(received, sent);
        assert_eq!(received.seq, None);
    }

    #[tokio::test]
    async fn send_through_transport_trait() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let channel = UnreliableChannel::new(socket);

        Transport::send(&channel, Packet::update("p1", vec![1]), peer.local_addr().unwrap())
            .await;

        let mut buf = [0u8; 2048];
        let (len, _) = timeout(Duration::from_secs(1), peer.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(Packet::decode(&buf[..len]).is_ok());
    }
}
