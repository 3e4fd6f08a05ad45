//! Integration tests for the lobby networking backend
//!
//! These tests validate cross-component interactions over real
//! loopback sockets: the wire codec, the reliable channel's
//! retransmission, full lobby traffic flows, and the manager's
//! control-plane surface.

use server::config::{ManagerConfig, ReliableConfig};
use server::manager::{LobbyManager, ManagerError};
use shared::{Packet, PacketType};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

/// Manager timing that keeps the reaper out of the way.
fn quiet_config() -> ManagerConfig {
    ManagerConfig {
        reap_interval: Duration::from_secs(3600),
        idle_timeout: Duration::from_secs(3600),
        reliable: ReliableConfig::default(),
    }
}

/// Manager timing with fast retransmission for observing retries.
fn retrying_config() -> ManagerConfig {
    ManagerConfig {
        reliable: ReliableConfig {
            ack_timeout: Duration::from_millis(100),
            retry_interval: Duration::from_millis(20),
            max_retries: 3,
        },
        ..quiet_config()
    }
}

async fn client_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

fn lobby_addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

async fn send_packet(socket: &UdpSocket, packet: &Packet, dest: SocketAddr) {
    socket.send_to(&packet.encode().unwrap(), dest).await.unwrap();
}

async fn recv_packet(socket: &UdpSocket, wait: Duration) -> Option<Packet> {
    let mut buf = [0u8; 4096];
    match timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(Packet::decode(&buf[..len]).unwrap()),
        _ => None,
    }
}

/// Reads until a packet of `kind` arrives, skipping retransmissions of
/// earlier reliable packets.
async fn recv_packet_of_kind(socket: &UdpSocket, kind: PacketType) -> Option<Packet> {
    for _ in 0..10 {
        match recv_packet(socket, Duration::from_secs(2)).await {
            Some(packet) if packet.kind == kind => return Some(packet),
            Some(_) => continue,
            None => return None,
        }
    }
    None
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests packet round-trip across a real UDP socket pair
    #[test]
    fn packet_roundtrip_over_loopback() {
        tokio_test::block_on(async {
            let sender = client_socket().await;
            let receiver = client_socket().await;
            let receiver_addr = receiver.local_addr().unwrap();

            let packets = vec![
                Packet::connect("p1"),
                Packet::disconnect("p1"),
                Packet::update("p1", vec![0, 127, 255]),
                Packet::ack("p1", 9),
            ];

            for packet in packets {
                sender
                    .send_to(&packet.encode().unwrap(), receiver_addr)
                    .await
                    .unwrap();
                let received = recv_packet(&receiver, Duration::from_secs(1))
                    .await
                    .unwrap();
                assert_eq!(received, packet);
            }
        });
    }

    /// Tests that stamped sequence numbers survive the wire unchanged
    #[tokio::test]
    async fn sequence_stamp_survives_the_wire() {
        let sender = client_socket().await;
        let receiver = client_socket().await;

        let mut packet = Packet::connect("p1");
        packet.seq = Some(123);
        sender
            .send_to(&packet.encode().unwrap(), receiver.local_addr().unwrap())
            .await
            .unwrap();

        let received = recv_packet(&receiver, Duration::from_secs(1)).await.unwrap();
        assert_eq!(received.seq, Some(123));
    }
}

/// RELIABLE DELIVERY TESTS
mod reliability_tests {
    use super::*;

    /// A client that never acks sees the same sequence number again.
    #[tokio::test]
    async fn unacknowledged_broadcast_is_retransmitted() {
        let manager = LobbyManager::new(retrying_config()).await;
        let (reliable_port, _) = manager
            .create_lobby("retry-lobby", "admin", "127.0.0.1")
            .await
            .unwrap();
        let dest = lobby_addr(reliable_port);

        let alice = client_socket().await;
        let bob = client_socket().await;
        send_packet(&alice, &Packet::connect("alice"), dest).await;
        sleep(Duration::from_millis(50)).await;
        send_packet(&bob, &Packet::connect("bob"), dest).await;

        // Alice ignores the connect notice; the retry timer resends it
        // with the original sequence number.
        let first = recv_packet(&alice, Duration::from_secs(2)).await.unwrap();
        let second = recv_packet(&alice, Duration::from_secs(2)).await.unwrap();
        assert_eq!(first.kind, PacketType::Connect);
        assert_eq!(first.client_id, "bob");
        assert_eq!(second.seq, first.seq);

        manager.shutdown().await;
    }

    /// An acked packet is never retransmitted.
    #[tokio::test]
    async fn acknowledged_broadcast_is_not_retransmitted() {
        let manager = LobbyManager::new(retrying_config()).await;
        let (reliable_port, _) = manager
            .create_lobby("ack-lobby", "admin", "127.0.0.1")
            .await
            .unwrap();
        let dest = lobby_addr(reliable_port);

        let alice = client_socket().await;
        let bob = client_socket().await;
        send_packet(&alice, &Packet::connect("alice"), dest).await;
        sleep(Duration::from_millis(50)).await;
        send_packet(&bob, &Packet::connect("bob"), dest).await;

        let notice = recv_packet(&alice, Duration::from_secs(2)).await.unwrap();
        send_packet(&alice, &Packet::ack("alice", notice.seq.unwrap()), dest).await;

        // Nothing further arrives once the ack landed: a small grace
        // period for an already-in-flight retry, then silence.
        sleep(Duration::from_millis(150)).await;
        let mut late = recv_packet(&alice, Duration::from_millis(50)).await;
        if late.is_some() {
            late = recv_packet(&alice, Duration::from_millis(300)).await;
        }
        assert!(late.is_none());

        manager.shutdown().await;
    }
}

/// LOBBY TRAFFIC TESTS
mod lobby_flow_tests {
    use super::*;

    /// Full client session: connect, update, disconnect, with both
    /// broadcast channels observed from a second client.
    #[tokio::test]
    async fn full_session_flow() {
        let manager = LobbyManager::new(quiet_config()).await;
        let (reliable_port, unreliable_port) = manager
            .create_lobby("flow-lobby", "admin", "127.0.0.1")
            .await
            .unwrap();
        let reliable_dest = lobby_addr(reliable_port);
        let unreliable_dest = lobby_addr(unreliable_port);

        let alice = client_socket().await;
        let bob = client_socket().await;

        send_packet(&alice, &Packet::connect("alice"), reliable_dest).await;
        sleep(Duration::from_millis(50)).await;
        send_packet(&bob, &Packet::connect("bob"), reliable_dest).await;

        // Alice learns about bob over the reliable channel and acks.
        let joined = recv_packet_of_kind(&alice, PacketType::Connect).await.unwrap();
        assert_eq!(joined.client_id, "bob");
        send_packet(&alice, &Packet::ack("alice", joined.seq.unwrap()), reliable_dest).await;

        // The roster is visible through the control-plane listing.
        let lobbies = manager.list_lobbies().await;
        assert_eq!(lobbies.len(), 1);
        let mut ids = lobbies[0].client_ids.clone();
        ids.sort();
        assert_eq!(ids, vec!["alice".to_string(), "bob".to_string()]);

        // Gameplay updates flow unreliably to the other client.
        send_packet(&bob, &Packet::update("bob", b"pos:3,4".to_vec()), unreliable_dest).await;
        let update = recv_packet_of_kind(&alice, PacketType::Update).await.unwrap();
        assert_eq!(update.client_id, "bob");
        assert_eq!(update.data, Some(b"pos:3,4".to_vec()));

        // Departure is announced reliably.
        send_packet(&bob, &Packet::disconnect("bob"), reliable_dest).await;
        let left = recv_packet_of_kind(&alice, PacketType::Disconnect).await.unwrap();
        assert_eq!(left.client_id, "bob");

        manager.remove_lobby("flow-lobby").await.unwrap();
        assert!(manager.list_lobbies().await.is_empty());
        manager.shutdown().await;
    }

    /// A client built against a newer protocol revision can carry extra
    /// fields without being rejected.
    #[tokio::test]
    async fn connect_with_extra_fields_is_accepted() {
        let manager = LobbyManager::new(quiet_config()).await;
        let (reliable_port, _) = manager
            .create_lobby("compat-lobby", "admin", "127.0.0.1")
            .await
            .unwrap();

        let future_client = serde_json::json!({
            "type": "connect",
            "client_id": "time-traveler",
            "color": "teal",
            "loadout": ["sword", "shield"],
        });
        let socket = client_socket().await;
        socket
            .send_to(
                future_client.to_string().as_bytes(),
                lobby_addr(reliable_port),
            )
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;

        let lobbies = manager.list_lobbies().await;
        assert_eq!(lobbies[0].client_ids, vec!["time-traveler".to_string()]);

        manager.shutdown().await;
    }

    /// Reconnecting with the same id replaces the old endpoint instead
    /// of duplicating it.
    #[tokio::test]
    async fn reconnect_replaces_endpoint() {
        let manager = LobbyManager::new(quiet_config()).await;
        let (reliable_port, _) = manager
            .create_lobby("reconnect-lobby", "admin", "127.0.0.1")
            .await
            .unwrap();
        let dest = lobby_addr(reliable_port);

        let old_socket = client_socket().await;
        let new_socket = client_socket().await;
        send_packet(&old_socket, &Packet::connect("alice"), dest).await;
        sleep(Duration::from_millis(50)).await;
        send_packet(&new_socket, &Packet::connect("alice"), dest).await;
        sleep(Duration::from_millis(100)).await;

        let lobbies = manager.list_lobbies().await;
        assert_eq!(lobbies[0].client_ids, vec!["alice".to_string()]);

        manager.shutdown().await;
    }
}

/// CONTROL-PLANE SURFACE TESTS
mod manager_tests {
    use super::*;

    /// The create/join/remove scenario the control plane drives.
    #[tokio::test]
    async fn control_plane_scenario() {
        let manager = LobbyManager::new(quiet_config()).await;

        let (p1, p2) = manager
            .create_lobby("L1", "admin1", "127.0.0.1")
            .await
            .unwrap();
        assert!((1024..=65535).contains(&p1));
        assert!((1024..=65535).contains(&p2));
        assert_ne!(p1, p2);

        assert_eq!(manager.join_lobby("L1", "admin1").await.unwrap(), (p1, p2));
        assert!(manager.is_admin("L1", "admin1").await.unwrap());

        assert!(matches!(
            manager.join_lobby("L1", "admin1").await,
            Err(ManagerError::PlayerAlreadyInLobby { .. })
        ));

        manager.remove_lobby("L1").await.unwrap();
        assert!(matches!(
            manager.join_lobby("L1", "p2").await,
            Err(ManagerError::LobbyNotFound(_))
        ));

        manager.shutdown().await;
    }

    /// Lobbies are isolated: traffic in one never shows up in another.
    #[tokio::test]
    async fn lobbies_are_isolated() {
        let manager = LobbyManager::new(quiet_config()).await;
        let (first_reliable, _) = manager
            .create_lobby("first", "admin", "127.0.0.1")
            .await
            .unwrap();
        let (second_reliable, _) = manager
            .create_lobby("second", "admin", "127.0.0.1")
            .await
            .unwrap();

        let alice = client_socket().await;
        let eve = client_socket().await;
        send_packet(&alice, &Packet::connect("alice"), lobby_addr(first_reliable)).await;
        send_packet(&eve, &Packet::connect("eve"), lobby_addr(second_reliable)).await;
        sleep(Duration::from_millis(100)).await;

        let mut rosters: Vec<(String, Vec<String>)> = manager
            .list_lobbies()
            .await
            .into_iter()
            .map(|l| (l.lobby_id, l.client_ids))
            .collect();
        rosters.sort();

        assert_eq!(
            rosters,
            vec![
                ("first".to_string(), vec!["alice".to_string()]),
                ("second".to_string(), vec!["eve".to_string()]),
            ]
        );

        manager.shutdown().await;
    }
}
