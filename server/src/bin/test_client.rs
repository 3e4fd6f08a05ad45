use clap::Parser;
use shared::{Packet, PacketType};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

/// Manual smoke client for a running lobby server: connects over the
/// reliable channel, fires a burst of updates over the unreliable one,
/// acks whatever reliable traffic comes back, then disconnects.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Lobby server host
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// The lobby's reliable (acknowledged) port
    #[clap(long)]
    reliable_port: u16,
    /// The lobby's unreliable (fire-and-forget) port
    #[clap(long)]
    unreliable_port: u16,
    /// Client id announced to the lobby; generated when omitted
    #[clap(long)]
    client_id: Option<String>,
    /// Number of update packets to send
    #[clap(long, default_value = "5")]
    updates: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let client_id = args
        .client_id
        .unwrap_or_else(|| format!("client-{:04x}", rand::random::<u16>()));

    let reliable_addr: SocketAddr = format!("{}:{}", args.host, args.reliable_port).parse()?;
    let unreliable_addr: SocketAddr = format!("{}:{}", args.host, args.unreliable_port).parse()?;

    let reliable_socket = UdpSocket::bind("0.0.0.0:0").await?;
    let unreliable_socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!(
        "client {} bound to {} (reliable) and {} (unreliable)",
        client_id,
        reliable_socket.local_addr()?,
        unreliable_socket.local_addr()?
    );

    // Announce ourselves over the reliable channel.
    let connect = Packet::connect(client_id.clone());
    reliable_socket
        .send_to(&connect.encode()?, reliable_addr)
        .await?;
    println!("sent connect to {}", reliable_addr);

    for i in 0..args.updates {
        let update = Packet::update(client_id.clone(), vec![i as u8]);
        unreliable_socket
            .send_to(&update.encode()?, unreliable_addr)
            .await?;
        println!("sent update {} to {}", i, unreliable_addr);

        drain_and_ack(&reliable_socket, reliable_addr, &client_id).await?;
        sleep(Duration::from_millis(500)).await;
    }

    let disconnect = Packet::disconnect(client_id.clone());
    reliable_socket
        .send_to(&disconnect.encode()?, reliable_addr)
        .await?;
    println!("sent disconnect, test client finished");

    Ok(())
}

/// Reads whatever reliable traffic is queued and acknowledges every
/// sequenced packet so the server's retry timer stands down.
async fn drain_and_ack(
    socket: &UdpSocket,
    server: SocketAddr,
    client_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut buf = [0u8; 4096];

    loop {
        match timeout(Duration::from_millis(100), socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => match Packet::decode(&buf[..len]) {
                Ok(packet) => {
                    println!("received {:?} about {}", packet.kind, packet.client_id);
                    if packet.kind != PacketType::Ack {
                        if let Some(seq) = packet.seq {
                            let ack = Packet::ack(client_id.to_string(), seq);
                            socket.send_to(&ack.encode()?, server).await?;
                            println!("acked seq {}", seq);
                        }
                    }
                }
                Err(e) => println!("failed to decode packet: {}", e),
            },
            Ok(Err(e)) => {
                println!("receive error: {}", e);
                break;
            }
            // Nothing queued right now.
            Err(_) => break,
        }
    }

    Ok(())
}
