//! The delivery seam between the lobby server and its two sockets.

use shared::Packet;
use std::future::Future;
use std::net::SocketAddr;

/// One-way packet delivery toward a client address.
///
/// Implemented by both the reliable and the unreliable channel; the
/// lobby server's broadcast path is generic over this trait and picks
/// the channel per packet type by composition. Delivery failures are
/// the implementation's problem (retry or drop) and are never surfaced
/// to the caller.
pub trait Transport {
    /// Encode and transmit one packet toward `dest`.
    fn send(&self, packet: Packet, dest: SocketAddr) -> impl Future<Output = ()> + Send;
}
