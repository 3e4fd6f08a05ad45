//! Wire packet model shared by the lobby servers and their UDP clients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the packet codec.
#[derive(Debug, Error)]
pub enum PacketError {
    /// The bytes did not parse into the expected packet shape, or the
    /// packet carried an unrecognized type tag.
    #[error("malformed packet: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Discriminates the four packet shapes the lobby protocol exchanges.
///
/// Serialized as the lowercase type tag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketType {
    Connect,
    Disconnect,
    Update,
    Ack,
}

/// A single application-level datagram.
///
/// One shape serves both channels: reliable packets carry a sequence
/// number stamped by the sender's reliable channel, `update` packets
/// carry an opaque payload, and `ack` packets echo the sequence number
/// they confirm. Optional fields are omitted from the wire when unset,
/// and unknown extra fields in received packets are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "type")]
    pub kind: PacketType,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
}

impl Packet {
    /// A client's join announcement, sent over the reliable channel.
    pub fn connect(client_id: impl Into<String>) -> Self {
        Self {
            kind: PacketType::Connect,
            client_id: client_id.into(),
            seq: None,
            data: None,
        }
    }

    /// A client's departure notice, sent over the reliable channel.
    pub fn disconnect(client_id: impl Into<String>) -> Self {
        Self {
            kind: PacketType::Disconnect,
            client_id: client_id.into(),
            seq: None,
            data: None,
        }
    }

    /// A gameplay state update carrying an opaque payload, sent over
    /// the unreliable channel.
    pub fn update(client_id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: PacketType::Update,
            client_id: client_id.into(),
            seq: None,
            data: Some(data),
        }
    }

    /// Confirms receipt of the reliable packet carrying `seq`.
    pub fn ack(client_id: impl Into<String>, seq: u32) -> Self {
        Self {
            kind: PacketType::Ack,
            client_id: client_id.into(),
            seq: Some(seq),
            data: None,
        }
    }

    /// Serializes the packet for transmission.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses one received datagram. Pure; no side effects on failure.
    pub fn decode(bytes: &[u8]) -> Result<Packet, PacketError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
