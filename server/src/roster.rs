//! Connected-client tracking for one lobby.
//!
//! This module owns the roster a lobby server consults on every
//! dispatch: who is in the lobby and where their datagrams go. It
//! enforces the uniqueness invariant (at most one entry per client id)
//! and provides the snapshots the broadcast paths iterate, so a client
//! joining or leaving mid-broadcast only affects later broadcasts.
//!
//! Membership has two stages. A join through the manager *reserves* an
//! id before the player's UDP client has an address, which is what
//! makes a second join with the same id fail; the client's `connect`
//! packet then *registers* the endpoint the broadcasts deliver to.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

/// One connected client: its lobby-unique id and the source address
/// its packets arrive from (and broadcasts return to).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEndpoint {
    pub client_id: String,
    pub addr: SocketAddr,
}

/// The set of clients currently in a lobby.
///
/// Keyed by client id. Registration overwrites any prior entry for the
/// same id, which is what makes reconnecting from a new address work:
/// the roster keeps exactly one entry per id with the most recent
/// address.
#[derive(Debug, Default)]
pub struct Roster {
    clients: HashMap<String, ClientEndpoint>,
    reserved: HashSet<String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an id ahead of its `connect` packet.
    pub fn reserve(&mut self, client_id: &str) {
        if !self.clients.contains_key(client_id) {
            self.reserved.insert(client_id.to_string());
        }
    }

    /// Registers a connected client, consuming any reservation and
    /// returning the endpoint it replaced if the id was already
    /// connected (a reconnect).
    pub fn register(&mut self, client_id: &str, addr: SocketAddr) -> Option<ClientEndpoint> {
        self.reserved.remove(client_id);
        self.clients.insert(
            client_id.to_string(),
            ClientEndpoint {
                client_id: client_id.to_string(),
                addr,
            },
        )
    }

    /// Removes a client by id, returning its endpoint if it was
    /// connected. Clears a bare reservation too.
    pub fn remove(&mut self, client_id: &str) -> Option<ClientEndpoint> {
        self.reserved.remove(client_id);
        self.clients.remove(client_id)
    }

    /// Whether a client id is in the lobby, reserved or connected.
    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id) || self.reserved.contains(client_id)
    }

    /// Snapshot of every *connected* client except `exclude_id`.
    ///
    /// This is what the broadcast paths iterate: the excluded id is the
    /// packet's originator, which never receives its own broadcast, and
    /// reserved ids have no address to deliver to yet.
    pub fn others(&self, exclude_id: &str) -> Vec<ClientEndpoint> {
        self.clients
            .values()
            .filter(|endpoint| endpoint.client_id != exclude_id)
            .cloned()
            .collect()
    }

    /// All client ids in the lobby, reserved and connected.
    pub fn client_ids(&self) -> Vec<String> {
        self.clients
            .keys()
            .chain(self.reserved.iter())
            .cloned()
            .collect()
    }

    /// Number of clients in the lobby, reserved and connected.
    pub fn len(&self) -> usize {
        self.clients.len() + self.reserved.len()
    }

    /// Whether the lobby currently has no clients at all (the idle
    /// reaper's signal).
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty() && self.reserved.is_empty()
    }
}
