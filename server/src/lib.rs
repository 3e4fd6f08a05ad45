//! # Lobby Game-Networking Backend
//!
//! This library provides the UDP transport core for a lobby-oriented
//! multiplayer backend. A control plane (an HTTP API, kept external to
//! this crate) asks the [`manager::LobbyManager`] for lobbies; every
//! lobby is its own [`lobby::LobbyServer`] with a private pair of UDP
//! sockets, and clients talk to those sockets directly; the manager
//! never proxies game traffic.
//!
//! ## Protocol
//!
//! Each lobby exposes two independent channels:
//!
//! - **Reliable**: packets are stamped with a per-socket sequence
//!   number and retransmitted on a timer until acknowledged or the
//!   retry cap is reached. Used for `connect`/`disconnect` membership
//!   traffic, where a lost packet would desynchronize rosters.
//! - **Unreliable**: plain fire-and-forget datagrams. Used for
//!   `update` gameplay traffic, where the next update supersedes a
//!   lost one anyway.
//!
//! A client joins through the control plane, receives the lobby's two
//! ports, sends `connect` to the reliable port, exchanges `update`
//! packets over the unreliable port, and leaves with `disconnect`.
//! Membership changes are broadcast reliably to every other client in
//! the lobby.
//!
//! ## Concurrency
//!
//! Every lobby runs three long-lived tokio tasks (a receive loop per
//! socket and the reliable channel's retry timer); the manager's idle
//! reaper, process-wide, makes a fourth. Shared state is confined to
//! small lock-guarded structures (the roster, the pending-ack table,
//! the manager's lobby maps) and no lock is held across a socket
//! write. Faults are isolated per lobby: a failing socket or a
//! malformed packet never affects another lobby or the manager.
//!
//! ## Module Organization
//!
//! - [`channel`]: the `Transport` seam both delivery flavors implement
//! - [`reliable`]: sequence numbering, pending-ack table, retry timer
//! - [`unreliable`]: the stateless best-effort path
//! - [`roster`]: per-lobby client membership
//! - [`lobby`]: socket pair, receive loops, and packet dispatch
//! - [`manager`]: lobby lifecycle, port allocation, idle reaping
//! - [`config`]: timing knobs with production defaults
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ManagerConfig;
//! use server::manager::LobbyManager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = LobbyManager::new(ManagerConfig::default()).await;
//!
//!     // The control plane calls in; clients then connect their own
//!     // UDP sockets to the returned ports.
//!     let (reliable_port, unreliable_port) =
//!         manager.create_lobby("duel-1", "admin", "127.0.0.1").await?;
//!     println!("lobby at {}/{}", reliable_port, unreliable_port);
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod lobby;
pub mod manager;
pub mod reliable;
pub mod roster;
pub mod unreliable;
