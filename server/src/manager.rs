//! Lifecycle management for every lobby server in the process.
//!
//! The manager owns the full lobby map: it allocates non-conflicting
//! UDP port pairs, starts and stops lobby servers, tracks each lobby's
//! admin and last activity, and runs the background reaper that
//! removes lobbies left empty past the idle timeout. An HTTP control
//! plane sits in front of this API; the manager itself never proxies
//! game traffic, it only hands out the ports clients connect to.

use crate::config::ManagerConfig;
use crate::lobby::LobbyServer;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Bound on probe attempts before port allocation gives up.
const MAX_PORT_ATTEMPTS: u32 = 16;

/// Errors surfaced to the control-plane adapter.
///
/// All of these are caller errors or resource exhaustion; none of them
/// crash the manager, and a failed call leaves the lobby map unchanged.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("lobby {0} already exists")]
    LobbyAlreadyExists(String),
    #[error("lobby {0} does not exist")]
    LobbyNotFound(String),
    #[error("player {player_id} is already in lobby {lobby_id}")]
    PlayerAlreadyInLobby { lobby_id: String, player_id: String },
    #[error("no free UDP port found after {0} attempts")]
    PortExhaustion(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One row of [`LobbyManager::list_lobbies`], shaped for the control
/// plane to serialize straight into a listing response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LobbySummary {
    pub lobby_id: String,
    pub host: String,
    pub reliable_port: u16,
    pub unreliable_port: u16,
    pub client_ids: Vec<String>,
}

/// Everything the manager tracks, guarded by one lock so the maps stay
/// mutually consistent: a lobby id present in `servers` always has its
/// admin and activity entries, and teardown removes all of them in one
/// critical section.
#[derive(Default)]
struct ManagerState {
    servers: HashMap<String, Arc<LobbyServer>>,
    used_ports: HashSet<u16>,
    lobby_admins: HashMap<String, String>,
    last_activity: HashMap<String, Instant>,
    empty_since: HashMap<String, Instant>,
}

/// Supervises every running lobby server.
pub struct LobbyManager {
    config: ManagerConfig,
    state: Mutex<ManagerState>,
    shutdown: watch::Sender<bool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl LobbyManager {
    /// Creates the manager and starts its idle-reaper task.
    ///
    /// The returned handle is the process's composition root value;
    /// call [`shutdown`](Self::shutdown) before dropping the last
    /// clone, otherwise the reaper keeps running.
    pub async fn new(config: ManagerConfig) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let manager = Arc::new(Self {
            config,
            state: Mutex::new(ManagerState::default()),
            shutdown: shutdown_tx,
            reaper: Mutex::new(None),
        });

        let reaper = tokio::spawn(reap_loop(Arc::clone(&manager), shutdown_rx));
        *manager.reaper.lock().await = Some(reaper);

        manager
    }

    /// Allocates a port pair, binds and starts a lobby server, and
    /// records the admin and activity entries.
    ///
    /// The whole path runs under the manager lock, which is what makes
    /// racing allocations from concurrent creates safe.
    pub async fn create_lobby(
        &self,
        lobby_name: &str,
        admin_id: &str,
        bind_host: &str,
    ) -> Result<(u16, u16), ManagerError> {
        let mut state = self.state.lock().await;
        if state.servers.contains_key(lobby_name) {
            return Err(ManagerError::LobbyAlreadyExists(lobby_name.to_string()));
        }

        let reliable_port = allocate_port(bind_host, &state.used_ports).await?;
        state.used_ports.insert(reliable_port);
        let unreliable_port = match allocate_port(bind_host, &state.used_ports).await {
            Ok(port) => port,
            Err(e) => {
                state.used_ports.remove(&reliable_port);
                return Err(e);
            }
        };
        state.used_ports.insert(unreliable_port);

        let server = match LobbyServer::bind(
            lobby_name,
            bind_host,
            reliable_port,
            unreliable_port,
            self.config.reliable.clone(),
        )
        .await
        {
            Ok(server) => Arc::new(server),
            Err(e) => {
                state.used_ports.remove(&reliable_port);
                state.used_ports.remove(&unreliable_port);
                return Err(ManagerError::Io(e));
            }
        };

        state.servers.insert(lobby_name.to_string(), server);
        state
            .lobby_admins
            .insert(lobby_name.to_string(), admin_id.to_string());
        state
            .last_activity
            .insert(lobby_name.to_string(), Instant::now());

        info!(
            "lobby {} created by {} on ports {}/{}",
            lobby_name, admin_id, reliable_port, unreliable_port
        );
        Ok((reliable_port, unreliable_port))
    }

    /// Admits a player and returns the lobby's port pair for its UDP
    /// client to connect to directly.
    pub async fn join_lobby(
        &self,
        lobby_id: &str,
        player_id: &str,
    ) -> Result<(u16, u16), ManagerError> {
        let mut state = self.state.lock().await;
        let server = state
            .servers
            .get(lobby_id)
            .map(Arc::clone)
            .ok_or_else(|| ManagerError::LobbyNotFound(lobby_id.to_string()))?;

        if server.has_client(player_id).await {
            return Err(ManagerError::PlayerAlreadyInLobby {
                lobby_id: lobby_id.to_string(),
                player_id: player_id.to_string(),
            });
        }

        server.reserve_client(player_id).await;
        state
            .last_activity
            .insert(lobby_id.to_string(), Instant::now());

        debug!("player {} joined lobby {}", player_id, lobby_id);
        Ok((server.reliable_port(), server.unreliable_port()))
    }

    /// Stops a lobby server and releases everything it held.
    pub async fn remove_lobby(&self, lobby_id: &str) -> Result<(), ManagerError> {
        let mut state = self.state.lock().await;
        remove_locked(&mut state, lobby_id).await
    }

    /// Summaries of every running lobby.
    pub async fn list_lobbies(&self) -> Vec<LobbySummary> {
        let state = self.state.lock().await;
        let mut lobbies = Vec::with_capacity(state.servers.len());
        for (lobby_id, server) in &state.servers {
            lobbies.push(LobbySummary {
                lobby_id: lobby_id.clone(),
                host: server.bind_host().to_string(),
                reliable_port: server.reliable_port(),
                unreliable_port: server.unreliable_port(),
                client_ids: server.client_ids().await,
            });
        }
        lobbies
    }

    /// Whether `player_id` is the admin recorded for the lobby.
    pub async fn is_admin(&self, lobby_id: &str, player_id: &str) -> Result<bool, ManagerError> {
        let state = self.state.lock().await;
        state
            .lobby_admins
            .get(lobby_id)
            .map(|admin| admin == player_id)
            .ok_or_else(|| ManagerError::LobbyNotFound(lobby_id.to_string()))
    }

    /// Number of lobbies currently running.
    pub async fn lobby_count(&self) -> usize {
        self.state.lock().await.servers.len()
    }

    /// Stops the reaper, then every remaining lobby. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        if let Some(reaper) = self.reaper.lock().await.take() {
            let _ = reaper.await;
        }

        let mut state = self.state.lock().await;
        let lobby_ids: Vec<String> = state.servers.keys().cloned().collect();
        for lobby_id in lobby_ids {
            if let Err(e) = remove_locked(&mut state, &lobby_id).await {
                warn!("failed to remove lobby {} during shutdown: {}", lobby_id, e);
            }
        }

        info!("lobby manager shut down");
    }

    /// One reaper sweep: lobbies observed empty continuously for longer
    /// than the idle timeout are removed; a lobby that regained a
    /// client has its empty-tracking entry cleared so the timer
    /// restarts from scratch on its next emptiness.
    async fn reap_idle_lobbies(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let servers: Vec<(String, Arc<LobbyServer>)> = state
            .servers
            .iter()
            .map(|(id, server)| (id.clone(), Arc::clone(server)))
            .collect();

        let mut expired = Vec::new();
        for (lobby_id, server) in servers {
            if server.is_empty().await {
                let since = *state.empty_since.entry(lobby_id.clone()).or_insert(now);
                if now.duration_since(since) > self.config.idle_timeout {
                    expired.push(lobby_id);
                }
            } else {
                state.empty_since.remove(&lobby_id);
            }
        }

        for lobby_id in expired {
            info!("reaping lobby {} (empty past idle timeout)", lobby_id);
            if let Err(e) = remove_locked(&mut state, &lobby_id).await {
                warn!("failed to reap lobby {}: {}", lobby_id, e);
            }
        }
    }
}

/// Teardown under an already-held manager lock: stop the server, free
/// its ports, and drop every map entry in the same critical section.
async fn remove_locked(state: &mut ManagerState, lobby_id: &str) -> Result<(), ManagerError> {
    let server = state
        .servers
        .remove(lobby_id)
        .ok_or_else(|| ManagerError::LobbyNotFound(lobby_id.to_string()))?;

    server.stop().await;
    state.used_ports.remove(&server.reliable_port());
    state.used_ports.remove(&server.unreliable_port());
    state.lobby_admins.remove(lobby_id);
    state.last_activity.remove(lobby_id);
    state.empty_since.remove(lobby_id);

    info!("lobby {} stopped and removed", lobby_id);
    Ok(())
}

/// Asks the operating system for an ephemeral port by probing a bind to
/// port 0, rejecting ports the manager already reserved.
async fn allocate_port(bind_host: &str, used: &HashSet<u16>) -> Result<u16, ManagerError> {
    for _ in 0..MAX_PORT_ATTEMPTS {
        let probe = UdpSocket::bind((bind_host, 0)).await?;
        let port = probe.local_addr()?.port();
        drop(probe);
        if !used.contains(&port) {
            return Ok(port);
        }
    }
    Err(ManagerError::PortExhaustion(MAX_PORT_ATTEMPTS))
}

/// The idle-reaper task: sweep on a fixed tick until shutdown.
async fn reap_loop(manager: Arc<LobbyManager>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = interval(manager.config.reap_interval);
    // The first tick of a tokio interval fires immediately; consume it
    // so sweeps start one full interval after startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => manager.reap_idle_lobbies().await,
            _ = shutdown_rx.changed() => break,
        }
    }
}
