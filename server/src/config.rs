//! Tunable timing parameters for the reliability engine and the lobby
//! manager. Tests shrink these to run against a compressed clock.

use std::time::Duration;

/// Retransmission parameters for one reliable channel.
#[derive(Debug, Clone)]
pub struct ReliableConfig {
    /// How long a sent packet may wait for an ack before it is resent.
    pub ack_timeout: Duration,
    /// Interval between sweeps of the pending-ack table.
    pub retry_interval: Duration,
    /// Retransmissions allowed per packet before it is abandoned.
    pub max_retries: u32,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(1),
            retry_interval: Duration::from_millis(100),
            max_retries: 3,
        }
    }
}

/// Lifecycle parameters for the lobby manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Interval between idle-reaper sweeps.
    pub reap_interval: Duration,
    /// How long a lobby may stay continuously empty before it is reaped.
    pub idle_timeout: Duration,
    /// Reliability parameters handed to every lobby server created.
    pub reliable: ReliableConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reap_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            reliable: ReliableConfig::default(),
        }
    }
}
