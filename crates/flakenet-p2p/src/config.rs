//! Tunables for the connection scheduler.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Sixteen-byte network identity echoed in every handshake; peers on
    /// a different network are disconnected.
    #[serde(default = "default_network_id")]
    pub network_id: String,
    /// Bootstrap addresses dialed when the white tier is empty.
    #[serde(default)]
    pub seed_nodes: Vec<String>,
    #[serde(default = "default_max_out")]
    pub max_out_connections: usize,
    #[serde(default = "default_anchor_connections")]
    pub anchor_connections: usize,
    /// Share of the outbound quota reserved for white-tier peers.
    #[serde(default = "default_white_percent")]
    pub white_connect_percent: usize,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

impl P2pConfig {
    /// How many outbound links should come from the white tier.
    pub fn expected_white_connections(&self) -> usize {
        self.max_out_connections * self.white_connect_percent / 100
    }
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            network_id: default_network_id(),
            seed_nodes: Vec::new(),
            max_out_connections: default_max_out(),
            anchor_connections: default_anchor_connections(),
            white_connect_percent: default_white_percent(),
            tick_interval_secs: default_tick_interval(),
        }
    }
}

// Default value functions
fn default_listen_port() -> u16 {
    12560
}
fn default_network_id() -> String {
    "rnowflakenetwork".into()
}
fn default_max_out() -> usize {
    8
}
fn default_anchor_connections() -> usize {
    2
}
fn default_white_percent() -> usize {
    70
}
fn default_tick_interval() -> u64 {
    5
}
