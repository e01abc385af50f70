//! Connection scheduler.
//!
//! A single tick loop drives all outbound connection management: seed
//! bootstrap while the white tier is empty, quota fill from the anchor,
//! white and gray tiers, and a periodic timed-sync sweep that refreshes
//! every live link and harvests its peer list. Dials are sequential
//! within a tick; each is bounded by a connect timeout, so a tick can
//! never wedge the loop.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use flakenet_levin::{Connection, LevinError};

use crate::config::P2pConfig;
use crate::directory::{unix_now, MergeError, PeerDirectory};
use crate::messages::{
    BasicNodeData, CoreSyncData, HandshakeRequest, HandshakeResponse, NodeAddress,
    TimedSyncRequest, TimedSyncResponse, COMMAND_HANDSHAKE, COMMAND_TIMED_SYNC,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const INVOKE_TIMEOUT: Duration = Duration::from_secs(120);
/// Timed-sync sweep runs once per this many ticks (60s at the default
/// 5s tick).
const TIMED_SYNC_TICKS: u64 = 12;
/// Ceiling on dial attempts per tier per tick.
const MAX_DIAL_ATTEMPTS: usize = 10;
/// Sampling retries per tier are budgeted at three times the tier size,
/// clamped here, so a tier full of already-connected peers cannot spin
/// the loop forever.
const MAX_SAMPLED_PEERS: usize = 20;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("peer is on network {got:?}")]
    WrongNetwork { got: String },
    #[error("peer list rejected: {0}")]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Levin(#[from] LevinError),
}

#[derive(Clone, Copy)]
enum Tier {
    Anchor,
    White,
    Gray,
}

/// A running p2p node: peer directory plus the outbound scheduler task.
pub struct Node {
    shared: Arc<NodeShared>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    tick_task: Option<JoinHandle<()>>,
}

struct NodeShared {
    config: P2pConfig,
    peer_id: u64,
    directory: PeerDirectory,
    outs: Mutex<HashMap<String, Arc<Connection>>>,
}

impl Node {
    /// Spawn the scheduler. The node starts with an empty directory and
    /// a freshly drawn peer id.
    pub fn start(config: P2pConfig) -> Self {
        let shared = Arc::new(NodeShared {
            peer_id: rand::thread_rng().gen(),
            directory: PeerDirectory::new(),
            outs: Mutex::new(HashMap::new()),
            config,
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let tick_task = tokio::spawn(tick_loop(shared.clone(), shutdown_rx));
        Self {
            shared,
            shutdown_tx: Some(shutdown_tx),
            tick_task: Some(tick_task),
        }
    }

    pub fn peer_id(&self) -> u64 {
        self.shared.peer_id
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.shared.directory
    }

    pub async fn connection_count(&self) -> usize {
        self.shared.outs.lock().await.len()
    }

    /// Stop the tick loop, then close every outbound connection. Safe to
    /// call more than once.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.tick_task.take() {
            if let Err(e) = task.await {
                warn!("scheduler task join failed: {e}");
            }
        }
        let mut outs = self.shared.outs.lock().await;
        for (peer, connection) in outs.drain() {
            debug!(peer = %peer, "closing on shutdown");
            connection.close().await;
        }
    }
}

async fn tick_loop(shared: Arc<NodeShared>, mut shutdown_rx: oneshot::Receiver<()>) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(shared.config.tick_interval_secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = interval.tick() => {}
        }
        tick += 1;
        // Shutdown also interrupts a tick in progress; any connection
        // opened by the aborted dial is reaped in Node::stop.
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = shared.run_tick(tick) => {}
        }
    }
    debug!("scheduler stopped");
}

impl NodeShared {
    async fn run_tick(&self, tick: u64) {
        self.make_connections().await;
        if tick % TIMED_SYNC_TICKS == 0 {
            self.timed_sync_all().await;
        }
    }

    /// One pass of outbound maintenance, mirroring the tier priorities:
    /// bootstrap when unproven, fill the quota from anchor/white/gray,
    /// and fall back to a seed when the directory has nothing dialable.
    async fn make_connections(&self) {
        if self.directory.white_count() == 0 {
            self.connect_to_seed().await;
        }

        let mut opened = false;
        if self.out_count().await < self.config.max_out_connections {
            opened = self.fill_quota().await;
        }

        // A dry pass with room to spare means the directory is exhausted;
        // a seed handshake restocks the gray tier.
        if !opened && self.out_count().await < self.config.max_out_connections {
            self.connect_to_seed().await;
        }
    }

    async fn out_count(&self) -> usize {
        self.outs.lock().await.len()
    }

    async fn connect_to_seed(&self) {
        if self.config.seed_nodes.is_empty() {
            return;
        }
        let index = rand::thread_rng().gen_range(0..self.config.seed_nodes.len());
        let seed = self.config.seed_nodes[index].clone();
        info!(seed = %seed, "bootstrapping from seed");
        if let Err(e) = self.connect_and_handshake(&seed, true).await {
            warn!(seed = %seed, "seed handshake failed: {e}");
        }
    }

    /// Open links until the quota is met. Below the expected white share
    /// the anchor and white tiers go first; otherwise the gray tier is
    /// probed before topping up from white.
    async fn fill_quota(&self) -> bool {
        let max_out = self.config.max_out_connections;
        let expected_white = self.config.expected_white_connections();
        let mut opened = false;
        if self.out_count().await < expected_white {
            opened |= self
                .fill_from_tier(Tier::Anchor, self.config.anchor_connections)
                .await;
            opened |= self.fill_from_tier(Tier::White, expected_white).await;
            opened |= self.fill_from_tier(Tier::Gray, max_out).await;
        } else {
            opened |= self.fill_from_tier(Tier::Gray, max_out).await;
            opened |= self.fill_from_tier(Tier::White, max_out).await;
        }
        opened
    }

    /// Resampling an already-tried or already-connected peer spends a
    /// sampling retry, never one of the tier's dial attempts.
    async fn fill_from_tier(&self, tier: Tier, target: usize) -> bool {
        let tier_len = match tier {
            Tier::Anchor => self.directory.anchor_count(),
            Tier::White => self.directory.white_count(),
            Tier::Gray => self.directory.gray_count(),
        };
        let sample_budget = 3 * tier_len.min(MAX_SAMPLED_PEERS);
        let mut tried: HashSet<String> = HashSet::new();
        let mut dials = 0;
        let mut opened = false;
        for _ in 0..sample_budget {
            if dials >= MAX_DIAL_ATTEMPTS || self.out_count().await >= target {
                break;
            }
            let candidate = match tier {
                Tier::Anchor => self.directory.sample_anchor().map(|e| e.address),
                Tier::White => self.directory.sample_white().map(|e| e.address),
                Tier::Gray => self.directory.sample_gray().map(|e| e.address),
            };
            let Some(address) = candidate else { break };
            let key = address.to_string();
            if !tried.insert(key.clone()) || self.outs.lock().await.contains_key(&key) {
                continue;
            }
            dials += 1;
            match self.connect_and_handshake(&key, false).await {
                Ok(()) => opened = true,
                Err(e) => debug!(peer = %key, "dial failed: {e}"),
            }
        }
        opened
    }

    /// Dial `address`, run the handshake, and merge its peer list.
    ///
    /// With `only_take_peerlist` the link is closed again once the gossip
    /// is harvested; otherwise the peer is promoted to white, pinned as
    /// an anchor, and the connection is kept for the outbound set.
    async fn connect_and_handshake(
        &self,
        address: &str,
        only_take_peerlist: bool,
    ) -> Result<(), HandshakeError> {
        if !only_take_peerlist {
            let mut outs = self.outs.lock().await;
            if outs.len() > self.config.max_out_connections {
                drop_random_connection(&mut outs).await;
            }
            if outs.len() >= self.config.max_out_connections {
                return Ok(());
            }
        }

        let connection = tokio::time::timeout(CONNECT_TIMEOUT, Connection::connect(address))
            .await
            .map_err(|_| LevinError::TimedOut)??;

        let request = HandshakeRequest {
            node_data: self.basic_node_data(),
            payload_data: CoreSyncData::default(),
        };
        let response: HandshakeResponse = match connection
            .invoke(COMMAND_HANDSHAKE, &request, INVOKE_TIMEOUT)
            .await
        {
            Ok((_code, response)) => response,
            Err(e) => {
                connection.close().await;
                return Err(e.into());
            }
        };

        if response.node_data.network_id != self.config.network_id {
            connection.close().await;
            return Err(HandshakeError::WrongNetwork {
                got: response.node_data.network_id,
            });
        }

        let merged = self
            .directory
            .merge(&response.peers, response.node_data.local_time as i64);
        match merged {
            Ok(count) => debug!(peer = %address, count, "peer list merged"),
            Err(e) => {
                connection.close().await;
                return Err(e.into());
            }
        }

        if only_take_peerlist {
            connection.close().await;
            return Ok(());
        }

        if let Some(node_address) = parse_address(address) {
            self.directory
                .promote_white(node_address, response.node_data.peer_id);
            self.directory
                .add_anchor(node_address, response.node_data.peer_id);
        }
        info!(peer = %address, "outbound connection established");
        self.outs
            .lock()
            .await
            .insert(address.to_owned(), Arc::new(connection));
        Ok(())
    }

    /// Refresh every live link. A peer that fails the sync is dropped;
    /// the next quota fill replaces it.
    async fn timed_sync_all(&self) {
        let connections: Vec<(String, Arc<Connection>)> = self
            .outs
            .lock()
            .await
            .iter()
            .map(|(key, connection)| (key.clone(), connection.clone()))
            .collect();
        let request = TimedSyncRequest {
            payload_data: CoreSyncData::default(),
        };
        for (key, connection) in connections {
            let result: Result<(i32, TimedSyncResponse), LevinError> = connection
                .invoke(COMMAND_TIMED_SYNC, &request, INVOKE_TIMEOUT)
                .await;
            match result {
                Ok((_code, response)) => {
                    if let Err(e) = self
                        .directory
                        .merge(&response.peers, response.local_time as i64)
                    {
                        warn!(peer = %key, "timed sync peer list rejected: {e}");
                    }
                }
                Err(e) => {
                    warn!(peer = %key, "timed sync failed, dropping connection: {e}");
                    connection.close().await;
                    self.outs.lock().await.remove(&key);
                }
            }
        }
    }

    fn basic_node_data(&self) -> BasicNodeData {
        BasicNodeData {
            local_time: unix_now() as u64,
            my_port: u32::from(self.config.listen_port),
            network_id: self.config.network_id.clone(),
            peer_id: self.peer_id,
        }
    }
}

async fn drop_random_connection(outs: &mut HashMap<String, Arc<Connection>>) {
    if outs.is_empty() {
        return;
    }
    let index = rand::thread_rng().gen_range(0..outs.len());
    if let Some(key) = outs.keys().nth(index).cloned() {
        if let Some(connection) = outs.remove(&key) {
            info!(peer = %key, "dropping connection over quota");
            connection.close().await;
        }
    }
}

fn parse_address(address: &str) -> Option<NodeAddress> {
    address
        .parse::<SocketAddrV4>()
        .ok()
        .map(|sa| NodeAddress::new(*sa.ip(), sa.port()))
}
