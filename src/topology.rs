//! Peer topology control: line graph, single-pivot split and rejoin.
//!
//! Nodes are linked `0 - 1 - ... - n-1`. Cutting the one edge that crosses
//! the pivot yields exactly two contiguous, internally connected partitions.
//! The controller only manipulates peer links; callers must run a
//! convergence barrier before treating the network as settled.

use crate::config::TopologyConfig;
use crate::error::{Error, Result};
use crate::rpc::{AddNodeMode, NodeRpc, PeerInfo};
use crate::supervisor::PeerEndpoint;
use std::collections::BTreeSet;
use tracing::{debug, info};

const RPC_METHOD_NOT_FOUND: i64 = -32601;

/// Connectivity state of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    /// No links established yet.
    Unconnected,
    /// Every node reaches every other node.
    Joined,
    /// The edge entering `pivot` is cut.
    Split {
        /// Chain position of the first node of the second partition.
        pivot: usize,
    },
}

/// Owns the edge set and the split state of a chain of nodes.
#[derive(Debug, Clone)]
pub struct TopologyController {
    config: TopologyConfig,
    chain: Vec<usize>,
    // (dialer, target) node indices
    edges: BTreeSet<(usize, usize)>,
    state: NetworkState,
}

impl TopologyController {
    /// Create a controller with no links.
    #[must_use]
    pub fn new(config: TopologyConfig) -> Self {
        Self {
            config,
            chain: Vec::new(),
            edges: BTreeSet::new(),
            state: NetworkState::Unconnected,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> NetworkState {
        self.state
    }

    /// Established links as (dialer, target) node indices.
    #[must_use]
    pub fn edges(&self) -> &BTreeSet<(usize, usize)> {
        &self.edges
    }

    /// Node indices in chain order.
    #[must_use]
    pub fn chain(&self) -> &[usize] {
        &self.chain
    }

    /// Groups of nodes that can reach each other.
    ///
    /// One group when joined, two when split. Every chain node is in
    /// exactly one group.
    #[must_use]
    pub fn partitions(&self) -> Vec<Vec<usize>> {
        match self.state {
            NetworkState::Split { pivot } => {
                let (lower, upper) = self.chain.split_at(pivot);
                vec![lower.to_vec(), upper.to_vec()]
            }
            NetworkState::Joined => vec![self.chain.clone()],
            NetworkState::Unconnected => self.chain.iter().map(|&i| vec![i]).collect(),
        }
    }

    /// Index of the partition containing node `index`.
    #[must_use]
    pub fn partition_of(&self, index: usize) -> Option<usize> {
        self.partitions().iter().position(|p| p.contains(&index))
    }

    /// Link `nodes[i]` to `nodes[i + 1]` for every `i`.
    ///
    /// Each link is dialed by the lower chain position and must complete its
    /// handshake before the next one is made.
    ///
    /// # Errors
    ///
    /// Returns `Error::Topology` if the chain already exists or a handshake
    /// does not complete in time.
    pub async fn connect_chain<R: NodeRpc>(&mut self, nodes: &[PeerEndpoint<R>]) -> Result<()> {
        if self.state != NetworkState::Unconnected {
            return Err(Error::Topology("chain is already connected".to_string()));
        }
        if nodes.is_empty() {
            return Err(Error::Topology("cannot connect an empty chain".to_string()));
        }

        self.chain = nodes.iter().map(|n| n.index).collect();
        for pair in nodes.windows(2) {
            self.connect_pair(&pair[0], &pair[1]).await?;
        }
        self.state = NetworkState::Joined;
        info!("Connected {} node(s) as a chain", nodes.len());
        Ok(())
    }

    /// Cut the edge between chain positions `pivot - 1` and `pivot`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Topology` if the network is not joined, the pivot
    /// would leave a partition empty, or the peers do not drop each other
    /// in time.
    pub async fn split<R: NodeRpc>(
        &mut self,
        nodes: &[PeerEndpoint<R>],
        pivot: usize,
    ) -> Result<()> {
        match self.state {
            NetworkState::Joined => {}
            NetworkState::Split { pivot: current } => {
                return Err(Error::Topology(format!(
                    "network is already split at {current}"
                )));
            }
            NetworkState::Unconnected => {
                return Err(Error::Topology("network is not connected".to_string()));
            }
        }
        if pivot == 0 || pivot >= self.chain.len() {
            return Err(Error::Topology(format!(
                "pivot {pivot} leaves a partition of a {}-node chain empty",
                self.chain.len()
            )));
        }

        let (lower, upper) = (self.chain[pivot - 1], self.chain[pivot]);
        let dialer = find(nodes, lower)?;
        let target = find(nodes, upper)?;
        self.disconnect_pair(dialer, target).await?;
        self.state = NetworkState::Split { pivot };
        info!("Split network between node {lower} and node {upper}");
        Ok(())
    }

    /// Restore the edge removed by [`TopologyController::split`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Topology` if the network is not split or the
    /// restored link does not complete its handshake in time.
    pub async fn join<R: NodeRpc>(&mut self, nodes: &[PeerEndpoint<R>]) -> Result<()> {
        let NetworkState::Split { pivot } = self.state else {
            return Err(Error::Topology("network is not split".to_string()));
        };

        let (lower, upper) = (self.chain[pivot - 1], self.chain[pivot]);
        let dialer = find(nodes, lower)?;
        let target = find(nodes, upper)?;
        self.connect_pair(dialer, target).await?;
        self.state = NetworkState::Joined;
        info!("Joined network between node {lower} and node {upper}");
        Ok(())
    }

    fn degree(&self, index: usize) -> usize {
        self.edges
            .iter()
            .filter(|&&(a, b)| a == index || b == index)
            .count()
    }

    async fn connect_pair<R: NodeRpc>(
        &mut self,
        dialer: &PeerEndpoint<R>,
        target: &PeerEndpoint<R>,
    ) -> Result<()> {
        dialer
            .rpc
            .add_node(&target.p2p_addr, AddNodeMode::OneTry)
            .await?;
        self.edges.insert((dialer.index, target.index));

        let attempts = self.config.max_attempts;
        for attempt in 1..=attempts {
            let dialer_peers = dialer.rpc.get_peer_info().await?;
            let target_peers = target.rpc.get_peer_info().await?;

            let linked = dialer_peers.iter().any(|p| p.addr == target.p2p_addr)
                && target_peers.len() >= self.degree(target.index);
            if linked && handshaken(&dialer_peers) && handshaken(&target_peers) {
                debug!(
                    "Node {} -> node {} handshake complete",
                    dialer.index, target.index
                );
                return Ok(());
            }

            debug!(
                "Waiting for node {} -> node {} handshake ({attempt}/{attempts})",
                dialer.index, target.index
            );
            tokio::time::sleep(self.config.poll_interval()).await;
        }

        self.edges.remove(&(dialer.index, target.index));
        Err(Error::Topology(format!(
            "handshake node {} -> node {} incomplete after {attempts} attempts",
            dialer.index, target.index
        )))
    }

    async fn disconnect_pair<R: NodeRpc>(
        &mut self,
        dialer: &PeerEndpoint<R>,
        target: &PeerEndpoint<R>,
    ) -> Result<()> {
        match dialer.rpc.disconnect_node(&target.p2p_addr).await {
            Ok(()) => {}
            Err(e) if e.rpc_code() == Some(RPC_METHOD_NOT_FOUND) => {
                return Err(Error::Topology(format!(
                    "node {} cannot split the network, disconnectnode needs a Bitcoin Core 0.12 or later base: {e}",
                    dialer.index
                )));
            }
            Err(e) => return Err(e),
        }
        self.edges.remove(&(dialer.index, target.index));

        let attempts = self.config.max_attempts;
        for attempt in 1..=attempts {
            let dialer_peers = dialer.rpc.get_peer_info().await?;
            let target_peers = target.rpc.get_peer_info().await?;

            let dropped = !dialer_peers.iter().any(|p| p.addr == target.p2p_addr)
                && target_peers.len() == self.degree(target.index);
            if dropped {
                return Ok(());
            }

            debug!(
                "Waiting for node {} and node {} to drop each other ({attempt}/{attempts})",
                dialer.index, target.index
            );
            tokio::time::sleep(self.config.poll_interval()).await;
        }

        Err(Error::Topology(format!(
            "node {} and node {} still linked after {attempts} attempts",
            dialer.index, target.index
        )))
    }
}

fn handshaken(peers: &[PeerInfo]) -> bool {
    peers.iter().all(|p| p.version != 0)
}

fn find<R>(nodes: &[PeerEndpoint<R>], index: usize) -> Result<&PeerEndpoint<R>> {
    nodes
        .iter()
        .find(|n| n.index == index)
        .ok_or_else(|| Error::Topology(format!("node {index} is not part of the network")))
}
