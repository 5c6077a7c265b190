//! Daemon process supervision.
//!
//! One daemon process per logical node, each with its own data directory and
//! port pair. The [`NodeSupervisor`] is the only registry of running
//! processes; components that need a node borrow it from here.

use crate::config::SupervisorConfig;
use crate::error::{Error, Result};
use crate::rpc::{NodeRpc, RpcClient};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// JSON-RPC code returned while a daemon is still loading its block index.
const RPC_IN_WARMUP: i64 = -28;

/// Spread applied to port bases so concurrent runs get disjoint ranges.
const PORT_PID_SPREAD: u32 = 999;

/// The P2P and RPC ports assigned to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    /// Peer-to-peer listening port.
    pub p2p: u16,
    /// JSON-RPC listening port.
    pub rpc: u16,
}

/// Derive the port pair of node `index` for the current process.
///
/// # Errors
///
/// Returns `Error::Config` if the resulting port does not fit in a `u16`.
pub fn port_pair(config: &SupervisorConfig, index: usize) -> Result<PortPair> {
    port_pair_for_pid(config, index, std::process::id())
}

fn port_pair_for_pid(config: &SupervisorConfig, index: usize, pid: u32) -> Result<PortPair> {
    let offset = u32::try_from(index)
        .ok()
        .and_then(|i| i.checked_add(pid % PORT_PID_SPREAD))
        .ok_or_else(|| Error::Config(format!("Node index {index} is too large")))?;
    let port = |base: u16| {
        u32::from(base)
            .checked_add(offset)
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| Error::Config(format!("Port base {base} + {offset} exceeds u16::MAX")))
    };
    Ok(PortPair {
        p2p: port(config.p2p_port_base)?,
        rpc: port(config.rpc_port_base)?,
    })
}

/// Write the node-local configuration file into `data_dir`.
///
/// Existing files are overwritten so copied data directories pick up the
/// ports of the current run.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub async fn write_node_config(
    data_dir: &Path,
    config: &SupervisorConfig,
    ports: PortPair,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(data_dir).await?;
    let path = data_dir.join(&config.conf_file_name);
    let content = format!(
        "regtest=1\nrpcuser={}\nrpcpassword={}\nport={}\nrpcport={}\ntxindex=1\n",
        config.rpc_user, config.rpc_password, ports.p2p, ports.rpc
    );
    tokio::fs::write(&path, content).await?;
    Ok(path)
}

/// Resolve the daemon binary from the configured path or search path.
///
/// A bare name is looked up in `search_path` first, then in `PATH`.
///
/// # Errors
///
/// Returns `Error::Setup` if no regular file is found.
pub fn resolve_daemon(config: &SupervisorConfig) -> Result<PathBuf> {
    let daemon = &config.daemon;
    let is_bare_name = daemon.components().count() == 1 && !daemon.is_absolute();

    if is_bare_name {
        let env_path = std::env::var_os("PATH").unwrap_or_default();
        let candidates = config
            .search_path
            .iter()
            .cloned()
            .chain(std::env::split_paths(&env_path));
        for dir in candidates {
            let candidate = dir.join(daemon);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        return Err(Error::Setup(format!(
            "Invalid daemon file: {} not found in search path",
            daemon.display()
        )));
    }

    if daemon.is_file() {
        Ok(std::fs::canonicalize(daemon)?)
    } else {
        Err(Error::Setup(format!(
            "Invalid daemon file: {}",
            daemon.display()
        )))
    }
}

/// Registry entry of one running node.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeManifestEntry {
    /// Node index.
    pub index: usize,
    /// Assigned ports.
    pub ports: PortPair,
    /// Data directory.
    pub data_dir: PathBuf,
    /// OS process id, if still known.
    pub pid: Option<u32>,
}

/// Snapshot of a run's node layout, written next to the data directories.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunManifest {
    /// Daemon binary in use.
    pub daemon: PathBuf,
    /// Running nodes.
    pub nodes: Vec<NodeManifestEntry>,
    /// Creation time in RFC3339.
    pub created_at: String,
}

/// A running daemon process.
#[derive(Debug)]
pub struct NodeHandle {
    index: usize,
    data_dir: PathBuf,
    ports: PortPair,
    rpc: RpcClient,
    pid: Option<u32>,
    child: Mutex<Child>,
}

impl NodeHandle {
    /// Node index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Assigned ports.
    #[must_use]
    pub fn ports(&self) -> PortPair {
        self.ports
    }

    /// RPC client for this node.
    #[must_use]
    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// Peer address other nodes use to reach this one.
    #[must_use]
    pub fn p2p_addr(&self) -> String {
        format!("127.0.0.1:{}", self.ports.p2p)
    }

    /// Fail with `Error::NodeExited` if the process is gone.
    ///
    /// # Errors
    ///
    /// Returns `Error::NodeExited` if the process has exited, or `Error::Io`
    /// if its status cannot be queried.
    pub fn check_alive(&self) -> Result<()> {
        match self.child.lock().try_wait()? {
            Some(status) => Err(Error::NodeExited {
                index: self.index,
                status: status.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// A node's RPC client together with the address peers dial.
#[derive(Debug, Clone)]
pub struct PeerEndpoint<R> {
    /// Node index.
    pub index: usize,
    /// RPC connection.
    pub rpc: R,
    /// `ip:port` of the node's P2P listener.
    pub p2p_addr: String,
}

/// An indexed set of reachable nodes.
///
/// Implemented by the process supervisor and by the in-memory test network,
/// so topology, barrier and scenario code never depend on how nodes run.
pub trait NodeSet {
    /// RPC connection type of the nodes.
    type Rpc: NodeRpc + Clone;

    /// Node indices in ascending order.
    fn indices(&self) -> Vec<usize>;

    /// Endpoint of node `index`, failing if the node is gone.
    ///
    /// # Errors
    ///
    /// Returns `Error::Setup` for an unknown index and `Error::NodeExited`
    /// for a dead process.
    fn endpoint(&self, index: usize) -> Result<PeerEndpoint<Self::Rpc>>;

    /// Endpoints of several nodes, in the given order.
    ///
    /// # Errors
    ///
    /// See [`NodeSet::endpoint`].
    fn endpoints_of(&self, indices: &[usize]) -> Result<Vec<PeerEndpoint<Self::Rpc>>> {
        indices.iter().map(|&i| self.endpoint(i)).collect()
    }

    /// Endpoints of every node, ordered by index.
    ///
    /// # Errors
    ///
    /// See [`NodeSet::endpoint`].
    fn endpoints(&self) -> Result<Vec<PeerEndpoint<Self::Rpc>>> {
        self.endpoints_of(&self.indices())
    }
}

/// Spawns, tracks and stops daemon processes.
#[derive(Debug)]
pub struct NodeSupervisor {
    config: SupervisorConfig,
    daemon: PathBuf,
    nodes: BTreeMap<usize, NodeHandle>,
}

impl NodeSupervisor {
    /// Create a supervisor, resolving the daemon binary up front.
    ///
    /// # Errors
    ///
    /// Returns `Error::Setup` if the daemon binary cannot be found.
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        let daemon = resolve_daemon(&config)?;
        info!("Using daemon {}", daemon.display());
        Ok(Self {
            config,
            daemon,
            nodes: BTreeMap::new(),
        })
    }

    /// Supervisor configuration.
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Resolved daemon binary.
    #[must_use]
    pub fn daemon(&self) -> &Path {
        &self.daemon
    }

    /// Start node `index` in `data_dir` and wait until its RPC answers.
    ///
    /// # Errors
    ///
    /// Returns `Error::Setup` if the index is already running, the process
    /// cannot be spawned, exits during startup, or does not answer within
    /// the liveness budget.
    pub async fn start(
        &mut self,
        index: usize,
        data_dir: &Path,
        extra_args: &[String],
    ) -> Result<&NodeHandle> {
        if self.nodes.contains_key(&index) {
            return Err(Error::Setup(format!("Node {index} is already running")));
        }

        let ports = port_pair(&self.config, index)?;
        write_node_config(data_dir, &self.config, ports).await?;

        let mut command = Command::new(&self.daemon);
        command
            .arg(format!("-datadir={}", data_dir.display()))
            .arg("-keypool=1")
            .arg("-discover=0")
            .args(&self.config.extra_args)
            .args(extra_args)
            .kill_on_drop(true);
        if self.config.show_stdout {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        debug!(
            "Starting node {} (p2p {}, rpc {}) in {}",
            index,
            ports.p2p,
            ports.rpc,
            data_dir.display()
        );
        let child = command.spawn().map_err(|e| {
            Error::Setup(format!(
                "Failed to spawn {} for node {index}: {e}",
                self.daemon.display()
            ))
        })?;

        let rpc = RpcClient::new(
            format!("node{index}"),
            ports.rpc,
            &self.config.rpc_user,
            &self.config.rpc_password,
            self.config.rpc_timeout(),
        )?;

        let handle = NodeHandle {
            index,
            data_dir: data_dir.to_path_buf(),
            ports,
            rpc,
            pid: child.id(),
            child: Mutex::new(child),
        };

        if let Err(e) = self.wait_until_live(&handle).await {
            let mut child = handle.child.into_inner();
            if let Err(kill_err) = child.kill().await {
                debug!("Node {index} kill after failed startup: {kill_err}");
            }
            return Err(e);
        }

        info!("Node {} is up (rpc port {})", index, ports.rpc);
        Ok(self.nodes.entry(index).or_insert(handle))
    }

    /// Start nodes `0..count` under `root/node<i>`.
    ///
    /// # Errors
    ///
    /// Returns the first startup error; nodes already started stay registered
    /// so the caller can still tear them down.
    pub async fn start_all(&mut self, count: usize, root: &Path) -> Result<()> {
        for index in 0..count {
            let data_dir = node_data_dir(root, index);
            self.start(index, &data_dir, &[]).await?;
        }
        Ok(())
    }

    async fn wait_until_live(&self, handle: &NodeHandle) -> Result<()> {
        let attempts = self.config.startup_max_attempts;
        for attempt in 1..=attempts {
            if let Err(Error::NodeExited { index, status }) = handle.check_alive() {
                return Err(Error::Setup(format!(
                    "Node {index} exited during startup: {status}"
                )));
            }

            match handle.rpc.get_block_count().await {
                Ok(height) => {
                    debug!("Node {} answered at height {height}", handle.index);
                    return Ok(());
                }
                Err(Error::Transport(_)) => {}
                Err(Error::Rpc { code, .. }) if code == RPC_IN_WARMUP => {}
                Err(e) => {
                    return Err(Error::Setup(format!(
                        "Node {} liveness probe failed: {e}",
                        handle.index
                    )));
                }
            }

            debug!(
                "Node {} not ready ({attempt}/{attempts})",
                handle.index
            );
            tokio::time::sleep(self.config.startup_poll_interval()).await;
        }

        Err(Error::Setup(format!(
            "Node {} did not answer RPC after {attempts} attempts",
            handle.index
        )))
    }

    /// Stop node `index`: graceful stop RPC, then a bounded wait for exit.
    ///
    /// The process is killed if it outlives the stop timeout.
    ///
    /// # Errors
    ///
    /// Returns `Error::Setup` if the node is not registered, or `Error::Io` if
    /// waiting on the process fails.
    pub async fn stop(&mut self, index: usize) -> Result<()> {
        let handle = self
            .nodes
            .remove(&index)
            .ok_or_else(|| Error::Setup(format!("Node {index} is not running")))?;

        if let Err(e) = handle.rpc.stop().await {
            warn!("Stop RPC for node {} failed: {}", index, e);
        }

        let mut child = handle.child.into_inner();
        match tokio::time::timeout(self.config.stop_timeout(), child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!("Node {} exited with {}", index, status);
            }
            Err(_) => {
                warn!(
                    "Node {} did not exit within {:?}, killing it",
                    index,
                    self.config.stop_timeout()
                );
                child.kill().await?;
            }
        }
        Ok(())
    }

    /// Stop every registered node in reverse index order.
    ///
    /// All nodes are attempted even if one fails.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered.
    pub async fn stop_all(&mut self) -> Result<()> {
        let indices: Vec<usize> = self.nodes.keys().rev().copied().collect();
        let mut first_error = None;
        for index in indices {
            if let Err(e) = self.stop(index).await {
                warn!("Error stopping node {}: {}", index, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Access a running node.
    ///
    /// # Errors
    ///
    /// Returns `Error::Setup` if the index is unknown, or
    /// `Error::NodeExited` if the process died.
    pub fn node(&self, index: usize) -> Result<&NodeHandle> {
        let handle = self
            .nodes
            .get(&index)
            .ok_or_else(|| Error::Setup(format!("Node {index} is not running")))?;
        handle.check_alive()?;
        Ok(handle)
    }

    /// RPC client of a running node.
    ///
    /// # Errors
    ///
    /// See [`NodeSupervisor::node`].
    pub fn rpc(&self, index: usize) -> Result<RpcClient> {
        Ok(self.node(index)?.rpc.clone())
    }

    /// RPC clients of several running nodes, in the given order.
    ///
    /// # Errors
    ///
    /// See [`NodeSupervisor::node`].
    pub fn rpcs(&self, indices: &[usize]) -> Result<Vec<RpcClient>> {
        indices.iter().map(|&i| self.rpc(i)).collect()
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Describe the running nodes for a manifest file.
    #[must_use]
    pub fn manifest(&self) -> RunManifest {
        RunManifest {
            daemon: self.daemon.clone(),
            nodes: self
                .nodes
                .values()
                .map(|n| NodeManifestEntry {
                    index: n.index,
                    ports: n.ports,
                    data_dir: n.data_dir.clone(),
                    pid: n.pid,
                })
                .collect(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl NodeSet for NodeSupervisor {
    type Rpc = RpcClient;

    fn indices(&self) -> Vec<usize> {
        self.nodes.keys().copied().collect()
    }

    fn endpoint(&self, index: usize) -> Result<PeerEndpoint<RpcClient>> {
        let node = self.node(index)?;
        Ok(PeerEndpoint {
            index,
            rpc: node.rpc.clone(),
            p2p_addr: node.p2p_addr(),
        })
    }
}

/// Data directory of node `index` below `root`.
#[must_use]
pub fn node_data_dir(root: &Path, index: usize) -> PathBuf {
    root.join(format!("node{index}"))
}
