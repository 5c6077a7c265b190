//! A supervised network on a throwaway directory.

use regnet_harness::config::{DaemonFlavor, HarnessConfig};
use regnet_harness::supervisor::NodeSupervisor;
use regnet_harness::{baseline, Result};
use std::path::PathBuf;
use tempfile::TempDir;

/// Environment variable naming the daemon binary.
pub const DAEMON_ENV: &str = "REGNET_DAEMON";

/// Environment variable selecting the daemon flavor.
pub const FLAVOR_ENV: &str = "REGNET_FLAVOR";

/// Nodes started from a fresh copy of the baseline chain.
pub struct TestNetwork {
    config: HarnessConfig,
    supervisor: NodeSupervisor,
    root: TempDir,
}

impl TestNetwork {
    /// Configuration for `count` nodes with everything below `root`.
    pub fn config(root: &TempDir, count: usize) -> HarnessConfig {
        let mut config = HarnessConfig {
            node_count: count,
            tmp_dir: Some(root.path().join("runs")),
            ..HarnessConfig::default()
        };
        if let Ok(daemon) = std::env::var(DAEMON_ENV) {
            config.supervisor.daemon = PathBuf::from(daemon);
        }
        if std::env::var(FLAVOR_ENV).is_ok_and(|f| f == "mastercore") {
            config.flavor = DaemonFlavor::MasterCore;
        }
        config.baseline.cache_dir = root.path().join("cache");
        config
    }

    /// Build the baseline and start `count` nodes on a copy of it.
    pub async fn setup(count: usize) -> Result<Self> {
        let root = TempDir::new()?;
        let config = Self::config(&root, count);

        let cache_dir = baseline::ensure(&config).await?;
        let run_dir = root.path().join("run");
        baseline::install(&cache_dir, &run_dir, count).await?;

        let mut supervisor = NodeSupervisor::new(config.supervisor.clone())?;
        if let Err(e) = supervisor.start_all(count, &run_dir).await {
            supervisor.stop_all().await?;
            return Err(e);
        }
        Ok(Self {
            config,
            supervisor,
            root,
        })
    }

    /// Harness configuration in use.
    pub fn harness_config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The supervisor owning the processes.
    pub fn supervisor(&self) -> &NodeSupervisor {
        &self.supervisor
    }

    /// Mutable access, for stopping individual nodes.
    pub fn supervisor_mut(&mut self) -> &mut NodeSupervisor {
        &mut self.supervisor
    }

    /// Directory holding the cache and the run.
    pub fn root(&self) -> &std::path::Path {
        self.root.path()
    }

    /// Stop every node.
    pub async fn teardown(mut self) -> Result<()> {
        self.supervisor.stop_all().await
    }
}
