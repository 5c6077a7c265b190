//! Configuration for regnet-harness.

use crate::amount::Amount;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Flavor of the daemon under test.
///
/// Selects the concrete RPC method names used by the capability adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonFlavor {
    /// Omni Core (`omni_*` RPC namespace, `generate`).
    #[default]
    Omni,
    /// Legacy Master Core (`*_MP` RPC namespace, `setgenerate`).
    MasterCore,
}

/// Strategy used to pick unspent outputs for a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoinSelection {
    /// Consume every output matching the filter, newest first.
    ///
    /// Reference fixtures were produced this way, so it stays the default.
    #[default]
    DrainAll,
    /// Stop as soon as amount plus fee is covered.
    UntilCovered,
}

/// Process supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Path (or bare name resolved via `search_path` / `PATH`) of the daemon.
    #[serde(default = "default_daemon")]
    pub daemon: PathBuf,

    /// Extra directories searched for a bare daemon name.
    #[serde(default)]
    pub search_path: Vec<PathBuf>,

    /// Name of the node-local configuration file.
    #[serde(default = "default_conf_file_name")]
    pub conf_file_name: String,

    /// RPC user written into every node configuration.
    #[serde(default = "default_rpc_credential")]
    pub rpc_user: String,

    /// RPC password written into every node configuration.
    #[serde(default = "default_rpc_credential")]
    pub rpc_password: String,

    /// First P2P port; the node index and process id are added to it.
    #[serde(default = "default_p2p_port_base")]
    pub p2p_port_base: u16,

    /// First RPC port; the node index and process id are added to it.
    #[serde(default = "default_rpc_port_base")]
    pub rpc_port_base: u16,

    /// Forward daemon stdout/stderr instead of discarding it.
    #[serde(default)]
    pub show_stdout: bool,

    /// Arguments appended to every daemon command line.
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Liveness polling interval in milliseconds.
    #[serde(default = "default_startup_poll_interval_ms")]
    pub startup_poll_interval_ms: u64,

    /// Liveness polling attempts before startup is declared failed.
    #[serde(default = "default_startup_max_attempts")]
    pub startup_max_attempts: u32,

    /// Seconds to wait for a process to exit after the stop RPC.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Per-request RPC timeout in seconds.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            daemon: default_daemon(),
            search_path: Vec::new(),
            conf_file_name: default_conf_file_name(),
            rpc_user: default_rpc_credential(),
            rpc_password: default_rpc_credential(),
            p2p_port_base: default_p2p_port_base(),
            rpc_port_base: default_rpc_port_base(),
            show_stdout: false,
            extra_args: Vec::new(),
            startup_poll_interval_ms: default_startup_poll_interval_ms(),
            startup_max_attempts: default_startup_max_attempts(),
            stop_timeout_secs: default_stop_timeout_secs(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

impl SupervisorConfig {
    /// Liveness polling interval.
    #[must_use]
    pub fn startup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.startup_poll_interval_ms)
    }

    /// Bound on waiting for a stopped process to exit.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Per-request RPC timeout.
    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

/// Convergence barrier polling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    /// Delay between polling rounds in milliseconds.
    #[serde(default = "default_convergence_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Polling rounds before the barrier fails.
    #[serde(default = "default_convergence_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_convergence_poll_interval_ms(),
            max_attempts: default_convergence_max_attempts(),
        }
    }
}

impl ConvergenceConfig {
    /// Delay between polling rounds.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Peer-link settings used by the topology controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Delay between handshake / disconnect checks in milliseconds.
    #[serde(default = "default_handshake_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Checks before a handshake or disconnect is declared failed.
    #[serde(default = "default_handshake_max_attempts")]
    pub max_attempts: u32,

    /// Default pivot: index of the first node of the second partition.
    #[serde(default = "default_pivot")]
    pub pivot: usize,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_handshake_poll_interval_ms(),
            max_attempts: default_handshake_max_attempts(),
            pivot: default_pivot(),
        }
    }
}

impl TopologyConfig {
    /// Delay between peer-state checks.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Defaults for transaction-originating entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Fee used when a payment does not name one.
    #[serde(default = "default_fee")]
    pub default_fee: Amount,

    /// Coin selection strategy.
    #[serde(default)]
    pub coin_selection: CoinSelection,

    /// Well-known protocol fee address paid by the first leg of an offer payment.
    #[serde(default = "default_fee_address")]
    pub fee_address: String,

    /// Exodus address receiving token purchases.
    #[serde(default = "default_exodus_address")]
    pub exodus_address: String,

    /// Default minimum confirmations for unspent-output listing.
    #[serde(default)]
    pub min_conf: u32,

    /// Default maximum confirmations for unspent-output listing.
    #[serde(default = "default_max_conf")]
    pub max_conf: u32,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            default_fee: default_fee(),
            coin_selection: CoinSelection::default(),
            fee_address: default_fee_address(),
            exodus_address: default_exodus_address(),
            min_conf: 0,
            max_conf: default_max_conf(),
        }
    }
}

/// Baseline chain cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Directory holding the pristine `node<i>` data directories.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Remove the cache before the run.
    #[serde(default)]
    pub clear_cache: bool,

    /// Blocks mined by node 0 when the cache is built.
    #[serde(default = "default_baseline_blocks")]
    pub block_count: u32,

    /// Files under `regtest/` removed from each cached node.
    #[serde(default = "default_volatile_files")]
    pub volatile_files: Vec<String>,

    /// Directories under `regtest/` removed from each cached node.
    #[serde(default = "default_volatile_dirs")]
    pub volatile_dirs: Vec<String>,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            clear_cache: false,
            block_count: default_baseline_blocks(),
            volatile_files: default_volatile_files(),
            volatile_dirs: default_volatile_dirs(),
        }
    }
}

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Number of daemon nodes per scenario.
    #[serde(default = "default_node_count")]
    pub node_count: usize,

    /// Root directory for per-run data directories (random temp dir if unset).
    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,

    /// Leave data directories behind on exit.
    #[serde(default)]
    pub no_cleanup: bool,

    /// Log every RPC call.
    #[serde(default)]
    pub trace_rpc: bool,

    /// Hide per-step progress output.
    #[serde(default)]
    pub quiet: bool,

    /// Skip the remaining scenarios of a batch after the first failure.
    #[serde(default)]
    pub fail_hard: bool,

    /// Daemon flavor (selects RPC method names).
    #[serde(default)]
    pub flavor: DaemonFlavor,

    /// Process supervision.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Convergence barrier policy.
    #[serde(default)]
    pub convergence: ConvergenceConfig,

    /// Topology control.
    #[serde(default)]
    pub topology: TopologyConfig,

    /// Entity defaults.
    #[serde(default)]
    pub entity: EntityConfig,

    /// Baseline chain cache.
    #[serde(default)]
    pub baseline: BaselineConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            node_count: default_node_count(),
            tmp_dir: None,
            no_cleanup: false,
            trace_rpc: false,
            quiet: false,
            fail_hard: false,
            flavor: DaemonFlavor::default(),
            supervisor: SupervisorConfig::default(),
            convergence: ConvergenceConfig::default(),
            topology: TopologyConfig::default(),
            entity: EntityConfig::default(),
            baseline: BaselineConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check invariants that cannot be expressed in the types.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violated constraint.
    pub fn validate(&self) -> crate::Result<()> {
        if self.node_count == 0 {
            return Err(crate::Error::Config("node_count must be at least 1".to_string()));
        }
        if self.node_count > MAX_NODE_COUNT {
            return Err(crate::Error::Config(format!(
                "node_count {} exceeds maximum {MAX_NODE_COUNT}",
                self.node_count
            )));
        }
        if self.convergence.max_attempts == 0 || self.supervisor.startup_max_attempts == 0 {
            return Err(crate::Error::Config(
                "retry budgets must allow at least one attempt".to_string(),
            ));
        }
        if self.entity.min_conf > self.entity.max_conf {
            return Err(crate::Error::Config(format!(
                "min_conf {} exceeds max_conf {}",
                self.entity.min_conf, self.entity.max_conf
            )));
        }
        if self.entity.default_fee.is_negative() {
            return Err(crate::Error::Config("default_fee must not be negative".to_string()));
        }
        Ok(())
    }
}

/// Port offsets are `index + pid % 999`; keep the sum well inside u16.
pub const MAX_NODE_COUNT: usize = 64;

fn default_daemon() -> PathBuf {
    PathBuf::from("../../src/omnicored")
}

fn default_conf_file_name() -> String {
    "bitcoin.conf".to_string()
}

fn default_rpc_credential() -> String {
    "rt".to_string()
}

const fn default_p2p_port_base() -> u16 {
    11000
}

const fn default_rpc_port_base() -> u16 {
    12000
}

const fn default_startup_poll_interval_ms() -> u64 {
    250
}

const fn default_startup_max_attempts() -> u32 {
    240 // one minute at the default interval
}

const fn default_stop_timeout_secs() -> u64 {
    60
}

const fn default_rpc_timeout_secs() -> u64 {
    120
}

const fn default_convergence_poll_interval_ms() -> u64 {
    1000
}

const fn default_convergence_max_attempts() -> u32 {
    120
}

const fn default_handshake_poll_interval_ms() -> u64 {
    100
}

const fn default_handshake_max_attempts() -> u32 {
    300
}

const fn default_pivot() -> usize {
    2
}

fn default_fee() -> Amount {
    Amount::from_sats(10_000)
}

fn default_fee_address() -> String {
    "mpexoDuSkGGqvqrkrjiFng38QPkJQVFyqv".to_string()
}

fn default_exodus_address() -> String {
    "moneyqMan7uh8FqdCA2BV5yZ8qVrc9ikLP".to_string()
}

const fn default_max_conf() -> u32 {
    999_999
}

fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "regnet").map_or_else(
        || PathBuf::from("cache"),
        |dirs| dirs.cache_dir().join("baseline"),
    )
}

const fn default_baseline_blocks() -> u32 {
    200
}

fn default_volatile_files() -> Vec<String> {
    [
        "db.log",
        "debug.log",
        "mastercore.log",
        "omnicore.log",
        "peers.dat",
        "temp-ok-to-remove.log",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn default_volatile_dirs() -> Vec<String> {
    [
        "MP_persist",
        "MP_spinfo",
        "MP_tradelist",
        "MP_txlist",
        "MP_stolist",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

const fn default_node_count() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}
