//! CLI definition for regnet.

use clap::{Parser, ValueEnum};
use regnet_harness::config::DaemonFlavor;
use std::path::PathBuf;

/// Multi-node regtest harness for blockchain daemons.
#[derive(Parser, Debug)]
#[command(name = "regnet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Remove the baseline chain cache before running.
    #[arg(long = "clearcache")]
    pub clear_cache: bool,

    /// Leave data directories behind on exit.
    #[arg(long = "nocleanup")]
    pub no_cleanup: bool,

    /// Forward daemon stdout/stderr.
    #[arg(long)]
    pub stdout: bool,

    /// Daemon binary (path, or bare name looked up in the search path).
    #[arg(long, env = "REGNET_DAEMON")]
    pub daemon: Option<PathBuf>,

    /// Extra directory searched for a bare daemon name (repeatable).
    #[arg(long = "search-path")]
    pub search_path: Vec<PathBuf>,

    /// Root for per-run data directories.
    #[arg(long = "tmpdir")]
    pub tmp_dir: Option<PathBuf>,

    /// Baseline chain cache directory.
    #[arg(long = "cachedir")]
    pub cache_dir: Option<PathBuf>,

    /// Log every RPC request and response.
    #[arg(long = "tracerpc")]
    pub trace_rpc: bool,

    /// Only show warnings and result lines.
    #[arg(long)]
    pub quiet: bool,

    /// Node count per scenario.
    #[arg(long)]
    pub nodes: Option<usize>,

    /// Daemon flavor, selecting token RPC method names.
    #[arg(long, value_enum)]
    pub flavor: Option<FlavorArg>,

    /// Scenario to run (repeatable; all built-in scenarios if omitted).
    #[arg(long)]
    pub scenario: Vec<String>,

    /// Skip remaining scenarios after the first failure.
    #[arg(long)]
    pub fail_hard: bool,

    /// TOML configuration file; flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (overrides the configuration file).
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Daemon flavor accepted on the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum FlavorArg {
    /// `omni_*` methods.
    Omni,
    /// `*_MP` methods.
    Mastercore,
}

impl From<FlavorArg> for DaemonFlavor {
    fn from(value: FlavorArg) -> Self {
        match value {
            FlavorArg::Omni => Self::Omni,
            FlavorArg::Mastercore => Self::MasterCore,
        }
    }
}
